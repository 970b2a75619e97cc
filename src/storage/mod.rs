/// Remote note store abstraction.
///
/// The server is a content-addressed file store with four operations:
/// - check-files: which of these digests are already hosted
/// - upload: store one file, returns its public URL
/// - create-note: store the rendered note template
/// - delete: remove a published note
///
/// `http` talks to the real service; `memory` is an in-process store that
/// records every call.
pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::{addressable_filename, ContentDigest};
use crate::error::Result;
use crate::template::{CssFile, NoteTemplate};

/// Filetype the server uses for notes.
pub const NOTE_FILETYPE: &str = "html";

/// One entry of a check-files request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub hash: String,
    pub filetype: String,
    pub byte_length: u64,
}

/// One entry of a check-files response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub hash: String,
    pub filetype: String,
    /// Present only when the file is already hosted.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFilesResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub files: Vec<RemoteFile>,
    /// The user's stylesheet as currently stored on the server.
    #[serde(default)]
    pub css: Option<CssFile>,
}

impl CheckFilesResponse {
    /// Hosted URL for a file, if the server reported one.
    pub fn url_for(&self, hash: &str, filetype: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.hash == hash && f.filetype == filetype)
            .and_then(|f| f.url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

/// A file ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub filetype: String,
    /// Wire hash of `content`.
    pub hash: String,
    /// Content-addressed name, used for logging and failure reports.
    pub filename: String,
    pub content: Vec<u8>,
}

impl FileUpload {
    pub fn new(filetype: impl Into<String>, content: Vec<u8>) -> Self {
        let digest = ContentDigest::of(&content);
        Self::from_digest(filetype, &digest, content)
    }

    pub fn from_digest(filetype: impl Into<String>, digest: &ContentDigest, content: Vec<u8>) -> Self {
        let filetype = filetype.into();
        Self {
            hash: digest.wire_hash(),
            filename: addressable_filename(digest, &filetype),
            filetype,
            content,
        }
    }

    pub fn byte_length(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn query(&self) -> FileQuery {
        FileQuery {
            hash: self.hash.clone(),
            filetype: self.filetype.clone(),
            byte_length: self.byte_length(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNoteRequest {
    pub filename: String,
    pub filetype: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    pub template: NoteTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteNoteRequest {
    pub filename: String,
    pub filetype: String,
}

/// Response body of upload and create-note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlResponse {
    pub url: String,
}

/// Operations the publish pipeline needs from the server.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Human-readable name of this store.
    fn name(&self) -> &str;

    /// Ask which files are already hosted. One request per batch.
    async fn check_files(&self, files: &[FileQuery]) -> Result<CheckFilesResponse>;

    /// Upload one file. Returns its public URL.
    async fn upload(&self, file: &FileUpload) -> Result<String>;

    /// Create or replace a note. Returns the note URL (without key).
    async fn create_note(&self, request: &CreateNoteRequest) -> Result<String>;

    /// Delete a published note.
    async fn delete_note(&self, filename: &str) -> Result<()>;
}
