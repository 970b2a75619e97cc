/// In-process `RemoteStore`.
///
/// Keeps hosted files and notes in memory and records every call, so the
/// queue and pipeline can be exercised without a server. Individual hashes
/// can be made to fail on upload.
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{CheckFilesResponse, CreateNoteRequest, FileQuery, FileUpload, RemoteFile, RemoteStore};
use crate::error::{PublishError, Result};
use crate::template::CssFile;

#[derive(Debug, Default)]
struct State {
    files: HashMap<(String, String), String>,
    notes: HashMap<String, CreateNoteRequest>,
    css: Option<CssFile>,
    failing: HashSet<String>,
    check_calls: usize,
    uploads: Vec<FileUpload>,
    deleted: Vec<String>,
}

#[derive(Debug)]
pub struct MemoryStore {
    base_url: String,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark a file as already hosted at `url`.
    pub fn preload(&self, hash: &str, filetype: &str, url: &str) {
        self.state()
            .files
            .insert((hash.to_string(), filetype.to_string()), url.to_string());
    }

    /// Report a stored user stylesheet from check-files.
    pub fn set_css(&self, css: CssFile) {
        self.state().css = Some(css);
    }

    /// Make every upload of `hash` fail with a transient error.
    pub fn fail_uploads_of(&self, hash: &str) {
        self.state().failing.insert(hash.to_string());
    }

    pub fn check_calls(&self) -> usize {
        self.state().check_calls
    }

    pub fn uploads(&self) -> Vec<FileUpload> {
        self.state().uploads.clone()
    }

    pub fn note(&self, filename: &str) -> Option<CreateNoteRequest> {
        self.state().notes.get(filename).cloned()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    fn note_url(&self, filename: &str) -> String {
        format!("{}/{}", self.base_url, filename)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn check_files(&self, files: &[FileQuery]) -> Result<CheckFilesResponse> {
        let mut state = self.state();
        state.check_calls += 1;
        let files = files
            .iter()
            .map(|q| RemoteFile {
                hash: q.hash.clone(),
                filetype: q.filetype.clone(),
                url: state.files.get(&(q.hash.clone(), q.filetype.clone())).cloned(),
            })
            .collect();
        Ok(CheckFilesResponse {
            success: true,
            files,
            css: state.css.clone(),
        })
    }

    async fn upload(&self, file: &FileUpload) -> Result<String> {
        let mut state = self.state();
        state.uploads.push(file.clone());
        if state.failing.contains(&file.hash) {
            return Err(PublishError::Transient {
                status: Some(503),
                message: format!("upload of {} failed", file.filename),
            });
        }
        let url = format!("{}/files/{}", self.base_url, file.filename);
        state
            .files
            .insert((file.hash.clone(), file.filetype.clone()), url.clone());
        Ok(url)
    }

    async fn create_note(&self, request: &CreateNoteRequest) -> Result<String> {
        if request.filename.is_empty() {
            return Err(PublishError::Known("Missing filename".into()));
        }
        let url = self.note_url(&request.filename);
        self.state()
            .notes
            .insert(request.filename.clone(), request.clone());
        Ok(url)
    }

    async fn delete_note(&self, filename: &str) -> Result<()> {
        let mut state = self.state();
        if state.notes.remove(filename).is_none() {
            return Err(PublishError::Known(format!("Unable to find note {filename}")));
        }
        state.deleted.push(filename.to_string());
        Ok(())
    }
}
