/// The note template sent to the server on `create-note`.
///
/// The server renders the final page from this template. Encrypted notes
/// carry only the ciphertext envelope in `content`; title and description
/// stay empty so nothing readable leaks into the page metadata.
use serde::{Deserialize, Serialize};

use crate::document::{Element, ElementStyle};

const DESCRIPTION_LIMIT: usize = 200;
const DESCRIPTION_CUT: usize = 197;

/// A stylesheet file hosted on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CssFile {
    pub url: String,
    pub hash: String,
}

/// Result of publishing the page stylesheet, decided once after the
/// chunks are uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssPublishResult {
    SingleFile(CssFile),
    ChunkedFiles(Vec<CssFile>),
}

impl CssPublishResult {
    /// `None` when nothing was uploaded.
    pub fn from_files(mut files: Vec<CssFile>) -> Option<Self> {
        match files.len() {
            0 => None,
            1 => files.pop().map(CssPublishResult::SingleFile),
            _ => Some(CssPublishResult::ChunkedFiles(files)),
        }
    }

    /// Files in load order.
    pub fn files(&self) -> &[CssFile] {
        match self {
            CssPublishResult::SingleFile(file) => std::slice::from_ref(file),
            CssPublishResult::ChunkedFiles(files) => files,
        }
    }
}

/// JSON plaintext wrapped by the cipher for encrypted notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePlaintext {
    pub content: String,
    pub basename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteTemplate {
    pub filename: String,
    pub title: String,
    pub description: String,
    pub width: String,
    pub elements: Vec<ElementStyle>,
    pub encrypted: bool,
    pub content: String,
    pub math_jax: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<Vec<CssFile>>,
    pub show_footer: bool,
}

impl NoteTemplate {
    /// Attach the published stylesheet. With no result the server falls
    /// back to the stylesheet it already holds for the user.
    pub fn set_css(&mut self, css: Option<&CssPublishResult>) {
        self.css = css.map(|result| result.files().to_vec());
    }
}

/// Plain-text description from the note's paragraphs, cut to fit a
/// link preview.
pub fn description_from(content: &Element) -> String {
    let text = content
        .descendants()
        .into_iter()
        .filter(|el| el.tag == "p")
        .map(|el| el.text_content())
        .collect::<Vec<_>>()
        .join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if text.chars().count() > DESCRIPTION_LIMIT {
        let cut: String = text.chars().take(DESCRIPTION_CUT).collect();
        format!("{cut}...")
    } else {
        text
    }
}

/// Whether the rendered note contains typeset math.
pub fn has_math(content: &Element) -> bool {
    content.find(|el| el.tag == "mjx-container").is_some()
}
