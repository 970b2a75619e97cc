use thiserror::Error;

/// Status code the server reserves for "credential invalid, re-authenticate".
pub const REAUTH_STATUS: u16 = 462;

/// Message shown when a failure carries no user-facing text of its own.
pub const GENERIC_FAILURE: &str = "There was an error publishing the note, please try again.";

/// A single asset that could not be uploaded during a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFailure {
    /// Addressable filename the asset would have been stored under.
    pub filename: String,
    /// Reason reported by the transport or the server.
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Transient network error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transient { status: Option<u16>, message: String },

    #[error("{0}")]
    Known(String),

    #[error("Re-authentication required: {0}")]
    Reauthenticate(String),

    #[error("Unexpected failure: {0}")]
    Unknown(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("{} asset(s) failed to upload", failed.len())]
    AssetUploads { failed: Vec<AssetFailure> },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PublishError {
    /// Whether the failure is worth retrying automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Transient { .. })
    }

    /// Text suitable for showing to the user as the single terminal status.
    ///
    /// Server-supplied rejections are already user-facing and pass through;
    /// everything else collapses to a generic retry hint.
    pub fn user_message(&self) -> String {
        match self {
            PublishError::Known(message) | PublishError::Reauthenticate(message) => message.clone(),
            PublishError::Decryption(_) => "Unable to decrypt using this key.".to_string(),
            PublishError::AssetUploads { failed } => format!(
                "{} attachment(s) could not be uploaded, please try again.",
                failed.len()
            ),
            _ => GENERIC_FAILURE.to_string(),
        }
    }
}

impl From<serde_json::Error> for PublishError {
    fn from(e: serde_json::Error) -> Self {
        PublishError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PublishError>;
