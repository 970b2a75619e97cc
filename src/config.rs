/// Publishing configuration.
///
/// Everything the pipeline used to read from global plugin settings is an
/// explicit field here and is passed to `Publisher::new`.
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::ApiSecret;
use crate::error::{PublishError, Result};

pub const DEFAULT_SERVER_URL: &str = "https://api.note.sx";

/// Which colour scheme the published page uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeMode {
    /// Keep whatever the editor was showing.
    #[default]
    SameAsTheme,
    Dark,
    Light,
}

impl ThemeMode {
    /// Body class forced by this mode, if any.
    pub fn body_class(self) -> Option<&'static str> {
        match self {
            ThemeMode::SameAsTheme => None,
            ThemeMode::Dark => Some("theme-dark"),
            ThemeMode::Light => Some("theme-light"),
        }
    }
}

/// Where the published page title comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TitleSource {
    /// The note's file name.
    #[default]
    Basename,
    /// The first `h1` of the note body.
    FirstHeading,
    /// The `title` frontmatter property.
    Frontmatter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Share server base URL.
    pub server_url: String,

    /// Per-user id sent with every request.
    pub uid: String,

    /// Shared API secret used to sign request nonces.
    pub api_key: ApiSecret,

    /// CSS width for the note body; empty keeps the server default.
    pub note_width: String,

    pub theme_mode: ThemeMode,

    pub title_source: TitleSource,

    /// Strip frontmatter/properties from the published body.
    pub remove_frontmatter: bool,

    pub show_footer: bool,

    /// Recompress large jpg/png/webp/bmp media before upload.
    pub compress_images: bool,

    /// Optional expiry passed through to the server (e.g. "7d").
    pub expiration: Option<String>,

    /// Byte budget for one uploaded stylesheet chunk.
    pub css_chunk_size: usize,

    /// Byte size of one encrypted payload chunk.
    pub cipher_chunk_size: usize,

    /// Concurrent asset uploads per queue drain.
    pub upload_concurrency: usize,

    /// Attempts per request, including the first.
    pub max_attempts: usize,

    #[serde(with = "millis")]
    pub retry_delay: Duration,

    #[serde(with = "millis")]
    pub request_timeout: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            uid: String::new(),
            api_key: ApiSecret::new(""),
            note_width: String::new(),
            theme_mode: ThemeMode::default(),
            title_source: TitleSource::default(),
            remove_frontmatter: true,
            show_footer: true,
            compress_images: true,
            expiration: None,
            css_chunk_size: 500 * 1024,
            cipher_chunk_size: crate::crypto::streaming::DEFAULT_CHUNK_SIZE,
            upload_concurrency: 8,
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

impl PublishConfig {
    /// Create configuration from environment variables.
    ///
    /// Required:
    /// - `SHARENOTE_UID`
    /// - `SHARENOTE_API_KEY`
    ///
    /// Optional (defaults from [`PublishConfig::default`]):
    /// - `SHARENOTE_SERVER_URL`
    /// - `SHARENOTE_NOTE_WIDTH`
    /// - `SHARENOTE_THEME_MODE` (`same-as-theme`, `dark`, `light`)
    /// - `SHARENOTE_TITLE_SOURCE` (`basename`, `first-heading`, `frontmatter`)
    /// - `SHARENOTE_REMOVE_FRONTMATTER`, `SHARENOTE_SHOW_FOOTER`,
    ///   `SHARENOTE_COMPRESS_IMAGES`
    /// - `SHARENOTE_EXPIRATION`
    /// - `SHARENOTE_CSS_CHUNK_SIZE`, `SHARENOTE_CIPHER_CHUNK_SIZE`
    /// - `SHARENOTE_UPLOAD_CONCURRENCY`, `SHARENOTE_MAX_ATTEMPTS`
    /// - `SHARENOTE_RETRY_DELAY_MS`, `SHARENOTE_REQUEST_TIMEOUT_MS`
    pub fn from_env() -> Result<Self> {
        let uid = env::var("SHARENOTE_UID")
            .map_err(|_| PublishError::Config("SHARENOTE_UID not set".to_string()))?;
        let api_key = env::var("SHARENOTE_API_KEY")
            .map_err(|_| PublishError::Config("SHARENOTE_API_KEY not set".to_string()))?;

        let defaults = Self::default();
        let config = Self {
            server_url: env::var("SHARENOTE_SERVER_URL").unwrap_or(defaults.server_url),
            uid,
            api_key: ApiSecret::new(api_key),
            note_width: env::var("SHARENOTE_NOTE_WIDTH").unwrap_or(defaults.note_width),
            theme_mode: env::var("SHARENOTE_THEME_MODE")
                .ok()
                .and_then(|v| serde_json::from_value(serde_json::Value::String(v)).ok())
                .unwrap_or(defaults.theme_mode),
            title_source: env::var("SHARENOTE_TITLE_SOURCE")
                .ok()
                .and_then(|v| serde_json::from_value(serde_json::Value::String(v)).ok())
                .unwrap_or(defaults.title_source),
            remove_frontmatter: env_flag("SHARENOTE_REMOVE_FRONTMATTER")
                .unwrap_or(defaults.remove_frontmatter),
            show_footer: env_flag("SHARENOTE_SHOW_FOOTER").unwrap_or(defaults.show_footer),
            compress_images: env_flag("SHARENOTE_COMPRESS_IMAGES")
                .unwrap_or(defaults.compress_images),
            expiration: env::var("SHARENOTE_EXPIRATION")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            css_chunk_size: env_parse("SHARENOTE_CSS_CHUNK_SIZE").unwrap_or(defaults.css_chunk_size),
            cipher_chunk_size: env_parse("SHARENOTE_CIPHER_CHUNK_SIZE")
                .unwrap_or(defaults.cipher_chunk_size),
            upload_concurrency: env_parse("SHARENOTE_UPLOAD_CONCURRENCY")
                .unwrap_or(defaults.upload_concurrency),
            max_attempts: env_parse("SHARENOTE_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            retry_delay: env_parse("SHARENOTE_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            request_timeout: env_parse("SHARENOTE_REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a persisted settings file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| PublishError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            return Err(PublishError::Config("server_url is empty".into()));
        }
        if self.uid.trim().is_empty() {
            return Err(PublishError::Config("uid is empty".into()));
        }
        if self.api_key.is_empty() {
            return Err(PublishError::Config("api_key is empty".into()));
        }
        if self.css_chunk_size == 0 || self.cipher_chunk_size == 0 {
            return Err(PublishError::Config("chunk sizes must be non-zero".into()));
        }
        if self.upload_concurrency == 0 || self.max_attempts == 0 {
            return Err(PublishError::Config(
                "upload_concurrency and max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Server URL without a trailing slash.
    pub fn server_base(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PublishConfig {
        PublishConfig {
            uid: "user-1".into(),
            api_key: ApiSecret::new("secret"),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_requires_credentials() {
        assert!(matches!(
            PublishConfig::default().validate(),
            Err(PublishError::Config(_))
        ));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = PublishConfig {
            css_chunk_size: 0,
            ..valid()
        };
        assert!(config.validate().is_err());
        let config = PublishConfig {
            max_attempts: 0,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"uid":"u","api_key":"k","theme_mode":"dark","title_source":"first-heading","retry_delay":250}"#,
        )
        .unwrap();

        let config = PublishConfig::from_json_file(&path).unwrap();
        assert_eq!(config.theme_mode, ThemeMode::Dark);
        assert_eq!(config.title_source, TitleSource::FirstHeading);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 3);
        assert!(config.compress_images);
        assert_eq!(config.server_base(), DEFAULT_SERVER_URL);
    }

    #[test]
    fn test_from_json_file_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"uid":"","api_key":"k"}"#).unwrap();
        assert!(matches!(
            PublishConfig::from_json_file(&path),
            Err(PublishError::Config(_))
        ));
    }

    #[test]
    fn test_theme_body_class() {
        assert_eq!(ThemeMode::SameAsTheme.body_class(), None);
        assert_eq!(ThemeMode::Light.body_class(), Some("theme-light"));
    }
}
