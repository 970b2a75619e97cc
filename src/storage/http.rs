/// HTTP client for the share server.
///
/// Every request is signed with a fresh nonce: `x-sharenote-key` is the hex
/// SHA-256 of `nonce + api_key`. Nonces are millisecond timestamps that
/// strictly increase within the process, so concurrent uploads never share
/// one. Transient failures (5xx, 429, timeouts, connection errors) are
/// retried with a fixed delay and become `Unknown` once attempts run out;
/// 4xx responses are terminal and carry the server's message.
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    CheckFilesResponse, CreateNoteRequest, DeleteNoteRequest, FileQuery, FileUpload, RemoteStore,
    UrlResponse, NOTE_FILETYPE,
};
use crate::config::PublishConfig;
use crate::crypto::hash::sha256_hex;
use crate::crypto::ApiSecret;
use crate::error::{PublishError, Result, REAUTH_STATUS};

const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

static LAST_NONCE: AtomicU64 = AtomicU64::new(0);

/// Current time in ms, bumped past the last nonce handed out.
fn next_nonce() -> u64 {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    let previous = LAST_NONCE
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(previous + 1)
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    uid: String,
    api_key: ApiSecret,
    max_attempts: usize,
    retry_delay: std::time::Duration,
}

impl HttpRemoteStore {
    pub fn new(config: &PublishConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("sharenote/{CLIENT_VERSION}"))
            .build()
            .map_err(|e| PublishError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.server_base().to_string(),
            uid: config.uid.clone(),
            api_key: config.api_key.clone(),
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/file/{}", self.base_url, path)
    }

    /// A POST with fresh auth headers. Called once per attempt.
    fn post(&self, path: &str) -> RequestBuilder {
        let nonce = next_nonce().to_string();
        let key = sha256_hex(format!("{nonce}{}", self.api_key.expose()));
        self.client
            .post(self.endpoint(path))
            .header("x-sharenote-id", &self.uid)
            .header("x-sharenote-key", key)
            .header("x-sharenote-nonce", nonce)
            .header("x-sharenote-version", CLIENT_VERSION)
    }

    /// Send the request produced by `build`, retrying transient failures.
    async fn send<F>(&self, operation: &str, build: F) -> Result<String>
    where
        F: Fn() -> RequestBuilder,
    {
        let backoff = ConstantBuilder::default()
            .with_delay(self.retry_delay)
            .with_max_times(self.max_attempts.saturating_sub(1));

        (|| async { execute(build()).await })
            .retry(backoff)
            .when(PublishError::is_transient)
            .notify(|err: &PublishError, delay| {
                warn!(operation, error = %err, retry_in_ms = delay.as_millis() as u64, "Retrying request");
            })
            .await
            .map_err(|e| match e {
                PublishError::Transient { message, .. } => PublishError::Unknown(format!(
                    "{operation}: gave up after {} attempts: {message}",
                    self.max_attempts
                )),
                other => other,
            })
    }

    async fn send_json<T, F>(&self, operation: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let body = self.send(operation, build).await?;
        serde_json::from_str(&body)
            .map_err(|e| PublishError::Unknown(format!("{operation}: malformed response: {e}")))
    }
}

/// One attempt: send and classify the outcome.
async fn execute(request: RequestBuilder) -> Result<String> {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() || e.is_connect() => {
            return Err(PublishError::Transient {
                status: None,
                message: e.to_string(),
            })
        }
        Err(e) => return Err(PublishError::Unknown(e.to_string())),
    };

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| PublishError::Transient {
            status: Some(status.as_u16()),
            message: format!("reading response body: {e}"),
        })?;

    if status.is_success() {
        return Ok(body);
    }
    Err(classify_status(status, &body))
}

fn server_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .message
        .or(parsed.error)
        .filter(|m| !m.trim().is_empty())
}

fn classify_status(status: StatusCode, body: &str) -> PublishError {
    let code = status.as_u16();
    let message = server_message(body);

    if code == REAUTH_STATUS {
        return PublishError::Reauthenticate(
            message.unwrap_or_else(|| "Please re-authenticate with the share server.".into()),
        );
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return PublishError::Transient {
            status: Some(code),
            message: message.unwrap_or_else(|| format!("server returned {status}")),
        };
    }
    if status.is_client_error() {
        return match message {
            Some(message) => PublishError::Known(message),
            None => PublishError::Unknown(format!("request rejected with {status}")),
        };
    }
    PublishError::Unknown(format!("unexpected status {status}"))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn check_files(&self, files: &[FileQuery]) -> Result<CheckFilesResponse> {
        let body = serde_json::json!({ "files": files });
        let response: CheckFilesResponse = self
            .send_json("check-files", || self.post("check-files").json(&body))
            .await?;
        if !response.success {
            return Err(PublishError::Unknown("check-files was not successful".into()));
        }
        debug!(
            queried = files.len(),
            hosted = response.files.iter().filter(|f| f.url.is_some()).count(),
            "Checked remote files"
        );
        Ok(response)
    }

    async fn upload(&self, file: &FileUpload) -> Result<String> {
        let response: UrlResponse = self
            .send_json("upload", || {
                self.post("upload")
                    .header("x-sharenote-filetype", &file.filetype)
                    .header("x-sharenote-hash", &file.hash)
                    .header("x-sharenote-bytelength", file.byte_length())
                    .body(file.content.clone())
            })
            .await?;
        Ok(response.url)
    }

    async fn create_note(&self, request: &CreateNoteRequest) -> Result<String> {
        let response: UrlResponse = self
            .send_json("create-note", || self.post("create-note").json(request))
            .await?;
        Ok(response.url)
    }

    async fn delete_note(&self, filename: &str) -> Result<()> {
        let request = DeleteNoteRequest {
            filename: filename.to_string(),
            filetype: NOTE_FILETYPE.to_string(),
        };
        self.send("delete", || self.post("delete").json(&request))
            .await
            .map(|_| ())
    }
}
