use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;

use sharenote::config::PublishConfig;
use sharenote::crypto::ApiSecret;
use sharenote::error::PublishError;
use sharenote::storage::http::HttpRemoteStore;
use sharenote::storage::{CreateNoteRequest, FileUpload, RemoteStore, NOTE_FILETYPE};
use sharenote::template::NoteTemplate;

fn store_for(server: &Server) -> HttpRemoteStore {
    let config = PublishConfig {
        server_url: server.url(),
        uid: "user-1".into(),
        api_key: ApiSecret::new("secret"),
        max_attempts: 3,
        retry_delay: Duration::from_millis(5),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    HttpRemoteStore::new(&config).unwrap()
}

#[tokio::test]
async fn test_check_files_sends_batch_and_auth() {
    let mut server = Server::new_async().await;
    let file = FileUpload::new("png", vec![1, 2, 3]);
    let mock = server
        .mock("POST", "/v1/file/check-files")
        .match_header("x-sharenote-id", "user-1")
        .match_header("x-sharenote-nonce", Matcher::Regex(r"^\d+$".into()))
        .match_header("x-sharenote-key", Matcher::Regex(r"^[0-9a-f]{64}$".into()))
        .match_body(Matcher::PartialJson(json!({
            "files": [{ "hash": file.hash, "filetype": "png", "byteLength": 3 }]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "success": true,
                "files": [{ "hash": file.hash, "filetype": "png", "url": "https://x/y.png" }],
                "css": { "url": "https://x/user.css", "hash": "abc" }
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let store = store_for(&server);
    let response = store.check_files(&[file.query()]).await.unwrap();
    assert_eq!(response.url_for(&file.hash, "png"), Some("https://x/y.png"));
    assert_eq!(response.css.unwrap().url, "https://x/user.css");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unsuccessful_check_files_is_an_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/file/check-files")
        .with_status(200)
        .with_body(r#"{"success":false}"#)
        .create_async()
        .await;

    let store = store_for(&server);
    assert!(matches!(
        store.check_files(&[]).await,
        Err(PublishError::Unknown(_))
    ));
}

#[tokio::test]
async fn test_upload_sends_raw_bytes_and_headers() {
    let mut server = Server::new_async().await;
    let file = FileUpload::new("woff2", b"font bytes".to_vec());
    let mock = server
        .mock("POST", "/v1/file/upload")
        .match_header("x-sharenote-filetype", "woff2")
        .match_header("x-sharenote-hash", file.hash.as_str())
        .match_header("x-sharenote-bytelength", "10")
        .match_body("font bytes")
        .with_status(200)
        .with_body(r#"{"url":"https://x/font.woff2"}"#)
        .create_async()
        .await;

    let store = store_for(&server);
    assert_eq!(store.upload(&file).await.unwrap(), "https://x/font.woff2");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_exhausted_retries_become_terminal() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/file/upload")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let store = store_for(&server);
    let error = store
        .upload(&FileUpload::new("png", vec![0]))
        .await
        .unwrap_err();
    assert!(!error.is_transient());
    assert!(
        matches!(&error, PublishError::Unknown(m) if m.starts_with("upload: gave up after 3 attempts")),
        "{error:?}"
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/file/upload")
        .with_status(415)
        .with_body(r#"{"message":"Unsupported media type"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = store_for(&server);
    let error = store
        .upload(&FileUpload::new("exe", vec![0]))
        .await
        .unwrap_err();
    assert!(matches!(&error, PublishError::Known(m) if m == "Unsupported media type"));
    assert_eq!(error.user_message(), "Unsupported media type");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_reauth_status() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/file/create-note")
        .with_status(462)
        .with_body(r#"{"message":"API key is no longer valid"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = store_for(&server);
    let request = CreateNoteRequest {
        filename: "abc".into(),
        filetype: NOTE_FILETYPE.into(),
        hash: "h".into(),
        expiration: None,
        template: NoteTemplate::default(),
    };
    assert!(matches!(
        store.create_note(&request).await,
        Err(PublishError::Reauthenticate(_))
    ));
}

#[tokio::test]
async fn test_create_note() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/file/create-note")
        .match_body(Matcher::PartialJson(json!({
            "filename": "abc",
            "filetype": "html",
            "expiration": "7d",
            "template": { "encrypted": true, "mathJax": false }
        })))
        .with_status(200)
        .with_body(r#"{"url":"https://share.test/abc"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = store_for(&server);
    let request = CreateNoteRequest {
        filename: "abc".into(),
        filetype: NOTE_FILETYPE.into(),
        hash: "h".into(),
        expiration: Some("7d".into()),
        template: NoteTemplate {
            encrypted: true,
            ..Default::default()
        },
    };
    assert_eq!(
        store.create_note(&request).await.unwrap(),
        "https://share.test/abc"
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_delete_ignores_empty_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/file/delete")
        .match_body(Matcher::Json(json!({ "filename": "abc", "filetype": "html" })))
        .with_status(200)
        .create_async()
        .await;

    let store = store_for(&server);
    store.delete_note("abc").await.unwrap();
    mock.assert_async().await;
}
