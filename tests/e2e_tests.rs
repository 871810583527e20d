mod common;

use common::{payload, TestRelay};
use relaydrop::server::create_router;
use relaydrop::server::upload::UploadResponse;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Serve the relay on an ephemeral port and return its base URL.
async fn spawn_server(relay: &TestRelay) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let app = create_router(&relay.state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn file_form(name: &str, data: Vec<u8>) -> Form {
    let part = Part::bytes(data)
        .file_name(name.to_string())
        .mime_str("application/zip")
        .unwrap();
    Form::new().part("file", part)
}

#[tokio::test]
async fn test_upload_and_download_over_http() {
    let relay = TestRelay::new().await;
    let base = spawn_server(&relay).await;
    let client = reqwest::Client::new();
    let data = payload(200 * 1024);

    let response = client
        .post(format!("{}/upload", base))
        .multipart(file_form("backup.zip", data.clone()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let upload: UploadResponse = response.json().await.unwrap();
    assert_eq!(upload.expires_in, 60);

    let response = client
        .get(format!("{}/download/{}", base, upload.port))
        .header("Origin", "http://front.example")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "application/zip");
    assert_eq!(headers["x-content-sha256"], upload.sha256.as_str());
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert!(headers["access-control-expose-headers"]
        .to_str()
        .unwrap()
        .to_ascii_lowercase()
        .contains("content-disposition"));
    assert!(headers["content-disposition"]
        .to_str()
        .unwrap()
        .contains("filename=\"backup.zip\""));

    let body = response.bytes().await.unwrap();
    assert_eq!(body.as_ref(), data.as_slice());

    let again = client
        .get(format!("{}/download/{}", base, upload.port))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_upload_over_http() {
    let relay = TestRelay::new().await;
    let base = spawn_server(&relay).await;
    let client = reqwest::Client::new();
    let data = payload(common::MAX_UPLOAD_BYTES as usize + 128 * 1024);

    let response = client
        .post(format!("{}/upload", base))
        .multipart(file_form("too-big.zip", data))
        .send()
        .await;

    // The server may close the connection before the client finishes sending
    if let Ok(response) = response {
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let json: serde_json::Value = response.json().await.unwrap();
        assert_eq!(json["error"]["type"], "payload_too_large");
    }

    assert!(common::wait_until(|| relay.blob_count() == 0).await);
    assert!(relay.state.registry.is_empty());
}
