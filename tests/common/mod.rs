#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use relaydrop::registry::{SessionRegistry, Token};
use relaydrop::server::{create_router, AppState, TransferLimits};
use relaydrop::store::{BlobStore, LocalStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "relaydrop-test-boundary";
pub const MAX_UPLOAD_BYTES: u64 = 1024 * 1024; // 1 MiB
pub const TOKEN_RANGE: &str = "5000-5999";

pub fn default_limits() -> TransferLimits {
    TransferLimits {
        max_upload_bytes: MAX_UPLOAD_BYTES,
        io_timeout: Duration::from_secs(5),
        min_free_bytes: 0,
    }
}

/// Relay wired to a temporary storage root, driven in-process.
pub struct TestRelay {
    pub state: AppState,
    pub dir: TempDir,
}

impl TestRelay {
    pub async fn new() -> Self {
        Self::with(default_limits(), TOKEN_RANGE, Duration::from_secs(60)).await
    }

    pub async fn with(limits: TransferLimits, range: &str, ttl: Duration) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = LocalStore::new(dir.path()).await.expect("open store");
        Self::with_store(Arc::new(store), dir, limits, range, ttl)
    }

    pub fn with_store(
        store: Arc<dyn BlobStore>,
        dir: TempDir,
        limits: TransferLimits,
        range: &str,
        ttl: Duration,
    ) -> Self {
        let registry = SessionRegistry::new(store.clone(), range.parse().unwrap(), ttl);
        Self {
            state: AppState::new(registry, store, limits),
            dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        create_router(&self.state)
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn upload(&self, filename: &str, content_type: &str, data: &[u8]) -> Response<Body> {
        self.send(upload_request(filename, content_type, data)).await
    }

    /// Upload and return the issued token, asserting success.
    pub async fn upload_token(&self, filename: &str, data: &[u8]) -> Token {
        let response = self.upload(filename, "text/plain", data).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let port = json["port"].as_u64().expect("numeric port");
        Token::new(u16::try_from(port).unwrap())
    }

    pub async fn download(&self, token: &str) -> Response<Body> {
        let request = Request::builder()
            .method("GET")
            .uri(format!("/download/{}", token))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Number of blob files left in the storage root.
    pub fn blob_count(&self) -> usize {
        std::fs::read_dir(self.dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some("blob"))
            .count()
    }
}

pub fn multipart_body(filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(filename: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(filename, content_type, data)))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

/// Deterministic payload spanning several read chunks
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
