//! `POST /upload`: store one file and hand back its invite code.

use axum::{
    extract::{multipart::Field, multipart::MultipartError, Multipart, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::{within, AppState};
use crate::common::AppError;
use crate::registry::{SessionMeta, Token};
use crate::store::{BlobRef, StoreError};
use crate::utils::{guess_content_type, headers::OCTET_STREAM, sanitize_filename};

/// Slack for multipart boundaries and part headers on top of the file itself
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Invite code; the front-end reads it as `port`
    pub port: Token,
    pub expires_in: u64,
    pub sha256: String,
}

struct ReceivedBlob {
    size: u64,
    sha256: String,
}

pub async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    if state.health.is_degraded() {
        return Err(AppError::StorageUnavailable);
    }

    let limit = state.limits.max_upload_bytes;
    if let Some(declared) = declared_length(&headers) {
        // Reject on the declared size before reading a single byte
        if declared > limit.saturating_add(MULTIPART_OVERHEAD) {
            tracing::info!(declared, limit, "rejected upload by content-length");
            return Err(AppError::PayloadTooLarge { limit });
        }
        ensure_free_space(&state, declared).await?;
    }

    let mut field = loop {
        let next = within(state.limits.io_timeout, "multipart read", multipart.next_field())
            .await?
            .map_err(|e| multipart_error(e, limit))?;
        match next {
            Some(field) if is_file_field(&field) => break field,
            Some(_) => continue,
            None => return Err(AppError::BadRequest("no file field in form".to_string())),
        }
    };

    let filename = sanitize_filename(field.file_name().unwrap_or_default());
    let content_type = field
        .content_type()
        .filter(|ct| is_specific_content_type(ct))
        .map(str::to_owned)
        .unwrap_or_else(|| guess_content_type(&filename).to_string());

    let blob = BlobRef::generate();
    let received = match receive_blob(&state, &blob, &mut field).await {
        Ok(received) => received,
        Err(err) => {
            discard_blob(&state, &blob).await;
            return Err(err);
        }
    };

    let meta = SessionMeta::new(
        filename.clone(),
        content_type,
        received.size,
        received.sha256.clone(),
    );
    let token = match state.registry.create(blob.clone(), meta) {
        Ok(token) => token,
        Err(err) => {
            tracing::warn!(error = %err, "no session for stored blob");
            discard_blob(&state, &blob).await;
            return Err(err.into());
        }
    };

    tracing::info!(
        %token,
        blob = %blob,
        filename = %filename,
        bytes = received.size,
        "upload stored"
    );

    Ok(Json(UploadResponse {
        port: token,
        expires_in: state.registry.ttl().as_secs(),
        sha256: received.sha256,
    }))
}

/// Stream one multipart field into a new blob, enforcing the size ceiling.
async fn receive_blob(
    state: &AppState,
    blob: &BlobRef,
    field: &mut Field<'_>,
) -> Result<ReceivedBlob, AppError> {
    let limit = state.limits.max_upload_bytes;
    let io_timeout = state.limits.io_timeout;

    let mut writer = state
        .store
        .create(blob)
        .await
        .map_err(|e| storage_error(state, e))?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;

    while let Some(chunk) = within(io_timeout, "upload", field.chunk())
        .await?
        .map_err(|e| multipart_error(e, limit))?
    {
        size += chunk.len() as u64;
        if size > limit {
            tracing::info!(blob = %blob, limit, "upload exceeded ceiling mid-stream");
            return Err(AppError::PayloadTooLarge { limit });
        }

        hasher.update(&chunk);
        within(io_timeout, "blob write", writer.write_all(&chunk))
            .await?
            .map_err(|e| storage_error(state, e.into()))?;
    }

    within(io_timeout, "blob flush", writer.shutdown())
        .await?
        .map_err(|e| storage_error(state, e.into()))?;

    Ok(ReceivedBlob {
        size,
        sha256: hex::encode(hasher.finalize()),
    })
}

/// Best-effort removal of a blob that never became a session.
async fn discard_blob(state: &AppState, blob: &BlobRef) {
    if let Err(e) = state.store.delete(blob).await {
        tracing::warn!(
            blob = %blob,
            error = %e,
            "failed to discard partial blob, leaving it to the sweeper"
        );
    }
}

async fn ensure_free_space(state: &AppState, declared: u64) -> Result<(), AppError> {
    let Some(available) = state.store.available_space().await else {
        return Ok(());
    };

    let required = declared.saturating_add(state.limits.min_free_bytes);
    if available < required {
        tracing::warn!(available, required, "insufficient disk space for upload");
        return Err(AppError::InsufficientStorage(format!(
            "{} bytes requested, {} available",
            declared, available
        )));
    }
    Ok(())
}

fn storage_error(state: &AppState, err: StoreError) -> AppError {
    if err.is_fatal() {
        state.health.mark_degraded();
    }
    AppError::Storage(err)
}

fn multipart_error(err: MultipartError, limit: u64) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit }
    } else {
        AppError::BadRequest(err.body_text())
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn is_file_field(field: &Field<'_>) -> bool {
    field.name() == Some(FILE_FIELD) || field.file_name().is_some()
}

// Generic or unusable types fall back to guessing by extension
fn is_specific_content_type(content_type: &str) -> bool {
    content_type.contains('/')
        && !content_type.eq_ignore_ascii_case(OCTET_STREAM)
        && HeaderValue::from_str(content_type).is_ok()
}
