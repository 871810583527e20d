//! `GET /download/:token`: single-use retrieval of a stored file.

use anyhow::Context;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Response, StatusCode},
};
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::io::ReaderStream;

use super::AppState;
use crate::common::AppError;
use crate::registry::{SessionRegistry, Token};
use crate::store::{BlobReader, BlobRef, StoreError};
use crate::utils::content_disposition;

const READ_CHUNK_BYTES: usize = 64 * 1024;
// Chunks buffered between the blob reader and the client
const STREAM_BUFFER_CHUNKS: usize = 4;

pub const SHA256_HEADER: &str = "x-content-sha256";

/// How a blob stream ended, for logging.
#[derive(Debug)]
enum StreamOutcome {
    Complete,
    ClientGone,
    ClientStalled,
    ReadStalled,
    ReadFailed(std::io::Error),
}

pub async fn download_handler(
    Path(raw_token): Path<String>,
    State(state): State<AppState>,
) -> Result<Response<Body>, AppError> {
    // Malformed codes get the same answer as unknown ones
    let token: Token = raw_token.parse().map_err(|_| AppError::NotFound)?;

    let session = state.registry.consume(token).map_err(|e| {
        tracing::debug!(%token, reason = %e, "download refused");
        AppError::from(e)
    })?;

    let blob = session.blob().clone();
    let meta = session.meta();

    let (reader, size) = match state.store.open(&blob).await {
        Ok(opened) => opened,
        Err(err) => {
            state.registry.release(token, &blob).await;
            return Err(match err {
                StoreError::NotFound(_) => AppError::NotFound,
                other => AppError::Storage(other),
            });
        }
    };

    if size != meta.size_bytes() {
        tracing::error!(
            %token,
            blob = %blob,
            expected = meta.size_bytes(),
            found = size,
            "stored blob size mismatch"
        );
        state.registry.release(token, &blob).await;
        return Err(AppError::Storage(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("blob {} holds {} bytes, expected {}", blob, size, meta.size_bytes()),
        ))));
    }

    tracing::info!(
        %token,
        filename = %meta.original_filename(),
        bytes = size,
        "download started"
    );

    // The pump owns cleanup, so the registry is never locked while streaming
    let (sender, receiver) = mpsc::channel(STREAM_BUFFER_CHUNKS);
    tokio::spawn(pump_blob(
        reader,
        sender,
        state.registry.clone(),
        token,
        blob,
        state.limits.io_timeout,
    ));

    let body = stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|chunk| (chunk, receiver))
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, meta.content_type())
        .header(header::CONTENT_LENGTH, size)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(meta.original_filename()),
        )
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .header(header::CACHE_CONTROL, "no-store")
        .header(SHA256_HEADER, meta.sha256())
        .body(Body::from_stream(body))
        .context("build download response")?;

    Ok(response)
}

/// Move blob chunks into the response channel, then retire the session.
///
/// Ends early when the client disconnects or stops draining for longer than
/// `io_timeout`; dropping the sender then aborts the response.
async fn pump_blob(
    reader: BlobReader,
    sender: mpsc::Sender<std::io::Result<Bytes>>,
    registry: SessionRegistry,
    token: Token,
    blob: BlobRef,
    io_timeout: Duration,
) {
    let mut chunks = ReaderStream::with_capacity(reader, READ_CHUNK_BYTES);
    let mut sent = 0u64;

    let outcome = loop {
        let next = match timeout(io_timeout, chunks.next()).await {
            Ok(next) => next,
            Err(_) => break StreamOutcome::ReadStalled,
        };

        match next {
            None => break StreamOutcome::Complete,
            Some(Err(e)) => {
                let _ = sender
                    .send(Err(std::io::Error::new(e.kind(), "blob read failed")))
                    .await;
                break StreamOutcome::ReadFailed(e);
            }
            Some(Ok(chunk)) => {
                let len = chunk.len() as u64;
                match timeout(io_timeout, sender.send(Ok(chunk))).await {
                    Ok(Ok(())) => sent += len,
                    Ok(Err(_)) => break StreamOutcome::ClientGone,
                    Err(_) => break StreamOutcome::ClientStalled,
                }
            }
        }
    };
    drop(sender);

    match &outcome {
        StreamOutcome::Complete => tracing::info!(%token, bytes = sent, "download complete"),
        other => tracing::warn!(%token, bytes = sent, outcome = ?other, "download ended early"),
    }

    // Single-use: the blob goes away however the stream ended
    registry.release(token, &blob).await;
}
