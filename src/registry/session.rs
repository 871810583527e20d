use super::Token;
use crate::store::BlobRef;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Uploaded, not downloaded yet
    Pending,
    /// Handed to a downloader, no further downloads allowed
    Consumed,
    /// TTL passed, waiting for the sweeper
    Expired,
}

/// File metadata captured at upload time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMeta {
    original_filename: String,
    content_type: String,
    size_bytes: u64,
    sha256: String,
}

impl SessionMeta {
    pub fn new(
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: u64,
        sha256: impl Into<String>,
    ) -> Self {
        Self {
            original_filename: original_filename.into(),
            content_type: content_type.into(),
            size_bytes,
            sha256: sha256.into(),
        }
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Lowercase hex SHA-256 of the stored bytes.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

/// Binds a token to its blob for the lifetime of one transfer.
#[derive(Debug, Clone)]
pub struct Session {
    token: Token,
    blob: BlobRef,
    meta: SessionMeta,
    created_at: Instant,
    expires_at: Instant,
    consumed_at: Option<Instant>,
    state: SessionState,
}

impl Session {
    pub(super) fn new(
        token: Token,
        blob: BlobRef,
        meta: SessionMeta,
        created_at: Instant,
        ttl: Duration,
    ) -> Self {
        Self {
            token,
            blob,
            meta,
            created_at,
            expires_at: created_at + ttl,
            consumed_at: None,
            state: SessionState::Pending,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn blob(&self) -> &BlobRef {
        &self.blob
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn consumed_at(&self) -> Option<Instant> {
        self.consumed_at
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.state == SessionState::Expired || now >= self.expires_at
    }

    pub(super) fn mark_consumed(&mut self, now: Instant) {
        self.state = SessionState::Consumed;
        self.consumed_at = Some(now);
    }

    pub(super) fn mark_expired(&mut self) {
        self.state = SessionState::Expired;
    }
}
