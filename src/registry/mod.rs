//! Session registry: invite token → session record
//!
//! All mutations go through [`SessionRegistry`]. Each token's record is
//! guarded by its DashMap shard lock, which is what makes `consume` atomic
//! against a concurrent `consume` or `remove` of the same token. No guard is
//! held across an `.await`.

mod session;
mod token;

pub use session::{Session, SessionMeta, SessionState};
pub use token::{ParseTokenError, Token, TokenRange, TokenRangeError};

use crate::store::{BlobRef, BlobStore};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("session already consumed")]
    AlreadyConsumed,

    #[error("no free token left in range")]
    CapacityExhausted,
}

/// Why the sweeper may reclaim a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    Expired,
    Consumed,
}

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<Token, Session>>,
    store: Arc<dyn BlobStore>,
    range: TokenRange,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn BlobStore>, range: TokenRange, ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            store,
            range,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn range(&self) -> TokenRange {
        self.range
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Register a fully written blob under a fresh token.
    ///
    /// Probes from a random offset so codes are not guessable from the
    /// previous one. The entry API makes check-and-insert a single step.
    pub fn create(&self, blob: BlobRef, meta: SessionMeta) -> Result<Token, RegistryError> {
        let capacity = self.range.capacity();
        if self.sessions.len() >= capacity {
            return Err(RegistryError::CapacityExhausted);
        }

        let offset = rand::thread_rng().gen_range(0..capacity);
        let now = Instant::now();

        for step in 0..capacity {
            let token = self.range.nth(offset + step);
            if let Entry::Vacant(slot) = self.sessions.entry(token) {
                slot.insert(Session::new(token, blob, meta, now, self.ttl));
                tracing::debug!(%token, "session created");
                return Ok(token);
            }
        }

        Err(RegistryError::CapacityExhausted)
    }

    /// Read-only lookup. Expired sessions are flagged for the sweeper.
    pub fn resolve(&self, token: Token) -> Result<Session, RegistryError> {
        let mut session = self
            .sessions
            .get_mut(&token)
            .ok_or(RegistryError::NotFound)?;

        if session.is_expired_at(Instant::now()) {
            session.mark_expired();
            return Err(RegistryError::Expired);
        }

        Ok(session.clone())
    }

    /// Claim the session for its one download.
    ///
    /// Exactly one caller ever gets `Ok` for a given token.
    pub fn consume(&self, token: Token) -> Result<Session, RegistryError> {
        let mut session = self
            .sessions
            .get_mut(&token)
            .ok_or(RegistryError::NotFound)?;
        let now = Instant::now();

        match session.state() {
            SessionState::Consumed => Err(RegistryError::AlreadyConsumed),
            SessionState::Expired => Err(RegistryError::Expired),
            SessionState::Pending if session.is_expired_at(now) => {
                session.mark_expired();
                Err(RegistryError::Expired)
            }
            SessionState::Pending => {
                session.mark_consumed(now);
                tracing::debug!(%token, "session consumed");
                Ok(session.clone())
            }
        }
    }

    /// Drop the session and its blob. Removing an absent token is a no-op.
    pub async fn remove(&self, token: Token) -> Option<Session> {
        let (_, session) = self.sessions.remove(&token)?;
        self.delete_blob(&session).await;
        Some(session)
    }

    /// Remove the session only if it still owns `blob`.
    ///
    /// A token can be swept and reissued while a download is still
    /// streaming; the late cleanup must leave the new session alone.
    pub async fn release(&self, token: Token, blob: &BlobRef) -> Option<Session> {
        let (_, session) = self
            .sessions
            .remove_if(&token, |_, session| session.blob() == blob)?;
        self.delete_blob(&session).await;
        Some(session)
    }

    /// Remove the session if it is still reclaimable at `now`.
    ///
    /// Checked under the entry lock, so a token reissued since the sweeper
    /// listed it is not touched.
    pub async fn reclaim(
        &self,
        token: Token,
        now: Instant,
        consumed_grace: Duration,
    ) -> Option<(Session, Reclaim)> {
        let mut reason = None;
        let (_, session) = self.sessions.remove_if(&token, |_, session| {
            reason = reclaim_reason(session, now, consumed_grace);
            reason.is_some()
        })?;
        self.delete_blob(&session).await;
        reason.map(|reason| (session, reason))
    }

    async fn delete_blob(&self, session: &Session) {
        let token = session.token();
        match self.store.delete(session.blob()).await {
            Ok(_) => tracing::debug!(%token, blob = %session.blob(), "session removed"),
            Err(e) => tracing::warn!(
                %token,
                blob = %session.blob(),
                error = %e,
                "failed to delete blob, leaving it to the sweeper"
            ),
        }
    }

    /// Sessions the sweeper should remove at `now`.
    pub fn reclaimable(&self, now: Instant, consumed_grace: Duration) -> Vec<(Token, Reclaim)> {
        self.sessions
            .iter()
            .filter_map(|entry| {
                reclaim_reason(entry.value(), now, consumed_grace)
                    .map(|reason| (*entry.key(), reason))
            })
            .collect()
    }

    /// Blobs currently owned by a session.
    pub fn live_blobs(&self) -> HashSet<BlobRef> {
        self.sessions
            .iter()
            .map(|entry| entry.value().blob().clone())
            .collect()
    }
}

fn reclaim_reason(session: &Session, now: Instant, consumed_grace: Duration) -> Option<Reclaim> {
    match session.consumed_at() {
        Some(consumed_at) if consumed_at + consumed_grace <= now => Some(Reclaim::Consumed),
        Some(_) => None,
        None if session.is_expired_at(now) => Some(Reclaim::Expired),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use tempfile::TempDir;

    async fn registry(range: &str, ttl: Duration) -> (SessionRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let registry = SessionRegistry::new(Arc::new(store), range.parse().unwrap(), ttl);
        (registry, dir)
    }

    fn meta() -> SessionMeta {
        SessionMeta::new("notes.txt", "text/plain", 5, "00")
    }

    #[tokio::test]
    async fn test_create_allocates_inside_range() {
        let (registry, _dir) = registry("3000-3009", Duration::from_secs(60)).await;

        let token = registry.create(BlobRef::generate(), meta()).unwrap();
        assert!(registry.range().contains(token));

        let session = registry.resolve(token).unwrap();
        assert_eq!(session.state(), SessionState::Pending);
        assert_eq!(session.meta().original_filename(), "notes.txt");
        assert_eq!(session.expires_at() - session.created_at(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_consume_is_single_use() {
        let (registry, _dir) = registry("3000-3009", Duration::from_secs(60)).await;
        let token = registry.create(BlobRef::generate(), meta()).unwrap();

        let session = registry.consume(token).unwrap();
        assert_eq!(session.state(), SessionState::Consumed);
        assert!(session.consumed_at().is_some());

        assert_eq!(registry.consume(token).unwrap_err(), RegistryError::AlreadyConsumed);
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let (registry, _dir) = registry("3000-3009", Duration::from_secs(60)).await;

        assert_eq!(registry.resolve(Token::new(3001)).unwrap_err(), RegistryError::NotFound);
        assert_eq!(registry.consume(Token::new(3001)).unwrap_err(), RegistryError::NotFound);
    }

    #[tokio::test]
    async fn test_expired_session_is_flagged() {
        let (registry, _dir) = registry("3000-3009", Duration::from_millis(20)).await;
        let token = registry.create(BlobRef::generate(), meta()).unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(registry.resolve(token).unwrap_err(), RegistryError::Expired);
        assert_eq!(registry.consume(token).unwrap_err(), RegistryError::Expired);

        let reclaim = registry.reclaimable(Instant::now(), Duration::from_secs(60));
        assert_eq!(reclaim, vec![(token, Reclaim::Expired)]);
    }

    #[tokio::test]
    async fn test_reclaimable_waits_for_consumed_grace() {
        let (registry, _dir) = registry("3000-3009", Duration::from_secs(60)).await;
        let token = registry.create(BlobRef::generate(), meta()).unwrap();
        registry.consume(token).unwrap();

        let now = Instant::now();
        assert!(registry.reclaimable(now, Duration::from_secs(5)).is_empty());
        assert_eq!(
            registry.reclaimable(now + Duration::from_secs(5), Duration::from_secs(5)),
            vec![(token, Reclaim::Consumed)]
        );
    }

    #[tokio::test]
    async fn test_exhausted_range_never_collides() {
        let (registry, _dir) = registry("4000-4003", Duration::from_secs(60)).await;

        let mut issued = HashSet::new();
        for _ in 0..4 {
            let token = registry.create(BlobRef::generate(), meta()).unwrap();
            assert!(issued.insert(token), "token {token} issued twice");
        }

        assert_eq!(
            registry.create(BlobRef::generate(), meta()).unwrap_err(),
            RegistryError::CapacityExhausted
        );
        assert_eq!(registry.len(), 4);
    }

    #[tokio::test]
    async fn test_remove_frees_token_and_is_idempotent() {
        let (registry, _dir) = registry("4000-4000", Duration::from_secs(60)).await;
        let token = registry.create(BlobRef::generate(), meta()).unwrap();

        assert!(registry.remove(token).await.is_some());
        assert!(registry.remove(token).await.is_none());
        assert!(registry.is_empty());

        // single-slot range is usable again
        assert_eq!(registry.create(BlobRef::generate(), meta()).unwrap(), token);
    }

    #[tokio::test]
    async fn test_release_ignores_reissued_token() {
        let (registry, _dir) = registry("4000-4000", Duration::from_secs(60)).await;
        let old_blob = BlobRef::generate();
        let token = registry.create(old_blob.clone(), meta()).unwrap();
        registry.remove(token).await;

        let new_blob = BlobRef::generate();
        assert_eq!(registry.create(new_blob.clone(), meta()).unwrap(), token);

        assert!(registry.release(token, &old_blob).await.is_none());
        assert_eq!(registry.resolve(token).unwrap().blob(), &new_blob);

        assert!(registry.release(token, &new_blob).await.is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reclaim_rechecks_under_lock() {
        let (registry, _dir) = registry("4000-4000", Duration::from_secs(60)).await;
        let token = registry.create(BlobRef::generate(), meta()).unwrap();

        // Pending and inside its TTL
        assert!(registry
            .reclaim(token, Instant::now(), Duration::ZERO)
            .await
            .is_none());
        assert_eq!(registry.len(), 1);

        registry.consume(token).unwrap();
        let (session, reason) = registry
            .reclaim(token, Instant::now(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(session.token(), token);
        assert_eq!(reason, Reclaim::Consumed);
        assert!(registry.is_empty());
    }
}
