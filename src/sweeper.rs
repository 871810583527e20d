//! Background reclamation of expired sessions and leaked blobs.

use crate::registry::{Reclaim, SessionRegistry};
use crate::server::{AppState, StorageHealth};
use crate::store::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default time a consumed session may linger before forced removal
pub const DEFAULT_CONSUMED_GRACE: Duration = Duration::from_secs(5 * 60);

/// What one sweep removed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub consumed: usize,
    pub orphans: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.consumed == 0 && self.orphans == 0
    }
}

pub struct Sweeper {
    registry: SessionRegistry,
    store: Arc<dyn BlobStore>,
    health: StorageHealth,
    interval: Duration,
    consumed_grace: Duration,
    orphan_grace: Duration,
}

impl Sweeper {
    /// Orphaned blobs must be at least one TTL old before they are collected,
    /// so an upload still being written is never touched.
    pub fn new(
        registry: SessionRegistry,
        store: Arc<dyn BlobStore>,
        health: StorageHealth,
        interval: Duration,
    ) -> Self {
        let orphan_grace = registry.ttl();
        Self {
            registry,
            store,
            health,
            interval,
            consumed_grace: DEFAULT_CONSUMED_GRACE,
            orphan_grace,
        }
    }

    pub fn from_state(state: &AppState, interval: Duration) -> Self {
        Self::new(
            state.registry.clone(),
            state.store.clone(),
            state.health.clone(),
            interval,
        )
    }

    pub fn with_consumed_grace(mut self, grace: Duration) -> Self {
        self.consumed_grace = grace;
        self
    }

    pub fn with_orphan_grace(mut self, grace: Duration) -> Self {
        self.orphan_grace = grace;
        self
    }

    /// One reclamation pass. Safe to run alongside request handlers.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let now = Instant::now();
        for (token, _) in self.registry.reclaimable(now, self.consumed_grace) {
            // None: a download removed it first, or the token was reissued
            let Some((session, reason)) = self
                .registry
                .reclaim(token, now, self.consumed_grace)
                .await
            else {
                continue;
            };
            match reason {
                Reclaim::Expired => report.expired += 1,
                Reclaim::Consumed => report.consumed += 1,
            }
            tracing::debug!(
                token = %session.token(),
                blob = %session.blob(),
                ?reason,
                "session reclaimed"
            );
        }

        report.orphans = self.collect_orphans().await;

        if self.health.is_degraded() {
            match self.store.probe().await {
                Ok(()) => {
                    self.health.mark_healthy();
                    tracing::info!("storage recovered, accepting uploads again");
                }
                Err(e) => tracing::warn!(error = %e, "storage still unavailable"),
            }
        }

        report
    }

    async fn collect_orphans(&self) -> usize {
        let entries = match self.store.list().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list blobs");
                return 0;
            }
        };

        // Taken after listing, so a session registered meanwhile is still seen
        let live = self.registry.live_blobs();
        let mut removed = 0;

        for entry in entries {
            if live.contains(&entry.blob) || entry.age < self.orphan_grace {
                continue;
            }
            match self.store.delete(&entry.blob).await {
                Ok(true) => {
                    tracing::info!(blob = %entry.blob, age_secs = entry.age.as_secs(), "orphaned blob removed");
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(blob = %entry.blob, error = %e, "failed to remove orphaned blob"),
            }
        }

        removed
    }

    /// Sweep every `interval` until `shutdown` flips to true or its sender drops.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let report = self.sweep_once().await;
                        if !report.is_empty() {
                            tracing::info!(
                                expired = report.expired,
                                consumed = report.consumed,
                                orphans = report.orphans,
                                "sweep reclaimed resources"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("sweeper stopped");
        })
    }
}
