// SPDX-License-Identifier: MIT OR Apache-2.0
//! Background TTL aging and retention sweeps.
//!
//! Each tick moves every over-age bundle from the live queues into
//! `expired` (guarded by a current-queue check, so a concurrent move wins
//! cleanly), then deletes `expired` and `quarantine` rows past their
//! retention windows. Ticks re-read the clock every time and cache nothing
//! between runs, so clock jumps are absorbed at the next tick.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Duration as ChronoDuration;
use courier_model::{Bundle, QueueName, now_utc};
use courier_store::{QueueStore, StoreError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

/// Lifecycle transitions the engine reports to the composition layer
/// (which turns them into receipts where policy asks for them).
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A bundle aged out of a live queue into `expired`.
    Expired(Bundle),
}

/// What one sweep did.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Bundles moved into `expired` this tick.
    pub expired: Vec<Bundle>,
    /// `expired` rows deleted by retention.
    pub purged_expired: usize,
    /// `quarantine` rows deleted by retention.
    pub purged_quarantine: usize,
}

/// The TTL engine.
pub struct TtlEngine {
    store: Arc<QueueStore>,
    check_interval: std::time::Duration,
    expired_retention: ChronoDuration,
    quarantine_retention: ChronoDuration,
    events: Option<mpsc::Sender<LifecycleEvent>>,
}

impl std::fmt::Debug for TtlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlEngine")
            .field("check_interval", &self.check_interval)
            .finish_non_exhaustive()
    }
}

impl TtlEngine {
    /// Build the engine.
    #[must_use]
    pub fn new(
        store: Arc<QueueStore>,
        check_interval: std::time::Duration,
        expired_retention_days: i64,
        quarantine_retention_days: i64,
    ) -> Self {
        Self {
            store,
            check_interval,
            expired_retention: ChronoDuration::days(expired_retention_days),
            quarantine_retention: ChronoDuration::days(quarantine_retention_days),
            events: None,
        }
    }

    /// Attach a lifecycle event sink.
    #[must_use]
    pub fn with_events(mut self, events: mpsc::Sender<LifecycleEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// One sweep: age live bundles into `expired`, then run retention.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure. Partial progress is
    /// durable; each move is its own transaction.
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let now = now_utc();
        let mut report = SweepReport::default();

        for (queue, bundle) in self.store.expired_in_live_queues(now).await? {
            // Guarded by the current queue: if someone else moved or
            // deleted the bundle since the scan, this is a no-op.
            let moved = self
                .store
                .move_bundle(&bundle.bundle_id, queue, QueueName::Expired)
                .await?;
            if moved {
                report.expired.push(bundle);
            }
        }

        report.purged_expired = self
            .store
            .purge_older_than(QueueName::Expired, now - self.expired_retention)
            .await?;
        report.purged_quarantine = self
            .store
            .purge_older_than(QueueName::Quarantine, now - self.quarantine_retention)
            .await?;

        if !report.expired.is_empty() || report.purged_expired > 0 || report.purged_quarantine > 0 {
            info!(
                expired = report.expired.len(),
                purged_expired = report.purged_expired,
                purged_quarantine = report.purged_quarantine,
                "TTL sweep"
            );
        }
        Ok(report)
    }

    /// Run the sweep loop until `shutdown` flips to `true`.
    ///
    /// Sweep errors are logged and the loop keeps going; the next tick
    /// starts from fresh state.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval = ?self.check_interval, "TTL engine started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) => self.publish(report).await,
                        Err(e) => error!(error = %e, "TTL sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("TTL engine stopped");
                        return;
                    }
                }
            }
        }
    }

    async fn publish(&self, report: SweepReport) {
        let Some(events) = &self.events else {
            return;
        };
        for bundle in report.expired {
            // A full channel only costs receipts, never correctness.
            if events.send(LifecycleEvent::Expired(bundle)).await.is_err() {
                return;
            }
        }
    }
}
