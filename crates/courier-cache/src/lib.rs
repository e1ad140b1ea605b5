// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cache budget accounting and tiered eviction.
//!
//! Tracks total stored payload bytes against a configurable budget.
//! Admission (`can_accept`) runs check → evict → recheck under one async
//! mutex, so a concurrent admission cannot slip between the check and the
//! eviction it triggers.
//!
//! Eviction tiers, in order, stopping once usage falls to the target:
//! 1. everything in `expired`;
//! 2. `low`-priority bundles oldest-first, sparing `outbox`;
//! 3. `normal`-priority bundles oldest-first, sparing `outbox` and `pending`.
//!
//! `emergency` and `perishable` bundles are never evicted; when the budget
//! cannot be met without them, admission is refused.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use courier_model::{Bundle, Priority, QueueName};
use courier_store::{QueueStore, StoreError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Stable refusal string for callers and tests.
pub const BUDGET_EXCEEDED: &str = "Cache budget exceeded";

/// How many candidates each eviction tier examines per pass.
const EVICTION_SCAN_LIMIT: usize = 1000;

/// What an eviction pass removed.
#[derive(Debug, Default)]
pub struct EvictionReport {
    /// The deleted bundles, in deletion order (for `deleted` receipts).
    pub evicted: Vec<Bundle>,
    /// Bytes reclaimed.
    pub bytes_freed: u64,
}

impl EvictionReport {
    /// Number of bundles removed.
    #[must_use]
    pub fn count(&self) -> usize {
        self.evicted.len()
    }
}

/// Outcome of an admission check.
#[derive(Debug)]
pub struct Admission {
    /// Whether the bundle may be stored.
    pub accepted: bool,
    /// Whatever eviction the check performed to make room.
    pub report: EvictionReport,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Stored payload bytes right now.
    pub current_size_bytes: u64,
    /// Configured budget in bytes.
    pub budget_bytes: u64,
    /// Usage as a percentage of the budget, rounded to two decimals.
    pub usage_percentage: f64,
    /// Whether usage has reached the budget.
    pub is_over_budget: bool,
    /// Whether usage has reached the warn threshold.
    pub is_near_budget: bool,
    /// Bundles per queue.
    pub queue_counts: BTreeMap<String, u64>,
}

/// The cache budget accountant.
pub struct CacheBudget {
    store: Arc<QueueStore>,
    budget_bytes: u64,
    warn_threshold: f64,
    evict_threshold: f64,
    evict_target: f64,
    // Serializes the check–evict–admit sequence.
    lock: Mutex<()>,
}

impl std::fmt::Debug for CacheBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBudget")
            .field("budget_bytes", &self.budget_bytes)
            .finish_non_exhaustive()
    }
}

impl CacheBudget {
    /// Build the accountant with the 95%/95%/90% default thresholds.
    #[must_use]
    pub fn new(store: Arc<QueueStore>, budget_bytes: u64) -> Self {
        Self::with_thresholds(store, budget_bytes, 0.95, 0.95, 0.90)
    }

    /// Build the accountant with explicit thresholds.
    #[must_use]
    pub fn with_thresholds(
        store: Arc<QueueStore>,
        budget_bytes: u64,
        warn_threshold: f64,
        evict_threshold: f64,
        evict_target: f64,
    ) -> Self {
        Self {
            store,
            budget_bytes,
            warn_threshold,
            evict_threshold,
            evict_target,
            lock: Mutex::new(()),
        }
    }

    /// Stored payload bytes right now.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn current_size(&self) -> Result<u64, StoreError> {
        self.store.total_stored_size().await
    }

    /// May a bundle of `size_bytes` be stored? Evicts to make room if
    /// needed; the whole sequence holds the admission lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn can_accept(&self, size_bytes: u64) -> Result<Admission, StoreError> {
        let _guard = self.lock.lock().await;

        let current = self.store.total_stored_size().await?;
        self.maybe_warn(current);
        if current + size_bytes <= self.budget_bytes {
            return Ok(Admission {
                accepted: true,
                report: EvictionReport::default(),
            });
        }

        let report = self.evict_locked().await?;
        let current = self.store.total_stored_size().await?;
        let accepted = current + size_bytes <= self.budget_bytes;
        if !accepted {
            warn!(
                size_bytes,
                current, budget = self.budget_bytes, "admission refused: {BUDGET_EXCEEDED}"
            );
        }
        Ok(Admission { accepted, report })
    }

    /// Run an eviction pass if usage has reached the eviction threshold.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn enforce(&self) -> Result<EvictionReport, StoreError> {
        let _guard = self.lock.lock().await;
        let current = self.store.total_stored_size().await?;
        self.maybe_warn(current);
        if (current as f64) < self.evict_threshold * self.budget_bytes as f64 {
            return Ok(EvictionReport::default());
        }
        self.evict_locked().await
    }

    /// Point-in-time statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn stats(&self) -> Result<CacheStats, StoreError> {
        let current = self.store.total_stored_size().await?;
        let usage = current as f64 / self.budget_bytes as f64 * 100.0;
        let mut queue_counts = BTreeMap::new();
        for queue in QueueName::ALL {
            queue_counts.insert(queue.as_str().to_string(), self.store.count(queue).await?);
        }
        Ok(CacheStats {
            current_size_bytes: current,
            budget_bytes: self.budget_bytes,
            usage_percentage: (usage * 100.0).round() / 100.0,
            is_over_budget: current >= self.budget_bytes,
            is_near_budget: current as f64 >= self.warn_threshold * self.budget_bytes as f64,
            queue_counts,
        })
    }

    // Caller must hold `self.lock`.
    async fn evict_locked(&self) -> Result<EvictionReport, StoreError> {
        let before = self.store.total_stored_size().await?;
        let target = (self.evict_target * self.budget_bytes as f64) as u64;
        let mut report = EvictionReport::default();

        // Tier 1: expired bundles are pure audit weight.
        for bundle in self
            .store
            .list(QueueName::Expired, EVICTION_SCAN_LIMIT, 0)
            .await?
        {
            if self.delete_into(&bundle, &mut report).await? && self.reached(target).await? {
                return self.finish(before, report).await;
            }
        }

        // Tier 2: low priority, oldest first, sparing unsent local bundles.
        for (queue, bundle) in self
            .store
            .oldest_by_priority(Priority::Low, EVICTION_SCAN_LIMIT)
            .await?
        {
            if queue == QueueName::Outbox {
                continue;
            }
            if self.delete_into(&bundle, &mut report).await? && self.reached(target).await? {
                return self.finish(before, report).await;
            }
        }

        // Tier 3: normal priority, additionally sparing the forward queue.
        for (queue, bundle) in self
            .store
            .oldest_by_priority(Priority::Normal, EVICTION_SCAN_LIMIT)
            .await?
        {
            if queue == QueueName::Outbox || queue == QueueName::Pending {
                continue;
            }
            if self.delete_into(&bundle, &mut report).await? && self.reached(target).await? {
                return self.finish(before, report).await;
            }
        }

        self.finish(before, report).await
    }

    async fn delete_into(
        &self,
        bundle: &Bundle,
        report: &mut EvictionReport,
    ) -> Result<bool, StoreError> {
        let deleted = self.store.delete(&bundle.bundle_id).await?;
        if deleted {
            report.evicted.push(bundle.clone());
        }
        Ok(deleted)
    }

    async fn reached(&self, target: u64) -> Result<bool, StoreError> {
        Ok(self.store.total_stored_size().await? <= target)
    }

    async fn finish(
        &self,
        before: u64,
        mut report: EvictionReport,
    ) -> Result<EvictionReport, StoreError> {
        let after = self.store.total_stored_size().await?;
        report.bytes_freed = before.saturating_sub(after);
        if !report.evicted.is_empty() {
            info!(
                evicted = report.evicted.len(),
                bytes_freed = report.bytes_freed,
                "cache budget enforced"
            );
        }
        Ok(report)
    }

    fn maybe_warn(&self, current: u64) {
        if current as f64 >= self.warn_threshold * self.budget_bytes as f64 {
            warn!(
                current,
                budget = self.budget_bytes,
                "cache usage at or above warn threshold"
            );
        }
    }
}
