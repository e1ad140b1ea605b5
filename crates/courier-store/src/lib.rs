// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable bundle queue store on SQLite.
//!
//! One row per bundle, keyed by `bundleId`; the queue is a mutable column
//! on the row. Insertion is conditional at the database level
//! (`INSERT OR IGNORE` against the primary key), so two concurrent
//! receivers of the same bundle produce exactly one record — there is no
//! check-then-insert window. All access goes through one connection behind
//! an async mutex; every durability unit is a single statement or a single
//! transaction.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod migrations;

use chrono::{DateTime, Utc};
use courier_model::{
    Audience, Bundle, Priority, QueueName, ReceiptPolicy, now_utc, parse_timestamp,
};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

/// Errors surfaced by the queue store. Persistence failures propagate to
/// the caller; the store never leaves partial state behind.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying database operation failed.
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A payload or tag list could not be (de)serialized.
    #[error("storage encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored row no longer parses as a bundle.
    #[error("corrupt bundle row {bundle_id}: {reason}")]
    Corrupt {
        /// Primary key of the offending row.
        bundle_id: String,
        /// What failed to parse.
        reason: String,
    },
}

/// Column list used by every SELECT, in fixed order.
const COLUMNS: &str = "bundleId, queue, createdAt, expiresAt, priority, audience, topic, \
     tags, payloadType, payload, hopLimit, hopCount, receiptPolicy, signature, \
     authorPublicKey, sizeBytes, addedToQueueAt";

/// Priority ordering clause: emergency first, ties broken oldest-first.
const PRIORITY_ORDER: &str = "CASE priority \
        WHEN 'emergency' THEN 1 \
        WHEN 'perishable' THEN 2 \
        WHEN 'normal' THEN 3 \
        WHEN 'low' THEN 4 \
     END, createdAt ASC";

/// Raw row image; parsed into a [`Bundle`] outside the rusqlite closure.
struct RawRow {
    bundle_id: String,
    queue: String,
    created_at: String,
    expires_at: String,
    priority: String,
    audience: String,
    topic: String,
    tags: String,
    payload_type: String,
    payload: String,
    hop_limit: i64,
    hop_count: i64,
    receipt_policy: String,
    signature: String,
    author_public_key: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            bundle_id: row.get(0)?,
            queue: row.get(1)?,
            created_at: row.get(2)?,
            expires_at: row.get(3)?,
            priority: row.get(4)?,
            audience: row.get(5)?,
            topic: row.get(6)?,
            tags: row.get(7)?,
            payload_type: row.get(8)?,
            payload: row.get(9)?,
            hop_limit: row.get(10)?,
            hop_count: row.get(11)?,
            receipt_policy: row.get(12)?,
            signature: row.get(13)?,
            author_public_key: row.get(14)?,
        })
    }

    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Corrupt {
            bundle_id: self.bundle_id.clone(),
            reason: reason.into(),
        }
    }

    fn into_entry(self) -> Result<(QueueName, Bundle), StoreError> {
        let queue = QueueName::parse(&self.queue)
            .ok_or_else(|| self.corrupt(format!("unknown queue '{}'", self.queue)))?;
        let priority = Priority::parse(&self.priority)
            .ok_or_else(|| self.corrupt(format!("unknown priority '{}'", self.priority)))?;
        let audience = Audience::parse(&self.audience)
            .ok_or_else(|| self.corrupt(format!("unknown audience '{}'", self.audience)))?;
        let receipt_policy = ReceiptPolicy::parse(&self.receipt_policy).ok_or_else(|| {
            self.corrupt(format!("unknown receipt policy '{}'", self.receipt_policy))
        })?;
        let created_at = parse_timestamp(&self.created_at)
            .map_err(|e| self.corrupt(format!("createdAt: {e}")))?;
        let expires_at = parse_timestamp(&self.expires_at)
            .map_err(|e| self.corrupt(format!("expiresAt: {e}")))?;
        let tags: Vec<String> =
            serde_json::from_str(&self.tags).map_err(|e| self.corrupt(format!("tags: {e}")))?;
        let payload: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&self.payload)
                .map_err(|e| self.corrupt(format!("payload: {e}")))?;

        let bundle = Bundle {
            audience,
            author_public_key: self.author_public_key,
            bundle_id: self.bundle_id,
            created_at,
            expires_at,
            hop_count: self.hop_count as u32,
            hop_limit: self.hop_limit as u32,
            payload,
            payload_type: self.payload_type,
            priority,
            receipt_policy,
            signature: self.signature,
            tags,
            topic: self.topic,
        };
        Ok((queue, bundle))
    }
}

/// The persisted `bundleId → (queue, bundle)` mapping.
pub struct QueueStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore").finish_non_exhaustive()
    }
}

impl QueueStore {
    /// Open (creating if necessary) the store at `path` and bring the
    /// schema up to date.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened or a
    /// migration fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a fresh in-memory store (tests and ephemeral nodes).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a migration fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::apply(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Conditionally insert `bundle` into `queue`.
    ///
    /// Returns `true` if the row was inserted, `false` if any record with
    /// that `bundleId` already exists — the existing record is never
    /// overwritten, in any queue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure; no partial state.
    pub async fn enqueue(&self, queue: QueueName, bundle: &Bundle) -> Result<bool, StoreError> {
        self.insert(queue, bundle, None).await
    }

    /// Insert `bundle` into `quarantine`, recording why it was rejected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn enqueue_quarantined(
        &self,
        bundle: &Bundle,
        reason: &str,
    ) -> Result<bool, StoreError> {
        self.insert(QueueName::Quarantine, bundle, Some(reason)).await
    }

    async fn insert(
        &self,
        queue: QueueName,
        bundle: &Bundle,
        quarantine_reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        let tags = serde_json::to_string(&bundle.tags)?;
        let payload = serde_json::to_string(&bundle.payload)?;
        let size_bytes = payload.len() as i64;
        let now = format_ts(&now_utc());

        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO bundles (
                bundleId, queue, createdAt, expiresAt, priority, audience, topic,
                tags, payloadType, payload, hopLimit, hopCount, receiptPolicy,
                signature, authorPublicKey, sizeBytes, addedToQueueAt, quarantineReason
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                bundle.bundle_id,
                queue.as_str(),
                format_ts(&bundle.created_at),
                format_ts(&bundle.expires_at),
                bundle.priority.as_str(),
                bundle.audience.as_str(),
                bundle.topic,
                tags,
                bundle.payload_type,
                payload,
                bundle.hop_limit as i64,
                bundle.hop_count as i64,
                bundle.receipt_policy.as_str(),
                bundle.signature,
                bundle.author_public_key,
                size_bytes,
                now,
                quarantine_reason,
            ],
        )?;
        if inserted == 0 {
            debug!(bundle_id = %bundle.bundle_id, queue = %queue, "enqueue skipped, bundle already stored");
        }
        Ok(inserted > 0)
    }

    /// Move a bundle between queues, conditional on its current queue.
    ///
    /// Returns `false` (without touching anything) when the bundle is not
    /// currently in `from`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn move_bundle(
        &self,
        bundle_id: &str,
        from: QueueName,
        to: QueueName,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE bundles SET queue = ?1, addedToQueueAt = ?2
             WHERE bundleId = ?3 AND queue = ?4",
            params![to.as_str(), format_ts(&now_utc()), bundle_id, from.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Delete a bundle outright. Returns `false` if it was not stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn delete(&self, bundle_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute("DELETE FROM bundles WHERE bundleId = ?1", [bundle_id])?;
        Ok(changed > 0)
    }

    /// Fetch a bundle by id, regardless of queue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure or a corrupt row.
    pub async fn get(&self, bundle_id: &str) -> Result<Option<Bundle>, StoreError> {
        Ok(self.get_entry(bundle_id).await?.map(|(_, bundle)| bundle))
    }

    /// Fetch a bundle together with the queue it currently sits in.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure or a corrupt row.
    pub async fn get_entry(
        &self,
        bundle_id: &str,
    ) -> Result<Option<(QueueName, Bundle)>, StoreError> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM bundles WHERE bundleId = ?1"),
                [bundle_id],
                RawRow::from_row,
            )
            .optional()?;
        drop(conn);
        raw.map(RawRow::into_entry).transpose()
    }

    /// The queue a bundle currently sits in, if stored at all.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure or a corrupt row.
    pub async fn queue_of(&self, bundle_id: &str) -> Result<Option<QueueName>, StoreError> {
        let conn = self.conn.lock().await;
        let queue: Option<String> = conn
            .query_row(
                "SELECT queue FROM bundles WHERE bundleId = ?1",
                [bundle_id],
                |row| row.get(0),
            )
            .optional()?;
        match queue {
            None => Ok(None),
            Some(raw) => QueueName::parse(&raw)
                .map(Some)
                .ok_or_else(|| StoreError::Corrupt {
                    bundle_id: bundle_id.to_string(),
                    reason: format!("unknown queue '{raw}'"),
                }),
        }
    }

    /// The recorded quarantine reason, if the bundle is quarantined.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn quarantine_reason(
        &self,
        bundle_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;
        let reason: Option<Option<String>> = conn
            .query_row(
                "SELECT quarantineReason FROM bundles WHERE bundleId = ?1 AND queue = 'quarantine'",
                [bundle_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(reason.flatten())
    }

    /// List a queue ordered by (priority rank, `createdAt` ascending).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure or a corrupt row.
    pub async fn list(
        &self,
        queue: QueueName,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Bundle>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM bundles WHERE queue = ?1
             ORDER BY {PRIORITY_ORDER} LIMIT ?2 OFFSET ?3"
        ))?;
        let raws = stmt
            .query_map(
                params![queue.as_str(), limit as i64, offset as i64],
                RawRow::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);
        raws.into_iter()
            .map(|raw| raw.into_entry().map(|(_, b)| b))
            .collect()
    }

    /// List one priority class of a queue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure or a corrupt row.
    pub async fn list_priority(
        &self,
        queue: QueueName,
        priority: Priority,
        limit: usize,
    ) -> Result<Vec<Bundle>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM bundles WHERE queue = ?1 AND priority = ?2
             ORDER BY createdAt ASC LIMIT ?3"
        ))?;
        let raws = stmt
            .query_map(
                params![queue.as_str(), priority.as_str(), limit as i64],
                RawRow::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);
        raws.into_iter()
            .map(|raw| raw.into_entry().map(|(_, b)| b))
            .collect()
    }

    /// Oldest bundles of one priority class across *all* queues, with their
    /// queues (the evictor's scan order).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure or a corrupt row.
    pub async fn oldest_by_priority(
        &self,
        priority: Priority,
        limit: usize,
    ) -> Result<Vec<(QueueName, Bundle)>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM bundles WHERE priority = ?1
             ORDER BY createdAt ASC LIMIT ?2"
        ))?;
        let raws = stmt
            .query_map(params![priority.as_str(), limit as i64], RawRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);
        raws.into_iter().map(RawRow::into_entry).collect()
    }

    /// Count the bundles in a queue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn count(&self, queue: QueueName) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bundles WHERE queue = ?1",
            [queue.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Whether a bundle exists in any queue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn exists(&self, bundle_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let found = conn
            .prepare("SELECT 1 FROM bundles WHERE bundleId = ?1 LIMIT 1")?
            .exists([bundle_id])?;
        Ok(found)
    }

    /// Whether a bundle exists in any of the given queues.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn exists_in(
        &self,
        bundle_id: &str,
        queues: &[QueueName],
    ) -> Result<bool, StoreError> {
        if queues.is_empty() {
            return Ok(false);
        }
        let placeholders = (2..=queues.len() + 1)
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT 1 FROM bundles WHERE bundleId = ?1 AND queue IN ({placeholders}) LIMIT 1"
        );
        let mut values: Vec<String> = vec![bundle_id.to_string()];
        values.extend(queues.iter().map(|q| q.as_str().to_string()));

        let conn = self.conn.lock().await;
        let found = conn.prepare(&sql)?.exists(params_from_iter(values))?;
        Ok(found)
    }

    /// Bundles past `now` in any live queue (everything except `expired`
    /// and `quarantine`), with their current queues.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure or a corrupt row.
    pub async fn expired_in_live_queues(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(QueueName, Bundle)>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM bundles
             WHERE expiresAt < ?1 AND queue NOT IN ('expired', 'quarantine')"
        ))?;
        let raws = stmt
            .query_map([format_ts(&now)], RawRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);
        raws.into_iter().map(RawRow::into_entry).collect()
    }

    /// Delete rows of `queue` whose `addedToQueueAt` is before `cutoff`
    /// (retention sweeps). Returns how many rows went away.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn purge_older_than(
        &self,
        queue: QueueName,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let purged = conn.execute(
            "DELETE FROM bundles WHERE queue = ?1 AND addedToQueueAt < ?2",
            params![queue.as_str(), format_ts(&cutoff)],
        )?;
        Ok(purged)
    }

    /// Sum of stored payload sizes across all queues, in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn total_stored_size(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let total: Option<i64> = conn.query_row(
            "SELECT SUM(sizeBytes) FROM bundles",
            [],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0) as u64)
    }

    /// Advance a bundle's hop count by one, bounded by its hop limit.
    /// Returns `false` if the bundle is missing or already at the limit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn increment_hop(&self, bundle_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE bundles SET hopCount = hopCount + 1
             WHERE bundleId = ?1 AND hopCount < hopLimit",
            [bundle_id],
        )?;
        Ok(changed > 0)
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(courier_model::CANONICAL_TIME_FORMAT).to_string()
}
