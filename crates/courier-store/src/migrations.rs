// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ordered, idempotent schema migrations.
//!
//! Each step runs at most once; application is recorded in the
//! `schema_migrations` ledger table inside the same transaction as the
//! step itself.

use rusqlite::Connection;

pub(crate) struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_create_bundles",
        sql: "
            CREATE TABLE bundles (
                bundleId        TEXT PRIMARY KEY,
                queue           TEXT NOT NULL,
                createdAt       TEXT NOT NULL,
                expiresAt       TEXT NOT NULL,
                priority        TEXT NOT NULL,
                audience        TEXT NOT NULL,
                topic           TEXT NOT NULL,
                tags            TEXT NOT NULL,
                payloadType     TEXT NOT NULL,
                payload         TEXT NOT NULL,
                hopLimit        INTEGER NOT NULL,
                hopCount        INTEGER NOT NULL DEFAULT 0,
                receiptPolicy   TEXT NOT NULL,
                signature       TEXT NOT NULL,
                authorPublicKey TEXT NOT NULL,
                sizeBytes       INTEGER NOT NULL,
                addedToQueueAt  TEXT NOT NULL
            );
            CREATE INDEX idx_bundles_queue ON bundles(queue);
            CREATE INDEX idx_bundles_priority ON bundles(priority);
            CREATE INDEX idx_bundles_expires ON bundles(expiresAt);
        ",
    },
    Migration {
        name: "0002_queue_priority_created_index",
        sql: "
            CREATE INDEX idx_bundles_queue_priority_created
                ON bundles(queue, priority, createdAt);
        ",
    },
    Migration {
        name: "0003_quarantine_reason",
        sql: "
            ALTER TABLE bundles ADD COLUMN quarantineReason TEXT;
        ",
    },
];

/// Apply every unapplied migration in order. Returns how many ran.
pub(crate) fn apply(conn: &mut Connection) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name       TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let mut applied = 0usize;
    for migration in MIGRATIONS {
        let already: bool = conn
            .prepare("SELECT 1 FROM schema_migrations WHERE name = ?1")?
            .exists([migration.name])?;
        if already {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
            [migration.name],
        )?;
        tx.commit()?;
        tracing::info!(migration = migration.name, "applied schema migration");
        applied += 1;
    }
    Ok(applied)
}
