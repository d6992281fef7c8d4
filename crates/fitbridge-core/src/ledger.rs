//! Durable record of activities already handed to the destination.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to prepare ledger location {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("ledger entry '{activity_id}' has unreadable timestamp '{value}'")]
    CorruptTimestamp { activity_id: String, value: String },
}

/// One delivered activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub activity_id: String,
    pub delivered_at: DateTime<Utc>,
}

/// Insert-if-absent set of activity identifiers backed by SQLite.
///
/// The connection lives exactly as long as the value.
#[derive(Debug)]
pub struct DeliveryLedger {
    conn: Connection,
}

impl DeliveryLedger {
    /// Open (creating if needed) the ledger at `path`.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened delivery ledger");
        Self::bootstrap(conn)
    }

    pub fn in_memory() -> Result<Self, LedgerError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS delivered_activities (
                activity_id TEXT PRIMARY KEY,
                delivered_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self { conn })
    }

    pub fn is_delivered(&self, activity_id: &str) -> Result<bool, LedgerError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM delivered_activities WHERE activity_id = ?1",
                params![activity_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record `activity_id` as delivered at `at`.
    ///
    /// Returns `false` when the id was already present; the existing
    /// timestamp is left as it was.
    pub fn mark_delivered(
        &mut self,
        activity_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let tx = self.conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO delivered_activities (activity_id, delivered_at) VALUES (?1, ?2)",
            params![activity_id, at.to_rfc3339_opts(SecondsFormat::Secs, true)],
        )?;
        tx.commit()?;

        debug!(activity_id, inserted = inserted > 0, "ledger commit");
        Ok(inserted > 0)
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT activity_id, delivered_at FROM delivered_activities ORDER BY rowid ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(activity_id, value)| {
                match DateTime::parse_from_rfc3339(&value) {
                    Ok(ts) => Ok(LedgerEntry {
                        activity_id,
                        delivered_at: ts.with_timezone(&Utc),
                    }),
                    Err(_) => Err(LedgerError::CorruptTimestamp { activity_id, value }),
                }
            })
            .collect()
    }
}
