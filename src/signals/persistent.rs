//! Persistent signal bus on a single-file database.
//!
//! Shared across processes through the file; opened with write-ahead
//! logging so readers stay concurrent with the (short-held) writer.
//! Consumer positions are tracked per subscriber in an in-place-updated
//! cursor table; everything else is append-only.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

use crate::error::ConvergentError;
use crate::store::sqlite::{open_database, to_timestamp};
use crate::types::intent::AgentId;
use crate::types::signal::Signal;

use super::SignalBus;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signals (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id TEXT NOT NULL UNIQUE,
    signal_type TEXT NOT NULL,
    target_agent TEXT,
    timestamp TEXT NOT NULL,
    expires_at TEXT,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signals_type ON signals(signal_type);

CREATE TABLE IF NOT EXISTS consumer_cursors (
    consumer TEXT PRIMARY KEY,
    last_seq INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Database-backed signal bus, durable across restart.
pub struct PersistentSignalBus {
    conn: Mutex<Connection>,
}

impl PersistentSignalBus {
    /// Open (creating if needed) a bus at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConvergentError> {
        let conn = open_database(path.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SignalBus for PersistentSignalBus {
    fn publish(&self, signal: &Signal) -> Result<(), ConvergentError> {
        let body = serde_json::to_string(signal)
            .map_err(|e| ConvergentError::backend(format!("encode signal: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO signals (signal_id, signal_type, target_agent, timestamp, expires_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                signal.signal_id,
                signal.signal_type,
                signal.target_agent.as_ref().map(|a| a.as_str()),
                to_timestamp(signal.timestamp),
                signal.expires_at.map(to_timestamp),
                body,
            ],
        )?;
        Ok(())
    }

    fn poll(&self, consumer: &AgentId) -> Result<Vec<Signal>, ConvergentError> {
        let conn = self.conn.lock();
        let cursor: i64 = conn
            .query_row(
                "SELECT last_seq FROM consumer_cursors WHERE consumer = ?1",
                [consumer.as_str()],
                |row| row.get(0),
            )
            .unwrap_or(0);

        let mut stmt = conn.prepare(
            "SELECT seq, body FROM signals WHERE seq > ?1 ORDER BY seq",
        )?;
        let rows: Vec<(i64, String)> = stmt
            .query_map([cursor], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        let mut delivered = Vec::new();
        let mut last_seq = cursor;
        for (seq, body) in rows {
            last_seq = seq;
            match serde_json::from_str::<Signal>(&body) {
                Ok(signal) => {
                    if signal.addressed_to(consumer) {
                        delivered.push(signal);
                    }
                }
                Err(e) => {
                    tracing::warn!(seq, error = %e, "skipping corrupt signal row");
                }
            }
        }

        if last_seq != cursor {
            conn.execute(
                "INSERT INTO consumer_cursors (consumer, last_seq, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(consumer) DO UPDATE SET last_seq = ?2, updated_at = ?3",
                rusqlite::params![consumer.as_str(), last_seq, to_timestamp(Utc::now())],
            )?;
        }

        delivered.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.signal_id.cmp(&b.signal_id))
        });
        Ok(delivered)
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, ConvergentError> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM signals WHERE expires_at IS NOT NULL AND expires_at < ?1",
            [to_timestamp(now)],
        )?;
        Ok(removed)
    }
}
