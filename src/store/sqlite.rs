//! Single-file persistent stores.
//!
//! Each logical store (intents, coordination, stigmergy) is one database
//! file opened with write-ahead logging, so multiple reader processes
//! stay concurrent with the short-held writer. The three files are kept
//! distinct to avoid cross-subsystem lock contention.
//!
//! Rows carry the canonical JSON encoding of their entity plus the
//! columns queries filter on. A corrupt row is skipped with a warning;
//! the store remains available.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode};
use std::path::Path;

use crate::error::ConvergentError;
use crate::events::CoordinationEvent;
use crate::phi::OutcomeRecord;
use crate::types::consensus::{ConsensusRequest, Decision, RequestId, Vote};
use crate::types::intent::{AgentId, Evidence, Intent, IntentId};
use crate::types::marker::{MarkerId, StigmergyMarker};
use crate::versioning::{Snapshot, SnapshotId};

use super::{AppendOutcome, CoordinationStore, IntentStore, StigmergyStore};

/// Fixed-width ISO-8601 UTC encoding, so string comparison is time
/// comparison.
pub(crate) fn to_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Open a database file with the engine's standard pragmas.
pub(crate) fn open_database(path: &Path) -> Result<Connection, ConvergentError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConvergentError::backend(format!("create db dir: {e}")))?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

fn decode_row<T: serde::de::DeserializeOwned>(context: &str, body: &str) -> Option<T> {
    match serde_json::from_str(body) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(context, error = %e, "skipping corrupt persisted record");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Intent store
// ─────────────────────────────────────────────────────────────────────────────

const INTENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS intents (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    intent_id TEXT NOT NULL UNIQUE,
    agent_id TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_intents_agent ON intents(agent_id);

CREATE TABLE IF NOT EXISTS interfaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    intent_id TEXT NOT NULL REFERENCES intents(intent_id),
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_interfaces_name ON interfaces(name, kind);

CREATE TABLE IF NOT EXISTS evidence (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    intent_id TEXT NOT NULL REFERENCES intents(intent_id),
    recorded_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_evidence_intent ON evidence(intent_id);

CREATE TABLE IF NOT EXISTS snapshots (
    snapshot_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    name TEXT PRIMARY KEY,
    snapshot_id TEXT NOT NULL REFERENCES snapshots(snapshot_id),
    updated_at TEXT NOT NULL
);
"#;

/// Persistent intent store.
pub struct SqliteIntentStore {
    conn: Mutex<Connection>,
}

impl SqliteIntentStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConvergentError> {
        let conn = open_database(path.as_ref())?;
        conn.execute_batch(INTENT_SCHEMA)?;
        tracing::info!(path = %path.as_ref().display(), "intent store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_intent(conn: &Connection, id: &IntentId) -> Result<Option<Intent>, ConvergentError> {
        let row: Option<String> = conn
            .query_row(
                "SELECT body FROM intents WHERE intent_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        let Some(body) = row else { return Ok(None) };
        let Some(mut intent) = decode_row::<Intent>("intent", &body) else {
            return Ok(None);
        };

        // Evidence lives in its own append-only table.
        let mut stmt =
            conn.prepare("SELECT body FROM evidence WHERE intent_id = ?1 ORDER BY id")?;
        let evidence: Vec<String> = stmt
            .query_map([id.as_str()], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        intent.evidence = evidence
            .iter()
            .filter_map(|b| decode_row::<Evidence>("evidence", b))
            .collect();
        Ok(Some(intent))
    }

    fn ordered_ids(conn: &Connection, filter_agent: Option<&AgentId>) -> Result<Vec<IntentId>, ConvergentError> {
        let mut out = Vec::new();
        match filter_agent {
            Some(agent) => {
                let mut stmt = conn
                    .prepare("SELECT intent_id FROM intents WHERE agent_id = ?1 ORDER BY seq")?;
                let ids: Vec<String> = stmt
                    .query_map([agent.as_str()], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                out.extend(ids.into_iter().map(IntentId::new));
            }
            None => {
                let mut stmt = conn.prepare("SELECT intent_id FROM intents ORDER BY seq")?;
                let ids: Vec<String> = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                out.extend(ids.into_iter().map(IntentId::new));
            }
        }
        Ok(out)
    }
}

impl IntentStore for SqliteIntentStore {
    fn append(&self, intent: &Intent) -> Result<AppendOutcome, ConvergentError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, fingerprint FROM intents WHERE intent_id = ?1",
                [intent.intent_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        if let Some((seq, fingerprint)) = existing {
            if fingerprint == intent.content_fingerprint() {
                return Ok(AppendOutcome::Unchanged(seq as u64 - 1));
            }
            return Err(ConvergentError::DuplicateIntent {
                intent_id: intent.intent_id.clone(),
            });
        }

        // The body holds the immutable fields; evidence rows are appended
        // separately so the intent row is never rewritten.
        let mut stored = intent.clone();
        stored.evidence = Vec::new();
        let body = serde_json::to_string(&stored)
            .map_err(|e| ConvergentError::backend(format!("encode intent: {e}")))?;

        tx.execute(
            "INSERT INTO intents (intent_id, agent_id, fingerprint, created_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                intent.intent_id.as_str(),
                intent.agent_id.as_str(),
                intent.content_fingerprint(),
                to_timestamp(intent.created_at),
                body,
            ],
        )?;
        let seq = tx.last_insert_rowid() as u64 - 1;

        for spec in &intent.interfaces {
            tx.execute(
                "INSERT INTO interfaces (intent_id, name, kind, recorded_at, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    intent.intent_id.as_str(),
                    spec.name,
                    spec.kind.as_str(),
                    to_timestamp(intent.created_at),
                    serde_json::to_string(spec)
                        .map_err(|e| ConvergentError::backend(e.to_string()))?,
                ],
            )?;
        }
        for evidence in &intent.evidence {
            tx.execute(
                "INSERT INTO evidence (intent_id, recorded_at, body) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    intent.intent_id.as_str(),
                    to_timestamp(evidence.timestamp),
                    serde_json::to_string(evidence)
                        .map_err(|e| ConvergentError::backend(e.to_string()))?,
                ],
            )?;
        }

        tx.commit()?;
        Ok(AppendOutcome::Appended(seq))
    }

    fn get(&self, id: &IntentId) -> Result<Option<Intent>, ConvergentError> {
        let conn = self.conn.lock();
        Self::load_intent(&conn, id)
    }

    fn list_by_agent(&self, agent: &AgentId) -> Result<Vec<Intent>, ConvergentError> {
        let conn = self.conn.lock();
        let ids = Self::ordered_ids(&conn, Some(agent))?;
        ids.iter()
            .filter_map(|id| Self::load_intent(&conn, id).transpose())
            .collect()
    }

    fn all_ordered(&self) -> Result<Vec<Intent>, ConvergentError> {
        let conn = self.conn.lock();
        let ids = Self::ordered_ids(&conn, None)?;
        ids.iter()
            .filter_map(|id| Self::load_intent(&conn, id).transpose())
            .collect()
    }

    fn add_evidence(&self, id: &IntentId, evidence: &Evidence) -> Result<(), ConvergentError> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO evidence (intent_id, recorded_at, body)
             SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM intents WHERE intent_id = ?1)",
            rusqlite::params![
                id.as_str(),
                to_timestamp(evidence.timestamp),
                serde_json::to_string(evidence).map_err(|e| ConvergentError::backend(e.to_string()))?,
            ],
        )?;
        if inserted == 0 {
            return Err(ConvergentError::validation(format!(
                "cannot add evidence to unknown intent {id}"
            )));
        }
        Ok(())
    }

    fn intent_count(&self) -> Result<u64, ConvergentError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM intents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn put_snapshot(&self, snapshot: &Snapshot) -> Result<(), ConvergentError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO snapshots (snapshot_id, created_at, body) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                snapshot.snapshot_id.as_str(),
                to_timestamp(snapshot.created_at),
                serde_json::to_string(snapshot)
                    .map_err(|e| ConvergentError::backend(e.to_string()))?,
            ],
        )?;
        Ok(())
    }

    fn get_snapshot(&self, id: &SnapshotId) -> Result<Option<Snapshot>, ConvergentError> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM snapshots WHERE snapshot_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(body.and_then(|b| decode_row("snapshot", &b)))
    }

    fn set_branch(&self, name: &str, snapshot: &SnapshotId) -> Result<(), ConvergentError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO branches (name, snapshot_id, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET snapshot_id = ?2, updated_at = ?3",
            rusqlite::params![name, snapshot.as_str(), to_timestamp(Utc::now())],
        )?;
        Ok(())
    }

    fn get_branch(&self, name: &str) -> Result<Option<SnapshotId>, ConvergentError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT snapshot_id FROM branches WHERE name = ?1",
            [name],
            |row| row.get::<_, String>(0),
        )
        .map(|s| Some(SnapshotId::new(s)))
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    fn branches(&self) -> Result<Vec<(String, SnapshotId)>, ConvergentError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name, snapshot_id FROM branches ORDER BY name")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(n, s)| (n, SnapshotId::new(s)))
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordination store
// ─────────────────────────────────────────────────────────────────────────────

const COORDINATION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL,
    domain TEXT NOT NULL,
    approved INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outcomes_agent_domain ON outcomes(agent_id, domain);

CREATE TABLE IF NOT EXISTS requests (
    request_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS votes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL REFERENCES requests(request_id),
    agent_id TEXT NOT NULL,
    cast_at TEXT NOT NULL,
    body TEXT NOT NULL,
    UNIQUE(request_id, agent_id)
);

CREATE TABLE IF NOT EXISTS decisions (
    request_id TEXT PRIMARY KEY REFERENCES requests(request_id),
    decided_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS human_confirmations (
    request_id TEXT PRIMARY KEY,
    confirmed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    correlation_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_correlation ON events(correlation_id);
"#;

/// Persistent coordination store.
pub struct SqliteCoordinationStore {
    conn: Mutex<Connection>,
}

impl SqliteCoordinationStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConvergentError> {
        let conn = open_database(path.as_ref())?;
        conn.execute_batch(COORDINATION_SCHEMA)?;
        tracing::info!(path = %path.as_ref().display(), "coordination store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CoordinationStore for SqliteCoordinationStore {
    fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<(), ConvergentError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO outcomes (agent_id, domain, approved, recorded_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                outcome.agent_id.as_str(),
                outcome.domain,
                outcome.approved as i64,
                to_timestamp(outcome.recorded_at),
                serde_json::to_string(outcome)
                    .map_err(|e| ConvergentError::backend(e.to_string()))?,
            ],
        )?;
        Ok(())
    }

    fn outcomes_for(
        &self,
        agent: &AgentId,
        domain: &str,
    ) -> Result<Vec<OutcomeRecord>, ConvergentError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT body FROM outcomes WHERE agent_id = ?1 AND domain = ?2 ORDER BY id",
        )?;
        let bodies: Vec<String> = stmt
            .query_map([agent.as_str(), domain], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(bodies
            .iter()
            .filter_map(|b| decode_row("outcome", b))
            .collect())
    }

    fn put_request(&self, request: &ConsensusRequest) -> Result<(), ConvergentError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO requests (request_id, created_at, body) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                request.request_id.as_str(),
                to_timestamp(request.created_at),
                serde_json::to_string(request)
                    .map_err(|e| ConvergentError::backend(e.to_string()))?,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                ConvergentError::validation(format!(
                    "consensus request {} already exists",
                    request.request_id
                ))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    fn get_request(&self, id: &RequestId) -> Result<Option<ConsensusRequest>, ConvergentError> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM requests WHERE request_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(body.and_then(|b| decode_row("request", &b)))
    }

    fn put_vote(&self, vote: &Vote) -> Result<(), ConvergentError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO votes (request_id, agent_id, cast_at, body) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                vote.request_id.as_str(),
                vote.agent_id.as_str(),
                to_timestamp(vote.cast_at),
                serde_json::to_string(vote).map_err(|e| ConvergentError::backend(e.to_string()))?,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                ConvergentError::validation(format!(
                    "agent {} already voted on request {}",
                    vote.agent_id, vote.request_id
                ))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    fn votes_for(&self, id: &RequestId) -> Result<Vec<Vote>, ConvergentError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT body FROM votes WHERE request_id = ?1 ORDER BY id")?;
        let bodies: Vec<String> = stmt
            .query_map([id.as_str()], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(bodies.iter().filter_map(|b| decode_row("vote", b)).collect())
    }

    fn put_decision(&self, decision: &Decision) -> Result<(), ConvergentError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO decisions (request_id, decided_at, body) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                decision.request.request_id.as_str(),
                to_timestamp(decision.decided_at),
                serde_json::to_string(decision)
                    .map_err(|e| ConvergentError::backend(e.to_string()))?,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                ConvergentError::validation(format!(
                    "decision for request {} already sealed",
                    decision.request.request_id
                ))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    fn get_decision(&self, id: &RequestId) -> Result<Option<Decision>, ConvergentError> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM decisions WHERE request_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(body.and_then(|b| decode_row("decision", &b)))
    }

    fn decisions(&self) -> Result<Vec<Decision>, ConvergentError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT body FROM decisions ORDER BY decided_at, request_id")?;
        let bodies: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(bodies
            .iter()
            .filter_map(|b| decode_row("decision", b))
            .collect())
    }

    fn record_human_confirmation(&self, id: &RequestId) -> Result<(), ConvergentError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO human_confirmations (request_id, confirmed_at) VALUES (?1, ?2)",
            rusqlite::params![id.as_str(), to_timestamp(Utc::now())],
        )?;
        Ok(())
    }

    fn human_confirmed(&self, id: &RequestId) -> Result<bool, ConvergentError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM human_confirmations WHERE request_id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn append_event(&self, event: &CoordinationEvent) -> Result<u64, ConvergentError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (correlation_id, event_type, timestamp, body) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                event.correlation_id,
                event.event_type,
                to_timestamp(event.timestamp),
                serde_json::to_string(event).map_err(|e| ConvergentError::backend(e.to_string()))?,
            ],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    fn events_after(
        &self,
        after: u64,
        limit: usize,
    ) -> Result<Vec<(u64, CoordinationEvent)>, ConvergentError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT seq, body FROM events WHERE seq > ?1 ORDER BY seq LIMIT ?2")?;
        let rows: Vec<(i64, String)> = stmt
            .query_map(rusqlite::params![after as i64, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(seq, body)| decode_row("event", &body).map(|e| (seq as u64, e)))
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stigmergy store
// ─────────────────────────────────────────────────────────────────────────────

const STIGMERGY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS markers (
    marker_id TEXT PRIMARY KEY,
    target TEXT NOT NULL,
    marker_type TEXT NOT NULL,
    strength REAL NOT NULL,
    last_reinforced_at TEXT NOT NULL,
    expires_at TEXT,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_markers_target ON markers(target);
"#;

/// Persistent stigmergy store.
pub struct SqliteStigmergyStore {
    conn: Mutex<Connection>,
}

impl SqliteStigmergyStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConvergentError> {
        let conn = open_database(path.as_ref())?;
        conn.execute_batch(STIGMERGY_SCHEMA)?;
        tracing::info!(path = %path.as_ref().display(), "stigmergy store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn write_marker(conn: &Connection, marker: &StigmergyMarker) -> Result<(), ConvergentError> {
        conn.execute(
            "INSERT INTO markers (marker_id, target, marker_type, strength, last_reinforced_at, expires_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(marker_id) DO UPDATE SET
                 strength = ?4, last_reinforced_at = ?5, expires_at = ?6, body = ?7",
            rusqlite::params![
                marker.marker_id.as_str(),
                marker.target,
                marker.marker_type.to_string(),
                marker.strength,
                to_timestamp(marker.last_reinforced_at),
                marker.expires_at.map(to_timestamp),
                serde_json::to_string(marker).map_err(|e| ConvergentError::backend(e.to_string()))?,
            ],
        )?;
        Ok(())
    }
}

impl StigmergyStore for SqliteStigmergyStore {
    fn put_marker(&self, marker: &StigmergyMarker) -> Result<(), ConvergentError> {
        let conn = self.conn.lock();
        Self::write_marker(&conn, marker)
    }

    fn get_marker(&self, id: &MarkerId) -> Result<Option<StigmergyMarker>, ConvergentError> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM markers WHERE marker_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(body.and_then(|b| decode_row("marker", &b)))
    }

    fn update_marker(&self, marker: &StigmergyMarker) -> Result<(), ConvergentError> {
        let conn = self.conn.lock();
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM markers WHERE marker_id = ?1",
            [marker.marker_id.as_str()],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(ConvergentError::validation(format!(
                "cannot update unknown marker {}",
                marker.marker_id
            )));
        }
        Self::write_marker(&conn, marker)
    }

    fn remove_marker(&self, id: &MarkerId) -> Result<(), ConvergentError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM markers WHERE marker_id = ?1", [id.as_str()])?;
        Ok(())
    }

    fn all_markers(&self) -> Result<Vec<StigmergyMarker>, ConvergentError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT body FROM markers ORDER BY marker_id")?;
        let bodies: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(bodies
            .iter()
            .filter_map(|b| decode_row("marker", b))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::intent::{EvidenceKind, IntentBuilder, IntentCategory, InterfaceKind, InterfaceSpec};
    use crate::types::marker::MarkerType;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn make_intent(id: &str) -> Intent {
        IntentBuilder::new(id, "agent-a", "build auth", IntentCategory::Interface, t0())
            .interface(InterfaceSpec::new("AuthService", InterfaceKind::Class, vec!["auth".into()]))
            .evidence(Evidence::new(EvidenceKind::Committed, 0.0, t0(), "commit abc"))
            .build()
    }

    #[test]
    fn test_intent_round_trip_byte_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteIntentStore::open(dir.path().join("intents.db")).unwrap();
        let intent = make_intent("i-1");
        store.append(&intent).unwrap();

        let back = store.get(&intent.intent_id).unwrap().unwrap();
        assert_eq!(
            serde_json::to_string(&back).unwrap(),
            serde_json::to_string(&intent).unwrap()
        );
    }

    #[test]
    fn test_idempotent_append_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.db");
        let intent = make_intent("i-1");
        {
            let store = SqliteIntentStore::open(&path).unwrap();
            assert_eq!(store.append(&intent).unwrap(), AppendOutcome::Appended(0));
        }
        let store = SqliteIntentStore::open(&path).unwrap();
        assert_eq!(store.append(&intent).unwrap(), AppendOutcome::Unchanged(0));

        let mut differing = intent.clone();
        differing.description = "something else".to_string();
        assert!(store.append(&differing).is_err());
    }

    #[test]
    fn test_evidence_appended_separately() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteIntentStore::open(dir.path().join("intents.db")).unwrap();
        let intent = make_intent("i-1");
        store.append(&intent).unwrap();
        store
            .add_evidence(
                &intent.intent_id,
                &Evidence::new(EvidenceKind::Tested, 0.0, t0(), "ci run 42"),
            )
            .unwrap();
        let back = store.get(&intent.intent_id).unwrap().unwrap();
        assert_eq!(back.evidence.len(), 2);
    }

    #[test]
    fn test_snapshots_and_branches() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteIntentStore::open(dir.path().join("intents.db")).unwrap();
        let snapshot = Snapshot::compute(vec![], vec![IntentId::new("i-1")], t0());
        store.put_snapshot(&snapshot).unwrap();
        store.set_branch("main", &snapshot.snapshot_id).unwrap();

        assert_eq!(
            store.get_branch("main").unwrap(),
            Some(snapshot.snapshot_id.clone())
        );
        let loaded = store.get_snapshot(&snapshot.snapshot_id).unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_vote_uniqueness_enforced_by_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCoordinationStore::open(dir.path().join("coordination.db")).unwrap();
        let request = ConsensusRequest {
            request_id: RequestId::new("r-1"),
            task_id: "t".into(),
            question: "q".into(),
            context: serde_json::json!({}),
            quorum: crate::types::QuorumLevel::Majority,
            timeout_seconds: 300,
            artifacts: vec![],
            created_at: t0(),
        };
        store.put_request(&request).unwrap();
        assert!(store.put_request(&request).is_err());

        let vote = Vote::new(
            RequestId::new("r-1"),
            AgentId::new("a"),
            crate::types::VoteChoice::Approve,
            0.9,
            "",
            t0(),
        )
        .unwrap();
        store.put_vote(&vote).unwrap();
        assert!(store.put_vote(&vote).is_err());
        assert_eq!(store.votes_for(&request.request_id).unwrap().len(), 1);
    }

    #[test]
    fn test_marker_update_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStigmergyStore::open(dir.path().join("stigmergy.db")).unwrap();
        let mut marker = StigmergyMarker::new(
            AgentId::new("a"),
            MarkerType::KnownIssue,
            "src/lib.rs",
            "flaky",
            1.0,
            t0(),
        );
        store.put_marker(&marker).unwrap();

        marker.strength = 0.5;
        store.update_marker(&marker).unwrap();
        let back = store.get_marker(&marker.marker_id).unwrap().unwrap();
        assert_eq!(back.strength, 0.5);

        store.remove_marker(&marker.marker_id).unwrap();
        assert!(store.get_marker(&marker.marker_id).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_row_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordination.db");
        let store = SqliteCoordinationStore::open(&path).unwrap();
        store
            .append_event(&CoordinationEvent::new("ok", "fine", t0()))
            .unwrap();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO events (correlation_id, event_type, timestamp, body) VALUES ('x', 'bad', '2025', 'not json')",
                [],
            )
            .unwrap();
        }
        let events = store.events_after(0, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.event_type, "ok");
    }
}
