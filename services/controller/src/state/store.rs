//! SQLite-based state store for the controller agent.
//!
//! This provides durable storage for controller state, enabling the agent
//! to pick up where it left off across invocations.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use slurmha_events::{EventKind, TriggerEnvelope};
use slurmha_names::UnitName;
use slurmha_reconcile::{ConfigDigest, ControllerState, UnitStatus};
use thiserror::Error;
use tracing::debug;

/// Errors from state store operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state: {0}")]
    Invalid(String),
}

/// Controller-level state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerRecord {
    /// State left by the last pass.
    pub state: ControllerState,
    /// Last reported status.
    pub status: Option<UnitStatus>,
    /// Last issued config-updated stamp (Unix seconds).
    pub change_stamp: Option<i64>,
    /// Digest of the last rendered config.
    pub rendered_digest: Option<ConfigDigest>,
    /// Whether one-time setup has run.
    pub setup_done: bool,
    /// Last update timestamp (Unix seconds).
    pub updated_at: i64,
}

/// SQLite state store.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open or create a state store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateStoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self { conn };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StateStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), StateStoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS controller_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                state TEXT NOT NULL DEFAULT 'unconfigured',
                status_json TEXT,
                change_stamp INTEGER,
                rendered_digest TEXT,
                setup_done INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0
            );

            INSERT OR IGNORE INTO controller_state (id) VALUES (1);

            CREATE TABLE IF NOT EXISTS pending_triggers (
                kind TEXT PRIMARY KEY,
                unit TEXT NOT NULL,
                received_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("State store schema initialized");
        Ok(())
    }

    /// Get controller state.
    pub fn get_controller_record(&self) -> Result<ControllerRecord, StateStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT state, status_json, change_stamp, rendered_digest, setup_done, updated_at
             FROM controller_state WHERE id = 1",
        )?;

        let (state, status_json, change_stamp, rendered_digest, setup_done, updated_at) = stmt
            .query_row([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?;

        let state = ControllerState::parse(&state)
            .ok_or_else(|| StateStoreError::Invalid(format!("unknown controller state '{state}'")))?;
        let status = status_json
            .map(|json| serde_json::from_str::<UnitStatus>(&json))
            .transpose()?;

        Ok(ControllerRecord {
            state,
            status,
            change_stamp,
            rendered_digest: rendered_digest.map(ConfigDigest::from_stored),
            setup_done,
            updated_at,
        })
    }

    /// Update lifecycle state.
    pub fn set_state(&self, state: ControllerState) -> Result<(), StateStoreError> {
        self.conn.execute(
            "UPDATE controller_state SET state = ?1, updated_at = ?2 WHERE id = 1",
            params![state.as_str(), Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Update reported status.
    pub fn set_status(&self, status: &UnitStatus) -> Result<(), StateStoreError> {
        let json = serde_json::to_string(status)?;
        self.conn.execute(
            "UPDATE controller_state SET status_json = ?1, updated_at = ?2 WHERE id = 1",
            params![json, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Update the config-updated stamp.
    pub fn set_change_stamp(&self, stamp: i64) -> Result<(), StateStoreError> {
        self.conn.execute(
            "UPDATE controller_state SET change_stamp = ?1 WHERE id = 1",
            params![stamp],
        )?;
        Ok(())
    }

    /// Record the digest of the config just rendered.
    pub fn set_rendered_digest(&self, digest: &ConfigDigest) -> Result<(), StateStoreError> {
        self.conn.execute(
            "UPDATE controller_state SET rendered_digest = ?1 WHERE id = 1",
            params![digest.as_str()],
        )?;
        Ok(())
    }

    /// Mark one-time setup as done.
    pub fn mark_setup_done(&self) -> Result<(), StateStoreError> {
        self.conn
            .execute("UPDATE controller_state SET setup_done = 1 WHERE id = 1", [])?;
        Ok(())
    }

    /// Record a trigger as pending. A repeated kind keeps its first receipt time.
    pub fn add_pending(&self, envelope: &TriggerEnvelope) -> Result<(), StateStoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO pending_triggers (kind, unit, received_at) VALUES (?1, ?2, ?3)",
            params![
                envelope.kind.as_str(),
                envelope.unit.to_string(),
                envelope.received_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List pending triggers, oldest first.
    pub fn pending(&self) -> Result<Vec<TriggerEnvelope>, StateStoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, unit, received_at FROM pending_triggers ORDER BY received_at")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(kind, unit, received_at)| {
                Ok(TriggerEnvelope {
                    kind: kind
                        .parse::<EventKind>()
                        .map_err(|e| StateStoreError::Invalid(e.to_string()))?,
                    unit: unit
                        .parse::<UnitName>()
                        .map_err(|e| StateStoreError::Invalid(e.to_string()))?,
                    received_at: DateTime::parse_from_rfc3339(&received_at)
                        .map_err(|e| StateStoreError::Invalid(e.to_string()))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }

    /// Drop all pending triggers.
    pub fn clear_pending(&self) -> Result<(), StateStoreError> {
        self.conn.execute("DELETE FROM pending_triggers", [])?;
        Ok(())
    }
}
