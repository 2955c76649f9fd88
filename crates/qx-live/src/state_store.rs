use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

use qx_types::portfolio::{Position, EngineStateSnapshot};

use crate::errors::StateStoreError;

/// The State Store (C10): crash-safe persistence of engine snapshots, backed
/// by SQLite. Schema and operations mirror `persistence/state_store.py`
/// one-to-one — named columns rather than an opaque blob, so a snapshot can
/// be partially inspected (e.g. `state`, `broker_name`) without deserializing
/// the whole row.
pub struct StateStore {
    conn: Mutex<Connection>,
}

fn snapshot_from_row(row: &Row) -> rusqlite::Result<EngineStateSnapshot> {
    let timestamp: String = row.get(0)?;
    let state: String = row.get(1)?;
    let strategy_name: String = row.get(2)?;
    let broker_name: String = row.get(3)?;
    let positions_json: String = row.get(4)?;
    let pending_orders_json: String = row.get(5)?;
    let statistics_json: String = row.get(6)?;

    let positions: HashMap<String, Position> = serde_json::from_str(&positions_json)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(err)))?;
    let pending_order_ids: HashSet<String> = serde_json::from_str(&pending_orders_json)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(err)))?;
    let statistics: HashMap<String, serde_json::Value> = serde_json::from_str(&statistics_json)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(err)))?;

    Ok(EngineStateSnapshot {
        timestamp: timestamp
            .parse::<DateTime<Utc>>()
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err)))?,
        state,
        strategy_name,
        broker_name,
        positions,
        pending_order_ids,
        statistics,
    })
}

const SNAPSHOT_COLUMNS: &str =
    "timestamp, state, strategy_name, broker_name, positions_json, pending_orders_json, statistics_json";

impl StateStore {
    pub fn open(path: &str) -> Result<Self, StateStoreError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self, StateStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<(), StateStoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS engine_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                state TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                broker_name TEXT NOT NULL,
                positions_json TEXT NOT NULL,
                pending_orders_json TEXT NOT NULL,
                statistics_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_engine_states_timestamp
                ON engine_states (timestamp DESC);
            CREATE TABLE IF NOT EXISTS crash_markers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                reason TEXT NOT NULL,
                recovered INTEGER NOT NULL DEFAULT 0,
                engine_state_id INTEGER,
                recovery_timestamp TEXT
            );",
        )?;
        Ok(())
    }

    /// Persist a snapshot, returning the inserted row's id so a caller can
    /// link a later crash marker back to the state it recovered from.
    pub fn save_state(&self, snapshot: &EngineStateSnapshot) -> Result<i64, StateStoreError> {
        let positions_json = serde_json::to_string(&snapshot.positions)?;
        let pending_orders_json = serde_json::to_string(&snapshot.pending_order_ids)?;
        let statistics_json = serde_json::to_string(&snapshot.statistics)?;
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO engine_states ({SNAPSHOT_COLUMNS}, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                snapshot.timestamp.to_rfc3339(),
                snapshot.state,
                snapshot.strategy_name,
                snapshot.broker_name,
                positions_json,
                pending_orders_json,
                statistics_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_latest_state(&self) -> Result<Option<EngineStateSnapshot>, StateStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM engine_states ORDER BY timestamp DESC LIMIT 1"
        ))?;
        stmt.query_row([], snapshot_from_row).optional().map_err(Into::into)
    }

    pub fn get_state_history(&self, limit: usize) -> Result<Vec<EngineStateSnapshot>, StateStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM engine_states ORDER BY timestamp DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], snapshot_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Record that the engine is starting up without a clean shutdown
    /// preceding it. Called at startup before recovery; cleared by
    /// [`StateStore::mark_crash_recovered`] once recovery completes.
    /// `engine_state_id` links the marker to the last snapshot saved before
    /// the crash, if one is known. Returns the inserted marker's id.
    pub fn mark_crash(&self, reason: &str, engine_state_id: Option<i64>) -> Result<i64, StateStoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO crash_markers (timestamp, reason, recovered, engine_state_id) VALUES (?1, ?2, 0, ?3)",
            params![Utc::now().to_rfc3339(), reason, engine_state_id],
        )?;
        warn!(reason, engine_state_id, "crash marker recorded");
        Ok(conn.last_insert_rowid())
    }

    pub fn has_unrecovered_crash(&self) -> Result<bool, StateStoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM crash_markers WHERE recovered = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn mark_crash_recovered(&self) -> Result<(), StateStoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE crash_markers SET recovered = 1, recovery_timestamp = ?1 WHERE recovered = 0",
            params![Utc::now().to_rfc3339()],
        )?;
        info!("crash markers cleared after recovery");
        Ok(())
    }

    pub fn cleanup_old_states(&self, older_than: Duration) -> Result<usize, StateStoreError> {
        let cutoff: DateTime<Utc> = Utc::now() - older_than;
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM engine_states WHERE timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> EngineStateSnapshot {
        EngineStateSnapshot {
            timestamp: Utc::now(),
            state: "Running".to_string(),
            strategy_name: "noop".to_string(),
            broker_name: "paper".to_string(),
            positions: HashMap::new(),
            pending_order_ids: HashSet::new(),
            statistics: HashMap::new(),
        }
    }

    #[test]
    fn save_and_get_latest_round_trips() {
        let store = StateStore::in_memory().unwrap();
        let id = store.save_state(&snapshot()).unwrap();
        assert!(id > 0);
        let latest = store.get_latest_state().unwrap().unwrap();
        assert_eq!(latest.state, "Running");
        assert_eq!(latest.broker_name, "paper");
    }

    #[test]
    fn crash_recovery_cycle_links_to_last_state() {
        let store = StateStore::in_memory().unwrap();
        let state_id = store.save_state(&snapshot()).unwrap();
        assert!(!store.has_unrecovered_crash().unwrap());
        let marker_id = store.mark_crash("unexpected exit", Some(state_id)).unwrap();
        assert!(marker_id > 0);
        assert!(store.has_unrecovered_crash().unwrap());
        store.mark_crash_recovered().unwrap();
        assert!(!store.has_unrecovered_crash().unwrap());
    }

    #[test]
    fn state_history_respects_limit() {
        let store = StateStore::in_memory().unwrap();
        for _ in 0..5 {
            store.save_state(&snapshot()).unwrap();
        }
        assert_eq!(store.get_state_history(3).unwrap().len(), 3);
    }
}
