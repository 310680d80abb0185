//! Recorded prediction errors, keyed by model identity and target hour.

use std::collections::HashMap;
use std::path::Path;

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::Target;

pub const HOUR_KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const PREDICTION_HISTORY_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS prediction_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        predicted_at TEXT NOT NULL,
        for_hour TEXT NOT NULL,
        model_type TEXT NOT NULL,
        model_version INTEGER,
        predicted_indoor REAL,
        predicted_outdoor REAL,
        actual_indoor REAL,
        actual_outdoor REAL,
        error_indoor REAL,
        error_outdoor REAL,
        UNIQUE(model_type, for_hour)
    )
";

/// Signed error `actual - predicted` for both targets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ErrorPair {
    pub indoor: f64,
    pub outdoor: f64,
}

impl ErrorPair {
    pub fn between(predicted: Target, actual: Target) -> Self {
        Self {
            indoor: actual.temp_indoor - predicted.temp_indoor,
            outdoor: actual.temp_outdoor - predicted.temp_outdoor,
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid UTC timestamp: {0}")]
    InvalidTimestamp(i64),
}

pub trait ErrorLookup {
    fn get(&self, model_identity: &str, for_hour: &str) -> Result<Option<ErrorPair>, LedgerError>;

    /// Like [`ErrorLookup::get`], defaulting to `(0.0, 0.0)` on a miss.
    fn lookup(&self, model_identity: &str, for_hour: &str) -> Result<ErrorPair, LedgerError> {
        Ok(self.get(model_identity, for_hour)?.unwrap_or_default())
    }
}

pub fn hour_key(ts: i64) -> Result<String, LedgerError> {
    let floored = floor_hour(ts);
    Utc.timestamp_opt(floored, 0)
        .single()
        .map(|dt| dt.format(HOUR_KEY_FORMAT).to_string())
        .ok_or(LedgerError::InvalidTimestamp(ts))
}

pub fn floor_hour(ts: i64) -> i64 {
    ts.div_euclid(3_600) * 3_600
}

pub struct SqliteErrorLedger {
    conn: Connection,
    has_table: bool,
}

impl SqliteErrorLedger {
    pub fn open_read_only(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let has_table = history_table_exists(&conn)?;
        Ok(Self { conn, has_table })
    }

    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(PREDICTION_HISTORY_TABLE_SQL)?;
        Ok(Self {
            conn,
            has_table: true,
        })
    }

    /// Stores one validated prediction. Returns `false` when a record for the
    /// same `(model_identity, for_hour)` already exists; the first record wins.
    pub fn record(
        &self,
        model_identity: &str,
        model_version: Option<u32>,
        for_hour: &str,
        predicted: Target,
        actual: Target,
    ) -> Result<bool, LedgerError> {
        let error = ErrorPair::between(predicted, actual);
        let predicted_at = Utc::now().format(HOUR_KEY_FORMAT).to_string();
        let inserted = self.conn.execute(
            "
            INSERT OR IGNORE INTO prediction_history (
                predicted_at, for_hour, model_type, model_version,
                predicted_indoor, predicted_outdoor, actual_indoor, actual_outdoor,
                error_indoor, error_outdoor
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                predicted_at,
                for_hour,
                model_identity,
                model_version,
                predicted.temp_indoor,
                predicted.temp_outdoor,
                actual.temp_indoor,
                actual.temp_outdoor,
                error.indoor,
                error.outdoor,
            ],
        )?;

        info!(
            component = "ledger",
            event = "ledger.record",
            model_identity,
            for_hour,
            inserted = inserted > 0,
            error_indoor = error.indoor,
            error_outdoor = error.outdoor
        );

        Ok(inserted > 0)
    }
}

impl ErrorLookup for SqliteErrorLedger {
    fn get(&self, model_identity: &str, for_hour: &str) -> Result<Option<ErrorPair>, LedgerError> {
        if !self.has_table {
            return Ok(None);
        }
        let mut stmt = self.conn.prepare_cached(
            "
            SELECT error_indoor, error_outdoor
            FROM prediction_history
            WHERE model_type = ?1 AND for_hour = ?2
            ORDER BY id ASC
            LIMIT 1
            ",
        )?;
        let row = stmt
            .query_row(params![model_identity, for_hour], |row| {
                Ok((row.get::<_, Option<f64>>(0)?, row.get::<_, Option<f64>>(1)?))
            })
            .optional()?;
        Ok(row.and_then(to_error_pair))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorSnapshot {
    entries: HashMap<(String, String), ErrorPair>,
}

impl ErrorSnapshot {
    /// Loads `prediction_history`. A missing database or table is an empty
    /// snapshot, not an error.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        if !path.exists() {
            debug!(
                component = "ledger",
                event = "ledger.snapshot.absent",
                db_path = %path.display()
            );
            return Ok(Self::default());
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Self::from_connection(&conn)
    }

    pub fn from_connection(conn: &Connection) -> Result<Self, LedgerError> {
        let mut snapshot = Self::default();
        if !history_table_exists(conn)? {
            return Ok(snapshot);
        }

        let mut stmt = conn.prepare(
            "
            SELECT model_type, for_hour, error_indoor, error_outdoor
            FROM prediction_history
            ORDER BY id ASC
            ",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let model_type: String = row.get(0)?;
            let for_hour: String = row.get(1)?;
            let pair = (row.get::<_, Option<f64>>(2)?, row.get::<_, Option<f64>>(3)?);
            if let Some(error) = to_error_pair(pair) {
                snapshot.entries.entry((model_type, for_hour)).or_insert(error);
            }
        }

        info!(
            component = "ledger",
            event = "ledger.snapshot.loaded",
            entries = snapshot.entries.len()
        );
        Ok(snapshot)
    }

    pub fn insert(&mut self, model_identity: &str, for_hour: &str, error: ErrorPair) -> bool {
        let key = (model_identity.to_string(), for_hour.to_string());
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, error);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model_identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self
            .entries
            .keys()
            .map(|(identity, _)| identity.clone())
            .collect();
        identities.sort();
        identities.dedup();
        identities
    }
}

impl ErrorLookup for ErrorSnapshot {
    fn get(&self, model_identity: &str, for_hour: &str) -> Result<Option<ErrorPair>, LedgerError> {
        Ok(self
            .entries
            .get(&(model_identity.to_string(), for_hour.to_string()))
            .copied())
    }
}

fn to_error_pair((indoor, outdoor): (Option<f64>, Option<f64>)) -> Option<ErrorPair> {
    if indoor.is_none() && outdoor.is_none() {
        return None;
    }
    Some(ErrorPair {
        indoor: indoor.unwrap_or(0.0),
        outdoor: outdoor.unwrap_or(0.0),
    })
}

fn history_table_exists(conn: &Connection) -> Result<bool, LedgerError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'prediction_history'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
