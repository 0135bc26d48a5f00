//! SQLite state store.

use crate::adapters::csv_adapter::TIMESTAMP_FORMAT;
use crate::domain::error::AgentError;
use crate::domain::position::{Position, PositionState};
use crate::domain::price::PriceRow;
use crate::ports::persistence_port::PersistencePort;
use chrono::NaiveDateTime;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

pub struct SqliteStateStore {
    pool: Pool<SqliteConnectionManager>,
}

fn db_error(e: impl ToString) -> AgentError {
    AgentError::persistence(e.to_string())
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl SqliteStateStore {
    /// Open (or create) the database at `path` and make sure the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AgentError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(2)
            .build(manager)
            .map_err(|e: r2d2::Error| db_error(e))?;
        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, AgentError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| db_error(e))?;
        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, AgentError> {
        self.pool.get().map_err(|e: r2d2::Error| db_error(e))
    }

    pub fn initialize_schema(&self) -> Result<(), AgentError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS positions (
                    id TEXT PRIMARY KEY,
                    instrument TEXT NOT NULL,
                    quantity REAL NOT NULL,
                    entry_price REAL NOT NULL,
                    exit_order_id TEXT,
                    state TEXT NOT NULL,
                    profit REAL NOT NULL,
                    opened_at TEXT NOT NULL,
                    submitted_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS series (
                    instrument TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    price REAL NOT NULL,
                    PRIMARY KEY (instrument, timestamp)
                );",
            )
            .map_err(|e: rusqlite::Error| db_error(e))
    }
}

impl PersistencePort for SqliteStateStore {
    fn load_positions(&self) -> Result<Vec<Position>, AgentError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, instrument, quantity, entry_price, exit_order_id, state, profit,
                        opened_at, submitted_at
                 FROM positions
                 ORDER BY opened_at ASC, id ASC",
            )
            .map_err(|e: rusqlite::Error| db_error(e))?;

        let rows = stmt
            .query_map([], |row| {
                let state_code: String = row.get(5)?;
                let state: PositionState = state_code.parse().map_err(|e: String| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })?;
                let opened_at: String = row.get(7)?;
                let submitted_at: String = row.get(8)?;
                Ok(Position {
                    id: row.get(0)?,
                    instrument: row.get(1)?,
                    quantity: row.get(2)?,
                    entry_price: row.get(3)?,
                    exit_order_id: row.get(4)?,
                    state,
                    profit: row.get(6)?,
                    opened_at: parse_timestamp(&opened_at)?,
                    submitted_at: parse_timestamp(&submitted_at)?,
                })
            })
            .map_err(|e: rusqlite::Error| db_error(e))?;

        let mut positions = Vec::new();
        for row in rows {
            positions.push(row.map_err(|e: rusqlite::Error| db_error(e))?);
        }
        Ok(positions)
    }

    fn save_positions(&self, positions: &[Position]) -> Result<(), AgentError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e: rusqlite::Error| db_error(e))?;
        tx.execute("DELETE FROM positions", [])
            .map_err(|e: rusqlite::Error| db_error(e))?;
        for p in positions {
            tx.execute(
                "INSERT INTO positions (id, instrument, quantity, entry_price, exit_order_id,
                                        state, profit, opened_at, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    p.id,
                    p.instrument,
                    p.quantity,
                    p.entry_price,
                    p.exit_order_id,
                    p.state.code(),
                    p.profit,
                    p.opened_at.format(TIMESTAMP_FORMAT).to_string(),
                    p.submitted_at.format(TIMESTAMP_FORMAT).to_string(),
                ],
            )
            .map_err(|e: rusqlite::Error| db_error(e))?;
        }
        tx.commit().map_err(|e: rusqlite::Error| db_error(e))
    }

    fn load_series(&self) -> Result<Vec<PriceRow>, AgentError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT instrument, timestamp, price FROM series ORDER BY instrument, timestamp")
            .map_err(|e: rusqlite::Error| db_error(e))?;
        let rows = stmt
            .query_map([], |row| {
                let instrument: String = row.get(0)?;
                let timestamp: String = row.get(1)?;
                Ok(PriceRow::new(
                    &instrument,
                    parse_timestamp(&timestamp)?,
                    row.get(2)?,
                ))
            })
            .map_err(|e: rusqlite::Error| db_error(e))?;

        let mut series = Vec::new();
        for row in rows {
            series.push(row.map_err(|e: rusqlite::Error| db_error(e))?);
        }
        Ok(series)
    }

    fn save_series(&self, rows: &[PriceRow]) -> Result<(), AgentError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e: rusqlite::Error| db_error(e))?;
        tx.execute("DELETE FROM series", [])
            .map_err(|e: rusqlite::Error| db_error(e))?;
        for r in rows {
            tx.execute(
                "INSERT OR REPLACE INTO series (instrument, timestamp, price) VALUES (?1, ?2, ?3)",
                params![
                    r.instrument,
                    r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    r.price
                ],
            )
            .map_err(|e: rusqlite::Error| db_error(e))?;
        }
        tx.commit().map_err(|e: rusqlite::Error| db_error(e))
    }
}
