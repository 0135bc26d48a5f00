//! CSV state store.
//!
//! Keeps `positions.csv` and `series.csv` under one directory. Each save
//! writes a temporary file and renames it over the previous one.

use crate::domain::error::AgentError;
use crate::domain::position::{Position, PositionState};
use crate::domain::price::PriceRow;
use crate::ports::persistence_port::PersistencePort;
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const POSITIONS_FILE: &str = "positions.csv";
const SERIES_FILE: &str = "series.csv";

const POSITION_HEADER: [&str; 9] = [
    "id",
    "instrument",
    "quantity",
    "entry_price",
    "exit_order_id",
    "state",
    "profit",
    "opened_at",
    "submitted_at",
];

const SERIES_HEADER: [&str; 3] = ["instrument", "timestamp", "price"];

pub struct CsvStateStore {
    base_path: PathBuf,
}

impl CsvStateStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn file(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    fn read_records(&self, name: &str) -> Result<Option<Vec<csv::StringRecord>>, AgentError> {
        let path = self.file(name);
        if !path.exists() {
            return Ok(None);
        }
        let mut rdr = csv::Reader::from_path(&path).map_err(|e| {
            AgentError::persistence(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut records = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| {
                AgentError::persistence(format!("CSV parse error in {}: {}", path.display(), e))
            })?;
            records.push(record);
        }
        Ok(Some(records))
    }

    fn write_records<I>(&self, name: &str, header: &[&str], records: I) -> Result<(), AgentError>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        fs::create_dir_all(&self.base_path)?;
        let path = self.file(name);
        let tmp = self.file(&format!("{}.tmp", name));
        {
            let mut wtr = csv::Writer::from_path(&tmp).map_err(|e| {
                AgentError::persistence(format!("failed to write {}: {}", tmp.display(), e))
            })?;
            wtr.write_record(header)
                .map_err(|e| AgentError::persistence(format!("CSV write error: {}", e)))?;
            for record in records {
                wtr.write_record(&record)
                    .map_err(|e| AgentError::persistence(format!("CSV write error: {}", e)))?;
            }
            wtr.flush()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn field<'a>(record: &'a csv::StringRecord, index: usize, name: &str) -> Result<&'a str, AgentError> {
    record
        .get(index)
        .ok_or_else(|| AgentError::persistence(format!("missing {} column", name)))
}

fn parse_f64(record: &csv::StringRecord, index: usize, name: &str) -> Result<f64, AgentError> {
    field(record, index, name)?
        .trim()
        .parse()
        .map_err(|e| AgentError::persistence(format!("invalid {} value: {}", name, e)))
}

fn parse_timestamp(
    record: &csv::StringRecord,
    index: usize,
    name: &str,
) -> Result<NaiveDateTime, AgentError> {
    let raw = field(record, index, name)?;
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| AgentError::persistence(format!("invalid {} format: {}", name, e)))
}

fn position_from_record(record: &csv::StringRecord) -> Result<Position, AgentError> {
    let state: PositionState = field(record, 5, "state")?
        .parse()
        .map_err(AgentError::persistence)?;
    let exit = field(record, 4, "exit_order_id")?.trim();
    Ok(Position {
        id: field(record, 0, "id")?.to_string(),
        instrument: field(record, 1, "instrument")?.to_string(),
        quantity: parse_f64(record, 2, "quantity")?,
        entry_price: parse_f64(record, 3, "entry_price")?,
        exit_order_id: (!exit.is_empty()).then(|| exit.to_string()),
        state,
        profit: parse_f64(record, 6, "profit")?,
        opened_at: parse_timestamp(record, 7, "opened_at")?,
        submitted_at: parse_timestamp(record, 8, "submitted_at")?,
    })
}

fn position_to_record(p: &Position) -> Vec<String> {
    vec![
        p.id.clone(),
        p.instrument.clone(),
        p.quantity.to_string(),
        p.entry_price.to_string(),
        p.exit_order_id.clone().unwrap_or_default(),
        p.state.code().to_string(),
        p.profit.to_string(),
        p.opened_at.format(TIMESTAMP_FORMAT).to_string(),
        p.submitted_at.format(TIMESTAMP_FORMAT).to_string(),
    ]
}

impl PersistencePort for CsvStateStore {
    fn load_positions(&self) -> Result<Vec<Position>, AgentError> {
        let Some(records) = self.read_records(POSITIONS_FILE)? else {
            return Ok(Vec::new());
        };
        records.iter().map(position_from_record).collect()
    }

    fn save_positions(&self, positions: &[Position]) -> Result<(), AgentError> {
        self.write_records(
            POSITIONS_FILE,
            &POSITION_HEADER,
            positions.iter().map(position_to_record),
        )
    }

    fn load_series(&self) -> Result<Vec<PriceRow>, AgentError> {
        let Some(records) = self.read_records(SERIES_FILE)? else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let instrument = field(record, 0, "instrument")?;
            let timestamp = parse_timestamp(record, 1, "timestamp")?;
            let price = parse_f64(record, 2, "price")?;
            rows.push(PriceRow::new(instrument, timestamp, price));
        }
        Ok(rows)
    }

    fn save_series(&self, rows: &[PriceRow]) -> Result<(), AgentError> {
        self.write_records(
            SERIES_FILE,
            &SERIES_HEADER,
            rows.iter().map(|r| {
                vec![
                    r.instrument.clone(),
                    r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    r.price.to_string(),
                ]
            }),
        )
    }
}
