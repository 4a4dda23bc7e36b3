//! Time-series sink: record shape, the sink trait, and its backends.

pub mod influx;
pub mod memory;
pub mod schema;
pub mod sqlite;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Failure of an outbound write (time-series or message sink).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("not supported by the {0} sink")]
    Unsupported(&'static str),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Transport(e.to_string())
    }
}

/// A field value in a time-series record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

/// One time-series row: measurement name, tags, fields, epoch-second timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: i64,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Str(_) => None,
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.fields.get(key)? {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.fields.get(key)? {
            FieldValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// Destination for summary and alert records.
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn write_record(&self, point: &Point) -> Result<(), SinkError>;

    /// Most recent records of one measurement, newest first.
    async fn recent(&self, _measurement: &str, _limit: usize) -> Result<Vec<Point>, SinkError> {
        Err(SinkError::Unsupported(self.name()))
    }
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Build the time-series sink selected in the storage configuration.
pub fn open_sink(config: &StorageConfig) -> Result<Arc<dyn TimeSeriesSink>> {
    let sink: Arc<dyn TimeSeriesSink> = match config.backend {
        StorageBackend::Sqlite => {
            tracing::info!(path = %config.sqlite_path.display(), "Initializing database");
            Arc::new(sqlite::SqliteSink::new(open_pool(&config.sqlite_path)?))
        }
        StorageBackend::Influx => Arc::new(influx::InfluxSink::new(&config.influx)?),
        StorageBackend::Memory => Arc::new(memory::MemorySink::new()),
    };
    Ok(sink)
}
