//! SQLite-backed time-series sink.
//!
//! Every record lands in the `points` table with tags and fields stored as
//! JSON. Writes run on the blocking pool so a slow disk never stalls the
//! async runtime.

use async_trait::async_trait;
use rusqlite::params;

use super::{Point, Pool, SinkError, TimeSeriesSink};

#[derive(Clone)]
pub struct SqliteSink {
    pool: Pool,
}

impl SqliteSink {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn insert(pool: &Pool, point: &Point) -> anyhow::Result<()> {
        let conn = pool.get()?;
        conn.execute(
            "INSERT INTO points (measurement, device, tags_json, fields_json, ts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                point.measurement,
                point.tags.get("device"),
                serde_json::to_string(&point.tags)?,
                serde_json::to_string(&point.fields)?,
                point.timestamp,
            ],
        )?;
        Ok(())
    }

    fn query_recent(pool: &Pool, measurement: &str, limit: usize) -> anyhow::Result<Vec<Point>> {
        let conn = pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT tags_json, fields_json, ts FROM points
             WHERE measurement = ?1
             ORDER BY ts DESC, id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![measurement, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut points = Vec::new();
        for r in rows {
            let (tags, fields, ts) = r?;
            points.push(Point {
                measurement: measurement.to_string(),
                tags: serde_json::from_str(&tags)?,
                fields: serde_json::from_str(&fields)?,
                timestamp: ts,
            });
        }
        Ok(points)
    }
}

#[async_trait]
impl TimeSeriesSink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn write_record(&self, point: &Point) -> Result<(), SinkError> {
        let pool = self.pool.clone();
        let point = point.clone();
        tokio::task::spawn_blocking(move || Self::insert(&pool, &point))
            .await
            .map_err(|e| SinkError::Storage(e.to_string()))?
            .map_err(|e| SinkError::Storage(e.to_string()))
    }

    async fn recent(&self, measurement: &str, limit: usize) -> Result<Vec<Point>, SinkError> {
        let pool = self.pool.clone();
        let measurement = measurement.to_string();
        tokio::task::spawn_blocking(move || Self::query_recent(&pool, &measurement, limit))
            .await
            .map_err(|e| SinkError::Storage(e.to_string()))?
            .map_err(|e| SinkError::Storage(e.to_string()))
    }
}
