//! In-process sink. Keeps every record; useful for dry runs and tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Point, SinkError, TimeSeriesSink};

#[derive(Clone, Default)]
pub struct MemorySink {
    points: Arc<Mutex<Vec<Point>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records written so far, oldest first.
    pub async fn points(&self) -> Vec<Point> {
        self.points.lock().await.clone()
    }

    /// Records of one measurement, oldest first.
    pub async fn measurement(&self, name: &str) -> Vec<Point> {
        self.points
            .lock()
            .await
            .iter()
            .filter(|p| p.measurement == name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TimeSeriesSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write_record(&self, point: &Point) -> Result<(), SinkError> {
        self.points.lock().await.push(point.clone());
        Ok(())
    }

    async fn recent(&self, measurement: &str, limit: usize) -> Result<Vec<Point>, SinkError> {
        let points = self.points.lock().await;
        Ok(points
            .iter()
            .rev()
            .filter(|p| p.measurement == measurement)
            .take(limit)
            .cloned()
            .collect())
    }
}
