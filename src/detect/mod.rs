//! Alert decision and record fan-out.

pub mod engine;
pub mod record;

pub use self::engine::AlertEngine;
pub use self::record::{AlertMessage, AlertRecord, SensorSummaryRecord, ALERT_MEASUREMENT, SUMMARY_MEASUREMENT};

use serde::Serialize;

/// What [`AlertEngine::handle`] did with one scored window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Disposition {
    pub device: String,
    pub ts: i64,
    pub score: f64,
    pub model_version: String,
    /// Set when the score reached the threshold.
    pub alert_id: Option<uuid::Uuid>,
    /// Sink writes and publishes that failed. Never retried.
    pub sink_failures: usize,
}

impl Disposition {
    pub fn is_alert(&self) -> bool {
        self.alert_id.is_some()
    }
}
