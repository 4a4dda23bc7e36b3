//! Persisted and published record shapes.

use serde::Serialize;
use uuid::Uuid;

use crate::features::FeatureVector;
use crate::scoring::ScoreResult;
use crate::storage::Point;

pub const SUMMARY_MEASUREMENT: &str = "sensor_windows";
pub const ALERT_MEASUREMENT: &str = "ai_alerts";

/// One row per trigger: the diagnostic subset of the features plus the score.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSummaryRecord {
    pub device: String,
    pub ts: i64,
    pub vib_mean: f64,
    pub vib_std: f64,
    pub gas_mean: f64,
    pub pir_sum: i64,
    pub temp_mean: f64,
    pub people_max: i64,
    pub ai_score: f64,
    pub model_version: String,
}

impl SensorSummaryRecord {
    pub fn new(device: &str, ts: i64, features: &FeatureVector, score: &ScoreResult) -> Self {
        Self {
            device: device.to_string(),
            ts,
            vib_mean: features.vib_mean,
            vib_std: features.vib_std,
            gas_mean: features.gas_mean,
            pir_sum: features.pir_count.round() as i64,
            temp_mean: features.temp_mean,
            people_max: features.people_max.round() as i64,
            ai_score: score.score,
            model_version: score.model_version.clone(),
        }
    }

    pub fn to_point(&self) -> Point {
        Point::new(SUMMARY_MEASUREMENT, self.ts)
            .tag("device", self.device.as_str())
            .field("vib_mean", self.vib_mean)
            .field("vib_std", self.vib_std)
            .field("gas_mean", self.gas_mean)
            .field("pir_sum", self.pir_sum)
            .field("temp_mean", self.temp_mean)
            .field("people_max", self.people_max)
            .field("ai_score", self.ai_score)
            .field("model_version", self.model_version.as_str())
    }
}

/// Alert row. `confirmed` is flipped later by human review, outside this service.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub device: String,
    pub ts: i64,
    pub score: f64,
    pub model_version: String,
    pub confirmed: bool,
}

impl AlertRecord {
    pub fn new(device: &str, ts: i64, score: &ScoreResult) -> Self {
        Self {
            device: device.to_string(),
            ts,
            score: score.score,
            model_version: score.model_version.clone(),
            confirmed: false,
        }
    }

    pub fn to_point(&self) -> Point {
        Point::new(ALERT_MEASUREMENT, self.ts)
            .tag("device", self.device.as_str())
            .field("score", self.score)
            .field("model_version", self.model_version.as_str())
            .field("confirmed", i64::from(self.confirmed))
    }
}

/// Payload published for every alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    pub alert_id: Uuid,
    pub device: String,
    pub ts: i64,
    pub score: f64,
    pub model_version: String,
}

impl AlertMessage {
    pub fn new(record: &AlertRecord) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            device: record.device.clone(),
            ts: record.ts,
            score: record.score,
            model_version: record.model_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(v: f64) -> ScoreResult {
        ScoreResult {
            score: v,
            model_version: "iforest_default".to_string(),
        }
    }

    #[test]
    fn test_summary_point_fields() {
        let features = FeatureVector {
            vib_mean: 100.0,
            pir_count: 3.0,
            people_max: 2.0,
            ..Default::default()
        };
        let p = SensorSummaryRecord::new("cell-7", 1_700_000_000, &features, &score(0.25)).to_point();

        assert_eq!(p.measurement, "sensor_windows");
        assert_eq!(p.timestamp, 1_700_000_000);
        assert_eq!(p.tags["device"], "cell-7");
        assert_eq!(p.fields.len(), 8);
        assert_eq!(p.float("vib_mean"), Some(100.0));
        assert_eq!(p.int("pir_sum"), Some(3));
        assert_eq!(p.int("people_max"), Some(2));
        assert_eq!(p.float("ai_score"), Some(0.25));
        assert_eq!(p.string("model_version"), Some("iforest_default"));
    }

    #[test]
    fn test_alert_point_is_unconfirmed() {
        let record = AlertRecord::new("cell-7", 10, &score(0.9));
        assert!(!record.confirmed);

        let p = record.to_point();
        assert_eq!(p.measurement, "ai_alerts");
        assert_eq!(p.int("confirmed"), Some(0));
        assert_eq!(p.float("score"), Some(0.9));
    }

    #[test]
    fn test_alert_message_json() {
        let msg = AlertMessage::new(&AlertRecord::new("cell-7", 10, &score(0.9)));
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["device"], "cell-7");
        assert_eq!(json["ts"], 10);
        assert_eq!(json["score"], 0.9);
        assert_eq!(json["model_version"], "iforest_default");
        assert!(Uuid::parse_str(json["alert_id"].as_str().unwrap()).is_ok());
    }
}
