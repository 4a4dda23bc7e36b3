use std::sync::Arc;

use tracing::{info, warn};

use super::record::{AlertMessage, AlertRecord, SensorSummaryRecord};
use super::Disposition;
use crate::features::FeatureVector;
use crate::publish::{alert_topic, MessageSink};
use crate::scoring::ScoreResult;
use crate::storage::{Point, TimeSeriesSink};

/// Threshold check plus best-effort writes to the time-series and message sinks.
#[derive(Clone)]
pub struct AlertEngine {
    threshold: f64,
    topic_prefix: String,
    series: Arc<dyn TimeSeriesSink>,
    messages: Arc<dyn MessageSink>,
}

impl AlertEngine {
    pub fn new(
        threshold: f64,
        topic_prefix: impl Into<String>,
        series: Arc<dyn TimeSeriesSink>,
        messages: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            threshold,
            topic_prefix: topic_prefix.into(),
            series,
            messages,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn series(&self) -> &Arc<dyn TimeSeriesSink> {
        &self.series
    }

    /// Record one scored window and raise an alert when `score >= threshold`.
    ///
    /// Always writes a summary row. On alert, writes an alert row and then
    /// publishes an [`AlertMessage`]. Sink failures are logged and counted
    /// in the returned [`Disposition`]; they never change the decision.
    pub async fn handle(
        &self,
        device: &str,
        ts: i64,
        features: &FeatureVector,
        score: &ScoreResult,
    ) -> Disposition {
        let mut disposition = Disposition {
            device: device.to_string(),
            ts,
            score: score.score,
            model_version: score.model_version.clone(),
            alert_id: None,
            sink_failures: 0,
        };

        let summary = SensorSummaryRecord::new(device, ts, features, score);
        if !self.write(device, summary.to_point()).await {
            disposition.sink_failures += 1;
        }

        if score.score < self.threshold {
            return disposition;
        }

        let record = AlertRecord::new(device, ts, score);
        let message = AlertMessage::new(&record);
        disposition.alert_id = Some(message.alert_id);
        info!(
            device,
            score = score.score,
            model_version = %score.model_version,
            alert_id = %message.alert_id,
            "anomaly alert raised"
        );

        if !self.write(device, record.to_point()).await {
            disposition.sink_failures += 1;
        }
        if !self.publish(device, &message).await {
            disposition.sink_failures += 1;
        }

        disposition
    }

    async fn write(&self, device: &str, point: Point) -> bool {
        match self.series.write_record(&point).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    device,
                    measurement = %point.measurement,
                    sink = self.series.name(),
                    error = %e,
                    "time-series write failed"
                );
                false
            }
        }
    }

    async fn publish(&self, device: &str, message: &AlertMessage) -> bool {
        let topic = alert_topic(&self.topic_prefix, device);
        let payload = match serde_json::to_vec(message) {
            Ok(p) => p,
            Err(e) => {
                warn!(device, %topic, error = %e, "failed to encode alert message");
                return false;
            }
        };

        match self.messages.publish(&topic, &payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    device,
                    %topic,
                    sink = self.messages.name(),
                    error = %e,
                    "alert publish failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::memory::MemoryPublisher;
    use crate::storage::memory::MemorySink;
    use crate::storage::SinkError;
    use async_trait::async_trait;

    struct Failing;

    #[async_trait]
    impl TimeSeriesSink for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn write_record(&self, _: &Point) -> Result<(), SinkError> {
            Err(SinkError::Transport("connection refused".to_string()))
        }
    }

    #[async_trait]
    impl MessageSink for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn publish(&self, _: &str, _: &[u8]) -> Result<(), SinkError> {
            Err(SinkError::Transport("broker down".to_string()))
        }
    }

    fn score(v: f64) -> ScoreResult {
        ScoreResult {
            score: v,
            model_version: "fake:v1".to_string(),
        }
    }

    fn engine() -> (AlertEngine, MemorySink, MemoryPublisher) {
        let sink = MemorySink::new();
        let publisher = MemoryPublisher::new();
        let engine = AlertEngine::new(
            0.6,
            "smartprison",
            Arc::new(sink.clone()),
            Arc::new(publisher.clone()),
        );
        (engine, sink, publisher)
    }

    #[tokio::test]
    async fn test_below_threshold_writes_summary_only() {
        let (engine, sink, publisher) = engine();
        let d = engine
            .handle("cell-7", 5, &FeatureVector::default(), &score(0.1))
            .await;

        assert!(!d.is_alert());
        assert_eq!(d.sink_failures, 0);
        assert_eq!(sink.measurement("sensor_windows").await.len(), 1);
        assert!(sink.measurement("ai_alerts").await.is_empty());
        assert!(publisher.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let (engine, sink, publisher) = engine();
        let d = engine
            .handle("cell-7", 5, &FeatureVector::default(), &score(0.6))
            .await;

        assert!(d.is_alert());
        assert_eq!(sink.measurement("ai_alerts").await.len(), 1);

        let messages = publisher.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "smartprison/alerts/cell-7");

        let body: serde_json::Value = serde_json::from_slice(&messages[0].1).unwrap();
        assert_eq!(body["alert_id"], d.alert_id.unwrap().to_string());
        assert_eq!(body["device"], "cell-7");
    }

    #[tokio::test]
    async fn test_just_below_threshold_does_not_alert() {
        let (engine, sink, _) = engine();
        let below = f64::from_bits(0.6f64.to_bits() - 1);
        let d = engine
            .handle("cell-7", 5, &FeatureVector::default(), &score(below))
            .await;

        assert!(!d.is_alert());
        assert!(sink.measurement("ai_alerts").await.is_empty());
    }

    #[tokio::test]
    async fn test_sink_failures_are_swallowed() {
        let engine = AlertEngine::new(0.6, "smartprison", Arc::new(Failing), Arc::new(Failing));
        let d = engine
            .handle("cell-7", 5, &FeatureVector::default(), &score(0.9))
            .await;

        assert!(d.is_alert());
        assert_eq!(d.sink_failures, 3);
    }

    #[tokio::test]
    async fn test_publish_still_happens_when_alert_write_fails() {
        let publisher = MemoryPublisher::new();
        let engine = AlertEngine::new(
            0.6,
            "smartprison",
            Arc::new(Failing),
            Arc::new(publisher.clone()),
        );
        engine
            .handle("cell-7", 5, &FeatureVector::default(), &score(0.9))
            .await;

        assert_eq!(publisher.messages().await.len(), 1);
    }
}
