//! Ingest → window → score → alert, as one call per sample.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info};

use crate::config::CellwatchConfig;
use crate::detect::{AlertEngine, Disposition};
use crate::ingest::Sample;
use crate::publish::{self, MessageSink};
use crate::scoring::ScoringEngine;
use crate::storage::{self, TimeSeriesSink};
use crate::window::{WindowManager, WindowStore};

/// Response body of `GET /model`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub model_version: String,
    pub window: usize,
}

#[derive(Clone)]
pub struct Pipeline {
    manager: WindowManager,
    alerts: AlertEngine,
}

impl Pipeline {
    pub fn new(manager: WindowManager, alerts: AlertEngine) -> Self {
        Self { manager, alerts }
    }

    /// Wire a pipeline from explicit parts.
    pub fn with_parts(
        window_size: usize,
        threshold: f64,
        topic_prefix: &str,
        engine: ScoringEngine,
        series: Arc<dyn TimeSeriesSink>,
        messages: Arc<dyn MessageSink>,
    ) -> Self {
        let manager = WindowManager::new(WindowStore::new(window_size), Arc::new(engine));
        let alerts = AlertEngine::new(threshold, topic_prefix, series, messages);
        Self::new(manager, alerts)
    }

    /// Load models and open both sinks from configuration.
    pub fn from_config(config: &CellwatchConfig) -> Result<Self> {
        let engine = ScoringEngine::from_config(&config.ml);
        let series = storage::open_sink(&config.storage)?;
        let messages = publish::open_publisher(&config.alerts)?;

        info!(
            window = config.ml.window_size,
            threshold = config.ml.anomaly_threshold,
            model_version = engine.active_version(),
            storage = series.name(),
            publisher = messages.name(),
            "pipeline ready"
        );

        Ok(Self::with_parts(
            config.ml.window_size,
            config.ml.anomaly_threshold,
            &config.alerts.topic_prefix,
            engine,
            series,
            messages,
        ))
    }

    /// Feed one sample. Returns the disposition when the sample fired a
    /// trigger, `None` while the device window is still filling.
    ///
    /// The device lease is held until the sinks have been written, so
    /// triggers for one device are recorded in sample order. Sink writes run
    /// on their own task: dropping this future after a trigger does not cut
    /// the summary/alert/publish sequence short.
    pub async fn submit(&self, sample: Sample) -> Option<Disposition> {
        let trigger = self.manager.accept(sample).await?;
        let alerts = self.alerts.clone();
        let device = trigger.device.clone();

        let task = tokio::spawn(async move {
            let disposition = alerts
                .handle(&trigger.device, trigger.ts, &trigger.features, &trigger.score)
                .await;
            drop(trigger);
            disposition
        });

        match task.await {
            Ok(disposition) => Some(disposition),
            Err(e) => {
                error!(%device, error = %e, "alert handling task failed");
                None
            }
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model_version: self.manager.engine().active_version().to_string(),
            window: self.manager.window_size(),
        }
    }

    pub fn windows(&self) -> &WindowStore {
        self.manager.store()
    }

    pub fn series(&self) -> &Arc<dyn TimeSeriesSink> {
        self.alerts.series()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::features::FeatureVector;
    use crate::ingest::SensorFields;
    use crate::publish::memory::MemoryPublisher;
    use crate::scoring::{Scorer, ScoringError};
    use crate::storage::memory::MemorySink;
    use crate::storage::{Point, SinkError};

    struct Alarm;

    impl Scorer for Alarm {
        fn version(&self) -> &str {
            "fake:v1"
        }
        fn score(&self, _: &FeatureVector) -> Result<f64, ScoringError> {
            Ok(0.9)
        }
    }

    /// Sink that takes a while per write.
    struct SlowSink(MemorySink);

    #[async_trait]
    impl TimeSeriesSink for SlowSink {
        fn name(&self) -> &'static str {
            "slow"
        }
        async fn write_record(&self, point: &Point) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.0.write_record(point).await
        }
    }

    #[tokio::test]
    async fn test_dropped_submit_still_completes_sink_sequence() {
        let sink = MemorySink::new();
        let publisher = MemoryPublisher::new();
        let pipeline = Pipeline::with_parts(
            1,
            0.6,
            "smartprison",
            ScoringEngine::new(Some(Box::new(Alarm)), None),
            Arc::new(SlowSink(sink.clone())),
            Arc::new(publisher.clone()),
        );

        let sample = Sample::new("cell-7", 1, SensorFields::default());
        let cut = tokio::time::timeout(Duration::from_millis(50), pipeline.submit(sample)).await;
        assert!(cut.is_err());

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(sink.measurement("sensor_windows").await.len(), 1);
        assert_eq!(sink.measurement("ai_alerts").await.len(), 1);
        assert_eq!(publisher.messages().await.len(), 1);

        // The lease was released with the task.
        let next = Sample::new("cell-7", 2, SensorFields::default());
        assert!(pipeline.submit(next).await.is_some());
    }

    #[tokio::test]
    async fn test_submit_fills_then_triggers() {
        let sink = MemorySink::new();
        let pipeline = Pipeline::with_parts(
            3,
            0.6,
            "smartprison",
            ScoringEngine::new(None, None),
            Arc::new(sink.clone()),
            Arc::new(MemoryPublisher::new()),
        );

        for ts in 0..2 {
            let s = Sample::new("cell-1", ts, SensorFields::default());
            assert!(pipeline.submit(s).await.is_none());
        }
        let d = pipeline
            .submit(Sample::new("cell-1", 2, SensorFields::default()))
            .await
            .unwrap();

        assert_eq!(d.ts, 2);
        assert_eq!(d.model_version, "none");
        assert_eq!(sink.points().await.len(), 1);
        assert_eq!(
            pipeline.model_info(),
            ModelInfo {
                model_version: "none".to_string(),
                window: 3
            }
        );
    }
}
