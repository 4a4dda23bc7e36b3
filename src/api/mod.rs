//! API layer -- axum routes, handlers, and middleware.

mod auth;
mod routes;
pub mod state;

use self::state::AppState;
use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    let ingest = Router::new()
        .route("/ingest", post(routes::ingest))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    // Ingest is bounded by the sink client timeouts instead, so a slow sink
    // never turns an accepted sample into a 408.
    let reads = Router::new()
        .route("/model", get(routes::model))
        .nest("/api/v1", routes::api_routes())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.request_timeout,
        ));

    Router::new()
        .merge(ingest)
        .merge(reads)
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt; // for `oneshot`

    use crate::features::FeatureVector;
    use crate::pipeline::Pipeline;
    use crate::publish::memory::MemoryPublisher;
    use crate::scoring::{Scorer, ScoringEngine, ScoringError};
    use crate::storage::memory::MemorySink;
    use crate::storage::{Point, SinkError, TimeSeriesSink};

    const KEY: &str = "test-key";

    fn make_app(api_key: &str) -> (Router, MemorySink) {
        let sink = MemorySink::new();
        let pipeline = Pipeline::with_parts(
            2,
            0.6,
            "smartprison",
            ScoringEngine::new(None, None),
            Arc::new(sink.clone()),
            Arc::new(MemoryPublisher::new()),
        );
        let state = AppState::new(pipeline, api_key, Duration::from_secs(5));
        (router(state), sink)
    }

    fn ingest_request(auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/ingest")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 10_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_requires_bearer() {
        let (app, sink) = make_app(KEY);
        let response = app
            .oneshot(ingest_request(None, r#"{"device":"cell-7","vib":1}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(sink.points().await.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_rejects_non_bearer_scheme() {
        let (app, _) = make_app(KEY);
        let response = app
            .oneshot(ingest_request(Some("Basic dGVzdA=="), "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ingest_rejects_wrong_key() {
        let (app, _) = make_app(KEY);
        let response = app
            .oneshot(ingest_request(Some("Bearer nope"), "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_empty_configured_key_rejects_everything() {
        let (app, _) = make_app("");
        let response = app
            .oneshot(ingest_request(Some("Bearer "), "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_ingest_accepts_and_triggers() {
        let (app, sink) = make_app(KEY);
        let auth = format!("Bearer {KEY}");

        for ts in [1, 2] {
            let body = format!(r#"{{"device":"cell-7","ts":{ts},"vib":100,"pir":true}}"#);
            let response = app
                .clone()
                .oneshot(ingest_request(Some(&auth), &body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["status"], "ok");
        }

        let points = sink.measurement("sensor_windows").await;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp, 2);
        assert_eq!(points[0].int("pir_sum"), Some(2));
    }

    #[tokio::test]
    async fn test_ingest_malformed_json_is_client_error() {
        let (app, _) = make_app(KEY);
        let response = app
            .oneshot(ingest_request(Some(&format!("Bearer {KEY}")), "{not json"))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_model_endpoint() {
        let (app, _) = make_app(KEY);
        let request = Request::builder().uri("/model").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["model_version"], "none");
        assert_eq!(json["window"], 2);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = make_app(KEY);
        let request = Request::builder()
            .uri("/api/v1/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["status"], "ok");
        assert!(json["meta"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_devices_and_alerts_listing() {
        let (app, _) = make_app(KEY);
        let auth = format!("Bearer {KEY}");
        app.clone()
            .oneshot(ingest_request(Some(&auth), r#"{"device":"cell-1"}"#))
            .await
            .unwrap();

        let request = Request::builder()
            .uri("/api/v1/devices")
            .body(Body::empty())
            .unwrap();
        let json = body_json(app.clone().oneshot(request).await.unwrap()).await;
        assert_eq!(json["meta"]["total"], 1);
        assert_eq!(json["data"][0]["device"], "cell-1");

        let request = Request::builder()
            .uri("/api/v1/alerts?limit=5")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["meta"]["total"], 0);
    }

    struct SlowSink(MemorySink);

    #[async_trait::async_trait]
    impl TimeSeriesSink for SlowSink {
        fn name(&self) -> &'static str {
            "slow"
        }
        async fn write_record(&self, point: &Point) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_millis(600)).await;
            self.0.write_record(point).await
        }
    }

    struct Alarm;

    impl Scorer for Alarm {
        fn version(&self) -> &str {
            "fake:v1"
        }
        fn score(&self, _: &FeatureVector) -> Result<f64, ScoringError> {
            Ok(0.9)
        }
    }

    #[tokio::test]
    async fn test_slow_sink_does_not_time_out_ingest() {
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
        let app = router(AppState::new(pipeline, KEY, Duration::from_secs(1)));

        let response = app
            .oneshot(ingest_request(
                Some(&format!("Bearer {KEY}")),
                r#"{"device":"cell-7","vib":1}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sink.measurement("ai_alerts").await.len(), 1);
        assert_eq!(publisher.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (app, _) = make_app(KEY);
        let request = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
