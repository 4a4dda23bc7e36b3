//! API route definitions.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::state::AppState;
use crate::detect::ALERT_MEASUREMENT;
use crate::ingest::IngestPayload;
use crate::pipeline::ModelInfo;
use crate::storage::SinkError;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/devices", get(list_devices))
        .route("/alerts", get(list_alerts))
}

pub async fn ingest(
    State(state): State<AppState>,
    Json(payload): Json<IngestPayload>,
) -> Json<Value> {
    let sample = payload.into_sample(chrono::Utc::now().timestamp());
    state.pipeline.submit(sample).await;
    Json(json!({ "status": "ok" }))
}

pub async fn model(State(state): State<AppState>) -> Json<ModelInfo> {
    Json(state.pipeline.model_info())
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn list_devices(State(state): State<AppState>) -> Json<Value> {
    let devices: Vec<Value> = state
        .pipeline
        .windows()
        .states()
        .await
        .into_iter()
        .map(|(device, state)| json!({ "device": device, "window": state }))
        .collect();
    let total = devices.len();
    Json(json!({ "data": devices, "meta": { "total": total } }))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(q): Query<AlertsQuery>,
) -> (StatusCode, Json<Value>) {
    let limit = q.limit.clamp(1, 1000);
    match state.pipeline.series().recent(ALERT_MEASUREMENT, limit).await {
        Ok(points) => {
            let alerts: Vec<Value> = points
                .iter()
                .map(|p| {
                    json!({
                        "device": p.tags.get("device"),
                        "ts": p.timestamp,
                        "score": p.float("score"),
                        "model_version": p.string("model_version"),
                        "confirmed": p.int("confirmed").unwrap_or(0) != 0,
                    })
                })
                .collect();
            let total = alerts.len();
            (
                StatusCode::OK,
                Json(json!({ "data": alerts, "meta": { "total": total } })),
            )
        }
        Err(e @ SinkError::Unsupported(_)) => (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({ "error": e.to_string() })),
        ),
        Err(e) => {
            warn!(error = %e, "failed to read recent alerts");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "storage unavailable" })),
            )
        }
    }
}
