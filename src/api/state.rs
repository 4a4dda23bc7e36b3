use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    /// Shared bearer credential for ingest. Empty rejects everything.
    pub api_key: Arc<str>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(pipeline: Pipeline, api_key: &str, request_timeout: Duration) -> Self {
        Self {
            pipeline,
            api_key: Arc::from(api_key),
            request_timeout,
        }
    }
}
