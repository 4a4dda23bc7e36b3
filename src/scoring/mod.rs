//! Anomaly scoring backends and the fallback chain in front of them.
//!
//! Two backends sit behind [`Scorer`]: the reconstruction model (primary,
//! preferred) and the isolation forest (fallback). [`ScoringEngine`] is built
//! once at startup and never swaps backends afterwards.
//!
//! Per call, the primary is tried first; any failure falls through to the
//! fallback without retrying the primary. With no usable backend the engine
//! returns a neutral `(0.0, "none")` result instead of failing.

pub mod iforest;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod quantized;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::MlConfig;
use crate::features::FeatureVector;

use self::iforest::{IsolationForest, IsolationForestScorer};
use self::quantized::QuantizedScorer;

/// Model version reported when no backend produced the score.
pub const NO_MODEL: &str = "none";

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse artifact {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("input shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("backend produced a non-finite score")]
    NonFinite,

    #[error("unsupported artifact {path}: {reason}")]
    Unsupported { path: PathBuf, reason: String },

    #[error("inference runtime error: {0}")]
    Runtime(String),
}

/// A loaded scoring backend.
pub trait Scorer: Send + Sync {
    /// Version string stamped on every score this backend produces.
    fn version(&self) -> &str;

    /// Score one feature vector. Larger means more anomalous.
    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError>;
}

/// Anomaly score plus the version of the backend that actually produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    pub score: f64,
    pub model_version: String,
}

impl ScoreResult {
    /// The degraded result used when no backend could score.
    pub fn neutral() -> Self {
        Self {
            score: 0.0,
            model_version: NO_MODEL.to_string(),
        }
    }
}

/// Outcome of asking one backend slot for a score.
#[derive(Debug)]
pub enum ScoreOutcome {
    Success { score: f64, version: String },
    /// No backend is loaded in this slot.
    Unavailable,
    Failed { cause: ScoringError },
}

impl ScoreOutcome {
    fn attempt(scorer: Option<&dyn Scorer>, features: &FeatureVector) -> Self {
        let Some(scorer) = scorer else {
            return Self::Unavailable;
        };
        match scorer.score(features) {
            Ok(score) if score.is_finite() => Self::Success {
                score,
                version: scorer.version().to_string(),
            },
            Ok(_) => Self::Failed {
                cause: ScoringError::NonFinite,
            },
            Err(cause) => Self::Failed { cause },
        }
    }
}

/// Primary + fallback scoring, fixed for the process lifetime.
pub struct ScoringEngine {
    primary: Option<Box<dyn Scorer>>,
    fallback: Option<Box<dyn Scorer>>,
}

impl ScoringEngine {
    pub fn new(primary: Option<Box<dyn Scorer>>, fallback: Option<Box<dyn Scorer>>) -> Self {
        Self { primary, fallback }
    }

    /// Load the backends named in the ML configuration.
    ///
    /// Load failures are logged and leave the slot empty; they never abort
    /// startup.
    pub fn from_config(config: &MlConfig) -> Self {
        let primary = config
            .model_artifact_path
            .as_deref()
            .and_then(|path| match load_primary(path) {
                Ok(scorer) => {
                    info!(path = %path.display(), version = scorer.version(), "loaded primary model");
                    Some(scorer)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "primary model unavailable");
                    None
                }
            });

        let fallback = load_fallback(&config.fallback_artifact_path, config.untrained_fallback);
        match &fallback {
            Some(scorer) => info!(version = scorer.version(), "fallback model ready"),
            None => warn!("no fallback model, scores will be neutral when the primary is absent"),
        }

        Self::new(primary, fallback)
    }

    /// Score a feature vector through the fallback chain. Never fails.
    pub fn score(&self, features: &FeatureVector) -> ScoreResult {
        match ScoreOutcome::attempt(self.primary.as_deref(), features) {
            ScoreOutcome::Success { score, version } => {
                return ScoreResult {
                    score,
                    model_version: version,
                }
            }
            ScoreOutcome::Failed { cause } => {
                warn!(error = %cause, "primary model failed, using fallback");
            }
            ScoreOutcome::Unavailable => {}
        }

        match ScoreOutcome::attempt(self.fallback.as_deref(), features) {
            ScoreOutcome::Success { score, version } => ScoreResult {
                score,
                model_version: version,
            },
            ScoreOutcome::Failed { cause } => {
                warn!(error = %cause, "fallback model failed, returning neutral score");
                ScoreResult::neutral()
            }
            ScoreOutcome::Unavailable => ScoreResult::neutral(),
        }
    }

    /// Version of the backend scores are expected to come from.
    pub fn active_version(&self) -> &str {
        self.primary
            .as_deref()
            .or(self.fallback.as_deref())
            .map(|s| s.version())
            .unwrap_or(NO_MODEL)
    }

    pub fn primary_version(&self) -> Option<&str> {
        self.primary.as_deref().map(|s| s.version())
    }

    pub fn fallback_version(&self) -> Option<&str> {
        self.fallback.as_deref().map(|s| s.version())
    }
}

/// Load a reconstruction model, picking the runtime by file extension.
pub fn load_primary(path: &Path) -> Result<Box<dyn Scorer>, ScoringError> {
    let is_onnx = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));

    if is_onnx {
        #[cfg(feature = "onnx")]
        {
            return Ok(Box::new(onnx::OnnxScorer::load(path)?));
        }
        #[cfg(not(feature = "onnx"))]
        {
            return Err(ScoringError::Unsupported {
                path: path.to_path_buf(),
                reason: "built without the `onnx` feature".to_string(),
            });
        }
    }

    Ok(Box::new(QuantizedScorer::load(path)?))
}

/// Fitted forest from `path` if present, else an untrained one when allowed.
pub fn load_fallback(path: &Path, allow_untrained: bool) -> Option<Box<dyn Scorer>> {
    if path.exists() {
        match IsolationForest::load(path) {
            Ok(forest) => return Some(Box::new(IsolationForestScorer::fitted(forest))),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load fitted isolation forest");
            }
        }
    }

    if allow_untrained {
        Some(Box::new(IsolationForestScorer::untrained()))
    } else {
        None
    }
}
