//! ONNX Runtime backend for the reconstruction model (`--features onnx`).

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use tracing::info;

use super::quantized::reconstruction_score;
use super::{ScoringError, Scorer};
use crate::features::{FeatureVector, FEATURE_COUNT};

pub struct OnnxScorer {
    session: Mutex<Session>,
    output_name: String,
    version: String,
}

impl OnnxScorer {
    /// Load a model expecting a `[1, 10]` float input. The version is
    /// `onnx:<file name>`.
    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        if !path.exists() {
            return Err(ScoringError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "model not found"),
            });
        }

        let session = Session::builder()
            .map_err(|e| ScoringError::Runtime(format!("session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ScoringError::Runtime(format!("optimization level: {e}")))?
            .commit_from_file(path)
            .map_err(|e| ScoringError::Runtime(format!("load model: {e}")))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ScoringError::InvalidArtifact("model defines no outputs".to_string()))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!(path = %path.display(), "ONNX session ready");

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            version: format!("onnx:{name}"),
        })
    }
}

impl Scorer for OnnxScorer {
    fn version(&self) -> &str {
        &self.version
    }

    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        let input: Vec<f32> = features.to_array().iter().map(|&v| v as f32).collect();
        let array = Array2::<f32>::from_shape_vec((1, FEATURE_COUNT), input.clone())
            .map_err(|e| ScoringError::Runtime(format!("input array: {e}")))?;
        let tensor =
            Value::from_array(array).map_err(|e| ScoringError::Runtime(format!("tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ScoringError::Runtime("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| ScoringError::Runtime(format!("inference failed: {e}")))?;
        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| ScoringError::Runtime("missing output".to_string()))?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ScoringError::Runtime(format!("extract output: {e}")))?;

        reconstruction_score(&input, &[1, FEATURE_COUNT as i64], data, shape)
    }
}
