//! Int8-quantized dense reconstruction model.
//!
//! The artifact is JSON: an input width and a stack of dense layers, each
//! holding int8 weights (row-major, `outputs x inputs`) with a per-layer
//! scale and zero point, plus float biases. Weights are dequantized once at
//! load time as `scale * (q - zero_point)`.
//!
//! When the network's output width equals its input width the score is the
//! mean squared reconstruction error; otherwise (e.g. a model that emits the
//! error directly) the score is the mean of the output.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ScoringError, Scorer};
use crate::features::FeatureVector;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
}

/// One dense layer as stored in the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizedLayer {
    pub inputs: usize,
    pub outputs: usize,
    pub scale: f32,
    #[serde(default)]
    pub zero_point: i8,
    pub weights: Vec<i8>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub activation: Activation,
}

impl QuantizedLayer {
    /// Symmetric int8 quantization of a float layer (`weights[out][in]`).
    pub fn from_f32(weights: &[Vec<f32>], bias: Vec<f32>, activation: Activation) -> Self {
        let outputs = weights.len();
        let inputs = weights.first().map_or(0, Vec::len);
        let max_abs = weights
            .iter()
            .flatten()
            .fold(0.0f32, |acc, w| acc.max(w.abs()));
        let scale = if max_abs > 0.0 { max_abs / 127.0 } else { 1.0 };

        let weights = weights
            .iter()
            .flatten()
            .map(|w| (w / scale).round().clamp(-127.0, 127.0) as i8)
            .collect();

        Self {
            inputs,
            outputs,
            scale,
            zero_point: 0,
            weights,
            bias,
            activation,
        }
    }

    fn validate(&self, index: usize) -> Result<(), ScoringError> {
        if self.inputs == 0 || self.outputs == 0 {
            return Err(ScoringError::InvalidArtifact(format!(
                "layer {index} has a zero dimension"
            )));
        }
        if self.weights.len() != self.inputs * self.outputs {
            return Err(ScoringError::InvalidArtifact(format!(
                "layer {index}: expected {} weights, found {}",
                self.inputs * self.outputs,
                self.weights.len()
            )));
        }
        if self.bias.len() != self.outputs {
            return Err(ScoringError::InvalidArtifact(format!(
                "layer {index}: expected {} biases, found {}",
                self.outputs,
                self.bias.len()
            )));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(ScoringError::InvalidArtifact(format!(
                "layer {index}: scale must be positive"
            )));
        }
        Ok(())
    }
}

/// The serialized model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizedArtifact {
    pub input_dim: usize,
    pub layers: Vec<QuantizedLayer>,
}

/// Layer with dequantized weights, ready for inference.
struct DenseLayer {
    inputs: usize,
    outputs: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
    activation: Activation,
}

impl DenseLayer {
    fn forward(&self, x: &[f32]) -> Vec<f32> {
        (0..self.outputs)
            .map(|o| {
                let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
                let z = row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + self.bias[o];
                match self.activation {
                    Activation::Linear => z,
                    Activation::Relu => z.max(0.0),
                }
            })
            .collect()
    }
}

/// Reconstruction-model scorer over a quantized artifact.
pub struct QuantizedScorer {
    version: String,
    input_dim: usize,
    layers: Vec<DenseLayer>,
}

impl QuantizedScorer {
    /// Read and validate an artifact. The version is `quantized:<file name>`.
    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScoringError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: QuantizedArtifact =
            serde_json::from_str(&content).map_err(|e| ScoringError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_artifact(artifact, format!("quantized:{name}"))
    }

    pub fn from_artifact(
        artifact: QuantizedArtifact,
        version: impl Into<String>,
    ) -> Result<Self, ScoringError> {
        if artifact.layers.is_empty() {
            return Err(ScoringError::InvalidArtifact("no layers".to_string()));
        }

        let mut width = artifact.input_dim;
        let mut layers = Vec::with_capacity(artifact.layers.len());
        for (i, layer) in artifact.layers.into_iter().enumerate() {
            layer.validate(i)?;
            if layer.inputs != width {
                return Err(ScoringError::InvalidArtifact(format!(
                    "layer {i} expects {} inputs but receives {width}",
                    layer.inputs
                )));
            }
            width = layer.outputs;

            let zero_point = f32::from(layer.zero_point);
            layers.push(DenseLayer {
                inputs: layer.inputs,
                outputs: layer.outputs,
                weights: layer
                    .weights
                    .iter()
                    .map(|&q| layer.scale * (f32::from(q) - zero_point))
                    .collect(),
                bias: layer.bias,
                activation: layer.activation,
            });
        }

        Ok(Self {
            version: version.into(),
            input_dim: artifact.input_dim,
            layers,
        })
    }

    /// Run the network on one input row.
    pub fn infer(&self, input: &[f32]) -> Result<Vec<f32>, ScoringError> {
        if input.len() != self.input_dim {
            return Err(ScoringError::ShapeMismatch {
                expected: self.input_dim,
                actual: input.len(),
            });
        }
        Ok(self
            .layers
            .iter()
            .fold(input.to_vec(), |x, layer| layer.forward(&x)))
    }
}

impl Scorer for QuantizedScorer {
    fn version(&self) -> &str {
        &self.version
    }

    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        let input: Vec<f32> = features.to_array().iter().map(|&v| v as f32).collect();
        let output = self.infer(&input)?;
        let input_shape = [1, input.len() as i64];
        let output_shape = [1, output.len() as i64];
        reconstruction_score(&input, &input_shape, &output, &output_shape)
    }
}

/// MSE when the output tensor has the input's shape, mean of the output
/// otherwise. Shapes are compared dimension by dimension, so a `[10, 1]`
/// output of a `[1, 10]` input is not a reconstruction.
pub(crate) fn reconstruction_score(
    input: &[f32],
    input_shape: &[i64],
    output: &[f32],
    output_shape: &[i64],
) -> Result<f64, ScoringError> {
    if output.is_empty() {
        return Err(ScoringError::Runtime("model produced an empty output".to_string()));
    }
    let n = output.len() as f64;
    if output_shape == input_shape && output.len() == input.len() {
        let sq: f64 = input
            .iter()
            .zip(output)
            .map(|(x, y)| f64::from(x - y).powi(2))
            .sum();
        Ok(sq / n)
    } else {
        Ok(output.iter().map(|&v| f64::from(v)).sum::<f64>() / n)
    }
}
