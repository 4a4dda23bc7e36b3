//! Isolation forest outlier scorer.
//!
//! Points that isolate in few random splits are outliers. A forest is fitted
//! offline (`cellwatch fit-fallback`) and persisted as JSON; at runtime the
//! scorer maps the forest's decision value `d` (negative for outliers) to
//! `1.0 - (d + 0.5)` so that, like the reconstruction model, larger means
//! more anomalous. The result is not bounded to [0, 1].

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{ScoringError, Scorer};
use crate::features::{FeatureVector, FEATURE_COUNT};

/// Version of a forest loaded from a fitted artifact.
pub const FITTED_VERSION: &str = "iforest_loaded";
/// Version of the untrained default forest.
pub const UNTRAINED_VERSION: &str = "iforest_default";

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Fitting parameters.
#[derive(Debug, Clone, Copy)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Subsample size per tree (capped at the number of training rows).
    pub max_samples: usize,
    /// Expected outlier fraction. `None` uses the fixed offset of -0.5.
    pub contamination: Option<f64>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            contamination: Some(0.01),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn validate(&self) -> Result<(), String> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if let Node::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                if *feature >= FEATURE_COUNT {
                    return Err(format!(
                        "split on feature {feature}, only {FEATURE_COUNT} exist"
                    ));
                }
                if !threshold.is_finite() {
                    return Err(format!("non-finite threshold on feature {feature}"));
                }
                stack.push(left);
                stack.push(right);
            }
        }
        Ok(())
    }

    fn path_length(&self, x: &[f64; FEATURE_COUNT], depth: usize) -> f64 {
        match self {
            Node::Leaf { size } => depth as f64 + average_path_length(*size),
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if x[*feature] < *threshold {
                    left.path_length(x, depth + 1)
                } else {
                    right.path_length(x, depth + 1)
                }
            }
        }
    }
}

/// A fitted (or empty) isolation forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    /// Effective subsample size used to normalize path lengths.
    pub max_samples: usize,
    /// Subtracted from the raw score to produce the decision value.
    pub offset: f64,
    trees: Vec<Node>,
}

impl IsolationForest {
    /// A forest with no trees. Its decision value is always 0.0.
    pub fn untrained() -> Self {
        Self {
            max_samples: 0,
            offset: -0.5,
            trees: Vec::new(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn fit(data: &[[f64; FEATURE_COUNT]], params: ForestParams) -> Result<Self, ScoringError> {
        if data.is_empty() {
            return Err(ScoringError::InvalidArtifact(
                "cannot fit an isolation forest on zero rows".to_string(),
            ));
        }
        if params.n_trees == 0 || params.max_samples == 0 {
            return Err(ScoringError::InvalidArtifact(
                "n_trees and max_samples must be positive".to_string(),
            ));
        }
        if let Some(c) = params.contamination {
            if !(c > 0.0 && c <= 0.5) {
                return Err(ScoringError::InvalidArtifact(format!(
                    "contamination must be in (0, 0.5], got {c}"
                )));
            }
        }
        if data.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ScoringError::InvalidArtifact(
                "training data contains non-finite values".to_string(),
            ));
        }

        let psi = params.max_samples.min(data.len());
        let height_limit = (psi.max(2) as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_trees)
            .map(|_| {
                let rows = rand::seq::index::sample(&mut rng, data.len(), psi).into_vec();
                build_tree(data, rows, 0, height_limit, &mut rng)
            })
            .collect();

        let mut forest = Self {
            max_samples: psi,
            offset: -0.5,
            trees,
        };

        if let Some(c) = params.contamination {
            let mut scores: Vec<f64> = data.iter().map(|x| forest.score_sample(x)).collect();
            forest.offset = percentile(&mut scores, c * 100.0);
        }

        Ok(forest)
    }

    /// Raw anomaly measure in [-1, 0): closer to -1 is more anomalous.
    pub fn score_sample(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        if self.trees.is_empty() {
            return self.offset;
        }
        let mean_depth = self
            .trees
            .iter()
            .map(|t| t.path_length(x, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let norm = average_path_length(self.max_samples).max(f64::EPSILON);
        -(2f64.powf(-mean_depth / norm))
    }

    /// Shifted score: negative for outliers, positive for inliers.
    pub fn decision_function(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        self.score_sample(x) - self.offset
    }

    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScoringError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let forest: Self = serde_json::from_str(&content).map_err(|e| ScoringError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        forest.validate()?;
        Ok(forest)
    }

    /// Check a deserialized forest can score any feature vector.
    pub fn validate(&self) -> Result<(), ScoringError> {
        if !self.offset.is_finite() {
            return Err(ScoringError::InvalidArtifact(
                "offset is not finite".to_string(),
            ));
        }
        if !self.trees.is_empty() && self.max_samples == 0 {
            return Err(ScoringError::InvalidArtifact(
                "fitted forest with max_samples = 0".to_string(),
            ));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate()
                .map_err(|reason| ScoringError::InvalidArtifact(format!("tree {i}: {reason}")))?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), ScoringError> {
        let json = serde_json::to_string(self)
            .map_err(|e| ScoringError::InvalidArtifact(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ScoringError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, json).map_err(|source| ScoringError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn build_tree(
    data: &[[f64; FEATURE_COUNT]],
    rows: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= height_limit || rows.len() <= 1 {
        return Node::Leaf { size: rows.len() };
    }

    // Only features that still vary among these rows can split them.
    let candidates: Vec<(usize, f64, f64)> = (0..FEATURE_COUNT)
        .filter_map(|f| {
            let (lo, hi) = rows.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &r| {
                (lo.min(data[r][f]), hi.max(data[r][f]))
            });
            (lo < hi).then_some((f, lo, hi))
        })
        .collect();

    if candidates.is_empty() {
        return Node::Leaf { size: rows.len() };
    }

    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| data[r][feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(data, left, depth + 1, height_limit, rng)),
        right: Box::new(build_tree(data, right, depth + 1, height_limit, rng)),
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile (`q` in 0..=100). Sorts `values`.
fn percentile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (q / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (rank - lo as f64)
}

/// Fallback scorer wrapping an isolation forest.
pub struct IsolationForestScorer {
    forest: IsolationForest,
    version: String,
}

impl IsolationForestScorer {
    /// A calibrated forest loaded from an artifact.
    pub fn fitted(forest: IsolationForest) -> Self {
        Self {
            forest,
            version: FITTED_VERSION.to_string(),
        }
    }

    /// The uncalibrated default used when no fitted artifact exists.
    pub fn untrained() -> Self {
        Self {
            forest: IsolationForest::untrained(),
            version: UNTRAINED_VERSION.to_string(),
        }
    }
}

impl Scorer for IsolationForestScorer {
    fn version(&self) -> &str {
        &self.version
    }

    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        let d = self.forest.decision_function(&features.to_array());
        Ok(1.0 - (d + 0.5))
    }
}
