//! Isolation forest
//!
//! An ensemble of random partitioning trees. Points that are isolated
//! after few splits are outliers. Each tree is grown on a random
//! subsample; scores follow the usual `2^(-E[h(x)] / c(n))` form.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ScoringError, ScoringResult};
use crate::features::{FeatureVector, FEATURE_DIM};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsolationForestParams {
    pub n_estimators: usize,
    pub max_samples: usize,
    /// Share of the training set expected to be outliers; sets the decision offset
    pub contamination: f64,
    pub seed: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
    offset: f64,
}

impl IsolationForest {
    /// Grow the forest and calibrate the decision offset on the training set
    pub fn fit(data: &[FeatureVector], params: &IsolationForestParams) -> ScoringResult<Self> {
        if data.is_empty() || params.n_estimators == 0 {
            return Err(ScoringError::EmptyDataset);
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let sample_size = params.max_samples.min(data.len()).max(1);
        let max_depth = (sample_size as f64).log2().ceil().max(1.0) as usize;

        let trees = (0..params.n_estimators)
            .map(|_| {
                let rows: Vec<&FeatureVector> = sample(&mut rng, data.len(), sample_size)
                    .into_iter()
                    .map(|i| &data[i])
                    .collect();
                grow(&rows, 0, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            offset: -0.5,
        };

        let mut scores: Vec<f64> = data.iter().map(|x| forest.score_sample(x)).collect();
        scores.sort_by(|a, b| a.total_cmp(b));
        forest.offset = percentile(&scores, params.contamination * 100.0);

        debug!(
            trees = forest.trees.len(),
            sample_size,
            offset = forest.offset,
            "Isolation forest fitted"
        );
        Ok(forest)
    }

    /// Opposite of the anomaly score: in [-1, 0], lower is more abnormal
    pub fn score_sample(&self, x: &FeatureVector) -> f64 {
        let total: f64 = self.trees.iter().map(|t| path_length(t, x, 0)).sum();
        let mean = total / self.trees.len() as f64;
        -(2f64.powf(-mean / average_path_length(self.sample_size)))
    }

    /// Shifted score: negative means outlier
    pub fn decision_function(&self, x: &FeatureVector) -> f64 {
        self.score_sample(x) - self.offset
    }

    pub fn predict_outlier(&self, x: &FeatureVector) -> bool {
        self.decision_function(x) < 0.0
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }
}

fn grow(rows: &[&FeatureVector], depth: usize, max_depth: usize, rng: &mut StdRng) -> Node {
    if depth >= max_depth || rows.len() <= 1 {
        return Node::Leaf { size: rows.len() };
    }

    // Pick a random feature that still varies; give up after FEATURE_DIM tries
    for _ in 0..FEATURE_DIM {
        let feature = rng.gen_range(0..FEATURE_DIM);
        let (lo, hi) = rows.iter().fold((f64::MAX, f64::MIN), |(lo, hi), r| {
            let v = r.get(feature);
            (lo.min(v), hi.max(v))
        });
        if hi <= lo {
            continue;
        }

        let threshold = rng.gen_range(lo..hi);
        let (left, right): (Vec<&FeatureVector>, Vec<&FeatureVector>) =
            rows.iter().copied().partition(|r| r.get(feature) < threshold);

        return Node::Split {
            feature,
            threshold,
            left: Box::new(grow(&left, depth + 1, max_depth, rng)),
            right: Box::new(grow(&right, depth + 1, max_depth, rng)),
        };
    }

    Node::Leaf { size: rows.len() }
}

fn path_length(node: &Node, x: &FeatureVector, depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if x.get(*feature) < *threshold {
                path_length(left, x, depth + 1)
            } else {
                path_length(right, x, depth + 1)
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points
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

/// Linear-interpolated percentile of sorted values, `q` in [0, 100]
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
