//! Isolation forest outlier detection
//!
//! Anomaly score is `2^(-E[h(x)] / c(ψ))` where `h` is the path length to
//! isolate `x` and `c(ψ)` the average path length of an unsuccessful BST
//! search over the sub-sample size ψ. The decision threshold is the
//! `1 - contamination` quantile of the training scores.
//!
//! The forest also keeps the per-feature `[min, max]` of the whole training
//! set. A query outside that box is an outlier regardless of its score,
//! since every tree routes it into the same leaf as the extreme training rows.

use super::metrics::quantile;
use super::{FeatureMatrix, OutlierDetector};
use crate::error::{EngineError, Result};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForestParams {
    pub n_trees: usize,
    /// Upper bound on the per-tree sub-sample size
    pub max_samples: usize,
    /// Expected share of outliers in the training data
    pub contamination: f64,
    pub seed: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            contamination: 0.01,
            seed: 42,
        }
    }
}

impl IsolationForestParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_trees == 0 || self.max_samples < 2 {
            return Err(EngineError::Configuration(
                "isolation forest needs at least one tree and two samples per tree".to_string(),
            ));
        }
        if !(self.contamination > 0.0 && self.contamination < 0.5) {
            return Err(EngineError::Configuration(format!(
                "contamination must be in (0, 0.5), got {}",
                self.contamination
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IsolationNode {
    /// Rows with `x[feature] <= threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<IsolationNode>,
}

impl IsolationTree {
    fn build(x: &FeatureMatrix, rows: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, rows, 0, height_limit, rng);
        tree
    }

    fn grow(&mut self, x: &FeatureMatrix, rows: Vec<usize>, depth: usize, height_limit: usize, rng: &mut StdRng) -> usize {
        let index = self.nodes.len();
        self.nodes.push(IsolationNode::Leaf { size: rows.len() });
        if depth >= height_limit || rows.len() <= 1 {
            return index;
        }

        let splittable: Vec<(usize, f64, f64)> = (0..x.n_cols())
            .filter_map(|j| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    let v = x.get(i, j);
                    (lo.min(v), hi.max(v))
                });
                (lo < hi).then_some((j, lo, hi))
            })
            .collect();
        if splittable.is_empty() {
            return index;
        }

        let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&i| x.get(i, feature) <= threshold);

        let left = self.grow(x, left_rows, depth + 1, height_limit, rng);
        let right = self.grow(x, right_rows, depth + 1, height_limit, rng);
        self.nodes[index] = IsolationNode::Split {
            feature,
            threshold,
            left,
            right,
        };
        index
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[idx] {
                IsolationNode::Leaf { size } => return depth + average_path_length(*size),
                IsolationNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// `c(n)`: average path length of an unsuccessful search in a BST of `n` nodes
pub(crate) fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            let harmonic = (n - 1.0).ln() + EULER_GAMMA;
            2.0 * harmonic - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    params: IsolationForestParams,
    n_features: usize,
    sample_size: usize,
    threshold: f64,
    /// Per-feature `(min, max)` over every training row
    support: Vec<(f64, f64)>,
    trees: Vec<IsolationTree>,
}

impl IsolationForest {
    pub fn fit(params: IsolationForestParams, x: &FeatureMatrix) -> Result<Self> {
        params.validate()?;
        let n = x.n_rows();
        if n < 2 {
            return Err(EngineError::Configuration(format!(
                "isolation forest needs at least 2 rows, got {n}"
            )));
        }

        let sample_size = params.max_samples.min(n);
        let height_limit = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_trees)
            .map(|_| {
                let rows = sample(&mut rng, n, sample_size).into_vec();
                IsolationTree::build(x, rows, height_limit, &mut rng)
            })
            .collect();

        let support = (0..x.n_cols())
            .map(|j| {
                (0..n).fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), i| {
                    let v = x.get(i, j);
                    (lo.min(v), hi.max(v))
                })
            })
            .collect();

        let mut forest = Self {
            params,
            n_features: x.n_cols(),
            sample_size,
            threshold: f64::INFINITY,
            support,
            trees,
        };
        let scores: Vec<f64> = (0..n).map(|i| forest.score(x.row(i))).collect();
        forest.threshold = quantile(&scores, 1.0 - forest.params.contamination)
            .ok_or_else(|| EngineError::Configuration("no training scores".to_string()))?;
        Ok(forest)
    }

    /// Anomaly score in (0, 1]; higher is more anomalous
    pub fn score(&self, row: &[f64]) -> f64 {
        let mean = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / self.trees.len() as f64;
        let norm = average_path_length(self.sample_size);
        if norm <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean / norm)
    }

    /// Whether every feature lies inside its training `[min, max]`
    pub fn within_support(&self, row: &[f64]) -> bool {
        self.support
            .iter()
            .zip(row)
            .all(|(&(lo, hi), &v)| v >= lo && v <= hi)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn params(&self) -> &IsolationForestParams {
        &self.params
    }

    /// Structural check for forests read back from disk
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.trees.is_empty() || !self.threshold.is_finite() {
            return Err(EngineError::Configuration("isolation forest is not fitted".to_string()));
        }
        if self.support.len() != self.n_features || self.support.iter().any(|(lo, hi)| !(lo <= hi)) {
            return Err(EngineError::Configuration("isolation forest support is malformed".to_string()));
        }
        for tree in &self.trees {
            let len = tree.nodes.len();
            for (i, node) in tree.nodes.iter().enumerate() {
                if let IsolationNode::Split {
                    feature, left, right, ..
                } = node
                {
                    if *feature >= self.n_features || *left <= i || *right <= i || *left >= len || *right >= len {
                        return Err(EngineError::Configuration("isolation tree is malformed".to_string()));
                    }
                }
            }
        }
        Ok(())
    }
}

impl OutlierDetector for IsolationForest {
    fn is_outlier(&self, features: &[f64]) -> bool {
        !self.within_support(features) || self.score(features) > self.threshold
    }
}
