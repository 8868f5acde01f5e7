//! Gradient boosted regression trees (squared error)

use super::tree::{RegressionTree, TreeParams};
use super::{FeatureMatrix, Regressor};
use crate::error::{EngineError, Result};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Booster hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterParams {
    /// Learning rate
    pub eta: f64,
    pub max_depth: usize,
    /// Fraction of rows sampled per round
    pub subsample: f64,
    /// Fraction of columns sampled per tree
    pub colsample_bytree: f64,
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    #[serde(default = "default_min_child_weight")]
    pub min_child_weight: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_lambda() -> f64 {
    1.0
}

fn default_min_child_weight() -> f64 {
    1.0
}

fn default_seed() -> u64 {
    42
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            eta: 0.1,
            max_depth: 6,
            subsample: 0.9,
            colsample_bytree: 0.8,
            lambda: default_lambda(),
            min_child_weight: default_min_child_weight(),
            seed: default_seed(),
        }
    }
}

impl BoosterParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.eta > 0.0 && self.eta <= 1.0) {
            return Err(EngineError::Configuration(format!(
                "eta must be in (0, 1], got {}",
                self.eta
            )));
        }
        for (name, value) in [
            ("subsample", self.subsample),
            ("colsample_bytree", self.colsample_bytree),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(EngineError::Configuration(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }
        if self.lambda < 0.0 || self.min_child_weight < 0.0 {
            return Err(EngineError::Configuration(
                "lambda and min_child_weight must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            lambda: self.lambda,
            min_child_weight: self.min_child_weight,
            learning_rate: self.eta,
        }
    }
}

/// Additive ensemble: `base_score + Σ tree(x)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedRegressor {
    params: BoosterParams,
    base_score: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedRegressor {
    /// Start an ensemble with no trees; predictions equal the label mean
    pub fn initialise(params: BoosterParams, x: &FeatureMatrix, y: &[f64]) -> Result<Self> {
        params.validate()?;
        check_training_shape(x, y)?;
        let base_score = y.iter().sum::<f64>() / y.len() as f64;
        Ok(Self {
            params,
            base_score,
            n_features: x.n_cols(),
            trees: Vec::new(),
        })
    }

    /// Train `rounds` trees from scratch
    pub fn fit(params: BoosterParams, x: &FeatureMatrix, y: &[f64], rounds: usize) -> Result<Self> {
        let mut model = Self::initialise(params, x, y)?;
        model.continue_training(x, y, rounds)?;
        Ok(model)
    }

    /// Append `rounds` trees fitted to the residuals of the current ensemble
    pub fn continue_training(&mut self, x: &FeatureMatrix, y: &[f64], rounds: usize) -> Result<()> {
        check_training_shape(x, y)?;
        if x.n_cols() != self.n_features {
            return Err(EngineError::StaleTransform(format!(
                "feature width {} does not match trained width {}",
                x.n_cols(),
                self.n_features
            )));
        }
        let mut preds = self.predict_batch(x);
        for _ in 0..rounds {
            self.boost_round(x, y, &mut preds);
        }
        Ok(())
    }

    /// Fit one more tree and update `preds` in place
    pub(crate) fn boost_round(&mut self, x: &FeatureMatrix, y: &[f64], preds: &mut [f64]) {
        let round = self.trees.len() as u64;
        let mut rng = StdRng::seed_from_u64(self.params.seed ^ round);

        let grad: Vec<f64> = preds.iter().zip(y).map(|(p, t)| p - t).collect();
        let hess = vec![1.0; y.len()];

        let rows = sample_indices(&mut rng, x.n_rows(), self.params.subsample);
        let features = sample_indices(&mut rng, x.n_cols(), self.params.colsample_bytree);

        let tree = RegressionTree::fit_gradients(x, &grad, &hess, &rows, &features, &self.params.tree_params());
        for (i, p) in preds.iter_mut().enumerate() {
            *p += tree.predict_row(x.row(i));
        }
        self.trees.push(tree);
    }

    /// Most recently appended tree
    pub(crate) fn last_tree(&self) -> Option<&RegressionTree> {
        self.trees.last()
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }

    pub fn predict_batch(&self, x: &FeatureMatrix) -> Vec<f64> {
        (0..x.n_rows()).map(|i| self.predict_row(x.row(i))).collect()
    }

    pub fn params(&self) -> &BoosterParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    /// Structural check for ensembles read back from disk
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if !self.base_score.is_finite() {
            return Err(EngineError::Configuration("non-finite base score".to_string()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            if !tree.is_well_formed() || tree.max_feature_index().map_or(false, |f| f >= self.n_features) {
                return Err(EngineError::Configuration(format!("tree {i} is malformed")));
            }
        }
        Ok(())
    }
}

impl Regressor for GradientBoostedRegressor {
    fn predict(&self, features: &[f64]) -> f64 {
        self.predict_row(features)
    }
}

fn check_training_shape(x: &FeatureMatrix, y: &[f64]) -> Result<()> {
    if x.is_empty() {
        return Err(EngineError::Configuration("no training rows".to_string()));
    }
    if x.n_rows() != y.len() {
        return Err(EngineError::Configuration(format!(
            "{} feature rows but {} labels",
            x.n_rows(),
            y.len()
        )));
    }
    Ok(())
}

/// Sorted sample of `round(n * fraction)` indices (at least one)
fn sample_indices(rng: &mut StdRng, n: usize, fraction: f64) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let k = ((n as f64 * fraction).round() as usize).clamp(1, n);
    if k == n {
        return (0..n).collect();
    }
    let mut picked = sample(rng, n, k).into_vec();
    picked.sort_unstable();
    picked
}
