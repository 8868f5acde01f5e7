//! Learning algorithms behind narrow fit/predict seams
//!
//! The inference pipeline only sees the [`Regressor`] and [`OutlierDetector`]
//! traits, so any concrete algorithm can back each slot:
//! - [`GradientBoostedRegressor`]: second-order boosted trees with continuation
//! - [`RegressionTree`]: CART regression tree (also the booster's base learner)
//! - [`IsolationForest`]: unsupervised outlier detection
//! - [`grid_search`]: exhaustive search with k-fold CV and early stopping

mod cv;
mod gbdt;
mod isolation;
mod metrics;
mod tree;

pub use cv::{cross_validate, grid_search, CvConfig, CvOutcome, GridPoint, GridSearchOutcome, ParamGrid};
pub use gbdt::{BoosterParams, GradientBoostedRegressor};
pub use isolation::{IsolationForest, IsolationForestParams};
pub use metrics::{quantile, r2_score, rmse};
pub use tree::{RegressionTree, TreeNode, TreeParams};

use serde::{Deserialize, Serialize};

/// Trait for models producing a continuous prediction from a feature vector
pub trait Regressor: Send + Sync {
    fn predict(&self, features: &[f64]) -> f64;
}

/// Trait for binary inlier/outlier classification of a feature vector
pub trait OutlierDetector: Send + Sync {
    fn is_outlier(&self, features: &[f64]) -> bool;
}

/// Dense row-major matrix of transformed features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    n_cols: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    pub fn new(n_cols: usize) -> Self {
        Self {
            n_cols,
            data: Vec::new(),
        }
    }

    pub fn with_capacity(n_cols: usize, rows: usize) -> Self {
        Self {
            n_cols,
            data: Vec::with_capacity(n_cols * rows),
        }
    }

    /// Build from rows that all have the same width
    pub fn from_rows(n_cols: usize, rows: &[Vec<f64>]) -> Self {
        let mut matrix = Self::with_capacity(n_cols, rows.len());
        for row in rows {
            matrix.push_row(row);
        }
        matrix
    }

    /// Append a row; its width must match the matrix
    pub fn push_row(&mut self, row: &[f64]) {
        assert_eq!(row.len(), self.n_cols, "row width does not match matrix");
        self.data.extend_from_slice(row);
    }

    pub fn n_rows(&self) -> usize {
        if self.n_cols == 0 {
            0
        } else {
            self.data.len() / self.n_cols
        }
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n_cols + j]
    }

    /// Copy out the given rows, in order
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let mut out = Self::with_capacity(self.n_cols, rows.len());
        for &i in rows {
            out.push_row(self.row(i));
        }
        out
    }
}
