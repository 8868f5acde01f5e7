//! K-fold cross-validation with early stopping, and grid search on top of it

use super::gbdt::{BoosterParams, GradientBoostedRegressor};
use super::metrics::rmse;
use super::FeatureMatrix;
use crate::error::{EngineError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Cross-validation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvConfig {
    pub nfold: usize,
    /// Upper bound on boosting rounds
    pub max_rounds: usize,
    /// Stop when the mean test RMSE has not improved for this many rounds
    pub early_stopping_rounds: usize,
    pub seed: u64,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            nfold: 5,
            max_rounds: 200,
            early_stopping_rounds: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvOutcome {
    /// Number of rounds up to and including the best one
    pub best_rounds: usize,
    /// Mean test RMSE across folds at the best round
    pub best_score: f64,
    /// Mean test RMSE per evaluated round
    pub history: Vec<f64>,
}

struct Fold {
    model: GradientBoostedRegressor,
    train_x: FeatureMatrix,
    train_y: Vec<f64>,
    train_pred: Vec<f64>,
    test_x: FeatureMatrix,
    test_y: Vec<f64>,
    test_pred: Vec<f64>,
}

impl Fold {
    fn advance(&mut self) -> f64 {
        self.model
            .boost_round(&self.train_x, &self.train_y, &mut self.train_pred);
        if let Some(tree) = self.model.last_tree() {
            for (i, p) in self.test_pred.iter_mut().enumerate() {
                *p += tree.predict_row(self.test_x.row(i));
            }
        }
        rmse(&self.test_y, &self.test_pred)
    }
}

/// Evaluate `params` with k-fold CV, boosting every fold in lockstep
pub fn cross_validate(
    params: &BoosterParams,
    x: &FeatureMatrix,
    y: &[f64],
    config: &CvConfig,
) -> Result<CvOutcome> {
    let n = x.n_rows();
    if config.nfold < 2 {
        return Err(EngineError::Configuration(format!(
            "nfold must be at least 2, got {}",
            config.nfold
        )));
    }
    if n != y.len() {
        return Err(EngineError::Configuration(format!(
            "{} feature rows but {} labels",
            n,
            y.len()
        )));
    }
    if n < config.nfold * 2 {
        return Err(EngineError::Configuration(format!(
            "{} rows are too few for {}-fold cross-validation",
            n, config.nfold
        )));
    }
    if config.max_rounds == 0 {
        return Err(EngineError::Configuration("max_rounds must be positive".to_string()));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(config.seed));

    let mut folds = Vec::with_capacity(config.nfold);
    for f in 0..config.nfold {
        let start = f * n / config.nfold;
        let end = (f + 1) * n / config.nfold;
        let test_idx = &order[start..end];
        let train_idx: Vec<usize> = order[..start].iter().chain(&order[end..]).copied().collect();

        let train_x = x.select_rows(&train_idx);
        let train_y: Vec<f64> = train_idx.iter().map(|&i| y[i]).collect();
        let test_x = x.select_rows(test_idx);
        let test_y: Vec<f64> = test_idx.iter().map(|&i| y[i]).collect();

        let model = GradientBoostedRegressor::initialise(params.clone(), &train_x, &train_y)?;
        let base = model.base_score();
        folds.push(Fold {
            train_pred: vec![base; train_y.len()],
            test_pred: vec![base; test_y.len()],
            model,
            train_x,
            train_y,
            test_x,
            test_y,
        });
    }

    let mut history = Vec::new();
    let mut best_round = 0;
    let mut best_score = f64::INFINITY;

    for round in 0..config.max_rounds {
        let mean = folds.iter_mut().map(Fold::advance).sum::<f64>() / folds.len() as f64;
        history.push(mean);

        if mean < best_score {
            best_score = mean;
            best_round = round;
        } else if round - best_round >= config.early_stopping_rounds {
            debug!(round, best_round, "Early stopping");
            break;
        }
    }

    Ok(CvOutcome {
        best_rounds: best_round + 1,
        best_score,
        history,
    })
}

/// Candidate values per hyperparameter; the search covers their product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamGrid {
    pub eta: Vec<f64>,
    pub max_depth: Vec<usize>,
    pub subsample: Vec<f64>,
    pub colsample_bytree: Vec<f64>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            eta: vec![0.01, 0.05, 0.1],
            max_depth: vec![4, 6, 8],
            subsample: vec![0.7, 0.9],
            colsample_bytree: vec![0.6, 0.8],
        }
    }
}

impl ParamGrid {
    pub fn len(&self) -> usize {
        self.eta.len() * self.max_depth.len() * self.subsample.len() * self.colsample_bytree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand into concrete parameter sets, eta outermost and colsample innermost
    pub fn points(&self, base: &BoosterParams) -> Vec<BoosterParams> {
        let mut out = Vec::with_capacity(self.len());
        for &eta in &self.eta {
            for &max_depth in &self.max_depth {
                for &subsample in &self.subsample {
                    for &colsample_bytree in &self.colsample_bytree {
                        out.push(BoosterParams {
                            eta,
                            max_depth,
                            subsample,
                            colsample_bytree,
                            ..base.clone()
                        });
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Position in [`ParamGrid::points`] order
    pub index: usize,
    pub params: BoosterParams,
    pub rounds: usize,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSearchOutcome {
    pub best: GridPoint,
    pub evaluated: Vec<GridPoint>,
}

/// Cross-validate every grid point and keep the lowest mean test RMSE.
///
/// Ties keep the earlier point.
pub fn grid_search(
    grid: &ParamGrid,
    base: &BoosterParams,
    x: &FeatureMatrix,
    y: &[f64],
    config: &CvConfig,
) -> Result<GridSearchOutcome> {
    if grid.is_empty() {
        return Err(EngineError::Configuration(
            "hyperparameter grid has no points".to_string(),
        ));
    }

    let mut evaluated: Vec<GridPoint> = Vec::with_capacity(grid.len());
    let mut best: Option<usize> = None;

    for (index, params) in grid.points(base).into_iter().enumerate() {
        let outcome = cross_validate(&params, x, y, config)?;
        debug!(
            index,
            eta = params.eta,
            max_depth = params.max_depth,
            subsample = params.subsample,
            colsample_bytree = params.colsample_bytree,
            rounds = outcome.best_rounds,
            score = outcome.best_score,
            "Grid point evaluated"
        );
        if best.map_or(true, |b| outcome.best_score < evaluated[b].score) {
            best = Some(evaluated.len());
        }
        evaluated.push(GridPoint {
            index,
            params,
            rounds: outcome.best_rounds,
            score: outcome.best_score,
        });
    }

    let best = best
        .map(|b| evaluated[b].clone())
        .ok_or_else(|| EngineError::Configuration("grid search produced no result".to_string()))?;
    Ok(GridSearchOutcome { best, evaluated })
}
