//! Regression trees
//!
//! Trees are grown by exact greedy search over first/second order gradient
//! statistics. With unit hessians, no regularisation and no shrinkage this is
//! plain CART with squared error (leaf = mean target); the booster uses the
//! same builder with λ and η.

use super::{FeatureMatrix, Regressor};
use serde::{Deserialize, Serialize};

/// Minimum gain for a split to be kept
const MIN_SPLIT_GAIN: f64 = 1e-12;

/// Growth parameters for a single tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    /// L2 regularisation on leaf weights
    pub lambda: f64,
    /// Minimum hessian sum in each child
    pub min_child_weight: f64,
    /// Shrinkage applied to leaf values
    pub learning_rate: f64,
}

impl TreeParams {
    /// Squared-error CART with the given depth limit
    pub fn cart(max_depth: usize) -> Self {
        Self {
            max_depth,
            lambda: 0.0,
            min_child_weight: 1.0,
            learning_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    /// Rows with `x[feature] < threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Fit a squared-error regression tree on targets `y`
    pub fn fit_cart(x: &FeatureMatrix, y: &[f64], max_depth: usize) -> Self {
        let grad: Vec<f64> = y.iter().map(|v| -v).collect();
        let hess = vec![1.0; y.len()];
        let rows: Vec<usize> = (0..y.len()).collect();
        let features: Vec<usize> = (0..x.n_cols()).collect();
        Self::fit_gradients(x, &grad, &hess, &rows, &features, &TreeParams::cart(max_depth))
    }

    /// Grow a tree over `rows`, considering only `features` for splits
    pub fn fit_gradients(
        x: &FeatureMatrix,
        grad: &[f64],
        hess: &[f64],
        rows: &[usize],
        features: &[usize],
        params: &TreeParams,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        if rows.is_empty() {
            tree.nodes.push(TreeNode::Leaf { value: 0.0 });
            return tree;
        }
        tree.grow(x, grad, hess, rows.to_vec(), features, params, 0);
        tree
    }

    #[allow(clippy::too_many_arguments)]
    fn grow(
        &mut self,
        x: &FeatureMatrix,
        grad: &[f64],
        hess: &[f64],
        rows: Vec<usize>,
        features: &[usize],
        params: &TreeParams,
        depth: usize,
    ) -> usize {
        let g: f64 = rows.iter().map(|&i| grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| hess[i]).sum();
        let index = self.nodes.len();
        self.nodes.push(TreeNode::Leaf {
            value: leaf_weight(g, h, params),
        });

        if depth >= params.max_depth || rows.len() < 2 {
            return index;
        }

        let best = match best_split(x, grad, hess, &rows, features, g, h, params) {
            Some(best) => best,
            None => return index,
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| x.get(i, best.feature) < best.threshold);

        let left = self.grow(x, grad, hess, left_rows, features, params, depth + 1);
        let right = self.grow(x, grad, hess, right_rows, features, params, depth + 1);
        self.nodes[index] = TreeNode::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        index
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] < *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn predict(&self, x: &FeatureMatrix) -> Vec<f64> {
        (0..x.n_rows()).map(|i| self.predict_row(x.row(i))).collect()
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }

    /// Depth of the deepest leaf (a single leaf has depth 0)
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match &nodes[idx] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Largest feature index referenced by a split, if any
    pub fn max_feature_index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                TreeNode::Split { feature, .. } => Some(*feature),
                TreeNode::Leaf { .. } => None,
            })
            .max()
    }

    /// Structural check for trees read back from disk
    pub fn is_well_formed(&self) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().enumerate().all(|(i, n)| match n {
                TreeNode::Split {
                    left,
                    right,
                    threshold,
                    ..
                } => *left > i && *right > i && *left < self.nodes.len() && *right < self.nodes.len() && threshold.is_finite(),
                TreeNode::Leaf { value } => value.is_finite(),
            })
    }
}

impl Regressor for RegressionTree {
    fn predict(&self, features: &[f64]) -> f64 {
        self.predict_row(features)
    }
}

fn leaf_weight(g: f64, h: f64, params: &TreeParams) -> f64 {
    let denom = h + params.lambda;
    if denom <= 0.0 {
        return 0.0;
    }
    -g / denom * params.learning_rate
}

fn score(g: f64, h: f64, lambda: f64) -> f64 {
    let denom = h + lambda;
    if denom <= 0.0 {
        0.0
    } else {
        g * g / denom
    }
}

#[allow(clippy::too_many_arguments)]
fn best_split(
    x: &FeatureMatrix,
    grad: &[f64],
    hess: &[f64],
    rows: &[usize],
    features: &[usize],
    g_total: f64,
    h_total: f64,
    params: &TreeParams,
) -> Option<SplitCandidate> {
    let parent = score(g_total, h_total, params.lambda);
    let mut best: Option<SplitCandidate> = None;
    let mut sorted = rows.to_vec();

    for &feature in features {
        sorted.sort_by(|&a, &b| x.get(a, feature).total_cmp(&x.get(b, feature)));

        let mut gl = 0.0;
        let mut hl = 0.0;
        for pair in sorted.windows(2) {
            let (cur, next) = (pair[0], pair[1]);
            gl += grad[cur];
            hl += hess[cur];

            let (v_cur, v_next) = (x.get(cur, feature), x.get(next, feature));
            if v_cur >= v_next {
                continue;
            }
            let gr = g_total - gl;
            let hr = h_total - hl;
            if hl < params.min_child_weight || hr < params.min_child_weight {
                continue;
            }

            let gain = 0.5 * (score(gl, hl, params.lambda) + score(gr, hr, params.lambda) - parent);
            if gain > MIN_SPLIT_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: v_cur + (v_next - v_cur) / 2.0,
                    gain,
                });
            }
        }
    }

    best
}
