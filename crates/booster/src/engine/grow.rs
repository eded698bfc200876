//! Exact greedy depth-wise tree growth.
//!
//! Every node enumerates all distinct feature values of the rows it holds.
//! Missing values are tried on both sides and the better direction becomes
//! the node's default branch.

use rayon::prelude::*;

use super::tree::{NodeId, RegTree};
use crate::data::DMatrix;

/// Smallest gain treated as an improvement.
const RT_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub(crate) struct GrowParams {
    pub eta: f32,
    /// `0` means unlimited.
    pub max_depth: u32,
    pub lambda: f32,
    pub gamma: f32,
    pub min_child_weight: f32,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: u32,
    threshold: f32,
    default_left: bool,
    gain: f64,
}

impl SplitCandidate {
    /// Higher gain wins; ties go to the lower feature index.
    fn better(self, other: Self) -> Self {
        if other.gain > self.gain || (other.gain == self.gain && other.feature < self.feature) {
            other
        } else {
            self
        }
    }
}

#[inline]
fn score(g: f64, h: f64, lambda: f64) -> f64 {
    let denom = h + lambda;
    if denom <= 0.0 {
        0.0
    } else {
        g * g / denom
    }
}

#[inline]
fn weight(g: f64, h: f64, lambda: f64) -> f64 {
    let denom = h + lambda;
    if denom <= 0.0 {
        0.0
    } else {
        -g / denom
    }
}

/// Grow one tree on `rows` from per-row gradients of a single output group.
pub(crate) fn grow_tree(
    dmat: &DMatrix,
    grad: &[f32],
    hess: &[f32],
    rows: Vec<u32>,
    params: &GrowParams,
) -> RegTree {
    let lambda = f64::from(params.lambda);
    let mut tree = RegTree::leaf(0.0, 0.0);
    let mut stack: Vec<(NodeId, Vec<u32>, u32)> = vec![(0, rows, 0)];

    while let Some((node, rows, depth)) = stack.pop() {
        let (g, h) = rows.iter().fold((0.0f64, 0.0f64), |(g, h), &r| {
            (g + f64::from(grad[r as usize]), h + f64::from(hess[r as usize]))
        });
        let value = (weight(g, h, lambda) * f64::from(params.eta)) as f32;
        tree.set_leaf(node, value, h as f32);

        if params.max_depth > 0 && depth >= params.max_depth {
            continue;
        }
        let Some(split) = best_split(dmat, grad, hess, &rows, g, h, params) else {
            continue;
        };

        let (left_rows, right_rows): (Vec<u32>, Vec<u32>) = rows.iter().partition(|&&r| {
            let v = dmat.row(r as usize)[split.feature as usize];
            if v.is_nan() {
                split.default_left
            } else {
                v < split.threshold
            }
        });
        let (left, right) = tree.expand(
            node,
            split.feature,
            split.threshold,
            split.default_left,
            split.gain as f32,
        );
        stack.push((right, right_rows, depth + 1));
        stack.push((left, left_rows, depth + 1));
    }

    tree
}

fn best_split(
    dmat: &DMatrix,
    grad: &[f32],
    hess: &[f32],
    rows: &[u32],
    g: f64,
    h: f64,
    params: &GrowParams,
) -> Option<SplitCandidate> {
    if rows.len() < 2 {
        return None;
    }
    let best = (0..dmat.n_cols() as u32)
        .into_par_iter()
        .filter_map(|feature| best_split_for_feature(dmat, grad, hess, rows, feature, g, h, params))
        .reduce_with(SplitCandidate::better)?;

    (best.gain > f64::from(params.gamma) && best.gain > RT_EPS).then_some(best)
}

#[allow(clippy::too_many_arguments)]
fn best_split_for_feature(
    dmat: &DMatrix,
    grad: &[f32],
    hess: &[f32],
    rows: &[u32],
    feature: u32,
    g: f64,
    h: f64,
    params: &GrowParams,
) -> Option<SplitCandidate> {
    let lambda = f64::from(params.lambda);
    let min_child_weight = f64::from(params.min_child_weight);
    let parent = score(g, h, lambda);

    let mut entries: Vec<(f32, u32)> = rows
        .iter()
        .filter_map(|&r| {
            let v = dmat.row(r as usize)[feature as usize];
            (!v.is_nan()).then_some((v, r))
        })
        .collect();
    if entries.len() < 2 {
        return None;
    }
    entries.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (present_g, present_h) = entries.iter().fold((0.0f64, 0.0f64), |(pg, ph), &(_, r)| {
        (pg + f64::from(grad[r as usize]), ph + f64::from(hess[r as usize]))
    });
    let (missing_g, missing_h) = (g - present_g, h - present_h);
    let has_missing = entries.len() < rows.len();

    let mut best: Option<SplitCandidate> = None;
    let (mut gl, mut hl) = (0.0f64, 0.0f64);
    for pair in entries.windows(2) {
        let ((v, r), (next, _)) = (pair[0], pair[1]);
        gl += f64::from(grad[r as usize]);
        hl += f64::from(hess[r as usize]);
        if v == next {
            continue;
        }
        let mut threshold = v + (next - v) / 2.0;
        if threshold <= v {
            threshold = next;
        }

        let directions: &[bool] = if has_missing { &[true, false] } else { &[true] };
        for &default_left in directions {
            let (left_g, left_h) = if default_left {
                (gl + missing_g, hl + missing_h)
            } else {
                (gl, hl)
            };
            let (right_g, right_h) = (g - left_g, h - left_h);
            if left_h < min_child_weight || right_h < min_child_weight {
                continue;
            }
            let gain = score(left_g, left_h, lambda) + score(right_g, right_h, lambda) - parent;
            let candidate = SplitCandidate {
                feature,
                threshold,
                default_left,
                gain,
            };
            best = Some(match best {
                Some(current) if current.gain >= gain => current,
                _ => candidate,
            });
        }
    }
    best
}
