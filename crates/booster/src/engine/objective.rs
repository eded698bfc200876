//! Built-in objectives: gradients, output transforms and label checks.
//!
//! Margins, gradients and hessians are row-major `[n_rows, n_groups]`.

use crate::data::DMatrix;
use crate::native::{NativeError, NativeResult};

const MIN_HESS: f32 = 1e-16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectiveKind {
    SquaredError,
    RegLogistic,
    BinaryLogistic,
    BinaryLogitRaw,
    MultiSoftprob,
    MultiSoftmax,
    RankPairwise,
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// In-place softmax over one row of margins.
fn softmax(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in row.iter_mut() {
        *v /= sum;
    }
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
        .0
}

/// Start offsets of each query group; the whole matrix is one group when unset.
pub(crate) fn group_bounds(dmat: &DMatrix) -> Vec<usize> {
    let mut bounds = vec![0usize];
    if dmat.groups().is_empty() {
        bounds.push(dmat.n_rows());
    } else {
        for &size in dmat.groups() {
            bounds.push(bounds[bounds.len() - 1] + size as usize);
        }
    }
    bounds
}

/// Check metadata shapes against the matrix before training or evaluating on it.
pub(crate) fn validate_info(dmat: &DMatrix, n_groups: usize) -> NativeResult<()> {
    let n_rows = dmat.n_rows();
    if !dmat.groups().is_empty() {
        let total: u64 = dmat.groups().iter().map(|&g| u64::from(g)).sum();
        if total != n_rows as u64 {
            return Err(NativeError::new(format!(
                "Invalid group structure. Number of rows obtained from groups ({total}) \
                 doesn't equal to actual number of rows given by data ({n_rows})."
            )));
        }
    }
    if dmat.labels().len() != n_rows {
        return Err(NativeError::new(format!(
            "Size of labels ({}) must match the number of rows ({n_rows}).",
            dmat.labels().len()
        )));
    }
    let weights = dmat.weights().len();
    if weights != 0 && weights != n_rows && weights != dmat.groups().len() {
        return Err(NativeError::new(format!(
            "Size of weights ({weights}) must match the number of rows ({n_rows}) or groups ({}).",
            dmat.groups().len()
        )));
    }
    let margins = dmat.base_margin().len();
    if margins != 0 && margins != n_rows * n_groups {
        return Err(NativeError::new(format!(
            "Size of base margin ({margins}) must be rows x groups ({}).",
            n_rows * n_groups
        )));
    }
    Ok(())
}

/// Weight of row `i`, 1 when the matrix has no per-row weights.
#[inline]
pub(crate) fn row_weight(dmat: &DMatrix, i: usize) -> f32 {
    if dmat.weights().len() == dmat.n_rows() {
        dmat.weights()[i]
    } else {
        1.0
    }
}

impl ObjectiveKind {
    pub fn parse(name: &str) -> NativeResult<Self> {
        match name {
            "reg:squarederror" | "reg:linear" => Ok(Self::SquaredError),
            "reg:logistic" => Ok(Self::RegLogistic),
            "binary:logistic" => Ok(Self::BinaryLogistic),
            "binary:logitraw" => Ok(Self::BinaryLogitRaw),
            "multi:softprob" => Ok(Self::MultiSoftprob),
            "multi:softmax" => Ok(Self::MultiSoftmax),
            "rank:pairwise" => Ok(Self::RankPairwise),
            other => Err(NativeError::new(format!("Unknown objective function: '{other}'"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SquaredError => "reg:squarederror",
            Self::RegLogistic => "reg:logistic",
            Self::BinaryLogistic => "binary:logistic",
            Self::BinaryLogitRaw => "binary:logitraw",
            Self::MultiSoftprob => "multi:softprob",
            Self::MultiSoftmax => "multi:softmax",
            Self::RankPairwise => "rank:pairwise",
        }
    }

    pub fn is_multiclass(&self) -> bool {
        matches!(self, Self::MultiSoftprob | Self::MultiSoftmax)
    }

    fn is_logistic(&self) -> bool {
        matches!(self, Self::RegLogistic | Self::BinaryLogistic | Self::BinaryLogitRaw)
    }

    pub fn default_metric(&self) -> &'static str {
        match self {
            Self::SquaredError | Self::RegLogistic => "rmse",
            Self::BinaryLogistic | Self::BinaryLogitRaw => "logloss",
            Self::MultiSoftprob => "mlogloss",
            Self::MultiSoftmax => "merror",
            Self::RankPairwise => "map",
        }
    }

    /// Convert the probability-space `base_score` to a margin.
    pub fn prob_to_margin(&self, base_score: f32) -> NativeResult<f32> {
        if !self.is_logistic() {
            return Ok(base_score);
        }
        if !(base_score > 0.0 && base_score < 1.0) {
            return Err(NativeError::new(format!(
                "base_score must be in (0,1) for logistic loss, got: {base_score}"
            )));
        }
        Ok((base_score / (1.0 - base_score)).ln())
    }

    /// Check labels against what the objective accepts.
    pub fn validate_labels(&self, labels: &[f32], n_groups: usize) -> NativeResult<()> {
        if self.is_logistic() {
            if let Some(bad) = labels.iter().find(|&&y| !(0.0..=1.0).contains(&y)) {
                return Err(NativeError::new(format!(
                    "label must be in [0,1] for logistic regression, got: {bad}"
                )));
            }
        }
        if self.is_multiclass() {
            if n_groups < 2 {
                return Err(NativeError::new(
                    "num_class must be set to at least 2 for multi-class objectives",
                ));
            }
            if let Some(bad) = labels
                .iter()
                .find(|&&y| y < 0.0 || y.fract() != 0.0 || y as usize >= n_groups)
            {
                return Err(NativeError::new(format!(
                    "SoftmaxMultiClassObj: label must be in [0, num_class), got: {bad}"
                )));
            }
        }
        Ok(())
    }

    /// Fill gradients and hessians for the current margins.
    pub fn gradient(
        &self,
        margins: &[f32],
        dmat: &DMatrix,
        n_groups: usize,
        grad: &mut [f32],
        hess: &mut [f32],
    ) {
        let labels = dmat.labels();
        match self {
            Self::SquaredError => {
                for i in 0..labels.len() {
                    let w = row_weight(dmat, i);
                    grad[i] = (margins[i] - labels[i]) * w;
                    hess[i] = w;
                }
            }
            Self::RegLogistic | Self::BinaryLogistic | Self::BinaryLogitRaw => {
                for i in 0..labels.len() {
                    let w = row_weight(dmat, i);
                    let p = sigmoid(margins[i]);
                    grad[i] = (p - labels[i]) * w;
                    hess[i] = (p * (1.0 - p)).max(MIN_HESS) * w;
                }
            }
            Self::MultiSoftprob | Self::MultiSoftmax => {
                let mut probs = vec![0.0f32; n_groups];
                for (i, &label) in labels.iter().enumerate() {
                    let w = row_weight(dmat, i);
                    probs.copy_from_slice(&margins[i * n_groups..(i + 1) * n_groups]);
                    softmax(&mut probs);
                    for (k, &p) in probs.iter().enumerate() {
                        let target = if label as usize == k { 1.0 } else { 0.0 };
                        grad[i * n_groups + k] = (p - target) * w;
                        hess[i * n_groups + k] = (2.0 * p * (1.0 - p)).max(MIN_HESS) * w;
                    }
                }
            }
            Self::RankPairwise => {
                grad.fill(0.0);
                hess.fill(0.0);
                let bounds = group_bounds(dmat);
                let per_group_weights = dmat.weights().len() == dmat.groups().len()
                    && !dmat.groups().is_empty();
                for (q, window) in bounds.windows(2).enumerate() {
                    let w = if per_group_weights { dmat.weights()[q] } else { 1.0 };
                    for i in window[0]..window[1] {
                        for j in window[0]..window[1] {
                            if labels[i] <= labels[j] {
                                continue;
                            }
                            // i should rank above j.
                            let rho = sigmoid(margins[j] - margins[i]);
                            let h = (rho * (1.0 - rho)).max(MIN_HESS) * w;
                            grad[i] -= rho * w;
                            grad[j] += rho * w;
                            hess[i] += h;
                            hess[j] += h;
                        }
                    }
                }
                for h in hess.iter_mut() {
                    *h = h.max(MIN_HESS);
                }
            }
        }
    }

    /// Transform margins for metric evaluation (probabilities for classifiers).
    pub fn eval_transform(&self, margins: &mut [f32], n_groups: usize) {
        match self {
            Self::RegLogistic | Self::BinaryLogistic => {
                for m in margins.iter_mut() {
                    *m = sigmoid(*m);
                }
            }
            Self::MultiSoftprob | Self::MultiSoftmax => {
                for row in margins.chunks_mut(n_groups.max(1)) {
                    softmax(row);
                }
            }
            Self::SquaredError | Self::BinaryLogitRaw | Self::RankPairwise => {}
        }
    }

    /// Transform margins for value prediction.
    ///
    /// `multi:softmax` collapses each row to the winning class index.
    pub fn output_transform(&self, mut margins: Vec<f32>, n_groups: usize) -> Vec<f32> {
        match self {
            Self::MultiSoftmax => margins
                .chunks(n_groups.max(1))
                .map(|row| argmax(row) as f32)
                .collect(),
            _ => {
                self.eval_transform(&mut margins, n_groups);
                margins
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn matrix(rows: usize, labels: Vec<f32>) -> DMatrix {
        DMatrix::from_dense(&vec![0.0; rows], rows, 1, f32::NAN)
            .unwrap()
            .with_labels(labels)
    }

    #[test]
    fn squared_error_gradient() {
        let dmat = matrix(2, vec![1.0, 3.0]);
        let (mut g, mut h) = (vec![0.0; 2], vec![0.0; 2]);
        ObjectiveKind::SquaredError.gradient(&[0.5, 0.5], &dmat, 1, &mut g, &mut h);
        assert_eq!(g, vec![-0.5, -2.5]);
        assert_eq!(h, vec![1.0, 1.0]);
    }

    #[test]
    fn logistic_gradient_uses_probability() {
        let dmat = matrix(1, vec![1.0]);
        let (mut g, mut h) = (vec![0.0], vec![0.0]);
        ObjectiveKind::BinaryLogistic.gradient(&[0.0], &dmat, 1, &mut g, &mut h);
        assert_abs_diff_eq!(g[0], -0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(h[0], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn softmax_gradient_sums_to_zero() {
        let dmat = matrix(1, vec![2.0]);
        let (mut g, mut h) = (vec![0.0; 3], vec![0.0; 3]);
        ObjectiveKind::MultiSoftprob.gradient(&[0.1, 0.2, 0.3], &dmat, 3, &mut g, &mut h);
        assert_abs_diff_eq!(g.iter().sum::<f32>(), 0.0, epsilon = 1e-6);
        assert!(g[2] < 0.0);
    }

    #[test]
    fn pairwise_pushes_relevant_items_up() {
        let mut dmat = matrix(2, vec![1.0, 0.0]);
        dmat.set_groups(vec![2]);
        let (mut g, mut h) = (vec![0.0; 2], vec![0.0; 2]);
        ObjectiveKind::RankPairwise.gradient(&[0.0, 0.0], &dmat, 1, &mut g, &mut h);
        assert_abs_diff_eq!(g[0], -0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(g[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn logistic_labels_must_be_probabilities() {
        let err = ObjectiveKind::BinaryLogistic
            .validate_labels(&[0.0, 2.0], 1)
            .unwrap_err();
        assert!(err.message().contains("[0,1]"));
    }

    #[test]
    fn group_sizes_must_cover_rows() {
        let mut dmat = matrix(4, vec![0.0; 4]);
        dmat.set_groups(vec![1, 2]);
        let err = validate_info(&dmat, 1).unwrap_err();
        assert!(err.message().contains("Invalid group structure"));
        dmat.set_groups(vec![1, 3]);
        assert!(validate_info(&dmat, 1).is_ok());
    }

    #[test]
    fn softmax_output_is_class_index() {
        let out = ObjectiveKind::MultiSoftmax.output_transform(vec![0.1, 0.9, 0.0, 2.0, 1.0, 0.0], 3);
        assert_eq!(out, vec![1.0, 0.0]);
    }

    #[test]
    fn logistic_base_score_maps_to_logit() {
        assert_eq!(ObjectiveKind::BinaryLogistic.prob_to_margin(0.5).unwrap(), 0.0);
        assert!(ObjectiveKind::BinaryLogistic.prob_to_margin(1.0).is_err());
        assert_eq!(ObjectiveKind::SquaredError.prob_to_margin(1.5).unwrap(), 1.5);
    }
}
