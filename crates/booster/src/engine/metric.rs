//! Evaluation metrics over transformed predictions.

use super::objective::{group_bounds, row_weight};
use crate::data::DMatrix;
use crate::native::{NativeError, NativeResult};

const EPS: f64 = 1e-15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Metric {
    Rmse,
    Mae,
    LogLoss,
    Error,
    Auc,
    MLogLoss,
    MError,
    Map,
}

impl Metric {
    pub fn parse(name: &str) -> NativeResult<Self> {
        match name {
            "rmse" => Ok(Self::Rmse),
            "mae" => Ok(Self::Mae),
            "logloss" => Ok(Self::LogLoss),
            "error" => Ok(Self::Error),
            "auc" => Ok(Self::Auc),
            "mlogloss" => Ok(Self::MLogLoss),
            "merror" => Ok(Self::MError),
            "map" => Ok(Self::Map),
            other => Err(NativeError::new(format!("Unknown metric function {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rmse => "rmse",
            Self::Mae => "mae",
            Self::LogLoss => "logloss",
            Self::Error => "error",
            Self::Auc => "auc",
            Self::MLogLoss => "mlogloss",
            Self::MError => "merror",
            Self::Map => "map",
        }
    }

    fn is_multiclass(&self) -> bool {
        matches!(self, Self::MLogLoss | Self::MError)
    }

    /// Evaluate `preds` (row-major `[n_rows, n_groups]`) against the labels of `dmat`.
    ///
    /// Returns NaN when the metric is undefined for the data, e.g. AUC with a
    /// single class.
    pub fn eval(&self, preds: &[f32], n_groups: usize, dmat: &DMatrix) -> NativeResult<f64> {
        let labels = dmat.labels();
        let n_rows = dmat.n_rows();
        if labels.len() != n_rows {
            return Err(NativeError::new(format!(
                "Metric {} needs one label per row: {} labels for {n_rows} rows.",
                self.name(),
                labels.len()
            )));
        }
        if self.is_multiclass() != (n_groups > 1) {
            return Err(NativeError::new(format!(
                "Metric {} does not support {n_groups} output groups.",
                self.name()
            )));
        }
        if self.is_multiclass() {
            if let Some(bad) = labels.iter().find(|&&y| y < 0.0 || y as usize >= n_groups) {
                return Err(NativeError::new(format!(
                    "Metric {} got label {bad} outside [0, {n_groups}).",
                    self.name()
                )));
            }
        }

        let weighted_mean = |loss: &dyn Fn(usize) -> f64| {
            let (mut sum, mut wsum) = (0.0f64, 0.0f64);
            for i in 0..n_rows {
                let w = f64::from(row_weight(dmat, i));
                sum += loss(i) * w;
                wsum += w;
            }
            if wsum == 0.0 {
                f64::NAN
            } else {
                sum / wsum
            }
        };
        let y = |i: usize| f64::from(labels[i]);
        let p = |i: usize| f64::from(preds[i]);

        let value = match self {
            Self::Rmse => weighted_mean(&|i| (p(i) - y(i)).powi(2)).sqrt(),
            Self::Mae => weighted_mean(&|i| (p(i) - y(i)).abs()),
            Self::LogLoss => weighted_mean(&|i| {
                let q = p(i).clamp(EPS, 1.0 - EPS);
                -(y(i) * q.ln() + (1.0 - y(i)) * (1.0 - q).ln())
            }),
            Self::Error => weighted_mean(&|i| {
                let predicted = if p(i) > 0.5 { 1.0 } else { 0.0 };
                if predicted == y(i) {
                    0.0
                } else {
                    1.0
                }
            }),
            Self::MLogLoss => weighted_mean(&|i| {
                let k = labels[i] as usize;
                let q = f64::from(preds[i * n_groups + k]).max(EPS);
                -q.ln()
            }),
            Self::MError => weighted_mean(&|i| {
                let row = &preds[i * n_groups..(i + 1) * n_groups];
                let best = row
                    .iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |acc, (k, &v)| if v > acc.1 { (k, v) } else { acc })
                    .0;
                if best == labels[i] as usize {
                    0.0
                } else {
                    1.0
                }
            }),
            Self::Auc => auc(preds, labels, |i| row_weight(dmat, i)),
            Self::Map => mean_average_precision(preds, labels, &group_bounds(dmat))?,
        };
        Ok(value)
    }
}

/// Weighted ROC AUC with ties credited half.
fn auc(preds: &[f32], labels: &[f32], weight: impl Fn(usize) -> f32) -> f64 {
    let mut order: Vec<usize> = (0..preds.len()).collect();
    order.sort_by(|&a, &b| preds[b].total_cmp(&preds[a]));

    let (mut tp, mut fp, mut area) = (0.0f64, 0.0f64, 0.0f64);
    let mut i = 0;
    while i < order.len() {
        let (tp_prev, fp_prev) = (tp, fp);
        let score = preds[order[i]];
        while i < order.len() && preds[order[i]] == score {
            let idx = order[i];
            let w = f64::from(weight(idx));
            if labels[idx] > 0.5 {
                tp += w;
            } else {
                fp += w;
            }
            i += 1;
        }
        area += (fp - fp_prev) * (tp + tp_prev) / 2.0;
    }

    if tp == 0.0 || fp == 0.0 {
        f64::NAN
    } else {
        area / (tp * fp)
    }
}

/// Mean over query groups of average precision; groups without relevant items score 1.
fn mean_average_precision(preds: &[f32], labels: &[f32], bounds: &[usize]) -> NativeResult<f64> {
    let end = bounds.last().copied().unwrap_or(0);
    if end != preds.len() || end != labels.len() {
        return Err(NativeError::new(format!(
            "Metric map: query groups cover {end} rows but {} predictions were given.",
            preds.len()
        )));
    }
    let groups: Vec<f64> = bounds
        .windows(2)
        .map(|w| {
            let mut order: Vec<usize> = (w[0]..w[1]).collect();
            order.sort_by(|&a, &b| preds[b].total_cmp(&preds[a]));
            let (mut hits, mut sum) = (0.0f64, 0.0f64);
            for (rank, &idx) in order.iter().enumerate() {
                if labels[idx] > 0.0 {
                    hits += 1.0;
                    sum += hits / (rank + 1) as f64;
                }
            }
            if hits == 0.0 {
                1.0
            } else {
                sum / hits
            }
        })
        .collect();
    Ok(if groups.is_empty() {
        f64::NAN
    } else {
        groups.iter().sum::<f64>() / groups.len() as f64
    })
}
