//! Prediction dispatch: matrix-based and in-place dense.

use std::str::FromStr;
use std::sync::PoisonError;

use bon::Builder;
use ndarray::Array2;

use super::Booster;
use crate::data::DMatrix;
use crate::error::{BoosterError, Result};
use crate::native::{
    DenseInput, NativeError, OUTPUT_MARGIN, PREDICT_MARGIN, PREDICT_VALUE, PRED_CONTRIBS, PRED_LEAF,
};

// =============================================================================
// Options
// =============================================================================

/// Options for matrix-based prediction.
///
/// The flags do not combine: the mask is taken from the last enabled flag
/// in the order margin, leaf, contributions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Builder)]
pub struct PredictOptions {
    /// Raw margins instead of transformed values.
    #[builder(default)]
    pub output_margin: bool,
    /// Number of rounds to use; `0` uses all of them.
    #[builder(default)]
    pub tree_limit: u32,
    /// Leaf index per tree.
    #[builder(default)]
    pub pred_leaf: bool,
    /// Per-feature contributions plus bias.
    #[builder(default)]
    pub pred_contribs: bool,
}

impl PredictOptions {
    /// Engine option mask.
    pub fn option_mask(&self) -> i32 {
        let mut mask = 0;
        if self.output_margin {
            mask = OUTPUT_MARGIN;
        }
        if self.pred_leaf {
            mask = PRED_LEAF;
        }
        if self.pred_contribs {
            mask = PRED_CONTRIBS;
        }
        mask
    }
}

/// Output type for in-place prediction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum PredictionType {
    #[default]
    Value = PREDICT_VALUE,
    Margin = PREDICT_MARGIN,
}

impl TryFrom<i32> for PredictionType {
    type Error = BoosterError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            PREDICT_VALUE => Ok(Self::Value),
            PREDICT_MARGIN => Ok(Self::Margin),
            other => Err(BoosterError::contract(format!(
                "unknown prediction type {other}, expected 0 (value) or 1 (margin)"
            ))),
        }
    }
}

impl FromStr for PredictionType {
    type Err = BoosterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "value" => Ok(Self::Value),
            "margin" => Ok(Self::Margin),
            other => Err(BoosterError::contract(format!(
                "unknown prediction type '{other}', expected 'value' or 'margin'"
            ))),
        }
    }
}

/// Reshape a flat row-major engine output into `[rows, len / rows]`.
pub(crate) fn reshape_rows(raw: Vec<f32>, rows: usize) -> Result<Array2<f32>> {
    if rows == 0 {
        return if raw.is_empty() {
            Ok(Array2::zeros((0, 0)))
        } else {
            Err(NativeError::new(format!("engine returned {} values for 0 rows", raw.len())).into())
        };
    }
    if raw.len() % rows != 0 {
        return Err(NativeError::new(format!(
            "engine returned {} values, not a multiple of {rows} rows",
            raw.len()
        ))
        .into());
    }
    let cols = raw.len() / rows;
    Array2::from_shape_vec((rows, cols), raw)
        .map_err(|e| BoosterError::Native(NativeError::new(e.to_string())))
}

// =============================================================================
// Booster prediction
// =============================================================================

impl Booster {
    /// Transformed predictions over every round.
    pub fn predict(&self, dmat: &DMatrix) -> Result<Array2<f32>> {
        self.predict_with(dmat, PredictOptions::default())
    }

    /// Raw margins over every round.
    pub fn predict_margin(&self, dmat: &DMatrix) -> Result<Array2<f32>> {
        self.predict_with(dmat, PredictOptions::builder().output_margin(true).build())
    }

    /// Transformed predictions over the first `tree_limit` rounds.
    pub fn predict_with_limit(&self, dmat: &DMatrix, tree_limit: u32) -> Result<Array2<f32>> {
        self.predict_with(dmat, PredictOptions::builder().tree_limit(tree_limit).build())
    }

    /// Leaf index per row and tree.
    pub fn predict_leaf(&self, dmat: &DMatrix, tree_limit: u32) -> Result<Array2<f32>> {
        let options = PredictOptions::builder()
            .tree_limit(tree_limit)
            .pred_leaf(true)
            .build();
        self.predict_with(dmat, options)
    }

    /// Feature contributions per row; the last column of each group is the bias.
    pub fn predict_contrib(&self, dmat: &DMatrix, tree_limit: u32) -> Result<Array2<f32>> {
        let options = PredictOptions::builder()
            .tree_limit(tree_limit)
            .pred_leaf(true)
            .pred_contribs(true)
            .build();
        self.predict_with(dmat, options)
    }

    /// Matrix-based prediction.
    ///
    /// Calls through this path run one at a time; they share an output buffer.
    pub fn predict_with(&self, dmat: &DMatrix, options: PredictOptions) -> Result<Array2<f32>> {
        let mask = options.option_mask();
        let mut scratch = self
            .predict_scratch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.with_handle(|api, h| api.booster_predict(h, dmat, mask, options.tree_limit, &mut scratch))?;
        reshape_rows(scratch.clone(), dmat.n_rows())
    }

    /// Predict from a dense row-major buffer without building a [`DMatrix`].
    ///
    /// `iteration_range` is `[begin, end)` in rounds; `end == 0` means every
    /// round. Safe to call from many threads at once.
    #[allow(clippy::too_many_arguments)]
    pub fn inplace_predict(
        &self,
        data: &[f32],
        n_rows: usize,
        n_cols: usize,
        missing: f32,
        iteration_range: &[u32],
        predict_type: PredictionType,
        base_margin: Option<&[f32]>,
    ) -> Result<Array2<f32>> {
        let &[begin, end] = iteration_range else {
            return Err(BoosterError::contract(format!(
                "iteration range must have two elements [begin, end), got {}",
                iteration_range.len()
            )));
        };
        if n_rows.checked_mul(n_cols) != Some(data.len()) {
            return Err(BoosterError::contract(format!(
                "dense input has {} values, expected {n_rows} x {n_cols}",
                data.len()
            )));
        }
        let input = DenseInput {
            data,
            n_rows,
            n_cols,
            missing,
        };
        let raw = self.with_handle(|api, h| {
            api.booster_predict_from_dense(h, input, begin, end, predict_type as i32, base_margin)
        })?;
        reshape_rows(raw, n_rows)
    }

    /// In-place prediction of transformed values over every round, NaN as missing.
    pub fn inplace_predict_default(&self, data: &[f32], n_rows: usize, n_cols: usize) -> Result<Array2<f32>> {
        self.inplace_predict(data, n_rows, n_cols, f32::NAN, &[0, 0], PredictionType::Value, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_enabled_flag_wins() {
        let all = PredictOptions::builder()
            .output_margin(true)
            .pred_leaf(true)
            .pred_contribs(true)
            .build();
        assert_eq!(all.option_mask(), PRED_CONTRIBS);

        let margin_and_leaf = PredictOptions::builder().output_margin(true).pred_leaf(true).build();
        assert_eq!(margin_and_leaf.option_mask(), PRED_LEAF);

        assert_eq!(PredictOptions::default().option_mask(), 0);
    }

    #[test]
    fn prediction_type_is_closed() {
        assert_eq!(PredictionType::try_from(1).unwrap(), PredictionType::Margin);
        assert!(matches!(PredictionType::try_from(2), Err(BoosterError::Contract(_))));
        assert!("leaf".parse::<PredictionType>().is_err());
    }

    #[test]
    fn reshape_is_row_major() {
        let out = reshape_rows(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2).unwrap();
        assert_eq!(out.dim(), (2, 3));
        assert_eq!(out[[0, 2]], 3.0);
        assert_eq!(out[[1, 0]], 4.0);
    }

    #[test]
    fn reshape_rejects_ragged_output() {
        assert!(reshape_rows(vec![1.0, 2.0, 3.0], 2).is_err());
        assert_eq!(reshape_rows(Vec::new(), 0).unwrap().dim(), (0, 0));
    }
}
