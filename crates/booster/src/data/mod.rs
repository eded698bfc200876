//! Dense feature matrices handed to the engine.
//!
//! A [`DMatrix`] is sample-major `[n_rows, n_cols]` with `f32::NAN` marking
//! missing values. Labels, weights, query groups and base margins are kept
//! alongside the features and checked by the engine when it uses them, not
//! when they are set.

use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::{Array2, ArrayView2};

use crate::error::{BoosterError, Result};

static NEXT_MATRIX_ID: AtomicU64 = AtomicU64::new(1);

/// Dense sample-major feature matrix with training metadata.
///
/// Every matrix carries a process-unique id the engine uses to key its
/// prediction cache. Clones get a fresh id.
#[derive(Debug)]
pub struct DMatrix {
    id: u64,
    /// Feature data: `[n_rows, n_cols]`, standard layout.
    features: Array2<f32>,
    labels: Vec<f32>,
    weights: Vec<f32>,
    /// Query group sizes, in row order.
    groups: Vec<u32>,
    /// Row-major `[n_rows, n_groups]` starting margins.
    base_margin: Vec<f32>,
}

impl DMatrix {
    /// Build from a row-major buffer, mapping `missing` (and NaN) to NaN.
    pub fn from_dense(data: &[f32], n_rows: usize, n_cols: usize, missing: f32) -> Result<Self> {
        let expected = n_rows.checked_mul(n_cols).ok_or_else(|| {
            BoosterError::contract(format!("matrix shape {n_rows}x{n_cols} overflows"))
        })?;
        if data.len() != expected {
            return Err(BoosterError::contract(format!(
                "dense buffer has {} values, expected {n_rows}x{n_cols} = {expected}",
                data.len()
            )));
        }

        let values = data
            .iter()
            .map(|&v| if is_missing(v, missing) { f32::NAN } else { v })
            .collect();
        let features = Array2::from_shape_vec((n_rows, n_cols), values)
            .map_err(|e| BoosterError::contract(e.to_string()))?;
        Ok(Self::from_array(features))
    }

    /// Wrap an owned sample-major array; NaN marks missing values.
    pub fn from_array(features: Array2<f32>) -> Self {
        let features = if features.is_standard_layout() {
            features
        } else {
            features.as_standard_layout().into_owned()
        };
        Self {
            id: NEXT_MATRIX_ID.fetch_add(1, Ordering::Relaxed),
            features,
            labels: Vec::new(),
            weights: Vec::new(),
            groups: Vec::new(),
            base_margin: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Process-unique identity of this matrix.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    /// Row-major feature values.
    pub fn as_slice(&self) -> &[f32] {
        self.features
            .as_slice()
            .expect("DMatrix features are kept in standard layout")
    }

    /// Feature values of one row.
    #[inline]
    pub fn row(&self, row: usize) -> &[f32] {
        let n_cols = self.n_cols();
        &self.as_slice()[row * n_cols..(row + 1) * n_cols]
    }

    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn groups(&self) -> &[u32] {
        &self.groups
    }

    pub fn base_margin(&self) -> &[f32] {
        &self.base_margin
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn set_labels(&mut self, labels: impl Into<Vec<f32>>) {
        self.labels = labels.into();
    }

    /// Per-row weights, or per-group weights for ranking objectives.
    pub fn set_weights(&mut self, weights: impl Into<Vec<f32>>) {
        self.weights = weights.into();
    }

    /// Query group sizes; they must sum to the row count when used.
    pub fn set_groups(&mut self, groups: impl Into<Vec<u32>>) {
        self.groups = groups.into();
    }

    pub fn set_base_margin(&mut self, base_margin: impl Into<Vec<f32>>) {
        self.base_margin = base_margin.into();
    }

    /// Builder-style [`set_labels`](Self::set_labels).
    pub fn with_labels(mut self, labels: impl Into<Vec<f32>>) -> Self {
        self.set_labels(labels);
        self
    }
}

impl Clone for DMatrix {
    fn clone(&self) -> Self {
        Self {
            id: NEXT_MATRIX_ID.fetch_add(1, Ordering::Relaxed),
            features: self.features.clone(),
            labels: self.labels.clone(),
            weights: self.weights.clone(),
            groups: self.groups.clone(),
            base_margin: self.base_margin.clone(),
        }
    }
}

#[inline]
pub(crate) fn is_missing(value: f32, missing: f32) -> bool {
    value.is_nan() || value == missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn from_dense_maps_missing_sentinel_to_nan() {
        let m = DMatrix::from_dense(&[1.0, -999.0, 3.0, f32::NAN], 2, 2, -999.0).unwrap();
        assert_eq!(m.n_rows(), 2);
        assert_eq!(m.n_cols(), 2);
        assert_eq!(m.row(0)[0], 1.0);
        assert!(m.row(0)[1].is_nan());
        assert_eq!(m.row(1)[0], 3.0);
        assert!(m.row(1)[1].is_nan());
    }

    #[test]
    fn from_dense_rejects_wrong_length() {
        let err = DMatrix::from_dense(&[1.0, 2.0, 3.0], 2, 2, f32::NAN).unwrap_err();
        assert!(matches!(err, BoosterError::Contract(_)));
    }

    #[test]
    fn fortran_layout_is_normalized() {
        let a = array![[1.0f32, 2.0], [3.0, 4.0]];
        let m = DMatrix::from_array(a.reversed_axes());
        assert_eq!(m.as_slice(), &[1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn ids_are_unique_across_clones() {
        let m = DMatrix::from_array(array![[1.0f32]]).with_labels(vec![1.0]);
        let c = m.clone();
        assert_ne!(m.id(), c.id());
        assert_eq!(c.labels(), &[1.0]);
    }
}
