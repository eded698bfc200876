//! Test helpers: a call-recording engine wrapper and synthetic datasets.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rand::prelude::*;

use crate::data::DMatrix;
use crate::native::{BoosterHandle, DenseInput, NativeApi, NativeResult};

// =============================================================================
// Call recording
// =============================================================================

/// Forwards every call to `inner` and records the method name.
///
/// Used to show that a rejected argument never reached the engine.
#[derive(Debug, Default)]
pub struct CallRecorder<A> {
    inner: A,
    calls: Mutex<Vec<&'static str>>,
}

impl<A: NativeApi> CallRecorder<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Recorded method names, oldest first.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|name| **name == method)
            .count()
    }

    pub fn total(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn record(&self, method: &'static str) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(method);
    }
}

impl<A: NativeApi> NativeApi for CallRecorder<A> {
    fn booster_create(&self, cache: &[&DMatrix]) -> NativeResult<BoosterHandle> {
        self.record("booster_create");
        self.inner.booster_create(cache)
    }

    fn booster_free(&self, handle: BoosterHandle) -> NativeResult<()> {
        self.record("booster_free");
        self.inner.booster_free(handle)
    }

    fn booster_set_param(&self, handle: BoosterHandle, name: &str, value: &str) -> NativeResult<()> {
        self.record("booster_set_param");
        self.inner.booster_set_param(handle, name, value)
    }

    fn booster_get_attr(&self, handle: BoosterHandle, key: &str) -> NativeResult<Option<String>> {
        self.record("booster_get_attr");
        self.inner.booster_get_attr(handle, key)
    }

    fn booster_set_attr(&self, handle: BoosterHandle, key: &str, value: Option<&str>) -> NativeResult<()> {
        self.record("booster_set_attr");
        self.inner.booster_set_attr(handle, key, value)
    }

    fn booster_get_attr_names(&self, handle: BoosterHandle) -> NativeResult<Vec<String>> {
        self.record("booster_get_attr_names");
        self.inner.booster_get_attr_names(handle)
    }

    fn booster_set_str_feature_info(
        &self,
        handle: BoosterHandle,
        field: &str,
        values: &[String],
    ) -> NativeResult<()> {
        self.record("booster_set_str_feature_info");
        self.inner.booster_set_str_feature_info(handle, field, values)
    }

    fn booster_get_str_feature_info(&self, handle: BoosterHandle, field: &str) -> NativeResult<Vec<String>> {
        self.record("booster_get_str_feature_info");
        self.inner.booster_get_str_feature_info(handle, field)
    }

    fn booster_get_num_feature(&self, handle: BoosterHandle) -> NativeResult<u64> {
        self.record("booster_get_num_feature");
        self.inner.booster_get_num_feature(handle)
    }

    fn booster_boosted_rounds(&self, handle: BoosterHandle) -> NativeResult<u32> {
        self.record("booster_boosted_rounds");
        self.inner.booster_boosted_rounds(handle)
    }

    fn booster_update_one_iter(&self, handle: BoosterHandle, iteration: i32, dtrain: &DMatrix) -> NativeResult<()> {
        self.record("booster_update_one_iter");
        self.inner.booster_update_one_iter(handle, iteration, dtrain)
    }

    fn booster_train_one_iter(
        &self,
        handle: BoosterHandle,
        dtrain: &DMatrix,
        iteration: i32,
        grad: &[f32],
        hess: &[f32],
    ) -> NativeResult<()> {
        self.record("booster_train_one_iter");
        self.inner.booster_train_one_iter(handle, dtrain, iteration, grad, hess)
    }

    fn booster_eval_one_iter(
        &self,
        handle: BoosterHandle,
        iteration: i32,
        dmats: &[&DMatrix],
        names: &[&str],
    ) -> NativeResult<String> {
        self.record("booster_eval_one_iter");
        self.inner.booster_eval_one_iter(handle, iteration, dmats, names)
    }

    fn booster_predict(
        &self,
        handle: BoosterHandle,
        dmat: &DMatrix,
        option_mask: i32,
        tree_limit: u32,
        out: &mut Vec<f32>,
    ) -> NativeResult<()> {
        self.record("booster_predict");
        self.inner.booster_predict(handle, dmat, option_mask, tree_limit, out)
    }

    fn booster_predict_from_dense(
        &self,
        handle: BoosterHandle,
        input: DenseInput<'_>,
        iteration_begin: u32,
        iteration_end: u32,
        predict_type: i32,
        base_margin: Option<&[f32]>,
    ) -> NativeResult<Vec<f32>> {
        self.record("booster_predict_from_dense");
        self.inner
            .booster_predict_from_dense(handle, input, iteration_begin, iteration_end, predict_type, base_margin)
    }

    fn booster_load_model(&self, handle: BoosterHandle, path: &Path) -> NativeResult<()> {
        self.record("booster_load_model");
        self.inner.booster_load_model(handle, path)
    }

    fn booster_save_model(&self, handle: BoosterHandle, path: &Path) -> NativeResult<()> {
        self.record("booster_save_model");
        self.inner.booster_save_model(handle, path)
    }

    fn booster_load_model_from_buffer(&self, handle: BoosterHandle, buf: &[u8]) -> NativeResult<()> {
        self.record("booster_load_model_from_buffer");
        self.inner.booster_load_model_from_buffer(handle, buf)
    }

    fn booster_save_model_to_buffer(&self, handle: BoosterHandle, format: &str) -> NativeResult<Vec<u8>> {
        self.record("booster_save_model_to_buffer");
        self.inner.booster_save_model_to_buffer(handle, format)
    }

    fn booster_dump_model(
        &self,
        handle: BoosterHandle,
        feature_map: Option<&Path>,
        with_stats: bool,
        format: &str,
    ) -> NativeResult<Vec<String>> {
        self.record("booster_dump_model");
        self.inner.booster_dump_model(handle, feature_map, with_stats, format)
    }

    fn booster_dump_model_with_features(
        &self,
        handle: BoosterHandle,
        feature_names: &[String],
        with_stats: bool,
        format: &str,
    ) -> NativeResult<Vec<String>> {
        self.record("booster_dump_model_with_features");
        self.inner
            .booster_dump_model_with_features(handle, feature_names, with_stats, format)
    }

    fn booster_save_json_config(&self, handle: BoosterHandle) -> NativeResult<String> {
        self.record("booster_save_json_config");
        self.inner.booster_save_json_config(handle)
    }

    fn booster_load_json_config(&self, handle: BoosterHandle, config: &str) -> NativeResult<()> {
        self.record("booster_load_json_config");
        self.inner.booster_load_json_config(handle, config)
    }
}

// =============================================================================
// Synthetic data
// =============================================================================

/// Uniform dense features in `[min, max]`, row-major.
pub fn random_dense_f32(rows: usize, cols: usize, seed: u64, min: f32, max: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let width = max - min;
    (0..rows * cols).map(|_| min + rng.gen::<f32>() * width).collect()
}

/// Linear regression targets over uniform features in `[0, 1]`.
pub fn regression_dmatrix(rows: usize, cols: usize, seed: u64) -> DMatrix {
    let data = random_dense_f32(rows, cols, seed, 0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);
    let weights: Vec<f32> = (0..cols).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
    let labels: Vec<f32> = data
        .chunks(cols)
        .map(|row| row.iter().zip(&weights).map(|(x, w)| x * w).sum::<f32>() + 0.5)
        .collect();
    dense(data, rows, cols).with_labels(labels)
}

/// Binary labels: `1` when the first two features sum past `1`.
pub fn binary_dmatrix(rows: usize, cols: usize, seed: u64) -> DMatrix {
    assert!(cols >= 2, "binary_dmatrix needs at least two columns");
    let data = random_dense_f32(rows, cols, seed, 0.0, 1.0);
    let labels: Vec<f32> = data
        .chunks(cols)
        .map(|row| if row[0] + row[1] > 1.0 { 1.0 } else { 0.0 })
        .collect();
    dense(data, rows, cols).with_labels(labels)
}

/// Ranking data in equal groups of `group_size`; relevance follows feature 0.
pub fn ranking_dmatrix(groups: usize, group_size: usize, cols: usize, seed: u64) -> DMatrix {
    let rows = groups * group_size;
    let data = random_dense_f32(rows, cols, seed, 0.0, 1.0);
    let labels: Vec<f32> = data.chunks(cols).map(|row| (row[0] * 3.0).floor()).collect();
    let mut dmat = dense(data, rows, cols).with_labels(labels);
    dmat.set_groups(vec![group_size as u32; groups]);
    dmat
}

fn dense(data: Vec<f32>, rows: usize, cols: usize) -> DMatrix {
    let features = ndarray::Array2::from_shape_vec((rows, cols), data).expect("shape matches generated data");
    DMatrix::from_array(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LocalEngine;

    #[test]
    fn recorder_counts_forwarded_calls() {
        let recorder = CallRecorder::new(LocalEngine::new());
        let handle = recorder.booster_create(&[]).unwrap();
        recorder.booster_set_param(handle, "eta", "0.1").unwrap();
        recorder.booster_free(handle).unwrap();
        assert_eq!(recorder.calls(), vec!["booster_create", "booster_set_param", "booster_free"]);
        assert_eq!(recorder.count("booster_free"), 1);
        assert_eq!(recorder.inner().live_handles(), 0);
    }

    #[test]
    fn synthetic_data_is_deterministic() {
        let a = regression_dmatrix(20, 3, 7);
        let b = regression_dmatrix(20, 3, 7);
        assert_eq!(a.as_slice(), b.as_slice());
        assert_eq!(a.labels(), b.labels());

        let ranked = ranking_dmatrix(4, 5, 2, 1);
        assert_eq!(ranked.groups(), &[5, 5, 5, 5]);
        assert_eq!(ranked.n_rows(), 20);
    }
}
