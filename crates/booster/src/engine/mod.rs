//! In-process gradient boosting engine behind [`NativeApi`].
//!
//! [`LocalEngine`] keeps a registry of learners keyed by handle. Each learner
//! sits behind its own `RwLock`: predictions, evaluation and getters share
//! it, while parameter changes, training and model loads take it
//! exclusively. Handles are never reused.
//!
//! # Training
//!
//! Trees grow exactly and depth-wise ([`grow`]) from first and second order
//! gradients of the configured objective. Supported objectives are
//! `reg:squarederror`, `reg:logistic`, `binary:logistic`, `binary:logitraw`,
//! `multi:softprob`, `multi:softmax` and `rank:pairwise`.

mod dump;
mod gbtree;
mod grow;
mod learner;
mod metric;
mod objective;
mod params;
pub mod tree;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::data::DMatrix;
use crate::native::{BoosterHandle, DenseInput, NativeApi, NativeError, NativeResult};

use dump::FeatureMap;
use learner::Learner;

/// Run `f` on a dedicated pool of `nthread` threads; `nthread <= 0` uses the global pool.
pub(crate) fn with_threads<T: Send>(nthread: i32, f: impl FnOnce() -> T + Send) -> NativeResult<T> {
    if nthread <= 0 {
        return Ok(f());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(nthread as usize)
        .build()
        .map_err(|e| NativeError::new(format!("Failed to create thread pool: {e}")))?;
    Ok(pool.install(f))
}

// =============================================================================
// LocalEngine
// =============================================================================

/// Thread-safe in-process engine.
#[derive(Debug)]
pub struct LocalEngine {
    boosters: RwLock<HashMap<u64, Arc<RwLock<Learner>>>>,
    next_handle: AtomicU64,
    created: AtomicUsize,
    freed: AtomicUsize,
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEngine {
    pub fn new() -> Self {
        Self {
            boosters: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            created: AtomicUsize::new(0),
            freed: AtomicUsize::new(0),
        }
    }

    /// Handles created and not yet freed.
    pub fn live_handles(&self) -> usize {
        self.boosters
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Total handles ever created.
    pub fn created_handles(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Total handles freed.
    pub fn freed_handles(&self) -> usize {
        self.freed.load(Ordering::Relaxed)
    }

    fn learner(&self, handle: BoosterHandle) -> NativeResult<Arc<RwLock<Learner>>> {
        self.boosters
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&handle.as_raw())
            .cloned()
            .ok_or_else(|| NativeError::new(format!("Invalid booster handle {handle}")))
    }

    fn read<T>(&self, handle: BoosterHandle, f: impl FnOnce(&Learner) -> NativeResult<T>) -> NativeResult<T> {
        let learner = self.learner(handle)?;
        let guard = learner
            .read()
            .map_err(|_| NativeError::new("Booster state poisoned by a panicked call"))?;
        f(&guard)
    }

    fn write<T>(
        &self,
        handle: BoosterHandle,
        f: impl FnOnce(&mut Learner) -> NativeResult<T>,
    ) -> NativeResult<T> {
        let learner = self.learner(handle)?;
        let mut guard = learner
            .write()
            .map_err(|_| NativeError::new("Booster state poisoned by a panicked call"))?;
        f(&mut guard)
    }
}

impl NativeApi for LocalEngine {
    fn booster_create(&self, cache: &[&DMatrix]) -> NativeResult<BoosterHandle> {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = BoosterHandle::from_raw(raw)
            .ok_or_else(|| NativeError::new("Booster handle space exhausted"))?;
        self.boosters
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(raw, Arc::new(RwLock::new(Learner::new(cache))));
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(%handle, cached = cache.len(), "booster created");
        Ok(handle)
    }

    fn booster_free(&self, handle: BoosterHandle) -> NativeResult<()> {
        let removed = self
            .boosters
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&handle.as_raw());
        match removed {
            Some(_) => {
                self.freed.fetch_add(1, Ordering::Relaxed);
                debug!(%handle, "booster freed");
                Ok(())
            }
            None => Err(NativeError::new(format!("Invalid booster handle {handle}"))),
        }
    }

    fn booster_set_param(&self, handle: BoosterHandle, name: &str, value: &str) -> NativeResult<()> {
        self.write(handle, |l| l.set_param(name, value))
    }

    fn booster_get_attr(&self, handle: BoosterHandle, key: &str) -> NativeResult<Option<String>> {
        self.read(handle, |l| Ok(l.attr(key)))
    }

    fn booster_set_attr(&self, handle: BoosterHandle, key: &str, value: Option<&str>) -> NativeResult<()> {
        self.write(handle, |l| {
            l.set_attr(key, value);
            Ok(())
        })
    }

    fn booster_get_attr_names(&self, handle: BoosterHandle) -> NativeResult<Vec<String>> {
        self.read(handle, |l| Ok(l.attr_names()))
    }

    fn booster_set_str_feature_info(
        &self,
        handle: BoosterHandle,
        field: &str,
        values: &[String],
    ) -> NativeResult<()> {
        self.write(handle, |l| l.set_feature_info(field, values))
    }

    fn booster_get_str_feature_info(&self, handle: BoosterHandle, field: &str) -> NativeResult<Vec<String>> {
        self.read(handle, |l| l.feature_info(field))
    }

    fn booster_get_num_feature(&self, handle: BoosterHandle) -> NativeResult<u64> {
        self.read(handle, |l| Ok(l.num_feature()))
    }

    fn booster_boosted_rounds(&self, handle: BoosterHandle) -> NativeResult<u32> {
        self.read(handle, |l| Ok(l.boosted_rounds()))
    }

    fn booster_update_one_iter(&self, handle: BoosterHandle, iteration: i32, dtrain: &DMatrix) -> NativeResult<()> {
        self.write(handle, |l| l.update(iteration, dtrain))
    }

    fn booster_train_one_iter(
        &self,
        handle: BoosterHandle,
        dtrain: &DMatrix,
        iteration: i32,
        grad: &[f32],
        hess: &[f32],
    ) -> NativeResult<()> {
        self.write(handle, |l| l.boost(dtrain, iteration, grad, hess))
    }

    fn booster_eval_one_iter(
        &self,
        handle: BoosterHandle,
        iteration: i32,
        dmats: &[&DMatrix],
        names: &[&str],
    ) -> NativeResult<String> {
        self.read(handle, |l| l.eval(iteration, dmats, names))
    }

    fn booster_predict(
        &self,
        handle: BoosterHandle,
        dmat: &DMatrix,
        option_mask: i32,
        tree_limit: u32,
        out: &mut Vec<f32>,
    ) -> NativeResult<()> {
        let predictions = self.read(handle, |l| l.predict(dmat, option_mask, tree_limit))?;
        out.clear();
        out.extend_from_slice(&predictions);
        Ok(())
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
        self.read(handle, |l| {
            l.predict_dense(input, iteration_begin, iteration_end, predict_type, base_margin)
        })
    }

    fn booster_load_model(&self, handle: BoosterHandle, path: &Path) -> NativeResult<()> {
        self.write(handle, |l| l.load_from_path(path))
    }

    fn booster_save_model(&self, handle: BoosterHandle, path: &Path) -> NativeResult<()> {
        self.read(handle, |l| l.save_to_path(path))
    }

    fn booster_load_model_from_buffer(&self, handle: BoosterHandle, buf: &[u8]) -> NativeResult<()> {
        self.write(handle, |l| l.load_from_buffer(buf))
    }

    fn booster_save_model_to_buffer(&self, handle: BoosterHandle, format: &str) -> NativeResult<Vec<u8>> {
        self.read(handle, |l| l.save_to_buffer(format))
    }

    fn booster_dump_model(
        &self,
        handle: BoosterHandle,
        feature_map: Option<&Path>,
        with_stats: bool,
        format: &str,
    ) -> NativeResult<Vec<String>> {
        let fmap = match feature_map {
            Some(path) => FeatureMap::load(path)?,
            None => FeatureMap::default(),
        };
        self.read(handle, |l| l.dump(&fmap, with_stats, format))
    }

    fn booster_dump_model_with_features(
        &self,
        handle: BoosterHandle,
        feature_names: &[String],
        with_stats: bool,
        format: &str,
    ) -> NativeResult<Vec<String>> {
        let fmap = FeatureMap::new(feature_names.to_vec(), Vec::new());
        self.read(handle, |l| l.dump(&fmap, with_stats, format))
    }

    fn booster_save_json_config(&self, handle: BoosterHandle) -> NativeResult<String> {
        self.read(handle, |l| l.save_config())
    }

    fn booster_load_json_config(&self, handle: BoosterHandle, config: &str) -> NativeResult<()> {
        self.write(handle, |l| l.load_config(config))
    }
}
