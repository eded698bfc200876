//! The [`Booster`] handle wrapper.
//!
//! A `Booster` owns exactly one engine handle. [`Booster::dispose`] frees it
//! and is idempotent; dropping an undisposed booster frees it as well, with a
//! warning. Every other operation fails with [`BoosterError::Disposed`] once
//! the handle is gone.
//!
//! # Concurrency
//!
//! Predictions, evaluation, dumps, getters and serialization take `&self` and
//! may run from many threads at once. Parameter changes, training and model
//! reloads take `&mut self`, so the borrow checker keeps them exclusive.
//! `dispose` takes `&self` and waits for in-flight calls to finish.

mod eval;
mod hook;
mod predict;

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use ndarray::ArrayView2;
use tracing::{debug, warn};

use crate::data::DMatrix;
use crate::error::{BoosterError, Result};
use crate::importance::{self, ImportanceType};
use crate::native::{BoosterHandle, NativeApi, NativeResult};
use crate::persist::ModelFormat;

pub use eval::{parse_eval_metrics, CustomEval, Evaluator, NativeMetrics};
pub use hook::BoosterSeed;
pub use predict::{PredictOptions, PredictionType};

// =============================================================================
// Training hooks
// =============================================================================

/// A custom training objective.
///
/// Given raw margins (`[n_rows, n_groups]`) and the training matrix, return
/// per-entry gradients and hessians in row-major order.
pub trait Objective {
    fn gradient(&self, predictions: ArrayView2<'_, f32>, dtrain: &DMatrix) -> (Vec<f32>, Vec<f32>);
}

impl<F> Objective for F
where
    F: Fn(ArrayView2<'_, f32>, &DMatrix) -> (Vec<f32>, Vec<f32>),
{
    fn gradient(&self, predictions: ArrayView2<'_, f32>, dtrain: &DMatrix) -> (Vec<f32>, Vec<f32>) {
        self(predictions, dtrain)
    }
}

/// Model dump format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpFormat {
    #[default]
    Text,
    Json,
}

impl DumpFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

impl FromStr for DumpFormat {
    type Err = BoosterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(BoosterError::contract(format!(
                "unknown dump format '{other}', expected 'text' or 'json'"
            ))),
        }
    }
}

// =============================================================================
// Booster
// =============================================================================

/// Owner of one engine model handle.
pub struct Booster {
    api: Arc<dyn NativeApi>,
    handle: RwLock<Option<BoosterHandle>>,
    /// Reused output buffer for matrix predictions.
    predict_scratch: Mutex<Vec<f32>>,
    version: i32,
}

impl fmt::Debug for Booster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Booster")
            .field("handle", &self.handle())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl Booster {
    /// Create a booster, register `cache` matrices and apply `params` in order.
    ///
    /// If any parameter is rejected the new handle is freed before returning.
    pub fn new<I, K, V>(api: Arc<dyn NativeApi>, params: I, cache: &[&DMatrix]) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: fmt::Display,
    {
        let handle = api.booster_create(cache)?;
        let mut booster = Self::from_handle(api, handle);
        let applied = booster.set_params(params);
        let booster = booster.or_dispose(applied)?;
        debug!(%handle, "booster ready");
        Ok(booster)
    }

    fn from_handle(api: Arc<dyn NativeApi>, handle: BoosterHandle) -> Self {
        Self {
            api,
            handle: RwLock::new(Some(handle)),
            predict_scratch: Mutex::new(Vec::new()),
            version: 0,
        }
    }

    /// Free the handle of a booster that failed to initialize, keeping the first error.
    fn or_dispose(self, outcome: Result<()>) -> Result<Self> {
        let Err(err) = outcome else {
            return Ok(self);
        };
        if let Err(free_err) = self.dispose() {
            warn!(%free_err, "failed to release booster after initialization error");
        }
        Err(err)
    }

    /// Load a model file (any supported format).
    pub fn load_from_path(api: Arc<dyn NativeApi>, path: impl AsRef<Path>) -> Result<Self> {
        let handle = api.booster_create(&[])?;
        let booster = Self::from_handle(api, handle);
        let loaded = booster.with_handle(|api, h| api.booster_load_model(h, path.as_ref()));
        booster.or_dispose(loaded)
    }

    /// Load a model from an in-memory buffer (any supported format).
    pub fn load_from_buffer(api: Arc<dyn NativeApi>, bytes: &[u8]) -> Result<Self> {
        let handle = api.booster_create(&[])?;
        let booster = Self::from_handle(api, handle);
        let loaded = booster.with_handle(|api, h| api.booster_load_model_from_buffer(h, bytes));
        booster.or_dispose(loaded)
    }

    /// Load a model from a stream read to its end.
    pub fn load_from_reader<R: Read>(api: Arc<dyn NativeApi>, mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::load_from_buffer(api, &bytes)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Free the handle. Later calls are no-ops.
    pub fn dispose(&self) -> Result<()> {
        let taken = self
            .handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = taken {
            debug!(%handle, "disposing booster");
            self.api.booster_free(handle)?;
        }
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.handle().is_none()
    }

    /// Current handle, `None` once disposed.
    pub fn handle(&self) -> Option<BoosterHandle> {
        *self.handle.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Engine this booster talks to.
    pub fn api(&self) -> &Arc<dyn NativeApi> {
        &self.api
    }

    /// Run `f` with the live handle, holding off disposal until it returns.
    pub(crate) fn with_handle<T>(
        &self,
        f: impl FnOnce(&dyn NativeApi, BoosterHandle) -> NativeResult<T>,
    ) -> Result<T> {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let handle = guard.ok_or(BoosterError::Disposed)?;
        Ok(f(self.api.as_ref(), handle)?)
    }

    /// Checkpoint version carried through serialization.
    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn set_version(&mut self, version: i32) {
        self.version = version;
    }

    // =========================================================================
    // Parameters and attributes
    // =========================================================================

    /// Set one parameter; the value is passed as its display string.
    pub fn set_param(&mut self, key: &str, value: impl fmt::Display) -> Result<()> {
        let value = value.to_string();
        self.with_handle(|api, h| api.booster_set_param(h, key, &value))
    }

    /// Apply parameters in iteration order, stopping at the first failure.
    pub fn set_params<I, K, V>(&mut self, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: fmt::Display,
    {
        for (key, value) in params {
            self.set_param(key.as_ref(), value)?;
        }
        Ok(())
    }

    /// Attribute value, `None` when absent.
    pub fn attr(&self, key: &str) -> Result<Option<String>> {
        self.with_handle(|api, h| api.booster_get_attr(h, key))
    }

    pub fn set_attr(&mut self, key: &str, value: &str) -> Result<()> {
        self.with_handle(|api, h| api.booster_set_attr(h, key, Some(value)))
    }

    pub fn remove_attr(&mut self, key: &str) -> Result<()> {
        self.with_handle(|api, h| api.booster_set_attr(h, key, None))
    }

    pub fn set_attrs<I, K, V>(&mut self, attrs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in attrs {
            self.set_attr(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    /// All attributes.
    pub fn attrs(&self) -> Result<BTreeMap<String, String>> {
        self.with_handle(|api, h| {
            let mut attrs = BTreeMap::new();
            for name in api.booster_get_attr_names(h)? {
                if let Some(value) = api.booster_get_attr(h, &name)? {
                    attrs.insert(name, value);
                }
            }
            Ok(attrs)
        })
    }

    // =========================================================================
    // Feature metadata
    // =========================================================================

    pub fn feature_names(&self) -> Result<Vec<String>> {
        self.with_handle(|api, h| api.booster_get_str_feature_info(h, "feature_name"))
    }

    pub fn set_feature_names(&mut self, names: &[String]) -> Result<()> {
        self.with_handle(|api, h| api.booster_set_str_feature_info(h, "feature_name", names))
    }

    pub fn feature_types(&self) -> Result<Vec<String>> {
        self.with_handle(|api, h| api.booster_get_str_feature_info(h, "feature_type"))
    }

    pub fn set_feature_types(&mut self, types: &[String]) -> Result<()> {
        self.with_handle(|api, h| api.booster_set_str_feature_info(h, "feature_type", types))
    }

    pub fn num_features(&self) -> Result<u64> {
        self.with_handle(|api, h| api.booster_get_num_feature(h))
    }

    pub fn num_boosted_rounds(&self) -> Result<u32> {
        self.with_handle(|api, h| api.booster_boosted_rounds(h))
    }

    // =========================================================================
    // Training
    // =========================================================================

    /// One boosting round with the configured objective.
    pub fn update(&mut self, dtrain: &DMatrix, iteration: i32) -> Result<()> {
        self.with_handle(|api, h| api.booster_update_one_iter(h, iteration, dtrain))
    }

    /// One round driven by a custom objective over the current margins.
    pub fn update_with_objective(
        &mut self,
        dtrain: &DMatrix,
        iteration: i32,
        objective: &dyn Objective,
    ) -> Result<()> {
        let margins = self.predict_with(dtrain, PredictOptions::builder().output_margin(true).build())?;
        let (grad, hess) = objective.gradient(margins.view(), dtrain);
        self.boost(dtrain, iteration, &grad, &hess)
    }

    /// One round from explicit gradients (row-major, rows x groups).
    pub fn boost(&mut self, dtrain: &DMatrix, iteration: i32, grad: &[f32], hess: &[f32]) -> Result<()> {
        if grad.len() != hess.len() {
            return Err(BoosterError::contract(format!(
                "gradient and hessian lengths differ: {} vs {}",
                grad.len(),
                hess.len()
            )));
        }
        self.with_handle(|api, h| api.booster_train_one_iter(h, dtrain, iteration, grad, hess))
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Save to a file; the extension picks the format, unknown ones save as `ubj`.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        self.with_handle(|api, h| api.booster_save_model(h, path.as_ref()))
    }

    /// Serialize in the default (`ubj`) format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_bytes_as(ModelFormat::default())
    }

    pub fn to_bytes_as(&self, format: ModelFormat) -> Result<Vec<u8>> {
        self.with_handle(|api, h| api.booster_save_model_to_buffer(h, format.as_str()))
    }

    /// Write the serialized model to `out` and flush it.
    pub fn save_to_writer<W: Write>(&self, mut out: W, format: ModelFormat) -> Result<()> {
        let bytes = self.to_bytes_as(format)?;
        out.write_all(&bytes)?;
        out.flush()?;
        Ok(())
    }

    /// Replace this booster's model with one decoded from `bytes`.
    pub fn load_model_from_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        self.with_handle(|api, h| api.booster_load_model_from_buffer(h, bytes))
    }

    /// Learner configuration as JSON.
    pub fn save_config(&self) -> Result<String> {
        self.with_handle(|api, h| api.booster_save_json_config(h))
    }

    pub fn load_config(&mut self, config: &str) -> Result<()> {
        self.with_handle(|api, h| api.booster_load_json_config(h, config))
    }

    // =========================================================================
    // Dumps and importance
    // =========================================================================

    /// One dump string per tree, naming features from an optional feature map file.
    pub fn model_dump(
        &self,
        feature_map: Option<&Path>,
        with_stats: bool,
        format: DumpFormat,
    ) -> Result<Vec<String>> {
        self.with_handle(|api, h| api.booster_dump_model(h, feature_map, with_stats, format.as_str()))
    }

    /// One dump string per tree, naming features from `feature_names`.
    pub fn model_dump_with_features(
        &self,
        feature_names: &[String],
        with_stats: bool,
        format: DumpFormat,
    ) -> Result<Vec<String>> {
        self.with_handle(|api, h| {
            api.booster_dump_model_with_features(h, feature_names, with_stats, format.as_str())
        })
    }

    /// Number of splits per feature.
    pub fn feature_score(&self, feature_map: Option<&Path>) -> Result<BTreeMap<String, u64>> {
        let dump = self.model_dump(feature_map, false, DumpFormat::Text)?;
        importance::weights_from_text_dump(&dump)
    }

    pub fn feature_score_with_names(&self, feature_names: &[String]) -> Result<BTreeMap<String, u64>> {
        let dump = self.model_dump_with_features(feature_names, false, DumpFormat::Text)?;
        importance::weights_from_text_dump(&dump)
    }

    /// Importance per feature by `importance_type`
    /// (`weight`, `gain`, `cover`, `total_gain` or `total_cover`).
    pub fn score(&self, feature_map: Option<&Path>, importance_type: &str) -> Result<BTreeMap<String, f64>> {
        let kind = ImportanceType::from_str(importance_type)?;
        self.score_from_dump(kind, |format| self.model_dump(feature_map, true, format))
    }

    pub fn score_with_names(
        &self,
        feature_names: &[String],
        importance_type: &str,
    ) -> Result<BTreeMap<String, f64>> {
        let kind = ImportanceType::from_str(importance_type)?;
        self.score_from_dump(kind, |format| {
            self.model_dump_with_features(feature_names, true, format)
        })
    }

    /// Prefer the structured dump; fall back to parsing text when the engine
    /// cannot produce JSON.
    fn score_from_dump(
        &self,
        kind: ImportanceType,
        dump: impl Fn(DumpFormat) -> Result<Vec<String>>,
    ) -> Result<BTreeMap<String, f64>> {
        match dump(DumpFormat::Json) {
            Ok(trees) => importance::from_json_dump(&trees, kind),
            Err(BoosterError::Native(err)) => {
                debug!(%err, "json dump unavailable, using text dump");
                importance::from_text_dump(&dump(DumpFormat::Text)?, kind)
            }
            Err(err) => Err(err),
        }
    }
}

impl Drop for Booster {
    fn drop(&mut self) {
        let taken = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = taken {
            warn!(%handle, "booster dropped without dispose, releasing handle");
            if let Err(err) = self.api.booster_free(handle) {
                warn!(%handle, %err, "failed to release booster handle");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LocalEngine;

    fn api() -> Arc<LocalEngine> {
        Arc::new(LocalEngine::new())
    }

    #[test]
    fn failed_params_free_the_handle() {
        let engine = api();
        let err = Booster::new(engine.clone(), [("max depth", "3")], &[]).unwrap_err();
        assert!(err.native_message().is_some());
        assert_eq!(engine.live_handles(), 0);
        assert_eq!(engine.freed_handles(), 1);
    }

    /// Collects formatted log output for the current thread.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn captured_logs(f: impl FnOnce()) -> String {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = logs.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn failed_initialization_is_not_reported_as_a_leak() {
        let engine = api();
        let logs = captured_logs(|| {
            assert!(Booster::new(engine.clone(), [("max depth", "3")], &[]).is_err());
            assert!(Booster::load_from_buffer(engine.clone(), b"not a model").is_err());
        });
        assert_eq!(engine.live_handles(), 0);
        assert!(logs.contains("disposing booster"), "{logs}");
        assert!(!logs.contains("dropped without dispose"), "{logs}");
    }

    #[test]
    fn drop_without_dispose_warns() {
        let engine = api();
        let logs = captured_logs(|| {
            let _booster = Booster::new(engine.clone(), [("eta", 0.1)], &[]).unwrap();
        });
        assert!(logs.contains("dropped without dispose"), "{logs}");
    }

    #[test]
    fn drop_releases_undisposed_handle() {
        let engine = api();
        {
            let _booster = Booster::new(engine.clone(), [("eta", 0.1)], &[]).unwrap();
            assert_eq!(engine.live_handles(), 1);
        }
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn dump_format_parse() {
        assert_eq!("json".parse::<DumpFormat>().unwrap(), DumpFormat::Json);
        assert!(matches!(
            "xml".parse::<DumpFormat>(),
            Err(BoosterError::Contract(_))
        ));
    }

    fn unit_hessian(preds: ArrayView2<'_, f32>, _: &DMatrix) -> (Vec<f32>, Vec<f32>) {
        (vec![0.0; preds.len()], vec![1.0; preds.len()])
    }

    #[test]
    fn functions_are_objectives() {
        let dmat = DMatrix::from_dense(&[1.0, 2.0], 2, 1, f32::NAN).unwrap();
        let preds = ndarray::Array2::<f32>::zeros((2, 1));
        let objective: &dyn Objective = &unit_hessian;
        let (g, h) = objective.gradient(preds.view(), &dmat);
        assert_eq!(g.len(), 2);
        assert_eq!(h, vec![1.0, 1.0]);
    }
}
