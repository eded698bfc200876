//! The C-style engine surface a [`Booster`](crate::Booster) marshals into.
//!
//! Every operation takes an opaque [`BoosterHandle`] and reports failure as a
//! [`NativeError`] carrying the engine's last error message. Implementations
//! must be safe to call from many threads at once; the wrapper only
//! guarantees that a handle is not used after it has been freed.
//!
//! # Prediction layouts
//!
//! [`NativeApi::booster_predict`] fills a flat row-major buffer whose length
//! is a multiple of the row count:
//!
//! | option mask          | values per row                        |
//! |----------------------|---------------------------------------|
//! | `0` / [`OUTPUT_MARGIN`] | output groups                      |
//! | [`PRED_LEAF`]        | trees used                            |
//! | [`PRED_CONTRIBS`]    | output groups × (features + 1)        |

use std::fmt;
use std::num::NonZeroU64;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::DMatrix;

// =============================================================================
// Constants
// =============================================================================

/// Predict raw untransformed margins.
pub const OUTPUT_MARGIN: i32 = 1;
/// Predict the leaf index reached in every tree.
pub const PRED_LEAF: i32 = 2;
/// Predict per-feature contributions plus a bias column.
pub const PRED_CONTRIBS: i32 = 4;

/// In-place prediction type: transformed values.
pub const PREDICT_VALUE: i32 = 0;
/// In-place prediction type: raw margins.
pub const PREDICT_MARGIN: i32 = 1;

// =============================================================================
// Handle and Error
// =============================================================================

/// Opaque engine-issued token for one model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoosterHandle(NonZeroU64);

impl BoosterHandle {
    /// Wrap a raw handle value; zero is never a valid handle.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Raw handle value.
    pub fn as_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for BoosterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Failure reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NativeError {
    message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The engine's last error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type for engine calls.
pub type NativeResult<T> = Result<T, NativeError>;

/// One `"\tname-metric:value"` entry of an evaluation report.
///
/// Values print with six decimals; NaN prints as `nan`.
pub fn format_eval_entry(name: &str, metric: &str, value: f64) -> String {
    if value.is_nan() {
        format!("\t{name}-{metric}:nan")
    } else {
        format!("\t{name}-{metric}:{value:.6}")
    }
}

// =============================================================================
// Call Arguments
// =============================================================================

/// Dense row-major input for in-place prediction.
#[derive(Debug, Clone, Copy)]
pub struct DenseInput<'a> {
    pub data: &'a [f32],
    pub n_rows: usize,
    pub n_cols: usize,
    /// Value treated as missing in addition to NaN.
    pub missing: f32,
}

/// One node of a `json` model dump.
///
/// Split nodes carry `split` and the child ids; leaves carry `leaf`.
/// `gain` and `cover` are present only when statistics were requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDumpNode {
    pub nodeid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_condition: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeDumpNode>,
}

// =============================================================================
// Engine Trait
// =============================================================================

/// Engine operations addressed by handle.
///
/// Methods mirror the engine's exported functions one to one. Handles are
/// created by [`booster_create`](Self::booster_create) and must be released
/// with [`booster_free`](Self::booster_free) exactly once.
pub trait NativeApi: Send + Sync {
    /// Create a model, registering `cache` matrices for prediction caching.
    fn booster_create(&self, cache: &[&DMatrix]) -> NativeResult<BoosterHandle>;

    /// Release a model. The handle is invalid afterwards.
    fn booster_free(&self, handle: BoosterHandle) -> NativeResult<()>;

    fn booster_set_param(&self, handle: BoosterHandle, name: &str, value: &str)
        -> NativeResult<()>;

    /// Attribute value, `None` when the key is absent.
    fn booster_get_attr(&self, handle: BoosterHandle, key: &str) -> NativeResult<Option<String>>;

    /// Set an attribute; `None` removes it.
    fn booster_set_attr(
        &self,
        handle: BoosterHandle,
        key: &str,
        value: Option<&str>,
    ) -> NativeResult<()>;

    fn booster_get_attr_names(&self, handle: BoosterHandle) -> NativeResult<Vec<String>>;

    /// Set a string feature field (`feature_name` or `feature_type`).
    fn booster_set_str_feature_info(
        &self,
        handle: BoosterHandle,
        field: &str,
        values: &[String],
    ) -> NativeResult<()>;

    fn booster_get_str_feature_info(
        &self,
        handle: BoosterHandle,
        field: &str,
    ) -> NativeResult<Vec<String>>;

    fn booster_get_num_feature(&self, handle: BoosterHandle) -> NativeResult<u64>;

    fn booster_boosted_rounds(&self, handle: BoosterHandle) -> NativeResult<u32>;

    /// One boosting round with the configured objective.
    fn booster_update_one_iter(
        &self,
        handle: BoosterHandle,
        iteration: i32,
        dtrain: &DMatrix,
    ) -> NativeResult<()>;

    /// One boosting round from caller-supplied gradients (row-major, rows × groups).
    fn booster_train_one_iter(
        &self,
        handle: BoosterHandle,
        dtrain: &DMatrix,
        iteration: i32,
        grad: &[f32],
        hess: &[f32],
    ) -> NativeResult<()>;

    /// Evaluation report `"[iter]\tname-metric:value..."`.
    fn booster_eval_one_iter(
        &self,
        handle: BoosterHandle,
        iteration: i32,
        dmats: &[&DMatrix],
        names: &[&str],
    ) -> NativeResult<String>;

    /// Predict into `out`, replacing its contents.
    ///
    /// `tree_limit` counts boosting rounds; `0` uses all of them.
    fn booster_predict(
        &self,
        handle: BoosterHandle,
        dmat: &DMatrix,
        option_mask: i32,
        tree_limit: u32,
        out: &mut Vec<f32>,
    ) -> NativeResult<()>;

    /// Predict straight from a dense buffer over rounds `[begin, end)`;
    /// `end == 0` means every round.
    fn booster_predict_from_dense(
        &self,
        handle: BoosterHandle,
        input: DenseInput<'_>,
        iteration_begin: u32,
        iteration_end: u32,
        predict_type: i32,
        base_margin: Option<&[f32]>,
    ) -> NativeResult<Vec<f32>>;

    fn booster_load_model(&self, handle: BoosterHandle, path: &Path) -> NativeResult<()>;

    fn booster_save_model(&self, handle: BoosterHandle, path: &Path) -> NativeResult<()>;

    fn booster_load_model_from_buffer(&self, handle: BoosterHandle, buf: &[u8])
        -> NativeResult<()>;

    fn booster_save_model_to_buffer(
        &self,
        handle: BoosterHandle,
        format: &str,
    ) -> NativeResult<Vec<u8>>;

    /// One dump string per tree.
    fn booster_dump_model(
        &self,
        handle: BoosterHandle,
        feature_map: Option<&Path>,
        with_stats: bool,
        format: &str,
    ) -> NativeResult<Vec<String>>;

    /// One dump string per tree, naming features from `feature_names`.
    fn booster_dump_model_with_features(
        &self,
        handle: BoosterHandle,
        feature_names: &[String],
        with_stats: bool,
        format: &str,
    ) -> NativeResult<Vec<String>>;

    fn booster_save_json_config(&self, handle: BoosterHandle) -> NativeResult<String>;

    fn booster_load_json_config(&self, handle: BoosterHandle, config: &str) -> NativeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_a_handle() {
        assert!(BoosterHandle::from_raw(0).is_none());
        let handle = BoosterHandle::from_raw(7).unwrap();
        assert_eq!(handle.as_raw(), 7);
        assert_eq!(handle.to_string(), "0x7");
    }

    #[test]
    fn leaf_dump_node_omits_split_fields() {
        let node = TreeDumpNode {
            nodeid: 1,
            depth: None,
            split: None,
            split_condition: None,
            yes: None,
            no: None,
            missing: None,
            gain: None,
            cover: Some(2.0),
            leaf: Some(0.25),
            children: Vec::new(),
        };
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, r#"{"nodeid":1,"cover":2.0,"leaf":0.25}"#);
    }
}
