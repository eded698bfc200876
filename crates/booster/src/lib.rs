//! booster: a handle-backed gradient boosting model wrapper.
//!
//! A [`Booster`] owns one opaque model handle issued by a [`NativeApi`]
//! engine and marshals every call across that boundary: parameters,
//! attributes, training steps, prediction, evaluation, persistence and
//! feature importance.
//!
//! # Key Types
//!
//! - [`Booster`] - Owns the handle, frees it exactly once
//! - [`NativeApi`] - The C-style engine surface the wrapper talks to
//! - [`LocalEngine`] - In-process engine implementing [`NativeApi`]
//! - [`DMatrix`] - Dense feature matrix with labels, weights and groups
//! - [`ModelFormat`] - Persisted model formats (`json`, `ubj`, `deprecated`)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use booster::{Booster, DMatrix, LocalEngine, NativeApi};
//!
//! let api: Arc<dyn NativeApi> = Arc::new(LocalEngine::new());
//! let mut train = DMatrix::from_dense(&data, n_rows, n_cols, f32::NAN)?;
//! train.set_labels(labels);
//!
//! let mut booster = Booster::new(api, [("max_depth", "3")], &[&train])?;
//! for iteration in 0..10 {
//!     booster.update(&train, iteration)?;
//! }
//! let predictions = booster.predict(&train)?;
//! booster.dispose()?;
//! ```

pub mod booster;
pub mod data;
pub mod engine;
pub mod error;
pub mod importance;
pub mod native;
pub mod persist;
pub mod testing;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use booster::{
    parse_eval_metrics, Booster, BoosterSeed, CustomEval, DumpFormat, Evaluator, NativeMetrics,
    Objective, PredictOptions, PredictionType,
};
pub use data::DMatrix;
pub use engine::LocalEngine;
pub use error::{BoosterError, Result};
pub use importance::ImportanceType;
pub use native::{BoosterHandle, NativeApi, NativeError, NativeResult};
pub use persist::ModelFormat;
