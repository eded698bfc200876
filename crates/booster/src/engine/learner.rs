//! Per-handle model state and the operations the engine exposes on it.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::dump::{dump_tree, DumpKind, FeatureMap};
use super::gbtree::{GbTree, Rows};
use super::grow::grow_tree;
use super::metric::Metric;
use super::objective::validate_info;
use super::params::LearnerParams;
use super::tree::RegTree;
use super::with_threads;
use crate::data::{is_missing, DMatrix};
use crate::native::{
    format_eval_entry, DenseInput, NativeError, NativeResult, OUTPUT_MARGIN, PREDICT_MARGIN,
    PREDICT_VALUE, PRED_CONTRIBS, PRED_LEAF,
};
use crate::persist::{
    self, GbTreeSchema, LearnerSchema, ModelFormat, ModelParamSchema, ModelSchema, SCHEMA_VERSION,
};

const FEATURE_NAME: &str = "feature_name";
const FEATURE_TYPE: &str = "feature_type";

/// Matrices with cached margins per learner; the oldest matrix is evicted first.
const MAX_CACHED_MATRICES: usize = 64;

/// Tree outputs accumulated for one registered matrix.
#[derive(Debug)]
struct CachedMargins {
    n_trees: usize,
    n_rows: usize,
    n_groups: usize,
    /// Sum of tree outputs only; base margins are added per call.
    margins: Vec<f32>,
}

/// Exported learner configuration.
#[derive(Debug, Serialize, Deserialize)]
struct LearnerConfig {
    version: [u32; 3],
    learner: LearnerConfigBody,
}

#[derive(Debug, Serialize, Deserialize)]
struct LearnerConfigBody {
    params: BTreeMap<String, String>,
    eval_metrics: Vec<String>,
}

pub(crate) fn parse_format(format: &str) -> NativeResult<ModelFormat> {
    [ModelFormat::Json, ModelFormat::Ubj, ModelFormat::Deprecated]
        .into_iter()
        .find(|f| f.as_str() == format)
        .ok_or_else(|| {
            NativeError::new(format!(
                "Unknown model format '{format}', expected one of: json, ubj, deprecated"
            ))
        })
}

/// Model state behind one handle.
#[derive(Debug)]
pub(crate) struct Learner {
    params: LearnerParams,
    attributes: BTreeMap<String, String>,
    feature_names: Vec<String>,
    feature_types: Vec<String>,
    num_feature: u64,
    model: GbTree,
    cache: Mutex<HashMap<u64, CachedMargins>>,
}

impl Learner {
    /// New untrained learner; `cache` matrices get prediction cache entries.
    pub fn new(cache: &[&DMatrix]) -> Self {
        let entries = cache
            .iter()
            .map(|m| {
                (
                    m.id(),
                    CachedMargins {
                        n_trees: 0,
                        n_rows: m.n_rows(),
                        n_groups: 1,
                        margins: vec![0.0; m.n_rows()],
                    },
                )
            })
            .collect();
        Self {
            params: LearnerParams::default(),
            attributes: BTreeMap::new(),
            feature_names: Vec::new(),
            feature_types: Vec::new(),
            num_feature: cache.iter().map(|m| m.n_cols() as u64).max().unwrap_or(0),
            model: GbTree::default(),
            cache: Mutex::new(entries),
        }
    }

    fn n_groups(&self) -> usize {
        self.params.n_groups()
    }

    /// Drop every cached entry; matrices are registered again when next trained on.
    fn clear_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    // =========================================================================
    // Parameters and metadata
    // =========================================================================

    pub fn set_param(&mut self, name: &str, value: &str) -> NativeResult<()> {
        let groups_before = self.n_groups();
        self.params.set(name, value)?;
        if self.n_groups() != groups_before {
            self.clear_cache();
        }
        Ok(())
    }

    pub fn attr(&self, key: &str) -> Option<String> {
        self.attributes.get(key).cloned()
    }

    pub fn set_attr(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(v) => {
                self.attributes.insert(key.to_string(), v.to_string());
            }
            None => {
                self.attributes.remove(key);
            }
        }
    }

    pub fn attr_names(&self) -> Vec<String> {
        self.attributes.keys().cloned().collect()
    }

    pub fn set_feature_info(&mut self, field: &str, values: &[String]) -> NativeResult<()> {
        if !values.is_empty() && self.num_feature > 0 && values.len() as u64 != self.num_feature {
            return Err(NativeError::new(format!(
                "Length of {field} ({}) must match the number of features ({}).",
                values.len(),
                self.num_feature
            )));
        }
        match field {
            FEATURE_NAME => self.feature_names = values.to_vec(),
            FEATURE_TYPE => {
                if let Some(bad) = values
                    .iter()
                    .find(|t| !matches!(t.as_str(), "i" | "q" | "int" | "float" | "c"))
                {
                    return Err(NativeError::new(format!("Unknown feature type '{bad}'")));
                }
                self.feature_types = values.to_vec();
            }
            other => return Err(NativeError::new(format!("Unknown feature info field '{other}'"))),
        }
        Ok(())
    }

    pub fn feature_info(&self, field: &str) -> NativeResult<Vec<String>> {
        match field {
            FEATURE_NAME => Ok(self.feature_names.clone()),
            FEATURE_TYPE => Ok(self.feature_types.clone()),
            other => Err(NativeError::new(format!("Unknown feature info field '{other}'"))),
        }
    }

    pub fn num_feature(&self) -> u64 {
        self.num_feature
    }

    pub fn boosted_rounds(&self) -> u32 {
        self.model.boosted_rounds(self.n_groups())
    }

    // =========================================================================
    // Margins
    // =========================================================================

    fn check_columns(&self, n_cols: usize) -> NativeResult<()> {
        if self.num_feature > 0 && n_cols as u64 > self.num_feature {
            return Err(NativeError::new(format!(
                "Number of columns in data ({n_cols}) exceeds the number of features in the booster ({}).",
                self.num_feature
            )));
        }
        Ok(())
    }

    fn base_margins(&self, n_rows: usize, base_margin: Option<&[f32]>) -> NativeResult<Vec<f32>> {
        let n_groups = self.n_groups();
        match base_margin {
            Some(m) if !m.is_empty() => {
                if m.len() != n_rows * n_groups {
                    return Err(NativeError::new(format!(
                        "Size of base margin ({}) must be rows x groups ({}).",
                        m.len(),
                        n_rows * n_groups
                    )));
                }
                Ok(m.to_vec())
            }
            _ => {
                let margin = self.params.objective.prob_to_margin(self.params.base_score)?;
                Ok(vec![margin; n_rows * n_groups])
            }
        }
    }

    /// Tree outputs for every tree, reusing and extending the cache entry of
    /// `dmat` when one exists. `register` adds an entry when absent.
    fn tree_margins(&self, dmat: &DMatrix, register: bool) -> Vec<f32> {
        let n_groups = self.n_groups();
        let n_trees = self.model.trees.len();
        let rows = Rows {
            data: dmat.as_slice(),
            n_rows: dmat.n_rows(),
            n_cols: dmat.n_cols(),
        };

        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !register && !cache.contains_key(&dmat.id()) {
            drop(cache);
            let mut margins = vec![0.0; rows.n_rows * n_groups];
            self.model
                .accumulate_margins(rows, n_groups, 0..n_trees, &mut margins);
            return margins;
        }
        if !cache.contains_key(&dmat.id()) && cache.len() >= MAX_CACHED_MATRICES {
            // Matrix ids increase with creation order.
            if let Some(oldest) = cache.keys().min().copied() {
                cache.remove(&oldest);
            }
        }
        let entry = cache.entry(dmat.id()).or_insert_with(|| CachedMargins {
            n_trees: usize::MAX,
            n_rows: 0,
            n_groups: 0,
            margins: Vec::new(),
        });

        let fresh = entry.n_rows == rows.n_rows && entry.n_groups == n_groups && entry.n_trees <= n_trees;
        if !fresh {
            entry.n_trees = 0;
            entry.n_rows = rows.n_rows;
            entry.n_groups = n_groups;
            entry.margins = vec![0.0; rows.n_rows * n_groups];
        }
        if entry.n_trees < n_trees {
            self.model
                .accumulate_margins(rows, n_groups, entry.n_trees..n_trees, &mut entry.margins);
            entry.n_trees = n_trees;
        }
        entry.margins.clone()
    }

    fn full_margins(&self, dmat: &DMatrix, register: bool) -> NativeResult<Vec<f32>> {
        let mut margins = self.base_margins(dmat.n_rows(), Some(dmat.base_margin()))?;
        for (m, t) in margins.iter_mut().zip(self.tree_margins(dmat, register)) {
            *m += t;
        }
        Ok(margins)
    }

    // =========================================================================
    // Training
    // =========================================================================

    fn configure_features(&mut self, dtrain: &DMatrix) -> NativeResult<()> {
        let n_cols = dtrain.n_cols() as u64;
        if self.num_feature == 0 || (self.model.trees.is_empty() && n_cols > self.num_feature) {
            self.num_feature = n_cols;
        } else if n_cols != self.num_feature {
            return Err(NativeError::new(format!(
                "Number of columns in training data ({n_cols}) does not match the number of features in the booster ({}).",
                self.num_feature
            )));
        }
        Ok(())
    }

    fn check_training_data(&self, dtrain: &DMatrix) -> NativeResult<()> {
        let n_groups = self.n_groups();
        validate_info(dtrain, n_groups)?;
        self.params.objective.validate_labels(dtrain.labels(), n_groups)?;
        self.params.objective.prob_to_margin(self.params.base_score)?;
        Ok(())
    }

    /// One round with the configured objective.
    pub fn update(&mut self, iteration: i32, dtrain: &DMatrix) -> NativeResult<()> {
        self.check_training_data(dtrain)?;
        self.configure_features(dtrain)?;

        let n_groups = self.n_groups();
        let margins = self.full_margins(dtrain, true)?;
        let mut grad = vec![0.0f32; margins.len()];
        let mut hess = vec![0.0f32; margins.len()];
        self.params
            .objective
            .gradient(&margins, dtrain, n_groups, &mut grad, &mut hess);
        self.boost(dtrain, iteration, &grad, &hess)
    }

    /// One round from caller-supplied gradients.
    pub fn boost(&mut self, dtrain: &DMatrix, iteration: i32, grad: &[f32], hess: &[f32]) -> NativeResult<()> {
        let n_groups = self.n_groups();
        let expected = dtrain.n_rows() * n_groups;
        if grad.len() != expected || hess.len() != expected {
            return Err(NativeError::new(format!(
                "Gradient and hessian must have rows x groups = {expected} entries, got {} and {}.",
                grad.len(),
                hess.len()
            )));
        }
        validate_info(dtrain, n_groups)?;
        self.configure_features(dtrain)?;

        let n_rows = dtrain.n_rows();
        let params = self.params.grow_params();
        let subsample = self.params.subsample;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.params.seed.wrapping_add(iteration as u64));

        let trees = with_threads(self.params.nthread, || {
            (0..n_groups)
                .map(|k| {
                    let group_grad: Vec<f32> = (0..n_rows).map(|i| grad[i * n_groups + k]).collect();
                    let group_hess: Vec<f32> = (0..n_rows).map(|i| hess[i * n_groups + k]).collect();
                    let rows: Vec<u32> = (0..n_rows as u32)
                        .filter(|_| subsample >= 1.0 || rng.gen::<f32>() < subsample)
                        .collect();
                    grow_tree(dtrain, &group_grad, &group_hess, rows, &params)
                })
                .collect::<Vec<RegTree>>()
        })?;

        for (k, tree) in trees.into_iter().enumerate() {
            self.model.push(tree, k as u32);
        }
        debug!(
            iteration,
            trees = self.model.trees.len(),
            "boosting round complete"
        );
        // Extend the training matrix's cache entry with the new trees.
        self.tree_margins(dtrain, true);
        Ok(())
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    pub fn eval(&self, iteration: i32, dmats: &[&DMatrix], names: &[&str]) -> NativeResult<String> {
        if dmats.len() != names.len() {
            return Err(NativeError::new(format!(
                "Got {} matrices but {} names.",
                dmats.len(),
                names.len()
            )));
        }
        let metrics: Vec<Metric> = if self.params.eval_metrics.is_empty() {
            vec![Metric::parse(self.params.objective.default_metric())?]
        } else {
            self.params
                .eval_metrics
                .iter()
                .map(|m| Metric::parse(m))
                .collect::<NativeResult<_>>()?
        };

        let n_groups = self.n_groups();
        for dmat in dmats {
            validate_info(dmat, n_groups)?;
        }
        let mut report = format!("[{iteration}]");
        for (dmat, name) in dmats.iter().zip(names) {
            let mut preds = self.full_margins(dmat, false)?;
            self.params.objective.eval_transform(&mut preds, n_groups);
            for metric in &metrics {
                let value = metric.eval(&preds, n_groups, dmat)?;
                report.push_str(&format_eval_entry(name, metric.name(), value));
            }
        }
        Ok(report)
    }

    // =========================================================================
    // Prediction
    // =========================================================================

    pub fn predict(&self, dmat: &DMatrix, option_mask: i32, tree_limit: u32) -> NativeResult<Vec<f32>> {
        self.check_columns(dmat.n_cols())?;
        let rows = Rows {
            data: dmat.as_slice(),
            n_rows: dmat.n_rows(),
            n_cols: dmat.n_cols(),
        };
        self.predict_rows(rows, Some(dmat), option_mask, 0, tree_limit, Some(dmat.base_margin()))
    }

    pub fn predict_dense(
        &self,
        input: DenseInput<'_>,
        iteration_begin: u32,
        iteration_end: u32,
        predict_type: i32,
        base_margin: Option<&[f32]>,
    ) -> NativeResult<Vec<f32>> {
        let option_mask = match predict_type {
            PREDICT_VALUE => 0,
            PREDICT_MARGIN => OUTPUT_MARGIN,
            other => return Err(NativeError::new(format!("Unknown predict type: {other}"))),
        };
        if input.n_rows.checked_mul(input.n_cols) != Some(input.data.len()) {
            return Err(NativeError::new(format!(
                "Dense input has {} values, expected {} x {}.",
                input.data.len(),
                input.n_rows,
                input.n_cols
            )));
        }
        self.check_columns(input.n_cols)?;

        let data: Cow<'_, [f32]> = if input.missing.is_nan() {
            Cow::Borrowed(input.data)
        } else {
            Cow::Owned(
                input
                    .data
                    .iter()
                    .map(|&v| if is_missing(v, input.missing) { f32::NAN } else { v })
                    .collect(),
            )
        };
        let rows = Rows {
            data: &data,
            n_rows: input.n_rows,
            n_cols: input.n_cols,
        };
        self.predict_rows(rows, None, option_mask, iteration_begin, iteration_end, base_margin)
    }

    fn predict_rows(
        &self,
        rows: Rows<'_>,
        cached: Option<&DMatrix>,
        option_mask: i32,
        begin: u32,
        end: u32,
        base_margin: Option<&[f32]>,
    ) -> NativeResult<Vec<f32>> {
        let n_groups = self.n_groups();
        let trees = self.model.tree_range(begin, end, n_groups).ok_or_else(|| {
            NativeError::new(format!(
                "Invalid iteration range [{begin}, {end}) for a model with {} rounds.",
                self.boosted_rounds()
            ))
        })?;
        let base = self.base_margins(rows.n_rows, base_margin)?;

        if option_mask & PRED_CONTRIBS != 0 {
            let n_features = if self.num_feature > 0 {
                self.num_feature as usize
            } else {
                rows.n_cols
            };
            return Ok(self
                .model
                .predict_contribs(rows, n_features, n_groups, trees, &base));
        }
        if option_mask & PRED_LEAF != 0 {
            return Ok(self.model.predict_leaf(rows, trees));
        }

        let full = trees == (0..self.model.trees.len());
        let sums = match cached.filter(|dmat| full && self.has_cache_entry(dmat)) {
            Some(dmat) => self.tree_margins(dmat, false),
            None => {
                let mut sums = vec![0.0f32; rows.n_rows * n_groups];
                self.model.accumulate_margins(rows, n_groups, trees, &mut sums);
                sums
            }
        };
        let margins: Vec<f32> = base.iter().zip(&sums).map(|(b, s)| b + s).collect();

        if option_mask & OUTPUT_MARGIN != 0 {
            Ok(margins)
        } else {
            Ok(self.params.objective.output_transform(margins, n_groups))
        }
    }

    fn has_cache_entry(&self, dmat: &DMatrix) -> bool {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(&dmat.id())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    pub fn to_schema(&self) -> ModelSchema {
        ModelSchema {
            version: SCHEMA_VERSION,
            learner: LearnerSchema {
                attributes: self.attributes.clone(),
                feature_names: self.feature_names.clone(),
                feature_types: self.feature_types.clone(),
                model_param: ModelParamSchema {
                    base_score: self.params.base_score,
                    num_class: self.params.num_class,
                    num_feature: self.num_feature,
                },
                objective: self.params.objective.name().to_string(),
                gradient_booster: GbTreeSchema {
                    trees: self.model.trees.iter().map(RegTree::to_schema).collect(),
                    tree_info: self.model.tree_info.clone(),
                },
            },
        }
    }

    /// Replace the model with `schema`. Nothing changes unless it is valid.
    pub fn load_schema(&mut self, schema: &ModelSchema) -> NativeResult<()> {
        let learner = &schema.learner;
        let param = learner.model_param;
        let invalid = |msg: String| NativeError::new(format!("Invalid model: {msg}"));

        let mut params = self.params.clone();
        params.set("objective", &learner.objective)?;
        params.set("num_class", &param.num_class.to_string())?;
        params.set("base_score", &param.base_score.to_string())?;
        let n_groups = params.n_groups();

        let gb = &learner.gradient_booster;
        if gb.tree_info.len() != gb.trees.len() {
            return Err(invalid(format!(
                "{} trees but {} tree_info entries",
                gb.trees.len(),
                gb.tree_info.len()
            )));
        }
        if let Some(&bad) = gb.tree_info.iter().find(|&&g| g as usize >= n_groups) {
            return Err(invalid(format!("tree group {bad} out of {n_groups} groups")));
        }
        if gb.trees.len() % n_groups != 0 {
            return Err(invalid(format!(
                "{} trees do not form whole rounds of {n_groups} groups",
                gb.trees.len()
            )));
        }
        for (name, values) in [("feature_names", &learner.feature_names), ("feature_types", &learner.feature_types)] {
            if !values.is_empty() && values.len() as u64 != param.num_feature {
                return Err(invalid(format!(
                    "{} {name} for {} features",
                    values.len(),
                    param.num_feature
                )));
            }
        }
        let trees = gb
            .trees
            .iter()
            .enumerate()
            .map(|(i, t)| {
                RegTree::from_schema(t, param.num_feature).map_err(|e| invalid(format!("tree {i}: {e}")))
            })
            .collect::<NativeResult<Vec<_>>>()?;

        self.params = params;
        self.attributes = learner.attributes.clone();
        self.feature_names = learner.feature_names.clone();
        self.feature_types = learner.feature_types.clone();
        self.num_feature = param.num_feature;
        self.model = GbTree {
            trees,
            tree_info: gb.tree_info.clone(),
        };
        self.clear_cache();
        Ok(())
    }

    pub fn save_to_buffer(&self, format: &str) -> NativeResult<Vec<u8>> {
        let format = parse_format(format)?;
        persist::encode(&self.to_schema(), format)
            .map_err(|e| NativeError::new(format!("Failed to save model: {e}")))
    }

    pub fn load_from_buffer(&mut self, buf: &[u8]) -> NativeResult<()> {
        let schema = persist::decode(buf)
            .map_err(|e| NativeError::new(format!("Failed to load model: {e}")))?;
        self.load_schema(&schema)
    }

    pub fn save_to_path(&self, path: &Path) -> NativeResult<()> {
        let format = ModelFormat::from_path(path).unwrap_or_else(|| {
            warn!(
                path = %path.display(),
                "unrecognized model file extension, saving as ubj"
            );
            ModelFormat::Ubj
        });
        let bytes = self.save_to_buffer(format.as_str())?;
        std::fs::write(path, bytes)
            .map_err(|e| NativeError::new(format!("Failed to write {}: {e}", path.display())))
    }

    pub fn load_from_path(&mut self, path: &Path) -> NativeResult<()> {
        let bytes = std::fs::read(path)
            .map_err(|e| NativeError::new(format!("Failed to read {}: {e}", path.display())))?;
        self.load_from_buffer(&bytes)
    }

    pub fn save_config(&self) -> NativeResult<String> {
        let config = LearnerConfig {
            version: SCHEMA_VERSION,
            learner: LearnerConfigBody {
                params: self.params.raw().clone(),
                eval_metrics: self.params.eval_metrics.clone(),
            },
        };
        serde_json::to_string(&config)
            .map_err(|e| NativeError::new(format!("Failed to save config: {e}")))
    }

    pub fn load_config(&mut self, json: &str) -> NativeResult<()> {
        let config: LearnerConfig = serde_json::from_str(json)
            .map_err(|e| NativeError::new(format!("Failed to parse config: {e}")))?;
        let mut params = self.params.clone();
        for (key, value) in &config.learner.params {
            params.set(key, value)?;
        }
        for metric in &config.learner.eval_metrics {
            params.set("eval_metric", metric)?;
        }
        let groups_changed = params.n_groups() != self.n_groups();
        self.params = params;
        if groups_changed {
            self.clear_cache();
        }
        Ok(())
    }

    // =========================================================================
    // Dumps
    // =========================================================================

    pub fn dump(&self, fmap: &FeatureMap, with_stats: bool, format: &str) -> NativeResult<Vec<String>> {
        let kind = DumpKind::parse(format)?;
        self.model
            .trees
            .iter()
            .map(|tree| dump_tree(tree, fmap, with_stats, kind))
            .collect()
    }
}
