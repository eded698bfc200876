//! Learner parameters parsed from string key/value pairs.

use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::warn;

use super::grow::GrowParams;
use super::objective::ObjectiveKind;
use crate::native::{NativeError, NativeResult};

/// Typed learner configuration.
///
/// Values arrive as strings through `set_param` and are parsed on arrival,
/// so a bad value fails the call that set it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LearnerParams {
    pub eta: f32,
    pub max_depth: u32,
    pub lambda: f32,
    pub gamma: f32,
    pub min_child_weight: f32,
    pub subsample: f32,
    pub seed: u64,
    pub base_score: f32,
    pub num_class: u32,
    pub objective: ObjectiveKind,
    /// Metrics in the order they were added.
    pub eval_metrics: Vec<String>,
    pub nthread: i32,
    pub verbosity: u32,
    pub validate_parameters: bool,
    /// Raw values of every accepted key except `eval_metric`, for config export.
    raw: BTreeMap<String, String>,
}

impl Default for LearnerParams {
    fn default() -> Self {
        Self {
            eta: 0.3,
            max_depth: 6,
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            subsample: 1.0,
            seed: 0,
            base_score: 0.5,
            num_class: 0,
            objective: ObjectiveKind::SquaredError,
            eval_metrics: Vec::new(),
            nthread: 0,
            verbosity: 1,
            validate_parameters: false,
            raw: BTreeMap::new(),
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> NativeResult<T> {
    value.trim().parse().map_err(|_| {
        NativeError::new(format!("Invalid value '{value}' for parameter '{key}'"))
    })
}

fn parse_bool(key: &str, value: &str) -> NativeResult<bool> {
    match value.trim() {
        "1" | "true" | "True" => Ok(true),
        "0" | "false" | "False" => Ok(false),
        _ => Err(NativeError::new(format!(
            "Invalid value '{value}' for parameter '{key}'"
        ))),
    }
}

fn check_range(key: &str, value: f32, min: f32, max: f32) -> NativeResult<f32> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(NativeError::new(format!(
            "Parameter '{key}' must be in [{min}, {max}], got {value}"
        )))
    }
}

impl LearnerParams {
    /// Apply one parameter. Unknown keys are kept and reported with a warning.
    pub fn set(&mut self, key: &str, value: &str) -> NativeResult<()> {
        if key.is_empty() {
            return Ok(());
        }
        if key.chars().any(char::is_whitespace) {
            return Err(NativeError::new(format!(
                "Invalid parameter name '{key}': names must not contain whitespace"
            )));
        }

        match key {
            "eta" | "learning_rate" => self.eta = check_range(key, parse(key, value)?, 0.0, f32::MAX)?,
            "max_depth" => self.max_depth = parse(key, value)?,
            "lambda" | "reg_lambda" => {
                self.lambda = check_range(key, parse(key, value)?, 0.0, f32::MAX)?
            }
            "gamma" | "min_split_loss" => {
                self.gamma = check_range(key, parse(key, value)?, 0.0, f32::MAX)?
            }
            "min_child_weight" => {
                self.min_child_weight = check_range(key, parse(key, value)?, 0.0, f32::MAX)?
            }
            "subsample" => self.subsample = check_range(key, parse(key, value)?, f32::EPSILON, 1.0)?,
            "seed" => self.seed = parse(key, value)?,
            "base_score" => self.base_score = parse(key, value)?,
            "num_class" => self.num_class = parse(key, value)?,
            "objective" => self.objective = ObjectiveKind::parse(value)?,
            "nthread" => self.nthread = parse(key, value)?,
            "verbosity" => self.verbosity = parse(key, value)?,
            "validate_parameters" => self.validate_parameters = parse_bool(key, value)?,
            "eval_metric" => {
                super::metric::Metric::parse(value)?;
                if !self.eval_metrics.iter().any(|m| m == value) {
                    self.eval_metrics.push(value.to_string());
                }
                return Ok(());
            }
            _ => warn!(parameter = key, "unknown parameter kept without effect"),
        }

        let canonical = match key {
            "learning_rate" => "eta",
            "reg_lambda" => "lambda",
            "min_split_loss" => "gamma",
            other => other,
        };
        self.raw.insert(canonical.to_string(), value.to_string());
        Ok(())
    }

    /// Output groups: `num_class` for multi-class objectives, 1 otherwise.
    pub fn n_groups(&self) -> usize {
        if self.objective.is_multiclass() {
            self.num_class.max(1) as usize
        } else {
            1
        }
    }

    pub fn grow_params(&self) -> GrowParams {
        GrowParams {
            eta: self.eta,
            max_depth: self.max_depth,
            lambda: self.lambda,
            gamma: self.gamma,
            min_child_weight: self.min_child_weight,
        }
    }

    /// Every accepted key with its last raw value.
    pub fn raw(&self) -> &BTreeMap<String, String> {
        &self.raw
    }
}
