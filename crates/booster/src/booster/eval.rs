//! Evaluation dispatch.
//!
//! Both the engine's configured metrics and caller-supplied metrics produce
//! the same report shape:
//!
//! ```text
//! [3]\ttrain-rmse:0.251000\ttest-rmse:0.301000
//! ```

use ndarray::ArrayView2;

use super::Booster;
use crate::data::DMatrix;
use crate::error::{BoosterError, Result};
use crate::native::{format_eval_entry, NativeError};

/// A caller-defined metric.
pub trait CustomEval {
    fn metric_name(&self) -> &str;

    /// Score transformed predictions (`[n_rows, n_groups]`) against `dmat`.
    fn eval(&self, predictions: ArrayView2<'_, f32>, dmat: &DMatrix) -> f32;
}

/// Produces an evaluation report for named datasets.
pub trait Evaluator {
    fn report(&self, booster: &Booster, iteration: i32, dmats: &[&DMatrix], names: &[&str]) -> Result<String>;
}

/// The engine's configured metrics, computed in one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeMetrics;

impl Evaluator for NativeMetrics {
    fn report(&self, booster: &Booster, iteration: i32, dmats: &[&DMatrix], names: &[&str]) -> Result<String> {
        booster.with_handle(|api, h| api.booster_eval_one_iter(h, iteration, dmats, names))
    }
}

/// Adapts a [`CustomEval`] by predicting each dataset in turn.
struct CustomMetric<'a>(&'a dyn CustomEval);

impl CustomMetric<'_> {
    /// Build the report, handing each score to `sink` as it is computed.
    fn report_with(
        &self,
        booster: &Booster,
        iteration: i32,
        dmats: &[&DMatrix],
        names: &[&str],
        mut sink: impl FnMut(f32),
    ) -> Result<String> {
        let metric = self.0.metric_name();
        let mut report = format!("[{iteration}]");
        for (dmat, name) in dmats.iter().zip(names) {
            let predictions = booster.predict(dmat)?;
            let value = self.0.eval(predictions.view(), dmat);
            sink(value);
            report.push_str(&format_eval_entry(name, metric, f64::from(value)));
        }
        Ok(report)
    }
}

impl Evaluator for CustomMetric<'_> {
    fn report(&self, booster: &Booster, iteration: i32, dmats: &[&DMatrix], names: &[&str]) -> Result<String> {
        self.report_with(booster, iteration, dmats, names, |_| {})
    }
}

/// Parse the metric values out of an evaluation report, in order.
///
/// `nan` and `-nan` are accepted in any case; `-nan` keeps its sign bit.
pub fn parse_eval_metrics(report: &str) -> Result<Vec<f32>> {
    report
        .split('\t')
        .skip(1)
        .map(|entry| -> Result<f32> {
            let (_, value) = entry.rsplit_once(':').ok_or_else(|| {
                NativeError::new(format!("malformed evaluation entry '{entry}'"))
            })?;
            parse_metric_value(value.trim())
                .ok_or_else(|| NativeError::new(format!("invalid metric value '{value}'")).into())
        })
        .collect()
}

fn parse_metric_value(value: &str) -> Option<f32> {
    if value.eq_ignore_ascii_case("nan") {
        Some(f32::NAN)
    } else if value.eq_ignore_ascii_case("-nan") {
        Some(-f32::NAN)
    } else {
        value.parse().ok()
    }
}

fn check_names(dmats: &[&DMatrix], names: &[&str]) -> Result<()> {
    if dmats.len() != names.len() {
        return Err(BoosterError::contract(format!(
            "got {} evaluation matrices but {} names",
            dmats.len(),
            names.len()
        )));
    }
    Ok(())
}

impl Booster {
    /// Report for `dmats` using the engine's configured metrics.
    pub fn eval_set(&self, dmats: &[&DMatrix], names: &[&str], iteration: i32) -> Result<String> {
        self.evaluate(&NativeMetrics, dmats, names, iteration)
    }

    /// Like [`eval_set`](Self::eval_set), also writing the parsed values to `metrics_out`.
    pub fn eval_set_into(
        &self,
        dmats: &[&DMatrix],
        names: &[&str],
        iteration: i32,
        metrics_out: &mut Vec<f32>,
    ) -> Result<String> {
        let report = self.eval_set(dmats, names, iteration)?;
        metrics_out.clear();
        metrics_out.extend(parse_eval_metrics(&report)?);
        Ok(report)
    }

    /// Report for `dmats` scored by a caller metric.
    pub fn eval_set_custom(
        &self,
        dmats: &[&DMatrix],
        names: &[&str],
        iteration: i32,
        metric: &dyn CustomEval,
    ) -> Result<String> {
        self.evaluate(&CustomMetric(metric), dmats, names, iteration)
    }

    /// Like [`eval_set_custom`](Self::eval_set_custom), also writing one score per
    /// dataset to `metrics_out`.
    pub fn eval_set_custom_into(
        &self,
        dmats: &[&DMatrix],
        names: &[&str],
        iteration: i32,
        metric: &dyn CustomEval,
        metrics_out: &mut Vec<f32>,
    ) -> Result<String> {
        check_names(dmats, names)?;
        metrics_out.clear();
        let report = CustomMetric(metric).report_with(self, iteration, dmats, names, |value| {
            metrics_out.push(value);
        });
        if report.is_err() {
            metrics_out.clear();
        }
        report
    }

    pub fn evaluate(
        &self,
        evaluator: &dyn Evaluator,
        dmats: &[&DMatrix],
        names: &[&str],
        iteration: i32,
    ) -> Result<String> {
        check_names(dmats, names)?;
        evaluator.report(self, iteration, dmats, names)
    }
}
