//! Training steps, parameters, attributes and feature metadata.

use std::collections::BTreeMap;
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use ndarray::ArrayView2;

use booster::testing::{binary_dmatrix, ranking_dmatrix, regression_dmatrix, CallRecorder};
use booster::{Booster, BoosterError, DMatrix, LocalEngine, NativeApi};

fn engine() -> Arc<dyn NativeApi> {
    Arc::new(LocalEngine::new())
}

fn squared_error(preds: ArrayView2<'_, f32>, dtrain: &DMatrix) -> (Vec<f32>, Vec<f32>) {
    let grad = preds.iter().zip(dtrain.labels()).map(|(p, y)| p - y).collect();
    (grad, vec![1.0; preds.len()])
}

#[test]
fn boosting_rounds_reduce_training_error() {
    let dtrain = regression_dmatrix(100, 4, 1);
    let mut booster = Booster::new(engine(), [("max_depth", "3"), ("eta", "0.5")], &[&dtrain]).unwrap();

    let mut history = Vec::new();
    let mut metrics = Vec::new();
    for iteration in 0..5 {
        booster.update(&dtrain, iteration).unwrap();
        booster.eval_set_into(&[&dtrain], &["train"], iteration, &mut metrics).unwrap();
        history.push(metrics[0]);
    }
    assert_eq!(booster.num_boosted_rounds().unwrap(), 5);
    assert_eq!(booster.num_features().unwrap(), 4);
    assert!(history.windows(2).all(|w| w[1] <= w[0]), "{history:?}");
}

#[test]
fn custom_objective_matches_builtin() {
    let dtrain = regression_dmatrix(60, 3, 2);
    let params = [("max_depth", "2"), ("base_score", "0.5")];

    let mut builtin = Booster::new(engine(), params, &[&dtrain]).unwrap();
    let mut custom = Booster::new(engine(), params, &[&dtrain]).unwrap();
    for iteration in 0..3 {
        builtin.update(&dtrain, iteration).unwrap();
        custom.update_with_objective(&dtrain, iteration, &squared_error).unwrap();
    }

    let a = builtin.predict(&dtrain).unwrap();
    let b = custom.predict(&dtrain).unwrap();
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-5);
    }
}

#[test]
fn mismatched_gradients_make_no_native_call() {
    let api = Arc::new(CallRecorder::new(LocalEngine::new()));
    let dtrain = regression_dmatrix(5, 2, 3);
    let mut booster = Booster::new(api.clone(), [("eta", "0.1")], &[&dtrain]).unwrap();
    api.clear();

    let err = booster.boost(&dtrain, 0, &[0.1; 5], &[1.0; 4]).unwrap_err();
    assert!(matches!(err, BoosterError::Contract(_)));
    assert_eq!(api.total(), 0);
}

#[test]
fn gradients_must_cover_every_row() {
    let dtrain = regression_dmatrix(5, 2, 3);
    let mut booster = Booster::new(engine(), [("eta", "0.1")], &[&dtrain]).unwrap();
    let err = booster.boost(&dtrain, 0, &[0.1; 4], &[1.0; 4]).unwrap_err();
    assert!(err.native_message().is_some());
    assert_eq!(booster.num_boosted_rounds().unwrap(), 0);
}

#[test]
fn group_sizes_must_sum_to_rows() {
    let mut dtrain = ranking_dmatrix(4, 5, 3, 4);
    let mut booster = Booster::new(engine(), [("objective", "rank:pairwise")], &[&dtrain]).unwrap();
    booster.update(&dtrain, 0).unwrap();

    dtrain.set_groups(vec![5, 5, 5]);
    let err = booster.update(&dtrain, 1).unwrap_err();
    assert!(err.native_message().unwrap().contains("group"), "{err}");
    assert_eq!(booster.num_boosted_rounds().unwrap(), 1);
}

#[test]
fn binary_objective_learns() {
    let dtrain = binary_dmatrix(200, 2, 5);
    let mut booster = Booster::new(
        engine(),
        [("objective", "binary:logistic"), ("eval_metric", "error"), ("eval_metric", "auc")],
        &[&dtrain],
    )
    .unwrap();
    for iteration in 0..10 {
        booster.update(&dtrain, iteration).unwrap();
    }
    let mut metrics = Vec::new();
    let report = booster.eval_set_into(&[&dtrain], &["train"], 9, &mut metrics).unwrap();
    assert!(report.starts_with("[9]\ttrain-error:"), "{report}");
    assert_eq!(metrics.len(), 2);
    assert!(metrics[0] < 0.1);
    assert!(metrics[1] > 0.9);

    let probs = booster.predict(&dtrain).unwrap();
    assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn invalid_parameters_are_native_errors() {
    let mut booster = Booster::new(engine(), [("eta", "0.1")], &[]).unwrap();
    assert!(booster.set_param("max_depth", "deep").unwrap_err().native_message().is_some());
    assert!(booster.set_param("tree method", "exact").unwrap_err().native_message().is_some());
    assert!(booster.set_param("objective", "reg:unknown").is_err());
    booster.set_param("learning_rate", 0.2).unwrap();
    booster.set_params([("max_depth", 4), ("seed", 7)]).unwrap();
    assert!(booster.save_config().unwrap().contains("\"seed\":\"7\""));
}

#[test]
fn set_params_stops_at_first_failure() {
    let mut booster = Booster::new(engine(), [("eta", "0.1")], &[]).unwrap();
    let err = booster
        .set_params([("max_depth", "4"), ("max depth", "3"), ("seed", "7")])
        .unwrap_err();
    assert!(err.native_message().is_some(), "{err}");

    let config = booster.save_config().unwrap();
    assert!(config.contains("\"max_depth\":\"4\""), "{config}");
    assert!(!config.contains("\"seed\""), "{config}");
}

#[test]
fn attributes_round_trip() {
    let mut booster = Booster::new(engine(), [("eta", "0.1")], &[]).unwrap();
    assert_eq!(booster.attr("best_score").unwrap(), None);

    let mut attrs = BTreeMap::new();
    attrs.insert("best_score", "0.25");
    attrs.insert("best_iteration", "12");
    booster.set_attrs(&attrs).unwrap();
    assert_eq!(booster.attr("best_score").unwrap().as_deref(), Some("0.25"));
    assert_eq!(booster.attrs().unwrap().len(), 2);

    booster.remove_attr("best_score").unwrap();
    assert_eq!(booster.attrs().unwrap().keys().collect::<Vec<_>>(), ["best_iteration"]);
}

#[test]
fn feature_metadata_must_match_feature_count() {
    let dtrain = regression_dmatrix(20, 3, 6);
    let mut booster = Booster::new(engine(), [("eta", "0.1")], &[&dtrain]).unwrap();

    let names: Vec<String> = ["a", "b", "c"].map(String::from).to_vec();
    booster.set_feature_names(&names).unwrap();
    assert_eq!(booster.feature_names().unwrap(), names);

    let types: Vec<String> = ["q", "int", "i"].map(String::from).to_vec();
    booster.set_feature_types(&types).unwrap();
    assert_eq!(booster.feature_types().unwrap(), types);

    let err = booster.set_feature_names(&names[..2]).unwrap_err();
    assert!(err.native_message().is_some());
    assert!(booster.set_feature_types(&vec!["colour".to_string(); 3]).is_err());
}
