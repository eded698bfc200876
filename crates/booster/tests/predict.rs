//! Matrix-based and in-place prediction.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use proptest::prelude::*;

use booster::testing::{random_dense_f32, regression_dmatrix, CallRecorder};
use booster::{Booster, BoosterError, DMatrix, LocalEngine, NativeApi, PredictOptions, PredictionType};

const ROUNDS: i32 = 3;

fn trained(api: Arc<dyn NativeApi>) -> (Booster, DMatrix) {
    let dtrain = regression_dmatrix(80, 3, 21);
    let mut booster = Booster::new(api, [("max_depth", "3")], &[&dtrain]).unwrap();
    for iteration in 0..ROUNDS {
        booster.update(&dtrain, iteration).unwrap();
    }
    (booster, dtrain)
}

#[test]
fn matrix_and_inplace_paths_agree() {
    let (booster, dtrain) = trained(Arc::new(LocalEngine::new()));
    let n = dtrain.n_rows();

    let values = booster.predict(&dtrain).unwrap();
    let inplace = booster.inplace_predict_default(dtrain.as_slice(), n, 3).unwrap();
    assert_eq!(values.dim(), (n, 1));
    assert_eq!(values, inplace);

    let margins = booster.predict_margin(&dtrain).unwrap();
    let inplace_margins = booster
        .inplace_predict(dtrain.as_slice(), n, 3, f32::NAN, &[0, 0], PredictionType::Margin, None)
        .unwrap();
    assert_eq!(margins, inplace_margins);
}

#[test]
fn tree_limit_matches_iteration_range() {
    let (booster, _) = trained(Arc::new(LocalEngine::new()));
    let dtest = regression_dmatrix(15, 3, 22);

    let limited = booster.predict_with_limit(&dtest, 2).unwrap();
    let ranged = booster
        .inplace_predict(dtest.as_slice(), 15, 3, f32::NAN, &[0, 2], PredictionType::Value, None)
        .unwrap();
    assert_eq!(limited, ranged);
    assert_ne!(limited, booster.predict(&dtest).unwrap());
}

#[test]
fn range_beyond_model_is_a_native_error() {
    let (booster, dtrain) = trained(Arc::new(LocalEngine::new()));
    let err = booster
        .inplace_predict(dtrain.as_slice(), dtrain.n_rows(), 3, f32::NAN, &[0, 10], PredictionType::Value, None)
        .unwrap_err();
    assert!(err.native_message().is_some());
}

#[test]
fn leaf_and_contribution_shapes() {
    let (booster, _) = trained(Arc::new(LocalEngine::new()));
    let dtest = regression_dmatrix(10, 3, 23);

    let leaves = booster.predict_leaf(&dtest, 0).unwrap();
    assert_eq!(leaves.dim(), (10, ROUNDS as usize));
    assert!(leaves.iter().all(|v| v.fract() == 0.0 && *v >= 0.0));

    let contribs = booster.predict_contrib(&dtest, 0).unwrap();
    assert_eq!(contribs.dim(), (10, 4));
    let margins = booster.predict_margin(&dtest).unwrap();
    for (row, margin) in contribs.rows().into_iter().zip(margins.iter()) {
        assert_abs_diff_eq!(row.sum(), *margin, epsilon = 1e-4);
    }
}

#[test]
fn contribution_flag_overrides_the_others() {
    let (booster, _) = trained(Arc::new(LocalEngine::new()));
    let dtest = regression_dmatrix(10, 3, 24);
    let everything = PredictOptions::builder()
        .output_margin(true)
        .pred_leaf(true)
        .pred_contribs(true)
        .build();
    assert_eq!(
        booster.predict_with(&dtest, everything).unwrap(),
        booster.predict_contrib(&dtest, 0).unwrap()
    );

    let margin_then_leaf = PredictOptions::builder().output_margin(true).pred_leaf(true).build();
    assert_eq!(
        booster.predict_with(&dtest, margin_then_leaf).unwrap(),
        booster.predict_leaf(&dtest, 0).unwrap()
    );
}

#[test]
fn missing_values_follow_the_sentinel() {
    let (booster, _) = trained(Arc::new(LocalEngine::new()));
    let mut data = random_dense_f32(12, 3, 30, 0.0, 1.0);
    data[1] = -999.0;
    data[7] = -999.0;

    let dmat = DMatrix::from_dense(&data, 12, 3, -999.0).unwrap();
    let expected = booster.predict(&dmat).unwrap();
    let inplace = booster
        .inplace_predict(&data, 12, 3, -999.0, &[0, 0], PredictionType::Value, None)
        .unwrap();
    assert_eq!(expected, inplace);
}

#[test]
fn base_margin_replaces_base_score() {
    let (booster, _) = trained(Arc::new(LocalEngine::new()));
    let data = random_dense_f32(6, 3, 31, 0.0, 1.0);
    let default = booster
        .inplace_predict(&data, 6, 3, f32::NAN, &[0, 0], PredictionType::Margin, None)
        .unwrap();
    let zero = vec![0.0; 6];
    let shifted = booster
        .inplace_predict(&data, 6, 3, f32::NAN, &[0, 0], PredictionType::Margin, Some(&zero))
        .unwrap();
    for (d, s) in default.iter().zip(shifted.iter()) {
        assert_abs_diff_eq!(d - 0.5, *s, epsilon = 1e-5);
    }
}

#[test]
fn bad_iteration_range_makes_no_native_call() {
    let api = Arc::new(CallRecorder::new(LocalEngine::new()));
    let (booster, dtrain) = trained(api.clone());
    api.clear();

    for range in [&[0u32][..], &[0, 1, 2][..], &[][..]] {
        let err = booster
            .inplace_predict(dtrain.as_slice(), dtrain.n_rows(), 3, f32::NAN, range, PredictionType::Value, None)
            .unwrap_err();
        assert!(matches!(err, BoosterError::Contract(_)), "{err}");
    }
    let err = booster
        .inplace_predict(&[1.0, 2.0], 1, 3, f32::NAN, &[0, 0], PredictionType::Value, None)
        .unwrap_err();
    assert!(matches!(err, BoosterError::Contract(_)));
    assert_eq!(api.total(), 0);
}

#[test]
fn unknown_prediction_type_is_rejected() {
    assert!(matches!(PredictionType::try_from(2), Err(BoosterError::Contract(_))));
    assert!(matches!(PredictionType::try_from(-1), Err(BoosterError::Contract(_))));
    assert_eq!(PredictionType::try_from(0).unwrap(), PredictionType::Value);
}

#[test]
fn multiclass_outputs() {
    let api: Arc<dyn NativeApi> = Arc::new(LocalEngine::new());
    let data = random_dense_f32(60, 2, 40, 0.0, 1.0);
    let labels: Vec<f32> = data.chunks(2).map(|r| (r[0] * 3.0).floor().min(2.0)).collect();
    let dtrain = DMatrix::from_dense(&data, 60, 2, f32::NAN).unwrap().with_labels(labels);

    let mut booster = Booster::new(
        api,
        [("objective", "multi:softprob"), ("num_class", "3")],
        &[&dtrain],
    )
    .unwrap();
    booster.update(&dtrain, 0).unwrap();
    booster.update(&dtrain, 1).unwrap();
    assert_eq!(booster.num_boosted_rounds().unwrap(), 2);

    let probs = booster.predict(&dtrain).unwrap();
    assert_eq!(probs.dim(), (60, 3));
    for row in probs.rows() {
        assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-5);
    }
    assert_eq!(booster.predict_leaf(&dtrain, 0).unwrap().dim(), (60, 6));

    booster.set_param("objective", "multi:softmax").unwrap();
    let classes = booster.predict(&dtrain).unwrap();
    assert_eq!(classes.dim(), (60, 1));
    assert!(classes.iter().all(|c| [0.0, 1.0, 2.0].contains(c)));
}

#[test]
fn concurrent_inplace_predictions_match_baseline() {
    let (booster, _) = trained(Arc::new(LocalEngine::new()));
    let data = random_dense_f32(50, 3, 50, 0.0, 1.0);
    let baseline = booster.inplace_predict_default(&data, 50, 3).unwrap();

    std::thread::scope(|s| {
        for _ in 0..24 {
            s.spawn(|| {
                for _ in 0..300 {
                    let out = booster.inplace_predict_default(&data, 50, 3).unwrap();
                    assert_eq!(out, baseline);
                }
            });
        }
    });
}

#[test]
fn concurrent_matrix_predictions_match_baseline() {
    let (booster, dtrain) = trained(Arc::new(LocalEngine::new()));
    let baseline = booster.predict(&dtrain).unwrap();

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..50 {
                    assert_eq!(booster.predict(&dtrain).unwrap(), baseline);
                }
            });
        }
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn outputs_have_one_row_per_input_row(rows in 1usize..40, seed in any::<u64>()) {
        let (booster, _) = trained(Arc::new(LocalEngine::new()));
        let data = random_dense_f32(rows, 3, seed, -1.0, 2.0);
        let dmat = DMatrix::from_dense(&data, rows, 3, f32::NAN).unwrap();

        prop_assert_eq!(booster.inplace_predict_default(&data, rows, 3).unwrap().dim(), (rows, 1));
        prop_assert_eq!(booster.predict_leaf(&dmat, 0).unwrap().dim(), (rows, ROUNDS as usize));
        prop_assert_eq!(booster.predict_contrib(&dmat, 0).unwrap().dim(), (rows, 4));
    }
}
