//! Model persistence through buffers, files, streams and the serialization hook.

use std::sync::Arc;

use rstest::rstest;
use serde::de::DeserializeSeed;

use booster::testing::regression_dmatrix;
use booster::{Booster, BoosterSeed, DMatrix, LocalEngine, ModelFormat, NativeApi};

fn engine() -> Arc<dyn NativeApi> {
    Arc::new(LocalEngine::new())
}

fn trained(api: Arc<dyn NativeApi>, dtrain: &DMatrix) -> Booster {
    let mut booster = Booster::new(api, [("max_depth", "3"), ("eta", "0.3")], &[dtrain]).unwrap();
    for iteration in 0..5 {
        booster.update(dtrain, iteration).unwrap();
    }
    booster.set_attr("best_iteration", "4").unwrap();
    booster
}

#[rstest]
#[case::json(ModelFormat::Json)]
#[case::ubj(ModelFormat::Ubj)]
#[case::deprecated(ModelFormat::Deprecated)]
fn round_trip_predictions_are_bit_identical(#[case] format: ModelFormat) {
    let api = engine();
    let dtrain = regression_dmatrix(60, 3, 11);
    let original = trained(api.clone(), &dtrain);

    let bytes = original.to_bytes_as(format).unwrap();
    assert_eq!(ModelFormat::detect(&bytes), Some(format));
    let loaded = Booster::load_from_buffer(api, &bytes).unwrap();

    let dtest = regression_dmatrix(25, 3, 12);
    assert_eq!(original.predict(&dtest).unwrap(), loaded.predict(&dtest).unwrap());
    assert_eq!(loaded.num_boosted_rounds().unwrap(), 5);
    assert_eq!(loaded.attr("best_iteration").unwrap().as_deref(), Some("4"));
}

#[rstest]
#[case::json(ModelFormat::Json)]
#[case::ubj(ModelFormat::Ubj)]
#[case::deprecated(ModelFormat::Deprecated)]
fn save_load_save_is_byte_identical(#[case] format: ModelFormat) {
    let api = engine();
    let dtrain = regression_dmatrix(40, 2, 5);
    let original = trained(api.clone(), &dtrain);

    let first = original.to_bytes_as(format).unwrap();
    let second = Booster::load_from_buffer(api, &first)
        .unwrap()
        .to_bytes_as(format)
        .unwrap();
    assert_eq!(first, second);
}

#[rstest]
#[case::json(ModelFormat::Json, true)]
#[case::ubj(ModelFormat::Ubj, true)]
#[case::deprecated(ModelFormat::Deprecated, false)]
fn feature_names_survive_structured_formats(#[case] format: ModelFormat, #[case] kept: bool) {
    let api = engine();
    let dtrain = regression_dmatrix(40, 2, 5);
    let mut original = trained(api.clone(), &dtrain);
    let names = vec!["age".to_string(), "income".to_string()];
    original.set_feature_names(&names).unwrap();

    let loaded = Booster::load_from_buffer(api, &original.to_bytes_as(format).unwrap()).unwrap();
    let expected = if kept { names } else { Vec::new() };
    assert_eq!(loaded.feature_names().unwrap(), expected);
}

#[test]
fn default_format_is_ubj() {
    let api = engine();
    let dtrain = regression_dmatrix(20, 2, 1);
    let booster = trained(api, &dtrain);
    assert_eq!(ModelFormat::detect(&booster.to_bytes().unwrap()), Some(ModelFormat::Ubj));
}

#[test]
fn malformed_buffers_are_rejected() {
    let api = engine();
    let dtrain = regression_dmatrix(20, 2, 1);
    let booster = trained(api.clone(), &dtrain);

    let mut truncated = booster.to_bytes_as(ModelFormat::Ubj).unwrap();
    truncated.truncate(truncated.len() / 2);
    let mut corrupted = booster.to_bytes_as(ModelFormat::Deprecated).unwrap();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xff;

    for bytes in [b"".to_vec(), b"garbage".to_vec(), b"{\"version\":".to_vec(), truncated, corrupted] {
        let err = Booster::load_from_buffer(api.clone(), &bytes).unwrap_err();
        assert!(err.native_message().is_some(), "{err}");
    }
}

#[rstest]
#[case::json("model.json", ModelFormat::Json)]
#[case::ubj("model.ubj", ModelFormat::Ubj)]
#[case::legacy("model.bin", ModelFormat::Deprecated)]
#[case::unknown("model.xgb", ModelFormat::Ubj)]
fn file_extension_picks_format(#[case] file: &str, #[case] format: ModelFormat) {
    let api = engine();
    let dtrain = regression_dmatrix(30, 2, 9);
    let booster = trained(api.clone(), &dtrain);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(file);

    booster.save_to_path(&path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(ModelFormat::detect(&bytes), Some(format));

    let loaded = Booster::load_from_path(api, &path).unwrap();
    assert_eq!(booster.predict(&dtrain).unwrap(), loaded.predict(&dtrain).unwrap());
}

#[test]
fn writer_and_reader_streams() {
    let api = engine();
    let dtrain = regression_dmatrix(30, 2, 9);
    let booster = trained(api.clone(), &dtrain);

    let mut out = Vec::new();
    booster.save_to_writer(&mut out, ModelFormat::Json).unwrap();
    assert_eq!(out, booster.to_bytes_as(ModelFormat::Json).unwrap());

    let loaded = Booster::load_from_reader(api, out.as_slice()).unwrap();
    assert_eq!(loaded.num_boosted_rounds().unwrap(), 5);
}

#[test]
fn hook_round_trip_keeps_version() {
    let api = engine();
    let dtrain = regression_dmatrix(30, 2, 9);
    let mut booster = trained(api.clone(), &dtrain);
    booster.set_version(3);

    let mut stream = Vec::new();
    booster.write_to(&mut stream).unwrap();
    let restored = Booster::read_from(api, &mut stream.as_slice()).unwrap();

    assert_eq!(restored.version(), 3);
    assert_eq!(restored.to_bytes().unwrap(), booster.to_bytes().unwrap());
}

#[test]
fn serde_round_trip_through_seed() {
    let api = engine();
    let dtrain = regression_dmatrix(30, 2, 9);
    let mut booster = trained(api.clone(), &dtrain);
    booster.set_version(7);

    let json = serde_json::to_string(&booster).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["version"], 7);
    assert!(value["model"].is_array());

    let mut de = serde_json::Deserializer::from_str(&json);
    let restored = BoosterSeed::new(api).deserialize(&mut de).unwrap();
    assert_eq!(restored.version(), 7);
    assert_eq!(booster.predict(&dtrain).unwrap(), restored.predict(&dtrain).unwrap());
}

#[test]
fn serde_rejects_corrupt_model_bytes() {
    let api = engine();
    let mut de = serde_json::Deserializer::from_str(r#"{"version":1,"model":[1,2,3]}"#);
    assert!(BoosterSeed::new(api).deserialize(&mut de).is_err());
}

#[test]
fn config_round_trip() {
    let api = engine();
    let dtrain = regression_dmatrix(20, 2, 2);
    let booster = trained(api.clone(), &dtrain);
    let config = booster.save_config().unwrap();
    assert!(config.contains("max_depth"));

    let mut other = Booster::new(api, [("eta", "0.9")], &[]).unwrap();
    other.load_config(&config).unwrap();
    assert_eq!(other.save_config().unwrap(), config);
}
