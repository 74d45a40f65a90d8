//! Native ensemble vs. converted ONNX graph on the same rows

use credit_scoring_service::models::{convert, Backend, GraphLoader, ObliviousForest};

/// Two trees over three features, one of them with `AsTrue` missing values
const NATIVE_MODEL: &str = r#"{
  "features_info": {"float_features": [
    {"flat_feature_index": 0, "feature_id": "FE_EXT_SOURCE_MEAN", "nan_value_treatment": "AsIs"},
    {"flat_feature_index": 1, "feature_id": "YEARS_BIRTH", "nan_value_treatment": "AsFalse"},
    {"flat_feature_index": 2, "feature_id": "AMT_ANNUITY", "nan_value_treatment": "AsTrue"}
  ]},
  "oblivious_trees": [
    {"leaf_values": [0.8, 0.2, -0.3, -0.9], "splits": [
      {"split_type": "FloatFeature", "float_feature_index": 0, "border": 0.5},
      {"split_type": "FloatFeature", "float_feature_index": 1, "border": 40.5}
    ]},
    {"leaf_values": [-0.4, 0.1, 0.3, 0.6, -0.2, 0.0, 0.4, 0.9], "splits": [
      {"split_type": "FloatFeature", "float_feature_index": 2, "border": 25000.0},
      {"split_type": "FloatFeature", "float_feature_index": 0, "border": 0.25},
      {"split_type": "FloatFeature", "float_feature_index": 1, "border": 60.5}
    ]}
  ],
  "scale_and_bias": [1.5, [-0.25]]
}"#;

fn rows() -> Vec<Vec<Option<f64>>> {
    let mut rows = Vec::new();
    for ext in [0.1, 0.3, 0.6, 0.9] {
        for age in [25.0, 45.0, 70.0] {
            for annuity in [12000.0, 40000.0] {
                rows.push(vec![Some(ext), Some(age), Some(annuity)]);
            }
        }
    }
    rows
}

#[test]
fn test_converted_graph_matches_native_ensemble() {
    let dir = tempfile::tempdir().unwrap();
    let native_path = dir.path().join("model.cb");
    let portable_path = dir.path().join("model.onnx");
    std::fs::write(&native_path, NATIVE_MODEL).unwrap();

    assert!(convert(&native_path, &portable_path));

    let native = Backend::NativeEnsemble(ObliviousForest::from_json_file(&native_path).unwrap());
    let graph = GraphLoader::with_threads(1)
        .unwrap()
        .load(&portable_path)
        .unwrap();
    let portable = Backend::PortableGraph(graph);

    for row in rows() {
        let expected = native.predict_positive_probability(&row).unwrap();
        let actual = portable.predict_positive_probability(&row).unwrap();
        assert!(
            (expected - actual).abs() <= 0.01,
            "row {:?}: native {} vs portable {}",
            row,
            expected,
            actual
        );
    }
}

#[test]
fn test_distinct_rows_get_distinct_scores() {
    let forest = ObliviousForest::from_json_str(NATIVE_MODEL).unwrap();
    let low = forest
        .predict_positive_probability(&[Some(0.1), Some(25.0), Some(12000.0)])
        .unwrap();
    let high = forest
        .predict_positive_probability(&[Some(0.9), Some(70.0), Some(40000.0)])
        .unwrap();
    assert!(low > high);
}

/// Every scaled leaf plus bias is non-negative
const NON_NEGATIVE_MODEL: &str = r#"{
  "features_info": {"float_features": [
    {"flat_feature_index": 0, "feature_id": "FE_EXT_SOURCE_MEAN", "nan_value_treatment": "AsIs"},
    {"flat_feature_index": 1, "feature_id": "YEARS_BIRTH", "nan_value_treatment": "AsIs"}
  ]},
  "oblivious_trees": [
    {"leaf_values": [0.1, 0.4, 0.7, 1.2], "splits": [
      {"split_type": "FloatFeature", "float_feature_index": 0, "border": 0.5},
      {"split_type": "FloatFeature", "float_feature_index": 1, "border": 40.5}
    ]}
  ],
  "scale_and_bias": [1.0, [0.2]]
}"#;

#[test]
fn test_non_negative_ensemble_still_gets_probabilities() {
    let dir = tempfile::tempdir().unwrap();
    let native_path = dir.path().join("model.cb");
    let portable_path = dir.path().join("model.onnx");
    std::fs::write(&native_path, NON_NEGATIVE_MODEL).unwrap();

    assert!(convert(&native_path, &portable_path));

    let native = Backend::NativeEnsemble(ObliviousForest::from_json_file(&native_path).unwrap());
    let graph = GraphLoader::with_threads(1)
        .unwrap()
        .load(&portable_path)
        .unwrap();
    let portable = Backend::PortableGraph(graph);

    for ext in [0.2, 0.8] {
        for age in [30.0, 50.0] {
            let row = [Some(ext), Some(age)];
            let expected = native.predict_positive_probability(&row).unwrap();
            let actual = portable.predict_positive_probability(&row).unwrap();
            // Raw sums would land in 0.3..=1.4 instead of 0.57..=0.8
            assert!(
                (expected - actual).abs() <= 0.01,
                "row {:?}: native {} vs portable {}",
                row,
                expected,
                actual
            );
        }
    }
}
