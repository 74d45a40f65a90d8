//! Fixtures shared by unit tests

use std::path::Path;

/// Declared feature order of the credit-scoring model
pub const FEATURE_NAMES: [&str; 15] = [
    "FE_EXT_SOURCE_MEAN",
    "BURO_MONTHS_BALANCE_SIZE_MEAN",
    "CODE_GENDER",
    "INSTAL_DPD_MEAN",
    "BURO_MONTHS_BALANCE_MAX_MIN",
    "FE_GOODS_CREDIT_RATE",
    "APPROVED_CNT_PAYMENT_MEAN",
    "YEARS_BIRTH",
    "YEARS_EMPLOYED",
    "AMT_ANNUITY",
    "NAME_FAMILY_STATUS_Married",
    "INSTAL_AMT_PAYMENT_SUM",
    "FE_EXT_SOURCE_MIN",
    "PREV_CNT_PAYMENT_MEAN",
    "FE_EXT_SOURCE_MAX",
];

/// MLmodel document declaring the credit-scoring features
pub fn mlmodel(best_threshold: Option<f64>) -> String {
    let inputs: Vec<String> = FEATURE_NAMES
        .iter()
        .map(|name| format!(r#"{{"type": "double", "name": "{}", "required": true}}"#, name))
        .collect();
    let threshold = match best_threshold {
        Some(t) => format!("metadata:\n  best_threshold: {}\n", t),
        None => String::new(),
    };
    format!(
        "flavors:\n  catboost:\n    data: model.cb\n    model_type: CatBoostClassifier\n\
         model_id: m-test\n\
         utc_time_created: '2025-03-02 10:15:00.000000'\n\
         signature:\n  inputs: '[{}]'\n{}",
        inputs.join(", "),
        threshold
    )
}

/// Write an MLmodel document into `dir`
pub fn write_mlmodel(dir: &Path, best_threshold: Option<f64>) {
    std::fs::write(dir.join("MLmodel"), mlmodel(best_threshold)).unwrap();
}

/// Native ensemble JSON with one depth-1 tree splitting `YEARS_BIRTH` at 40.
///
/// Younger applicants get raw score `-1.0`, older ones `+1.0`.
pub fn native_model_json() -> String {
    let float_features: Vec<String> = FEATURE_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| {
            format!(
                r#"{{"flat_feature_index": {i}, "feature_index": {i}, "feature_id": "{name}", "has_nans": false, "nan_value_treatment": "AsIs", "borders": []}}"#
            )
        })
        .collect();
    format!(
        r#"{{
  "features_info": {{"float_features": [{}]}},
  "oblivious_trees": [
    {{"leaf_values": [-1.0, 1.0], "leaf_weights": [10, 10], "splits": [{{"border": 40.0, "float_feature_index": 7, "split_index": 0, "split_type": "FloatFeature"}}]}}
  ],
  "scale_and_bias": [1.0, [0.0]]
}}"#,
        float_features.join(", ")
    )
}
