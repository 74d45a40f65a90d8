//! Decision engine: signature projection, threshold and uniform result

use crate::models::backend::Backend;
use crate::models::signature::SignatureResolver;
use crate::types::decision::{Decision, DecisionResult, PredictionError};
use crate::types::signature::Signature;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub const MISSING_MODEL: &str = "Model instance is missing";
pub const MISSING_SIGNATURE: &str = "Signature file not found";

/// Turns a named input mapping into a credit decision using the current
/// signature and whichever backend is serving.
pub struct DecisionEngine {
    signatures: Arc<SignatureResolver>,
    /// Used when the metadata carries no `best_threshold`
    default_threshold: f64,
}

impl DecisionEngine {
    pub fn new(signatures: Arc<SignatureResolver>, default_threshold: f64) -> Self {
        Self {
            signatures,
            default_threshold,
        }
    }

    pub fn signatures(&self) -> &SignatureResolver {
        &self.signatures
    }

    /// Score one input mapping.
    ///
    /// Never panics or propagates backend failures: every failure comes back
    /// as a [`PredictionError`] payload.
    pub fn predict(
        &self,
        backend: Option<&Backend>,
        raw: &Map<String, Value>,
    ) -> Result<DecisionResult, PredictionError> {
        let start = Instant::now();

        let backend = backend.ok_or_else(|| PredictionError::new(MISSING_MODEL))?;

        let signature = self.signatures.resolve();
        if !signature.exists {
            return Err(PredictionError::new(MISSING_SIGNATURE));
        }

        let values = project(&signature, raw)?;
        let threshold = self.threshold(&signature);

        let score = backend
            .predict_positive_probability(&values)
            .map_err(|e| PredictionError::new(e.to_string()))?;

        // Compare on the unrounded score
        let decision = Decision::from_score(score, threshold);

        debug!(
            backend = %backend.kind(),
            score = score,
            threshold = threshold,
            decision = %decision,
            latency_us = start.elapsed().as_micros() as u64,
            "Decision computed"
        );

        Ok(DecisionResult {
            score: round4(score),
            prediction: decision.prediction(),
            threshold,
            decision,
        })
    }

    fn threshold(&self, signature: &Signature) -> f64 {
        match signature.best_threshold {
            Some(threshold) => threshold,
            None => {
                warn!(
                    threshold = self.default_threshold,
                    "No best_threshold in model metadata, using the default (not backend-specific)"
                );
                self.default_threshold
            }
        }
    }
}

/// Order `raw` by the signature's columns.
///
/// Missing keys become `None`; present values must be numeric, boolean or a
/// numeric string.
pub fn project(
    signature: &Signature,
    raw: &Map<String, Value>,
) -> Result<Vec<Option<f64>>, PredictionError> {
    signature
        .columns
        .iter()
        .map(|column| match raw.get(&column.name) {
            None => Ok(None),
            Some(value) => numeric(value).map_err(|reason| {
                PredictionError::new(format!("{}: {}", column.name, reason))
            }),
        })
        .collect()
}

fn numeric(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("{} is not representable as a float", n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("'{}' is not numeric", s)),
        Value::Array(_) | Value::Object(_) => Err("expected a number".to_string()),
    }
}

fn round4(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ensemble::ObliviousForest;
    use crate::test_support::{write_mlmodel, FEATURE_NAMES};
    use crate::types::scoring::ScoringData;
    use serde_json::json;

    fn engine(best_threshold: Option<f64>) -> (tempfile::TempDir, DecisionEngine) {
        let dir = tempfile::tempdir().unwrap();
        write_mlmodel(dir.path(), best_threshold);
        let resolver = SignatureResolver::new(
            dir.path().join("MLmodel"),
            dir.path().join("field_descriptions.json"),
        );
        (dir, DecisionEngine::new(Arc::new(resolver), 0.5))
    }

    fn stub(probability: f64) -> Backend {
        Backend::NativeEnsemble(ObliviousForest::constant(probability))
    }

    fn reference_input() -> Map<String, Value> {
        ScoringData::example().to_features()
    }

    #[test]
    fn test_granted_below_threshold() {
        let (_dir, engine) = engine(Some(0.5));
        let result = engine.predict(Some(&stub(0.42)), &reference_input()).unwrap();
        assert_eq!(result.score, 0.42);
        assert_eq!(result.prediction, 0);
        assert_eq!(result.threshold, 0.5);
        assert_eq!(result.decision, Decision::Granted);
    }

    #[test]
    fn test_refused_at_or_above_threshold() {
        let (_dir, engine) = engine(Some(0.5));
        let result = engine.predict(Some(&stub(0.58)), &reference_input()).unwrap();
        assert_eq!(result.prediction, 1);
        assert_eq!(result.decision, Decision::Refused);
    }

    #[test]
    fn test_missing_model() {
        let (_dir, engine) = engine(Some(0.5));
        let err = engine.predict(None, &reference_input()).unwrap_err();
        assert_eq!(err.error, MISSING_MODEL);
    }

    #[test]
    fn test_missing_signature() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SignatureResolver::new(dir.path().join("MLmodel"), dir.path().join("x.json"));
        let engine = DecisionEngine::new(Arc::new(resolver), 0.5);
        let err = engine.predict(Some(&stub(0.3)), &reference_input()).unwrap_err();
        assert_eq!(err.error, MISSING_SIGNATURE);
    }

    #[test]
    fn test_default_threshold_when_absent() {
        let (_dir, engine) = engine(None);
        let result = engine.predict(Some(&stub(0.49)), &reference_input()).unwrap();
        assert_eq!(result.threshold, 0.5);
        assert_eq!(result.decision, Decision::Granted);
    }

    #[test]
    fn test_metadata_threshold_wins() {
        let (_dir, engine) = engine(Some(0.4));
        let result = engine.predict(Some(&stub(0.42)), &reference_input()).unwrap();
        assert_eq!(result.threshold, 0.4);
        assert_eq!(result.decision, Decision::Refused);
    }

    #[test]
    fn test_identical_inputs_identical_output() {
        let (_dir, engine) = engine(Some(0.5));
        let backend = stub(0.123456);
        let first = engine.predict(Some(&backend), &reference_input()).unwrap();
        let second = engine.predict(Some(&backend), &reference_input()).unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(first.score, 0.1235);
    }

    #[test]
    fn test_comparison_uses_unrounded_score() {
        let (_dir, engine) = engine(Some(0.50004));
        // Rounds to 0.5 but stays below the threshold
        let result = engine.predict(Some(&stub(0.50002)), &reference_input()).unwrap();
        assert_eq!(result.score, 0.5);
        assert_eq!(result.decision, Decision::Granted);
    }

    #[test]
    fn test_projection_follows_column_order() {
        let (_dir, engine) = engine(Some(0.5));
        let signature = engine.signatures().resolve();

        let mut raw = Map::new();
        raw.insert("YEARS_BIRTH".to_string(), json!(59));
        raw.insert("NAME_FAMILY_STATUS_Married".to_string(), json!(true));
        raw.insert("AMT_ANNUITY".to_string(), json!("20952"));
        raw.insert("UNKNOWN".to_string(), json!(1));

        let values = project(&signature, &raw).unwrap();
        assert_eq!(values.len(), FEATURE_NAMES.len());
        assert_eq!(values[7], Some(59.0));
        assert_eq!(values[9], Some(20952.0));
        assert_eq!(values[10], Some(1.0));
        assert_eq!(values.iter().filter(|v| v.is_none()).count(), 12);

        assert_eq!(project(&signature, &Map::new()).unwrap().len(), FEATURE_NAMES.len());
    }

    #[test]
    fn test_non_numeric_value_is_an_error_payload() {
        let (_dir, engine) = engine(Some(0.5));
        let mut raw = reference_input();
        raw.insert("AMT_ANNUITY".to_string(), json!("a lot"));
        let err = engine.predict(Some(&stub(0.3)), &raw).unwrap_err();
        assert!(err.error.starts_with("AMT_ANNUITY"));
    }

    #[test]
    fn test_native_ensemble_end_to_end() {
        let (_dir, engine) = engine(Some(0.5));
        let backend = Backend::NativeEnsemble(
            ObliviousForest::from_json_str(&crate::test_support::native_model_json()).unwrap(),
        );
        // Age 59 is above the border: raw +1.0
        let result = engine.predict(Some(&backend), &reference_input()).unwrap();
        assert_eq!(result.decision, Decision::Refused);

        // Missing YEARS_BIRTH follows the NaN treatment (not greater)
        let result = engine.predict(Some(&backend), &Map::new()).unwrap();
        assert_eq!(result.decision, Decision::Granted);
    }

    #[test]
    fn test_backend_failure_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("MLmodel"), "signature:\n  inputs: '[\"YEARS_BIRTH\"]'\n").unwrap();
        let resolver = SignatureResolver::new(dir.path().join("MLmodel"), dir.path().join("x.json"));
        let engine = DecisionEngine::new(Arc::new(resolver), 0.5);
        let backend = Backend::NativeEnsemble(
            ObliviousForest::from_json_str(&crate::test_support::native_model_json()).unwrap(),
        );

        let err = engine.predict(Some(&backend), &reference_input()).unwrap_err();
        assert_eq!(err.error, "expected at least 15 features, got 1");
    }
}
