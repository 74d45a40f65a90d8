//! Inference backends behind one "positive-class probability" contract

use crate::error::InferenceError;
use crate::models::ensemble::ObliviousForest;
use crate::models::graph::GraphSession;
use serde::Serialize;
use std::fmt;

/// Which engine a backend runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    NativeEnsemble,
    PortableGraph,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::NativeEnsemble => f.write_str("native_ensemble"),
            BackendKind::PortableGraph => f.write_str("portable_graph"),
        }
    }
}

/// One loaded inference engine.
///
/// Shared read-only between requests; replaced as a whole on reload, never
/// mutated in place.
#[derive(Debug)]
pub enum Backend {
    /// Tree ensemble evaluated natively; missing values reach the trees
    NativeEnsemble(ObliviousForest),
    /// ONNX graph; missing values are zero-filled
    PortableGraph(GraphSession),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::NativeEnsemble(_) => BackendKind::NativeEnsemble,
            Backend::PortableGraph(_) => BackendKind::PortableGraph,
        }
    }

    /// Probability of the positive (refused) class for one ordered row
    pub fn predict_positive_probability(&self, values: &[Option<f64>]) -> Result<f64, InferenceError> {
        let probability = match self {
            Backend::NativeEnsemble(forest) => forest.predict_positive_probability(values)?,
            Backend::PortableGraph(session) => session.predict_positive_probability(values)?,
        };
        if !probability.is_finite() {
            return Err(InferenceError::new(format!(
                "{} backend returned a non-finite probability",
                self.kind()
            )));
        }
        Ok(probability.clamp(0.0, 1.0))
    }
}
