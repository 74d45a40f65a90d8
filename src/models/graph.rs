//! Portable graph backend on ONNX Runtime

use crate::error::InferenceError;
use anyhow::{Context, Result};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Loaded ONNX session with the names of its input and probability output
pub struct GraphSession {
    /// Artifact the session was built from
    path: PathBuf,
    /// ONNX Runtime session; `run` needs exclusive access
    session: Mutex<Session>,
    /// Input name for the model
    input_name: String,
    /// Output name for probabilities
    output_name: String,
}

impl std::fmt::Debug for GraphSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSession")
            .field("path", &self.path)
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .finish()
    }
}

/// Loader for ONNX sessions
pub struct GraphLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl GraphLoader {
    /// Create a loader with the specified number of intra-op threads
    pub fn with_threads(onnx_threads: usize) -> Result<Self> {
        // Initialize ONNX Runtime
        ort::init().commit()?;
        debug!(onnx_threads = onnx_threads, "ONNX Runtime initialized");
        Ok(Self {
            onnx_threads: onnx_threads.max(1),
        })
    }

    /// Load a single ONNX model from file
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<GraphSession> {
        let path = path.as_ref();

        info!(path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("ONNX model declares no input")?;

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .context("ONNX model declares no output")?;

        info!(
            path = %path.display(),
            input = %input_name,
            output = %output_name,
            "ONNX model loaded successfully"
        );

        Ok(GraphSession {
            path: path.to_path_buf(),
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl GraphSession {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Probability of the positive class. Missing values become 0.0 so the
    /// input is a dense single-row tensor.
    pub fn predict_positive_probability(&self, values: &[Option<f64>]) -> Result<f64, InferenceError> {
        use ort::value::Tensor;

        let features: Vec<f32> = values.iter().map(|v| v.unwrap_or(0.0) as f32).collect();

        // Prepare input tensor - shape [1, num_features]
        let shape = vec![1_i64, features.len() as i64];
        let input_tensor = Tensor::from_array((shape, features))
            .map_err(|e| InferenceError::new(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| InferenceError::new(format!("Lock error: {}", e)))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| InferenceError::new(e.to_string()))?;

        extract_probability(&outputs, &self.output_name)
    }
}

/// Extract the positive-class probability from the session outputs.
/// Handles both tensor outputs and seq(map) outputs (ZipMap exports).
fn extract_probability(
    outputs: &ort::session::SessionOutputs,
    output_name: &str,
) -> Result<f64, InferenceError> {
    if let Some(output) = outputs.get(output_name) {
        let dtype = output.dtype();

        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let prob = positive_prob_from_tensor(shape, data)?;
            debug!(prob = prob, "Extracted from tensor");
            return Ok(prob);
        }

        if DynSequenceValueType::can_downcast(dtype) {
            return extract_from_sequence_map(output);
        }
    }

    // Fallback: first non-label output that yields a probability
    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let prob = positive_prob_from_tensor(shape, data)?;
            debug!(output = %name, prob = prob, "Extracted from tensor (fallback)");
            return Ok(prob);
        }
    }

    Err(InferenceError::new(format!(
        "No probability output found (expected '{}')",
        output_name
    )))
}

/// Extract probability from seq(map(int64, float)) format
fn extract_from_sequence_map(output: &ort::value::DynValue) -> Result<f64, InferenceError> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| InferenceError::new(format!("Failed to downcast to sequence: {}", e)))?;

    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .map_err(|e| InferenceError::new(e.to_string()))?;

    // Single-row batch: first map holds the class probabilities
    let map_value = maps
        .first()
        .ok_or_else(|| InferenceError::new("Empty probability sequence"))?;

    let kv_pairs = map_value
        .try_extract_key_values::<i64, f32>()
        .map_err(|e| InferenceError::new(e.to_string()))?;

    if let Some((_, prob)) = kv_pairs.iter().find(|(class_id, _)| *class_id == 1) {
        return Ok(*prob as f64);
    }
    if let Some((_, prob)) = kv_pairs.iter().find(|(class_id, _)| *class_id == 0) {
        return Ok(1.0 - *prob as f64);
    }

    Err(InferenceError::new("No class probability found in map"))
}

/// Second column of a `[1, classes]` (or `[classes]`) probability tensor
fn positive_prob_from_tensor(shape: &ort::tensor::Shape, data: &[f32]) -> Result<f64, InferenceError> {
    let dims: Vec<i64> = shape.iter().copied().collect();
    let classes = dims.last().copied().unwrap_or(0);

    match classes {
        c if c >= 2 && data.len() >= 2 => Ok(data[1] as f64),
        // Single-column output already is the positive probability
        1 if !data.is_empty() => Ok(data[0] as f64),
        _ => Err(InferenceError::new(format!(
            "Unexpected probability tensor shape {:?}",
            dims
        ))),
    }
}
