//! Native oblivious-tree ensemble evaluator
//!
//! Reads the CatBoost JSON model format and scores rows directly, without a
//! runtime dependency on the training library. Raw score is
//! `scale * sum(leaf values) + bias`; the positive-class probability is its
//! logistic transform.

use crate::error::InferenceError;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// Side a missing value goes to at a split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum NanTreatment {
    /// Missing values count as smaller than every border
    #[default]
    AsIs,
    AsFalse,
    AsTrue,
}

impl NanTreatment {
    /// Whether a missing value passes the `value > border` test
    pub fn goes_greater(self) -> bool {
        matches!(self, NanTreatment::AsTrue)
    }
}

/// One float input of the ensemble
#[derive(Debug, Clone, PartialEq)]
pub struct FloatFeature {
    /// Position in the input vector
    pub position: usize,
    pub nan_treatment: NanTreatment,
    pub name: Option<String>,
}

/// `value > border` test on one float feature
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Split {
    /// Index into the ensemble's float features
    pub feature: usize,
    pub border: f64,
}

/// Symmetric tree: every node at a given depth shares the same split
#[derive(Debug, Clone, PartialEq)]
pub struct ObliviousTree {
    pub splits: Vec<Split>,
    pub leaf_values: Vec<f64>,
}

impl ObliviousTree {
    pub fn depth(&self) -> usize {
        self.splits.len()
    }

    /// Leaf reached by a row; bit `d` is set when split `d` is passed
    fn leaf_index(&self, features: &[FloatFeature], values: &[Option<f64>]) -> usize {
        self.splits
            .iter()
            .enumerate()
            .fold(0usize, |index, (depth, split)| {
                let feature = &features[split.feature];
                let greater = match values[feature.position] {
                    Some(v) if !v.is_nan() => v > split.border,
                    _ => feature.nan_treatment.goes_greater(),
                };
                if greater {
                    index | (1 << depth)
                } else {
                    index
                }
            })
    }
}

/// Binary-classification tree ensemble
#[derive(Debug, Clone, PartialEq)]
pub struct ObliviousForest {
    features: Vec<FloatFeature>,
    trees: Vec<ObliviousTree>,
    scale: f64,
    bias: f64,
}

#[derive(Debug, Deserialize)]
struct JsonModel {
    #[serde(default)]
    features_info: JsonFeaturesInfo,
    #[serde(default)]
    oblivious_trees: Vec<JsonTree>,
    #[serde(default)]
    scale_and_bias: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonFeaturesInfo {
    #[serde(default)]
    float_features: Vec<JsonFloatFeature>,
    #[serde(default)]
    categorical_features: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonFloatFeature {
    flat_feature_index: usize,
    #[serde(default)]
    nan_value_treatment: NanTreatment,
    #[serde(default)]
    feature_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonTree {
    leaf_values: Vec<f64>,
    #[serde(default)]
    splits: Vec<JsonSplit>,
}

#[derive(Debug, Deserialize)]
struct JsonSplit {
    split_type: String,
    #[serde(default)]
    float_feature_index: Option<usize>,
    #[serde(default)]
    border: Option<f64>,
}

impl ObliviousForest {
    /// Build an ensemble after checking its structural invariants
    pub fn new(
        features: Vec<FloatFeature>,
        trees: Vec<ObliviousTree>,
        scale: f64,
        bias: f64,
    ) -> Result<Self> {
        for (tree_index, tree) in trees.iter().enumerate() {
            if tree.depth() >= usize::BITS as usize {
                bail!("tree {} is too deep ({})", tree_index, tree.depth());
            }
            let expected = 1usize << tree.depth();
            if tree.leaf_values.len() != expected {
                bail!(
                    "tree {} has {} leaf values, expected {} (only binary classifiers are supported)",
                    tree_index,
                    tree.leaf_values.len(),
                    expected
                );
            }
            if let Some(split) = tree.splits.iter().find(|s| s.feature >= features.len()) {
                bail!(
                    "tree {} splits on unknown float feature {}",
                    tree_index,
                    split.feature
                );
            }
        }
        if !scale.is_finite() || !bias.is_finite() {
            bail!("scale and bias must be finite");
        }
        Ok(Self {
            features,
            trees,
            scale,
            bias,
        })
    }

    /// Ensemble with no trees whose output is always `probability`
    pub fn constant(probability: f64) -> Self {
        let p = probability.clamp(1e-12, 1.0 - 1e-12);
        Self {
            features: Vec::new(),
            trees: Vec::new(),
            scale: 1.0,
            bias: (p / (1.0 - p)).ln(),
        }
    }

    /// Load a model exported in the CatBoost JSON format
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read native model {}", path.display()))?;
        let forest = Self::from_json_str(&raw)
            .with_context(|| format!("Failed to parse native model {}", path.display()))?;
        info!(
            path = %path.display(),
            trees = forest.trees.len(),
            features = forest.input_width(),
            "Native ensemble loaded"
        );
        Ok(forest)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let model: JsonModel = serde_json::from_str(raw)?;

        if !model.features_info.categorical_features.is_empty() {
            bail!("categorical features are not supported");
        }

        let features: Vec<FloatFeature> = model
            .features_info
            .float_features
            .into_iter()
            .map(|f| FloatFeature {
                position: f.flat_feature_index,
                nan_treatment: f.nan_value_treatment,
                name: f.feature_id,
            })
            .collect();

        let mut trees = Vec::with_capacity(model.oblivious_trees.len());
        for (tree_index, tree) in model.oblivious_trees.into_iter().enumerate() {
            let mut splits = Vec::with_capacity(tree.splits.len());
            for split in tree.splits {
                match (split.split_type.as_str(), split.float_feature_index, split.border) {
                    ("FloatFeature", Some(feature), Some(border)) => {
                        splits.push(Split { feature, border })
                    }
                    (kind, _, _) => bail!("tree {} uses unsupported split '{}'", tree_index, kind),
                }
            }
            trees.push(ObliviousTree {
                splits,
                leaf_values: tree.leaf_values,
            });
        }

        let (scale, bias) = parse_scale_and_bias(model.scale_and_bias.as_ref())?;
        Self::new(features, trees, scale, bias)
    }

    pub fn features(&self) -> &[FloatFeature] {
        &self.features
    }

    pub fn trees(&self) -> &[ObliviousTree] {
        &self.trees
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    /// Minimum input length accepted by the ensemble
    pub fn input_width(&self) -> usize {
        self.features
            .iter()
            .map(|f| f.position + 1)
            .max()
            .unwrap_or(0)
    }

    /// Raw (logit) score for one row; missing values follow the feature's
    /// NaN treatment
    pub fn raw_score(&self, values: &[Option<f64>]) -> Result<f64, InferenceError> {
        let width = self.input_width();
        if values.len() < width {
            return Err(InferenceError::new(format!(
                "expected at least {} features, got {}",
                width,
                values.len()
            )));
        }

        let sum: f64 = self
            .trees
            .iter()
            .map(|tree| tree.leaf_values[tree.leaf_index(&self.features, values)])
            .sum();
        Ok(self.scale * sum + self.bias)
    }

    /// Probability of the positive (refused) class
    pub fn predict_positive_probability(&self, values: &[Option<f64>]) -> Result<f64, InferenceError> {
        let raw = self.raw_score(values)?;
        Ok(sigmoid(raw))
    }
}

/// Logistic transform
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Accepts `[scale, bias]` and `[scale, [bias]]`
fn parse_scale_and_bias(value: Option<&Value>) -> Result<(f64, f64)> {
    let Some(value) = value else {
        return Ok((1.0, 0.0));
    };
    let parts = value
        .as_array()
        .filter(|parts| parts.len() == 2)
        .context("scale_and_bias must be a two-element array")?;
    let scale = parts[0].as_f64().context("scale must be a number")?;
    let bias = match &parts[1] {
        Value::Array(biases) if biases.len() == 1 => biases[0].as_f64(),
        Value::Array(biases) if biases.is_empty() => Some(0.0),
        other => other.as_f64(),
    }
    .context("bias must be a number or a single-element array")?;
    Ok((scale, bias))
}
