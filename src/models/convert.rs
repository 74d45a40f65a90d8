//! Native ensemble to ONNX conversion

use crate::models::ensemble::ObliviousForest;
use crate::models::onnx::{
    data_type, AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    StringStringEntryProto, ValueInfoProto,
};
use anyhow::{bail, Context, Result};
use prost::Message;
use std::path::Path;
use tracing::{error, info};

pub const ONNX_DOMAIN: &str = "ai.catboost";
pub const ONNX_MODEL_VERSION: i64 = 1;
pub const ONNX_DESCRIPTION: &str = "Credit scoring binary classifier (positive class: refused)";

pub const INPUT_NAME: &str = "features";
pub const LABEL_OUTPUT: &str = "label";
pub const PROBABILITY_OUTPUT: &str = "probabilities";

const ML_DOMAIN: &str = "ai.onnx.ml";

/// Convert a native artifact into the portable format.
///
/// Returns `false` (and logs) on any failure so callers can fall back to the
/// native artifact.
pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(native_path: P, output_path: Q) -> bool {
    let native_path = native_path.as_ref();
    let output_path = output_path.as_ref();

    match try_convert(native_path, output_path) {
        Ok(bytes) => {
            info!(
                native = %native_path.display(),
                output = %output_path.display(),
                bytes = bytes,
                "Native model converted to ONNX"
            );
            true
        }
        Err(e) => {
            error!(
                native = %native_path.display(),
                output = %output_path.display(),
                error = %format!("{:#}", e),
                "ONNX conversion failed"
            );
            false
        }
    }
}

fn try_convert(native_path: &Path, output_path: &Path) -> Result<usize> {
    let forest = ObliviousForest::from_json_file(native_path)?;
    let model = forest_to_onnx(&forest)?;
    let bytes = model.encode_to_vec();

    // Write next to the target, then rename over it
    let tmp_path = output_path.with_extension("onnx.tmp");
    std::fs::write(&tmp_path, &bytes)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, output_path)
        .with_context(|| format!("Failed to move model into {}", output_path.display()))?;
    Ok(bytes.len())
}

/// Flattened `TreeEnsembleClassifier` attribute columns
#[derive(Default)]
struct TreeTables {
    treeids: Vec<i64>,
    nodeids: Vec<i64>,
    featureids: Vec<i64>,
    modes: Vec<&'static str>,
    values: Vec<f32>,
    truenodeids: Vec<i64>,
    falsenodeids: Vec<i64>,
    missing_tracks_true: Vec<i64>,
    class_treeids: Vec<i64>,
    class_nodeids: Vec<i64>,
    class_ids: Vec<i64>,
    class_weights: Vec<f32>,
}

impl TreeTables {
    fn branch(&mut self, tree: i64, node: i64, feature: i64, border: f32, nan_greater: bool) {
        self.treeids.push(tree);
        self.nodeids.push(node);
        self.featureids.push(feature);
        self.modes.push("BRANCH_LEQ");
        self.values.push(border);
        self.truenodeids.push(2 * node + 1);
        self.falsenodeids.push(2 * node + 2);
        self.missing_tracks_true.push(if nan_greater { 0 } else { 1 });
    }

    fn leaf(&mut self, tree: i64, node: i64, weight: f32) {
        self.treeids.push(tree);
        self.nodeids.push(node);
        self.featureids.push(0);
        self.modes.push("LEAF");
        self.values.push(0.0);
        self.truenodeids.push(0);
        self.falsenodeids.push(0);
        self.missing_tracks_true.push(0);

        // One column per class. With a single column the runtime takes a
        // binary shortcut that skips LOGISTIC when every weight is >= 0.
        for (class, signed) in [(0, -weight), (1, weight)] {
            self.class_treeids.push(tree);
            self.class_nodeids.push(node);
            self.class_ids.push(class);
            self.class_weights.push(signed);
        }
    }
}

/// Build the ONNX model for an ensemble.
///
/// Each oblivious tree is expanded into a complete binary tree in
/// breadth-first order: node `n` has children `2n + 1` (value <= border) and
/// `2n + 2`. Level `l` tests split `depth - 1 - l`, which makes the
/// in-level index of a leaf equal to the native leaf index. Each leaf adds
/// `-w` to class 0 and `w` to class 1; with a LOGISTIC post-transform the
/// runtime reports `[sigmoid(-s), sigmoid(s)]`, which sums to one.
pub fn forest_to_onnx(forest: &ObliviousForest) -> Result<ModelProto> {
    if forest.trees().is_empty() {
        bail!("ensemble has no trees");
    }
    let width = forest.input_width();
    if width == 0 {
        bail!("ensemble declares no input features");
    }

    let mut tables = TreeTables::default();
    for (tree_id, tree) in forest.trees().iter().enumerate() {
        let tree_id = tree_id as i64;
        let depth = tree.depth();

        for level in 0..depth {
            let split = tree.splits[depth - 1 - level];
            let feature = &forest.features()[split.feature];
            let first = (1i64 << level) - 1;
            for offset in 0..(1i64 << level) {
                tables.branch(
                    tree_id,
                    first + offset,
                    feature.position as i64,
                    split.border as f32,
                    feature.nan_treatment.goes_greater(),
                );
            }
        }

        // Exactly one leaf per tree is reached, so the bias rides on tree 0
        let bias = if tree_id == 0 { forest.bias() } else { 0.0 };
        let first_leaf = (1i64 << depth) - 1;
        for (index, value) in tree.leaf_values.iter().enumerate() {
            let weight = value * forest.scale() + bias;
            tables.leaf(tree_id, first_leaf + index as i64, weight as f32);
        }
    }

    let node = NodeProto {
        input: vec![INPUT_NAME.to_string()],
        output: vec![LABEL_OUTPUT.to_string(), PROBABILITY_OUTPUT.to_string()],
        name: "TreeEnsembleClassifier".to_string(),
        op_type: "TreeEnsembleClassifier".to_string(),
        domain: ML_DOMAIN.to_string(),
        attribute: vec![
            AttributeProto::ints("class_ids", tables.class_ids),
            AttributeProto::ints("class_nodeids", tables.class_nodeids),
            AttributeProto::ints("class_treeids", tables.class_treeids),
            AttributeProto::floats("class_weights", tables.class_weights),
            AttributeProto::ints("classlabels_int64s", vec![0, 1]),
            AttributeProto::ints("nodes_falsenodeids", tables.falsenodeids),
            AttributeProto::ints("nodes_featureids", tables.featureids),
            AttributeProto::ints(
                "nodes_missing_value_tracks_true",
                tables.missing_tracks_true,
            ),
            AttributeProto::strings("nodes_modes", &tables.modes),
            AttributeProto::ints("nodes_nodeids", tables.nodeids),
            AttributeProto::ints("nodes_treeids", tables.treeids),
            AttributeProto::ints("nodes_truenodeids", tables.truenodeids),
            AttributeProto::floats("nodes_values", tables.values),
            AttributeProto::string("post_transform", "LOGISTIC"),
        ],
    };

    let graph = GraphProto {
        node: vec![node],
        name: "credit_scoring".to_string(),
        doc_string: ONNX_DESCRIPTION.to_string(),
        input: vec![ValueInfoProto::tensor(
            INPUT_NAME,
            data_type::FLOAT,
            &[None, Some(width as i64)],
        )],
        output: vec![
            ValueInfoProto::tensor(LABEL_OUTPUT, data_type::INT64, &[None]),
            ValueInfoProto::tensor(PROBABILITY_OUTPUT, data_type::FLOAT, &[None, Some(2)]),
        ],
    };

    let feature_names: Vec<String> = forest
        .features()
        .iter()
        .map(|f| f.name.clone().unwrap_or_else(|| format!("f{}", f.position)))
        .collect();

    Ok(ModelProto {
        ir_version: 8,
        producer_name: env!("CARGO_PKG_NAME").to_string(),
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        domain: ONNX_DOMAIN.to_string(),
        model_version: ONNX_MODEL_VERSION,
        doc_string: ONNX_DESCRIPTION.to_string(),
        graph: Some(graph),
        opset_import: vec![
            OperatorSetIdProto {
                domain: String::new(),
                version: 13,
            },
            OperatorSetIdProto {
                domain: ML_DOMAIN.to_string(),
                version: 2,
            },
        ],
        metadata_props: vec![StringStringEntryProto {
            key: "feature_names".to_string(),
            value: feature_names.join(","),
        }],
    })
}
