//! Backend Comparison
//!
//! Loads the native and the portable model side by side, then reports mean
//! latency per row and the largest probability gap between them. Rows come
//! from the audit log when it has any, random values otherwise.

use anyhow::{bail, Context, Result};
use credit_scoring_service::{
    audit::AuditLog,
    config::AppConfig,
    engine::project,
    models::{convert, Backend, GraphLoader, ObliviousForest, SignatureResolver},
    types::signature::Signature,
};
use rand::Rng;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{info, warn};

/// Largest probability gap accepted between the two backends
const TOLERANCE: f64 = 0.01;

const MAX_ROWS: u32 = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    credit_scoring_service::init_tracing(&config.logging.level, &config.logging.format)?;

    let native_path = config.model.native_path();
    let portable_path = config.model.portable_path();

    if !native_path.exists() {
        bail!("Native model not found at {}", native_path.display());
    }
    if !portable_path.exists() {
        info!("Portable model missing, converting the native one");
        if !convert(&native_path, &portable_path) {
            bail!("Conversion to {} failed", portable_path.display());
        }
    }

    let forest = ObliviousForest::from_json_file(&native_path)?;
    let graph = GraphLoader::with_threads(config.model.onnx_threads)?.load(&portable_path)?;

    let resolver = SignatureResolver::new(config.model.metadata_path(), config.model.descriptions_path());
    let signature = resolver.resolve();
    if !signature.exists {
        warn!("No signature found, rows are generated positionally");
    }

    let width = forest.input_width().max(signature.nb_features());
    let native = Backend::NativeEnsemble(forest);
    let portable = Backend::PortableGraph(graph);

    let rows = match audit_rows(&config, &signature).await {
        Ok(rows) if !rows.is_empty() => {
            info!(rows = rows.len(), "Using rows from the audit log");
            rows
        }
        Ok(_) => {
            warn!("Audit log is empty, falling back to random rows");
            random_rows(width, 100)
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Audit log unreadable, falling back to random rows");
            random_rows(width, 100)
        }
    };

    let (native_scores, native_mean) = benchmark(&native, &rows)?;
    let (portable_scores, portable_mean) = benchmark(&portable, &rows)?;

    let max_diff = native_scores
        .iter()
        .zip(&portable_scores)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f64, f64::max);

    info!("Benchmark on {} features ({} rows)", width, rows.len());
    info!("Native mean latency   : {:>10.1} μs", native_mean);
    info!("Portable mean latency : {:>10.1} μs", portable_mean);
    if portable_mean > 0.0 {
        info!("Speedup               : {:>10.1}x", native_mean / portable_mean);
    }
    info!("Max probability gap   : {:>10.6}", max_diff);

    if max_diff > TOLERANCE {
        bail!("Backends disagree by {:.6} (tolerance {})", max_diff, TOLERANCE);
    }
    Ok(())
}

/// Inputs of recorded scoring calls, projected on the signature.
/// Missing values become 0.0 so both backends see the same row.
async fn audit_rows(config: &AppConfig, signature: &Signature) -> Result<Vec<Vec<Option<f64>>>> {
    if !signature.exists {
        return Ok(Vec::new());
    }
    let log = AuditLog::connect(&config.audit).await?;
    let records = log.recent(MAX_ROWS).await?;

    let mut rows = Vec::new();
    for record in records {
        let items: Vec<Map<String, Value>> = match record.entry.inputs {
            Value::Object(map) => vec![map],
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        for item in items {
            let row = project(signature, &item)?;
            rows.push(row.into_iter().map(|v| Some(v.unwrap_or(0.0))).collect());
        }
    }
    Ok(rows)
}

fn random_rows(width: usize, count: usize) -> Vec<Vec<Option<f64>>> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| (0..width).map(|_| Some(rng.gen_range(0.0..1.0))).collect())
        .collect()
}

/// Scores per row and mean latency in microseconds
fn benchmark(backend: &Backend, rows: &[Vec<Option<f64>>]) -> Result<(Vec<f64>, f64)> {
    let start = Instant::now();
    let scores = rows
        .iter()
        .map(|row| backend.predict_positive_probability(row))
        .collect::<Result<Vec<f64>, _>>()
        .with_context(|| format!("{} backend failed", backend.kind()))?;
    let mean_us = start.elapsed().as_secs_f64() * 1e6 / rows.len().max(1) as f64;
    Ok((scores, mean_us))
}
