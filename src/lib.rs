//! Credit Scoring Service Library
//!
//! Serves a pre-trained credit-scoring classifier over HTTP. The model runs
//! either natively (oblivious tree ensemble) or as an ONNX graph; decisions
//! follow the model's declared signature and threshold, and the serving model
//! can be hot-reloaded from a remote hub.

pub mod api;
pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod remote;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::AppConfig;
pub use engine::DecisionEngine;
pub use error::{InferenceError, ServiceError};
pub use lifecycle::ModelManager;
pub use models::backend::{Backend, BackendKind};
pub use types::{decision::DecisionResult, scoring::ScoringData, signature::Signature};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `level`; `format = "json"` selects JSON output.
pub fn init_tracing(level: &str, format: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| {
        tracing_subscriber::EnvFilter::try_new(format!("credit_scoring_service={}", level))
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
