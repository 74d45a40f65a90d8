//! Model signature resolution from the MLmodel metadata document

use crate::models::descriptions::FieldDescriptions;
use crate::types::signature::{Column, ColumnType, ModelInfo, Signature};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Flavor written by every MLflow model; never the engine flavor
const GENERIC_FLAVOR: &str = "python_function";

/// Parsed signature and model info, built together from one document read
#[derive(Debug, Clone)]
struct ResolvedMetadata {
    signature: Arc<Signature>,
    info: Arc<ModelInfo>,
}

impl ResolvedMetadata {
    fn missing() -> Self {
        Self {
            signature: Arc::new(Signature::missing()),
            info: Arc::new(ModelInfo::missing()),
        }
    }
}

/// Memoized document plus the generation it belongs to
#[derive(Debug, Default)]
struct CacheSlot {
    generation: u64,
    resolved: Option<ResolvedMetadata>,
}

/// Parses the metadata document into a signature and memoizes it.
///
/// The cache lives until [`SignatureResolver::invalidate`] is called, which the
/// model manager does whenever it publishes a new backend. A parse started
/// before an invalidation is never stored after it.
pub struct SignatureResolver {
    metadata_path: PathBuf,
    descriptions_path: PathBuf,
    cache: RwLock<CacheSlot>,
}

impl SignatureResolver {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(metadata_path: P, descriptions_path: Q) -> Self {
        Self {
            metadata_path: metadata_path.into(),
            descriptions_path: descriptions_path.into(),
            cache: RwLock::new(CacheSlot::default()),
        }
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Ordered input columns and threshold. Never fails: an absent document
    /// yields `exists: false`.
    pub fn resolve(&self) -> Arc<Signature> {
        self.resolved().signature
    }

    /// Model description read from the same document
    pub fn info(&self) -> Arc<ModelInfo> {
        self.resolved().info
    }

    /// Drop the memoized document so the next call re-reads it
    pub fn invalidate(&self) {
        let mut cache = match self.cache.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.generation += 1;
        cache.resolved = None;
        drop(cache);
        debug!(path = %self.metadata_path.display(), "Signature cache invalidated");
    }

    fn resolved(&self) -> ResolvedMetadata {
        let generation = {
            let cache = match self.cache.read() {
                Ok(cache) => cache,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(resolved) = cache.resolved.as_ref() {
                return resolved.clone();
            }
            cache.generation
        };

        if !self.metadata_path.exists() {
            let missing = ResolvedMetadata::missing();
            self.store(generation, missing.clone());
            return missing;
        }

        let descriptions = FieldDescriptions::load_or_builtin(&self.descriptions_path);
        match read_metadata(&self.metadata_path, &descriptions) {
            Ok(resolved) => {
                info!(
                    path = %self.metadata_path.display(),
                    columns = resolved.signature.columns.len(),
                    best_threshold = ?resolved.signature.best_threshold,
                    "Model signature resolved"
                );
                self.store(generation, resolved.clone());
                resolved
            }
            Err(e) => {
                // Not cached: a corrected document is picked up on the next call
                error!(path = %self.metadata_path.display(), error = %e, "Unreadable metadata document");
                ResolvedMetadata::missing()
            }
        }
    }

    /// Keep `resolved` only if no invalidation happened since `generation`
    fn store(&self, generation: u64, resolved: ResolvedMetadata) {
        let mut cache = match self.cache.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        if cache.generation == generation {
            cache.resolved = Some(resolved);
        } else {
            debug!("Discarding metadata parsed before the last invalidation");
        }
    }
}

/// Subset of the MLmodel document this service reads
#[derive(Debug, Deserialize)]
struct MlModelDocument {
    #[serde(default)]
    flavors: BTreeMap<String, FlavorSection>,
    #[serde(default)]
    signature: Option<SignatureSection>,
    #[serde(default)]
    metadata: Option<MetadataSection>,
    #[serde(default)]
    model_id: Option<serde_yaml::Value>,
    #[serde(default)]
    run_id: Option<serde_yaml::Value>,
    #[serde(default)]
    utc_time_created: Option<serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct FlavorSection {
    #[serde(default)]
    model_type: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignatureSection {
    #[serde(default)]
    inputs: Option<InputsField>,
}

#[derive(Debug, Deserialize)]
struct MetadataSection {
    #[serde(default)]
    best_threshold: Option<serde_yaml::Value>,
}

/// Inputs are either a structured list or a JSON string encoding one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputsField {
    Structured(Vec<InputSpec>),
    Encoded(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputSpec {
    Bare(String),
    Described {
        #[serde(default)]
        name: Option<String>,
        #[serde(rename = "type", default)]
        column_type: Option<String>,
    },
}

fn read_metadata(path: &Path, descriptions: &FieldDescriptions) -> Result<ResolvedMetadata> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_metadata(&raw, descriptions)
}

fn parse_metadata(raw: &str, descriptions: &FieldDescriptions) -> Result<ResolvedMetadata> {
    let document: MlModelDocument =
        serde_yaml::from_str(raw).context("Failed to parse metadata document")?;

    let specs = match document.signature.and_then(|s| s.inputs) {
        Some(InputsField::Structured(specs)) => specs,
        Some(InputsField::Encoded(encoded)) => serde_json::from_str::<Vec<InputSpec>>(&encoded)
            .context("Failed to decode signature inputs")?,
        None => Vec::new(),
    };

    let columns: Vec<Column> = specs
        .into_iter()
        .filter_map(|spec| {
            let (name, column_type) = match spec {
                InputSpec::Bare(name) => (name, None),
                InputSpec::Described { name, column_type } => (name?, column_type),
            };
            let description = descriptions.get(&name).map(str::to_string);
            Some(Column {
                column_type: ColumnType::from(column_type.unwrap_or_else(|| "double".to_string())),
                description,
                name,
            })
        })
        .collect();

    let best_threshold = document
        .metadata
        .and_then(|m| m.best_threshold)
        .and_then(|v| yaml_to_f64(&v))
        .filter(|t| {
            let usable = t.is_finite() && (0.0..=1.0).contains(t);
            if !usable {
                warn!(best_threshold = *t, "Ignoring best_threshold outside [0, 1]");
            }
            usable
        });

    let flavor = document
        .flavors
        .iter()
        .find(|(name, _)| name.as_str() != GENERIC_FLAVOR)
        .or_else(|| document.flavors.iter().next())
        .map(|(_, flavor)| flavor);

    let info = ModelInfo {
        exists: true,
        model_type: flavor.and_then(|f| f.model_type.clone()),
        model_name: flavor.and_then(|f| f.data.clone()),
        version_id: document
            .model_id
            .as_ref()
            .or(document.run_id.as_ref())
            .and_then(yaml_to_string),
        created_on: document.utc_time_created.as_ref().and_then(yaml_to_string),
        nb_feature: columns.len(),
        best_threshold,
    };

    let signature = Signature {
        exists: true,
        columns,
        best_threshold,
    };

    Ok(ResolvedMetadata {
        signature: Arc::new(signature),
        info: Arc::new(info),
    })
}

fn yaml_to_f64(value: &serde_yaml::Value) -> Option<f64> {
    match value {
        serde_yaml::Value::Number(n) => n.as_f64(),
        serde_yaml::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn yaml_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
