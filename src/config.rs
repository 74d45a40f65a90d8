//! Configuration management for the credit scoring service

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    pub audit: AuditConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,
    /// Listen port
    pub port: u16,
}

/// Model directory layout and inference settings
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Directory holding the artifacts and the metadata document
    pub model_dir: PathBuf,
    /// Native tree-ensemble artifact
    #[serde(default = "default_native_filename")]
    pub native_filename: String,
    /// Portable ONNX artifact
    #[serde(default = "default_portable_filename")]
    pub portable_filename: String,
    /// MLmodel-style metadata document
    #[serde(default = "default_metadata_filename")]
    pub metadata_filename: String,
    /// Optional field-description table
    #[serde(default = "default_descriptions_filename")]
    pub descriptions_filename: String,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Threshold used when the metadata does not carry one
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,
}

fn default_native_filename() -> String {
    "model.cb".to_string()
}

fn default_portable_filename() -> String {
    "model.onnx".to_string()
}

fn default_metadata_filename() -> String {
    "MLmodel".to_string()
}

fn default_descriptions_filename() -> String {
    "field_descriptions.json".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

fn default_threshold() -> f64 {
    0.5
}

impl ModelConfig {
    pub fn native_path(&self) -> PathBuf {
        self.model_dir.join(&self.native_filename)
    }

    pub fn portable_path(&self) -> PathBuf {
        self.model_dir.join(&self.portable_filename)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.model_dir.join(&self.metadata_filename)
    }

    pub fn descriptions_path(&self) -> PathBuf {
        self.model_dir.join(&self.descriptions_filename)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("exported_model"),
            native_filename: default_native_filename(),
            portable_filename: default_portable_filename(),
            metadata_filename: default_metadata_filename(),
            descriptions_filename: default_descriptions_filename(),
            onnx_threads: default_onnx_threads(),
            default_threshold: default_threshold(),
        }
    }
}

/// Remote artifact storage. Every value is an opaque string handed to the
/// artifact store; none of them is required at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the model hub
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Repository identifier (`HF_REPO_ID`)
    #[serde(default)]
    pub repo_id: Option<String>,
    /// Artifact filename inside the repository (`HF_FILENAME`)
    #[serde(default = "default_native_filename")]
    pub filename: String,
    /// Access token (`HUGGINGFACE_TOKEN`)
    #[serde(default)]
    pub token: Option<String>,
    /// Tracking server URI (`MLFLOW_TRACKING_URI`), reported only
    #[serde(default)]
    pub tracking_uri: Option<String>,
}

fn default_endpoint() -> String {
    "https://huggingface.co".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            repo_id: None,
            filename: default_native_filename(),
            token: None,
            tracking_uri: None,
        }
    }
}

/// Audit log store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Disable to serve without an audit store
    pub enabled: bool,
    /// sqlx connection string
    pub database_url: String,
    /// Pending entries kept before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_connections() -> u32 {
    5
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between summaries, 0 disables the reporter
    pub report_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from `SCORING_CONFIG` or the default file
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("SCORING_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path, then apply environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("SCORING").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app.remote.apply_env(|key| std::env::var(key).ok());
        Ok(app)
    }
}

impl RemoteConfig {
    /// Apply the conventional remote-storage variables on top of the file values.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(repo_id) = non_empty("HF_REPO_ID") {
            self.repo_id = Some(repo_id);
        }
        if let Some(filename) = non_empty("HF_FILENAME") {
            self.filename = filename;
        }
        if let Some(token) = non_empty("HUGGINGFACE_TOKEN") {
            self.token = Some(token);
        }
        if let Some(uri) = non_empty("MLFLOW_TRACKING_URI") {
            self.tracking_uri = Some(uri);
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "0.0.0.0".to_string(),
                port: 8000,
            },
            model: ModelConfig::default(),
            remote: RemoteConfig::default(),
            audit: AuditConfig {
                enabled: true,
                database_url: "sqlite://prediction_logs.db?mode=rwc".to_string(),
                queue_capacity: default_queue_capacity(),
                max_connections: default_max_connections(),
            },
            metrics: MetricsConfig {
                report_interval_secs: 60,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.model.default_threshold, 0.5);
        assert_eq!(config.model.native_path(), PathBuf::from("exported_model/model.cb"));
        assert_eq!(config.model.portable_path(), PathBuf::from("exported_model/model.onnx"));
        assert_eq!(config.remote.filename, "model.cb");
        assert!(config.remote.repo_id.is_none());
    }

    #[test]
    fn test_remote_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HF_REPO_ID", "acme/credit-model"),
            ("HF_FILENAME", "model.onnx"),
            ("HUGGINGFACE_TOKEN", "hf_secret"),
            ("MLFLOW_TRACKING_URI", "  "),
        ]
        .into_iter()
        .collect();

        let mut remote = RemoteConfig::default();
        remote.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(remote.repo_id.as_deref(), Some("acme/credit-model"));
        assert_eq!(remote.filename, "model.onnx");
        assert_eq!(remote.token.as_deref(), Some("hf_secret"));
        // Blank values do not override
        assert!(remote.tracking_uri.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "127.0.0.1"
port = 9100

[model]
model_dir = "/srv/models"

[audit]
enabled = false
database_url = "sqlite::memory:"

[metrics]
report_interval_secs = 0

[logging]
level = "debug"
format = "json"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.model.metadata_path(), PathBuf::from("/srv/models/MLmodel"));
        assert_eq!(config.model.onnx_threads, 1);
        assert!(!config.audit.enabled);
        assert_eq!(config.audit.queue_capacity, 1024);
        assert_eq!(config.remote.endpoint, "https://huggingface.co");
    }
}
