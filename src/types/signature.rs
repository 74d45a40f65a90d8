//! Model signature data structures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of one signature column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    Double,
    Float,
    Long,
    Integer,
    Boolean,
    String,
    /// Any type name this service does not interpret
    Other(std::string::String),
}

impl From<std::string::String> for ColumnType {
    fn from(value: std::string::String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "double" => ColumnType::Double,
            "float" => ColumnType::Float,
            "long" => ColumnType::Long,
            "integer" | "int" => ColumnType::Integer,
            "boolean" | "bool" => ColumnType::Boolean,
            "string" => ColumnType::String,
            _ => ColumnType::Other(value),
        }
    }
}

impl From<ColumnType> for std::string::String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Double => "double",
            ColumnType::Float => "float",
            ColumnType::Long => "long",
            ColumnType::Integer => "integer",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "string",
            ColumnType::Other(name) => name.as_str(),
        };
        f.write_str(name)
    }
}

/// One named input of the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub description: Option<String>,
}

/// Ordered model inputs plus the decision threshold.
///
/// Column order is authoritative: it defines the positional vector fed to
/// the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub exists: bool,
    pub columns: Vec<Column>,
    pub best_threshold: Option<f64>,
}

impl Signature {
    /// Signature returned when no metadata document is available
    pub fn missing() -> Self {
        Self {
            exists: false,
            columns: Vec::new(),
            best_threshold: None,
        }
    }

    pub fn nb_features(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Descriptive metadata about the deployed model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub exists: bool,
    pub model_type: Option<String>,
    pub model_name: Option<String>,
    pub version_id: Option<String>,
    pub created_on: Option<String>,
    pub nb_feature: usize,
    pub best_threshold: Option<f64>,
}

impl ModelInfo {
    pub fn missing() -> Self {
        Self {
            exists: false,
            model_type: None,
            model_name: None,
            version_id: None,
            created_on: None,
            nb_feature: 0,
            best_threshold: None,
        }
    }
}

/// On-disk status of the configured artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub model_name: String,
    pub exists: bool,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_kb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}
