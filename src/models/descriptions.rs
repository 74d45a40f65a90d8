//! Human-readable descriptions of the model inputs

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Field-description table keyed by column name.
#[derive(Debug, Clone, Default)]
pub struct FieldDescriptions {
    entries: HashMap<String, String>,
}

impl FieldDescriptions {
    /// Built-in descriptions for the credit-scoring features
    pub fn builtin() -> Self {
        let entries = [
            ("FE_EXT_SOURCE_MEAN", "Mean of the external credit-bureau scores"),
            ("FE_EXT_SOURCE_MIN", "Lowest external credit-bureau score"),
            ("FE_EXT_SOURCE_MAX", "Highest external credit-bureau score"),
            (
                "BURO_MONTHS_BALANCE_SIZE_MEAN",
                "Average number of monthly balances reported per bureau credit",
            ),
            (
                "BURO_MONTHS_BALANCE_MAX_MIN",
                "Oldest monthly balance reported across bureau credits",
            ),
            ("CODE_GENDER", "Client gender (0 or 1)"),
            ("INSTAL_DPD_MEAN", "Average days past due on previous instalments"),
            (
                "INSTAL_AMT_PAYMENT_SUM",
                "Total amount paid on previous instalments",
            ),
            ("FE_GOODS_CREDIT_RATE", "Ratio of goods price to credit amount"),
            (
                "APPROVED_CNT_PAYMENT_MEAN",
                "Average term of previously approved applications",
            ),
            (
                "PREV_CNT_PAYMENT_MEAN",
                "Average term of all previous applications",
            ),
            ("YEARS_BIRTH", "Client age in years"),
            ("YEARS_EMPLOYED", "Years in current employment"),
            ("AMT_ANNUITY", "Loan annuity amount"),
            ("NAME_FAMILY_STATUS_Married", "Client is married"),
        ]
        .into_iter()
        .map(|(name, text)| (name.to_string(), text.to_string()))
        .collect();

        Self { entries }
    }

    /// Load a JSON object of `name -> description` pairs
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let entries: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Self { entries })
    }

    /// Built-in table overridden by the file entries when the file exists
    pub fn load_or_builtin<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let mut table = Self::builtin();
        if !path.exists() {
            return table;
        }
        match Self::from_file(path) {
            Ok(file) => {
                debug!(path = %path.display(), count = file.entries.len(), "Field descriptions loaded");
                table.entries.extend(file.entries);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable field descriptions");
            }
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
