//! Scoring request payload and its validation rules

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Rejection of a scoring payload before it reaches the decision engine
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Client features expected by the credit-scoring model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringData {
    /// Mean of the external sources
    #[serde(rename = "FE_EXT_SOURCE_MEAN", deserialize_with = "lenient_f64")]
    pub fe_ext_source_mean: f64,

    #[serde(rename = "BURO_MONTHS_BALANCE_SIZE_MEAN", deserialize_with = "lenient_f64")]
    pub buro_months_balance_size_mean: f64,

    /// Gender (0 or 1)
    #[serde(rename = "CODE_GENDER")]
    pub code_gender: i64,

    #[serde(rename = "INSTAL_DPD_MEAN", deserialize_with = "lenient_f64")]
    pub instal_dpd_mean: f64,

    #[serde(rename = "BURO_MONTHS_BALANCE_MAX_MIN", deserialize_with = "lenient_f64")]
    pub buro_months_balance_max_min: f64,

    #[serde(rename = "FE_GOODS_CREDIT_RATE", deserialize_with = "lenient_f64")]
    pub fe_goods_credit_rate: f64,

    #[serde(rename = "APPROVED_CNT_PAYMENT_MEAN", deserialize_with = "lenient_f64")]
    pub approved_cnt_payment_mean: f64,

    /// Client age in years
    #[serde(rename = "YEARS_BIRTH")]
    pub years_birth: i64,

    /// Years of employment
    #[serde(rename = "YEARS_EMPLOYED")]
    pub years_employed: i64,

    #[serde(rename = "AMT_ANNUITY", deserialize_with = "lenient_f64")]
    pub amt_annuity: f64,

    #[serde(rename = "NAME_FAMILY_STATUS_Married")]
    pub name_family_status_married: bool,

    #[serde(rename = "INSTAL_AMT_PAYMENT_SUM", deserialize_with = "lenient_f64")]
    pub instal_amt_payment_sum: f64,

    #[serde(rename = "FE_EXT_SOURCE_MIN", deserialize_with = "lenient_f64")]
    pub fe_ext_source_min: f64,

    #[serde(rename = "PREV_CNT_PAYMENT_MEAN", deserialize_with = "lenient_f64")]
    pub prev_cnt_payment_mean: f64,

    #[serde(rename = "FE_EXT_SOURCE_MAX", deserialize_with = "lenient_f64")]
    pub fe_ext_source_max: f64,
}

/// Accepts a JSON number or a numeric string
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(value) => Ok(value),
        NumberOrText::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("'{}' is not a number", text))),
    }
}

impl ScoringData {
    /// Parse and validate a single payload
    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        let data: ScoringData =
            serde_json::from_slice(body).map_err(|e| ValidationError::new("body", e.to_string()))?;
        data.validate()?;
        Ok(data)
    }

    /// Parse and validate a batch; the first invalid item rejects the batch
    pub fn batch_from_json(body: &[u8]) -> Result<Vec<Self>, ValidationError> {
        let batch: Vec<ScoringData> =
            serde_json::from_slice(body).map_err(|e| ValidationError::new("body", e.to_string()))?;
        for (index, item) in batch.iter().enumerate() {
            item.validate().map_err(|e| ValidationError {
                field: format!("[{}].{}", index, e.field),
                message: e.message,
            })?;
        }
        Ok(batch)
    }

    /// Check the business rules on top of the structural parse
    pub fn validate(&self) -> Result<(), ValidationError> {
        let floats = [
            ("FE_EXT_SOURCE_MEAN", self.fe_ext_source_mean),
            ("BURO_MONTHS_BALANCE_SIZE_MEAN", self.buro_months_balance_size_mean),
            ("INSTAL_DPD_MEAN", self.instal_dpd_mean),
            ("BURO_MONTHS_BALANCE_MAX_MIN", self.buro_months_balance_max_min),
            ("FE_GOODS_CREDIT_RATE", self.fe_goods_credit_rate),
            ("APPROVED_CNT_PAYMENT_MEAN", self.approved_cnt_payment_mean),
            ("AMT_ANNUITY", self.amt_annuity),
            ("INSTAL_AMT_PAYMENT_SUM", self.instal_amt_payment_sum),
            ("FE_EXT_SOURCE_MIN", self.fe_ext_source_min),
            ("PREV_CNT_PAYMENT_MEAN", self.prev_cnt_payment_mean),
            ("FE_EXT_SOURCE_MAX", self.fe_ext_source_max),
        ];
        for (field, value) in floats {
            if value.is_nan() {
                return Err(ValidationError::new(field, "NaN forbidden"));
            }
            if value.is_infinite() {
                return Err(ValidationError::new(field, "infinite values forbidden"));
            }
        }

        let ext_sources = [
            ("FE_EXT_SOURCE_MEAN", self.fe_ext_source_mean),
            ("FE_EXT_SOURCE_MIN", self.fe_ext_source_min),
            ("FE_EXT_SOURCE_MAX", self.fe_ext_source_max),
        ];
        for (field, value) in ext_sources {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::new(field, "must be between 0 and 1"));
            }
        }

        if !matches!(self.code_gender, 0 | 1) {
            return Err(ValidationError::new("CODE_GENDER", "must be 0 or 1"));
        }
        if !(18..=100).contains(&self.years_birth) {
            return Err(ValidationError::new("YEARS_BIRTH", "age must be between 18 and 100"));
        }
        if self.years_employed < 0 {
            return Err(ValidationError::new("YEARS_EMPLOYED", "cannot be negative"));
        }
        if self.years_employed > self.years_birth {
            return Err(ValidationError::new(
                "YEARS_EMPLOYED",
                "years of employment cannot exceed age",
            ));
        }
        Ok(())
    }

    /// Named feature mapping handed to the decision engine
    pub fn to_features(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Reference applicant used in documentation and smoke tests
    pub fn example() -> Self {
        Self {
            fe_ext_source_mean: 0.5892,
            buro_months_balance_size_mean: 0.0,
            code_gender: 0,
            instal_dpd_mean: 0.0,
            buro_months_balance_max_min: 0.0,
            fe_goods_credit_rate: 1.0,
            approved_cnt_payment_mean: 0.0,
            years_birth: 59,
            years_employed: 0,
            amt_annuity: 20952.0,
            name_family_status_married: true,
            instal_amt_payment_sum: 0.0,
            fe_ext_source_min: 0.2635,
            prev_cnt_payment_mean: 0.0,
            fe_ext_source_max: 0.7992,
        }
    }
}
