//! Credit decision data structures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Credit decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Granted,
    Refused,
}

impl Decision {
    /// Positive (refused) class is selected when the score reaches the threshold
    pub fn from_score(score: f64, threshold: f64) -> Self {
        if score >= threshold {
            Decision::Refused
        } else {
            Decision::Granted
        }
    }

    /// Binary class label: 1 for refused, 0 for granted
    pub fn prediction(self) -> u8 {
        match self {
            Decision::Refused => 1,
            Decision::Granted => 0,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Granted => f.write_str("Granted"),
            Decision::Refused => f.write_str("Refused"),
        }
    }
}

/// Uniform response of the decision engine, whichever backend ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    /// Positive-class probability rounded to 4 decimals
    pub score: f64,
    pub prediction: u8,
    pub threshold: f64,
    pub decision: Decision,
}

/// Error payload returned instead of a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionError {
    pub error: String,
}

impl PredictionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

impl fmt::Display for PredictionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error)
    }
}

impl std::error::Error for PredictionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_from_score() {
        assert_eq!(Decision::from_score(0.42, 0.5), Decision::Granted);
        assert_eq!(Decision::from_score(0.5, 0.5), Decision::Refused);
        assert_eq!(Decision::from_score(0.58, 0.5), Decision::Refused);
        assert_eq!(Decision::Refused.prediction(), 1);
        assert_eq!(Decision::Granted.prediction(), 0);
    }

    #[test]
    fn test_decision_result_serialization() {
        let result = DecisionResult {
            score: 0.42,
            prediction: 0,
            threshold: 0.5,
            decision: Decision::Granted,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"score": 0.42, "prediction": 0, "threshold": 0.5, "decision": "Granted"})
        );
    }
}
