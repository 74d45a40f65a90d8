//! Type definitions for the credit scoring service

pub mod decision;
pub mod scoring;
pub mod signature;

pub use decision::{Decision, DecisionResult, PredictionError};
pub use scoring::{ScoringData, ValidationError};
pub use signature::{Column, ColumnType, ModelInfo, ModelStatus, Signature};
