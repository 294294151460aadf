//! Error taxonomy for the secure aggregation protocol.
//!
//! Every protocol outcome other than success is a variant of [`SecureAggError`];
//! callers branch on the variant (or on [`SecureAggError::code`]) instead of
//! catching panics. Capability and model-store failures have their own enums and
//! are wrapped when they surface through the coordinator.

use thiserror::Error;

use crate::federated_learning::{RoundId, RoundState};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeError {
    #[error("ciphertext length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
    #[error("plaintext value {0} cannot be encoded")]
    Unencodable(f64),
    #[error("invalid scheme key: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("unknown parameter {0}")]
    UnknownParameter(String),
    #[error("parameter {name} expects {expected} values, update has {actual}")]
    ShapeMismatch { name: String, expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SecureAggError {
    #[error("contribution keys do not match schema (missing: {missing:?}, unexpected: {unexpected:?})")]
    SchemaMismatch { missing: Vec<String>, unexpected: Vec<String> },
    #[error("client {client_id} already contributed to round {round_id}")]
    DuplicateClient { client_id: String, round_id: RoundId },
    #[error("round is {state}, not collecting")]
    RoundNotCollecting { state: RoundState },
    #[error("contribution targets round {received}, current round is {expected}")]
    RoundMismatch { expected: RoundId, received: RoundId },
    #[error("insufficient contributions: have {have}, need {need}")]
    InsufficientContributions { have: usize, need: usize },
    #[error("aggregate {aggregate_id} is not the pending aggregate for this round")]
    StaleAggregate { aggregate_id: String },
    #[error("round {round_id} aborted during aggregation: {reason}")]
    RoundAborted { round_id: RoundId, reason: String },
    #[error("applying round {round_id} failed: {reason}")]
    ApplyFailed { round_id: RoundId, reason: String },
    #[error("model schema changed after round {round_id}; contributions assume the old schema")]
    SchemaChanged { round_id: RoundId },
    #[error("aggregation threshold must be at least 2, got {0}")]
    InvalidThreshold(usize),
    #[error("parameter schema must not be empty")]
    EmptySchema,
}

impl SecureAggError {
    /// Stable identifier handed to the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::DuplicateClient { .. } => "duplicate_client",
            Self::RoundNotCollecting { .. } => "round_not_collecting",
            Self::RoundMismatch { .. } => "round_mismatch",
            Self::InsufficientContributions { .. } => "insufficient_contributions",
            Self::StaleAggregate { .. } => "stale_aggregate",
            Self::RoundAborted { .. } => "round_aborted",
            Self::ApplyFailed { .. } => "apply_failed",
            Self::SchemaChanged { .. } => "schema_changed",
            Self::InvalidThreshold(_) => "invalid_threshold",
            Self::EmptySchema => "empty_schema",
        }
    }

    /// False when an operator has to step in before the coordinator makes progress again.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ApplyFailed { .. } | Self::SchemaChanged { .. } | Self::InvalidThreshold(_) | Self::EmptySchema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let e = SecureAggError::InsufficientContributions { have: 1, need: 3 };
        assert_eq!(e.code(), "insufficient_contributions");
        assert!(e.is_recoverable());
        let e = SecureAggError::ApplyFailed { round_id: 4, reason: "shape".into() };
        assert!(!e.is_recoverable());
        assert!(e.to_string().contains("round 4"));
    }
}
