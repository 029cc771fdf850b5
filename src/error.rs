// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Errors

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Invalid tunables.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },
    #[error("{field} must be finite")]
    NotFinite { field: &'static str },
    #[error("{field} = {value} out of range, expected {expected}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },
    #[error("parameter vector has {found} entries, expected {expected}")]
    WrongLength { expected: usize, found: usize },
}

/// Errors raised while building or addressing a network.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkError {
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),
    #[error("agent '{0}' already exists")]
    DuplicateAgent(String),
    #[error("agent '{0}' cannot be linked to itself")]
    SelfLink(String),
    #[error("conductance between '{a}' and '{b}' must be positive and finite, got {value}")]
    InvalidConductance { a: String, b: String, value: f64 },
    #[error("invalid electrical bounds for '{0}'")]
    InvalidBounds(String),
    #[error("agent '{0}' has no fixed load to change")]
    NotAdjustable(String),
    #[error("malformed network description: {0}")]
    Description(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        NetworkError::Description(err.to_string())
    }
}
