//! Backend error types

/// Errors produced while translating resources for a scheduler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Invalid wall time '{0}': expected M, M:S, H:M:S, D-H, D-H:M, D-H:M:S or D:H:M:S")]
    InvalidTime(String),

    #[error("Invalid resource key '{0}'")]
    InvalidResourceKey(String),

    #[error("Invalid value for resource '{key}': {reason}")]
    InvalidResource { key: String, reason: String },
}

/// A backend failed the conformance check
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Backend '{backend}' is missing capability: {capability}")]
pub struct ConformanceError {
    pub backend: String,
    pub capability: String,
}

/// Errors from backend registration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Backend '{0}' is already registered")]
    Duplicate(String),

    #[error(transparent)]
    Conformance(#[from] ConformanceError),
}
