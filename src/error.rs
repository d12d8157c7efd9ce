//! Error types for the mesh coordination core
//!
//! Most recoverable conditions never surface here: unknown agents are no-ops,
//! lock contention is a [`crate::mesh::LockOutcome`], and search backend
//! failures degrade to the local fallback. What remains is invalid input and
//! caller cancellation.

use thiserror::Error;

/// Errors produced by the mesh core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    /// Malformed numeric or range input to a supporting utility.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The caller's cancellation token fired before the operation finished.
    #[error("operation cancelled by caller")]
    Cancelled,

    /// A remote backend failed. Callers normally absorb this.
    #[error("backend error: {0}")]
    Backend(String),

    /// The delta-broadcast channel refused a publish or subscribe.
    #[error("broadcast error: {0}")]
    Broadcast(String),

    /// Configuration could not be resolved.
    #[error("config error: {0}")]
    Config(String),
}

impl MeshError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        MeshError::InvalidInput(msg.into())
    }

    /// True for the only error class that propagates to the request boundary.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MeshError::Cancelled)
    }
}

/// Result alias for mesh operations.
pub type Result<T> = std::result::Result<T, MeshError>;
