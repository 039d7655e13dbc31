//! Error types for model construction and forward passes.
//!
//! The pipeline is deterministic, so there is no transient-failure class:
//! every error is fatal and carries a message naming the offending value or
//! field. Configuration errors surface at construction, input errors at the
//! top of a forward pass, before any heavy computation runs.

use thiserror::Error;

/// Main error type for reconstruction models.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Invalid configuration, rejected at construction.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Tensor shape disagrees with the documented contract.
    #[error("Shape mismatch for `{field}`: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        field: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A required per-call input was not supplied.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Tensor is not in the domain (complex pair, k-space, image) an
    /// operation expects.
    #[error("Domain mismatch: {0}")]
    DomainMismatch(String),
}

/// Result type for reconstruction models.
pub type Result<T> = std::result::Result<T, ModelError>;

impl ModelError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a missing input error.
    pub fn missing_input(msg: impl Into<String>) -> Self {
        Self::MissingInput(msg.into())
    }

    /// Create a domain mismatch error.
    pub fn domain_mismatch(msg: impl Into<String>) -> Self {
        Self::DomainMismatch(msg.into())
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(
        field: impl Into<String>,
        expected: Vec<usize>,
        actual: Vec<usize>,
    ) -> Self {
        Self::ShapeMismatch {
            field: field.into(),
            expected,
            actual,
        }
    }
}
