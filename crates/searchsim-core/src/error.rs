//! Error taxonomy for the simulator core.
//!
//! Request-fatal failures are [`SimulatorError`] values propagated with `?`
//! across layer boundaries. Per-document and per-skill failures are structured
//! records accumulated into the enclosing result (see
//! [`crate::indexer::IndexerExecutionError`]) so that sibling work continues
//! until a failure budget is exceeded.

use thiserror::Error;

/// Result type alias for simulator operations.
pub type SimulatorResult<T> = std::result::Result<T, SimulatorError>;

/// Errors that can occur inside the simulator core.
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// Malformed request, bad field type, dimension mismatch, invalid grammar.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A named entity (index, indexer, document, data source, skillset) does
    /// not exist.
    #[error("{resource} '{name}' was not found")]
    NotFound {
        /// Resource kind ("index", "indexer", "document", ...).
        resource: &'static str,
        /// Name or key of the missing entity.
        name: String,
    },

    /// Creating an entity that already exists.
    #[error("{resource} '{name}' already exists")]
    Conflict {
        /// Resource kind.
        resource: &'static str,
        /// Name of the conflicting entity.
        name: String,
    },

    /// Missing or invalid credentials, insufficient role.
    #[error("Authentication failure: {0}")]
    AuthFailure(String),

    /// Operation not valid in the current state (e.g. running a disabled
    /// indexer).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Document key violates the allowed character class.
    #[error("Invalid document key: {0}")]
    InvalidDocumentKey(String),

    /// A skill executor returned errors for a document.
    #[error("Skill '{skill}' failed: {message}")]
    SkillFailure {
        /// Skill name or `@odata.type` when unnamed.
        skill: String,
        /// Failure cause.
        message: String,
    },

    /// The bulk-commit infrastructure failed; all staged actions are counted
    /// as failed.
    #[error("Bulk upload failure: {0}")]
    BulkUploadFailure(String),

    /// Timeout, upstream 5xx, rate-limited downstream.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Startup-time invalid settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error during persistence operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SimulatorError {
    /// Returns the internal error code string (for JSON error envelopes).
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::AuthFailure(_) => "AUTH_FAILURE",
            Self::InvalidOperation(_) => "INVALID_OPERATION",
            Self::InvalidDocumentKey(_) => "INVALID_DOCUMENT_KEY",
            Self::SkillFailure { .. } => "SKILL_FAILURE",
            Self::BulkUploadFailure(_) => "BULK_UPLOAD_FAILURE",
            Self::Transient(_) => "TRANSIENT",
            Self::Configuration(_) => "CONFIGURATION",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Returns the HTTP status code the (out-of-scope) HTTP adapter maps this
    /// error to.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidOperation(_) | Self::InvalidDocumentKey(_) => 400,
            Self::AuthFailure(_) => 401,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Transient(_) | Self::BulkUploadFailure(_) => 503,
            Self::SkillFailure { .. }
            | Self::Configuration(_)
            | Self::Io(_)
            | Self::Serialization(_) => 500,
        }
    }

    /// Returns whether the error is transient and a retry may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::BulkUploadFailure(_) | Self::Io(_)
        )
    }

    /// Shorthand for a `NotFound` error.
    #[must_use]
    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            name: name.into(),
        }
    }

    /// Shorthand for a `Conflict` error.
    #[must_use]
    pub fn conflict(resource: &'static str, name: impl Into<String>) -> Self {
        Self::Conflict {
            resource,
            name: name.into(),
        }
    }
}
