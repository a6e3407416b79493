//! Error types for the Vigil compliance engine

use thiserror::Error;

/// Result type alias using Vigil Error
pub type Result<T> = std::result::Result<T, Error>;

/// Vigil error types
#[derive(Error, Debug)]
pub enum Error {
    // === Probe Errors ===
    #[error(transparent)]
    Probe(#[from] ProbeError),

    // === Matcher Errors ===
    #[error(transparent)]
    Matcher(#[from] MatcherError),

    // === Configuration Errors ===
    #[error("Duplicate control id: {control_id}")]
    DuplicateControl { control_id: String },

    #[error("Duplicate input name: {name}")]
    DuplicateInput { name: String },

    #[error("Invalid impact {value}: must be within [0, 1]")]
    InvalidImpact { value: f64 },

    #[error("Control {control_id} references undeclared input: {input}")]
    UnknownInput { control_id: String, input: String },

    #[error("Input {name} expects a {expected} value, got {actual}")]
    InputTypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Control {control_id} has invalid pattern {pattern:?}: {message}")]
    InvalidPattern {
        control_id: String,
        pattern: String,
        message: String,
    },

    #[error("Control {control_id} has an unresolvable applicability predicate: {message}")]
    InvalidPredicate { control_id: String, message: String },

    #[error("Invalid profile definition: {path} - {message}")]
    InvalidProfile { path: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    // === Cancellation ===
    #[error("Run cancelled: {reason}")]
    Cancelled { reason: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error family, used to decide how an error propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The snapshot could not answer a query
    Probe,
    /// The attribute does not support the requested matcher
    Matcher,
    /// The profile, inputs or overrides are invalid
    Configuration,
    /// The run was stopped by an external signal
    Cancellation,
    /// Anything else
    Other,
}

impl Error {
    /// Error family of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Probe(_) => ErrorKind::Probe,
            Error::Matcher(_) => ErrorKind::Matcher,
            Error::DuplicateControl { .. }
            | Error::DuplicateInput { .. }
            | Error::InvalidImpact { .. }
            | Error::UnknownInput { .. }
            | Error::InputTypeMismatch { .. }
            | Error::InvalidPattern { .. }
            | Error::InvalidPredicate { .. }
            | Error::InvalidProfile { .. }
            | Error::Configuration(_) => ErrorKind::Configuration,
            Error::Cancelled { .. } => ErrorKind::Cancellation,
            Error::Io(_)
            | Error::FileNotFound { .. }
            | Error::Json(_)
            | Error::Yaml(_)
            | Error::Internal(_) => ErrorKind::Other,
        }
    }

    /// Check if this error is fatal (must abort the run before any control executes)
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Get an error code for logging
    pub fn code(&self) -> &'static str {
        match self {
            Error::Probe(e) => e.code(),
            Error::Matcher(_) => "MATCHER_ERROR",
            Error::DuplicateControl { .. } => "DUPLICATE_CONTROL",
            Error::DuplicateInput { .. } => "DUPLICATE_INPUT",
            Error::InvalidImpact { .. } => "INVALID_IMPACT",
            Error::UnknownInput { .. } => "UNKNOWN_INPUT",
            Error::InputTypeMismatch { .. } => "INPUT_TYPE_MISMATCH",
            Error::InvalidPattern { .. } => "INVALID_PATTERN",
            Error::InvalidPredicate { .. } => "INVALID_PREDICATE",
            Error::InvalidProfile { .. } => "INVALID_PROFILE",
            Error::Configuration(_) => "CONFIG_ERROR",
            Error::Cancelled { .. } => "CANCELLED",
            Error::Io(_) => "IO_ERROR",
            Error::FileNotFound { .. } => "FILE_NOT_FOUND",
            Error::Json(_) => "JSON_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// The system snapshot could not answer a query.
///
/// Cloneable so that a cached failure is replayed identically to every
/// expectation of a control that asks the same question.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Path not found: {path}")]
    NotFound { path: String },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Probe of {target} timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("Probe of {target} failed: {message}")]
    Failed { target: String, message: String },
}

impl ProbeError {
    /// Map an io error for `path` into a probe error
    pub fn from_io(path: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ProbeError::NotFound {
                path: path.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => ProbeError::PermissionDenied {
                path: path.to_string(),
            },
            _ => ProbeError::Failed {
                target: path.to_string(),
                message: err.to_string(),
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProbeError::NotFound { .. } => "PROBE_NOT_FOUND",
            ProbeError::PermissionDenied { .. } => "PROBE_PERMISSION_DENIED",
            ProbeError::Timeout { .. } => "PROBE_TIMEOUT",
            ProbeError::Failed { .. } => "PROBE_FAILED",
        }
    }
}

/// The probed attribute cannot be evaluated by the requested matcher
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatcherError {
    #[error("Matcher {matcher} does not apply to {resource}")]
    UnsupportedResource { matcher: String, resource: String },

    #[error("{attribute} is not available for {target}: {reason}")]
    AttributeUnavailable {
        attribute: &'static str,
        target: String,
        reason: String,
    },
}
