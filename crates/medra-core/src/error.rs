//! # Medra Error Types
//!
//! The platform-wide error taxonomy. Every failure inside a run belongs to
//! one of five classes, and the class decides how the orchestrator reacts:
//! input and fatal errors abort the run, transient errors are retried with
//! backoff, environmental errors degrade a single component, patch errors
//! stay local to one fix.

use thiserror::Error;

/// Medra platform errors
#[derive(Error, Debug)]
pub enum MedraError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transient failure after {attempts} attempts: {reason}")]
    Transient { attempts: u32, reason: String },

    #[error("environment degraded: {tool}: {reason}")]
    Environmental { tool: String, reason: String },

    #[error("patch failed: {reason}")]
    Patch { reason: String },

    #[error("fatal: {reason}")]
    Fatal { reason: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("operation timed out after {timeout_secs}s: {what}")]
    Timeout { what: String, timeout_secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for Medra operations
pub type Result<T> = std::result::Result<T, MedraError>;

/// How an error propagates through a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Reject the request before any work starts
    FailFast,
    /// Retry with exponential backoff, then surface as iteration-level failure
    Retry,
    /// Skip the affected component, keep the run alive
    Degrade,
    /// Mark the affected fix FAILED, continue with the rest
    Local,
    /// Abort the run and persist a partial result
    Abort,
}

impl MedraError {
    /// Classify this error per the recovery policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            MedraError::InvalidInput(_) => ErrorClass::FailFast,
            MedraError::Transient { .. } | MedraError::Http(_) => ErrorClass::Retry,
            MedraError::Environmental { .. } => ErrorClass::Degrade,
            MedraError::Patch { .. } => ErrorClass::Local,
            MedraError::Timeout { .. } => ErrorClass::Degrade,
            MedraError::Fatal { .. } | MedraError::Cancelled => ErrorClass::Abort,
            MedraError::Io(_) => ErrorClass::Abort,
            MedraError::Serialization(_) => ErrorClass::Local,
        }
    }

    /// Short machine-readable reason used in `status=error:<reason>`.
    pub fn status_reason(&self) -> &'static str {
        match self {
            MedraError::InvalidInput(_) => "invalid_input",
            MedraError::Transient { .. } => "transient",
            MedraError::Environmental { .. } => "environment",
            MedraError::Patch { .. } => "patch",
            MedraError::Fatal { .. } => "fatal",
            MedraError::Cancelled => "cancelled",
            MedraError::Timeout { .. } => "timeout",
            MedraError::Io(_) => "io",
            MedraError::Serialization(_) => "serialization",
            MedraError::Http(_) => "http",
        }
    }

    /// Convenience constructor for fatal errors.
    pub fn fatal(reason: impl Into<String>) -> Self {
        MedraError::Fatal { reason: reason.into() }
    }

    /// Convenience constructor for patch-class errors.
    pub fn patch(reason: impl Into<String>) -> Self {
        MedraError::Patch { reason: reason.into() }
    }

    /// Convenience constructor for environmental degradation.
    pub fn environmental(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        MedraError::Environmental { tool: tool.into(), reason: reason.into() }
    }
}
