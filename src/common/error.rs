//! Error handling primitives shared across the workflow engine.
//!
//! Every variant carries the reference (job id, artifact ref, upload id)
//! needed to diagnose the failure on the backing platform.

use thiserror::Error;

/// Stable error codes, safe to persist or expose to callers that match on numbers.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    /// Success code used as a sentinel.
    Ok = 0,
    /// Caller input was rejected before reaching a backend.
    InvalidSpec = 1,
    /// Job has not reached the Completed state.
    NotCompleted = 2,
    /// Requested metric is not known or not recorded by any child run.
    MetricNotFound = 3,
    /// Remote environment of a run could not be rebuilt.
    EnvironmentMismatch = 4,
    /// Input data does not match the training schema.
    DataSchema = 5,
    /// Polling exhausted its time budget.
    Timeout = 6,
    /// Backend stayed unreachable after bounded retries.
    TransientBackend = 7,
    /// Value could not be serialized or deserialized.
    Serialization = 8,
    /// Referenced entity is unknown to the backing store.
    NotFound = 9,
    /// Catch-all for backend and local IO failures.
    Internal = 10,
}

/// Canonical error type for the crate.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid spec for {reference}: {reason}")]
    InvalidSpec { reference: String, reason: String },

    #[error("job {job_id} is {status}, not completed")]
    NotCompleted { job_id: String, status: String },

    #[error("metric {metric} not found for job {job_id}")]
    MetricNotFound { job_id: String, metric: String },

    #[error("environment of run {run_id} cannot be reconstructed: {reason}")]
    EnvironmentMismatch { run_id: String, reason: String },

    #[error("data {data_ref} does not match the training schema: {reason}")]
    DataSchema { data_ref: String, reason: String },

    #[error("job {job_id} still {status} after {waited_ms}ms")]
    Timeout {
        job_id: String,
        status: String,
        waited_ms: u128,
    },

    #[error("backend unreachable for {reference} after {attempts} attempts: {reason}")]
    TransientBackend {
        reference: String,
        attempts: u32,
        reason: String,
    },

    /// A single failed read that may succeed when repeated.
    #[error("backend temporarily unavailable for {reference}: {reason}")]
    Unavailable { reference: String, reason: String },

    #[error("serialization failed for {reference}: {reason}")]
    Serialization { reference: String, reason: String },

    #[error("{reference} not found")]
    NotFound { reference: String },

    #[error("backend error for {reference}: {reason}")]
    Backend { reference: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl WorkflowError {
    pub fn invalid_spec(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(reference: impl Into<String>) -> Self {
        Self::NotFound {
            reference: reference.into(),
        }
    }

    pub fn serialization(reference: impl Into<String>, reason: impl ToString) -> Self {
        Self::Serialization {
            reference: reference.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unavailable(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn backend(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn data_schema(data_ref: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataSchema {
            data_ref: data_ref.into(),
            reason: reason.into(),
        }
    }

    /// Whether repeating the same read may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Machine parsable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidSpec { .. } | Self::Config(_) => ErrorCode::InvalidSpec,
            Self::NotCompleted { .. } => ErrorCode::NotCompleted,
            Self::MetricNotFound { .. } => ErrorCode::MetricNotFound,
            Self::EnvironmentMismatch { .. } => ErrorCode::EnvironmentMismatch,
            Self::DataSchema { .. } => ErrorCode::DataSchema,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::TransientBackend { .. } | Self::Unavailable { .. } => {
                ErrorCode::TransientBackend
            }
            Self::Serialization { .. } => ErrorCode::Serialization,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Backend { .. } | Self::Io(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::Ok as u32, 0);
        assert_eq!(ErrorCode::InvalidSpec as u32, 1);
        assert_eq!(ErrorCode::NotCompleted as u32, 2);
        assert_eq!(ErrorCode::MetricNotFound as u32, 3);
        assert_eq!(ErrorCode::EnvironmentMismatch as u32, 4);
        assert_eq!(ErrorCode::DataSchema as u32, 5);
        assert_eq!(ErrorCode::Timeout as u32, 6);
        assert_eq!(ErrorCode::TransientBackend as u32, 7);
        assert_eq!(ErrorCode::Serialization as u32, 8);
        assert_eq!(ErrorCode::NotFound as u32, 9);
        assert_eq!(ErrorCode::Internal as u32, 10);
    }

    #[test]
    fn messages_carry_the_reference() {
        let err = WorkflowError::not_found("upload-42");
        assert!(err.to_string().contains("upload-42"));

        let err = WorkflowError::Timeout {
            job_id: "job-7".into(),
            status: "running".into(),
            waited_ms: 30,
        };
        assert!(err.to_string().contains("job-7"));
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[test]
    fn only_unavailable_is_transient() {
        assert!(WorkflowError::unavailable("job-1", "reset").is_transient());
        assert!(!WorkflowError::backend("job-1", "boom").is_transient());
        assert!(!WorkflowError::not_found("job-1").is_transient());
    }
}
