//! Error types for provisioning operations.
//!
//! This module provides the crate-level error type shared by every workflow.
//! The variants mirror how a failure is handled by the orchestrator:
//!
//! - [`ProvisionError::PrerequisiteMissing`] halts the whole run
//! - [`ProvisionError::UnrecognizedEnvironment`] is fatal for one resource
//! - [`ProvisionError::RemoteCallFailed`] is recorded and the run continues
//! - [`ProvisionError::UnprotectedPrivilegedAssignment`] is a security finding
//!
//! Reusing an existing resource is never an error; it surfaces as
//! [`crate::report::Outcome::Reused`].

use crate::directory::DirectoryError;

/// Main error type for provisioning operations.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// A permission, policy or configuration value the workflow needs is absent.
    #[error("Prerequisite missing: {what}. {remediation}")]
    PrerequisiteMissing { what: String, remediation: String },

    /// The resource name carries no recognised environment token.
    #[error("Unrecognized environment for resource '{name}': {reason}")]
    UnrecognizedEnvironment { name: String, reason: String },

    /// A call into the directory backend failed.
    #[error("Remote call failed during {operation}: {source}")]
    RemoteCallFailed {
        operation: String,
        #[source]
        source: DirectoryError,
    },

    /// An Owner assignment exists without the delegation deny-list condition.
    #[error(
        "Unprotected privileged assignment '{assignment_id}' for principal '{principal_id}' at '{scope}'"
    )]
    UnprotectedPrivilegedAssignment {
        assignment_id: String,
        principal_id: String,
        scope: String,
    },

    /// Operator input could not be used as given.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProvisionError {
    /// Wrap a backend failure with the operation that triggered it.
    pub fn remote(operation: impl Into<String>, source: DirectoryError) -> Self {
        ProvisionError::RemoteCallFailed {
            operation: operation.into(),
            source,
        }
    }

    /// Build a prerequisite error with a remediation hint.
    pub fn prerequisite(what: impl Into<String>, remediation: impl Into<String>) -> Self {
        ProvisionError::PrerequisiteMissing {
            what: what.into(),
            remediation: remediation.into(),
        }
    }

    /// Whether this error must terminate the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProvisionError::PrerequisiteMissing { .. }
                | ProvisionError::Config { .. }
                | ProvisionError::Io(_)
        )
    }
}

/// Result type alias for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerequisite_is_fatal() {
        let err = ProvisionError::prerequisite(
            "authentication strength 'Phishing-resistant MFA'",
            "Create the policy before running enrollment.",
        );
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Create the policy"));
    }

    #[test]
    fn test_remote_call_is_not_fatal() {
        let err = ProvisionError::remote(
            "create group",
            DirectoryError::Unavailable {
                message: "503".to_string(),
            },
        );
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("create group"));
    }

    #[test]
    fn test_unrecognized_environment_message() {
        let err = ProvisionError::UnrecognizedEnvironment {
            name: "sub-work-01".to_string(),
            reason: "no tier token".to_string(),
        };
        assert!(err.to_string().contains("sub-work-01"));
        assert!(!err.is_fatal());
    }
}
