//! Directory backend error types.
//!
//! These errors describe failures talking to the identity platform, separate
//! from workflow errors. The orchestrator wraps them in
//! [`crate::error::ProvisionError::RemoteCallFailed`] together with the
//! operation that was in flight.

use thiserror::Error;

/// Errors returned by a [`super::DirectoryProvider`].
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    /// The service answered with a non-success status.
    #[error("HTTP {status} from {operation}: {code}: {message}")]
    Http {
        operation: String,
        status: u16,
        code: String,
        message: String,
    },

    /// The request never produced a response.
    #[error("Transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    /// The caller lacks the permission for this call.
    #[error("Permission denied for {operation}")]
    PermissionDenied { operation: String },

    /// A referenced object does not exist.
    #[error("{resource_type} '{id}' not found")]
    NotFound { resource_type: String, id: String },

    /// A response body did not have the expected shape.
    #[error("Unexpected response from {operation}: {message}")]
    InvalidResponse { operation: String, message: String },

    /// The backend is temporarily unavailable.
    #[error("Directory unavailable: {message}")]
    Unavailable { message: String },
}

impl DirectoryError {
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        DirectoryError::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn invalid_response(operation: impl Into<String>, message: impl Into<String>) -> Self {
        DirectoryError::InvalidResponse {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// HTTP status of the failure, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            DirectoryError::Http { status, .. } => Some(*status),
            DirectoryError::PermissionDenied { .. } => Some(403),
            DirectoryError::NotFound { .. } => Some(404),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = DirectoryError::Http {
            operation: "create group".to_string(),
            status: 409,
            code: "Conflict".to_string(),
            message: "exists".to_string(),
        };
        assert_eq!(err.status(), Some(409));
        assert_eq!(DirectoryError::not_found("Group", "g1").status(), Some(404));
        assert_eq!(
            DirectoryError::Unavailable {
                message: "down".to_string()
            }
            .status(),
            None
        );
    }

    #[test]
    fn test_display_includes_operation() {
        let err = DirectoryError::PermissionDenied {
            operation: "list role assignments".to_string(),
        };
        assert_eq!(err.to_string(), "Permission denied for list role assignments");
    }
}
