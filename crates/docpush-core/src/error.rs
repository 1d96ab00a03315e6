//! Gateway errors and the failure descriptors surfaced to hosts.

use serde::Serialize;
use thiserror::Error;

/// Errors raised by the remote content gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Not found: {location}")]
    NotFound { location: String },

    #[error("Authentication failed: {0}. Re-authenticate and try again.")]
    Unauthorized(String),

    #[error("A token is required to write to the repository. Sign in and try again.")]
    CredentialRequired,

    /// The write was conditioned on a token that is no longer current.
    #[error("Version conflict: {message}")]
    VersionConflict { message: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Unexpected response from the content store: {0}")]
    MalformedResponse(String),

    /// Any other rejection. `status` is absent when the transport has no
    /// structured status to report.
    #[error("{message}")]
    Rejected { status: Option<u16>, message: String },
}

impl GatewayError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GatewayError::NotFound { .. } => FailureKind::NotFound,
            GatewayError::Unauthorized(_) => FailureKind::Unauthorized,
            GatewayError::CredentialRequired => FailureKind::CredentialRequired,
            GatewayError::VersionConflict { .. } => FailureKind::VersionConflict,
            GatewayError::Transport(_) => FailureKind::Transport,
            GatewayError::MalformedResponse(_) => FailureKind::MalformedResponse,
            GatewayError::Rejected { .. } => FailureKind::Rejected,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound { .. })
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::MalformedResponse(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Category of a surfaced failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Resolved locally before any remote call.
    MissingPrecondition,
    Transport,
    Unauthorized,
    CredentialRequired,
    NotFound,
    VersionConflict,
    MalformedResponse,
    Rejected,
}

/// A failure as recorded in session state for the host to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDescriptor {
    pub kind: FailureKind,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MissingPrecondition, message)
    }
}

impl From<&GatewayError> for ErrorDescriptor {
    fn from(e: &GatewayError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl std::fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
