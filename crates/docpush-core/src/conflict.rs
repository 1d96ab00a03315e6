//! Version-conflict classification.
//!
//! A structured status (HTTP 409) is the primary signal. When a transport
//! gives none, the server's human-readable message is matched instead:
//! "does not match" or "sha" (case-sensitive), or "modified" in any case.

use crate::error::GatewayError;

/// HTTP status the contents API uses for a stale conditional write.
pub const CONFLICT_STATUS: u16 = 409;

/// Textual fallback classifier for rejected writes.
pub fn looks_like_version_conflict(message: &str) -> bool {
    message.contains("does not match")
        || message.contains("sha")
        || message.to_lowercase().contains("modified")
}

/// Classify a rejected write from its status (if any) and server message.
///
/// 401 and 403 are auth failures even when the message would match the
/// textual classifier; the substring rules only apply to other statuses.
pub fn classify_write_rejection(status: Option<u16>, message: String) -> GatewayError {
    match status {
        Some(CONFLICT_STATUS) => GatewayError::VersionConflict { message },
        Some(401) | Some(403) => GatewayError::Unauthorized(message),
        _ if looks_like_version_conflict(&message) => GatewayError::VersionConflict { message },
        _ => GatewayError::Rejected { status, message },
    }
}

/// Whether a write failure means the expected token was stale.
///
/// Generic rejections are re-checked with the textual classifier so that
/// gateways without structured statuses are still recognised.
pub fn is_version_conflict(error: &GatewayError) -> bool {
    match error {
        GatewayError::VersionConflict { .. } => true,
        GatewayError::Rejected { message, .. } => looks_like_version_conflict(message),
        _ => false,
    }
}
