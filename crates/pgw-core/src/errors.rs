//! Error types for PGW Core.
//!
//! Every failure a caller can observe is a [`GatewayError`], and every
//! `GatewayError` belongs to exactly one [`ErrorKind`] from a closed set.
//! The kind is the stable, wire-facing code; the error itself keeps the
//! original detail for diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Kinds
// ============================================================================

/// Closed taxonomy of failure kinds.
///
/// Serializes as the `SCREAMING_SNAKE_CASE` code (`"NOT_CONNECTED"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotConnected,
    MissingFields,
    EmptyBody,
    BodyTooLong,
    InvalidDestination,
    BackendFailure,
    SessionInitFailure,
    LogoutFailure,
    Unknown,
}

impl ErrorKind {
    /// Stable code string for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotConnected => "NOT_CONNECTED",
            ErrorKind::MissingFields => "MISSING_FIELDS",
            ErrorKind::EmptyBody => "EMPTY_BODY",
            ErrorKind::BodyTooLong => "BODY_TOO_LONG",
            ErrorKind::InvalidDestination => "INVALID_DESTINATION",
            ErrorKind::BackendFailure => "BACKEND_FAILURE",
            ErrorKind::SessionInitFailure => "SESSION_INIT_FAILURE",
            ErrorKind::LogoutFailure => "LOGOUT_FAILURE",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Validation failures detected before any backend call. Never retried.
    pub fn is_caller_mistake(&self) -> bool {
        matches!(
            self,
            ErrorKind::MissingFields
                | ErrorKind::EmptyBody
                | ErrorKind::BodyTooLong
                | ErrorKind::InvalidDestination
        )
    }

    /// The caller can recover by polling status until the session is ready.
    pub fn is_recoverable_by_polling(&self) -> bool {
        matches!(self, ErrorKind::NotConnected)
    }

    /// Status code a transport layer should answer with.
    pub fn suggested_status(&self) -> u16 {
        match self {
            ErrorKind::NotConnected => 503,
            k if k.is_caller_mistake() => 400,
            _ => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// Gateway Error
// ============================================================================

/// Unified error type for gateway operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Session is not in a state that allows sending
    #[error("not connected: {reason}")]
    NotConnected { reason: String },

    /// Destination or body absent
    #[error("destination and body are required")]
    MissingFields,

    /// Body is whitespace only
    #[error("message body must not be empty")]
    EmptyBody,

    /// Body exceeds the character limit
    #[error("message body has {len} characters, limit is {max}")]
    BodyTooLong { len: usize, max: usize },

    /// Destination could not be normalized into a routable number
    #[error("invalid destination: {reason}")]
    InvalidDestination { reason: String },

    /// Backend reported a categorized failure while sending
    #[error("backend failure: {detail}")]
    Backend { detail: String },

    /// Backend failed to begin pairing
    #[error("session initialization failed: {detail}")]
    SessionInit { detail: String },

    /// Backend teardown failed (local state was still reset)
    #[error("logout failed: {detail}")]
    Logout { detail: String },

    /// Failure that carried no usable category
    #[error("unclassified failure: {detail}")]
    Unknown { detail: String },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::NotConnected { .. } => ErrorKind::NotConnected,
            GatewayError::MissingFields => ErrorKind::MissingFields,
            GatewayError::EmptyBody => ErrorKind::EmptyBody,
            GatewayError::BodyTooLong { .. } => ErrorKind::BodyTooLong,
            GatewayError::InvalidDestination { .. } => ErrorKind::InvalidDestination,
            GatewayError::Backend { .. } => ErrorKind::BackendFailure,
            GatewayError::SessionInit { .. } => ErrorKind::SessionInitFailure,
            GatewayError::Logout { .. } => ErrorKind::LogoutFailure,
            GatewayError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Original backend detail, if this error came from the backend.
    pub fn backend_detail(&self) -> Option<&str> {
        match self {
            GatewayError::Backend { detail }
            | GatewayError::SessionInit { detail }
            | GatewayError::Logout { detail }
            | GatewayError::Unknown { detail } => Some(detail),
            _ => None,
        }
    }

    /// Serializable form for the transport layer.
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            code: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Wire-friendly error body: `{"code": "...", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorKind,
    pub message: String,
}

impl From<&GatewayError> for ErrorReport {
    fn from(err: &GatewayError) -> Self {
        err.to_report()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::SessionInitFailure).unwrap();
        assert_eq!(json, "\"SESSION_INIT_FAILURE\"");
        assert_eq!(ErrorKind::BodyTooLong.to_string(), "BODY_TOO_LONG");
    }

    #[test]
    fn test_validation_kinds_are_caller_mistakes() {
        for err in [
            GatewayError::MissingFields,
            GatewayError::EmptyBody,
            GatewayError::BodyTooLong { len: 4097, max: 4096 },
            GatewayError::InvalidDestination { reason: "short".into() },
        ] {
            assert!(err.kind().is_caller_mistake(), "{err}");
            assert_eq!(err.kind().suggested_status(), 400);
        }
    }

    #[test]
    fn test_not_connected_is_recoverable() {
        let err = GatewayError::NotConnected { reason: "state is Initializing".into() };
        assert!(err.kind().is_recoverable_by_polling());
        assert!(!err.kind().is_caller_mistake());
        assert_eq!(err.kind().suggested_status(), 503);
    }

    #[test]
    fn test_backend_detail_preserved() {
        let err = GatewayError::Backend { detail: "socket reset".into() };
        assert_eq!(err.backend_detail(), Some("socket reset"));
        assert_eq!(err.kind().suggested_status(), 500);
        assert!(GatewayError::EmptyBody.backend_detail().is_none());
    }

    #[test]
    fn test_report_shape() {
        let report = GatewayError::Logout { detail: "browser gone".into() }.to_report();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["code"], "LOGOUT_FAILURE");
        assert_eq!(value["message"], "logout failed: browser gone");
    }
}
