//! Boundary with the connection backend.
//!
//! The backend owns device pairing and message transport. PGW treats it as an
//! opaque capability: it asks it to begin pairing, to send, and to tear the
//! session down, and it listens to the lifecycle events the backend reports
//! through an [`EventSink`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

// ============================================================================
// Failures
// ============================================================================

/// Failure categories the backend is contracted to signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    /// Backend is not connected or not authenticated yet
    NotReady,
    /// Destination does not exist or is not routable
    InvalidDestination,
    /// Network or protocol failure while talking to the messaging network
    Transport,
    /// Backend knows it failed but not why
    Unknown,
}

/// Raw failure reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendFailure {
    /// Failure with a contracted category
    #[error("{category:?}: {detail}")]
    Categorized {
        category: FailureCategory,
        detail: String,
    },
    /// Free-text failure with no category
    #[error("{0}")]
    Unstructured(String),
}

impl BackendFailure {
    pub fn new(category: FailureCategory, detail: impl Into<String>) -> Self {
        BackendFailure::Categorized {
            category,
            detail: detail.into(),
        }
    }

    pub fn unstructured(detail: impl Into<String>) -> Self {
        BackendFailure::Unstructured(detail.into())
    }

    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            BackendFailure::Categorized { category, .. } => Some(*category),
            BackendFailure::Unstructured(_) => None,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            BackendFailure::Categorized { detail, .. } => detail,
            BackendFailure::Unstructured(detail) => detail,
        }
    }
}

// ============================================================================
// Identity and receipts
// ============================================================================

/// Descriptor of the authenticated endpoint once pairing succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Name the account shows to its contacts
    pub display_name: String,
    /// Backend address of the account itself, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Platform of the companion device, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl Identity {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            address: None,
            platform: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }
}

/// What the backend hands back for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub delivery_id: String,
}

// ============================================================================
// Events
// ============================================================================

/// Lifecycle events emitted by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// A new scannable pairing token (raw, unrendered)
    PairingToken(String),
    /// Pairing completed; the identity is authenticated
    Ready(Identity),
    /// Connection lost or pairing abandoned
    Disconnected(String),
    /// Backend-internal error; informational only
    Error(String),
}

impl BackendEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BackendEvent::PairingToken(_) => "pairing_token",
            BackendEvent::Ready(_) => "ready",
            BackendEvent::Disconnected(_) => "disconnected",
            BackendEvent::Error(_) => "error",
        }
    }
}

/// Sending half of the bounded event channel handed to the backend.
///
/// Cloneable; backends may hold it on any thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<BackendEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<BackendEvent>) -> Self {
        Self { tx }
    }

    /// Deliver an event, waiting for channel capacity.
    ///
    /// Returns `false` if the session manager is gone.
    pub async fn emit(&self, event: BackendEvent) -> bool {
        let name = event.name();
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(_) => {
                warn!(event = name, "Session event loop closed, dropping backend event");
                false
            }
        }
    }

    /// Deliver an event without waiting. For callers outside the runtime.
    pub fn try_emit(&self, event: BackendEvent) -> bool {
        let name = event.name();
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(event = name, "Session event channel full, dropping backend event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(event = name, "Session event loop closed, dropping backend event");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// Backend Trait
// ============================================================================

/// Capability that performs pairing and message transport.
///
/// Only the session manager calls `begin_pairing` and `end_session`; only the
/// outbound dispatcher calls `send`.
#[async_trait]
pub trait ConnectionBackend: Send + Sync {
    /// Begin pairing. Progress is reported later through `events`: pairing
    /// token(s), then ready, or a disconnect.
    async fn begin_pairing(&self, events: EventSink) -> Result<(), BackendFailure>;

    /// Send `body` to a normalized destination (digits only).
    async fn send(&self, destination: &str, body: &str) -> Result<DeliveryReceipt, BackendFailure>;

    /// Log out and release the backend connection.
    async fn end_session(&self) -> Result<(), BackendFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_accessors() {
        let f = BackendFailure::new(FailureCategory::Transport, "timeout");
        assert_eq!(f.category(), Some(FailureCategory::Transport));
        assert_eq!(f.detail(), "timeout");

        let f = BackendFailure::unstructured("Evaluation failed: t");
        assert_eq!(f.category(), None);
        assert_eq!(f.to_string(), "Evaluation failed: t");
    }

    #[test]
    fn test_identity_skips_missing_fields() {
        let json = serde_json::to_value(Identity::named("Alice")).unwrap();
        assert_eq!(json, serde_json::json!({ "display_name": "Alice" }));

        let full = Identity::named("Alice").with_address("573001234567").with_platform("android");
        assert_eq!(full.platform.as_deref(), Some("android"));
    }

    #[tokio::test]
    async fn test_sink_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        assert!(sink.try_emit(BackendEvent::Error("first".into())));
        // Capacity 1: the second event does not fit.
        assert!(!sink.try_emit(BackendEvent::Error("second".into())));

        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(BackendEvent::Disconnected("gone".into())).await);
    }
}
