//! Outbound dispatch: validation, global spacing, and delivery.
//!
//! [`OutboundDispatcher`] is the only caller of `ConnectionBackend::send`.
//! A send is checked against session state, validated, admitted through the
//! shared [`ThrottleClock`], and only then handed to the backend, outside the
//! throttle lock so a slow backend does not stall spacing decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::ConnectionBackend;
use crate::classify::{classify, Operation};
use crate::errors::GatewayError;
use crate::session::{SessionManager, SessionState};
use crate::throttle::ThrottleClock;

/// Longest accepted body, in characters.
pub const MAX_BODY_CHARS: usize = 4096;

/// Fewest digits a normalized destination may have (country code included).
pub const MIN_DESTINATION_DIGITS: usize = 10;

// ============================================================================
// Messages
// ============================================================================

/// A send request as it arrives from the caller. Either field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SendRequest {
    #[serde(default, alias = "number")]
    pub destination: Option<String>,
    #[serde(default, alias = "message")]
    pub body: Option<String>,
}

impl SendRequest {
    pub fn new(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            body: Some(body.into()),
        }
    }
}

/// A validated message accepted for dispatch. Lives for one send call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination exactly as the caller supplied it
    pub raw_destination: String,
    /// Digits-only form handed to the backend
    pub destination: String,
    pub body: String,
    pub submitted_at: DateTime<Utc>,
}

/// Successful delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub delivery_id: String,
    pub sent_at: DateTime<Utc>,
    /// Destination as the caller supplied it
    pub destination: String,
    /// Digits-only form the backend was given
    pub normalized_destination: String,
}

/// Strip everything but ASCII digits.
pub fn normalize_destination(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Local validation, in order: presence, emptiness, length, destination.
pub fn validate(request: &SendRequest) -> Result<OutboundMessage, GatewayError> {
    let destination = request.destination.as_deref().filter(|d| !d.is_empty());
    let body = request.body.as_deref().filter(|b| !b.is_empty());
    let (Some(raw_destination), Some(body)) = (destination, body) else {
        return Err(GatewayError::MissingFields);
    };

    if body.trim().is_empty() {
        return Err(GatewayError::EmptyBody);
    }

    let len = body.chars().count();
    if len > MAX_BODY_CHARS {
        return Err(GatewayError::BodyTooLong {
            len,
            max: MAX_BODY_CHARS,
        });
    }

    let normalized = normalize_destination(raw_destination);
    if normalized.len() < MIN_DESTINATION_DIGITS {
        return Err(GatewayError::InvalidDestination {
            reason: format!(
                "{} digit(s) after normalization, at least {} required including country code",
                normalized.len(),
                MIN_DESTINATION_DIGITS
            ),
        });
    }

    Ok(OutboundMessage {
        raw_destination: raw_destination.to_string(),
        destination: normalized,
        body: body.to_string(),
        submitted_at: Utc::now(),
    })
}

fn not_connected(state: SessionState) -> GatewayError {
    GatewayError::NotConnected {
        reason: format!("session state is {state}"),
    }
}

// ============================================================================
// Dispatch Statistics
// ============================================================================

/// Counters for dispatch outcomes.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Send calls received
    pub received: AtomicU64,
    /// Rejected locally (state or validation)
    pub rejected: AtomicU64,
    /// Admitted through the throttle
    pub admitted: AtomicU64,
    /// Confirmed by the backend
    pub delivered: AtomicU64,
    /// Failed in the backend
    pub failed: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub received: u64,
    pub rejected: u64,
    pub admitted: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Gatekeeper for every outbound send.
pub struct OutboundDispatcher {
    session: Arc<SessionManager>,
    backend: Arc<dyn ConnectionBackend>,
    clock: Arc<ThrottleClock>,
    stats: DispatchStats,
}

impl OutboundDispatcher {
    pub fn new(
        session: Arc<SessionManager>,
        backend: Arc<dyn ConnectionBackend>,
        clock: Arc<ThrottleClock>,
    ) -> Self {
        Self {
            session,
            backend,
            clock,
            stats: DispatchStats::new(),
        }
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Validate, wait for spacing, and deliver one message.
    pub async fn send(&self, request: SendRequest) -> Result<SendReceipt, GatewayError> {
        DispatchStats::inc(&self.stats.received);

        let message = match self.check(&request) {
            Ok(message) => message,
            Err(err) => {
                DispatchStats::inc(&self.stats.rejected);
                debug!(code = %err.kind(), error = %err, "Send rejected");
                return Err(err);
            }
        };

        let admission = self
            .clock
            .admit(|| match self.session.state() {
                SessionState::Ready => Ok(()),
                state => Err(not_connected(state)),
            })
            .await;
        let admission = match admission {
            Ok(admission) => admission,
            Err(err) => {
                DispatchStats::inc(&self.stats.rejected);
                warn!(error = %err, "Session left Ready while send was waiting for spacing");
                return Err(err);
            }
        };
        DispatchStats::inc(&self.stats.admitted);
        let queued_ms = (Utc::now() - message.submitted_at).num_milliseconds().max(0);
        debug!(
            destination = %message.destination,
            waited_ms = admission.waited.as_millis() as u64,
            queued_ms,
            "Send admitted"
        );

        match self.backend.send(&message.destination, &message.body).await {
            Ok(receipt) => {
                DispatchStats::inc(&self.stats.delivered);
                info!(
                    destination = %message.destination,
                    delivery_id = %receipt.delivery_id,
                    "Message delivered"
                );
                Ok(SendReceipt {
                    delivery_id: receipt.delivery_id,
                    sent_at: Utc::now(),
                    destination: message.raw_destination,
                    normalized_destination: message.destination,
                })
            }
            Err(failure) => {
                DispatchStats::inc(&self.stats.failed);
                let err = classify(Operation::Send, &failure);
                warn!(
                    destination = %message.destination,
                    code = %err.kind(),
                    detail = failure.detail(),
                    "Backend send failed"
                );
                Err(err)
            }
        }
    }

    fn check(&self, request: &SendRequest) -> Result<OutboundMessage, GatewayError> {
        let state = self.session.state();
        if state != SessionState::Ready {
            return Err(not_connected(state));
        }
        validate(request)
    }
}
