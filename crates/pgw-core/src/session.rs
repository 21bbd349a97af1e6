//! Session lifecycle for the single paired identity.
//!
//! [`SessionManager`] is the only writer of session state. Caller operations
//! (`start`, `logout`) and backend events both go through it; events arrive
//! on a bounded channel drained by one event-loop task, so transitions are
//! applied one at a time even when the backend reports from several threads.
//!
//! ```text
//! Uninitialized ─start─> Initializing ─token─> AwaitingScan ─ready─> Ready
//!                             │                     │                  │
//!                             └──── disconnected ───┴──────────────────┴─> Disconnected
//! any ─logout─> LoggedOut;  Disconnected | LoggedOut ─start─> Initializing
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendEvent, ConnectionBackend, EventSink, Identity};
use crate::classify::{classify, Operation};
use crate::errors::{ErrorReport, GatewayError};

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of the paired identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    AwaitingScan,
    Ready,
    Disconnected,
    LoggedOut,
}

impl SessionState {
    /// A pairing attempt is in flight or has completed.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Initializing | SessionState::AwaitingScan | SessionState::Ready
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Scannable token as reported by the backend, plus when it arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingToken {
    pub value: String,
    pub produced_at: DateTime<Utc>,
}

/// How an event changed (or did not change) the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Applied {
        from: SessionState,
        to: SessionState,
    },
    Ignored {
        state: SessionState,
    },
    Logged,
}

/// The session record.
///
/// Invariants: `pairing_token` is only set in `AwaitingScan`, `identity` only
/// in `Ready`.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    pairing_token: Option<PairingToken>,
    identity: Option<Identity>,
    last_failure: Option<ErrorReport>,
    disconnect_reason: Option<String>,
    /// Set while a backend connection may exist (start accepted, no logout yet)
    engaged: bool,
    /// Bumped on every accepted start and on logout
    epoch: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::Uninitialized,
            pairing_token: None,
            identity: None,
            last_failure: None,
            disconnect_reason: None,
            engaged: false,
            epoch: 0,
        }
    }
}

impl Session {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pairing_token(&self) -> Option<&PairingToken> {
        self.pairing_token.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Check-and-transition for `start()`. Returns the new epoch, or `None`
    /// if an attempt is already active.
    fn try_begin(&mut self) -> Option<u64> {
        if self.state.is_active() {
            return None;
        }
        self.state = SessionState::Initializing;
        self.pairing_token = None;
        self.identity = None;
        self.last_failure = None;
        self.disconnect_reason = None;
        self.engaged = true;
        self.epoch += 1;
        Some(self.epoch)
    }

    /// Background pairing request for `epoch` failed.
    fn pairing_failed(&mut self, epoch: u64, err: &GatewayError) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.last_failure = Some(err.to_report());
        if matches!(
            self.state,
            SessionState::Initializing | SessionState::AwaitingScan
        ) {
            self.state = SessionState::Disconnected;
            self.pairing_token = None;
        }
        true
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    fn logged_out(&mut self) {
        self.state = SessionState::LoggedOut;
        self.pairing_token = None;
        self.identity = None;
        self.disconnect_reason = None;
        self.engaged = false;
        self.epoch += 1;
    }

    /// Apply one backend event.
    pub fn apply(&mut self, event: BackendEvent) -> EventOutcome {
        let from = self.state;
        match event {
            BackendEvent::PairingToken(value) => {
                if !matches!(from, SessionState::Initializing | SessionState::AwaitingScan) {
                    return EventOutcome::Ignored { state: from };
                }
                self.pairing_token = Some(PairingToken {
                    value,
                    produced_at: Utc::now(),
                });
                self.state = SessionState::AwaitingScan;
            }
            BackendEvent::Ready(identity) => {
                // Late events after logout, or before any start, are stale.
                if !self.engaged {
                    return EventOutcome::Ignored { state: from };
                }
                self.state = SessionState::Ready;
                self.identity = Some(identity);
                self.pairing_token = None;
                self.disconnect_reason = None;
            }
            BackendEvent::Disconnected(reason) => {
                if matches!(from, SessionState::Uninitialized | SessionState::LoggedOut) {
                    return EventOutcome::Ignored { state: from };
                }
                self.state = SessionState::Disconnected;
                self.pairing_token = None;
                self.identity = None;
                self.disconnect_reason = Some(reason);
            }
            BackendEvent::Error(_) => return EventOutcome::Logged,
        }
        EventOutcome::Applied {
            from,
            to: self.state,
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            has_pairing_token: self.pairing_token.is_some(),
            identity: self.identity.clone(),
            disconnect_reason: self.disconnect_reason.clone(),
            last_failure: self.last_failure.clone(),
        }
    }
}

// ============================================================================
// Caller-facing views
// ============================================================================

/// Consistent point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub has_pairing_token: bool,
    pub identity: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnect_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<ErrorReport>,
}

/// Result of `start()`. Acceptance is not readiness: poll status to see
/// pairing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A new pairing attempt was launched in the background
    Accepted { state: SessionState },
    /// An attempt was already in progress or complete; nothing launched
    AlreadyActive { state: SessionState },
}

impl StartOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            StartOutcome::Accepted { state } | StartOutcome::AlreadyActive { state } => *state,
        }
    }

    pub fn already_active(&self) -> bool {
        matches!(self, StartOutcome::AlreadyActive { .. })
    }
}

/// Result of `pairing_token()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairingTokenView {
    /// Token ready to scan. The TTL is a hint for callers; the token stays
    /// valid until the backend rotates it or pairing completes.
    Available {
        token: String,
        produced_at: DateTime<Utc>,
        hint_ttl_secs: u64,
    },
    /// No token yet (or no pairing attempt at all)
    Pending { state: SessionState },
    /// Pairing already completed
    AlreadyConnected { identity: Option<Identity> },
}

// ============================================================================
// Session Manager
// ============================================================================

/// Owner of the session and sole subscriber to backend events.
pub struct SessionManager {
    session: Arc<RwLock<Session>>,
    backend: Arc<dyn ConnectionBackend>,
    sink: EventSink,
    token_ttl: Duration,
    /// Held by `logout` for the whole backend teardown; pairing waits on it
    teardown: Arc<tokio::sync::Mutex<()>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create the manager and spawn its event loop. Must be called from
    /// within a tokio runtime.
    pub fn new(
        backend: Arc<dyn ConnectionBackend>,
        token_ttl: Duration,
        event_capacity: usize,
    ) -> Self {
        let session = Arc::new(RwLock::new(Session::default()));
        let (tx, rx) = mpsc::channel(event_capacity.max(1));
        let handle = tokio::spawn(run_event_loop(session.clone(), rx));

        Self {
            session,
            backend,
            sink: EventSink::new(tx),
            token_ttl,
            teardown: Arc::new(tokio::sync::Mutex::new(())),
            event_loop: Mutex::new(Some(handle)),
        }
    }

    /// Request a pairing attempt. Never waits for pairing.
    pub fn start(&self) -> StartOutcome {
        let epoch = {
            let mut session = self.session.write();
            match session.try_begin() {
                Some(epoch) => epoch,
                None => {
                    let state = session.state();
                    debug!(state = %state, "Start requested while session active");
                    return StartOutcome::AlreadyActive { state };
                }
            }
        };

        info!(epoch, "Starting pairing in background");

        let backend = self.backend.clone();
        let sink = self.sink.clone();
        let session = self.session.clone();
        let teardown = self.teardown.clone();
        tokio::spawn(async move {
            // A logout still tearing down the previous connection goes first.
            drop(teardown.lock().await);
            if !session.read().is_current(epoch) {
                debug!(epoch, "Pairing superseded before it reached the backend");
                return;
            }

            match backend.begin_pairing(sink).await {
                Ok(()) => debug!(epoch, "Backend accepted pairing request"),
                Err(failure) => {
                    let err = classify(Operation::Pairing, &failure);
                    error!(epoch, error = %err, "Pairing could not be started");
                    if !session.write().pairing_failed(epoch, &err) {
                        debug!(epoch, "Pairing failure belongs to a superseded attempt");
                    }
                }
            }
        });

        StartOutcome::Accepted {
            state: SessionState::Initializing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.read().state()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.session.read().snapshot()
    }

    pub fn pairing_token(&self) -> PairingTokenView {
        let session = self.session.read();
        match (session.state(), session.pairing_token()) {
            (SessionState::AwaitingScan, Some(token)) => PairingTokenView::Available {
                token: token.value.clone(),
                produced_at: token.produced_at,
                hint_ttl_secs: self.token_ttl.as_secs(),
            },
            (SessionState::Ready, _) => PairingTokenView::AlreadyConnected {
                identity: session.identity().cloned(),
            },
            (state, _) => PairingTokenView::Pending { state },
        }
    }

    /// End the session. The local state is reset to `LoggedOut` before the
    /// backend teardown runs, so a `start()` issued meanwhile is ordered after
    /// this logout and pairs only once teardown has finished. A teardown
    /// failure is still returned.
    pub async fn logout(&self) -> Result<(), GatewayError> {
        let _gate = self.teardown.lock().await;

        let engaged = {
            let mut session = self.session.write();
            let engaged = session.engaged;
            session.logged_out();
            engaged
        };

        let teardown = if engaged {
            self.backend
                .end_session()
                .await
                .map_err(|failure| classify(Operation::Teardown, &failure))
        } else {
            debug!("Logout without backend connection, resetting local state only");
            Ok(())
        };

        match &teardown {
            Ok(()) => info!("Session logged out"),
            Err(err) => warn!(error = %err, "Backend teardown failed; session reset locally"),
        }
        teardown
    }

    /// Stop the event loop. Further backend events are dropped.
    pub fn shutdown(&self) {
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_event_loop(session: Arc<RwLock<Session>>, mut rx: mpsc::Receiver<BackendEvent>) {
    while let Some(event) = rx.recv().await {
        let name = event.name();
        let detail = match &event {
            BackendEvent::Disconnected(reason) => Some(reason.clone()),
            BackendEvent::Error(detail) => Some(detail.clone()),
            _ => None,
        };

        let outcome = session.write().apply(event);

        match outcome {
            EventOutcome::Applied { from, to } => match to {
                SessionState::AwaitingScan => info!(%from, "Pairing token received, waiting for scan"),
                SessionState::Ready => info!(%from, "Session ready"),
                SessionState::Disconnected => {
                    warn!(%from, reason = detail.as_deref().unwrap_or(""), "Session disconnected")
                }
                _ => debug!(event = name, %from, %to, "Session transition"),
            },
            EventOutcome::Ignored { state } => {
                debug!(event = name, %state, "Ignoring backend event in current state")
            }
            EventOutcome::Logged => {
                error!(detail = detail.as_deref().unwrap_or(""), "Backend reported an error")
            }
        }
    }
    debug!("Backend event channel closed");
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn begun() -> Session {
        let mut s = Session::default();
        s.try_begin().unwrap();
        s
    }

    #[test]
    fn test_begin_is_refused_while_active() {
        let mut s = begun();
        assert!(s.try_begin().is_none());

        s.apply(BackendEvent::PairingToken("t".into()));
        assert!(s.try_begin().is_none());

        s.apply(BackendEvent::Ready(Identity::named("Alice")));
        assert!(s.try_begin().is_none());
    }

    #[test]
    fn test_token_then_ready_clears_token() {
        let mut s = begun();
        let out = s.apply(BackendEvent::PairingToken("abc".into()));
        assert_eq!(
            out,
            EventOutcome::Applied {
                from: SessionState::Initializing,
                to: SessionState::AwaitingScan
            }
        );
        assert_eq!(s.pairing_token().unwrap().value, "abc");

        s.apply(BackendEvent::Ready(Identity::named("Alice")));
        assert_eq!(s.state(), SessionState::Ready);
        assert!(s.pairing_token().is_none());
        assert_eq!(s.identity().unwrap().display_name, "Alice");
    }

    #[test]
    fn test_token_rotation_replaces_cached_token() {
        let mut s = begun();
        s.apply(BackendEvent::PairingToken("first".into()));
        s.apply(BackendEvent::PairingToken("second".into()));
        assert_eq!(s.pairing_token().unwrap().value, "second");
    }

    #[test]
    fn test_token_ignored_outside_pairing() {
        let mut s = Session::default();
        assert_eq!(
            s.apply(BackendEvent::PairingToken("x".into())),
            EventOutcome::Ignored { state: SessionState::Uninitialized }
        );

        let mut s = begun();
        s.apply(BackendEvent::Ready(Identity::named("Alice")));
        s.apply(BackendEvent::PairingToken("late".into()));
        assert_eq!(s.state(), SessionState::Ready);
        assert!(s.pairing_token().is_none());
    }

    #[test]
    fn test_disconnect_clears_identity_and_token() {
        let mut s = begun();
        s.apply(BackendEvent::Ready(Identity::named("Alice")));
        s.apply(BackendEvent::Disconnected("LOGOUT".into()));
        let snap = s.snapshot();
        assert_eq!(snap.state, SessionState::Disconnected);
        assert!(snap.identity.is_none());
        assert!(!snap.has_pairing_token);
        assert_eq!(snap.disconnect_reason.as_deref(), Some("LOGOUT"));
    }

    #[test]
    fn test_pairing_can_fail_straight_to_disconnected() {
        let mut s = begun();
        s.apply(BackendEvent::PairingToken("abc".into()));
        s.apply(BackendEvent::Disconnected("scan timeout".into()));
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(s.pairing_token().is_none());
    }

    #[test]
    fn test_error_event_never_changes_state() {
        let mut s = begun();
        assert_eq!(s.apply(BackendEvent::Error("boom".into())), EventOutcome::Logged);
        assert_eq!(s.state(), SessionState::Initializing);
    }

    #[test]
    fn test_events_after_logout_are_ignored() {
        let mut s = begun();
        s.logged_out();
        s.apply(BackendEvent::Ready(Identity::named("Alice")));
        s.apply(BackendEvent::Disconnected("x".into()));
        assert_eq!(s.state(), SessionState::LoggedOut);
        assert!(s.identity().is_none());
    }

    #[test]
    fn test_stale_pairing_failure_is_dropped() {
        let mut s = begun();
        let old_epoch = s.epoch;
        s.logged_out();
        let new_epoch = s.try_begin().unwrap();
        assert_ne!(old_epoch, new_epoch);

        let err = GatewayError::SessionInit { detail: "old".into() };
        assert!(!s.pairing_failed(old_epoch, &err));
        assert_eq!(s.state(), SessionState::Initializing);

        assert!(s.pairing_failed(new_epoch, &err));
        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(
            s.snapshot().last_failure.unwrap().code,
            crate::errors::ErrorKind::SessionInitFailure
        );
    }

    #[test]
    fn test_restart_after_disconnect_clears_diagnostics() {
        let mut s = begun();
        s.apply(BackendEvent::Disconnected("NAVIGATION".into()));
        assert!(s.try_begin().is_some());
        let snap = s.snapshot();
        assert_eq!(snap.state, SessionState::Initializing);
        assert!(snap.disconnect_reason.is_none());
    }

    #[test]
    fn test_start_outcome_serializes_with_tag() {
        let json = serde_json::to_value(StartOutcome::AlreadyActive {
            state: SessionState::Ready,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "outcome": "already_active", "state": "Ready" }));
    }
}
