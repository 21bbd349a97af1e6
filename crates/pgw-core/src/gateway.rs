//! Caller-facing facade.
//!
//! [`Gateway`] wires one [`SessionManager`], one [`ThrottleClock`] and one
//! [`OutboundDispatcher`] around a single backend, and exposes the operations
//! an outer surface (HTTP, CLI, tests) needs.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::backend::ConnectionBackend;
use crate::config::{ConfigError, GatewayConfig};
use crate::dispatch::{DispatchStatsSnapshot, OutboundDispatcher, SendReceipt, SendRequest};
use crate::errors::GatewayError;
use crate::session::{
    PairingTokenView, SessionManager, SessionState, StartOutcome, StatusSnapshot,
};
use crate::throttle::ThrottleClock;

/// Liveness report. Always `ok` while the process can answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub session_state: SessionState,
}

pub struct Gateway {
    session: Arc<SessionManager>,
    dispatcher: OutboundDispatcher,
    started_at: Instant,
}

impl Gateway {
    /// Build a gateway around `backend`. Must be called within a tokio
    /// runtime because the session event loop is spawned here.
    pub fn new(
        config: GatewayConfig,
        backend: Arc<dyn ConnectionBackend>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let session = Arc::new(SessionManager::new(
            backend.clone(),
            config.pairing_token_ttl(),
            config.event_channel_capacity,
        ));
        let clock = Arc::new(ThrottleClock::new(config.min_send_spacing()));
        let dispatcher = OutboundDispatcher::new(session.clone(), backend, clock);

        info!(
            spacing_secs = config.min_send_spacing_secs,
            token_ttl_secs = config.pairing_token_ttl_secs,
            "Gateway initialized"
        );

        Ok(Self {
            session,
            dispatcher,
            started_at: Instant::now(),
        })
    }

    pub fn start_session(&self) -> StartOutcome {
        self.session.start()
    }

    pub fn get_status(&self) -> StatusSnapshot {
        self.session.status()
    }

    pub fn get_pairing_token(&self) -> PairingTokenView {
        self.session.pairing_token()
    }

    pub async fn logout(&self) -> Result<(), GatewayError> {
        self.session.logout().await
    }

    pub async fn send_message(&self, request: SendRequest) -> Result<SendReceipt, GatewayError> {
        self.dispatcher.send(request).await
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.dispatcher.stats()
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.started_at.elapsed().as_secs(),
            session_state: self.session.state(),
        }
    }

    /// Stop processing backend events. Does not log out.
    pub fn shutdown(&self) {
        info!("Gateway shutting down");
        self.session.shutdown();
    }
}
