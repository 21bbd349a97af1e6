//! Testing utilities: a scriptable in-memory backend and polling helpers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use crate::backend::{
    BackendEvent, BackendFailure, ConnectionBackend, DeliveryReceipt, EventSink, Identity,
};
use crate::gateway::Gateway;
use crate::session::SessionState;

/// One call to `send` as the mock saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub destination: String,
    pub body: String,
    /// When the call entered the backend
    pub at: Instant,
}

#[derive(Debug, Clone)]
struct AutoPair {
    token: String,
    identity: Identity,
    scan_delay: Duration,
}

/// Mock backend for testing
pub struct MockBackend {
    pairing_calls: AtomicUsize,
    teardown_calls: AtomicUsize,
    next_delivery: AtomicU64,
    sink: Mutex<Option<EventSink>>,
    sent: Mutex<Vec<SentMessage>>,
    send_failures: Mutex<VecDeque<BackendFailure>>,
    pairing_failure: Mutex<Option<BackendFailure>>,
    teardown_failure: Mutex<Option<BackendFailure>>,
    send_latency: Duration,
    pairing_delay: Duration,
    teardown_delay: Duration,
    auto_pair: Option<AutoPair>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            pairing_calls: AtomicUsize::new(0),
            teardown_calls: AtomicUsize::new(0),
            next_delivery: AtomicU64::new(1),
            sink: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            send_failures: Mutex::new(VecDeque::new()),
            pairing_failure: Mutex::new(None),
            teardown_failure: Mutex::new(None),
            send_latency: Duration::ZERO,
            pairing_delay: Duration::ZERO,
            teardown_delay: Duration::ZERO,
            auto_pair: None,
        }
    }

    /// Configure how long each `send` takes
    pub fn with_send_latency(mut self, latency: Duration) -> Self {
        self.send_latency = latency;
        self
    }

    /// Configure how long `begin_pairing` takes to return
    pub fn with_pairing_delay(mut self, delay: Duration) -> Self {
        self.pairing_delay = delay;
        self
    }

    /// Configure how long `end_session` takes to return
    pub fn with_teardown_delay(mut self, delay: Duration) -> Self {
        self.teardown_delay = delay;
        self
    }

    /// Emit `token` as soon as pairing begins, then `identity` after
    /// `scan_delay`, as if a device scanned the token.
    pub fn with_auto_pair(
        mut self,
        token: impl Into<String>,
        identity: Identity,
        scan_delay: Duration,
    ) -> Self {
        self.auto_pair = Some(AutoPair {
            token: token.into(),
            identity,
            scan_delay,
        });
        self
    }

    /// Queue a failure for the next `send`
    pub fn fail_next_send(&self, failure: BackendFailure) {
        self.send_failures.lock().push_back(failure);
    }

    /// Fail the next `begin_pairing`
    pub fn fail_pairing(&self, failure: BackendFailure) {
        *self.pairing_failure.lock() = Some(failure);
    }

    /// Fail the next `end_session`
    pub fn fail_teardown(&self, failure: BackendFailure) {
        *self.teardown_failure.lock() = Some(failure);
    }

    pub fn pairing_calls(&self) -> usize {
        self.pairing_calls.load(Ordering::SeqCst)
    }

    pub fn teardown_calls(&self) -> usize {
        self.teardown_calls.load(Ordering::SeqCst)
    }

    pub fn get_sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// A sink has been handed over by `begin_pairing`
    pub fn has_sink(&self) -> bool {
        self.sink.lock().is_some()
    }

    pub async fn emit_pairing_token(&self, token: impl Into<String>) -> bool {
        self.emit(BackendEvent::PairingToken(token.into())).await
    }

    pub async fn emit_ready(&self, identity: Identity) -> bool {
        self.emit(BackendEvent::Ready(identity)).await
    }

    pub async fn emit_disconnected(&self, reason: impl Into<String>) -> bool {
        self.emit(BackendEvent::Disconnected(reason.into())).await
    }

    pub async fn emit_error(&self, detail: impl Into<String>) -> bool {
        self.emit(BackendEvent::Error(detail.into())).await
    }

    async fn emit(&self, event: BackendEvent) -> bool {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => sink.emit(event).await,
            None => false,
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionBackend for MockBackend {
    async fn begin_pairing(&self, events: EventSink) -> Result<(), BackendFailure> {
        self.pairing_calls.fetch_add(1, Ordering::SeqCst);
        if !self.pairing_delay.is_zero() {
            sleep(self.pairing_delay).await;
        }
        if let Some(failure) = self.pairing_failure.lock().take() {
            return Err(failure);
        }

        *self.sink.lock() = Some(events.clone());

        if let Some(auto) = self.auto_pair.clone() {
            tokio::spawn(async move {
                if !events.emit(BackendEvent::PairingToken(auto.token)).await {
                    return;
                }
                sleep(auto.scan_delay).await;
                events.emit(BackendEvent::Ready(auto.identity)).await;
            });
        }
        Ok(())
    }

    async fn send(&self, destination: &str, body: &str) -> Result<DeliveryReceipt, BackendFailure> {
        self.sent.lock().push(SentMessage {
            destination: destination.to_string(),
            body: body.to_string(),
            at: Instant::now(),
        });

        if !self.send_latency.is_zero() {
            sleep(self.send_latency).await;
        }

        if let Some(failure) = self.send_failures.lock().pop_front() {
            return Err(failure);
        }

        let n = self.next_delivery.fetch_add(1, Ordering::SeqCst);
        Ok(DeliveryReceipt {
            delivery_id: format!("mock-{n}"),
        })
    }

    async fn end_session(&self) -> Result<(), BackendFailure> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        if !self.teardown_delay.is_zero() {
            sleep(self.teardown_delay).await;
        }
        self.sink.lock().take();
        match self.teardown_failure.lock().take() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(5)).await;
    }
}

/// Drive `gateway` to `Ready` by scripting the events a scan would produce.
pub async fn pair_session(gateway: &Gateway, backend: &MockBackend, identity: Identity) -> bool {
    gateway.start_session();
    if !wait_until(|| backend.has_sink(), Duration::from_secs(5)).await {
        return false;
    }
    backend.emit_pairing_token("pairing-token").await;
    backend.emit_ready(identity).await;
    wait_until(
        || gateway.get_status().state == SessionState::Ready,
        Duration::from_secs(5),
    )
    .await
}
