//! Global send spacing.
//!
//! One clock per gateway, shared by every send regardless of destination.
//! The wait-then-stamp sequence runs while holding an async mutex, so a send
//! that arrives while another is waiting computes its own wait against the
//! stamp the earlier send will leave behind, never a stale one.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Result of a successful admission.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    /// Instant stamped as the latest send
    pub admitted_at: Instant,
    /// Time spent waiting for spacing inside the critical section
    pub waited: Duration,
}

/// Shared record of the most recently admitted send.
#[derive(Debug)]
pub struct ThrottleClock {
    last_send_at: Mutex<Option<Instant>>,
    spacing: Duration,
}

impl ThrottleClock {
    pub fn new(spacing: Duration) -> Self {
        Self {
            last_send_at: Mutex::new(None),
            spacing,
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// `max(0, spacing - (now - last))`; zero when nothing was sent yet.
    pub fn required_wait(last: Option<Instant>, now: Instant, spacing: Duration) -> Duration {
        match last {
            Some(last) => spacing.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Wait out the spacing and stamp a new send.
    ///
    /// `still_eligible` runs after the wait, inside the critical section; if
    /// it fails the clock is left untouched and its error is returned. Once
    /// this returns `Ok` the slot is consumed, whatever happens to the send.
    pub async fn admit<E>(
        &self,
        still_eligible: impl FnOnce() -> Result<(), E>,
    ) -> Result<Admission, E> {
        let mut last = self.last_send_at.lock().await;

        let wait = Self::required_wait(*last, Instant::now(), self.spacing);
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Holding send for spacing");
            sleep(wait).await;
        }

        still_eligible()?;

        let admitted_at = Instant::now();
        *last = Some(admitted_at);

        Ok(Admission {
            admitted_at,
            waited: wait,
        })
    }

    /// Instant of the most recently admitted send.
    pub async fn last_send_at(&self) -> Option<Instant> {
        *self.last_send_at.lock().await
    }
}
