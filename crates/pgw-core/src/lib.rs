//! PGW Core - session lifecycle and throttled dispatch for a single-account
//! messaging gateway.
//!
//! This crate implements:
//! - The session state machine driven by backend events
//! - Outbound validation and globally spaced dispatch
//! - Classification of backend failures into stable error codes
//! - Configuration from TOML files and environment variables
//! - A scriptable mock backend for tests and demos

#![forbid(unsafe_code)]

// Core state machines
pub mod session;
pub mod throttle;

// Services
pub mod dispatch;
pub mod gateway;

// Backend boundary
pub mod backend;
pub mod classify;

// Supporting modules
pub mod config;
pub mod errors;
pub mod testing;

#[cfg(test)]
mod proptests;

pub use backend::{
    BackendEvent, BackendFailure, ConnectionBackend, DeliveryReceipt, EventSink, FailureCategory,
    Identity,
};
pub use config::{ConfigError, GatewayConfig};
pub use dispatch::{SendReceipt, SendRequest};
pub use errors::{ErrorKind, ErrorReport, GatewayError};
pub use gateway::{Gateway, HealthReport};
pub use session::{PairingTokenView, SessionState, StartOutcome, StatusSnapshot};
