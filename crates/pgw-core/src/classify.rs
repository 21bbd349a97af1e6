//! Maps raw backend failures onto the gateway error taxonomy.
//!
//! Pure: the result depends only on the operation and the failure.

use crate::backend::{BackendFailure, FailureCategory};
use crate::errors::GatewayError;

/// Which backend call produced the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Send,
    Pairing,
    Teardown,
}

/// Classify a backend failure. The original detail is always preserved.
pub fn classify(operation: Operation, failure: &BackendFailure) -> GatewayError {
    let detail = failure.detail().to_string();
    match operation {
        Operation::Pairing => GatewayError::SessionInit { detail },
        Operation::Teardown => GatewayError::Logout { detail },
        Operation::Send => match failure.category() {
            Some(FailureCategory::NotReady) => GatewayError::NotConnected {
                reason: format!("backend not ready: {detail}"),
            },
            Some(FailureCategory::InvalidDestination) => GatewayError::InvalidDestination {
                reason: format!("rejected by backend: {detail}"),
            },
            Some(FailureCategory::Transport) | Some(FailureCategory::Unknown) => {
                GatewayError::Backend { detail }
            }
            // Free text is never parsed for meaning.
            None => GatewayError::Unknown { detail },
        },
    }
}
