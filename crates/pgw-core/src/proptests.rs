//! Property-based tests for dispatch spacing, validation and classification.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;

    use crate::backend::{BackendFailure, FailureCategory, Identity};
    use crate::classify::{classify, Operation};
    use crate::config::GatewayConfig;
    use crate::dispatch::{normalize_destination, validate, SendRequest, MIN_DESTINATION_DIGITS};
    use crate::errors::ErrorKind;
    use crate::gateway::Gateway;
    use crate::testing::{pair_session, MockBackend};

    fn paused_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
    }

    fn category() -> impl Strategy<Value = FailureCategory> {
        prop_oneof![
            Just(FailureCategory::NotReady),
            Just(FailureCategory::InvalidDestination),
            Just(FailureCategory::Transport),
            Just(FailureCategory::Unknown),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        // However many sends race and however slow the backend is, no two
        // consecutive backend sends are closer than the configured spacing.
        #[test]
        fn property_sends_are_globally_spaced(
            spacing_secs in 0u64..5,
            latency_ms in 0u64..4000,
            senders in 1usize..6,
        ) {
            let rt = paused_runtime();
            let stamps = rt.block_on(async move {
                let backend = Arc::new(
                    MockBackend::new().with_send_latency(Duration::from_millis(latency_ms)),
                );
                let config = GatewayConfig {
                    min_send_spacing_secs: spacing_secs,
                    ..GatewayConfig::default()
                };
                let gateway = Arc::new(Gateway::new(config, backend.clone()).unwrap());
                assert!(pair_session(&gateway, &backend, Identity::named("Alice")).await);

                let mut handles = Vec::new();
                for i in 0..senders {
                    let gateway = gateway.clone();
                    handles.push(tokio::spawn(async move {
                        gateway
                            .send_message(SendRequest::new("573001234567", format!("msg {i}")))
                            .await
                    }));
                }
                for h in handles {
                    assert!(h.await.unwrap().is_ok());
                }

                let mut stamps: Vec<_> = backend.get_sent().into_iter().map(|s| s.at).collect();
                stamps.sort();
                stamps
            });

            prop_assert_eq!(stamps.len(), senders);
            for pair in stamps.windows(2) {
                prop_assert!(pair[1] - pair[0] >= Duration::from_secs(spacing_secs));
            }
        }

        #[test]
        fn property_destination_accepted_iff_enough_digits(
            raw in "[0-9 +()\\-]{0,24}",
        ) {
            let digits = normalize_destination(&raw).len();
            let result = validate(&SendRequest::new(raw.clone(), "hello"));
            if raw.is_empty() {
                prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::MissingFields);
            } else if digits >= MIN_DESTINATION_DIGITS {
                prop_assert!(result.is_ok());
            } else {
                prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidDestination);
            }
        }

        #[test]
        fn property_classification_keeps_detail(
            cat in category(),
            detail in "[a-zA-Z ]{1,40}",
        ) {
            let failure = BackendFailure::new(cat, detail.clone());
            for op in [Operation::Send, Operation::Pairing, Operation::Teardown] {
                let err = classify(op, &failure);
                prop_assert!(err.to_string().contains(&detail));
            }
            let pairing = classify(Operation::Pairing, &failure).kind();
            prop_assert_eq!(pairing, ErrorKind::SessionInitFailure);
        }
    }
}
