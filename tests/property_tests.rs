//! Property-based tests for task_engine using proptest

use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use task_engine::prelude::*;
use task_engine::MAX_THREADS;

// ============================================================================
// EngineConfig Tests
// ============================================================================

proptest! {
    /// Any non-empty prefix and positive ceiling validates
    #[test]
    fn test_config_validates(
        threads in 1usize..32,
        max_threads in 1usize..128,
        prefix in "[a-z]{3,10}"
    ) {
        let config = EngineConfig::new(threads)
            .with_max_threads(max_threads)
            .with_thread_name_prefix(&prefix);

        prop_assert!(config.validate().is_ok());
        prop_assert!(config.ceiling() <= MAX_THREADS);
        prop_assert!(config.ceiling() <= max_threads);
    }

    /// Configurations survive a JSON round trip through from_json
    #[test]
    fn test_config_from_json(threads in 1usize..16, max_threads in 1usize..64) {
        let config = EngineConfig::new(threads).with_max_threads(max_threads);
        let json = serde_json::to_string(&config).expect("config serializes");
        let parsed = EngineConfig::from_json(&json).expect("config parses");
        prop_assert_eq!(parsed, config);
    }
}

// ============================================================================
// ResultEnvelope Tests
// ============================================================================

proptest! {
    /// Error envelopes never report success
    #[test]
    fn test_error_envelope_is_error(message in ".{0,40}") {
        for code in [
            ErrorCode::Success,
            ErrorCode::InvalidArgument,
            ErrorCode::Cancelled,
            ErrorCode::Shutdown,
            ErrorCode::InternalFailure,
        ] {
            let envelope = ResultEnvelope::<u8>::make_error(code, message.clone());
            prop_assert!(envelope.is_error());
            prop_assert_ne!(envelope.code(), ErrorCode::Success);
            prop_assert!(envelope.payload().is_err());
        }
    }
}

// ============================================================================
// Engine Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Every submitted task resolves exactly once, whatever its outcome
    #[test]
    fn test_every_task_resolves_once(
        threads in 1usize..4,
        outcomes in prop::collection::vec(0u8..3, 1..40)
    ) {
        let engine = TaskEngine::with_threads(threads).expect("Failed to create engine");
        engine.start().expect("Failed to start engine");
        let resolved = Arc::new(AtomicUsize::new(0));

        for outcome in outcomes.iter().copied() {
            let resolved = Arc::clone(&resolved);
            engine
                .submit_task(
                    GroupId::new(1),
                    move |_| match outcome {
                        0 => ResultEnvelope::make_success(()),
                        1 => ResultEnvelope::make_error(ErrorCode::InvalidArgument, "rejected"),
                        _ => panic!("work body failure"),
                    },
                    move |_| {
                        resolved.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .expect("Failed to submit task");
        }

        prop_assert!(engine.wait_group(GroupId::new(1), Some(Duration::from_secs(10))));
        engine.shutdown(true).expect("Failed to shutdown engine");
        prop_assert_eq!(resolved.load(Ordering::SeqCst), outcomes.len());
    }

    /// With one worker, tasks of a group complete in submission order
    #[test]
    fn test_single_worker_fifo(count in 1usize..30) {
        let engine = TaskEngine::with_threads(1).expect("Failed to create engine");
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..count {
            let order = Arc::clone(&order);
            engine
                .submit_task(
                    GroupId::new(2),
                    |_| ResultEnvelope::make_success(()),
                    move |_| order.lock().push(i),
                )
                .expect("Failed to submit task");
        }

        engine.start().expect("Failed to start engine");
        prop_assert!(engine.wait_group(GroupId::new(2), Some(Duration::from_secs(10))));
        engine.shutdown(true).expect("Failed to shutdown engine");

        let order = order.lock().clone();
        prop_assert_eq!(order, (0..count).collect::<Vec<_>>());
    }

    /// Cancelling a group before start resolves every member with Cancelled
    #[test]
    fn test_cancel_group_resolves_all(count in 0usize..20, group in 1u64..1000) {
        let engine = TaskEngine::with_threads(1).expect("Failed to create engine");
        let cancelled = Arc::new(AtomicUsize::new(0));

        for _ in 0..count {
            let cancelled = Arc::clone(&cancelled);
            engine
                .submit_task(
                    GroupId::new(group),
                    |_| ResultEnvelope::make_success(()),
                    move |env| {
                        if env.code() == ErrorCode::Cancelled {
                            cancelled.fetch_add(1, Ordering::SeqCst);
                        }
                    },
                )
                .expect("Failed to submit task");
        }

        prop_assert_eq!(engine.cancel_group(GroupId::new(group)), count);
        prop_assert_eq!(engine.cancel_group(GroupId::new(group)), 0);
        prop_assert_eq!(cancelled.load(Ordering::SeqCst), count);
        prop_assert_eq!(engine.outstanding_count(GroupId::new(group)), 0);
    }
}
