//! Tests for the process-wide engine lifecycle
//!
//! Every test here touches the same global instance, so they serialize on
//! `GLOBAL_LOCK` and leave the instance torn down.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use task_engine::global;
use task_engine::prelude::*;

static GLOBAL_LOCK: Mutex<()> = parking_lot::const_mutex(());

#[test]
fn test_calls_before_init_fail() {
    let _guard = GLOBAL_LOCK.lock();
    global::teardown().expect("teardown without engine is a no-op");

    assert!(!global::is_initialized());
    assert!(matches!(global::start(), Err(EngineError::NotInitialized)));
    assert!(matches!(
        global::submit_task(GroupId::new(1), |_| ResultEnvelope::make_success(()), |_| {}),
        Err(EngineError::NotInitialized)
    ));
    assert!(matches!(
        global::wait_group(GroupId::new(1), 10),
        Err(EngineError::NotInitialized)
    ));
    assert!(matches!(
        global::cancel_group(GroupId::new(1)),
        Err(EngineError::NotInitialized)
    ));
    assert!(matches!(
        global::get_active_thread_count(),
        Err(EngineError::NotInitialized)
    ));
    assert!(matches!(
        global::configure(1, 2),
        Err(EngineError::NotInitialized)
    ));
}

#[test]
fn test_init_submit_teardown() {
    let _guard = GLOBAL_LOCK.lock();
    global::init(EngineConfig::new(2)).expect("Failed to init engine");
    assert!(matches!(
        global::init(EngineConfig::new(2)),
        Err(EngineError::InvalidState(_))
    ));
    global::start().expect("Failed to start engine");

    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let done = Arc::clone(&done);
        global::submit_task(
            GroupId::new(4),
            |_| ResultEnvelope::make_success(()),
            move |_| {
                done.fetch_add(1, Ordering::SeqCst);
            },
        )
        .expect("Failed to submit task");
    }
    assert!(global::wait_group(GroupId::new(4), 5_000).expect("engine initialized"));
    assert_eq!(done.load(Ordering::SeqCst), 10);

    global::teardown().expect("Failed to tear down engine");
    assert!(matches!(
        global::submit_task(GroupId::new(4), |_| ResultEnvelope::make_success(()), |_| {}),
        Err(EngineError::NotInitialized)
    ));

    // Never recreated implicitly, but an explicit init works again.
    global::init(EngineConfig::new(1)).expect("Failed to re-init engine");
    global::teardown().expect("Failed to tear down engine");
    global::teardown().expect("second teardown is a no-op");
}

#[test]
fn test_teardown_drains_queued_work() {
    let _guard = GLOBAL_LOCK.lock();
    global::init(EngineConfig::new(1)).expect("Failed to init engine");

    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let done = Arc::clone(&done);
        global::submit(TaskDescriptor::new(move |_| {
            done.fetch_add(1, Ordering::SeqCst);
            ResultEnvelope::make_success(())
        }))
        .expect("Failed to submit task");
    }

    // Never started: teardown drains on this thread.
    global::teardown().expect("Failed to tear down engine");
    assert_eq!(done.load(Ordering::SeqCst), 5);
}

#[test]
fn test_configure_only_before_start() {
    let _guard = GLOBAL_LOCK.lock();
    global::init(EngineConfig::new(1)).expect("Failed to init engine");

    global::configure(3, 4).expect("configure before start");
    assert_eq!(global::engine().unwrap().config().initial_threads, 3);
    assert_eq!(global::engine().unwrap().config().max_threads, 4);

    global::start().expect("Failed to start engine");
    assert_eq!(global::get_active_thread_count().unwrap(), 3);
    assert!(matches!(
        global::configure(2, 4),
        Err(EngineError::InvalidState(_))
    ));

    assert_eq!(global::set_target_thread_count(10).unwrap(), 4);
    global::teardown().expect("Failed to tear down engine");
}

#[test]
fn test_handler_double_removal_is_silent() {
    let _guard = GLOBAL_LOCK.lock();
    global::init(EngineConfig::new(1)).expect("Failed to init engine");

    let drained = Arc::new(AtomicUsize::new(0));
    let drained_clone = Arc::clone(&drained);
    let token = global::add_handler(move |event| {
        if let EngineEvent::GroupDrained(_) = event {
            drained_clone.fetch_add(1, Ordering::SeqCst);
        }
    })
    .expect("Failed to add handler");

    global::start().expect("Failed to start engine");
    global::submit_task(GroupId::new(8), |_| ResultEnvelope::make_success(()), |_| {})
        .expect("Failed to submit task");
    assert!(global::wait_group(GroupId::new(8), 5_000).unwrap());

    // The drained event is published after waiters are woken.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while drained.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(drained.load(Ordering::SeqCst), 1);

    assert!(global::remove_handler(token).expect("engine initialized"));
    assert!(!global::remove_handler(token).expect("engine initialized"));

    global::teardown().expect("Failed to tear down engine");
}
