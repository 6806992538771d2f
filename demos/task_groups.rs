//! Task groups, cancellation and resizing
//!
//! Run with: cargo run --example task_groups

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use task_engine::{global, prelude::*};

fn main() -> Result<()> {
    env_logger::init();
    println!("=== Task Engine - Task Groups Example ===\n");

    global::init(EngineConfig::new(2).with_max_threads(8))?;
    let token = global::add_handler(|event| println!("   event: {:?}", event))?;
    global::start()?;

    println!("1. Cancelling a slow group while it runs:");
    let slow = GroupId::new(10);
    let cancelled = Arc::new(AtomicUsize::new(0));
    for i in 0..6 {
        let cancelled = Arc::clone(&cancelled);
        global::submit_task(
            slow,
            move |token| {
                for _ in 0..50 {
                    if token.is_cancelled() {
                        return ResultEnvelope::make_error(ErrorCode::Cancelled, "stopped early");
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                ResultEnvelope::make_success(i)
            },
            move |envelope| {
                if envelope.code() == ErrorCode::Cancelled {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                }
            },
        )?;
    }
    thread::sleep(Duration::from_millis(50));
    let removed = global::cancel_group(slow)?;
    global::wait_group(slow, global::INFINITE_TIMEOUT)?;
    println!(
        "   {} removed from the queue, {} resolved as cancelled",
        removed,
        cancelled.load(Ordering::SeqCst)
    );

    println!("\n2. Growing the pool for a burst:");
    let burst = GroupId::new(20);
    global::set_target_thread_count(6)?;
    println!("   active threads: {}", global::get_active_thread_count()?);
    for _ in 0..24 {
        global::submit_task(
            burst,
            |_| {
                thread::sleep(Duration::from_millis(5));
                ResultEnvelope::make_success(())
            },
            |_| {},
        )?;
    }
    let drained = global::wait_group(burst, 5_000)?;
    println!("   burst drained: {}", drained);

    println!("\n3. Shrinking back:");
    global::set_target_thread_count(2)?;
    thread::sleep(Duration::from_millis(20));
    println!("   active threads: {}", global::get_active_thread_count()?);

    global::remove_handler(token)?;
    global::teardown()?;
    println!("\n4. After teardown: {:?}", global::start().err());
    Ok(())
}
