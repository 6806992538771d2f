//! Basic task engine usage example
//!
//! Demonstrates engine creation, task submission, result envelopes and
//! statistics.
//!
//! Run with: cargo run --example basic_usage

use std::thread;
use std::time::Duration;
use task_engine::prelude::*;

fn main() -> Result<()> {
    env_logger::init();
    println!("=== Task Engine - Basic Usage Example ===\n");

    let engine = TaskEngine::new(EngineConfig::new(4).with_thread_name_prefix("demo-worker"))?;

    println!("1. Starting engine with {} threads", engine.config().initial_threads);
    engine.start()?;

    println!("\n2. Submitting tasks with completion routines:");
    let group = GroupId::new(1);
    for i in 0..10u32 {
        engine.submit_task(
            group,
            move |_token| {
                thread::sleep(Duration::from_millis(20));
                if i % 5 == 4 {
                    ResultEnvelope::make_error(ErrorCode::InvalidArgument, format!("input {} rejected", i))
                } else {
                    ResultEnvelope::make_success(i * i)
                }
            },
            move |envelope| match envelope {
                ResultEnvelope::Success(value) => {
                    println!("   task {} -> {} on {:?}", i, value, thread::current().name())
                }
                ResultEnvelope::Error { code, message } => {
                    println!("   task {} failed: {} ({})", i, message, code)
                }
            },
        )?;
    }

    engine.wait_group(group, None);

    println!("\n3. Receiving a result over a channel:");
    let (_handle, rx) = engine.submit_with_receiver(GroupId::UNGROUPED, |_| {
        ResultEnvelope::make_success("leaderboard page 1".to_string())
    })?;
    if let Ok(envelope) = rx.recv() {
        println!("   received: {:?}", envelope.payload());
    }

    println!("\n4. A panicking task becomes an InternalFailure envelope:");
    let (_handle, rx) = engine.submit_with_receiver(GroupId::UNGROUPED, |_| -> ResultEnvelope<()> {
        panic!("unexpected fault in work body")
    })?;
    if let Ok(envelope) = rx.recv() {
        println!("   code: {}, message: {:?}", envelope.code(), envelope.error_message());
    }

    println!("\n5. Pool statistics:");
    let stats = engine.stats();
    println!("   active threads: {}", stats.active_threads);
    println!("   completed: {}", stats.totals.tasks_completed);
    println!("   failed: {}", stats.totals.tasks_failed);
    println!("   panicked: {}", stats.totals.tasks_panicked);

    println!("\n6. Shutting down");
    engine.shutdown(true)?;
    println!("   done");
    Ok(())
}
