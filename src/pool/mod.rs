//! Worker pool, worker threads and completion dispatch

pub mod config;
pub(crate) mod dispatch;
pub mod worker;
pub mod worker_pool;

pub use config::{AffinityPolicy, EngineConfig, MAX_THREADS};
pub use worker::{Worker, WorkerState, WorkerStats, WorkerStatsSnapshot};
pub use worker_pool::{PoolPhase, PoolStats, WorkerPool};
