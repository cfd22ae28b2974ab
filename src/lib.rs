//! Rota Runner - Paced Work Cycles Over a Proxy Pool
//!
//! Loads a list of forward proxies, scores them by observed health, and runs a paced
//! loop of work units through them until a daily success target is met.
//!
//! ## Features
//!
//! - Proxy record store with usage, outcome and health bookkeeping
//! - Health probing with rotated echo targets, retries and bounded-concurrency batches
//! - Weighted (health-aware) and round-robin selection
//! - Adaptive inter-cycle delay and a consecutive-failure circuit breaker
//! - JSONL outcome logs, per-proxy statistics and atomic emergency snapshots

pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod proxy;
pub mod sink;
pub mod work;

pub use config::Config;
pub use error::{Result, RunnerError};
pub use orchestrator::{CycleOrchestrator, OrchestratorConfig};
pub use pool::ProxyStore;
