//! Proxy pool storage

pub mod store;

pub use store::{CleanupReport, ProxyStore, DEFAULT_MIN_POOL_SIZE};
