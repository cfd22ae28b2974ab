//! Upstream proxy handling
//!
//! This module provides:
//! - HTTP transport through a forward proxy
//! - Health probing with target rotation and sampled batches
//! - Proxy selection strategies

pub mod health;
pub mod rotation;
pub mod transport;

pub use health::{HealthProber, HealthProberConfig, ProbeSummary};
pub use rotation::{create_selector, ProxySelector, SelectionStrategy};
pub use transport::ProxyTransport;
