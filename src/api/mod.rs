//! HTTP API for feature lookups
//!
//! Provides:
//! - Point inference for one entity
//! - Full-namespace training export
//! - Feature discovery and health

pub mod server;

pub use server::{ApiServer, ApiServerConfig};
