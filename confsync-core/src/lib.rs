//! Config sync core
//!
//! Keeps per-account configuration objects in memory, merges incoming
//! swarm messages into them, collects outgoing pushes and persists dumps
//! so state survives restarts.

pub mod config;
pub mod core_config;
pub mod core_crdt;
pub mod core_store;
pub mod logging;
pub mod metrics;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use core_config::{ConfigSync, ConfigVariant, SyncError, SyncResult};
pub use core_store::ConfigDumpStore;
pub use logging::{init_logging, LogLevel};
