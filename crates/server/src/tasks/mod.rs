// crates/server/src/tasks/mod.rs
//! Recurring background checks run by the service manager.
//!
//! Provides:
//! - `registry_health` - registry reachability ping
//! - `orphaned_artifacts` - artifacts whose registry record is gone (report-only)
//! - `bridge_stats` - open channel and subscriber gauges

pub mod checks;

pub use checks::{bridge_stats, orphaned_artifacts, registry_health, CheckError};
