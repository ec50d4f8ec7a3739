//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry sweep: purges expired cache entries at configured intervals
//! - Health monitor: publishes cache and memory snapshots

mod cleanup;
mod monitor;

pub use cleanup::spawn_cleanup_task;
pub use monitor::spawn_monitor_task;
