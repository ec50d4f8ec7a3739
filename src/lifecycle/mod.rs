//! Lifecycle Module
//!
//! Reacts to application visibility changes by scheduling or cancelling
//! deferred cache cleanup.

mod coordinator;

pub use coordinator::{AppVisibility, LifecycleCoordinator, ScheduledCleanup};
