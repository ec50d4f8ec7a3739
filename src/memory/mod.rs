//! Memory Module
//!
//! Advisory accounting of bytes attributed to cached and in-flight images.

mod accountant;

pub use accountant::{MemoryAccountant, MemoryUsage, PressureRelief};
