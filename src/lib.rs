//! pvscull - PVS-driven render culling
//!
//! Turns potentially-visible-set leaf samples into a spatial index on a
//! background thread and classifies scene entities against it in
//! time-boxed batches.

pub mod core;
pub mod math;
pub mod visibility;
