//! Background acquisition
//!
//! The scheduler owns the polling worker, fans acquired samples out to
//! subscribers and keeps a bounded ring of recent samples for read-back.

pub mod scheduler;

pub use scheduler::{AcquisitionScheduler, SchedulerState, SCHEDULER_RING_CAPACITY};
