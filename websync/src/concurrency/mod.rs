//! Concurrency utilities shared by the sync pipelines.
//!
//! Every fan-out in the crate goes through [`BoundedTaskGroup`], which caps how many tasks run at
//! once and releases a slot whenever a task ends, whether it returned or panicked.

mod task_group;

pub use task_group::BoundedTaskGroup;
