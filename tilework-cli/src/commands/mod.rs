//! CLI command implementations.
//!
//! - [`jobs`] - Drive synthetic jobs through the tick-based scheduler
//! - [`pool`] - Dispatch prioritised tasks into a worker pool

pub mod jobs;
pub mod pool;
