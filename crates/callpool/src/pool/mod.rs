//! Worker pool and its per-worker execution loop.
//!
//! ## Structure
//!
//! - [`manager`] - spawning, draining and joining the workers.
//! - [`worker`] - the per-worker dequeue / call / route loop.

pub(crate) mod manager;
pub(crate) mod worker;

pub(crate) use manager::WorkerPool;
