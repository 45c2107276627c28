//! Fan-out queue backends.
//!
//! `postgres` stores events as apalis jobs so they survive restarts and can be
//! consumed by separate worker processes. `memory` keeps them in-process with
//! the same at-least-once contract, for single-node development and tests.
//!
//! Either way, a publication stays flagged pending until a worker applies it,
//! and `run_pending_sweeper` re-enqueues the ones that stay pending too long.

mod memory;
mod postgres;
mod sweeper;

pub use memory::{Delivery, MemoryFanoutQueue, NackOutcome, run_memory_consumer};
pub use postgres::{PostgresFanoutQueue, run_postgres_consumers, setup_job_storage};
pub use sweeper::{SweepSchedule, run_pending_sweeper};

pub(crate) use memory::METRIC_MEMORY_QUEUE_DEPTH;
