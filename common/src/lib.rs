//! Shared foundations of the multiplication core: the element scalar
//! abstraction, the error taxonomy, host configuration, and the parallel
//! work dispatcher with its shared-memory arbitration.

mod context;
mod element;
mod error;
mod parallel;
pub mod shared;

pub use {
    context::{Context, ContextBuilder, FilenameGenerator, LockKey},
    element::Element,
    error::{Error, Result},
    parallel::{ParallelRunnable, ParallelRunner, MIN_BATCH_SIZE},
    shared::{lock as shared_memory_lock, SharedLockGuard},
};
