//! Data-storage layer: uniform random access, iterators and transposed
//! views over element sequences backed by memory arrays or scratch files,
//! sized by the configured memory thresholds.

mod access;
mod disk;
mod iter;
mod memory;
mod scratch;
mod storage;
pub mod transpose;
mod transposed;

pub use {
    access::{AccessMode, ArrayAccess},
    iter::StorageIterator,
    scratch::{clean_up, gc, live_scratch_files},
    storage::DataStorage,
    transpose::{transpose, TransposeTune},
    transposed::TransposedArray,
};
