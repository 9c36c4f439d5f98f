//! Three-modulus convolution driver: forward NTTs over three prime
//! fields, pointwise multiplication, inverse transforms, and CRT
//! recombination with base-carry propagation. This crate is the public
//! face of the multiplication core.

mod crt;
mod driver;
mod words;

pub use {
    apmul_common::{
        Context, ContextBuilder, Element, Error, FilenameGenerator, LockKey, ParallelRunnable,
        ParallelRunner, Result,
    },
    apmul_ntt::{
        create_ntt, round_up_length, transform_length, IntKernel, Kernel, LongKernel, NttStrategy,
    },
    apmul_storage::{clean_up, gc, AccessMode, ArrayAccess, DataStorage, StorageIterator},
    driver::{autoconvolute, convolute},
};

/// At-rest storage sized in bytes; the backing follows the context's
/// memory thresholds.
pub fn create_data_storage<T: Element>(ctx: &Context, size_bytes: u64) -> Result<DataStorage<T>> {
    DataStorage::new(ctx, size_bytes)
}

/// Transient storage preferring memory up to the cached bound.
pub fn create_cached_data_storage<T: Element>(
    ctx: &Context,
    size_bytes: u64,
) -> Result<DataStorage<T>> {
    DataStorage::new_cached(ctx, size_bytes)
}
