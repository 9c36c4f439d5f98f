//! Number-theoretic transform engine: modular kernels over three primes
//! per element representation, the in-cache table FNT, the in-memory
//! six-step and out-of-core two-pass algorithms, and the factor-3 overlay
//! extending each regime from `2^k` to `3·2^k`.

mod factor3;
mod kernel;
mod rows;
mod six_step;
mod strategy;
pub mod table;
mod two_pass;

pub use {
    factor3::Factor3Strategy,
    kernel::{check_transform_length, IntKernel, Kernel, LongKernel},
    six_step::SixStepFntStrategy,
    strategy::{create_ntt, round_up_length, transform_length, NttStrategy},
    table::TableFntStrategy,
    two_pass::TwoPassFntStrategy,
};
