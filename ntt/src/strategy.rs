use {
    crate::{
        factor3::Factor3Strategy,
        kernel::{check_transform_length, Kernel},
        six_step::SixStepFntStrategy,
        table::TableFntStrategy,
        two_pass::TwoPassFntStrategy,
    },
    apmul_common::{Context, Element, Result},
    apmul_storage::DataStorage,
    tracing::debug,
};

/// One transform regime. Strategies are stateless; the same value serves
/// all three moduli of a convolution.
pub trait NttStrategy<K: Kernel>: Send + Sync {
    fn forward(
        &self,
        ctx: &Context,
        data: &mut DataStorage<K::Elem>,
        modulus: usize,
    ) -> Result<()>;

    /// Inverse transform normalizing by `total`: the data length, or the
    /// full wrapped length under the factor-3 overlay.
    fn inverse(
        &self,
        ctx: &Context,
        data: &mut DataStorage<K::Elem>,
        modulus: usize,
        total: u64,
    ) -> Result<()>;
}

/// Smallest `2^k` or `3·2^k` that is at least `size`.
pub fn round_up_length(size: u64) -> u64 {
    let size = size.max(1);
    let power2 = size.next_power_of_two();
    if power2 >= 4 && 3 * (power2 / 4) >= size {
        3 * (power2 / 4)
    } else {
        power2
    }
}

/// The transform length the engine would use for `size` elements, after
/// validating it against the kernel's moduli.
pub fn transform_length<K: Kernel>(size: u64) -> Result<u64> {
    let length = round_up_length(size);
    check_transform_length::<K>(length)?;
    Ok(length)
}

/// Picks the transform for a requested element count: the table FNT while
/// the power-of-two part stays L1-resident, the six-step while it fits one
/// memory block (and a 32-bit index), the two-pass beyond that; a factor-3
/// overlay wraps the choice when the rounded length carries the 3.
pub fn create_ntt<K: Kernel>(ctx: &Context, size: u64) -> Result<Box<dyn NttStrategy<K>>> {
    let length = transform_length::<K>(size)?;
    let use_factor3 = !length.is_power_of_two();
    // Thresholds compare the power-of-two part of the rounded length.
    let power2 = if use_factor3 { length / 3 } else { length };
    let elem = K::Elem::BYTES;
    let table = power2 <= ctx.cache_l1_size / (2 * elem);
    let six_step = !table
        && power2
            .checked_mul(elem)
            .is_some_and(|bytes| bytes <= ctx.max_memory_block_size)
        && power2 <= u64::from(u32::MAX);
    debug!(size, length, power2, use_factor3, table, six_step, "selected transform");
    let strategy: Box<dyn NttStrategy<K>> = match (table, six_step, use_factor3) {
        (true, _, false) => Box::new(TableFntStrategy::new()),
        (true, _, true) => Box::new(Factor3Strategy::new(TableFntStrategy::new())),
        (false, true, false) => Box::new(SixStepFntStrategy::new()),
        // The whole 3·2^k working set still fits in memory: factor-3 over
        // the in-memory six-step.
        (false, true, true) => Box::new(Factor3Strategy::new(SixStepFntStrategy::new())),
        (false, false, false) => Box::new(TwoPassFntStrategy::new()),
        (false, false, true) => Box::new(Factor3Strategy::new(TwoPassFntStrategy::new())),
    };
    Ok(strategy)
}
