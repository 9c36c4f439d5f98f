use {
    crate::{
        crt::carry_crt,
        words::{ge3, mul_2x1},
    },
    apmul_common::{
        shared_memory_lock, Context, Element, Error, ParallelRunnable, ParallelRunner, Result,
        SharedLockGuard,
    },
    apmul_ntt::{create_ntt, transform_length, Kernel},
    apmul_storage::{AccessMode, DataStorage},
    std::sync::atomic::AtomicUsize,
    tracing::{debug, instrument},
};

/// Multiplies the radix-`base` digit sequences `x` and `y` (most
/// significant digit first), returning the `result_size` least significant
/// digit positions of the `|x|+|y|`-position product.
///
/// The inputs are never modified. Handing the same storage (or two views
/// of one backing) for both operands takes the single-transform
/// autoconvolution path.
#[instrument(skip(ctx, x, y), fields(x_len = x.len(), y_len = y.len(), result_size))]
pub fn convolute<K: Kernel>(
    ctx: &Context,
    x: &DataStorage<K::Elem>,
    y: &DataStorage<K::Elem>,
    result_size: u64,
) -> Result<DataStorage<K::Elem>> {
    if DataStorage::same_sequence(x, y) {
        convolve_impl::<K>(ctx, x, None, result_size)
    } else {
        convolve_impl::<K>(ctx, x, Some(y), result_size)
    }
}

/// Squares `x`; equivalent to `convolute(ctx, x, x, result_size)` with a
/// single forward transform per modulus.
#[instrument(skip(ctx, x), fields(x_len = x.len(), result_size))]
pub fn autoconvolute<K: Kernel>(
    ctx: &Context,
    x: &DataStorage<K::Elem>,
    result_size: u64,
) -> Result<DataStorage<K::Elem>> {
    convolve_impl::<K>(ctx, x, None, result_size)
}

fn convolve_impl<K: Kernel>(
    ctx: &Context,
    x: &DataStorage<K::Elem>,
    y: Option<&DataStorage<K::Elem>>,
    result_size: u64,
) -> Result<DataStorage<K::Elem>> {
    let x_len = x.len();
    let y_len = y.map_or(x_len, DataStorage::len);
    if x_len == 0 || y_len == 0 {
        return Err(Error::Internal("convolution of an empty sequence"));
    }
    let full_size = x_len + y_len;
    if result_size == 0 || result_size > full_size {
        return Err(Error::Internal("result size exceeds the product size"));
    }
    let length = transform_length::<K>(full_size)?;
    check_crt_capacity::<K>(ctx.base, length)?;
    debug!(length, full_size, "transform length chosen");

    // Gate the whole pipeline when its working set crosses the threshold.
    let guard: Option<SharedLockGuard> = if length * K::Elem::BYTES > ctx.shared_memory_threshold
    {
        Some(shared_memory_lock(ctx.shared_memory_lock(), ctx.num_workers)?)
    } else {
        None
    };
    let donated: Option<&AtomicUsize> = guard.as_ref().map(SharedLockGuard::donated);

    let strategy = create_ntt::<K>(ctx, length)?;
    let mut residues: Vec<DataStorage<K::Elem>> = Vec::with_capacity(3);
    for modulus in 0..3 {
        let mut product = DataStorage::new_cached(ctx, length * K::Elem::BYTES)?;
        product.copy_from(ctx, x, length)?;
        strategy.forward(ctx, &mut product, modulus)?;
        match y {
            Some(y) => {
                let mut other = DataStorage::new_cached(ctx, length * K::Elem::BYTES)?;
                other.copy_from(ctx, y, length)?;
                strategy.forward(ctx, &mut other, modulus)?;
                pointwise::<K>(ctx, &mut product, Some(&other), modulus, donated)?;
            }
            None => pointwise::<K>(ctx, &mut product, None, modulus, donated)?,
        }
        strategy.inverse(ctx, &mut product, modulus, length)?;
        // The first two residues go at rest (possibly to disk); the third
        // stays cached and streams straight into the CRT.
        let product = if modulus < 2 {
            DataStorage::promote(ctx, product)?
        } else {
            product
        };
        residues.push(product);
    }
    carry_crt::<K>(
        ctx,
        [&residues[0], &residues[1], &residues[2]],
        full_size,
        result_size,
        donated,
    )
}

/// Elementwise product (or square) of transformed residues.
struct PointwisePass<K: Kernel> {
    kernel: K,
    dst:    *mut K::Elem,
    /// `None` squares the destination in place.
    src:    Option<*const K::Elem>,
    length: u64,
}

// SAFETY: strides partition the index range; `src` is only read.
unsafe impl<K: Kernel> Send for PointwisePass<K> {}
unsafe impl<K: Kernel> Sync for PointwisePass<K> {}

impl<K: Kernel> ParallelRunnable for PointwisePass<K> {
    fn length(&self) -> u64 {
        self.length
    }

    fn run_stride(&self, start: u64, length: u64) -> Result<()> {
        let kernel = &self.kernel;
        for index in start as usize..(start + length) as usize {
            // SAFETY: strides are disjoint and in bounds.
            unsafe {
                let dst = self.dst.add(index);
                let other = match self.src {
                    Some(src) => *src.add(index),
                    None => *dst,
                };
                *dst = kernel.mul(*dst, other);
            }
        }
        Ok(())
    }
}

/// Pointwise multiply `a` by `b` (or square `a` when `b` is `None`);
/// parallel across the index range when both sides are random-access,
/// block-buffered otherwise.
fn pointwise<K: Kernel>(
    ctx: &Context,
    a: &mut DataStorage<K::Elem>,
    b: Option<&DataStorage<K::Elem>>,
    modulus: usize,
    donated: Option<&AtomicUsize>,
) -> Result<()> {
    let kernel = K::for_modulus(modulus);
    let length = a.len();
    let random_access = !a.is_disk_backed() && b.is_none_or(|b| !b.is_disk_backed());
    if random_access {
        let mut dst = a.get_array(AccessMode::ReadWrite, 0, length)?;
        let src = match b {
            Some(b) => Some(b.get_array(AccessMode::Read, 0, length)?),
            None => None,
        };
        let task = PointwisePass {
            kernel,
            dst: dst.as_mut_slice().as_mut_ptr(),
            src: src.as_ref().map(|access| access.as_slice().as_ptr()),
            length,
        };
        ParallelRunner::new(ctx).run_with_donations(&task, donated)?;
        if let Some(src) = src {
            src.close()?;
        }
        dst.close()
    } else {
        let block = (ctx.block_size / K::Elem::BYTES).max(1);
        let mut position = 0;
        while position < length {
            let len = block.min(length - position);
            let mut dst = a.get_array(AccessMode::ReadWrite, position, len)?;
            match b {
                Some(b) => {
                    let src = b.get_array(AccessMode::Read, position, len)?;
                    for (value, &other) in
                        dst.as_mut_slice().iter_mut().zip(src.as_slice())
                    {
                        *value = kernel.mul(*value, other);
                    }
                    src.close()?;
                }
                None => {
                    for value in dst.as_mut_slice().iter_mut() {
                        *value = kernel.mul(*value, *value);
                    }
                }
            }
            dst.close()?;
            position += len;
        }
        Ok(())
    }
}

/// `L·(base−1)²` must stay below M012 or the CRT reconstruction would
/// alias; checked before anything is allocated.
fn check_crt_capacity<K: Kernel>(base: u64, length: u64) -> Result<()> {
    let smallest_modulus = K::MODULI[2].to_u64();
    if base < 2 || base > smallest_modulus {
        return Err(Error::Arithmetic("digit base out of range for the moduli"));
    }
    if crt_fits::<K>(base, length) {
        return Ok(());
    }
    Err(Error::TransformLengthExceeded {
        requested: length,
        maximum:   crt_max_length::<K>(base),
    })
}

fn crt_fits<K: Kernel>(base: u64, length: u64) -> bool {
    let top = match K::Elem::from_u64(base - 1) {
        Some(top) => top,
        None => return false,
    };
    let Some(len) = K::Elem::from_u64(length) else {
        return false;
    };
    let (lo, hi) = top.wide_mul(top);
    let bound = mul_2x1([lo, hi], len);
    !ge3(bound, K::M012)
}

/// Largest supported length for this base, for the error message.
fn crt_max_length<K: Kernel>(base: u64) -> u64 {
    let max_shift = K::MAX_POWER_OF_TWO_LENGTH.trailing_zeros();
    for shift in (0..=max_shift).rev() {
        for candidate in [3u64 << shift, 1u64 << shift] {
            if candidate <= 3 * K::MAX_POWER_OF_TWO_LENGTH && crt_fits::<K>(base, candidate) {
                return candidate;
            }
        }
    }
    0
}
