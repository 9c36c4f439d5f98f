use {
    crate::{kernel::Kernel, strategy::NttStrategy},
    apmul_common::{Context, Error, Result},
    apmul_storage::{AccessMode, DataStorage},
    std::marker::PhantomData,
};

/// Swap pairs realizing the bit-reversal scramble of length `n`.
pub fn scramble_pairs(n: usize) -> Vec<(u32, u32)> {
    debug_assert!(n.is_power_of_two());
    if n < 4 {
        return Vec::new();
    }
    let bits = n.trailing_zeros();
    let mut pairs = Vec::new();
    for i in 0..n {
        let reversed = (i as u64).reverse_bits() >> (64 - bits);
        let reversed = reversed as usize;
        if reversed > i {
            pairs.push((i as u32, reversed as u32));
        }
    }
    pairs
}

pub fn apply_scramble<T: Copy>(data: &mut [T], pairs: &[(u32, u32)]) {
    for &(a, b) in pairs {
        data.swap(a as usize, b as usize);
    }
}

/// Sande-Tukey decimation-in-frequency pass consuming `w_table[j] = w^j`.
/// Output is in bit-reversed order; apply the scramble afterwards for a
/// natural-order DFT.
pub fn forward_dif<K: Kernel>(kernel: &K, data: &mut [K::Elem], w_table: &[K::Elem]) {
    let n = data.len();
    debug_assert!(n.is_power_of_two());
    let mut size = n;
    while size > 1 {
        let half = size / 2;
        let step = n / size;
        for block in (0..n).step_by(size) {
            let mut twiddle = 0;
            for j in block..block + half {
                let a = data[j];
                let b = data[j + half];
                data[j] = kernel.add(a, b);
                data[j + half] = kernel.mul(kernel.sub(a, b), w_table[twiddle]);
                twiddle += step;
            }
        }
        size = half;
    }
}

/// Cooley-Tukey decimation-in-time pass; consumes bit-reversed input
/// (apply the scramble first when the data are in natural order).
/// Normalization by 1/length is the caller's business.
pub fn inverse_dit<K: Kernel>(kernel: &K, data: &mut [K::Elem], inv_w_table: &[K::Elem]) {
    let n = data.len();
    debug_assert!(n.is_power_of_two());
    let mut size = 2;
    while size <= n {
        let half = size / 2;
        let step = n / size;
        for block in (0..n).step_by(size) {
            let mut twiddle = 0;
            for j in block..block + half {
                let a = data[j];
                let b = kernel.mul(data[j + half], inv_w_table[twiddle]);
                data[j] = kernel.add(a, b);
                data[j + half] = kernel.sub(a, b);
                twiddle += step;
            }
        }
        size *= 2;
    }
}

/// Natural-order DFT of one row: DIF plus the scramble.
pub fn forward_row<K: Kernel>(
    kernel: &K,
    data: &mut [K::Elem],
    w_table: &[K::Elem],
    scramble: &[(u32, u32)],
) {
    forward_dif(kernel, data, w_table);
    apply_scramble(data, scramble);
}

/// Natural-order unnormalized inverse DFT of one row: scramble, then DIT.
pub fn inverse_row<K: Kernel>(
    kernel: &K,
    data: &mut [K::Elem],
    inv_w_table: &[K::Elem],
    scramble: &[(u32, u32)],
) {
    apply_scramble(data, scramble);
    inverse_dit(kernel, data, inv_w_table);
}

/// In-cache transform for lengths fitting half the L1 cache: a single
/// array access, DIF forward and DIT inverse with matching element order,
/// normalization in the inverse. No permutation is needed inside a
/// convolution: the pointwise product is order-agnostic as long as forward
/// and inverse agree.
pub struct TableFntStrategy<K: Kernel>(PhantomData<K>);

impl<K: Kernel> TableFntStrategy<K> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<K: Kernel> Default for TableFntStrategy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> NttStrategy<K> for TableFntStrategy<K> {
    fn forward(
        &self,
        _ctx: &Context,
        data: &mut DataStorage<K::Elem>,
        modulus: usize,
    ) -> Result<()> {
        let n = data.len();
        if n < 2 {
            return Ok(());
        }
        if !n.is_power_of_two() {
            return Err(Error::Internal("table transform length is not a power of two"));
        }
        let kernel = K::for_modulus(modulus);
        let w = kernel.forward_nth_root(n)?;
        let w_table = kernel.create_w_table(w, n as usize);
        let mut access = data.get_array(AccessMode::ReadWrite, 0, n)?;
        forward_dif(&kernel, access.as_mut_slice(), &w_table);
        access.close()
    }

    fn inverse(
        &self,
        _ctx: &Context,
        data: &mut DataStorage<K::Elem>,
        modulus: usize,
        total: u64,
    ) -> Result<()> {
        let n = data.len();
        let kernel = K::for_modulus(modulus);
        let scale = kernel.inv(kernel.element(total))?;
        if n < 2 {
            if n == 1 {
                let mut access = data.get_array(AccessMode::ReadWrite, 0, 1)?;
                let slice = access.as_mut_slice();
                slice[0] = kernel.mul(slice[0], scale);
                access.close()?;
            }
            return Ok(());
        }
        if !n.is_power_of_two() {
            return Err(Error::Internal("table transform length is not a power of two"));
        }
        let iw = kernel.inverse_nth_root(n)?;
        let inv_w_table = kernel.create_w_table(iw, n as usize);
        let mut access = data.get_array(AccessMode::ReadWrite, 0, n)?;
        let slice = access.as_mut_slice();
        inverse_dit(&kernel, slice, &inv_w_table);
        for value in slice.iter_mut() {
            *value = kernel.mul(*value, scale);
        }
        access.close()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::kernel::{IntKernel, LongKernel},
        proptest::prelude::*,
        test_case::test_case,
    };

    /// Reference DFT straight from the definition.
    fn naive_dft<K: Kernel>(kernel: &K, data: &[K::Elem], w: K::Elem) -> Vec<K::Elem> {
        let n = data.len();
        (0..n)
            .map(|k| {
                let mut acc = kernel.element(0);
                for (t, &value) in data.iter().enumerate() {
                    let tw = kernel.pow(w, (t * k) as u64);
                    acc = kernel.add(acc, kernel.mul(value, tw));
                }
                acc
            })
            .collect()
    }

    #[test_case(4)]
    #[test_case(16)]
    #[test_case(64)]
    fn forward_row_matches_naive_dft(n: usize) {
        let kernel = LongKernel::for_modulus(0);
        let w = kernel.forward_nth_root(n as u64).unwrap();
        let data: Vec<u64> = (0..n as u64).map(|i| i * i + 1).collect();
        let expected = naive_dft(&kernel, &data, w);
        let mut work = data.clone();
        let table = kernel.create_w_table(w, n);
        let pairs = scramble_pairs(n);
        forward_row(&kernel, &mut work, &table, &pairs);
        assert_eq!(work, expected);
    }

    proptest! {
        #[test]
        fn dif_dit_round_trip(k in 1usize..10, seed in proptest::num::u64::ANY) {
            let n = 1usize << k;
            let kernel = LongKernel::for_modulus(1);
            let data: Vec<u64> = (0..n as u64).map(|i| {
                (u128::from(i.wrapping_mul(seed | 1)) % u128::from(kernel.modulus())) as u64
            }).collect();
            let w = kernel.forward_nth_root(n as u64).unwrap();
            let iw = kernel.inverse_nth_root(n as u64).unwrap();
            let table = kernel.create_w_table(w, n);
            let inv_table = kernel.create_w_table(iw, n);
            let mut work = data.clone();
            forward_dif(&kernel, &mut work, &table);
            inverse_dit(&kernel, &mut work, &inv_table);
            let scale = kernel.inv(kernel.element(n as u64)).unwrap();
            for value in work.iter_mut() {
                *value = kernel.mul(*value, scale);
            }
            prop_assert_eq!(work, data);
        }

        #[test]
        fn scramble_is_an_involution(k in 2usize..10) {
            let n = 1usize << k;
            let pairs = scramble_pairs(n);
            let data: Vec<u32> = (0..n as u32).collect();
            let mut work = data.clone();
            apply_scramble(&mut work, &pairs);
            assert_ne!(work, data);
            apply_scramble(&mut work, &pairs);
            assert_eq!(work, data);
        }
    }

    #[test]
    fn int_kernel_round_trips_too() {
        let kernel = IntKernel::for_modulus(2);
        let n = 32usize;
        let data: Vec<u32> = (0..n as u32).map(|i| i * 17 + 3).collect();
        let w = kernel.forward_nth_root(n as u64).unwrap();
        let iw = kernel.inverse_nth_root(n as u64).unwrap();
        let table = kernel.create_w_table(w, n);
        let inv_table = kernel.create_w_table(iw, n);
        let mut work = data.clone();
        forward_dif(&kernel, &mut work, &table);
        inverse_dit(&kernel, &mut work, &inv_table);
        let scale = kernel.inv(kernel.element(n as u64)).unwrap();
        for value in work.iter_mut() {
            *value = kernel.mul(*value, scale);
        }
        assert_eq!(work, data);
    }
}
