//! Cache-blocked in-place transpose for square and 1:2 / 2:1 rectangular
//! matrices with power-of-two sides.

use {apmul_common::{Context, Element}, std::mem};

/// Cache geometry steering the transpose kernels.
#[derive(Clone, Copy, Debug)]
pub struct TransposeTune {
    pub l1_bytes:    u64,
    pub l2_bytes:    u64,
    pub burst_bytes: u64,
}

impl TransposeTune {
    pub fn from_context(ctx: &Context) -> Self {
        Self {
            l1_bytes:    ctx.cache_l1_size,
            l2_bytes:    ctx.cache_l2_size,
            burst_bytes: ctx.cache_burst,
        }
    }
}

fn prev_power_of_two(value: usize) -> usize {
    debug_assert!(value > 0);
    1 << (usize::BITS - 1 - value.leading_zeros())
}

/// Side of a square tile that keeps two tiles L1-resident.
pub(crate) fn l1_tile_side<T>(l1_bytes: u64) -> usize {
    let l1_elems = (l1_bytes as usize / mem::size_of::<T>()).max(1);
    prev_power_of_two(l1_elems.isqrt().max(1))
}

/// Transposes the `n1 × n2` row-major matrix in `data` in place.
///
/// `n1` and `n2` must be powers of two with `n1 == n2`, `n1 == 2·n2` or
/// `n2 == 2·n1`; other shapes are a caller bug.
pub fn transpose<T: Element>(data: &mut [T], n1: usize, n2: usize, tune: &TransposeTune) {
    assert!(n1.is_power_of_two() && n2.is_power_of_two());
    assert_eq!(data.len(), n1 * n2);
    if n1 == n2 {
        transpose_square(data, n1, n1, tune);
    } else if n2 == 2 * n1 {
        transpose_wide(data, n1, tune);
    } else if n1 == 2 * n2 {
        transpose_tall(data, n2, tune);
    } else {
        panic!("unsupported transpose shape {n1}x{n2}");
    }
}

/// In-place transpose of an `n × n` square whose rows are `stride` elements
/// apart, picking the regime from the cache geometry.
fn transpose_square<T: Element>(data: &mut [T], n: usize, stride: usize, tune: &TransposeTune) {
    let elem = mem::size_of::<T>();
    let l1_side = l1_tile_side::<T>(tune.l1_bytes);
    if n <= l1_side {
        transpose_square_direct(data, n, stride);
    } else if n * n <= (tune.l2_bytes as usize / elem).max(1) {
        let tile = prev_power_of_two((tune.burst_bytes as usize / elem).max(1)).clamp(1, n);
        transpose_square_tiled(data, n, stride, tile);
    } else {
        transpose_square_staged(data, n, stride, l1_side.clamp(1, n));
    }
}

fn transpose_square_direct<T: Element>(data: &mut [T], n: usize, stride: usize) {
    for i in 0..n {
        for j in (i + 1)..n {
            data.swap(i * stride + j, j * stride + i);
        }
    }
}

/// L2-resident regime: swap burst-sized tiles pairwise.
fn transpose_square_tiled<T: Element>(data: &mut [T], n: usize, stride: usize, tile: usize) {
    for bi in (0..n).step_by(tile) {
        for i in bi..bi + tile {
            for j in (i + 1)..bi + tile {
                data.swap(i * stride + j, j * stride + i);
            }
        }
        for bj in (bi + tile..n).step_by(tile) {
            for i in bi..bi + tile {
                for j in bj..bj + tile {
                    data.swap(i * stride + j, j * stride + i);
                }
            }
        }
    }
}

/// Out-of-L2 regime: stage two `b × b` tiles to scratch, transpose each,
/// write them back swapped.
fn transpose_square_staged<T: Element>(data: &mut [T], n: usize, stride: usize, b: usize) {
    let mut first = vec![T::default(); b * b];
    let mut second = vec![T::default(); b * b];
    for bi in (0..n).step_by(b) {
        load_tile(data, stride, bi, bi, b, &mut first);
        transpose_square_direct(&mut first, b, b);
        store_tile(data, stride, bi, bi, b, &first);
        for bj in (bi + b..n).step_by(b) {
            load_tile(data, stride, bi, bj, b, &mut first);
            load_tile(data, stride, bj, bi, b, &mut second);
            transpose_square_direct(&mut first, b, b);
            transpose_square_direct(&mut second, b, b);
            store_tile(data, stride, bi, bj, b, &second);
            store_tile(data, stride, bj, bi, b, &first);
        }
    }
}

fn load_tile<T: Element>(
    data: &[T],
    stride: usize,
    bi: usize,
    bj: usize,
    b: usize,
    scratch: &mut [T],
) {
    for r in 0..b {
        let row = (bi + r) * stride + bj;
        scratch[r * b..(r + 1) * b].copy_from_slice(&data[row..row + b]);
    }
}

fn store_tile<T: Element>(
    data: &mut [T],
    stride: usize,
    bi: usize,
    bj: usize,
    b: usize,
    scratch: &[T],
) {
    for r in 0..b {
        let row = (bi + r) * stride + bj;
        data[row..row + b].copy_from_slice(&scratch[r * b..(r + 1) * b]);
    }
}

/// `m × 2m` → `2m × m`: transpose the two `m × m` half-squares in place
/// (row stride 2m), then separate the interleaved half-rows.
fn transpose_wide<T: Element>(data: &mut [T], m: usize, tune: &TransposeTune) {
    transpose_square(data, m, 2 * m, tune);
    transpose_square(&mut data[m..], m, 2 * m, tune);
    permute_half_rows(data, m, |j, n| (2 * j) % (n - 1));
}

/// `2m × m` → `m × 2m`: the exact inverse of [`transpose_wide`]; the row
/// permutation uses the inverse trail `j ↦ m·j mod (n−1)`.
fn transpose_tall<T: Element>(data: &mut [T], m: usize, tune: &TransposeTune) {
    permute_half_rows(data, m, |j, n| (m * j) % (n - 1));
    transpose_square(data, m, 2 * m, tune);
    transpose_square(&mut data[m..], m, 2 * m, tune);
}

/// Applies `target[j] = source[map(j, n)]` to the `n` half-rows of length
/// `m`, walking each cyclic trail with a one-row scratch buffer. Rows 0 and
/// n−1 are fixed points of both maps.
fn permute_half_rows<T: Element>(data: &mut [T], m: usize, map: impl Fn(usize, usize) -> usize) {
    let n = data.len() / m;
    if n < 3 || m == 0 {
        return;
    }
    let mut visited = vec![false; n];
    visited[0] = true;
    visited[n - 1] = true;
    let mut scratch = vec![T::default(); m];
    for start in 1..n - 1 {
        if visited[start] {
            continue;
        }
        scratch.copy_from_slice(&data[start * m..(start + 1) * m]);
        let mut j = start;
        loop {
            visited[j] = true;
            let src = map(j, n);
            if src == start {
                data[j * m..(j + 1) * m].copy_from_slice(&scratch);
                break;
            }
            data.copy_within(src * m..(src + 1) * m, j * m);
            j = src;
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, proptest::prelude::*, test_case::test_case};

    fn naive<T: Element>(data: &[T], rows: usize, cols: usize) -> Vec<T> {
        let mut out = vec![T::default(); data.len()];
        for r in 0..rows {
            for c in 0..cols {
                out[c * rows + r] = data[r * cols + c];
            }
        }
        out
    }

    fn tiny_tune() -> TransposeTune {
        // Forces the staged regime even on small matrices.
        TransposeTune {
            l1_bytes:    64,
            l2_bytes:    128,
            burst_bytes: 16,
        }
    }

    fn big_tune() -> TransposeTune {
        TransposeTune {
            l1_bytes:    1 << 15,
            l2_bytes:    1 << 22,
            burst_bytes: 256,
        }
    }

    #[test_case(1, 1)]
    #[test_case(1, 2)]
    #[test_case(2, 1)]
    #[test_case(4, 4)]
    #[test_case(4, 8)]
    #[test_case(8, 4)]
    #[test_case(16, 16)]
    #[test_case(16, 32)]
    #[test_case(32, 16)]
    #[test_case(64, 64)]
    fn matches_naive(n1: usize, n2: usize) {
        let data: Vec<u64> = (0..(n1 * n2) as u64).collect();
        for tune in [tiny_tune(), big_tune()] {
            let mut work = data.clone();
            transpose(&mut work, n1, n2, &tune);
            assert_eq!(work, naive(&data, n1, n2), "shape {n1}x{n2}");
        }
    }

    proptest! {
        #[test]
        fn involution(k in 0usize..6, wide in proptest::bool::ANY, seed in proptest::num::u64::ANY) {
            let n1 = 1usize << k;
            let n2 = if wide { n1 * 2 } else { n1 };
            let data: Vec<u64> = (0..(n1 * n2) as u64).map(|i| i.wrapping_mul(seed | 1)).collect();
            let mut work = data.clone();
            transpose(&mut work, n1, n2, &big_tune());
            transpose(&mut work, n2, n1, &big_tune());
            prop_assert_eq!(work, data);
        }
    }

    #[test]
    fn all_regimes_agree() {
        let n = 32usize;
        let data: Vec<u32> = (0..(n * n) as u32).collect();
        let mut direct = data.clone();
        transpose_square_direct(&mut direct, n, n);
        let mut tiled = data.clone();
        transpose_square_tiled(&mut tiled, n, n, 8);
        let mut staged = data.clone();
        transpose_square_staged(&mut staged, n, n, 4);
        assert_eq!(direct, tiled);
        assert_eq!(direct, staged);
    }
}
