//! End-to-end convolution scenarios: schoolbook cross-checks across all
//! transform regimes, the concrete digit scenarios, strategy parity, and
//! shared-memory serialization.

use {
    apmul_common::{Context, Element},
    apmul_convolution::{autoconvolute, convolute, DataStorage, IntKernel, Kernel, LongKernel},
    apmul_storage::AccessMode,
    proptest::prelude::*,
    rand::{rngs::StdRng, Rng, SeedableRng},
    std::{sync::Arc, thread},
    test_case::test_case,
};

fn context(base: u64) -> Context {
    Context::builder().base(base).num_workers(2).build().unwrap()
}

/// Tiny thresholds: disk storages, two-pass transforms, block paging.
fn out_of_core_context(base: u64) -> Context {
    Context::builder()
        .base(base)
        .memory_threshold(0)
        .max_memory_block_size(1 << 11)
        .block_size(256)
        .shared_memory_threshold(1 << 10)
        .num_workers(2)
        .build()
        .unwrap()
}

fn digits<K: Kernel>(ctx: &Context, values: &[u64]) -> DataStorage<K::Elem> {
    let storage =
        DataStorage::<K::Elem>::new(ctx, values.len() as u64 * K::Elem::BYTES).unwrap();
    let mut access = storage
        .get_array(AccessMode::Write, 0, values.len() as u64)
        .unwrap();
    for (slot, &value) in access.as_mut_slice().iter_mut().zip(values) {
        *slot = K::Elem::from_u64(value).unwrap();
    }
    access.close().unwrap();
    storage
}

fn contents<K: Kernel>(storage: &DataStorage<K::Elem>) -> Vec<u64> {
    let access = storage
        .get_array(AccessMode::Read, 0, storage.len())
        .unwrap();
    let out = access.as_slice().iter().map(|v| v.to_u64()).collect();
    access.close().unwrap();
    out
}

/// Reference product: full `|x|+|y|` digits, most significant first.
fn schoolbook(x: &[u64], y: &[u64], base: u64) -> Vec<u64> {
    let mut coefficients = vec![0u128; x.len() + y.len() - 1];
    for (i, &a) in x.iter().enumerate() {
        for (j, &b) in y.iter().enumerate() {
            coefficients[i + j] += u128::from(a) * u128::from(b);
        }
    }
    let mut out = vec![0u64; x.len() + y.len()];
    let mut carry = 0u128;
    for (k, &coefficient) in coefficients.iter().enumerate().rev() {
        let value = coefficient + carry;
        out[k + 1] = (value % u128::from(base)) as u64;
        carry = value / u128::from(base);
    }
    out[0] = carry as u64;
    out
}

fn random_digits(len: usize, base: u64, seed: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(0..base)).collect()
}

#[test]
fn scenario_s1_shift_by_one() {
    let ctx = context(10);
    let x = digits::<LongKernel>(&ctx, &[9, 9, 9, 9, 9, 9, 9, 9]);
    let y = digits::<LongKernel>(&ctx, &[1]);
    let result = convolute::<LongKernel>(&ctx, &x, &y, 9).unwrap();
    assert_eq!(contents::<LongKernel>(&result), [0, 9, 9, 9, 9, 9, 9, 9, 9]);
}

#[test]
fn scenario_s2_autoconvolution_squares_12345() {
    let ctx = context(10);
    let x = digits::<LongKernel>(&ctx, &[1, 2, 3, 4, 5]);
    // 12345^2 = 152_399_025
    let result = autoconvolute::<LongKernel>(&ctx, &x, 9).unwrap();
    assert_eq!(contents::<LongKernel>(&result), [1, 5, 2, 3, 9, 9, 0, 2, 5]);
    // The full ten positions carry a zero-valued leading digit.
    let full = autoconvolute::<LongKernel>(&ctx, &x, 10).unwrap();
    assert_eq!(
        contents::<LongKernel>(&full),
        [0, 1, 5, 2, 3, 9, 9, 0, 2, 5]
    );
}

// Sizes straddle the rounding classes: 2^k, 3·2^k (the factor-3 overlay,
// scenario S3) and the mailbox-parallel CRT.
#[test_case(1, 1)]
#[test_case(2, 1)]
#[test_case(8, 1)]
#[test_case(5, 5)]
#[test_case(16, 17)]
#[test_case(50, 45)]
#[test_case(100, 93)]
#[test_case(384, 383)]
#[test_case(1000, 1000)]
fn matches_schoolbook(x_len: usize, y_len: usize) {
    let base = 10;
    let ctx = context(base);
    let x_digits = random_digits(x_len, base, x_len as u64);
    let y_digits = random_digits(y_len, base, y_len as u64 + 1000);
    let expected = schoolbook(&x_digits, &y_digits, base);
    let x = digits::<LongKernel>(&ctx, &x_digits);
    let y = digits::<LongKernel>(&ctx, &y_digits);
    let full = (x_len + y_len) as u64;
    let result = convolute::<LongKernel>(&ctx, &x, &y, full).unwrap();
    assert_eq!(contents::<LongKernel>(&result), expected);
}

#[test]
fn matches_schoolbook_with_a_large_base() {
    let base = 1_000_000_000_000_000_000; // 10^18 per element
    let ctx = context(base);
    let x_digits = random_digits(40, base, 7);
    let y_digits = random_digits(33, base, 8);
    let expected = schoolbook(&x_digits, &y_digits, base);
    let x = digits::<LongKernel>(&ctx, &x_digits);
    let y = digits::<LongKernel>(&ctx, &y_digits);
    let result = convolute::<LongKernel>(&ctx, &x, &y, 73).unwrap();
    assert_eq!(contents::<LongKernel>(&result), expected);
}

#[test]
fn int_kernel_matches_schoolbook() {
    let base = 10_000; // four decimal digits per 32-bit element
    let ctx = context(base);
    let x_digits = random_digits(120, base, 9);
    let y_digits = random_digits(77, base, 10);
    let expected = schoolbook(&x_digits, &y_digits, base);
    let x = digits::<IntKernel>(&ctx, &x_digits);
    let y = digits::<IntKernel>(&ctx, &y_digits);
    let result = convolute::<IntKernel>(&ctx, &x, &y, 197).unwrap();
    assert_eq!(contents::<IntKernel>(&result), expected);
}

#[test]
fn commutes_and_truncates() {
    let base = 10;
    let ctx = context(base);
    let x_digits = random_digits(23, base, 11);
    let y_digits = random_digits(40, base, 12);
    let x = digits::<LongKernel>(&ctx, &x_digits);
    let y = digits::<LongKernel>(&ctx, &y_digits);
    let expected = schoolbook(&x_digits, &y_digits, base);
    for result_size in [63u64, 62, 40, 10] {
        let xy = convolute::<LongKernel>(&ctx, &x, &y, result_size).unwrap();
        let yx = convolute::<LongKernel>(&ctx, &y, &x, result_size).unwrap();
        let tail = &expected[63 - result_size as usize..];
        assert_eq!(contents::<LongKernel>(&xy), tail, "r={result_size}");
        assert_eq!(contents::<LongKernel>(&xy), contents::<LongKernel>(&yx));
    }
}

#[test]
fn autoconvolution_equals_general_convolution() {
    let base = 10;
    let ctx = context(base);
    let x_digits = random_digits(150, base, 13);
    let x = digits::<LongKernel>(&ctx, &x_digits);
    let copy = digits::<LongKernel>(&ctx, &x_digits);
    let auto = autoconvolute::<LongKernel>(&ctx, &x, 300).unwrap();
    let general = convolute::<LongKernel>(&ctx, &x, &copy, 300).unwrap();
    assert_eq!(contents::<LongKernel>(&auto), contents::<LongKernel>(&general));
    // Passing the same storage twice takes the autoconvolution path.
    let same = convolute::<LongKernel>(&ctx, &x, &x, 300).unwrap();
    assert_eq!(contents::<LongKernel>(&auto), contents::<LongKernel>(&same));
}

/// Scenario S5: an out-of-core two-pass run must agree bit for bit with an
/// in-memory six-step run of the same product.
#[test]
fn two_pass_and_six_step_agree() {
    let base = 10;
    let x_digits = random_digits(700, base, 14);
    let y_digits = random_digits(600, base, 15);

    // A small L1 figure pushes the in-memory run onto the six-step path.
    let memory_ctx = Context::builder()
        .base(base)
        .cache_l1_size(512)
        .num_workers(2)
        .build()
        .unwrap();
    let disk_ctx = out_of_core_context(base);

    let x_mem = digits::<LongKernel>(&memory_ctx, &x_digits);
    let y_mem = digits::<LongKernel>(&memory_ctx, &y_digits);
    let in_memory =
        convolute::<LongKernel>(&memory_ctx, &x_mem, &y_mem, 1300).unwrap();

    let x_disk = digits::<LongKernel>(&disk_ctx, &x_digits);
    let y_disk = digits::<LongKernel>(&disk_ctx, &y_digits);
    assert!(x_disk.is_disk_backed());
    let out_of_core =
        convolute::<LongKernel>(&disk_ctx, &x_disk, &y_disk, 1300).unwrap();

    assert_eq!(
        contents::<LongKernel>(&in_memory),
        contents::<LongKernel>(&out_of_core)
    );
    assert_eq!(
        contents::<LongKernel>(&in_memory),
        schoolbook(&x_digits, &y_digits, base)
    );
}

/// Scenario S6: two concurrent convolutions above the shared-memory
/// threshold serialize on the context's sentinel and both come out right.
#[test]
fn concurrent_convolutions_share_the_lock() {
    let base = 10;
    let ctx = Arc::new(out_of_core_context(base));
    let mut handles = Vec::new();
    for seed in 0..2u64 {
        let ctx = Arc::clone(&ctx);
        handles.push(thread::spawn(move || {
            let x_digits = random_digits(500, base, seed * 2 + 20);
            let y_digits = random_digits(450, base, seed * 2 + 21);
            let expected = schoolbook(&x_digits, &y_digits, base);
            let x = digits::<LongKernel>(&ctx, &x_digits);
            let y = digits::<LongKernel>(&ctx, &y_digits);
            let result = convolute::<LongKernel>(&ctx, &x, &y, 950).unwrap();
            assert_eq!(contents::<LongKernel>(&result), expected);
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn inputs_are_left_untouched() {
    let base = 10;
    let ctx = context(base);
    let x_digits = random_digits(60, base, 30);
    let y_digits = random_digits(60, base, 31);
    let x = digits::<LongKernel>(&ctx, &x_digits);
    let y = digits::<LongKernel>(&ctx, &y_digits);
    convolute::<LongKernel>(&ctx, &x, &y, 120).unwrap();
    assert_eq!(contents::<LongKernel>(&x), x_digits);
    assert_eq!(contents::<LongKernel>(&y), y_digits);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]
    #[test]
    fn random_products_match_schoolbook(
        base in prop_oneof![Just(2u64), Just(10), Just(1u64 << 16)],
        x in proptest::collection::vec(proptest::num::u64::ANY, 1..48),
        y in proptest::collection::vec(proptest::num::u64::ANY, 1..48),
    ) {
        let ctx = context(base);
        let x: Vec<u64> = x.into_iter().map(|v| v % base).collect();
        let y: Vec<u64> = y.into_iter().map(|v| v % base).collect();
        let expected = schoolbook(&x, &y, base);
        let xs = digits::<LongKernel>(&ctx, &x);
        let ys = digits::<LongKernel>(&ctx, &y);
        let full = (x.len() + y.len()) as u64;
        let result = convolute::<LongKernel>(&ctx, &xs, &ys, full).unwrap();
        prop_assert_eq!(contents::<LongKernel>(&result), expected);
    }
}

#[test]
fn oversized_result_request_is_rejected() {
    let ctx = context(10);
    let x = digits::<LongKernel>(&ctx, &[1, 2, 3]);
    let y = digits::<LongKernel>(&ctx, &[4, 5]);
    assert!(convolute::<LongKernel>(&ctx, &x, &y, 6).is_err());
    assert!(convolute::<LongKernel>(&ctx, &x, &y, 0).is_err());
}
