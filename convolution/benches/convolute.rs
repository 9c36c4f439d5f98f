use {
    apmul_convolution::{convolute, Context, DataStorage, Element, Kernel, LongKernel},
    apmul_storage::AccessMode,
    criterion::{criterion_group, criterion_main, BenchmarkId, Criterion},
    rand::{rngs::StdRng, Rng, SeedableRng},
};

fn digits(ctx: &Context, len: usize, seed: u64) -> DataStorage<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let storage =
        DataStorage::<u64>::new(ctx, len as u64 * <LongKernel as Kernel>::Elem::BYTES).unwrap();
    let mut access = storage.get_array(AccessMode::Write, 0, len as u64).unwrap();
    for slot in access.as_mut_slice() {
        *slot = rng.gen_range(0..ctx.base);
    }
    access.close().unwrap();
    storage
}

fn bench_convolute(c: &mut Criterion) {
    let ctx = Context::builder()
        .base(1_000_000_000_000_000_000)
        .build()
        .unwrap();
    let mut group = c.benchmark_group("convolute");
    for size in [1usize << 10, 1 << 14, 1 << 17] {
        let x = digits(&ctx, size, 1);
        let y = digits(&ctx, size, 2);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| convolute::<LongKernel>(&ctx, &x, &y, 2 * size as u64).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_convolute);
criterion_main!(benches);
