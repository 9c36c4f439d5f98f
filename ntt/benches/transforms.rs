use {
    apmul_common::{Context, Element},
    apmul_ntt::{create_ntt, Kernel, LongKernel},
    apmul_storage::{AccessMode, DataStorage},
    criterion::{criterion_group, criterion_main, BenchmarkId, Criterion},
    rand::{rngs::StdRng, Rng, SeedableRng},
};

fn residues(ctx: &Context, n: u64, seed: u64) -> DataStorage<u64> {
    let kernel = LongKernel::for_modulus(0);
    let mut rng = StdRng::seed_from_u64(seed);
    let storage = DataStorage::<u64>::new(ctx, n * u64::BYTES).unwrap();
    let mut access = storage.get_array(AccessMode::Write, 0, n).unwrap();
    for slot in access.as_mut_slice() {
        *slot = rng.gen::<u64>() % kernel.modulus();
    }
    access.close().unwrap();
    storage
}

fn bench_forward(c: &mut Criterion) {
    let ctx = Context::builder().build().unwrap();
    let mut group = c.benchmark_group("forward");
    for log_n in [12u32, 16, 20] {
        let n = 1u64 << log_n;
        let strategy = create_ntt::<LongKernel>(&ctx, n).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut data = residues(&ctx, n, u64::from(log_n));
            b.iter(|| strategy.forward(&ctx, &mut data, 0).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_forward);
criterion_main!(benches);
