use {
    apmul_common::{Context, Error},
    apmul_storage::{live_scratch_files, AccessMode, DataStorage},
    rand::{rngs::StdRng, Rng, SeedableRng},
};

fn memory_context() -> Context {
    Context::builder().num_workers(2).build().unwrap()
}

/// Every storage lands on disk; small blocks exercise the paging paths.
fn disk_context() -> Context {
    Context::builder()
        .memory_threshold(0)
        .block_size(256)
        .num_workers(2)
        .build()
        .unwrap()
}

fn fill(storage: &DataStorage<u64>, seed: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<u64> = (0..storage.len()).map(|_| rng.gen()).collect();
    let mut access = storage
        .get_array(AccessMode::Write, 0, storage.len())
        .unwrap();
    access.as_mut_slice().copy_from_slice(&values);
    access.close().unwrap();
    values
}

fn read_all(storage: &DataStorage<u64>) -> Vec<u64> {
    let access = storage
        .get_array(AccessMode::Read, 0, storage.len())
        .unwrap();
    let out = access.as_slice().to_vec();
    access.close().unwrap();
    out
}

#[test]
fn disk_round_trip_via_slabs_and_iterator() {
    let ctx = disk_context();
    let storage = DataStorage::<u64>::new(&ctx, 4096 * 8).unwrap();
    assert!(storage.is_disk_backed());
    let values = fill(&storage, 7);

    // Slab reconstruction.
    let mut slabs = Vec::new();
    let mut position = 0;
    while position < storage.len() {
        let len = 100.min(storage.len() - position);
        let access = storage.get_array(AccessMode::Read, position, len).unwrap();
        slabs.extend_from_slice(access.as_slice());
        access.close().unwrap();
        position += len;
    }
    assert_eq!(slabs, values);

    // Iterator reconstruction.
    let mut iterated = Vec::new();
    let mut cursor = storage.iterator(AccessMode::Read, 0, storage.len()).unwrap();
    while cursor.has_next() {
        iterated.push(cursor.get().unwrap());
        cursor.next().unwrap();
    }
    cursor.close().unwrap();
    assert_eq!(iterated, values);
}

// Scenario-scale variant of the disk round trip (2^20 elements).
#[test]
#[ignore = "large scratch file"]
fn disk_round_trip_large() {
    let ctx = disk_context();
    let storage = DataStorage::<u64>::new(&ctx, (1u64 << 20) * 8).unwrap();
    let values = fill(&storage, 11);
    assert_eq!(read_all(&storage), values);
}

#[test]
fn reverse_iterator_walks_backwards() {
    let ctx = disk_context();
    let storage = DataStorage::<u64>::new(&ctx, 600 * 8).unwrap();
    let values = fill(&storage, 13);
    let mut cursor = storage
        .reverse_iterator(AccessMode::Read, 100, 500)
        .unwrap();
    let mut seen = Vec::new();
    while cursor.has_next() {
        seen.push(cursor.get().unwrap());
        cursor.next().unwrap();
    }
    cursor.close().unwrap();
    let expected: Vec<u64> = values[100..500].iter().rev().copied().collect();
    assert_eq!(seen, expected);
}

#[test]
fn iterator_mode_misuse_is_an_error() {
    let ctx = memory_context();
    let storage = DataStorage::<u64>::new(&ctx, 16 * 8).unwrap();
    let mut read = storage.iterator(AccessMode::Read, 0, 16).unwrap();
    assert!(matches!(read.set(1), Err(Error::Internal(_))));
    drop(read);
    let mut write = storage.iterator(AccessMode::Write, 0, 16).unwrap();
    assert!(matches!(write.get(), Err(Error::Internal(_))));
    drop(write);

    let mut cursor = storage.iterator(AccessMode::Read, 0, 1).unwrap();
    cursor.next().unwrap();
    assert!(matches!(cursor.next(), Err(Error::Internal(_))));
}

#[test]
fn write_iterator_commits_pages() {
    let ctx = disk_context();
    let storage = DataStorage::<u64>::new(&ctx, 1000 * 8).unwrap();
    let mut cursor = storage
        .iterator(AccessMode::Write, 0, storage.len())
        .unwrap();
    for i in 0..storage.len() {
        cursor.set(i * 3).unwrap();
        cursor.next().unwrap();
    }
    cursor.close().unwrap();
    let expected: Vec<u64> = (0..storage.len()).map(|i| i * 3).collect();
    assert_eq!(read_all(&storage), expected);
}

#[test]
fn subsequence_shares_the_backing() {
    let ctx = memory_context();
    let mut storage = DataStorage::<u64>::new(&ctx, 100 * 8).unwrap();
    let view = storage.subsequence(10, 20).unwrap();
    assert!(view.is_view());
    assert!(DataStorage::same_backing(&storage, &view));

    // Writes through the root are visible through the view.
    let mut access = storage.get_array(AccessMode::Write, 15, 1).unwrap();
    access.as_mut_slice()[0] = 42;
    access.close().unwrap();
    let access = view.get_array(AccessMode::Read, 5, 1).unwrap();
    assert_eq!(access.as_slice()[0], 42);
    access.close().unwrap();

    // Views never resize the backing.
    let mut view = view;
    assert!(matches!(view.set_size(5), Err(Error::Internal(_))));
    storage.set_read_only();
    assert!(matches!(storage.set_size(5), Err(Error::Internal(_))));
    assert!(matches!(
        storage.get_array(AccessMode::Write, 0, 1),
        Err(Error::Internal(_))
    ));
}

#[test]
fn set_size_grows_with_zeros_and_truncates() {
    for ctx in [memory_context(), disk_context()] {
        let mut storage = DataStorage::<u64>::new(&ctx, 8 * 8).unwrap();
        fill(&storage, 17);
        storage.set_size(4).unwrap();
        storage.set_size(12).unwrap();
        let data = read_all(&storage);
        assert_eq!(data.len(), 12);
        assert!(data[4..].iter().all(|&v| v == 0));
    }
}

#[test]
fn copy_from_all_backing_combinations() {
    let memory = memory_context();
    let disk = disk_context();
    for (src_ctx, dst_ctx) in [
        (&memory, &memory),
        (&memory, &disk),
        (&disk, &memory),
        (&disk, &disk),
    ] {
        let source = DataStorage::<u64>::new(src_ctx, 700 * 8).unwrap();
        let values = fill(&source, 23);
        let mut target = DataStorage::<u64>::new(dst_ctx, 8).unwrap();
        target.copy_from(dst_ctx, &source, 900).unwrap();
        let data = read_all(&target);
        assert_eq!(&data[..700], &values[..]);
        assert!(data[700..].iter().all(|&v| v == 0));
    }
}

#[test]
fn migration_to_disk_and_back_is_idempotent() {
    let ctx = Context::builder()
        .memory_threshold(100 * 8)
        .block_size(256)
        .build()
        .unwrap();
    // Cached storage above the memory threshold but below the cached bound.
    let cached = DataStorage::<u64>::new_cached(&ctx, 500 * 8).unwrap();
    assert!(!cached.is_disk_backed());
    let values = fill(&cached, 29);

    let promoted = DataStorage::promote(&ctx, cached).unwrap();
    assert!(promoted.is_disk_backed());
    assert_eq!(read_all(&promoted), values);

    let mut back = DataStorage::<u64>::new(&ctx, 8).unwrap();
    back.copy_from(&ctx, &promoted, promoted.len()).unwrap();
    assert!(!back.is_disk_backed());
    assert_eq!(read_all(&back), values);
}

#[test]
fn transposed_array_gathers_columns() {
    let ctx = disk_context();
    // 8 rows x 16 columns, element = r * 100 + c.
    let rows = 8u64;
    let cols = 16u64;
    let storage = DataStorage::<u64>::new(&ctx, rows * cols * 8).unwrap();
    let mut access = storage
        .get_array(AccessMode::Write, 0, rows * cols)
        .unwrap();
    for r in 0..rows {
        for c in 0..cols {
            access.as_mut_slice()[(r * cols + c) as usize] = r * 100 + c;
        }
    }
    access.close().unwrap();

    let mut block = storage
        .get_transposed_array(AccessMode::ReadWrite, 4, 3, rows)
        .unwrap();
    for c in 0..3u64 {
        for r in 0..rows {
            let value = block.as_slice()[(c * rows + r) as usize];
            assert_eq!(value, r * 100 + 4 + c);
        }
    }
    // Mutate one gathered column and scatter it back.
    for r in 0..rows {
        block.as_mut_slice()[(2 * rows + r) as usize] = 7_000 + r;
    }
    block.close().unwrap();

    let data = read_all(&storage);
    for r in 0..rows {
        assert_eq!(data[(r * cols + 6) as usize], 7_000 + r);
        assert_eq!(data[(r * cols + 5) as usize], r * 100 + 5);
    }
}

#[test]
fn memory_storage_rejects_transposed_access() {
    let ctx = memory_context();
    let storage = DataStorage::<u64>::new(&ctx, 64 * 8).unwrap();
    assert!(matches!(
        storage.get_transposed_array(AccessMode::Read, 0, 4, 8),
        Err(Error::Internal(_))
    ));
}

#[test]
fn serialization_round_trips_disk_storage() {
    let ctx = disk_context();
    let storage = DataStorage::<u64>::new(&ctx, 300 * 8).unwrap();
    let values = fill(&storage, 31);
    let mut encoded = Vec::new();
    storage.write_to(&mut encoded).unwrap();
    let decoded =
        DataStorage::<u64>::read_from(&ctx, &mut encoded.as_slice()).unwrap();
    assert_eq!(read_all(&decoded), values);
}

