//! Runs alone in its own binary: the scratch registry is process-wide, so
//! counting live files is only meaningful without concurrent storage tests.

use {
    apmul_common::Context,
    apmul_storage::{clean_up, live_scratch_files, AccessMode, DataStorage},
};

#[test]
fn scratch_files_are_released_on_drop() {
    let ctx = Context::builder().memory_threshold(0).build().unwrap();
    let baseline = live_scratch_files();
    {
        let storage = DataStorage::<u64>::new(&ctx, 128 * 8).unwrap();
        let mut access = storage.get_array(AccessMode::Write, 0, 128).unwrap();
        access.as_mut_slice().fill(3);
        access.close().unwrap();
        assert_eq!(live_scratch_files(), baseline + 1);
        let view = storage.subsequence(0, 64).unwrap();
        drop(storage);
        // The view still holds the backing alive.
        assert_eq!(live_scratch_files(), baseline + 1);
        drop(view);
    }
    assert_eq!(live_scratch_files(), baseline);

    // Host-shutdown sweep is safe to call with nothing registered.
    clean_up();
    assert_eq!(live_scratch_files(), 0);
}
