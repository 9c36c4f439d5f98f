//! Process-wide registry of live scratch files.
//!
//! Storage drops unlink their files eagerly; the registry exists for host
//! shutdown (`clean_up`) and for retrying unlinks that failed the first
//! time (`gc`), which the disk layer also runs before its single I/O retry.

use {
    std::{
        collections::HashSet,
        fs, io,
        path::{Path, PathBuf},
        sync::{LazyLock, Mutex},
    },
    tracing::warn,
};

struct Registry {
    live:    Mutex<HashSet<PathBuf>>,
    retired: Mutex<Vec<PathBuf>>,
}

static REGISTRY: LazyLock<Registry> = LazyLock::new(|| Registry {
    live:    Mutex::new(HashSet::new()),
    retired: Mutex::new(Vec::new()),
});

pub(crate) fn register(path: &Path) {
    if let Ok(mut live) = REGISTRY.live.lock() {
        live.insert(path.to_path_buf());
    }
}

pub(crate) fn unregister_and_delete(path: &Path) {
    if let Ok(mut live) = REGISTRY.live.lock() {
        live.remove(path);
    }
    if let Err(cause) = fs::remove_file(path) {
        if cause.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), %cause, "failed to unlink scratch file");
            if let Ok(mut retired) = REGISTRY.retired.lock() {
                retired.push(path.to_path_buf());
            }
        }
    }
}

/// Best-effort sweep retrying unlinks that previously failed.
pub fn gc() {
    if let Ok(mut retired) = REGISTRY.retired.lock() {
        retired.retain(|path| match fs::remove_file(path) {
            Ok(()) => false,
            Err(cause) => cause.kind() != io::ErrorKind::NotFound,
        });
    }
}

/// Releases every scratch file still registered. Safe to call at host
/// shutdown; storages must not be used afterwards.
pub fn clean_up() {
    gc();
    let paths: Vec<PathBuf> = match REGISTRY.live.lock() {
        Ok(mut live) => live.drain().collect(),
        Err(_) => return,
    };
    for path in paths {
        let _ = fs::remove_file(&path);
    }
}

/// Number of scratch files currently registered; used by tests to assert
/// nothing is left behind.
pub fn live_scratch_files() -> usize {
    REGISTRY.live.lock().map_or(0, |live| live.len())
}
