//! Persistent record storage.
//!
//! Records are stored one JSON file per id, grouped by kind and by
//! generation, with a small marker file per kind recording the last
//! successful sync. See [`FsRecordStore`] for the on-disk layout.

mod atomic;
mod fs;
mod lease;
mod traits;

pub use atomic::{atomic_read_json, atomic_write, atomic_write_json};
pub use fs::FsRecordStore;
pub use lease::{GenerationLease, LeaseTable};
pub use traits::{Generation, RecordStore, SyncMarker};

use crate::error::{MasterDataError, Result};

/// Shared handle to a store.
pub type DynRecordStore = std::sync::Arc<dyn RecordStore>;

/// Run store work on the blocking thread pool.
///
/// Writes fsync every file, so sync sessions route them through here instead
/// of stalling runtime workers.
pub(crate) async fn run_blocking<T, F>(store: &DynRecordStore, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn RecordStore) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| MasterDataError::Other(format!("Store task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::EntityKind;
    use crate::record::Record;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_blocking_leaves_the_runtime_thread() {
        let temp_dir = TempDir::new().unwrap();
        let store: DynRecordStore = Arc::new(FsRecordStore::open(temp_dir.path()).unwrap());
        let runtime_thread = std::thread::current().id();

        let (writer_thread, generation) = run_blocking(&store, |store| {
            let generation = store.reset_collection(EntityKind::Card)?;
            store.put_in(&generation, &Record::new(json!({"id": 1}))?)?;
            Ok((std::thread::current().id(), generation))
        })
        .await
        .unwrap();

        assert_ne!(writer_thread, runtime_thread);
        assert!(store.get_in(&generation, 1).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_blocking_propagates_errors() {
        let temp_dir = TempDir::new().unwrap();
        let store: DynRecordStore = Arc::new(FsRecordStore::open(temp_dir.path()).unwrap());

        let err = run_blocking(&store, |_| -> Result<()> {
            Err(MasterDataError::Other("disk full".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, MasterDataError::Other(message) if message == "disk full"));
    }
}
