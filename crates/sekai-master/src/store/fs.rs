//! Filesystem record store with an in-memory hot tier.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<kind>/current            name of the served generation
//! <root>/<kind>/marker.json        SyncMarker of the last successful sync
//! <root>/<kind>/gen-<id>/<id>.json one file per record
//! <root>/<kind>/gen-<id>/index.json upstream order, written at commit
//! ```

use super::atomic::{atomic_read_json, atomic_write, atomic_write_json, is_temp_file, read_optional};
use super::lease::{GenerationLease, LeaseTable};
use super::traits::{Generation, RecordStore, SyncMarker};
use crate::config::{MasterCacheConfig, MasterDataDefaults};
use crate::error::{MasterDataError, Result};
use crate::kind::EntityKind;
use crate::record::Record;
use mini_moka::sync::Cache;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Served and previously served generation of one kind.
#[derive(Debug, Clone, Default)]
struct ServedState {
    current: Option<String>,
    previous: Option<String>,
}

type RecordKey = (EntityKind, String, u64);

/// Filesystem-backed record store.
///
/// Thread-safe: the served-generation pointers are guarded by a lock, record
/// files are written atomically and never modified inside a committed
/// generation except through [`RecordStore::put`].
pub struct FsRecordStore {
    root: PathBuf,
    served: RwLock<HashMap<EntityKind, ServedState>>,
    /// Decoded records keyed by (kind, generation, id).
    memory: Cache<RecordKey, Record>,
    /// Generations held by open cursors; never pruned.
    leases: LeaseTable,
}

impl FsRecordStore {
    /// Open (or create) a store with default memory tier settings.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(root, &MasterCacheConfig::default())
    }

    /// Open (or create) a store.
    ///
    /// Fails with [`MasterDataError::StoreUnwritable`] if the root cannot be
    /// created or written. Leftovers of interrupted syncs are removed.
    pub fn with_config(root: impl Into<PathBuf>, config: &MasterCacheConfig) -> Result<Self> {
        let root = root.into();
        Self::ensure_writable(&root)?;

        let store = Self {
            root,
            served: RwLock::new(HashMap::new()),
            memory: Cache::builder()
                .max_capacity(config.memory_cache_capacity)
                .time_to_idle(config.memory_cache_ttl())
                .build(),
            leases: LeaseTable::new(),
        };

        for kind in EntityKind::ALL {
            store.recover_kind(kind)?;
        }

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_writable(root: &Path) -> Result<()> {
        let unwritable = |message: String| MasterDataError::StoreUnwritable {
            path: root.to_path_buf(),
            message,
        };

        fs::create_dir_all(root).map_err(|e| unwritable(e.to_string()))?;
        let probe = root.join(".write-probe");
        atomic_write(&probe, b"ok").map_err(|e| unwritable(e.to_string()))?;
        fs::remove_file(&probe).map_err(|e| unwritable(e.to_string()))?;
        Ok(())
    }

    /// Load the served pointer of a kind and remove unreferenced generations.
    fn recover_kind(&self, kind: EntityKind) -> Result<()> {
        let kind_dir = self.kind_dir(kind);
        fs::create_dir_all(&kind_dir).map_err(|e| MasterDataError::io_with_path(e, &kind_dir))?;

        let current = read_optional(&kind_dir.join(MasterDataDefaults::CURRENT_FILENAME))?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|name| !name.is_empty());

        let current = match current {
            Some(name) if self.generation_dir(kind, &name).is_dir() => Some(name),
            Some(name) => {
                warn!("Served generation {}/{} is missing, dropping pointer", kind, name);
                None
            }
            None => None,
        };

        let keep: Vec<&str> = current.iter().map(String::as_str).collect();
        self.prune(kind, &keep)?;

        self.served_write()?.insert(
            kind,
            ServedState {
                current,
                previous: None,
            },
        );
        Ok(())
    }

    /// Remove generation directories and temp files not in `keep`.
    ///
    /// Leased generations survive. The lease table stays locked for the whole
    /// pass so no lease is granted on a directory being removed.
    fn prune(&self, kind: EntityKind, keep: &[&str]) -> Result<usize> {
        let leases = self.leases.lock()?;
        let kind_dir = self.kind_dir(kind);
        let entries = match fs::read_dir(&kind_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(MasterDataError::io_with_path(e, &kind_dir)),
        };

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            if name.starts_with(MasterDataDefaults::GENERATION_PREFIX)
                && !keep.contains(&name.as_str())
            {
                let generation = Generation {
                    kind,
                    name: name.clone(),
                };
                if leases.contains_key(&generation) {
                    debug!("Keeping leased generation {}", generation);
                    continue;
                }

                match fs::remove_dir_all(&path) {
                    Ok(()) => {
                        debug!("Pruned generation {}/{}", kind, name);
                        removed += 1;
                    }
                    Err(e) => warn!("Failed to prune {}: {}", path.display(), e),
                }
            } else if is_temp_file(&name) {
                let _ = fs::remove_file(&path);
            }
        }
        Ok(removed)
    }

    fn kind_dir(&self, kind: EntityKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    fn generation_dir(&self, kind: EntityKind, name: &str) -> PathBuf {
        self.kind_dir(kind).join(name)
    }

    fn record_path(&self, generation: &Generation, id: u64) -> PathBuf {
        self.generation_dir(generation.kind, &generation.name)
            .join(format!("{}.{}", id, MasterDataDefaults::RECORD_EXTENSION))
    }

    fn index_path(&self, generation: &Generation) -> PathBuf {
        self.generation_dir(generation.kind, &generation.name)
            .join(MasterDataDefaults::INDEX_FILENAME)
    }

    fn marker_path(&self, kind: EntityKind) -> PathBuf {
        self.kind_dir(kind).join(MasterDataDefaults::MARKER_FILENAME)
    }

    fn served_read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<EntityKind, ServedState>>> {
        self.served
            .read()
            .map_err(|e| MasterDataError::Other(format!("Served generation lock poisoned: {}", e)))
    }

    fn served_write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<EntityKind, ServedState>>> {
        self.served
            .write()
            .map_err(|e| MasterDataError::Other(format!("Served generation lock poisoned: {}", e)))
    }

    fn create_generation(&self, kind: EntityKind) -> Result<Generation> {
        let name = format!(
            "{}{}",
            MasterDataDefaults::GENERATION_PREFIX,
            uuid::Uuid::new_v4().simple()
        );
        let dir = self.generation_dir(kind, &name);
        fs::create_dir_all(&dir).map_err(|e| MasterDataError::io_with_path(e, &dir))?;
        Ok(Generation { kind, name })
    }

    fn write_pointer(&self, generation: &Generation) -> Result<()> {
        let path = self
            .kind_dir(generation.kind)
            .join(MasterDataDefaults::CURRENT_FILENAME);
        atomic_write(&path, generation.name.as_bytes())
    }

    /// Ids found by listing a generation directory, sorted.
    fn scan_ids(&self, generation: &Generation) -> Result<Vec<u64>> {
        let dir = self.generation_dir(generation.kind, &generation.name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MasterDataError::io_with_path(e, &dir)),
        };

        let mut ids: Vec<u64> = entries
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str())
                    != Some(MasterDataDefaults::RECORD_EXTENSION)
                {
                    return None;
                }
                path.file_stem()?.to_str()?.parse::<u64>().ok()
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

impl RecordStore for FsRecordStore {
    fn served_generation(&self, kind: EntityKind) -> Result<Option<Generation>> {
        Ok(self
            .served_read()?
            .get(&kind)
            .and_then(|state| state.current.clone())
            .map(|name| Generation { kind, name }))
    }

    fn put(&self, kind: EntityKind, record: &Record) -> Result<()> {
        let generation = match self.served_generation(kind)? {
            Some(generation) => generation,
            None => {
                let generation = self.create_generation(kind)?;
                self.write_pointer(&generation)?;
                let mut served = self.served_write()?;
                let state = served.entry(kind).or_default();
                state.previous = state.current.replace(generation.name.clone());
                generation
            }
        };

        self.put_in(&generation, record)?;

        // Keep the upstream-order index in step with ad-hoc writes.
        let index_path = self.index_path(&generation);
        if let Some(mut ids) = atomic_read_json::<Vec<u64>>(&index_path)? {
            if !ids.contains(&record.id()) {
                ids.push(record.id());
                atomic_write_json(&index_path, &ids)?;
            }
        }
        Ok(())
    }

    fn get_in(&self, generation: &Generation, id: u64) -> Result<Option<Record>> {
        let key = (generation.kind, generation.name.clone(), id);
        if let Some(record) = self.memory.get(&key) {
            return Ok(Some(record));
        }

        let path = self.record_path(generation, id);
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };

        let record = Record::from_slice(&bytes).map_err(|e| MasterDataError::CorruptRecord {
            path: path.clone(),
            message: e.to_string(),
        })?;
        if record.id() != id {
            return Err(MasterDataError::CorruptRecord {
                path,
                message: format!("file holds record {}", record.id()),
            });
        }

        self.memory.insert(key, record.clone());
        Ok(Some(record))
    }

    fn ordered_ids_in(&self, generation: &Generation) -> Result<Vec<u64>> {
        let index_path = self.index_path(generation);
        match atomic_read_json::<Vec<u64>>(&index_path) {
            Ok(Some(ids)) => Ok(ids),
            Ok(None) => self.scan_ids(generation),
            Err(e) => {
                warn!("Ignoring unreadable index {}: {}", index_path.display(), e);
                self.scan_ids(generation)
            }
        }
    }

    fn read_marker(&self, kind: EntityKind) -> Result<Option<SyncMarker>> {
        let path = self.marker_path(kind);
        atomic_read_json(&path).map_err(|e| match e {
            MasterDataError::Json { message, .. } => MasterDataError::CorruptRecord { path, message },
            other => other,
        })
    }

    fn write_marker(&self, kind: EntityKind, marker: &SyncMarker) -> Result<()> {
        atomic_write_json(&self.marker_path(kind), marker)
    }

    fn remove_marker(&self, kind: EntityKind) -> Result<bool> {
        let path = self.marker_path(kind);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MasterDataError::io_with_path(e, path)),
        }
    }

    fn reset_collection(&self, kind: EntityKind) -> Result<Generation> {
        let state = self.served_read()?.get(&kind).cloned().unwrap_or_default();
        let keep: Vec<&str> = state
            .current
            .iter()
            .chain(state.previous.iter())
            .map(String::as_str)
            .collect();
        self.prune(kind, &keep)?;

        let generation = self.create_generation(kind)?;
        debug!("Prepared generation {}", generation);
        Ok(generation)
    }

    fn put_in(&self, generation: &Generation, record: &Record) -> Result<()> {
        let path = self.record_path(generation, record.id());
        atomic_write(&path, &record.to_json_bytes()?)?;
        self.memory
            .insert((generation.kind, generation.name.clone(), record.id()), record.clone());
        Ok(())
    }

    fn lease(&self, generation: &Generation) -> Result<Option<GenerationLease>> {
        let mut counts = self.leases.lock()?;
        if !self.generation_dir(generation.kind, &generation.name).is_dir() {
            return Ok(None);
        }
        Ok(Some(self.leases.grant(&mut counts, generation.clone())))
    }

    fn commit_generation(&self, generation: &Generation, ids: &[u64]) -> Result<()> {
        atomic_write_json(&self.index_path(generation), &ids)?;
        self.write_pointer(generation)?;

        let replaced = {
            let mut served = self.served_write()?;
            let state = served.entry(generation.kind).or_default();
            let replaced = state.current.replace(generation.name.clone());
            state.previous = replaced.clone();
            replaced
        };

        // The replaced generation stays on disk for readers that resolved it
        // before the swap; anything older goes.
        let keep: Vec<&str> = std::iter::once(generation.name.as_str())
            .chain(replaced.as_deref())
            .collect();
        self.prune(generation.kind, &keep)?;

        info!(
            "Now serving {} ({} records, replaced {})",
            generation,
            ids.len(),
            replaced.as_deref().unwrap_or("nothing")
        );
        Ok(())
    }
}
