//! Builder for assembling a [`MasterData`] facade.

use super::MasterData;
use crate::config::MasterCacheConfig;
use crate::error::{MasterDataError, Result};
use crate::kind::EntityKind;
use crate::source::{DynMasterDataSource, MasterDataSource};
use crate::store::{DynRecordStore, FsRecordStore};
use crate::sync::SyncCoordinator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Builder for configuring a [`MasterData`] instance.
///
/// # Example
///
/// ```rust,ignore
/// use sekai_master::{DumpDirSource, EntityKind, MasterData};
///
/// let master = MasterData::builder("./cache/master")
///     .source(DumpDirSource::new("./dumps"))
///     .kinds([EntityKind::Card, EntityKind::Music])
///     .build()?;
/// ```
pub struct MasterDataBuilder {
    cache_dir: PathBuf,
    source: Option<DynMasterDataSource>,
    store: Option<DynRecordStore>,
    config: MasterCacheConfig,
    kinds: Vec<EntityKind>,
}

impl MasterDataBuilder {
    /// Create a builder caching under `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source: None,
            store: None,
            config: MasterCacheConfig::default(),
            kinds: EntityKind::ALL.to_vec(),
        }
    }

    /// Upstream to sync from. Required.
    pub fn source(mut self, source: impl MasterDataSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Upstream to sync from, already shared.
    pub fn shared_source(mut self, source: DynMasterDataSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Use a custom store instead of the filesystem store at `cache_dir`.
    pub fn store(mut self, store: DynRecordStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: MasterCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Kinds the background loop keeps fresh.
    ///
    /// Default: every kind.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        let mut selected: Vec<EntityKind> = Vec::new();
        for kind in kinds {
            if !selected.contains(&kind) {
                selected.push(kind);
            }
        }
        self.kinds = selected;
        self
    }

    /// Open the store and assemble the facade.
    ///
    /// Fails if the configuration is invalid, no source was given, or the
    /// cache directory is not writable.
    pub fn build(self) -> Result<MasterData> {
        self.config.validate()?;

        let source = self.source.ok_or_else(|| MasterDataError::Config {
            message: "a master data source is required".to_string(),
        })?;

        let store: DynRecordStore = match self.store {
            Some(store) => store,
            None => Arc::new(FsRecordStore::with_config(&self.cache_dir, &self.config)?),
        };

        info!(
            "Master data cache at {} ({} kinds)",
            self.cache_dir.display(),
            self.kinds.len()
        );

        let coordinator = SyncCoordinator::new(store.clone(), source, self.config, self.kinds);
        Ok(MasterData {
            store,
            coordinator: Arc::new(coordinator),
        })
    }
}
