//! Source backed by a directory of master database JSON dumps.
//!
//! Layout:
//! - `<dir>/cards.json`, `<dir>/musics.json`, ...: one JSON array per kind
//! - `<dir>/versions.json` (optional): `{"assetVersion": "...", "dataVersion": "..."}`

use super::{MasterDataSource, RecordStream, VersionToken};
use crate::error::{MasterDataError, Result};
use crate::kind::EntityKind;
use crate::models::SystemInfo;
use crate::record::Record;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File holding the dump's version information.
const VERSIONS_FILENAME: &str = "versions.json";

/// Reads full collections from a local dump directory.
#[derive(Debug, Clone)]
pub struct DumpDirSource {
    dir: PathBuf,
}

impl DumpDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn collection_path(&self, kind: EntityKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.dump_name()))
    }

    async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MasterDataError::upstream(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl MasterDataSource for DumpDirSource {
    async fn iter_all(&self, kind: EntityKind) -> Result<RecordStream> {
        let path = self.collection_path(kind);
        let bytes = self.read(&path).await?.ok_or_else(|| {
            MasterDataError::upstream(format!("Dump has no collection file {}", path.display()))
        })?;

        let items: Vec<Value> = serde_json::from_slice(&bytes).map_err(|e| {
            MasterDataError::upstream(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        debug!("Dump {} holds {} {} records", path.display(), items.len(), kind);

        Ok(futures::stream::iter(items.into_iter().map(Record::new)).boxed())
    }

    async fn current_version_token(&self) -> Result<Option<VersionToken>> {
        let path = self.dir.join(VERSIONS_FILENAME);
        let Some(bytes) = self.read(&path).await? else {
            return Ok(None);
        };

        let info: SystemInfo = serde_json::from_slice(&bytes).map_err(|e| {
            MasterDataError::upstream(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        Ok(info.version_token())
    }
}
