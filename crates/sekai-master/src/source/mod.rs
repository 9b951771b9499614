//! Upstream master data sources.
//!
//! The cache never talks to the network itself. It consumes a
//! [`MasterDataSource`], which yields the full collection of a kind as a lazy
//! stream and optionally reports a version token used for change detection.

mod dump;

pub use dump::DumpDirSource;

use crate::error::Result;
use crate::kind::EntityKind;
use crate::record::Record;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lazy, finite stream of upstream records. Items may fail mid-stream.
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Opaque upstream version marker (for example the game's asset version).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upstream collaborator providing full collections per kind.
#[async_trait]
pub trait MasterDataSource: Send + Sync {
    /// Start streaming every record of `kind`, in upstream order.
    async fn iter_all(&self, kind: EntityKind) -> Result<RecordStream>;

    /// Current upstream version token.
    ///
    /// Sources without change detection return `Ok(None)`.
    async fn current_version_token(&self) -> Result<Option<VersionToken>> {
        Ok(None)
    }
}

/// Shared handle to a source.
pub type DynMasterDataSource = Arc<dyn MasterDataSource>;
