//! Record store trait and types.

use super::lease::GenerationLease;
use crate::error::Result;
use crate::kind::EntityKind;
use crate::record::Record;
use crate::source::VersionToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Proof of the last successful sync of a kind.
///
/// A marker certifies one generation: it is only written after every record of
/// that generation has been persisted and the generation has been swapped in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMarker {
    /// When the sync completed.
    pub synced_at: DateTime<Utc>,
    /// Upstream version token observed before the sync started.
    pub version_token: Option<VersionToken>,
    /// Generation the marker certifies.
    pub generation: String,
    /// Number of records in the generation.
    pub record_count: usize,
}

impl SyncMarker {
    /// Age of the marker relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        now.signed_duration_since(self.synced_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// One on-disk set of records for a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Generation {
    pub kind: EntityKind,
    pub name: String,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Persistent storage of records grouped by kind.
///
/// Every kind has at most one *served* generation, which readers see. A sync
/// writes into a fresh generation and swaps it in with
/// [`commit_generation`](RecordStore::commit_generation), so readers never see
/// a half-written collection and a failed sync leaves the served one intact.
///
/// All operations are synchronous and may fsync; async callers that write
/// should go through `spawn_blocking`.
pub trait RecordStore: Send + Sync {
    /// Currently served generation of a kind, if any.
    fn served_generation(&self, kind: EntityKind) -> Result<Option<Generation>>;

    /// Write or overwrite a record in the served generation.
    ///
    /// Creates an (uncertified) served generation if the kind has none.
    fn put(&self, kind: EntityKind, record: &Record) -> Result<()>;

    /// Read a record from a specific generation.
    fn get_in(&self, generation: &Generation, id: u64) -> Result<Option<Record>>;

    /// Ids of a generation, in upstream order when known.
    fn ordered_ids_in(&self, generation: &Generation) -> Result<Vec<u64>>;

    /// Read the sync marker of a kind.
    fn read_marker(&self, kind: EntityKind) -> Result<Option<SyncMarker>>;

    /// Write the sync marker of a kind.
    fn write_marker(&self, kind: EntityKind, marker: &SyncMarker) -> Result<()>;

    /// Delete the sync marker of a kind. Returns whether one existed.
    fn remove_marker(&self, kind: EntityKind) -> Result<bool>;

    /// Prepare an empty generation to sync into.
    ///
    /// The served generation is left untouched.
    fn reset_collection(&self, kind: EntityKind) -> Result<Generation>;

    /// Write a record into a generation that is being filled.
    fn put_in(&self, generation: &Generation, record: &Record) -> Result<()>;

    /// Keep `generation` on disk until the lease is dropped.
    ///
    /// Returns `None` if the generation has already been pruned.
    fn lease(&self, generation: &Generation) -> Result<Option<GenerationLease>>;

    /// Atomically make a fully written generation the served one.
    ///
    /// `ids` is the upstream order of the generation's records.
    fn commit_generation(&self, generation: &Generation, ids: &[u64]) -> Result<()>;

    /// Read a record from the served generation.
    fn get(&self, kind: EntityKind, id: u64) -> Result<Option<Record>> {
        match self.served_generation(kind)? {
            Some(generation) => self.get_in(&generation, id),
            None => Ok(None),
        }
    }

    /// Ids of the served generation.
    fn list_ids(&self, kind: EntityKind) -> Result<BTreeSet<u64>> {
        Ok(self.ordered_ids(kind)?.into_iter().collect())
    }

    /// Ids of the served generation, in upstream order when known.
    fn ordered_ids(&self, kind: EntityKind) -> Result<Vec<u64>> {
        match self.served_generation(kind)? {
            Some(generation) => self.ordered_ids_in(&generation),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_marker_age() {
        let now = Utc::now();
        let marker = SyncMarker {
            synced_at: now - ChronoDuration::seconds(90),
            version_token: None,
            generation: "gen-a".to_string(),
            record_count: 0,
        };
        assert_eq!(marker.age(now).as_secs(), 90);
    }

    #[test]
    fn test_marker_from_future_has_zero_age() {
        let now = Utc::now();
        let marker = SyncMarker {
            synced_at: now + ChronoDuration::seconds(30),
            version_token: None,
            generation: "gen-a".to_string(),
            record_count: 0,
        };
        assert_eq!(marker.age(now), std::time::Duration::ZERO);
    }

    #[test]
    fn test_marker_json_shape() {
        let marker = SyncMarker {
            synced_at: Utc::now(),
            version_token: Some(VersionToken::new("1.0")),
            generation: "gen-a".to_string(),
            record_count: 3,
        };
        let value = serde_json::to_value(&marker).unwrap();
        assert_eq!(value["version_token"], "1.0");
        assert_eq!(value["generation"], "gen-a");
        let back: SyncMarker = serde_json::from_value(value).unwrap();
        assert_eq!(back, marker);
    }
}
