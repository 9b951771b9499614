//! One in-flight refresh of one entity kind.
//!
//! A session streams the full upstream collection into a fresh store
//! generation. Every persisted id is appended to a shared progress list and
//! broadcast over a `watch` channel, so any number of subscribers can follow
//! along: a late joiner replays the list from the start, then waits for the
//! next change. On success the generation is swapped in and the marker is
//! written; on failure the served generation is left untouched.

use crate::error::{MasterDataError, Result};
use crate::kind::EntityKind;
use crate::record::Record;
use crate::source::{DynMasterDataSource, VersionToken};
use crate::store::{run_blocking, DynRecordStore, Generation, SyncMarker};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Terminal or running state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Succeeded,
    Failed(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Running)
    }
}

#[derive(Debug, Clone)]
struct Progress {
    ids: Vec<u64>,
    state: SessionState,
}

/// Handle to a running or finished sync session.
///
/// Handles are shared (`Arc`) between the coordinator and every caller that
/// joined the session. Dropping a handle never cancels the session.
#[derive(Debug)]
pub struct SyncSession {
    kind: EntityKind,
    started_at: DateTime<Utc>,
    generation: Generation,
    progress: watch::Receiver<Progress>,
}

impl SyncSession {
    /// Prepare a fresh generation and start syncing into it on the runtime.
    ///
    /// `fetch_version` controls whether the upstream version token is read
    /// (before the first record) and recorded in the marker.
    pub async fn start(
        kind: EntityKind,
        store: DynRecordStore,
        source: DynMasterDataSource,
        fetch_version: bool,
    ) -> Result<Arc<Self>> {
        let generation = run_blocking(&store, move |store| store.reset_collection(kind)).await?;
        let (tx, rx) = watch::channel(Progress {
            ids: Vec::new(),
            state: SessionState::Running,
        });

        let session = Arc::new(Self {
            kind,
            started_at: Utc::now(),
            generation: generation.clone(),
            progress: rx,
        });

        info!("Starting sync of {} into {}", kind, generation);
        let runner = SessionRunner {
            kind,
            generation,
            store,
            source,
            fetch_version,
            tx,
        };
        tokio::spawn(runner.run());

        Ok(session)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Generation the session writes into.
    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    /// Number of records persisted so far.
    pub fn persisted(&self) -> usize {
        self.progress.borrow().ids.len()
    }

    /// Ids persisted so far, in upstream order.
    pub fn persisted_ids(&self) -> Vec<u64> {
        self.progress.borrow().ids.clone()
    }

    /// Current state; a session whose task vanished counts as failed.
    pub fn state(&self) -> SessionState {
        let state = self.progress.borrow().state.clone();
        if !state.is_terminal() && self.progress.has_changed().is_err() {
            return SessionState::Failed("sync task stopped unexpectedly".to_string());
        }
        state
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Start observing the session from its first id.
    pub fn subscribe(&self) -> SessionSubscriber {
        SessionSubscriber {
            kind: self.kind,
            progress: self.progress.clone(),
            cursor: 0,
        }
    }

    /// Wait for the session to finish. Returns the number of records synced.
    pub async fn wait(&self) -> Result<usize> {
        let mut subscriber = self.subscribe();
        let mut count = 0;
        while subscriber.next_id().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

/// Ordered, duplicate-free view of a session's ids.
///
/// Cancellation-safe: dropping a subscriber (or a pending `next_id` future)
/// has no effect on the session or on other subscribers.
#[derive(Debug, Clone)]
pub struct SessionSubscriber {
    kind: EntityKind,
    progress: watch::Receiver<Progress>,
    cursor: usize,
}

impl SessionSubscriber {
    /// Next id in upstream order.
    ///
    /// Returns `Ok(None)` once the session succeeded and every id has been
    /// observed, and `UpstreamUnavailable` if the session failed.
    pub async fn next_id(&mut self) -> Result<Option<u64>> {
        loop {
            {
                let progress = self.progress.borrow_and_update();
                if let Some(&id) = progress.ids.get(self.cursor) {
                    self.cursor += 1;
                    return Ok(Some(id));
                }
                match &progress.state {
                    SessionState::Succeeded => return Ok(None),
                    SessionState::Failed(message) => {
                        return Err(MasterDataError::UpstreamUnavailable {
                            kind: self.kind,
                            message: message.clone(),
                        })
                    }
                    SessionState::Running => {}
                }
            }

            if self.progress.changed().await.is_err() {
                // Sender gone: drain anything published before it went away.
                let progress = self.progress.borrow();
                if let Some(&id) = progress.ids.get(self.cursor) {
                    self.cursor += 1;
                    return Ok(Some(id));
                }
                return match &progress.state {
                    SessionState::Succeeded => Ok(None),
                    SessionState::Failed(message) => Err(MasterDataError::UpstreamUnavailable {
                        kind: self.kind,
                        message: message.clone(),
                    }),
                    SessionState::Running => Err(MasterDataError::UpstreamUnavailable {
                        kind: self.kind,
                        message: "sync task stopped unexpectedly".to_string(),
                    }),
                };
            }
        }
    }

    /// Wait until `id` is persisted (`true`) or the session completes without
    /// producing it (`false`).
    pub async fn wait_for(&mut self, id: u64) -> Result<bool> {
        while let Some(seen) = self.next_id().await? {
            if seen == id {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Number of ids observed so far.
    pub fn position(&self) -> usize {
        self.cursor
    }
}

/// Task body of a session; owns the sending side of the broadcast.
struct SessionRunner {
    kind: EntityKind,
    generation: Generation,
    store: DynRecordStore,
    source: DynMasterDataSource,
    fetch_version: bool,
    tx: watch::Sender<Progress>,
}

impl SessionRunner {
    async fn run(self) {
        let started = Instant::now();

        let outcome = match self.fill().await {
            Ok((ids, version_token)) => self.finalize(ids, version_token).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(count) => {
                info!(
                    "Synced {} {} records in {:?}",
                    count,
                    self.kind,
                    started.elapsed()
                );
                self.tx.send_modify(|p| p.state = SessionState::Succeeded);
            }
            Err(e) => {
                warn!(
                    "Sync of {} failed after {} records: {}",
                    self.kind,
                    self.tx.borrow().ids.len(),
                    e
                );
                self.tx
                    .send_modify(|p| p.state = SessionState::Failed(e.to_string()));
            }
        }
    }

    /// Stream upstream records into the new generation.
    async fn fill(&self) -> Result<(Vec<u64>, Option<VersionToken>)> {
        let version_token = if self.fetch_version {
            self.source.current_version_token().await?
        } else {
            None
        };

        let mut stream = self.source.iter_all(self.kind).await?;
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        while let Some(item) = stream.next().await {
            let record: Record = item?;
            let id = record.id();
            if !seen.insert(id) {
                warn!("Upstream repeated {} id {}, keeping the first", self.kind, id);
                continue;
            }

            let generation = self.generation.clone();
            run_blocking(&self.store, move |store| store.put_in(&generation, &record)).await?;
            ids.push(id);
            self.tx.send_modify(|p| p.ids.push(id));
            debug!("Persisted {} {}", self.kind, id);
        }

        Ok((ids, version_token))
    }

    /// Swap the generation in and certify it.
    async fn finalize(&self, ids: Vec<u64>, version_token: Option<VersionToken>) -> Result<usize> {
        let kind = self.kind;
        let generation = self.generation.clone();
        run_blocking(&self.store, move |store| {
            store.commit_generation(&generation, &ids)?;
            store.write_marker(
                kind,
                &SyncMarker {
                    synced_at: Utc::now(),
                    version_token,
                    generation: generation.name.clone(),
                    record_count: ids.len(),
                },
            )?;
            Ok(ids.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MasterDataSource, RecordStream};
    use crate::store::{FsRecordStore, RecordStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Yields fixed ids, then optionally fails.
    struct ScriptedSource {
        ids: Vec<u64>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl MasterDataSource for ScriptedSource {
        async fn iter_all(&self, _kind: EntityKind) -> Result<RecordStream> {
            let mut items: Vec<Result<Record>> = self
                .ids
                .iter()
                .map(|id| Record::new(json!({"id": id})))
                .collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(MasterDataError::upstream("connection reset")));
            }
            Ok(futures::stream::iter(items).boxed())
        }

        async fn current_version_token(&self) -> Result<Option<VersionToken>> {
            Ok(Some(VersionToken::new("v1")))
        }
    }

    fn setup(ids: Vec<u64>, fail_after: Option<usize>) -> (DynRecordStore, DynMasterDataSource, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store: DynRecordStore = Arc::new(FsRecordStore::open(temp_dir.path()).unwrap());
        let source: DynMasterDataSource = Arc::new(ScriptedSource { ids, fail_after });
        (store, source, temp_dir)
    }

    #[tokio::test]
    async fn test_success_commits_and_marks() {
        let (store, source, _temp) = setup(vec![3, 1, 2], None);
        let session = SyncSession::start(EntityKind::Card, store.clone(), source, true)
            .await
            .unwrap();

        assert_eq!(session.wait().await.unwrap(), 3);
        assert_eq!(session.state(), SessionState::Succeeded);
        assert_eq!(session.persisted_ids(), vec![3, 1, 2]);

        let marker = store.read_marker(EntityKind::Card).unwrap().unwrap();
        assert_eq!(marker.generation, session.generation().name);
        assert_eq!(marker.version_token, Some(VersionToken::new("v1")));
        assert_eq!(marker.record_count, 3);
        assert_eq!(store.ordered_ids(EntityKind::Card).unwrap(), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_failure_keeps_served_generation() {
        let (store, source, _temp) = setup(vec![1, 2, 3], Some(2));
        store
            .put(EntityKind::Card, &Record::new(json!({"id": 9})).unwrap())
            .unwrap();
        let before = store.served_generation(EntityKind::Card).unwrap();

        let session = SyncSession::start(EntityKind::Card, store.clone(), source, false)
            .await
            .unwrap();
        let err = session.wait().await.unwrap_err();
        assert!(matches!(err, MasterDataError::UpstreamUnavailable { .. }));
        assert!(matches!(session.state(), SessionState::Failed(_)));

        assert_eq!(store.served_generation(EntityKind::Card).unwrap(), before);
        assert!(store.get(EntityKind::Card, 9).unwrap().is_some());
        assert!(store.read_marker(EntityKind::Card).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribers_see_same_order_and_failure() {
        let (store, source, _temp) = setup(vec![5, 4, 6], Some(2));
        let session = SyncSession::start(EntityKind::Music, store, source, false)
            .await
            .unwrap();

        let mut subscriber = session.subscribe();
        assert_eq!(subscriber.next_id().await.unwrap(), Some(5));
        assert_eq!(subscriber.next_id().await.unwrap(), Some(4));
        assert!(subscriber.next_id().await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_skipped() {
        let (store, source, _temp) = setup(vec![1, 2, 1, 3], None);
        let session = SyncSession::start(EntityKind::Gacha, store, source, false)
            .await
            .unwrap();
        session.wait().await.unwrap();
        assert_eq!(session.persisted_ids(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_wait_for_missing_id() {
        let (store, source, _temp) = setup(vec![1, 2], None);
        let session = SyncSession::start(EntityKind::Card, store, source, false)
            .await
            .unwrap();

        let mut subscriber = session.subscribe();
        let found = tokio::time::timeout(Duration::from_secs(5), subscriber.wait_for(42))
            .await
            .unwrap()
            .unwrap();
        assert!(!found);
        assert_eq!(subscriber.position(), 2);
    }
}
