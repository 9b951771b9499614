//! Per-kind single-flight sync coordination.
//!
//! The coordinator owns the "current session" slot of every kind. Each slot
//! sits behind its own async mutex, and the staleness decision plus the
//! session start happen while holding it, so concurrent triggers (a
//! foreground cache miss and the background timer, or many readers) collapse
//! into one session.

use super::retry::retry_async;
use super::session::SyncSession;
use crate::cancel::CancellationToken;
use crate::config::MasterCacheConfig;
use crate::error::{MasterDataError, Result};
use crate::kind::EntityKind;
use crate::source::{DynMasterDataSource, VersionToken};
use crate::store::{DynRecordStore, RecordStore, SyncMarker};
use chrono::Utc;
use mini_moka::sync::Cache;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

type SessionSlots = Arc<HashMap<EntityKind, Mutex<Option<Arc<SyncSession>>>>>;

/// Result of [`SyncCoordinator::ensure_fresh`].
#[derive(Debug, Clone)]
pub enum SyncHandle {
    /// The served collection is fresh; nothing to wait for.
    Fresh,
    /// A session is filling the kind.
    Session {
        session: Arc<SyncSession>,
        /// Whether the session was already running before this call.
        joined: bool,
    },
}

impl SyncHandle {
    pub fn is_fresh(&self) -> bool {
        matches!(self, SyncHandle::Fresh)
    }

    pub fn session(&self) -> Option<&Arc<SyncSession>> {
        match self {
            SyncHandle::Fresh => None,
            SyncHandle::Session { session, .. } => Some(session),
        }
    }

    /// Wait until the kind is fresh, or the session fails.
    pub async fn wait(&self) -> Result<()> {
        match self {
            SyncHandle::Fresh => Ok(()),
            SyncHandle::Session { session, .. } => session.wait().await.map(|_| ()),
        }
    }
}

/// Freshness state of a kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KindState {
    Fresh,
    Stale,
    Syncing { persisted: usize },
}

/// Snapshot of a kind's cache state.
#[derive(Debug, Clone, Serialize)]
pub struct KindStatus {
    pub kind: EntityKind,
    #[serde(flatten)]
    pub state: KindState,
    pub marker: Option<SyncMarker>,
    pub record_count: usize,
}

/// Decides staleness and starts, joins and retries sync sessions.
pub struct SyncCoordinator {
    store: DynRecordStore,
    source: DynMasterDataSource,
    config: MasterCacheConfig,
    kinds: Vec<EntityKind>,
    slots: SessionSlots,
    /// Memoized upstream version token; `None` when probing every time.
    version_probe: Option<Cache<(), Option<VersionToken>>>,
}

impl SyncCoordinator {
    /// Create a coordinator refreshing `kinds` in the background.
    ///
    /// Foreground calls accept every kind; `kinds` only scopes the
    /// background loop and [`status_all`](Self::status_all).
    pub fn new(
        store: DynRecordStore,
        source: DynMasterDataSource,
        config: MasterCacheConfig,
        kinds: Vec<EntityKind>,
    ) -> Self {
        let slots = EntityKind::ALL
            .iter()
            .map(|&kind| (kind, Mutex::new(None)))
            .collect();

        let probe_ttl = config.version_probe_ttl();
        let version_probe = (config.version_check && !probe_ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(1)
                .time_to_live(probe_ttl)
                .build()
        });

        Self {
            store,
            source,
            config,
            kinds,
            slots: Arc::new(slots),
            version_probe,
        }
    }

    pub fn config(&self) -> &MasterCacheConfig {
        &self.config
    }

    pub fn kinds(&self) -> &[EntityKind] {
        &self.kinds
    }

    pub fn store(&self) -> &DynRecordStore {
        &self.store
    }

    fn slot(&self, kind: EntityKind) -> &Mutex<Option<Arc<SyncSession>>> {
        // Every kind gets a slot in `new`.
        &self.slots[&kind]
    }

    /// Whether the served collection of `kind` needs a resync.
    ///
    /// Unreadable markers count as stale. A failing version probe leaves an
    /// otherwise fresh kind fresh.
    pub async fn is_stale(&self, kind: EntityKind) -> bool {
        let marker = match self.store.read_marker(kind) {
            Ok(Some(marker)) => marker,
            Ok(None) => {
                debug!("{} has no sync marker", kind);
                return true;
            }
            Err(e) => {
                warn!("Unreadable sync marker for {}: {}", kind, e);
                return true;
            }
        };

        match self.store.served_generation(kind) {
            Ok(Some(generation)) if generation.name == marker.generation => {}
            Ok(_) => {
                debug!("{} marker does not certify the served generation", kind);
                return true;
            }
            Err(e) => {
                warn!("Failed to resolve served generation of {}: {}", kind, e);
                return true;
            }
        }

        if let Some(ttl) = self.config.ttl() {
            let age = marker.age(Utc::now());
            if ttl.is_zero() || age > ttl {
                debug!("{} is {:?} old (ttl {:?})", kind, age, ttl);
                return true;
            }
        }

        if self.config.version_check {
            match self.upstream_version().await {
                Ok(Some(token)) if marker.version_token.as_ref() != Some(&token) => {
                    info!(
                        "Upstream version of {} changed: {:?} -> {}",
                        kind,
                        marker.version_token.as_ref().map(VersionToken::as_str),
                        token
                    );
                    return true;
                }
                Ok(_) => {}
                Err(e) => warn!("Version probe failed, keeping cached {}: {}", kind, e),
            }
        }

        false
    }

    async fn upstream_version(&self) -> Result<Option<VersionToken>> {
        if let Some(cached) = self.version_probe.as_ref().and_then(|c| c.get(&())) {
            return Ok(cached);
        }

        let token = self.source.current_version_token().await?;
        if let Some(cache) = &self.version_probe {
            cache.insert((), token.clone());
        }
        Ok(token)
    }

    /// Join the running session of `kind`, start one if the kind is stale,
    /// or report that it is fresh.
    pub async fn ensure_fresh(&self, kind: EntityKind) -> Result<SyncHandle> {
        let mut slot = self.slot(kind).lock().await;

        if let Some(session) = running(&slot) {
            debug!("Joining running sync of {}", kind);
            return Ok(SyncHandle::Session {
                session,
                joined: true,
            });
        }

        if !self.is_stale(kind).await {
            return Ok(SyncHandle::Fresh);
        }

        let session = self.start_locked(kind, &mut slot).await?;
        Ok(SyncHandle::Session {
            session,
            joined: false,
        })
    }

    /// Join the running session of `kind` or start one regardless of
    /// staleness.
    pub async fn refresh(&self, kind: EntityKind) -> Result<Arc<SyncSession>> {
        let mut slot = self.slot(kind).lock().await;
        if let Some(session) = running(&slot) {
            return Ok(session);
        }
        self.start_locked(kind, &mut slot).await
    }

    /// Drop the sync marker so the next read resyncs the kind.
    pub fn invalidate(&self, kind: EntityKind) -> Result<bool> {
        let removed = self.store.remove_marker(kind)?;
        if removed {
            info!("Invalidated cached {}", kind);
        }
        Ok(removed)
    }

    /// Running session of `kind`, if any.
    pub async fn current_session(&self, kind: EntityKind) -> Option<Arc<SyncSession>> {
        running(&*self.slot(kind).lock().await)
    }

    pub async fn status(&self, kind: EntityKind) -> KindStatus {
        let state = match self.current_session(kind).await {
            Some(session) => KindState::Syncing {
                persisted: session.persisted(),
            },
            None if self.is_stale(kind).await => KindState::Stale,
            None => KindState::Fresh,
        };

        KindStatus {
            kind,
            state,
            marker: self.store.read_marker(kind).ok().flatten(),
            record_count: self.store.ordered_ids(kind).map(|ids| ids.len()).unwrap_or(0),
        }
    }

    /// Status of every background-managed kind.
    pub async fn status_all(&self) -> Vec<KindStatus> {
        let mut statuses = Vec::with_capacity(self.kinds.len());
        for &kind in &self.kinds {
            statuses.push(self.status(kind).await);
        }
        statuses
    }

    async fn start_locked(
        &self,
        kind: EntityKind,
        slot: &mut Option<Arc<SyncSession>>,
    ) -> Result<Arc<SyncSession>> {
        let session = SyncSession::start(
            kind,
            self.store.clone(),
            self.source.clone(),
            self.config.version_check,
        )
        .await?;
        *slot = Some(session.clone());

        // Release the slot once the session ends so finished sessions and
        // their id lists do not linger.
        let slots = self.slots.clone();
        let finished = session.clone();
        tokio::spawn(async move {
            let _ = finished.wait().await;
            if let Some(slot) = slots.get(&kind) {
                let mut guard = slot.lock().await;
                if guard.as_ref().is_some_and(|s| Arc::ptr_eq(s, &finished)) {
                    *guard = None;
                }
            }
        });

        Ok(session)
    }

    /// Bring one kind up to date, retrying failed syncs per the retry policy.
    pub async fn check_kind(&self, kind: EntityKind, cancel: &CancellationToken) -> Result<()> {
        let label = format!("Sync of {}", kind);
        let (result, stats) = retry_async(
            &self.config.retry,
            cancel,
            &label,
            || async move { self.ensure_fresh(kind).await?.wait().await },
            MasterDataError::is_retryable,
        )
        .await;

        result.map_err(|e| MasterDataError::TransientSyncFailure {
            kind,
            attempts: stats.attempts,
            message: e.to_string(),
        })
    }

    /// Start the periodic refresh loop for all managed kinds.
    pub fn spawn_background(self: &Arc<Self>) -> BackgroundTask {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run_background(cancel.clone()));
        info!(
            "Background refresh every {:?} for {} kinds",
            self.config.check_interval(),
            self.kinds.len()
        );
        BackgroundTask { cancel, handle }
    }

    async fn run_background(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.check_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut workers: HashMap<EntityKind, JoinHandle<()>> = HashMap::new();

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel.cancelled() => break,
            }

            for &kind in &self.kinds {
                if workers.get(&kind).is_some_and(|w| !w.is_finished()) {
                    debug!("{} is still retrying, skipping this tick", kind);
                    continue;
                }

                let coordinator = self.clone();
                let cancel = cancel.clone();
                let worker = tokio::spawn(async move {
                    if let Err(e) = coordinator.check_kind(kind, &cancel).await {
                        if cancel.is_cancelled() {
                            debug!("{}", e);
                        } else {
                            warn!("{}", e);
                        }
                    }
                });
                workers.insert(kind, worker);
            }
        }

        // Sessions run in their own tasks and finish on their own.
        for worker in workers.into_values() {
            worker.abort();
        }
        info!("Background refresh stopped");
    }
}

fn running(slot: &Option<Arc<SyncSession>>) -> Option<Arc<SyncSession>> {
    slot.as_ref().filter(|s| !s.is_finished()).cloned()
}

/// Handle to the background refresh loop.
pub struct BackgroundTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the loop and pending retries, and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Background refresh task ended abnormally: {}", e);
        }
    }
}
