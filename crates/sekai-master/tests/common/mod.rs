//! Scripted upstream shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use sekai_master::{
    EntityKind, MasterCacheConfig, MasterData, MasterDataError, MasterDataSource, Record,
    RecordStream, Result, RetryPolicy, VersionToken,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

/// Planned mid-stream failures of one kind.
#[derive(Debug, Clone, Copy)]
struct FailurePlan {
    /// Number of upcoming streams that fail.
    remaining: usize,
    /// Records yielded before the failure.
    after: usize,
}

/// In-memory upstream with call counting, gating and scripted failures.
pub struct FakeSource {
    collections: Mutex<HashMap<EntityKind, Vec<Value>>>,
    calls: Mutex<HashMap<EntityKind, usize>>,
    failures: Mutex<HashMap<EntityKind, FailurePlan>>,
    gate_after: Mutex<Option<usize>>,
    gate: watch::Sender<bool>,
    version: Mutex<Option<String>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            collections: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            gate_after: Mutex::new(None),
            gate,
            version: Mutex::new(None),
        })
    }

    /// Serve records with the given ids (and a `name` field) for `kind`.
    pub fn set_ids(&self, kind: EntityKind, ids: &[u64]) {
        let values = ids
            .iter()
            .map(|id| json!({"id": id, "name": format!("{}-{}", kind, id)}))
            .collect();
        self.set_records(kind, values);
    }

    pub fn set_records(&self, kind: EntityKind, values: Vec<Value>) {
        self.collections.lock().unwrap().insert(kind, values);
    }

    /// Pause every stream before it yields record number `n` until
    /// [`open_gate`](Self::open_gate) is called.
    pub fn gate_after(&self, n: usize) {
        *self.gate_after.lock().unwrap() = Some(n);
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Make the next `times` streams of `kind` fail after `after` records.
    pub fn fail_streams(&self, kind: EntityKind, times: usize, after: usize) {
        self.failures.lock().unwrap().insert(
            kind,
            FailurePlan {
                remaining: times,
                after,
            },
        );
    }

    pub fn set_version(&self, version: Option<&str>) {
        *self.version.lock().unwrap() = version.map(str::to_string);
    }

    /// Number of `iter_all` calls made for `kind`.
    pub fn calls(&self, kind: EntityKind) -> usize {
        self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }
}

struct StreamState {
    items: std::vec::IntoIter<Value>,
    index: usize,
    gate_after: Option<usize>,
    gate: watch::Receiver<bool>,
    fail_at: Option<usize>,
    done: bool,
}

#[async_trait]
impl MasterDataSource for FakeSource {
    async fn iter_all(&self, kind: EntityKind) -> Result<RecordStream> {
        *self.calls.lock().unwrap().entry(kind).or_default() += 1;

        let items = self
            .collections
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let fail_at = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&kind) {
                Some(plan) if plan.remaining > 0 => {
                    plan.remaining -= 1;
                    Some(plan.after)
                }
                _ => None,
            }
        };

        let state = StreamState {
            items: items.into_iter(),
            index: 0,
            gate_after: *self.gate_after.lock().unwrap(),
            gate: self.gate.subscribe(),
            fail_at,
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            if state.fail_at == Some(state.index) {
                state.done = true;
                let error = MasterDataError::upstream("connection reset by upstream");
                return Some((Err(error), state));
            }
            if state.gate_after == Some(state.index) {
                let _ = state.gate.wait_for(|open| *open).await;
            }
            tokio::task::yield_now().await;

            let value = state.items.next()?;
            state.index += 1;
            Some((Record::new(value), state))
        });

        Ok(stream.boxed())
    }

    async fn current_version_token(&self) -> Result<Option<VersionToken>> {
        Ok(self.version.lock().unwrap().clone().map(VersionToken::new))
    }
}

/// Retry quickly so background tests finish fast.
pub fn fast_config() -> MasterCacheConfig {
    MasterCacheConfig::default().with_retry(RetryPolicy::fixed(Duration::from_millis(10)))
}

pub fn build_master(source: &Arc<FakeSource>, config: MasterCacheConfig) -> (MasterData, TempDir) {
    let cache_dir = TempDir::new().expect("Failed to create temp dir");
    let master = build_master_at(source, config, &cache_dir);
    (master, cache_dir)
}

pub fn build_master_at(
    source: &Arc<FakeSource>,
    config: MasterCacheConfig,
    cache_dir: &TempDir,
) -> MasterData {
    MasterData::builder(cache_dir.path())
        .shared_source(source.clone())
        .config(config)
        .kinds([EntityKind::Card, EntityKind::Music])
        .build()
        .expect("Failed to build master data")
}

/// Bound a wait so a broken test fails instead of hanging.
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}
