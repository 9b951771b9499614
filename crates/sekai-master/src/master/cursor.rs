//! Lazy record sequences returned by [`MasterData::iterate`](super::MasterData::iterate).

use crate::error::{MasterDataError, Result};
use crate::record::Record;
use crate::store::{DynRecordStore, Generation, GenerationLease, RecordStore};
use crate::sync::SessionSubscriber;
use futures::stream::BoxStream;
use futures::StreamExt;

enum CursorSource {
    /// Snapshot of a committed generation.
    Stored {
        lease: Option<GenerationLease>,
        ids: Vec<u64>,
        position: usize,
    },
    /// Follows a running sync session.
    Live {
        lease: GenerationLease,
        subscriber: SessionSubscriber,
    },
}

/// A lazy, finite sequence of records of one kind, in upstream order.
///
/// Stored cursors read a fixed snapshot and can be restarted. Live cursors
/// replay what a running session has persisted and then follow it until it
/// ends; they cannot be restarted, call `iterate` again instead.
///
/// A cursor leases the generation it reads, so later syncs of the kind do
/// not prune it while the cursor is alive.
pub struct RecordCursor {
    store: DynRecordStore,
    source: CursorSource,
    done: bool,
}

impl RecordCursor {
    /// Cursor over `ids` of a leased generation; `None` reads nothing.
    pub(crate) fn stored(
        store: DynRecordStore,
        lease: Option<GenerationLease>,
        ids: Vec<u64>,
    ) -> Self {
        Self {
            store,
            source: CursorSource::Stored {
                lease,
                ids,
                position: 0,
            },
            done: false,
        }
    }

    pub(crate) fn live(
        store: DynRecordStore,
        lease: GenerationLease,
        subscriber: SessionSubscriber,
    ) -> Self {
        Self {
            store,
            source: CursorSource::Live { lease, subscriber },
            done: false,
        }
    }

    /// Generation the cursor reads, if any.
    pub fn generation(&self) -> Option<&Generation> {
        match &self.source {
            CursorSource::Stored { lease, .. } => lease.as_ref().map(GenerationLease::generation),
            CursorSource::Live { lease, .. } => Some(lease.generation()),
        }
    }

    pub fn is_restartable(&self) -> bool {
        matches!(self.source, CursorSource::Stored { .. })
    }

    /// Rewind a stored cursor. Returns `false` for live cursors.
    pub fn restart(&mut self) -> bool {
        match &mut self.source {
            CursorSource::Stored { position, .. } => {
                *position = 0;
                self.done = false;
                true
            }
            CursorSource::Live { .. } => false,
        }
    }

    /// Next record, or `None` once the sequence is exhausted.
    ///
    /// After an error the cursor is exhausted.
    pub async fn next(&mut self) -> Option<Result<Record>> {
        if self.done {
            return None;
        }

        let item = match &mut self.source {
            CursorSource::Stored {
                lease,
                ids,
                position,
            } => {
                let (Some(lease), Some(&id)) = (lease.as_ref(), ids.get(*position)) else {
                    self.done = true;
                    return None;
                };
                *position += 1;
                read(&self.store, lease.generation(), id)
            }
            CursorSource::Live { lease, subscriber } => match subscriber.next_id().await {
                Ok(Some(id)) => read(&self.store, lease.generation(), id),
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => Err(e),
            },
        };

        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }

    /// Read the remaining records into a vector.
    pub async fn collect(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await {
            records.push(record?);
        }
        Ok(records)
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Record>> {
        futures::stream::unfold(self, |mut cursor| async move {
            cursor.next().await.map(|item| (item, cursor))
        })
        .boxed()
    }
}

fn read(store: &DynRecordStore, generation: &Generation, id: u64) -> Result<Record> {
    store.get_in(generation, id)?.ok_or_else(|| MasterDataError::Io {
        message: format!("Record {} is missing from {}", id, generation),
        path: None,
        source: None,
    })
}
