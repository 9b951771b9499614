//! Read-through facade over the store and the sync coordinator.
//!
//! Reads of a fresh kind are served straight from the store. Reads of a stale
//! kind join (or start) the kind's sync session and resolve as soon as the
//! requested record has streamed in, without waiting for the whole
//! collection.

mod builder;
mod cursor;

pub use builder::MasterDataBuilder;
pub use cursor::RecordCursor;

use crate::error::{MasterDataError, Result};
use crate::kind::EntityKind;
use crate::models::{
    CharacterInfo, CharacterRef, ExtraCharacter, GameCharacter, LiveInfo, MasterRecord,
    MusicVersion,
};
use crate::record::Record;
use crate::store::{DynRecordStore, Generation, GenerationLease, RecordStore};
use crate::sync::{BackgroundTask, KindStatus, SyncCoordinator, SyncHandle};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Public read surface of the master data cache.
///
/// Cheap to clone; clones share the store and the coordinator.
#[derive(Clone)]
pub struct MasterData {
    store: DynRecordStore,
    coordinator: Arc<SyncCoordinator>,
}

impl MasterData {
    pub fn builder(cache_dir: impl Into<PathBuf>) -> MasterDataBuilder {
        MasterDataBuilder::new(cache_dir)
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Kinds kept fresh by the background loop.
    pub fn kinds(&self) -> &[EntityKind] {
        self.coordinator.kinds()
    }

    /// Look up one record.
    ///
    /// Returns [`MasterDataError::NotFound`] when the id is absent from a
    /// complete collection and [`MasterDataError::UpstreamUnavailable`] when
    /// the sync this call waited on failed. Local cache faults trigger one
    /// resync instead of surfacing.
    pub async fn get(&self, kind: EntityKind, id: u64) -> Result<Record> {
        match self.get_once(kind, id).await {
            Err(e) if e.is_cache_fault() => {
                warn!("Cache fault reading {} {}, resyncing: {}", kind, id, e);
                self.drop_marker(kind);
                self.get_once(kind, id).await
            }
            result => result,
        }
    }

    async fn get_once(&self, kind: EntityKind, id: u64) -> Result<Record> {
        let not_found = || MasterDataError::NotFound { kind, id };

        match self.coordinator.ensure_fresh(kind).await? {
            SyncHandle::Fresh => {
                debug!("Serving {} {} from cache", kind, id);
                self.store.get(kind, id)?.ok_or_else(not_found)
            }
            SyncHandle::Session { session, joined } => {
                debug!(
                    "Waiting for {} {} from {} sync",
                    kind,
                    id,
                    if joined { "joined" } else { "new" }
                );
                let mut subscriber = session.subscribe();
                if subscriber.wait_for(id).await? {
                    self.store
                        .get_in(session.generation(), id)?
                        .ok_or_else(not_found)
                } else {
                    Err(not_found())
                }
            }
        }
    }

    /// Iterate all records of a kind in upstream order.
    ///
    /// A fresh kind yields a restartable snapshot; a stale kind yields a live
    /// cursor following the sync session.
    pub async fn iterate(&self, kind: EntityKind) -> Result<RecordCursor> {
        match self.iterate_once(kind).await {
            Err(e) if e.is_cache_fault() => {
                warn!("Cache fault listing {}, resyncing: {}", kind, e);
                self.drop_marker(kind);
                self.iterate_once(kind).await
            }
            result => result,
        }
    }

    async fn iterate_once(&self, kind: EntityKind) -> Result<RecordCursor> {
        match self.coordinator.ensure_fresh(kind).await? {
            SyncHandle::Fresh => {
                let Some(generation) = self.store.served_generation(kind)? else {
                    return Ok(RecordCursor::stored(self.store.clone(), None, Vec::new()));
                };
                let lease = self.lease(&generation)?;
                let ids = self.store.ordered_ids_in(&generation)?;
                Ok(RecordCursor::stored(self.store.clone(), Some(lease), ids))
            }
            SyncHandle::Session { session, .. } => Ok(RecordCursor::live(
                self.store.clone(),
                self.lease(session.generation())?,
                session.subscribe(),
            )),
        }
    }

    /// Lease a generation for a cursor. A generation pruned before the lease
    /// is a cache fault.
    fn lease(&self, generation: &Generation) -> Result<GenerationLease> {
        self.store
            .lease(generation)?
            .ok_or_else(|| MasterDataError::Io {
                message: format!("Generation {} was pruned before it could be read", generation),
                path: None,
                source: None,
            })
    }

    fn drop_marker(&self, kind: EntityKind) {
        if let Err(e) = self.coordinator.invalidate(kind) {
            warn!("Failed to invalidate {}: {}", kind, e);
        }
    }

    /// Look up one record decoded as `T`.
    pub async fn get_as<T: MasterRecord>(&self, id: u64) -> Result<T> {
        self.get(T::KIND, id).await?.to_model()
    }

    /// Iterate all records of `T`'s kind, decoded.
    pub async fn iterate_as<T: MasterRecord>(&self) -> Result<BoxStream<'static, Result<T>>> {
        Ok(self
            .iterate(T::KIND)
            .await?
            .into_stream()
            .map(|record| record.and_then(|r| r.to_model::<T>()))
            .boxed())
    }

    /// Records of `T`'s kind matching `predicate`, in upstream order.
    pub async fn collect_where<T, F>(&self, mut predicate: F) -> Result<Vec<T>>
    where
        T: MasterRecord,
        F: FnMut(&T) -> bool,
    {
        let mut cursor = self.iterate(T::KIND).await?;
        let mut matched = Vec::new();
        while let Some(record) = cursor.next().await {
            let model: T = record?.to_model()?;
            if predicate(&model) {
                matched.push(model);
            }
        }
        Ok(matched)
    }

    /// Vocal versions of a music track.
    ///
    /// An unknown music id yields an empty list rather than `NotFound`.
    pub async fn versions_of_music(&self, music_id: u64) -> Result<Vec<MusicVersion>> {
        self.collect_where(|v: &MusicVersion| v.music_id == music_id)
            .await
    }

    /// Playable difficulties of a music track.
    ///
    /// An unknown music id yields an empty list rather than `NotFound`.
    pub async fn lives_of_music(&self, music_id: u64) -> Result<Vec<LiveInfo>> {
        self.collect_where(|l: &LiveInfo| l.music_id == music_id)
            .await
    }

    /// Resolve a game or extra character.
    pub async fn character_info(&self, character: CharacterRef) -> Result<CharacterInfo> {
        match character {
            CharacterRef::Game(id) => self.get_as(id).await.map(CharacterInfo::Game),
            CharacterRef::Extra(id) => self.get_as(id).await.map(CharacterInfo::Extra),
        }
    }

    /// Every character: game characters first, then extra characters.
    pub async fn iterate_character_infos(
        &self,
    ) -> Result<BoxStream<'static, Result<CharacterInfo>>> {
        let game = self
            .iterate_as::<GameCharacter>()
            .await?
            .map(|c| c.map(CharacterInfo::Game));
        let extra = self
            .iterate_as::<ExtraCharacter>()
            .await?
            .map(|c| c.map(CharacterInfo::Extra));
        Ok(game.chain(extra).boxed())
    }

    /// Sync a kind now, regardless of staleness. Returns the record count.
    pub async fn refresh(&self, kind: EntityKind) -> Result<usize> {
        self.coordinator.refresh(kind).await?.wait().await
    }

    /// Mark a kind stale so the next read resyncs it.
    pub fn invalidate(&self, kind: EntityKind) -> Result<bool> {
        self.coordinator.invalidate(kind)
    }

    pub async fn status(&self, kind: EntityKind) -> KindStatus {
        self.coordinator.status(kind).await
    }

    pub async fn status_all(&self) -> Vec<KindStatus> {
        self.coordinator.status_all().await
    }

    /// Start the periodic background refresh of [`kinds`](Self::kinds).
    pub fn spawn_background(&self) -> BackgroundTask {
        self.coordinator.spawn_background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DumpDirSource;
    use tempfile::TempDir;

    fn write_dump(dir: &std::path::Path, name: &str, body: &str) {
        std::fs::write(dir.join(format!("{}.json", name)), body).unwrap();
    }

    fn open_master(dumps: &TempDir, cache: &TempDir) -> MasterData {
        MasterData::builder(cache.path())
            .source(DumpDirSource::new(dumps.path()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_music_filters() {
        let dumps = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        write_dump(
            dumps.path(),
            "musicVocals",
            r#"[
                {"id": 1, "musicId": 10, "musicVocalType": "sekai"},
                {"id": 2, "musicId": 11, "musicVocalType": "sekai"},
                {"id": 3, "musicId": 10, "musicVocalType": "virtual_singer"}
            ]"#,
        );
        write_dump(
            dumps.path(),
            "musicDifficulties",
            r#"[
                {"id": 5, "musicId": 10, "musicDifficulty": "easy", "playLevel": 5},
                {"id": 6, "musicId": 10, "musicDifficulty": "master", "playLevel": 28}
            ]"#,
        );
        let master = open_master(&dumps, &cache);

        let versions = master.versions_of_music(10).await.unwrap();
        assert_eq!(versions.iter().map(|v| v.id).collect::<Vec<_>>(), vec![1, 3]);

        let lives = master.lives_of_music(10).await.unwrap();
        assert_eq!(lives.len(), 2);
        assert_eq!(lives[1].play_level, 28);
        assert!(master.lives_of_music(99).await.unwrap().is_empty());
        assert!(master.versions_of_music(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_character_dispatch() {
        let dumps = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        write_dump(
            dumps.path(),
            "gameCharacters",
            r#"[{"id": 1, "firstName": "Hoshino", "givenName": "Ichika"}]"#,
        );
        write_dump(dumps.path(), "outsideCharacters", r#"[{"id": 1, "name": "Sho"}]"#);
        let master = open_master(&dumps, &cache);

        let game = master.character_info(CharacterRef::Game(1)).await.unwrap();
        assert_eq!(game.name(), "HoshinoIchika");
        let extra = master.character_info(CharacterRef::Extra(1)).await.unwrap();
        assert_eq!(extra.name(), "Sho");

        let chara: GameCharacter = master.get_as(1).await.unwrap();
        assert_eq!(chara.given_name, "Ichika");
        let missing = master.get_as::<ExtraCharacter>(2).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_character_infos_list_game_then_extra() {
        let dumps = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        write_dump(
            dumps.path(),
            "gameCharacters",
            r#"[
                {"id": 2, "firstName": "Tenma", "givenName": "Saki"},
                {"id": 1, "firstName": "Hoshino", "givenName": "Ichika"}
            ]"#,
        );
        write_dump(dumps.path(), "outsideCharacters", r#"[{"id": 1, "name": "Sho"}]"#);
        let master = open_master(&dumps, &cache);

        let names: Vec<String> = master
            .iterate_character_infos()
            .await
            .unwrap()
            .map(|info| info.unwrap().name())
            .collect()
            .await;
        assert_eq!(names, vec!["TenmaSaki", "HoshinoIchika", "Sho"]);
    }

    #[tokio::test]
    async fn test_stored_cursor_restarts() {
        let dumps = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        write_dump(dumps.path(), "gachas", r#"[{"id": 2, "name": "b"}, {"id": 1, "name": "a"}]"#);
        let master = open_master(&dumps, &cache);
        master.refresh(EntityKind::Gacha).await.unwrap();

        let mut cursor = master.iterate(EntityKind::Gacha).await.unwrap();
        assert!(cursor.is_restartable());
        assert_eq!(cursor.next().await.unwrap().unwrap().id(), 2);
        assert_eq!(cursor.next().await.unwrap().unwrap().id(), 1);
        assert!(cursor.next().await.is_none());

        assert!(cursor.restart());
        let ids: Vec<u64> = cursor.collect().await.unwrap().iter().map(Record::id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_corrupt_record_triggers_resync() {
        let dumps = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        write_dump(dumps.path(), "cards", r#"[{"id": 1, "prefix": "a"}]"#);
        let master = open_master(&dumps, &cache);
        master.refresh(EntityKind::Card).await.unwrap();

        let generation = master
            .store
            .served_generation(EntityKind::Card)
            .unwrap()
            .unwrap();
        let path = cache
            .path()
            .join(EntityKind::Card.as_str())
            .join(&generation.name)
            .join("1.json");
        std::fs::write(&path, b"{not json").unwrap();

        // Reopen so the memory tier does not mask the damaged file.
        let reopened = open_master(&dumps, &cache);
        let record = reopened.get(EntityKind::Card, 1).await.unwrap();
        assert_eq!(record.value()["prefix"], "a");
        if let Some(session) = reopened.coordinator().current_session(EntityKind::Card).await {
            session.wait().await.unwrap();
        }
        assert_ne!(
            reopened.store.served_generation(EntityKind::Card).unwrap().unwrap(),
            generation
        );
    }
}
