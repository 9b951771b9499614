//! Entity kinds: the namespaces of the master data catalog.

use crate::error::MasterDataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A class of master data records.
///
/// Each kind is cached in its own directory and is the unit of staleness
/// tracking and sync locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Card,
    GameCharacter,
    ExtraCharacter,
    Music,
    MusicVocal,
    MusicDifficulty,
    Gacha,
}

impl EntityKind {
    /// Every kind, in a stable order.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Card,
        EntityKind::GameCharacter,
        EntityKind::ExtraCharacter,
        EntityKind::Music,
        EntityKind::MusicVocal,
        EntityKind::MusicDifficulty,
        EntityKind::Gacha,
    ];

    /// Stable identifier, also used as the cache directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Card => "card",
            EntityKind::GameCharacter => "game_character",
            EntityKind::ExtraCharacter => "extra_character",
            EntityKind::Music => "music",
            EntityKind::MusicVocal => "music_vocal",
            EntityKind::MusicDifficulty => "music_difficulty",
            EntityKind::Gacha => "gacha",
        }
    }

    /// Name of the collection in a master database dump.
    pub fn dump_name(&self) -> &'static str {
        match self {
            EntityKind::Card => "cards",
            EntityKind::GameCharacter => "gameCharacters",
            EntityKind::ExtraCharacter => "outsideCharacters",
            EntityKind::Music => "musics",
            EntityKind::MusicVocal => "musicVocals",
            EntityKind::MusicDifficulty => "musicDifficulties",
            EntityKind::Gacha => "gachas",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = MasterDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.dump_name() == s)
            .ok_or_else(|| MasterDataError::UnknownKind(s.to_string()))
    }
}
