//! Typed views of master data records.
//!
//! Each model is bound to exactly one [`EntityKind`] through [`MasterRecord`].
//! Models mirror the upstream camelCase JSON and only name the fields the
//! engine's consumers read; unknown fields are ignored when decoding.

use crate::kind::EntityKind;
use crate::source::VersionToken;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A model stored under a fixed entity kind.
pub trait MasterRecord: DeserializeOwned + Send + 'static {
    const KIND: EntityKind;

    fn id(&self) -> u64;
}

macro_rules! master_record {
    ($model:ty, $kind:expr) => {
        impl MasterRecord for $model {
            const KIND: EntityKind = $kind;

            fn id(&self) -> u64 {
                self.id
            }
        }
    };
}

/// Convert an upstream millisecond timestamp.
fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardParameter {
    pub card_level: u32,
    pub card_parameter_type: String,
    pub power: u32,
}

/// A collectible card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardInfo {
    pub id: u64,
    pub character_id: u64,
    pub card_rarity_type: String,
    pub attr: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub assetbundle_name: String,
    #[serde(default)]
    pub release_at: i64,
    #[serde(default)]
    pub special_training_power1_bonus_fixed: u32,
    #[serde(default)]
    pub card_parameters: Vec<CardParameter>,
}

impl CardInfo {
    pub fn released(&self) -> Option<DateTime<Utc>> {
        millis_to_datetime(self.release_at)
    }

    /// Whether the card has a trained form.
    pub fn can_special_train(&self) -> bool {
        self.special_training_power1_bonus_fixed > 0
    }
}

master_record!(CardInfo, EntityKind::Card);

/// One of the main game characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCharacter {
    pub id: u64,
    #[serde(default)]
    pub first_name: Option<String>,
    pub given_name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub unit: String,
}

impl GameCharacter {
    /// Full display name, family name first.
    pub fn name(&self) -> String {
        format!("{}{}", self.first_name.as_deref().unwrap_or(""), self.given_name)
    }
}

master_record!(GameCharacter, EntityKind::GameCharacter);

/// A supporting character outside the main cast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraCharacter {
    pub id: u64,
    pub name: String,
}

master_record!(ExtraCharacter, EntityKind::ExtraCharacter);

/// A music track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicInfo {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub lyricist: String,
    #[serde(default)]
    pub composer: String,
    #[serde(default)]
    pub arranger: String,
    #[serde(default)]
    pub assetbundle_name: String,
    #[serde(default)]
    pub published_at: i64,
    #[serde(default)]
    pub released_at: i64,
}

impl MusicInfo {
    pub fn released(&self) -> Option<DateTime<Utc>> {
        millis_to_datetime(self.released_at)
    }
}

master_record!(MusicInfo, EntityKind::Music);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocalCharacter {
    pub character_type: String,
    pub character_id: u64,
}

/// One vocal version of a music track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicVersion {
    pub id: u64,
    pub music_id: u64,
    pub music_vocal_type: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub characters: Vec<VocalCharacter>,
    #[serde(default)]
    pub assetbundle_name: String,
}

impl MusicVersion {
    /// Ids of the characters singing this version.
    pub fn singers(&self) -> Vec<u64> {
        self.characters.iter().map(|c| c.character_id).collect()
    }
}

master_record!(MusicVersion, EntityKind::MusicVocal);

/// One playable difficulty of a music track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveInfo {
    pub id: u64,
    pub music_id: u64,
    pub music_difficulty: String,
    pub play_level: u32,
    #[serde(default)]
    pub total_note_count: u32,
}

master_record!(LiveInfo, EntityKind::MusicDifficulty);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GachaRarityRate {
    pub card_rarity_type: String,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GachaDetail {
    pub card_id: u64,
    pub weight: u32,
    #[serde(default)]
    pub is_wish: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GachaPickup {
    pub card_id: u64,
}

/// A gacha banner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gacha {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub gacha_type: String,
    #[serde(default)]
    pub assetbundle_name: String,
    #[serde(default)]
    pub start_at: i64,
    #[serde(default)]
    pub end_at: i64,
    #[serde(default)]
    pub gacha_card_rarity_rates: Vec<GachaRarityRate>,
    #[serde(default)]
    pub gacha_details: Vec<GachaDetail>,
    #[serde(default)]
    pub gacha_pickups: Vec<GachaPickup>,
}

impl Gacha {
    pub fn pickup_cards(&self) -> Vec<u64> {
        self.gacha_pickups.iter().map(|p| p.card_id).collect()
    }

    pub fn wish_cards(&self) -> Vec<u64> {
        self.gacha_details
            .iter()
            .filter(|d| d.is_wish)
            .map(|d| d.card_id)
            .collect()
    }

    /// Whether the banner runs at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let now = now.timestamp_millis();
        self.start_at <= now && now < self.end_at
    }
}

master_record!(Gacha, EntityKind::Gacha);

/// Upstream build and data versions.
///
/// Not a cached kind: sources read it to derive the version token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemInfo {
    pub system_profile: Option<String>,
    pub app_version: Option<String>,
    pub multi_play_version: Option<String>,
    pub data_version: Option<String>,
    pub asset_version: Option<String>,
    pub app_hash: Option<String>,
    pub asset_hash: Option<String>,
    pub datetime: Option<i64>,
}

impl SystemInfo {
    /// Token identifying the published data set.
    ///
    /// The asset version moves with every master data update; the data
    /// version is used when no asset version is published.
    pub fn version_token(&self) -> Option<VersionToken> {
        self.asset_version
            .clone()
            .or_else(|| self.data_version.clone())
            .map(VersionToken::new)
    }

    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.datetime.and_then(millis_to_datetime)
    }
}

/// Reference to either kind of character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CharacterRef {
    Game(u64),
    Extra(u64),
}

impl CharacterRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            CharacterRef::Game(_) => EntityKind::GameCharacter,
            CharacterRef::Extra(_) => EntityKind::ExtraCharacter,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            CharacterRef::Game(id) | CharacterRef::Extra(id) => *id,
        }
    }
}

/// A resolved character of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum CharacterInfo {
    Game(GameCharacter),
    Extra(ExtraCharacter),
}

impl CharacterInfo {
    pub fn name(&self) -> String {
        match self {
            CharacterInfo::Game(c) => c.name(),
            CharacterInfo::Extra(c) => c.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use serde_json::json;

    #[test]
    fn test_card_decodes_upstream_shape() {
        let record = Record::new(json!({
            "id": 1,
            "seq": 1010001,
            "characterId": 1,
            "cardRarityType": "rarity_1",
            "attr": "cool",
            "prefix": "Ichika",
            "assetbundleName": "res001_no001",
            "releaseAt": 1601438400000i64,
            "specialTrainingPower1BonusFixed": 0,
            "cardParameters": [
                {"id": 1, "cardId": 1, "cardLevel": 1, "cardParameterType": "param1", "power": 1200}
            ]
        }))
        .unwrap();

        let card: CardInfo = record.to_model().unwrap();
        assert_eq!(card.id(), 1);
        assert_eq!(card.card_parameters[0].power, 1200);
        assert!(!card.can_special_train());
        assert_eq!(card.released().unwrap().timestamp(), 1_601_438_400);
    }

    #[test]
    fn test_character_name() {
        let chara = GameCharacter {
            id: 1,
            first_name: Some("Hoshino".to_string()),
            given_name: "Ichika".to_string(),
            gender: "female".to_string(),
            height: 160,
            unit: "light_sound".to_string(),
        };
        assert_eq!(chara.name(), "HoshinoIchika");

        let unnamed = GameCharacter {
            first_name: None,
            given_name: "Miku".to_string(),
            ..chara
        };
        assert_eq!(CharacterInfo::Game(unnamed).name(), "Miku");
    }

    #[test]
    fn test_kinds_are_bound() {
        assert_eq!(CardInfo::KIND, EntityKind::Card);
        assert_eq!(ExtraCharacter::KIND, EntityKind::ExtraCharacter);
        assert_eq!(MusicVersion::KIND, EntityKind::MusicVocal);
        assert_eq!(LiveInfo::KIND, EntityKind::MusicDifficulty);
        assert_eq!(CharacterRef::Extra(4).kind(), EntityKind::ExtraCharacter);
    }

    #[test]
    fn test_system_info_token_fallback() {
        let info: SystemInfo = serde_json::from_value(json!({"dataVersion": "3.1.0.10"})).unwrap();
        assert_eq!(info.version_token(), Some(VersionToken::new("3.1.0.10")));

        let info: SystemInfo = serde_json::from_value(json!({
            "assetVersion": "3.1.0.20",
            "dataVersion": "3.1.0.10"
        }))
        .unwrap();
        assert_eq!(info.version_token(), Some(VersionToken::new("3.1.0.20")));
        assert_eq!(SystemInfo::default().version_token(), None);
    }

    #[test]
    fn test_gacha_window() {
        let gacha = Gacha {
            id: 1,
            name: "Opening".to_string(),
            gacha_type: "ceil".to_string(),
            assetbundle_name: String::new(),
            start_at: 1_000,
            end_at: 2_000,
            gacha_card_rarity_rates: Vec::new(),
            gacha_details: vec![
                GachaDetail { card_id: 7, weight: 1, is_wish: true },
                GachaDetail { card_id: 8, weight: 1, is_wish: false },
            ],
            gacha_pickups: vec![GachaPickup { card_id: 8 }],
        };
        assert_eq!(gacha.wish_cards(), vec![7]);
        assert_eq!(gacha.pickup_cards(), vec![8]);
        assert!(gacha.is_open_at(Utc.timestamp_millis_opt(1_500).unwrap()));
        assert!(!gacha.is_open_at(Utc.timestamp_millis_opt(2_000).unwrap()));
    }
}
