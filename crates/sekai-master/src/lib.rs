//! Sekai Master - persistent read-through cache for game master data.
//!
//! Master data (cards, characters, music, difficulties, gachas) lives behind
//! a slow, rate-limited upstream. This crate keeps a local copy per entity
//! kind on disk, decides when a kind is stale, refreshes it with at most one
//! sync per kind at a time, and lets readers consume records while a refresh
//! is still streaming in.
//!
//! # Example
//!
//! ```rust,ignore
//! use sekai_master::{DumpDirSource, EntityKind, MasterData};
//! use sekai_master::models::CardInfo;
//!
//! #[tokio::main]
//! async fn main() -> sekai_master::Result<()> {
//!     let master = MasterData::builder("/var/cache/sekai-master")
//!         .source(DumpDirSource::new("/srv/master-dumps"))
//!         .build()?;
//!     let background = master.spawn_background();
//!
//!     let card: CardInfo = master.get_as(1).await?;
//!     println!("{} ({})", card.prefix, card.card_rarity_type);
//!
//!     background.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod kind;
pub mod master;
pub mod models;
pub mod record;
pub mod source;
pub mod store;
pub mod sync;

pub use cancel::CancellationToken;
pub use config::{MasterCacheConfig, MasterDataDefaults, RetryPolicy};
pub use error::{MasterDataError, Result};
pub use kind::EntityKind;
pub use master::{MasterData, MasterDataBuilder, RecordCursor};
pub use record::Record;
pub use source::{DumpDirSource, DynMasterDataSource, MasterDataSource, RecordStream, VersionToken};
pub use store::{
    DynRecordStore, FsRecordStore, Generation, GenerationLease, RecordStore, SyncMarker,
};
pub use sync::{
    BackgroundTask, KindState, KindStatus, SessionState, SessionSubscriber, SyncCoordinator,
    SyncHandle, SyncSession,
};
