//! # Host Bridge Traits
//!
//! Boundary contracts between the sync engine and the services it reconciles.
//!
//! ## Overview
//!
//! The engine never talks to a media server or a tracking service directly.
//! Host applications implement the traits below and inject them through
//! `core_runtime::config::CoreConfig`. This crate also holds the media model
//! shared by both sides: flag sets, identity keys and remote snapshots.
//!
//! ## Traits
//!
//! ### Catalog Services
//! - [`LocalLibrary`](library::LocalLibrary) - Sections, mapped items and local state writes
//! - [`RemoteAccount`](remote::RemoteAccount) - Activity timestamps, collections and batched writes
//! - [`IdMappingService`](mapping::IdMappingService) - Cross-service identifier translation
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The configuration layer fails fast with a descriptive error when a
//! required bridge is missing:
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/sync/sync.db")
//!     .build();
//! // Err(CapabilityMissing { capability: "LocalLibrary", .. })
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type.
//! Implementations should convert transport errors into it and keep the
//! offending identifier in the message; the engine logs failures in
//! aggregate, so the message is often the only trace left of one item.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` because the engine runs tasks on
//! a background worker.

pub mod error;
pub mod library;
pub mod mapping;
pub mod media;
pub mod remote;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use library::{LibrarySection, LocalItem, LocalLibrary, LocalUpdate, MediaAttributes};
pub use mapping::{IdMappingService, RemoteMatch};
pub use media::{
    AccountId, CollectionKey, IdentityKey, PrimaryKey, SyncDataCategory, SyncMediaType,
};
pub use remote::{
    ActivityMap, ArtifactOp, ChangedCollection, RemoteAccount, RemoteEpisode, RemoteItem,
    RemoteProperties, RemoteRating, RemoteSeason, RemoteSnapshot, WriteResult,
};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
