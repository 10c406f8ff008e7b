//! # Sync Engine
//!
//! Two-way synchronization of watch state between a local media library and
//! a remote account service.
//!
//! ## Overview
//!
//! A [`SyncManager`] owns a single worker that runs one [`SyncTask`](task::SyncTask)
//! at a time. Each task runs in one of four modes:
//!
//! - **Full**: pull against fresh snapshots, then push
//! - **Pull**: bring remote state into the local library
//! - **FastPull**: pull only what the remote change feed reports
//! - **Push**: send local state to the remote account
//!
//! ## Components
//!
//! - **Identifier Mapper** (`mapper`): pairs local items with remote records
//! - **Change Cache** (`cache`): versioned remote snapshots with delta storage
//! - **Diff Engine** (`diff`): structural diff of two remote snapshots
//! - **Handler Registry** (`handlers`): per category and media type actions
//! - **Artifact Collector** (`artifacts`): batched remote mutations
//! - **Progress Tracker** (`progress`): grouped progress with ETA
//! - **Mode Dispatcher** (`modes`): the algorithm of each sync mode
//! - **Sync Manager** (`manager`): queue, exclusion and result log

pub mod artifacts;
pub mod cache;
pub mod context;
pub mod db;
pub mod diff;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod mapper;
pub mod modes;
pub mod progress;
pub mod repository;
pub mod result;
pub mod task;
pub mod types;

pub use artifacts::{ArtifactCollector, ArtifactMutation, SendReport};
pub use cache::{ChangeCache, ChangeCacheRegistry, ChangeFeed};
pub use context::SyncContext;
pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{QueueError, Result, SyncError};
pub use handlers::{Effect, HandlerRegistry, MediaHandler};
pub use manager::{SyncManager, SyncRequest, TaskHandle};
pub use mapper::{IdentifierMapper, MappedItem};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use repository::{SqliteSyncResultRepository, SyncResultRepository};
pub use result::{SyncResult, SyncStats, SyncStatus, SyncSummary, SyncTaskId};
pub use types::{ItemPath, Priority, SyncMode, SyncTrigger, SyncValue};
