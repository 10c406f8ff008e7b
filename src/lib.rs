//! Workspace facade crate.
//!
//! Host applications depend on `msc-workspace` to pull in the sync engine,
//! its runtime configuration and the bridge contracts they have to implement,
//! without wiring each workspace crate individually.

pub use bridge_traits as bridge;
pub use core_runtime as runtime;
pub use core_sync as sync;

pub use core_runtime::config::{CoreConfig, SyncSettings};
pub use core_sync::{SyncManager, SyncMode, SyncRequest};
