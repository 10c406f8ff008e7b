//! # Core Configuration Module
//!
//! Provides configuration management for the sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance holding every bridge and setting the engine needs. Validation is
//! fail-fast: a missing bridge or an out-of-range setting is reported when the
//! configuration is built, never halfway through a sync run.
//!
//! ## Required Dependencies
//!
//! - `LocalLibrary` - Source of library items and target of pull writes
//! - `RemoteAccount` - Source of remote collections and target of push writes
//!
//! ## Optional Dependencies
//!
//! - `IdMappingService` - Translates identifiers the remote service does not understand
//! - `Clock` - Time source (default: `SystemClock`)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, SyncSettings};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/media-sync/sync.db")
//!     .local_library(Arc::new(MyLibrary::new()))
//!     .remote_account(Arc::new(MyRemote::new()))
//!     .sync_settings(SyncSettings::default().with_clean_collection(true))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, IdMappingService, LocalLibrary, RemoteAccount, SystemClock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Tunables of the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Capacity of the manager's request channel
    pub queue_capacity: usize,

    /// Maximum number of root records per batched remote write
    pub batch_size: usize,

    /// Minimum forward distance before remote playback progress overwrites
    /// the local view offset
    pub progress_floor_secs: u64,

    /// Remove items from the remote collection when they are absent locally
    pub clean_collection: bool,

    /// Minimum relative size saving for a change cache revision to be
    /// written as a delta instead of a full snapshot
    pub delta_savings_threshold: f64,

    /// Consecutive delta revisions after which a full snapshot is forced
    pub max_delta_chain: u32,

    /// Weight of the newest sample in the smoothed progress rate
    pub progress_smoothing: f64,

    /// Local playlist mirroring the remote personal watchlist
    pub watchlist_playlist: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 4,
            batch_size: 100,
            progress_floor_secs: 60,
            clean_collection: false,
            delta_savings_threshold: 0.25,
            max_delta_chain: 8,
            progress_smoothing: 0.2,
            watchlist_playlist: "Watchlist".to_string(),
        }
    }
}

impl SyncSettings {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_progress_floor_secs(mut self, secs: u64) -> Self {
        self.progress_floor_secs = secs;
        self
    }

    pub fn with_clean_collection(mut self, enabled: bool) -> Self {
        self.clean_collection = enabled;
        self
    }

    pub fn with_delta_savings_threshold(mut self, threshold: f64) -> Self {
        self.delta_savings_threshold = threshold;
        self
    }

    pub fn with_max_delta_chain(mut self, chain: u32) -> Self {
        self.max_delta_chain = chain;
        self
    }

    pub fn with_progress_smoothing(mut self, factor: f64) -> Self {
        self.progress_smoothing = factor;
        self
    }

    pub fn with_watchlist_playlist(mut self, name: impl Into<String>) -> Self {
        self.watchlist_playlist = name.into();
        self
    }

    /// Validates ranges and returns the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::InvalidSetting {
                name: "queue_capacity",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.batch_size == 0 {
            return Err(Error::InvalidSetting {
                name: "batch_size",
                reason: "must be greater than 0".to_string(),
            });
        }

        if !(0.0..1.0).contains(&self.delta_savings_threshold) {
            return Err(Error::InvalidSetting {
                name: "delta_savings_threshold",
                reason: format!("{} is outside [0, 1)", self.delta_savings_threshold),
            });
        }

        if !(self.progress_smoothing > 0.0 && self.progress_smoothing <= 1.0) {
            return Err(Error::InvalidSetting {
                name: "progress_smoothing",
                reason: format!("{} is outside (0, 1]", self.progress_smoothing),
            });
        }

        if self.watchlist_playlist.trim().is_empty() {
            return Err(Error::InvalidSetting {
                name: "watchlist_playlist",
                reason: "cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Core configuration for the sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database holding the result log and change cache
    pub database_path: PathBuf,

    /// Local library bridge (required)
    pub local_library: Arc<dyn LocalLibrary>,

    /// Remote account bridge (required)
    pub remote_account: Arc<dyn RemoteAccount>,

    /// Identifier mapping bridge (optional)
    pub id_mapping: Option<Arc<dyn IdMappingService>>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Engine tunables
    pub sync: SyncSettings,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("local_library", &"LocalLibrary { ... }")
            .field("remote_account", &"RemoteAccount { ... }")
            .field(
                "id_mapping",
                &self.id_mapping.as_ref().map(|_| "IdMappingService { ... }"),
            )
            .field("sync", &self.sync)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Sync settings are within range
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        self.sync.validate()
    }
}

fn local_library_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "LocalLibrary".to_string(),
        message: "A LocalLibrary implementation is required to read library items \
                 and apply pulled state. Inject the media server adapter with \
                 .local_library()."
            .to_string(),
    }
}

fn remote_account_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "RemoteAccount".to_string(),
        message: "A RemoteAccount implementation is required to fetch collections \
                 and send batched writes. Inject the tracking service client with \
                 .remote_account()."
            .to_string(),
    }
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    local_library: Option<Arc<dyn LocalLibrary>>,
    remote_account: Option<Arc<dyn RemoteAccount>>,
    id_mapping: Option<Arc<dyn IdMappingService>>,
    clock: Option<Arc<dyn Clock>>,
    sync: Option<SyncSettings>,
}

impl CoreConfigBuilder {
    /// Sets the database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/var/lib/media-sync/sync.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the local library bridge.
    pub fn local_library(mut self, library: Arc<dyn LocalLibrary>) -> Self {
        self.local_library = Some(library);
        self
    }

    /// Sets the remote account bridge.
    pub fn remote_account(mut self, remote: Arc<dyn RemoteAccount>) -> Self {
        self.remote_account = Some(remote);
        self
    }

    /// Sets the identifier mapping bridge.
    ///
    /// Without it, items identified only by mapped agents (`anidb`, `mal`,
    /// `anilist`) are counted as unsupported.
    pub fn id_mapping(mut self, mapping: Arc<dyn IdMappingService>) -> Self {
        self.id_mapping = Some(mapping);
        self
    }

    /// Overrides the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Overrides the engine tunables.
    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.sync = Some(settings);
        self
    }

    /// Builds the `CoreConfig`, validating required fields.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The database path is not set
    /// - A required bridge is missing
    /// - A sync setting is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let local_library = self.local_library.ok_or_else(local_library_missing_error)?;
        let remote_account = self.remote_account.ok_or_else(remote_account_missing_error)?;

        let config = CoreConfig {
            database_path,
            local_library,
            remote_account,
            id_mapping: self.id_mapping,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sync: self.sync.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        AccountId, ActivityMap, ArtifactOp, CollectionKey, LibrarySection, LocalItem,
        LocalUpdate, RemoteSnapshot, SyncDataCategory, SyncMediaType, WriteResult,
    };

    struct NullLibrary;

    #[async_trait]
    impl LocalLibrary for NullLibrary {
        async fn list_sections(&self, _media: SyncMediaType) -> BridgeResult<Vec<LibrarySection>> {
            Ok(Vec::new())
        }

        async fn mapped_items(
            &self,
            _sections: &[LibrarySection],
            _account_filter: Option<&str>,
        ) -> BridgeResult<Vec<LocalItem>> {
            Ok(Vec::new())
        }

        async fn update_local_state(&self, _local_id: &str, _update: LocalUpdate) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct NullRemote;

    #[async_trait]
    impl RemoteAccount for NullRemote {
        async fn last_activity(&self, _account: &AccountId) -> BridgeResult<ActivityMap> {
            Ok(ActivityMap::new())
        }

        async fn fetch_collection(
            &self,
            _account: &AccountId,
            _key: CollectionKey,
        ) -> BridgeResult<RemoteSnapshot> {
            Ok(RemoteSnapshot::new())
        }

        async fn batch_write(
            &self,
            _account: &AccountId,
            _category: SyncDataCategory,
            _op: ArtifactOp,
            _payload: serde_json::Value,
        ) -> BridgeResult<WriteResult> {
            Ok(WriteResult::default())
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .database_path("/db/sync.db")
            .local_library(Arc::new(NullLibrary))
            .remote_account(Arc::new(NullRemote))
    }

    #[test]
    fn test_builder_requires_database_path() {
        let result = CoreConfig::builder()
            .local_library(Arc::new(NullLibrary))
            .remote_account(Arc::new(NullRemote))
            .build();

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Database path is required"));
    }

    #[test]
    fn test_builder_requires_local_library() {
        let result = CoreConfig::builder()
            .database_path("/db/sync.db")
            .remote_account(Arc::new(NullRemote))
            .build();

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("LocalLibrary"));
    }

    #[test]
    fn test_builder_requires_remote_account() {
        let result = CoreConfig::builder()
            .database_path("/db/sync.db")
            .local_library(Arc::new(NullLibrary))
            .build();

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("RemoteAccount"));
    }

    #[test]
    fn test_builder_with_all_required_fields() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.database_path, PathBuf::from("/db/sync.db"));
        assert!(config.id_mapping.is_none());
        assert_eq!(config.sync, SyncSettings::default());
    }

    #[test]
    fn test_default_settings() {
        let settings = SyncSettings::default();
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.progress_floor_secs, 60);
        assert!(!settings.clean_collection);
        assert!((settings.delta_savings_threshold - 0.25).abs() < f64::EPSILON);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let result = complete_builder()
            .sync_settings(SyncSettings::default().with_batch_size(0))
            .build();

        assert!(result.unwrap_err().to_string().contains("batch_size"));
    }

    #[test]
    fn test_validate_rejects_zero_queue_capacity() {
        let result = complete_builder()
            .sync_settings(SyncSettings::default().with_queue_capacity(0))
            .build();

        assert!(result.unwrap_err().to_string().contains("queue_capacity"));
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let settings = SyncSettings::default().with_delta_savings_threshold(1.0);
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidSetting {
                name: "delta_savings_threshold",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_smoothing() {
        let settings = SyncSettings::default().with_progress_smoothing(0.0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_watchlist_playlist() {
        let settings = SyncSettings::default().with_watchlist_playlist("  ");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = complete_builder()
            .sync_settings(SyncSettings::default().with_clean_collection(true))
            .build()
            .unwrap();

        let cloned = config.clone();
        assert_eq!(cloned.database_path, config.database_path);
        assert!(cloned.sync.clean_collection);
    }
}
