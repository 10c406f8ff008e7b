//! # Sync Context
//!
//! Everything a task needs from its surroundings, built once at process
//! start and shared by the manager, the dispatcher and every task.

use crate::cache::{ChangeCacheRegistry, SqliteChangeCacheStore};
use crate::db::{create_pool, DatabaseConfig};
use crate::handlers::HandlerRegistry;
use crate::handlers::HandlerEnv;
use crate::mapper::IdentifierMapper;
use crate::repository::{SqliteSyncResultRepository, SyncResultRepository};
use crate::Result;
use bridge_traits::{Clock, IdMappingService, LocalLibrary, RemoteAccount};
use core_runtime::config::{CoreConfig, SyncSettings};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

pub struct SyncContext {
    pub library: Arc<dyn LocalLibrary>,
    pub remote: Arc<dyn RemoteAccount>,
    pub mapping: Option<Arc<dyn IdMappingService>>,
    pub clock: Arc<dyn Clock>,
    pub settings: SyncSettings,
    pub handlers: HandlerRegistry,
    pub caches: ChangeCacheRegistry,
    pub results: Arc<dyn SyncResultRepository>,
}

impl SyncContext {
    /// Open the database named by `config` and wire the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened or migrated
    pub async fn from_config(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        info!(database = %config.database_path.display(), "Opening sync database");
        let pool = create_pool(DatabaseConfig::new(config.database_path.clone())).await?;
        Self::with_pool(config, pool)
    }

    /// Wire the engine on an existing, migrated pool
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a handler
    /// declares no bindings
    pub fn with_pool(config: CoreConfig, pool: SqlitePool) -> Result<Self> {
        config.validate()?;
        let store = SqliteChangeCacheStore::new(
            pool.clone(),
            config.sync.delta_savings_threshold,
            config.sync.max_delta_chain,
        );

        Ok(Self {
            library: config.local_library,
            remote: config.remote_account,
            mapping: config.id_mapping,
            clock: config.clock,
            handlers: HandlerRegistry::new()?,
            caches: ChangeCacheRegistry::new(Arc::new(store)),
            results: Arc::new(SqliteSyncResultRepository::new(pool)),
            settings: config.sync,
        })
    }

    /// Read-only view handed to handlers
    pub(crate) fn handler_env<'a>(&'a self, mapper: &'a IdentifierMapper) -> HandlerEnv<'a> {
        HandlerEnv {
            settings: &self.settings,
            mapper,
            now: self.clock.now(),
        }
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("settings", &self.settings)
            .field("id_mapping", &self.mapping.is_some())
            .finish_non_exhaustive()
    }
}
