//! # Sync Result Repository
//!
//! Provides database persistence for finished sync tasks.
//!
//! ## Overview
//!
//! Every task, whatever its outcome, leaves one row in `sync_results`. The
//! repository supports:
//! - Recording a finished task
//! - Looking a task up by ID
//! - Listing an account's history (most recent first)
//! - Summarizing the latest run per (account, mode, section)

use crate::result::{SyncResult, SyncStats, SyncStatus, SyncSummary, SyncTaskId};
use crate::types::{SyncMode, SyncTrigger};
use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::{AccountId, SyncDataCategory, SyncMediaType};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for sync result persistence
#[async_trait]
pub trait SyncResultRepository: Send + Sync {
    /// Record a finished task
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn insert(&self, result: &SyncResult) -> Result<()>;

    /// Find a result by task ID
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_id(&self, id: &SyncTaskId) -> Result<Option<SyncResult>>;

    /// Get result history for an account (most recent first)
    ///
    /// # Arguments
    ///
    /// * `account` - The account to get history for
    /// * `limit` - Maximum number of results to return
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn history(&self, account: &AccountId, limit: u32) -> Result<Vec<SyncResult>>;

    /// Get the most recent result for one (account, mode, section)
    ///
    /// A `None` section matches only runs that covered every section.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn latest(
        &self,
        account: &AccountId,
        mode: SyncMode,
        section: Option<&str>,
    ) -> Result<Option<SyncResult>>;

    /// Status line for one (account, mode, section)
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn summary(
        &self,
        account: &AccountId,
        mode: SyncMode,
        section: Option<&str>,
    ) -> Result<Option<SyncSummary>> {
        Ok(self
            .latest(account, mode, section)
            .await?
            .map(|result| result.summary()))
    }
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of SyncResultRepository
pub struct SqliteSyncResultRepository {
    pool: SqlitePool,
}

impl SqliteSyncResultRepository {
    /// Create a new SQLite sync result repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a sync result
#[derive(Debug, FromRow)]
struct SyncResultRow {
    id: String,
    account_id: String,
    mode: String,
    categories: i64,
    media: i64,
    section_id: Option<String>,
    trigger: String,
    status: String,
    success: bool,
    started_at: i64,
    finished_at: i64,
    exceptions: String,
    stats: String,
}

fn from_millis(column: &str, millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| SyncError::Database(format!("Invalid {column}: {millis}")))
}

impl TryFrom<SyncResultRow> for SyncResult {
    type Error = SyncError;

    fn try_from(row: SyncResultRow) -> Result<Self> {
        let categories = SyncDataCategory::from_bits(row.categories as u32).ok_or_else(|| {
            SyncError::Database(format!("Invalid categories: {}", row.categories))
        })?;
        let media = SyncMediaType::from_bits(row.media as u32)
            .ok_or_else(|| SyncError::Database(format!("Invalid media: {}", row.media)))?;

        let mode: SyncMode = row.mode.parse()?;
        let trigger: SyncTrigger = row.trigger.parse()?;
        let status: SyncStatus = row.status.parse()?;
        let exceptions: Vec<String> = serde_json::from_str(&row.exceptions)?;
        let stats: SyncStats = serde_json::from_str(&row.stats)?;

        Ok(SyncResult {
            id: SyncTaskId::from_string(&row.id)?,
            account: AccountId::new(row.account_id),
            mode,
            categories,
            media,
            section: row.section_id,
            trigger,
            status,
            success: row.success,
            started_at: from_millis("started_at", row.started_at)?,
            finished_at: from_millis("finished_at", row.finished_at)?,
            exceptions,
            stats,
        })
    }
}

#[async_trait]
impl SyncResultRepository for SqliteSyncResultRepository {
    async fn insert(&self, result: &SyncResult) -> Result<()> {
        let exceptions = serde_json::to_string(&result.exceptions)?;
        let stats = serde_json::to_string(&result.stats)?;

        sqlx::query(
            r#"
            INSERT INTO sync_results (
                id, account_id, mode, categories, media, section_id,
                trigger, status, success, started_at, finished_at,
                exceptions, stats
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.id.as_str())
        .bind(result.account.as_str())
        .bind(result.mode.as_str())
        .bind(result.categories.bits() as i64)
        .bind(result.media.bits() as i64)
        .bind(&result.section)
        .bind(result.trigger.as_str())
        .bind(result.status.as_str())
        .bind(result.success)
        .bind(result.started_at.timestamp_millis())
        .bind(result.finished_at.timestamp_millis())
        .bind(exceptions)
        .bind(stats)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: &SyncTaskId) -> Result<Option<SyncResult>> {
        let row = sqlx::query_as::<_, SyncResultRow>(
            r#"
            SELECT * FROM sync_results WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncResult::try_from).transpose()
    }

    async fn history(&self, account: &AccountId, limit: u32) -> Result<Vec<SyncResult>> {
        let rows = sqlx::query_as::<_, SyncResultRow>(
            r#"
            SELECT * FROM sync_results
            WHERE account_id = ?
            ORDER BY finished_at DESC
            LIMIT ?
            "#,
        )
        .bind(account.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter().map(SyncResult::try_from).collect()
    }

    async fn latest(
        &self,
        account: &AccountId,
        mode: SyncMode,
        section: Option<&str>,
    ) -> Result<Option<SyncResult>> {
        let row = sqlx::query_as::<_, SyncResultRow>(
            r#"
            SELECT * FROM sync_results
            WHERE account_id = ? AND mode = ? AND section_id IS ?
            ORDER BY finished_at DESC
            LIMIT 1
            "#,
        )
        .bind(account.as_str())
        .bind(mode.as_str())
        .bind(section)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncResult::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use chrono::Duration;

    fn result_at(
        account: &str,
        mode: SyncMode,
        section: Option<&str>,
        finished_at: DateTime<Utc>,
        status: SyncStatus,
    ) -> SyncResult {
        SyncResult {
            id: SyncTaskId::new(),
            account: AccountId::new(account),
            mode,
            categories: SyncDataCategory::RATINGS | SyncDataCategory::WATCHED,
            media: SyncMediaType::MOVIES | SyncMediaType::SHOWS,
            section: section.map(str::to_string),
            trigger: SyncTrigger::Scheduled,
            status,
            success: status == SyncStatus::Completed,
            started_at: finished_at - Duration::seconds(3),
            finished_at,
            exceptions: Vec::new(),
            stats: SyncStats::default(),
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find_by_id() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteSyncResultRepository::new(pool);

        let mut result = result_at("acc", SyncMode::Push, None, base_time(), SyncStatus::Failed);
        result.exceptions.push("Bridge error: Operation failed: timeout".to_string());
        result.stats.items_processed = 12;
        result.stats.batches_failed = 1;
        repo.insert(&result).await.unwrap();

        let found = repo.find_by_id(&result.id).await.unwrap().unwrap();
        assert_eq!(found, result);
        assert!(repo.find_by_id(&SyncTaskId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteSyncResultRepository::new(pool);

        for minutes in [0, 20, 10] {
            let at = base_time() + Duration::minutes(minutes);
            repo.insert(&result_at("acc", SyncMode::Pull, None, at, SyncStatus::Completed))
                .await
                .unwrap();
        }
        repo.insert(&result_at("other", SyncMode::Pull, None, base_time(), SyncStatus::Completed))
            .await
            .unwrap();

        let history = repo.history(&AccountId::new("acc"), 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].finished_at, base_time() + Duration::minutes(20));
        assert_eq!(history[1].finished_at, base_time() + Duration::minutes(10));
    }

    #[tokio::test]
    async fn test_summary_matches_mode_and_section() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteSyncResultRepository::new(pool);
        let account = AccountId::new("acc");

        repo.insert(&result_at("acc", SyncMode::FastPull, None, base_time(), SyncStatus::Completed))
            .await
            .unwrap();
        repo.insert(&result_at(
            "acc",
            SyncMode::FastPull,
            Some("2"),
            base_time() + Duration::minutes(5),
            SyncStatus::Cancelled,
        ))
        .await
        .unwrap();

        let all = repo
            .summary(&account, SyncMode::FastPull, None)
            .await
            .unwrap()
            .unwrap();
        assert!(all.last_success);
        assert_eq!(all.last_run, base_time());
        assert!((all.last_elapsed_secs - 3.0).abs() < f64::EPSILON);

        let section = repo
            .summary(&account, SyncMode::FastPull, Some("2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(section.last_status, SyncStatus::Cancelled);
        assert!(!section.last_success);

        assert!(repo
            .summary(&account, SyncMode::Push, None)
            .await
            .unwrap()
            .is_none());
    }
}
