//! # Sync Task
//!
//! State of one run: the request it serves, the identifier mapper, the
//! artifact collector, the progress tracker and the counters that end up in
//! the result log.
//!
//! The task is also the effect executor. Handlers hand it [`Effect`]s and the
//! task applies them after checking the running mode may perform them:
//!
//! | Mode | Local writes | Remote writes |
//! |------|--------------|---------------|
//! | `Pull`, `FastPull` | yes | no |
//! | `Push` | no | yes |
//! | `Full` | yes | yes |
//!
//! A violation aborts the task with [`SyncError::ModeViolation`].

use crate::artifacts::ArtifactCollector;
use crate::handlers::Effect;
use crate::manager::SyncRequest;
use crate::mapper::IdentifierMapper;
use crate::progress::ProgressTracker;
use crate::result::{SyncResult, SyncStats, SyncStatus, SyncTaskId};
use crate::types::SyncMode;
use crate::{Result, SyncError};
use bridge_traits::{AccountId, CollectionKey, LocalLibrary, RemoteAccount};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct SyncTask {
    id: SyncTaskId,
    request: SyncRequest,
    started_at: DateTime<Utc>,
    pub(crate) mapper: IdentifierMapper,
    artifacts: ArtifactCollector,
    progress: ProgressTracker,
    cancellation: CancellationToken,
    exceptions: Vec<String>,
    stats: SyncStats,
    /// Item failures since the last phase boundary
    phase_failures: u64,
    local_loaded: bool,
    /// The unsupported identifier tally has been logged
    unsupported_logged: bool,
}

impl SyncTask {
    pub fn new(
        id: SyncTaskId,
        request: SyncRequest,
        started_at: DateTime<Utc>,
        batch_size: usize,
        progress: ProgressTracker,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            id,
            request,
            started_at,
            mapper: IdentifierMapper::new(),
            artifacts: ArtifactCollector::new(batch_size),
            progress,
            cancellation,
            exceptions: Vec::new(),
            stats: SyncStats::default(),
            phase_failures: 0,
            local_loaded: false,
            unsupported_logged: false,
        }
    }

    pub fn id(&self) -> &SyncTaskId {
        &self.id
    }

    pub fn request(&self) -> &SyncRequest {
        &self.request
    }

    pub fn mode(&self) -> SyncMode {
        self.request.mode
    }

    pub fn account(&self) -> &AccountId {
        &self.request.account
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn artifacts(&self) -> &ArtifactCollector {
        &self.artifacts
    }

    /// Cancellation observation point
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` once the task's token has been cancelled
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn local_loaded(&self) -> bool {
        self.local_loaded
    }

    /// Record the outcome of mapping the local library
    pub(crate) fn mark_local_loaded(&mut self) {
        self.local_loaded = true;
        self.stats.items_unmatched = self.mapper.unmatched_count();
        self.stats.unsupported_ids = self.mapper.unsupported_count();
        if !self.unsupported_logged {
            self.mapper.log_unsupported();
            self.unsupported_logged = true;
        }
    }

    /// Drop the mapped local state so the next phase reads the library again
    pub(crate) fn reset_local(&mut self) {
        self.mapper = IdentifierMapper::new();
        self.local_loaded = false;
    }

    pub(crate) fn item_processed(&mut self) {
        self.stats.items_processed += 1;
    }

    /// Count an item that could not be processed; logged in aggregate at the phase end
    pub(crate) fn item_failed(&mut self, error: &SyncError) {
        debug!(error = %error, "Item skipped");
        self.stats.items_failed += 1;
        self.phase_failures += 1;
    }

    pub(crate) fn collection_skipped(&mut self, key: CollectionKey, reason: impl std::fmt::Display) {
        warn!(collection = %key, reason = %reason, "Skipping remote collection");
        self.stats.collections_skipped += 1;
    }

    /// Close a phase: log its failures once, then checkpoint
    pub(crate) fn end_phase(&mut self, phase: &str) -> Result<()> {
        if self.phase_failures > 0 {
            warn!(phase, failed = self.phase_failures, "Items failed during phase");
            self.phase_failures = 0;
        }
        debug!(phase, "Phase finished");
        self.checkpoint()
    }

    // ========================================================================
    // Effect Execution
    // ========================================================================

    /// Apply handler effects under `mode`.
    ///
    /// A failed local write only skips that item.
    ///
    /// # Errors
    ///
    /// Returns `ModeViolation` when an effect is not permitted in `mode`
    pub async fn apply(
        &mut self,
        mode: SyncMode,
        effects: Vec<Effect>,
        library: &dyn LocalLibrary,
    ) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::Local { local_id, update } => {
                    if !mode.writes_local() {
                        return Err(SyncError::ModeViolation {
                            mode: mode.as_str(),
                            operation: "write to the local library",
                        });
                    }
                    debug!(local_id = %local_id, update = update.name(), "Updating local item");
                    match library.update_local_state(&local_id, update).await {
                        Ok(()) => self.stats.local_updates += 1,
                        Err(e) => self.item_failed(&SyncError::Bridge(e)),
                    }
                }
                Effect::Artifact(mutation) => {
                    if !mode.writes_remote() {
                        return Err(SyncError::ModeViolation {
                            mode: mode.as_str(),
                            operation: "queue remote writes",
                        });
                    }
                    self.artifacts.store(mutation);
                    self.stats.artifacts_stored += 1;
                }
                Effect::MissingLocally(path) => {
                    debug!(path = %path, "Remote entry missing locally");
                    self.stats.items_missing_locally += 1;
                }
            }
        }
        Ok(())
    }

    /// Send every collected artifact
    ///
    /// # Errors
    ///
    /// Returns `ModeViolation` when `mode` may not write to the remote side
    pub async fn flush_artifacts(&mut self, mode: SyncMode, remote: &dyn RemoteAccount) -> Result<()> {
        if self.artifacts.is_empty() {
            return Ok(());
        }
        if !mode.writes_remote() {
            return Err(SyncError::ModeViolation {
                mode: mode.as_str(),
                operation: "send remote writes",
            });
        }

        let report = self.artifacts.send(remote, &self.request.account).await;
        self.stats.batches_sent += report.batches_sent;
        self.stats.batches_failed += report.batches_failed;
        Ok(())
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Record an unrecoverable error
    pub fn capture(&mut self, error: &SyncError) {
        self.exceptions.push(error.to_string());
    }

    /// Build the result record
    pub fn finish(self, status: SyncStatus, finished_at: DateTime<Utc>) -> SyncResult {
        let success = status == SyncStatus::Completed && self.exceptions.is_empty();
        self.progress.snapshot().groups.iter().for_each(|group| {
            debug!(group = %group.label, completed = group.completed, total = group.total, "Progress group");
        });
        info!(
            task_id = %self.id,
            status = %status,
            processed = self.stats.items_processed,
            failed = self.stats.items_failed,
            local_updates = self.stats.local_updates,
            artifacts = self.stats.artifacts_stored,
            "Sync task finished"
        );

        SyncResult {
            id: self.id,
            account: self.request.account,
            mode: self.request.mode,
            categories: self.request.categories,
            media: self.request.media,
            section: self.request.section,
            trigger: self.request.trigger,
            status,
            success,
            started_at: self.started_at,
            finished_at,
            exceptions: self.exceptions,
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactMutation;
    use crate::types::ItemPath;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        ArtifactOp, BridgeError, IdentityKey, LibrarySection, LocalItem, LocalUpdate, ManualClock,
        SyncDataCategory, SyncMediaType,
    };
    use chrono::TimeZone;
    use serde_json::Map;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingLibrary {
        updates: Mutex<Vec<(String, LocalUpdate)>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl LocalLibrary for RecordingLibrary {
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

        async fn update_local_state(&self, local_id: &str, update: LocalUpdate) -> BridgeResult<()> {
            if self.fail_for.as_deref() == Some(local_id) {
                return Err(BridgeError::OperationFailed("locked".to_string()));
            }
            self.updates.lock().unwrap().push((local_id.to_string(), update));
            Ok(())
        }
    }

    fn task(mode: SyncMode) -> SyncTask {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        SyncTask::new(
            SyncTaskId::new(),
            SyncRequest::new(AccountId::new("alice"), mode),
            start,
            100,
            ProgressTracker::new(clock, 0.2),
            CancellationToken::new(),
        )
    }

    fn local_effect() -> Effect {
        Effect::Local {
            local_id: "1".to_string(),
            update: LocalUpdate::MarkWatched,
        }
    }

    fn artifact_effect() -> Effect {
        Effect::Artifact(ArtifactMutation {
            category: SyncDataCategory::WATCHED,
            op: ArtifactOp::Add,
            media: SyncMediaType::MOVIES,
            path: ItemPath::root(IdentityKey::new("imdb", "tt100")),
            fields: Map::new(),
        })
    }

    #[tokio::test]
    async fn test_push_rejects_local_writes() {
        let library = RecordingLibrary::default();
        let mut task = task(SyncMode::Push);

        let result = task.apply(SyncMode::Push, vec![local_effect()], &library).await;

        assert!(matches!(result, Err(SyncError::ModeViolation { mode: "push", .. })));
        assert!(library.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pull_modes_reject_artifacts() {
        let library = RecordingLibrary::default();
        for mode in [SyncMode::Pull, SyncMode::FastPull] {
            let mut task = task(mode);
            let result = task.apply(mode, vec![artifact_effect()], &library).await;
            assert!(matches!(result, Err(SyncError::ModeViolation { .. })));
            assert!(task.artifacts().is_empty());
        }
    }

    #[tokio::test]
    async fn test_full_applies_both_sides() {
        let library = RecordingLibrary::default();
        let mut task = task(SyncMode::Full);

        task.apply(SyncMode::Full, vec![local_effect(), artifact_effect()], &library)
            .await
            .unwrap();

        assert_eq!(task.stats().local_updates, 1);
        assert_eq!(task.stats().artifacts_stored, 1);
        assert_eq!(task.artifacts().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_local_write_skips_item() {
        let library = RecordingLibrary {
            fail_for: Some("1".to_string()),
            ..RecordingLibrary::default()
        };
        let mut task = task(SyncMode::Pull);

        task.apply(SyncMode::Pull, vec![local_effect()], &library).await.unwrap();

        assert_eq!(task.stats().items_failed, 1);
        assert_eq!(task.stats().local_updates, 0);
        task.end_phase("pull").unwrap();
    }

    #[test]
    fn test_checkpoint_observes_cancellation() {
        let token = CancellationToken::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let task = SyncTask::new(
            SyncTaskId::new(),
            SyncRequest::new(AccountId::new("alice"), SyncMode::Pull),
            Utc::now(),
            100,
            ProgressTracker::new(clock, 0.2),
            token.clone(),
        );

        assert!(task.checkpoint().is_ok());
        token.cancel();
        assert!(matches!(task.checkpoint(), Err(SyncError::Cancelled)));
    }

    #[test]
    fn test_finish_with_exception_is_not_success() {
        let mut task = task(SyncMode::Pull);
        task.capture(&SyncError::Database("disk full".to_string()));
        let finished = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 30).unwrap();

        let result = task.finish(SyncStatus::Failed, finished);

        assert!(!result.success);
        assert_eq!(result.exceptions, vec!["Database error: disk full".to_string()]);
        assert_eq!(result.elapsed_secs(), 30.0);
    }
}
