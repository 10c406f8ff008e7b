//! # Sync Manager
//!
//! Process-wide owner of at most one sync task.
//!
//! ## Overview
//!
//! Requests travel over a bounded channel to a single background worker that
//! runs them one after another. The manager keeps an *active slot* for the
//! request that was accepted last and has not finished yet:
//!
//! - `queue()` fails immediately while the slot is taken, unless the request
//!   asks to replace the active task and has a strictly higher priority. The
//!   active task is then cancelled and the new request takes the slot.
//! - When a task finishes, whatever the outcome, its result is persisted to
//!   the result log, the slot is cleared if it still belongs to that task,
//!   and the [`TaskHandle`] resolves.
//!
//! Cancellation is cooperative: the task observes its token at checkpoints
//! and finishes with status `cancelled`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncManager, SyncMode, SyncRequest};
//! use bridge_traits::AccountId;
//!
//! # async fn example(config: core_runtime::CoreConfig) -> core_sync::Result<()> {
//! let manager = SyncManager::from_config(config).await?;
//!
//! let handle = manager
//!     .queue(SyncRequest::new(AccountId::new("alice"), SyncMode::FastPull))
//!     .expect("no task running");
//! let result = handle.wait().await?;
//! println!("{} in {:.1}s", result.status, result.elapsed_secs());
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::context::SyncContext;
use crate::error::QueueError;
use crate::modes;
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::result::{SyncResult, SyncStatus, SyncSummary, SyncTaskId};
use crate::task::SyncTask;
use crate::types::{Priority, SyncMode, SyncTrigger};
use crate::{Result, SyncError};
use bridge_traits::{AccountId, SyncDataCategory, SyncMediaType};
use core_runtime::config::CoreConfig;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

// ============================================================================
// Requests
// ============================================================================

/// What to synchronize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub account: AccountId,
    pub mode: SyncMode,
    pub categories: SyncDataCategory,
    pub media: SyncMediaType,
    pub priority: Priority,
    pub trigger: SyncTrigger,
    /// Restrict the run to one library section
    pub section: Option<String>,
    /// Local user whose state is read when the library is shared
    pub local_account: Option<String>,
    /// Cancel and replace an active task of lower priority
    pub replace_active: bool,
}

impl SyncRequest {
    /// Manual request covering every category and media type
    pub fn new(account: AccountId, mode: SyncMode) -> Self {
        Self {
            account,
            mode,
            categories: SyncDataCategory::all(),
            media: SyncMediaType::all(),
            priority: Priority::Normal,
            trigger: SyncTrigger::Manual,
            section: None,
            local_account: None,
            replace_active: false,
        }
    }

    pub fn with_categories(mut self, categories: SyncDataCategory) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_media(mut self, media: SyncMediaType) -> Self {
        self.media = media;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn with_local_account(mut self, account: impl Into<String>) -> Self {
        self.local_account = Some(account.into());
        self
    }

    pub fn replacing_active(mut self) -> Self {
        self.replace_active = true;
        self
    }

    /// Media types the run touches: shows bring their seasons and episodes
    pub fn media_scope(&self) -> SyncMediaType {
        if self.media.contains(SyncMediaType::SHOWS) {
            self.media | SyncMediaType::SEASONS | SyncMediaType::EPISODES
        } else {
            self.media
        }
    }
}

/// Completion handle of a queued request
#[derive(Debug)]
pub struct TaskHandle {
    id: SyncTaskId,
    receiver: oneshot::Receiver<SyncResult>,
}

impl TaskHandle {
    pub fn id(&self) -> &SyncTaskId {
        &self.id
    }

    /// Wait for the task to finish
    ///
    /// # Errors
    ///
    /// Returns `WorkerStopped` if the manager shut down before the task ran
    pub async fn wait(self) -> Result<SyncResult> {
        self.receiver.await.map_err(|_| SyncError::WorkerStopped)
    }
}

struct QueuedTask {
    id: SyncTaskId,
    request: SyncRequest,
    cancellation: CancellationToken,
    progress: ProgressTracker,
    reply: oneshot::Sender<SyncResult>,
}

/// The task holding the manager's exclusion
struct ActiveSlot {
    id: SyncTaskId,
    priority: Priority,
    cancellation: CancellationToken,
    progress: ProgressTracker,
}

type Slot = Arc<Mutex<Option<ActiveSlot>>>;

fn lock_slot(slot: &Mutex<Option<ActiveSlot>>) -> MutexGuard<'_, Option<ActiveSlot>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Manager
// ============================================================================

pub struct SyncManager {
    ctx: Arc<SyncContext>,
    sender: Mutex<Option<mpsc::Sender<QueuedTask>>>,
    active: Slot,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    /// Start the manager and its worker.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(ctx: SyncContext) -> Self {
        let ctx = Arc::new(ctx);
        let (sender, receiver) = mpsc::channel(ctx.settings.queue_capacity.max(1));
        let active: Slot = Arc::new(Mutex::new(None));
        let worker = tokio::spawn(run_worker(Arc::clone(&ctx), receiver, Arc::clone(&active)));

        Self {
            ctx,
            sender: Mutex::new(Some(sender)),
            active,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Open the database named by `config` and start the manager
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened
    pub async fn from_config(config: CoreConfig) -> Result<Self> {
        Ok(Self::new(SyncContext::from_config(config).await?))
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Queue a request.
    ///
    /// # Errors
    ///
    /// - `TaskActive` if a task holds the slot and the request may not replace it
    /// - `QueueFull` if the channel has no room left
    /// - `ShuttingDown` after [`shutdown`](Self::shutdown)
    #[instrument(skip(self, request), fields(account = %request.account, mode = %request.mode))]
    pub fn queue(&self, request: SyncRequest) -> std::result::Result<TaskHandle, QueueError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(QueueError::ShuttingDown)?;

        let mut active = lock_slot(&self.active);
        if let Some(current) = active.as_ref() {
            let replaces = request.replace_active && request.priority > current.priority;
            if !replaces {
                return Err(QueueError::TaskActive {
                    task_id: current.id.to_string(),
                });
            }
        }

        let id = SyncTaskId::new();
        let cancellation = CancellationToken::new();
        let progress = ProgressTracker::new(Arc::clone(&self.ctx.clock), self.ctx.settings.progress_smoothing);
        let (reply, receiver) = oneshot::channel();
        let priority = request.priority;

        sender
            .try_send(QueuedTask {
                id,
                request,
                cancellation: cancellation.clone(),
                progress: progress.clone(),
                reply,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => QueueError::ShuttingDown,
            })?;

        if let Some(replaced) = active.replace(ActiveSlot {
            id,
            priority,
            cancellation,
            progress,
        }) {
            info!(replaced = %replaced.id, "Cancelling active task for higher priority request");
            replaced.cancellation.cancel();
        }

        info!(task_id = %id, "Queued sync task");
        Ok(TaskHandle { id, receiver })
    }

    /// Cancel the active task, returning whether there was one
    pub fn cancel(&self) -> bool {
        match lock_slot(&self.active).as_ref() {
            Some(current) => {
                info!(task_id = %current.id, "Cancelling sync task");
                current.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        lock_slot(&self.active).is_some()
    }

    /// ID of the task holding the slot
    pub fn active_task(&self) -> Option<SyncTaskId> {
        lock_slot(&self.active).as_ref().map(|current| current.id)
    }

    /// Live progress of the active task
    pub fn progress(&self) -> Option<ProgressSnapshot> {
        lock_slot(&self.active)
            .as_ref()
            .map(|current| current.progress.snapshot())
    }

    /// Last run of one (account, mode, section)
    ///
    /// # Errors
    ///
    /// Returns an error if the result log cannot be read
    pub async fn get_status(
        &self,
        account: &AccountId,
        mode: SyncMode,
        section: Option<&str>,
    ) -> Result<Option<SyncSummary>> {
        self.ctx.results.summary(account, mode, section).await
    }

    /// Recent results of an account, most recent first
    ///
    /// # Errors
    ///
    /// Returns an error if the result log cannot be read
    pub async fn history(&self, account: &AccountId, limit: u32) -> Result<Vec<SyncResult>> {
        self.ctx.results.history(account, limit).await
    }

    /// Look up one finished task
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` if the task has no result yet
    pub async fn get_result(&self, id: &SyncTaskId) -> Result<SyncResult> {
        self.ctx
            .results
            .find_by_id(id)
            .await?
            .ok_or_else(|| SyncError::TaskNotFound {
                task_id: id.to_string(),
            })
    }

    /// Stop accepting requests, cancel the active task and wait for the worker.
    ///
    /// Requests still waiting in the channel are cancelled before they start.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(sender);
        self.cancel();

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Sync worker terminated abnormally");
            }
        }
        info!("Sync manager stopped");
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            worker.abort();
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

async fn run_worker(ctx: Arc<SyncContext>, mut receiver: mpsc::Receiver<QueuedTask>, active: Slot) {
    while let Some(queued) = receiver.recv().await {
        let id = queued.id;
        let reply = queued.reply;

        let result = execute(&ctx, queued.id, queued.request, queued.progress, queued.cancellation).await;

        if let Err(e) = ctx.results.insert(&result).await {
            error!(task_id = %id, error = %e, "Failed to persist sync result");
        }

        {
            let mut slot = lock_slot(&active);
            if slot.as_ref().is_some_and(|current| current.id == id) {
                *slot = None;
            }
        }

        if reply.send(result).is_err() {
            info!(task_id = %id, "Sync result has no waiting handle");
        }
    }
}

/// Run one task to completion and build its result record
async fn execute(
    ctx: &SyncContext,
    id: SyncTaskId,
    request: SyncRequest,
    progress: ProgressTracker,
    cancellation: CancellationToken,
) -> SyncResult {
    let mut task = SyncTask::new(
        id,
        request,
        ctx.clock.now(),
        ctx.settings.batch_size,
        progress,
        cancellation,
    );

    let outcome = AssertUnwindSafe(modes::run(&mut task, ctx)).catch_unwind().await;
    let status = match outcome {
        Ok(Ok(())) => SyncStatus::Completed,
        Ok(Err(SyncError::Cancelled)) => {
            info!(task_id = %task.id(), "Sync task cancelled");
            SyncStatus::Cancelled
        }
        Ok(Err(e)) => {
            error!(task_id = %task.id(), error = %e, "Sync task failed");
            task.capture(&e);
            SyncStatus::Failed
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(task_id = %task.id(), panic = %message, "Sync task panicked");
            task.capture(&SyncError::Panicked(message));
            SyncStatus::Failed
        }
    };

    task.finish(status, ctx.clock.now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = SyncRequest::new(AccountId::new("alice"), SyncMode::Push);
        assert_eq!(request.categories, SyncDataCategory::all());
        assert_eq!(request.priority, Priority::Normal);
        assert_eq!(request.trigger, SyncTrigger::Manual);
        assert!(!request.replace_active);
    }

    #[test]
    fn test_shows_scope_includes_children() {
        let request = SyncRequest::new(AccountId::new("alice"), SyncMode::Pull).with_media(SyncMediaType::SHOWS);
        assert_eq!(
            request.media_scope(),
            SyncMediaType::SHOWS | SyncMediaType::SEASONS | SyncMediaType::EPISODES
        );

        let movies = request.with_media(SyncMediaType::MOVIES);
        assert_eq!(movies.media_scope(), SyncMediaType::MOVIES);
    }
}
