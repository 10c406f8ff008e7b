//! # Mode Dispatcher
//!
//! Top-level control flow of a task, one module per [`SyncMode`].
//!
//! ## Overview
//!
//! | Mode | Remote side | Local side | Compare |
//! |------|-------------|------------|---------|
//! | `Pull` | full snapshot per collection | every mapped item | local value vs remote node |
//! | `FastPull` | change feed | items behind changed keys | previous vs current remote snapshot |
//! | `Push` | cached snapshot | every mapped item in remote shape | cached remote vs local |
//! | `Full` | pull half, then push half | | |
//!
//! Every mode shares the same skeleton: work out the collections the task
//! covers, learn the remote keys, map the local library once, compare, then
//! hand the resulting effects to the task. Lists have no local record and are
//! always traversed from the remote side.
//!
//! The task is checkpointed after every item, every fetched snapshot and at
//! every phase boundary.

mod fast_pull;
mod full;
mod pull;
mod push;

use crate::context::SyncContext;
use crate::diff::{diff, DiffResult};
use crate::handlers::MediaHandler;
use crate::task::SyncTask;
use crate::types::SyncMode;
use crate::Result;
use bridge_traits::{CollectionKey, RemoteSnapshot, SyncMediaType};
use tracing::{info, instrument};

/// Run the task's mode to completion
///
/// # Errors
///
/// Returns `Cancelled` when a checkpoint observes cancellation, or the
/// unrecoverable error that aborted the run
#[instrument(skip(task, ctx), fields(task_id = %task.id(), mode = %task.mode()))]
pub async fn run(task: &mut SyncTask, ctx: &SyncContext) -> Result<()> {
    task.checkpoint()?;
    info!(
        account = %task.account(),
        categories = ?task.request().categories,
        media = ?task.request().media,
        section = task.request().section.as_deref().unwrap_or("all"),
        "Starting sync"
    );

    match task.mode() {
        SyncMode::Full => full::run(task, ctx).await,
        SyncMode::Pull => pull::run(task, ctx, SyncMode::Pull).await,
        SyncMode::FastPull => fast_pull::run(task, ctx).await,
        SyncMode::Push => push::run(task, ctx).await,
    }
}

/// Remote collections covered by the task, lists included
fn collection_keys(task: &SyncTask, ctx: &SyncContext) -> Vec<CollectionKey> {
    let request = task.request();
    ctx.handlers
        .pairs(request.categories, request.media_scope())
        .into_iter()
        .map(|(category, media)| CollectionKey::new(media, category))
        .collect()
}

/// Handler for one node of a collection, if the task covers its media type
fn handler_for<'a>(
    task: &SyncTask,
    ctx: &'a SyncContext,
    key: CollectionKey,
    media: SyncMediaType,
) -> Option<&'a dyn MediaHandler> {
    if !task.request().media_scope().contains(media) {
        return None;
    }
    ctx.handlers.get(key.category, media)
}

/// Compare two remote snapshots of a collection through its handlers' values
fn remote_diff<'a>(
    task: &SyncTask,
    ctx: &SyncContext,
    key: CollectionKey,
    base: &'a RemoteSnapshot,
    current: &'a RemoteSnapshot,
) -> DiffResult<'a> {
    diff(base, current, |old, new| {
        handler_for(task, ctx, key, new.media()).is_some_and(|handler| {
            let old = handler.remote_value(old);
            let new = handler.remote_value(new);
            handler.get_action(old.as_ref(), new.as_ref()).is_some()
        })
    })
}

/// Media types whose local items must be mapped for the task.
///
/// List entries point at movies and shows, so lists need those mapped too.
fn local_media(task: &SyncTask) -> SyncMediaType {
    let mut media = task.request().media_scope();
    if media.contains(SyncMediaType::LISTS) {
        media |= SyncMediaType::MOVIES
            | SyncMediaType::SHOWS
            | SyncMediaType::SEASONS
            | SyncMediaType::EPISODES;
    }
    media.difference(SyncMediaType::LISTS)
}

/// Map the local library into the task's mapper, once per phase set.
///
/// Remote snapshots must be indexed first so identities resolve to primary keys.
async fn load_local(task: &mut SyncTask, ctx: &SyncContext) -> Result<()> {
    if task.local_loaded() {
        return Ok(());
    }

    let media = local_media(task);
    if media.is_empty() {
        task.mark_local_loaded();
        return Ok(());
    }

    let mut sections = ctx.library.list_sections(media).await?;
    if let Some(section) = &task.request().section {
        sections.retain(|s| &s.id == section);
    }
    task.checkpoint()?;

    let items = ctx
        .library
        .mapped_items(&sections, task.request().local_account.as_deref())
        .await?;
    info!(sections = sections.len(), items = items.len(), "Loaded local library");

    task.mapper.map_items(items, ctx.mapping.as_deref()).await;
    task.mark_local_loaded();
    task.end_phase("map")
}
