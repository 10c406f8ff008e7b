//! Fast pull: act only on what the remote change feed reports.
//!
//! Each changed collection is diffed against its previous cached snapshot.
//! Changed nodes resolve to local items through the mapper's reverse index.
//! A collection with no earlier state yields a cold feed where every remote
//! node is added.
//!
//! A feed is committed to the change cache only once all of its effects have
//! been applied. A run that is cancelled or fails before that leaves the
//! feed pending, and the next fast pull sees the same changes again.

use super::{collection_keys, handler_for, load_local, remote_diff};
use crate::cache::ChangeFeed;
use crate::context::SyncContext;
use crate::handlers::{Comparison, Effect};
use crate::task::SyncTask;
use crate::types::SyncMode;
use crate::Result;
use bridge_traits::SyncMediaType;
use tracing::info;

const MODE: SyncMode = SyncMode::FastPull;

pub(super) async fn run(task: &mut SyncTask, ctx: &SyncContext) -> Result<()> {
    let account = task.account().clone();
    let keys = collection_keys(task, ctx);

    let cache = ctx.caches.get(&account);
    let pending = cache.lock().await.pending_changes(ctx.remote.as_ref(), &keys).await;
    let feeds = match pending {
        Ok(feeds) => feeds,
        Err(e) => {
            for key in &keys {
                task.collection_skipped(*key, &e);
            }
            return task.end_phase("refresh");
        }
    };
    task.end_phase("refresh")?;

    if feeds.is_empty() {
        info!("No remote changes since the last sync");
        return Ok(());
    }

    for feed in &feeds {
        task.mapper.index_snapshot(feed.base());
        task.mapper.index_snapshot(&feed.current);
    }
    load_local(task, ctx).await?;

    let groups: Vec<_> = feeds
        .iter()
        .map(|feed| task.progress().group(feed.key.to_string()))
        .collect();

    for (feed, group) in feeds.into_iter().zip(groups) {
        let batches = feed_effects(task, ctx, &feed)?;
        group.add(batches.len() as u64);
        for effects in batches {
            task.checkpoint()?;
            task.apply(MODE, effects, ctx.library.as_ref()).await?;
            task.item_processed();
            group.step();
        }
        group.stop();

        cache.lock().await.commit(feed).await;
        task.end_phase("fast_pull")?;
    }

    Ok(())
}

/// Effects of one changed collection, one batch per affected local item or list
fn feed_effects(task: &SyncTask, ctx: &SyncContext, feed: &ChangeFeed) -> Result<Vec<Vec<Effect>>> {
    let key = feed.key;
    let changes = remote_diff(task, ctx, key, feed.base(), &feed.current);
    info!(
        collection = %key,
        cold = feed.cold,
        added = changes.added.len(),
        removed = changes.removed.len(),
        changed = changes.changed.len(),
        "Diffed remote collection"
    );

    let env = ctx.handler_env(&task.mapper);
    let mut batches = Vec::new();

    for action in changes.into_actions() {
        task.checkpoint()?;
        let Some(handler) = handler_for(task, ctx, key, action.media) else {
            continue;
        };
        let old = action.old.and_then(|node| handler.remote_value(node));
        let new = action.new.and_then(|node| handler.remote_value(node));
        let title = action
            .new
            .or(action.old)
            .map_or("", |node| node.root().title.as_str());

        if action.media == SyncMediaType::LISTS {
            let comparison = Comparison {
                path: &action.path,
                media: action.media,
                title,
                local: None,
                old,
                new,
            };
            batches.push(handler.run(MODE, &comparison, &env));
            continue;
        }

        for mapped in task.mapper.lookup(&action.path) {
            let comparison = Comparison {
                path: &action.path,
                media: action.media,
                title,
                local: Some(&mapped.item),
                old: old.clone(),
                new: new.clone(),
            };
            batches.push(handler.run(MODE, &comparison, &env));
        }
    }

    Ok(batches)
}
