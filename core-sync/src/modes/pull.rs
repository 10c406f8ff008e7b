//! Pull: compare every mapped local item with freshly fetched snapshots.
//!
//! Also runs as the first half of `Full`, where handlers see mode `Full`.
//! Once every item has been compared, the fetched snapshots replace the
//! cached entries, so a following push or fast pull does not refetch them.
//! A cancelled or failed pull leaves the cache as it was.

use super::{collection_keys, handler_for, load_local};
use crate::context::SyncContext;
use crate::diff::{find_node, NodeRef};
use crate::handlers::{Comparison, Effect};
use crate::mapper::MappedItem;
use crate::task::SyncTask;
use crate::types::SyncMode;
use crate::Result;
use bridge_traits::{ActivityMap, CollectionKey, RemoteSnapshot, SyncMediaType};
use std::collections::BTreeMap;
use tracing::{info, warn};

type Snapshots = BTreeMap<CollectionKey, RemoteSnapshot>;

pub(super) async fn run(task: &mut SyncTask, ctx: &SyncContext, mode: SyncMode) -> Result<()> {
    let (snapshots, activity) = fetch_snapshots(task, ctx).await?;
    load_local(task, ctx).await?;

    let items: Vec<MappedItem> = task
        .mapper
        .items()
        .filter(|mapped| mapped.path.is_some())
        .cloned()
        .collect();

    let group = task.progress().group(mode.as_str());
    group.add(items.len() as u64);
    for mapped in &items {
        task.checkpoint()?;
        let effects = item_effects(task, ctx, mode, &snapshots, mapped);
        task.apply(mode, effects, ctx.library.as_ref()).await?;
        task.item_processed();
        group.step();
    }
    group.stop();
    task.end_phase(mode.as_str())?;

    pull_lists(task, ctx, mode, &snapshots).await?;
    commit_snapshots(task, ctx, snapshots, &activity).await;
    Ok(())
}

async fn fetch_snapshots(task: &mut SyncTask, ctx: &SyncContext) -> Result<(Snapshots, ActivityMap)> {
    let account = task.account().clone();
    let keys = collection_keys(task, ctx);

    let activity = match ctx.remote.last_activity(&account).await {
        Ok(activity) => activity,
        Err(e) => {
            warn!(error = %e, "Remote activity unavailable");
            ActivityMap::new()
        }
    };

    let mut snapshots = Snapshots::new();

    let group = task.progress().group("fetch");
    group.add(keys.len() as u64);
    for key in keys {
        task.checkpoint()?;
        let fetched = ctx.remote.fetch_collection(&account, key).await;
        match fetched {
            Ok(snapshot) => {
                info!(collection = %key, items = snapshot.len(), "Fetched remote collection");
                task.mapper.index_snapshot(&snapshot);
                snapshots.insert(key, snapshot);
            }
            Err(e) => task.collection_skipped(key, e),
        }
        group.step();
    }
    group.stop();

    task.end_phase("fetch")?;
    Ok((snapshots, activity))
}

/// Record the pulled snapshots as the account's cached remote state
async fn commit_snapshots(task: &SyncTask, ctx: &SyncContext, snapshots: Snapshots, activity: &ActivityMap) {
    let cache = ctx.caches.get(task.account());
    let mut cache = cache.lock().await;
    for (key, snapshot) in snapshots {
        if let Err(e) = cache.replace(key, snapshot, activity.get(&key).copied()).await {
            warn!(collection = %key, error = %e, "Failed to update change cache");
        }
    }
}

/// Compare one local item against the matching node of every collection
fn item_effects(
    task: &SyncTask,
    ctx: &SyncContext,
    mode: SyncMode,
    snapshots: &Snapshots,
    mapped: &MappedItem,
) -> Vec<Effect> {
    let Some(path) = &mapped.path else {
        return Vec::new();
    };
    let item = &mapped.item;
    let env = ctx.handler_env(&task.mapper);
    let mut effects = Vec::new();

    for (key, snapshot) in snapshots {
        if key.media != item.media.root() {
            continue;
        }
        let Some(handler) = handler_for(task, ctx, *key, item.media) else {
            continue;
        };

        let node = find_node(snapshot, path);
        let comparison = Comparison {
            path,
            media: item.media,
            title: &item.title,
            local: Some(item),
            old: handler.local_value(item, &ctx.settings),
            new: node.and_then(|node| handler.remote_value(node)),
        };
        effects.extend(handler.run(mode, &comparison, &env));
    }

    effects
}

/// Lists have no previous state here: every list is compared as new
async fn pull_lists(
    task: &mut SyncTask,
    ctx: &SyncContext,
    mode: SyncMode,
    snapshots: &Snapshots,
) -> Result<()> {
    for (key, snapshot) in snapshots {
        if key.media != SyncMediaType::LISTS {
            continue;
        }
        let Some(handler) = handler_for(task, ctx, *key, SyncMediaType::LISTS) else {
            continue;
        };

        for list in snapshot.values() {
            task.checkpoint()?;
            let path = NodeRef::Item(list).path();
            let effects = {
                let env = ctx.handler_env(&task.mapper);
                let comparison = Comparison {
                    path: &path,
                    media: SyncMediaType::LISTS,
                    title: &list.title,
                    local: None,
                    old: None,
                    new: handler.remote_value(NodeRef::Item(list)),
                };
                handler.run(mode, &comparison, &env)
            };
            task.apply(mode, effects, ctx.library.as_ref()).await?;
        }
        task.end_phase("lists")?;
    }
    Ok(())
}
