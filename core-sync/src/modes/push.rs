//! Push: send local state the remote account does not have yet.
//!
//! For each collection the mapped local items are translated into the remote
//! shape and diffed against the cached remote snapshot. Only nodes whose
//! handler yields a local value take part; their values are kept aside and
//! compared with the remote values through the handler's classification.
//! Actions run with `old = remote` and `new = local`, and the resulting
//! artifacts are flushed once at the end.
//!
//! The remote side of the diff is the newest known remote state: the pending
//! change feed when the remote moved since the last pull, else the cached
//! entry, else a fresh fetch. Push only peeks at the feed and never commits
//! it, so a later fast pull still sees those changes. Nodes the feed reports
//! as changed since the last pull are left alone: the local value is older
//! than the remote one and must be pulled first.
//!
//! When the task is restricted to one library section, the remote snapshot
//! is narrowed to the roots that section maps to. Remote items belonging to
//! other sections are then not reported as removed.

use super::{collection_keys, handler_for, load_local, remote_diff};
use crate::context::SyncContext;
use crate::diff::diff;
use crate::handlers::{Comparison, Effect};
use crate::task::SyncTask;
use crate::types::{ItemPath, SyncMode, SyncValue};
use crate::Result;
use bridge_traits::{
    CollectionKey, LocalItem, PrimaryKey, RemoteEpisode, RemoteItem, RemoteProperties,
    RemoteSeason, RemoteSnapshot, SyncMediaType,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

const MODE: SyncMode = SyncMode::Push;

/// Remote state one collection is pushed against
struct RemoteBase {
    snapshot: RemoteSnapshot,
    /// Nodes changed remotely since the last pull
    unpulled: BTreeSet<ItemPath>,
}

impl RemoteBase {
    fn settled(snapshot: RemoteSnapshot) -> Self {
        Self {
            snapshot,
            unpulled: BTreeSet::new(),
        }
    }
}

pub(super) async fn run(task: &mut SyncTask, ctx: &SyncContext) -> Result<()> {
    let bases = remote_bases(task, ctx).await?;
    for base in bases.values() {
        task.mapper.index_snapshot(&base.snapshot);
    }
    load_local(task, ctx).await?;

    let groups: Vec<_> = bases
        .keys()
        .map(|key| task.progress().group(format!("push {key}")))
        .collect();

    for ((key, base), group) in bases.iter().zip(groups) {
        task.checkpoint()?;
        let batches = collection_effects(task, ctx, *key, base)?;
        group.add(batches.len() as u64);
        for effects in batches {
            task.checkpoint()?;
            task.apply(MODE, effects, ctx.library.as_ref()).await?;
            task.item_processed();
            group.step();
        }
        group.stop();
        task.end_phase("push")?;
    }

    task.flush_artifacts(MODE, ctx.remote.as_ref()).await?;
    task.end_phase("flush")
}

/// Work out the newest known remote state of every collection
async fn remote_bases(
    task: &mut SyncTask,
    ctx: &SyncContext,
) -> Result<BTreeMap<CollectionKey, RemoteBase>> {
    let account = task.account().clone();
    let keys: Vec<CollectionKey> = collection_keys(task, ctx)
        .into_iter()
        .filter(|key| key.media != SyncMediaType::LISTS)
        .collect();

    let cache = ctx.caches.get(&account);
    let mut cache = cache.lock().await;
    let mut feeds = match cache.pending_changes(ctx.remote.as_ref(), &keys).await {
        Ok(feeds) => {
            debug!(changed = feeds.len(), "Read pending remote changes");
            feeds
        }
        Err(e) => {
            warn!(error = %e, "Change feed unavailable, pushing against cached snapshots");
            Vec::new()
        }
    };

    let mut bases = BTreeMap::new();
    for key in keys {
        task.checkpoint()?;
        if let Some(index) = feeds.iter().position(|feed| feed.key == key) {
            let feed = feeds.swap_remove(index);
            let unpulled: BTreeSet<ItemPath> = if feed.cold {
                BTreeSet::new()
            } else {
                remote_diff(task, ctx, key, feed.base(), &feed.current)
                    .into_actions()
                    .into_iter()
                    .map(|action| action.path)
                    .collect()
            };
            if !unpulled.is_empty() {
                info!(collection = %key, nodes = unpulled.len(), "Remote changed since the last pull");
            }
            bases.insert(
                key,
                RemoteBase {
                    snapshot: feed.current,
                    unpulled,
                },
            );
            continue;
        }

        match cache.entry(key).await {
            Ok(Some(entry)) => {
                bases.insert(key, RemoteBase::settled(entry.items.clone()));
            }
            Ok(None) => match ctx.remote.fetch_collection(&account, key).await {
                Ok(snapshot) => {
                    debug!(collection = %key, items = snapshot.len(), "Fetched uncached collection");
                    bases.insert(key, RemoteBase::settled(snapshot));
                }
                Err(e) => task.collection_skipped(key, e),
            },
            Err(e) => task.collection_skipped(key, e),
        }
    }
    drop(cache);

    task.end_phase("refresh")?;
    Ok(bases)
}

fn collection_effects(
    task: &SyncTask,
    ctx: &SyncContext,
    key: CollectionKey,
    base: &RemoteBase,
) -> Result<Vec<Vec<Effect>>> {
    let (current, values) = local_snapshot(task, ctx, key);

    let restricted: RemoteSnapshot;
    let unpulled = &base.unpulled;
    let base = &base.snapshot;
    let base = if task.request().section.is_some() {
        let mapped: BTreeSet<&PrimaryKey> = task.mapper.items().filter_map(|m| m.pk()).collect();
        restricted = base
            .iter()
            .filter(|(pk, _)| mapped.contains(pk))
            .map(|(pk, item)| (pk.clone(), item.clone()))
            .collect();
        &restricted
    } else {
        base
    };

    let changes = diff(base, &current, |old, new| {
        handler_for(task, ctx, key, new.media()).is_some_and(|handler| {
            let old = handler.remote_value(old);
            handler.get_action(old.as_ref(), values.get(&new.path())).is_some()
        })
    });
    info!(
        collection = %key,
        added = changes.added.len(),
        removed = changes.removed.len(),
        changed = changes.changed.len(),
        "Diffed local state against remote"
    );

    let env = ctx.handler_env(&task.mapper);
    let mut batches = Vec::new();
    for action in changes.into_actions() {
        task.checkpoint()?;
        if unpulled.contains(&action.path) {
            debug!(path = %action.path, "Remote value newer than local, leaving it for the next pull");
            continue;
        }
        let Some(handler) = handler_for(task, ctx, key, action.media) else {
            continue;
        };
        let locals = task.mapper.lookup(&action.path);
        let local = locals.first().map(|mapped| &mapped.item);
        let title = local
            .map(|item| item.title.as_str())
            .or_else(|| action.old.map(|node| node.root().title.as_str()))
            .unwrap_or_default();

        let comparison = Comparison {
            path: &action.path,
            media: action.media,
            title,
            local,
            old: action.old.and_then(|node| handler.remote_value(node)),
            new: values.get(&action.path).cloned(),
        };
        batches.push(handler.run(MODE, &comparison, &env));
    }

    Ok(batches)
}

/// Mapped local items of one collection in remote shape, plus their values by path.
///
/// Nodes carry no properties: the values are compared on the side. Shows and
/// seasons are created as needed to hold their episodes.
fn local_snapshot(
    task: &SyncTask,
    ctx: &SyncContext,
    key: CollectionKey,
) -> (RemoteSnapshot, BTreeMap<ItemPath, SyncValue>) {
    let mut snapshot = RemoteSnapshot::new();
    let mut values = BTreeMap::new();

    for mapped in task.mapper.items() {
        let Some(path) = &mapped.path else {
            continue;
        };
        if mapped.item.media.root() != key.media {
            continue;
        }
        let Some(handler) = handler_for(task, ctx, key, mapped.item.media) else {
            continue;
        };
        let Some(value) = handler.local_value(&mapped.item, &ctx.settings) else {
            continue;
        };

        insert_node(&mut snapshot, path, &mapped.item, key.media);
        values.insert(path.clone(), value);
    }

    (snapshot, values)
}

fn insert_node(snapshot: &mut RemoteSnapshot, path: &ItemPath, item: &LocalItem, media: SyncMediaType) {
    let root = snapshot
        .entry(path.root.clone())
        .or_insert_with(|| RemoteItem::new(path.root.clone(), media, item.title.clone()));
    if path.is_root() {
        root.title = item.title.clone();
        return;
    }

    let Some(number) = path.season else {
        return;
    };
    let season = root.seasons.entry(number).or_insert_with(|| RemoteSeason {
        number,
        ..RemoteSeason::default()
    });
    if let Some(episode) = path.episode {
        season.episodes.entry(episode).or_insert_with(|| RemoteEpisode {
            number: episode,
            properties: RemoteProperties::default(),
        });
    }
}
