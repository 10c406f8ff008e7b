//! # Diff Engine
//!
//! Pure comparison of two remote-shaped snapshots.
//!
//! ## Overview
//!
//! `base` is the last known state, `current` the state to converge to. Keys
//! present only in `current` are reported as added together with all their
//! descendants; keys present only in `base` as removed, likewise recursive.
//! Keys present on both sides are compared with a caller-supplied comparator
//! on the node's own fields, then the engine recurses show → season →
//! episode.
//!
//! Snapshots are ordered maps, so identical inputs always yield identical
//! output in the same order.

use crate::types::{ActionKind, ItemPath};
use bridge_traits::{
    PrimaryKey, RemoteEpisode, RemoteItem, RemoteProperties, RemoteSeason, RemoteSnapshot,
    SyncMediaType,
};
use std::collections::BTreeSet;

/// Borrowed view of one node of a snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeRef<'a> {
    Item(&'a RemoteItem),
    Season(&'a RemoteItem, &'a RemoteSeason),
    Episode(&'a RemoteItem, &'a RemoteSeason, &'a RemoteEpisode),
}

impl<'a> NodeRef<'a> {
    pub fn properties(&self) -> &'a RemoteProperties {
        match self {
            NodeRef::Item(item) => &item.properties,
            NodeRef::Season(_, season) => &season.properties,
            NodeRef::Episode(_, _, episode) => &episode.properties,
        }
    }

    /// List entries; empty for anything but a list record
    pub fn entries(&self) -> &'a [PrimaryKey] {
        match self {
            NodeRef::Item(item) => &item.entries,
            _ => &[],
        }
    }

    /// The movie, show or list this node belongs to
    pub fn root(&self) -> &'a RemoteItem {
        match self {
            NodeRef::Item(item) | NodeRef::Season(item, _) | NodeRef::Episode(item, _, _) => item,
        }
    }

    /// Single-flag media type of this node
    pub fn media(&self) -> SyncMediaType {
        match self {
            NodeRef::Item(item) => item.media,
            NodeRef::Season(..) => SyncMediaType::SEASONS,
            NodeRef::Episode(..) => SyncMediaType::EPISODES,
        }
    }

    pub fn path(&self) -> ItemPath {
        match self {
            NodeRef::Item(item) => ItemPath::root(item.pk.clone()),
            NodeRef::Season(item, season) => ItemPath::season(item.pk.clone(), season.number),
            NodeRef::Episode(item, season, episode) => {
                ItemPath::episode(item.pk.clone(), season.number, episode.number)
            }
        }
    }
}

/// Locate a node by path
pub fn find_node<'a>(snapshot: &'a RemoteSnapshot, path: &ItemPath) -> Option<NodeRef<'a>> {
    let item = snapshot.get(&path.root)?;
    match (path.season, path.episode) {
        (None, _) => Some(NodeRef::Item(item)),
        (Some(s), None) => item.seasons.get(&s).map(|season| NodeRef::Season(item, season)),
        (Some(s), Some(e)) => {
            let season = item.seasons.get(&s)?;
            season
                .episodes
                .get(&e)
                .map(|episode| NodeRef::Episode(item, season, episode))
        }
    }
}

/// One difference between base and current
#[derive(Debug, Clone, PartialEq)]
pub struct Action<'a> {
    pub kind: ActionKind,
    pub path: ItemPath,
    pub media: SyncMediaType,
    pub old: Option<NodeRef<'a>>,
    pub new: Option<NodeRef<'a>>,
}

impl<'a> Action<'a> {
    fn single(kind: ActionKind, old: Option<NodeRef<'a>>, new: Option<NodeRef<'a>>) -> Option<Self> {
        let node = new.or(old)?;
        Some(Self {
            kind,
            path: node.path(),
            media: node.media(),
            old,
            new,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DiffResult<'a> {
    pub added: Vec<Action<'a>>,
    pub removed: Vec<Action<'a>>,
    pub changed: Vec<Action<'a>>,
    pub unchanged: Vec<ItemPath>,
}

impl<'a> DiffResult<'a> {
    /// True when there is nothing to act on
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }

    /// All actions ordered by path
    pub fn into_actions(self) -> Vec<Action<'a>> {
        let mut actions: Vec<_> = self
            .added
            .into_iter()
            .chain(self.removed)
            .chain(self.changed)
            .collect();
        actions.sort_by(|a, b| a.path.cmp(&b.path));
        actions
    }

    fn push(&mut self, action: Action<'a>) {
        match action.kind {
            ActionKind::Added => self.added.push(action),
            ActionKind::Removed => self.removed.push(action),
            ActionKind::Changed => self.changed.push(action),
        }
    }

    fn subtree(&mut self, kind: ActionKind, item: &'a RemoteItem) {
        let wrap = |node| match kind {
            ActionKind::Removed => Action::single(kind, Some(node), None),
            _ => Action::single(kind, None, Some(node)),
        };

        self.extend(wrap(NodeRef::Item(item)));
        for season in item.seasons.values() {
            self.season_subtree(kind, item, season);
        }
    }

    fn season_subtree(&mut self, kind: ActionKind, item: &'a RemoteItem, season: &'a RemoteSeason) {
        let wrap = |node| match kind {
            ActionKind::Removed => Action::single(kind, Some(node), None),
            _ => Action::single(kind, None, Some(node)),
        };

        self.extend(wrap(NodeRef::Season(item, season)));
        for episode in season.episodes.values() {
            self.extend(wrap(NodeRef::Episode(item, season, episode)));
        }
    }

    fn extend(&mut self, action: Option<Action<'a>>) {
        if let Some(action) = action {
            self.push(action);
        }
    }
}

/// Compare two snapshots.
///
/// `changed(old, new)` decides whether a node present on both sides differs.
pub fn diff<'a, F>(base: &'a RemoteSnapshot, current: &'a RemoteSnapshot, mut changed: F) -> DiffResult<'a>
where
    F: FnMut(NodeRef<'a>, NodeRef<'a>) -> bool,
{
    let mut result = DiffResult::default();
    let keys: BTreeSet<&PrimaryKey> = base.keys().chain(current.keys()).collect();

    for key in keys {
        match (base.get(key), current.get(key)) {
            (None, Some(item)) => result.subtree(ActionKind::Added, item),
            (Some(item), None) => result.subtree(ActionKind::Removed, item),
            (Some(old), Some(new)) => {
                compare(&mut result, NodeRef::Item(old), NodeRef::Item(new), &mut changed);
                diff_seasons(&mut result, old, new, &mut changed);
            }
            (None, None) => {}
        }
    }

    result
}

/// Compare with plain field equality on properties and list entries
pub fn diff_properties<'a>(base: &'a RemoteSnapshot, current: &'a RemoteSnapshot) -> DiffResult<'a> {
    diff(base, current, |old, new| {
        old.properties() != new.properties() || old.entries() != new.entries()
    })
}

fn compare<'a, F>(result: &mut DiffResult<'a>, old: NodeRef<'a>, new: NodeRef<'a>, changed: &mut F)
where
    F: FnMut(NodeRef<'a>, NodeRef<'a>) -> bool,
{
    if changed(old, new) {
        result.extend(Action::single(ActionKind::Changed, Some(old), Some(new)));
    } else {
        result.unchanged.push(new.path());
    }
}

fn diff_seasons<'a, F>(result: &mut DiffResult<'a>, old: &'a RemoteItem, new: &'a RemoteItem, changed: &mut F)
where
    F: FnMut(NodeRef<'a>, NodeRef<'a>) -> bool,
{
    let numbers: BTreeSet<u32> = old.seasons.keys().chain(new.seasons.keys()).copied().collect();

    for number in numbers {
        match (old.seasons.get(&number), new.seasons.get(&number)) {
            (None, Some(season)) => result.season_subtree(ActionKind::Added, new, season),
            (Some(season), None) => result.season_subtree(ActionKind::Removed, old, season),
            (Some(old_season), Some(new_season)) => {
                compare(
                    result,
                    NodeRef::Season(old, old_season),
                    NodeRef::Season(new, new_season),
                    changed,
                );

                let episodes: BTreeSet<u32> = old_season
                    .episodes
                    .keys()
                    .chain(new_season.episodes.keys())
                    .copied()
                    .collect();
                for episode in episodes {
                    let before = old_season
                        .episodes
                        .get(&episode)
                        .map(|e| NodeRef::Episode(old, old_season, e));
                    let after = new_season
                        .episodes
                        .get(&episode)
                        .map(|e| NodeRef::Episode(new, new_season, e));
                    match (before, after) {
                        (Some(b), Some(a)) => compare(result, b, a, changed),
                        (None, Some(a)) => result.extend(Action::single(ActionKind::Added, None, Some(a))),
                        (Some(b), None) => result.extend(Action::single(ActionKind::Removed, Some(b), None)),
                        (None, None) => {}
                    }
                }
            }
            (None, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{IdentityKey, RemoteRating};
    use chrono::{TimeZone, Utc};

    fn rated(value: u8) -> RemoteProperties {
        RemoteProperties {
            rating: Some(RemoteRating::new(value)),
            ..RemoteProperties::default()
        }
    }

    fn movie(id: &str, rating: u8) -> RemoteItem {
        RemoteItem::new(IdentityKey::new("imdb", id), SyncMediaType::MOVIES, id).with_properties(rated(rating))
    }

    fn show(id: &str) -> RemoteItem {
        RemoteItem::new(IdentityKey::new("tvdb", id), SyncMediaType::SHOWS, id)
    }

    fn snapshot(items: Vec<RemoteItem>) -> RemoteSnapshot {
        items.into_iter().map(|item| (item.pk.clone(), item)).collect()
    }

    fn sample() -> RemoteSnapshot {
        snapshot(vec![
            movie("tt100", 7),
            movie("tt200", 5),
            show("81189")
                .with_episode(1, 1, rated(8))
                .with_episode(1, 2, RemoteProperties::default())
                .with_episode(2, 1, rated(9)),
        ])
    }

    #[test]
    fn test_diff_of_identical_snapshots_is_empty() {
        let s = sample();
        let result = diff_properties(&s, &s);
        assert!(result.is_empty());
        // item, 2 seasons, 3 episodes per show + 2 movies
        assert_eq!(result.unchanged.len(), 8);
    }

    #[test]
    fn test_added_and_removed_are_recursive() {
        let base = snapshot(vec![movie("tt100", 7)]);
        let current = snapshot(vec![show("81189").with_episode(1, 1, rated(8)).with_episode(1, 2, rated(6))]);

        let result = diff_properties(&base, &current);

        let added: Vec<String> = result.added.iter().map(|a| a.path.to_string()).collect();
        assert_eq!(
            added,
            vec!["tvdb:81189", "tvdb:81189 S01", "tvdb:81189 S01E01", "tvdb:81189 S01E02"]
        );
        assert_eq!(result.removed.len(), 1);
        assert_eq!(result.removed[0].media, SyncMediaType::MOVIES);
        assert!(result.removed[0].new.is_none());
        assert!(result.added.iter().all(|a| a.old.is_none()));
    }

    #[test]
    fn test_changed_episode_inside_shared_show() {
        let base = sample();
        let mut current = sample();
        let pk = IdentityKey::new("tvdb", "81189");
        current.get_mut(&pk).unwrap().seasons.get_mut(&1).unwrap().episodes.get_mut(&2).unwrap().properties =
            rated(4);

        let result = diff_properties(&base, &current);

        assert_eq!(result.changed.len(), 1);
        let action = &result.changed[0];
        assert_eq!(action.path, ItemPath::episode(pk, 1, 2));
        assert_eq!(action.media, SyncMediaType::EPISODES);
        assert!(action.old.unwrap().properties().rating.is_none());
        assert_eq!(action.new.unwrap().properties().rating.as_ref().unwrap().current, 4);
    }

    #[test]
    fn test_buckets_partition_the_key_set() {
        let base = sample();
        let mut current = sample();
        current.remove(&IdentityKey::new("imdb", "tt200"));
        current.insert(IdentityKey::new("imdb", "tt300"), movie("tt300", 3));
        current.get_mut(&IdentityKey::new("imdb", "tt100")).unwrap().properties = rated(9);
        current
            .get_mut(&IdentityKey::new("tvdb", "81189"))
            .unwrap()
            .seasons
            .remove(&2);

        let result = diff_properties(&base, &current);

        let mut seen: Vec<ItemPath> = result
            .added
            .iter()
            .chain(&result.removed)
            .chain(&result.changed)
            .map(|a| a.path.clone())
            .chain(result.unchanged.iter().cloned())
            .collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), total, "a path landed in two buckets");

        let mut expected = BTreeSet::new();
        for snapshot in [&base, &current] {
            for item in snapshot.values() {
                expected.insert(ItemPath::root(item.pk.clone()));
                for season in item.seasons.values() {
                    expected.insert(ItemPath::season(item.pk.clone(), season.number));
                    for episode in season.episodes.values() {
                        expected.insert(ItemPath::episode(item.pk.clone(), season.number, episode.number));
                    }
                }
            }
        }
        assert_eq!(seen.into_iter().collect::<BTreeSet<_>>(), expected);
        assert_eq!(result.removed.len(), 3); // tt200, S02, S02E01
    }

    #[test]
    fn test_custom_comparator_and_stable_order() {
        let at = Utc.with_ymd_and_hms(2000, 6, 14, 0, 0, 0).unwrap();
        let base = snapshot(vec![movie("tt100", 7)]);
        let mut current = base.clone();
        current.get_mut(&IdentityKey::new("imdb", "tt100")).unwrap().properties.collected_at = Some(at);

        // Only collection timestamps matter
        let result = diff(&base, &current, |o, n| o.properties().collected_at != n.properties().collected_at);
        assert_eq!(result.changed.len(), 1);

        let ratings_only = diff(&base, &current, |o, n| o.properties().rating != n.properties().rating);
        assert!(ratings_only.is_empty());

        let sample_a = sample();
        let sample_b = sample();
        let first = diff_properties(&sample_a, &base).into_actions();
        let second = diff_properties(&sample_b, &base).into_actions();
        assert_eq!(first, second);
    }

    #[test]
    fn test_find_node() {
        let s = sample();
        let pk = IdentityKey::new("tvdb", "81189");
        assert!(matches!(find_node(&s, &ItemPath::episode(pk.clone(), 2, 1)), Some(NodeRef::Episode(..))));
        assert!(find_node(&s, &ItemPath::episode(pk.clone(), 3, 1)).is_none());
        assert_eq!(find_node(&s, &ItemPath::season(pk, 1)).unwrap().media(), SyncMediaType::SEASONS);
    }
}
