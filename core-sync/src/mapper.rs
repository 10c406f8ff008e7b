//! # Identifier Mapper
//!
//! Per-task association between local items and remote primary keys.
//!
//! ## Overview
//!
//! The mapper holds two views of the same mapping:
//! - a per-section table keyed by local id, used by traversals that walk the
//!   local library (pull, push)
//! - a reverse index keyed by remote [`ItemPath`], used by traversals that
//!   start from remote changes (fast pull, lists)
//!
//! Identity resolution picks the first supported agent in priority order
//! (`imdb`, `tmdb`, `tvdb`, `trakt`) and translates it to the remote primary
//! key through the key table built from remote snapshots. Anime agents
//! (`anidb`, `mal`, `anilist`) go through the [`IdMappingService`] first.
//! Items with no usable identity stay in the table with `path = None`.

use crate::types::ItemPath;
use bridge_traits::{
    IdMappingService, IdentityKey, LocalItem, PrimaryKey, RemoteSnapshot, SyncMediaType,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Agents whose identifiers the remote service understands directly
pub const SUPPORTED_SERVICES: [&str; 4] = ["imdb", "tmdb", "tvdb", "trakt"];

/// Agents that must be translated through the mapping service
pub const MAPPED_SERVICES: [&str; 3] = ["anidb", "mal", "anilist"];

/// A local item and where it lives remotely
#[derive(Debug, Clone, PartialEq)]
pub struct MappedItem {
    pub item: LocalItem,
    pub path: Option<ItemPath>,
}

impl MappedItem {
    pub fn pk(&self) -> Option<&PrimaryKey> {
        self.path.as_ref().map(|path| &path.root)
    }
}

/// Outcome of resolving one local item's identities
#[derive(Debug, Clone, PartialEq)]
struct Resolution {
    pk: PrimaryKey,
    season_override: Option<u32>,
}

#[derive(Debug, Default)]
pub struct IdentifierMapper {
    sections: BTreeMap<String, BTreeMap<String, MappedItem>>,
    reverse: BTreeMap<ItemPath, Vec<(String, String)>>,
    key_table: HashMap<IdentityKey, PrimaryKey>,
    unsupported: BTreeMap<String, u64>,
    failed_lookups: u64,
}

impl IdentifierMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learn every identity key of every item in a remote snapshot
    pub fn index_snapshot(&mut self, snapshot: &RemoteSnapshot) {
        for item in snapshot.values() {
            self.key_table.insert(item.pk.clone(), item.pk.clone());
            for key in &item.keys {
                self.key_table.insert(key.clone(), item.pk.clone());
            }
        }
    }

    /// Translate an identity key through the key table
    pub fn resolve_key(&self, key: &IdentityKey) -> Option<&PrimaryKey> {
        self.key_table.get(key)
    }

    /// Resolve and record a batch of local items.
    ///
    /// Shows are resolved before seasons and episodes so that children can
    /// inherit their show's primary key.
    pub async fn map_items(
        &mut self,
        items: Vec<LocalItem>,
        mapping: Option<&dyn IdMappingService>,
    ) {
        let (roots, children): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|item| !item.media.intersects(SyncMediaType::SEASONS | SyncMediaType::EPISODES));
        let (seasons, episodes): (Vec<_>, Vec<_>) = children
            .into_iter()
            .partition(|item| item.media.contains(SyncMediaType::SEASONS));

        let mut shows: HashMap<String, Resolution> = HashMap::new();

        for item in roots {
            let resolution = self.resolve_identity(&item, mapping).await;
            let path = resolution.as_ref().map(|r| ItemPath::root(r.pk.clone()));
            if let Some(resolution) = resolution {
                if item.media.contains(SyncMediaType::SHOWS) {
                    shows.insert(item.local_id.clone(), resolution);
                }
            }
            self.record(item, path);
        }

        // Seasons link to their show through `parent_id`
        let mut season_shows: HashMap<String, String> = HashMap::new();
        for item in seasons {
            let show = item.parent_id.as_ref().and_then(|id| shows.get(id));
            let path = match (show, item.season_number) {
                (Some(show), Some(number)) => Some(ItemPath::season(
                    show.pk.clone(),
                    show.season_override.unwrap_or(number),
                )),
                _ => None,
            };
            if let Some(parent) = &item.parent_id {
                season_shows.insert(item.local_id.clone(), parent.clone());
            }
            self.record(item, path);
        }

        for item in episodes {
            let show_id = item
                .grandparent_id
                .clone()
                .or_else(|| item.parent_id.as_ref().and_then(|p| season_shows.get(p).cloned()));
            let show = show_id.as_ref().and_then(|id| shows.get(id));
            let path = match (show, item.season_number, item.episode_number) {
                (Some(show), Some(season), Some(episode)) => Some(ItemPath::episode(
                    show.pk.clone(),
                    show.season_override.unwrap_or(season),
                    episode,
                )),
                _ => None,
            };
            self.record(item, path);
        }
    }

    async fn resolve_identity(
        &mut self,
        item: &LocalItem,
        mapping: Option<&dyn IdMappingService>,
    ) -> Option<Resolution> {
        for service in SUPPORTED_SERVICES {
            if let Some(key) = item.identities.iter().find(|key| key.service == service) {
                let pk = self.key_table.get(key).cloned().unwrap_or_else(|| key.clone());
                return Some(Resolution {
                    pk,
                    season_override: None,
                });
            }
        }

        for service in MAPPED_SERVICES {
            let Some(key) = item.identities.iter().find(|key| key.service == service) else {
                continue;
            };
            let Some(mapping) = mapping else {
                break;
            };
            match mapping.lookup(&key.service, &key.id, Some(item.media.label())).await {
                Ok(Some(found)) => {
                    let target = found.key();
                    let pk = self.key_table.get(&target).cloned().unwrap_or(target);
                    return Some(Resolution {
                        pk,
                        season_override: found.season,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(service = %key.service, error = %e, "Identifier lookup failed");
                    self.failed_lookups += 1;
                }
            }
        }

        for key in &item.identities {
            *self.unsupported.entry(key.service.clone()).or_insert(0) += 1;
        }
        None
    }

    fn record(&mut self, item: LocalItem, path: Option<ItemPath>) {
        if let Some(path) = &path {
            self.reverse
                .entry(path.clone())
                .or_default()
                .push((item.section_id.clone(), item.local_id.clone()));
        }
        self.sections
            .entry(item.section_id.clone())
            .or_default()
            .insert(item.local_id.clone(), MappedItem { item, path });
    }

    pub fn get(&self, section_id: &str, local_id: &str) -> Option<&MappedItem> {
        self.sections.get(section_id)?.get(local_id)
    }

    /// Every mapped item, ordered by section then local id
    pub fn items(&self) -> impl Iterator<Item = &MappedItem> {
        self.sections.values().flat_map(|section| section.values())
    }

    /// Local items of one section
    pub fn section(&self, section_id: &str) -> impl Iterator<Item = &MappedItem> {
        self.sections
            .get(section_id)
            .into_iter()
            .flat_map(|section| section.values())
    }

    /// Local items mapped to a remote node
    pub fn lookup(&self, path: &ItemPath) -> Vec<&MappedItem> {
        self.reverse
            .get(path)
            .map(|locals| {
                locals
                    .iter()
                    .filter_map(|(section, local)| self.get(section, local))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sections.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items recorded without a primary key
    pub fn unmatched_count(&self) -> u64 {
        self.items().filter(|mapped| mapped.path.is_none()).count() as u64
    }

    pub fn unsupported_count(&self) -> u64 {
        self.unsupported.values().sum()
    }

    pub fn failed_lookups(&self) -> u64 {
        self.failed_lookups
    }

    /// Log the unsupported identifier tally once, then reset it
    pub fn log_unsupported(&mut self) {
        for (service, count) in std::mem::take(&mut self.unsupported) {
            warn!(service = %service, count, "Skipped items with unsupported identifiers");
        }
        if self.failed_lookups > 0 {
            warn!(count = self.failed_lookups, "Identifier mapping lookups failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{BridgeError, RemoteItem, RemoteMatch};

    struct AnimeMapping;

    #[async_trait]
    impl IdMappingService for AnimeMapping {
        async fn lookup(
            &self,
            service: &str,
            id: &str,
            _context: Option<&str>,
        ) -> BridgeResult<Option<RemoteMatch>> {
            match (service, id) {
                ("anidb", "69") => Ok(Some(RemoteMatch {
                    service: "tvdb".to_string(),
                    id: "81797".to_string(),
                    season: Some(2),
                })),
                ("anidb", "500") => Err(BridgeError::OperationFailed("offline".to_string())),
                _ => Ok(None),
            }
        }
    }

    fn movie(id: &str) -> LocalItem {
        LocalItem::new(id, "1", SyncMediaType::MOVIES, format!("Movie {id}"))
    }

    fn snapshot_with(item: RemoteItem) -> RemoteSnapshot {
        [(item.pk.clone(), item)].into_iter().collect()
    }

    #[tokio::test]
    async fn test_priority_prefers_imdb() {
        let mut mapper = IdentifierMapper::new();
        let item = movie("10")
            .with_identity("tmdb", "949")
            .with_identity("imdb", "tt0113277");

        mapper.map_items(vec![item], None).await;

        let mapped = mapper.get("1", "10").unwrap();
        assert_eq!(mapped.pk(), Some(&IdentityKey::new("imdb", "tt0113277")));
    }

    #[tokio::test]
    async fn test_key_table_translates_to_primary_key() {
        let mut mapper = IdentifierMapper::new();
        let mut remote = RemoteItem::new(IdentityKey::new("trakt", "1"), SyncMediaType::MOVIES, "Heat");
        remote.keys.push(IdentityKey::new("tmdb", "949"));
        mapper.index_snapshot(&snapshot_with(remote));

        mapper.map_items(vec![movie("10").with_identity("tmdb", "949")], None).await;

        let path = ItemPath::root(IdentityKey::new("trakt", "1"));
        assert_eq!(mapper.lookup(&path).len(), 1);
        assert_eq!(mapper.lookup(&path)[0].item.local_id, "10");
    }

    #[tokio::test]
    async fn test_unsupported_identity_is_unmatched() {
        let mut mapper = IdentifierMapper::new();
        let item = movie("11").with_identity("local", "abc");

        mapper.map_items(vec![item], None).await;

        assert_eq!(mapper.get("1", "11").unwrap().path, None);
        assert_eq!(mapper.unmatched_count(), 1);
        assert_eq!(mapper.unsupported_count(), 1);

        mapper.log_unsupported();
        assert_eq!(mapper.unsupported_count(), 0);
    }

    #[tokio::test]
    async fn test_episodes_inherit_show_key() {
        let mut mapper = IdentifierMapper::new();
        let show = LocalItem::new("100", "2", SyncMediaType::SHOWS, "Show").with_identity("tvdb", "81189");
        let mut season = LocalItem::new("101", "2", SyncMediaType::SEASONS, "Season 1");
        season.parent_id = Some("100".to_string());
        season.season_number = Some(1);
        let mut episode = LocalItem::new("102", "2", SyncMediaType::EPISODES, "Pilot");
        episode.parent_id = Some("101".to_string());
        episode.season_number = Some(1);
        episode.episode_number = Some(1);

        // Children first, to show ordering does not depend on input order
        mapper.map_items(vec![episode, season, show], None).await;

        let pk = IdentityKey::new("tvdb", "81189");
        assert_eq!(
            mapper.get("2", "102").unwrap().path,
            Some(ItemPath::episode(pk.clone(), 1, 1))
        );
        assert_eq!(
            mapper.get("2", "101").unwrap().path,
            Some(ItemPath::season(pk, 1))
        );
    }

    #[tokio::test]
    async fn test_mapped_agent_goes_through_mapping_service() {
        let mut mapper = IdentifierMapper::new();
        let show = LocalItem::new("200", "3", SyncMediaType::SHOWS, "Anime").with_identity("anidb", "69");
        let mut episode = LocalItem::new("201", "3", SyncMediaType::EPISODES, "Ep 4");
        episode.grandparent_id = Some("200".to_string());
        episode.season_number = Some(1);
        episode.episode_number = Some(4);
        let failing = LocalItem::new("202", "3", SyncMediaType::SHOWS, "Other").with_identity("anidb", "500");

        mapper
            .map_items(vec![show, episode, failing], Some(&AnimeMapping))
            .await;

        assert_eq!(
            mapper.get("3", "201").unwrap().path,
            Some(ItemPath::episode(IdentityKey::new("tvdb", "81797"), 2, 4))
        );
        assert_eq!(mapper.get("3", "202").unwrap().path, None);
        assert_eq!(mapper.failed_lookups(), 1);
    }

    #[tokio::test]
    async fn test_mapped_agent_without_service_is_unsupported() {
        let mut mapper = IdentifierMapper::new();
        let show = LocalItem::new("300", "3", SyncMediaType::SHOWS, "Anime").with_identity("mal", "1");

        mapper.map_items(vec![show], None).await;

        assert_eq!(mapper.unsupported_count(), 1);
        assert_eq!(mapper.len(), 1);
    }
}
