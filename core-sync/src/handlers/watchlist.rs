//! Watchlists: the personal watchlist and the user's lists.
//!
//! Watchlisted movies and shows map to membership in the local playlist named
//! by `watchlist_playlist`. Remote lists have no local record of their own;
//! their entries become members of a local playlist named after the list.

use super::{
    ActionParams, Binding, BindingTable, DataHandler, Effect, MediaHandler, ANY_PULL, FAST_PULL,
};
use crate::diff::NodeRef;
use crate::types::{ActionKind, ItemPath, SyncValue};
use crate::Result;
use bridge_traits::{LocalItem, LocalUpdate, PrimaryKey, SyncDataCategory, SyncMediaType};
use core_runtime::config::SyncSettings;

pub fn data_handler(category: SyncDataCategory) -> Result<DataHandler> {
    let mut handlers: Vec<Box<dyn MediaHandler>> = Vec::new();
    if category == SyncDataCategory::WATCHLIST_PERSONAL {
        handlers.push(Box::new(WatchlistHandler::new(category, SyncMediaType::MOVIES)?));
        handlers.push(Box::new(WatchlistHandler::new(category, SyncMediaType::SHOWS)?));
    }
    handlers.push(Box::new(ListHandler::new(category)?));
    Ok(DataHandler::new(category, handlers))
}

// ============================================================================
// Watchlisted Movies and Shows
// ============================================================================

pub struct WatchlistHandler {
    category: SyncDataCategory,
    media: SyncMediaType,
    bindings: BindingTable,
}

impl WatchlistHandler {
    pub fn new(category: SyncDataCategory, media: SyncMediaType) -> Result<Self> {
        let bindings = BindingTable::build(
            "watchlist",
            &[
                Binding::new(ActionKind::Added, ANY_PULL, add_to_watchlist),
                Binding::new(ActionKind::Removed, FAST_PULL, remove_from_watchlist),
            ],
        )?;
        Ok(Self {
            category,
            media,
            bindings,
        })
    }
}

impl MediaHandler for WatchlistHandler {
    fn name(&self) -> &'static str {
        "watchlist"
    }

    fn category(&self) -> SyncDataCategory {
        self.category
    }

    fn media(&self) -> SyncMediaType {
        self.media
    }

    fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    fn local_value(&self, item: &LocalItem, settings: &SyncSettings) -> Option<SyncValue> {
        item.playlists
            .contains(&settings.watchlist_playlist)
            .then_some(SyncValue::Present)
    }

    fn remote_value(&self, node: NodeRef<'_>) -> Option<SyncValue> {
        match node {
            NodeRef::Item(_) => Some(SyncValue::Present),
            _ => None,
        }
    }

    fn build_action(&self, params: &ActionParams<'_>) -> bool {
        let playlist = &params.env.settings.watchlist_playlist;
        let listed = params.local.is_some_and(|item| item.playlists.contains(playlist));
        match params.kind {
            ActionKind::Added => !listed,
            ActionKind::Removed => listed,
            ActionKind::Changed => false,
        }
    }
}

fn add_to_watchlist(params: &ActionParams<'_>) -> Vec<Effect> {
    params.local_update(LocalUpdate::AddToPlaylist {
        playlist: params.env.settings.watchlist_playlist.clone(),
    })
}

fn remove_from_watchlist(params: &ActionParams<'_>) -> Vec<Effect> {
    params.local_update(LocalUpdate::RemoveFromPlaylist {
        playlist: params.env.settings.watchlist_playlist.clone(),
    })
}

// ============================================================================
// Lists
// ============================================================================

pub struct ListHandler {
    category: SyncDataCategory,
    bindings: BindingTable,
}

impl ListHandler {
    pub fn new(category: SyncDataCategory) -> Result<Self> {
        let bindings = BindingTable::build(
            "lists",
            &[
                Binding::new(ActionKind::Added, ANY_PULL, sync_entries),
                Binding::new(ActionKind::Changed, ANY_PULL, sync_entries),
                Binding::new(ActionKind::Removed, FAST_PULL, sync_entries),
            ],
        )?;
        Ok(Self { category, bindings })
    }
}

impl MediaHandler for ListHandler {
    fn name(&self) -> &'static str {
        "lists"
    }

    fn category(&self) -> SyncDataCategory {
        self.category
    }

    fn media(&self) -> SyncMediaType {
        SyncMediaType::LISTS
    }

    fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    fn local_value(&self, _item: &LocalItem, _settings: &SyncSettings) -> Option<SyncValue> {
        None
    }

    fn remote_value(&self, node: NodeRef<'_>) -> Option<SyncValue> {
        match node {
            NodeRef::Item(_) => Some(SyncValue::Entries(node.entries().to_vec())),
            _ => None,
        }
    }
}

/// Apply entry-level membership changes to the list's playlist
fn sync_entries(params: &ActionParams<'_>) -> Vec<Effect> {
    let old = params.old.map_or(&[][..], SyncValue::entries);
    let new = params.new.map_or(&[][..], SyncValue::entries);
    let playlist = params.title;
    let mut effects = Vec::new();

    let added = new.iter().filter(|pk| !old.contains(pk));
    for pk in added {
        let locals = params.env.mapper.lookup(&ItemPath::root(pk.clone()));
        if locals.is_empty() {
            effects.push(Effect::MissingLocally(ItemPath::root(pk.clone())));
        }
        for mapped in locals {
            if !mapped.item.playlists.contains(playlist) {
                effects.push(Effect::Local {
                    local_id: mapped.item.local_id.clone(),
                    update: LocalUpdate::AddToPlaylist {
                        playlist: playlist.to_string(),
                    },
                });
            }
        }
    }

    let removed = old.iter().filter(|pk| !new.contains(pk));
    for pk in removed {
        effects.extend(remove_entry(params, pk, playlist));
    }

    effects
}

fn remove_entry(params: &ActionParams<'_>, pk: &PrimaryKey, playlist: &str) -> Vec<Effect> {
    params
        .env
        .mapper
        .lookup(&ItemPath::root(pk.clone()))
        .into_iter()
        .filter(|mapped| mapped.item.playlists.contains(playlist))
        .map(|mapped| Effect::Local {
            local_id: mapped.item.local_id.clone(),
            update: LocalUpdate::RemoveFromPlaylist {
                playlist: playlist.to_string(),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{Comparison, HandlerEnv};
    use crate::mapper::IdentifierMapper;
    use crate::types::SyncMode;
    use bridge_traits::IdentityKey;
    use chrono::Utc;

    fn local_movie(local_id: &str, imdb: &str, playlists: &[&str]) -> LocalItem {
        let mut item = LocalItem::new(local_id, "1", SyncMediaType::MOVIES, imdb).with_identity("imdb", imdb);
        item.playlists = playlists.iter().map(|p| p.to_string()).collect();
        item
    }

    fn imdb(id: &str) -> PrimaryKey {
        IdentityKey::new("imdb", id)
    }

    async fn mapper_with(items: Vec<LocalItem>) -> IdentifierMapper {
        let mut mapper = IdentifierMapper::new();
        mapper.map_items(items, None).await;
        mapper
    }

    fn run_list(
        mapper: &IdentifierMapper,
        mode: SyncMode,
        old: Option<Vec<PrimaryKey>>,
        new: Option<Vec<PrimaryKey>>,
    ) -> Vec<Effect> {
        let handler = ListHandler::new(SyncDataCategory::WATCHLIST_LIKED).unwrap();
        let settings = SyncSettings::default();
        let env = HandlerEnv {
            settings: &settings,
            mapper,
            now: Utc::now(),
        };
        let path = ItemPath::root(IdentityKey::new("trakt", "list-1"));
        let comparison = Comparison {
            path: &path,
            media: SyncMediaType::LISTS,
            title: "Heist Movies",
            local: None,
            old: old.map(SyncValue::Entries),
            new: new.map(SyncValue::Entries),
        };
        handler.run(mode, &comparison, &env)
    }

    #[tokio::test]
    async fn test_new_list_adds_members_and_tallies_missing() {
        let mapper = mapper_with(vec![
            local_movie("1", "tt0113277", &[]),
            local_movie("2", "tt0122690", &["Heist Movies"]),
        ])
        .await;

        let effects = run_list(
            &mapper,
            SyncMode::Pull,
            None,
            Some(vec![imdb("tt0113277"), imdb("tt0122690"), imdb("tt9999999")]),
        );

        assert_eq!(
            effects,
            vec![
                Effect::Local {
                    local_id: "1".to_string(),
                    update: LocalUpdate::AddToPlaylist {
                        playlist: "Heist Movies".to_string()
                    },
                },
                Effect::MissingLocally(ItemPath::root(imdb("tt9999999"))),
            ]
        );
    }

    #[tokio::test]
    async fn test_changed_list_adds_and_removes_entries() {
        let mapper = mapper_with(vec![
            local_movie("1", "tt0113277", &["Heist Movies"]),
            local_movie("2", "tt0122690", &[]),
        ])
        .await;

        let effects = run_list(
            &mapper,
            SyncMode::FastPull,
            Some(vec![imdb("tt0113277")]),
            Some(vec![imdb("tt0122690")]),
        );

        assert_eq!(effects.len(), 2);
        assert!(effects.contains(&Effect::Local {
            local_id: "2".to_string(),
            update: LocalUpdate::AddToPlaylist {
                playlist: "Heist Movies".to_string()
            },
        }));
        assert!(effects.contains(&Effect::Local {
            local_id: "1".to_string(),
            update: LocalUpdate::RemoveFromPlaylist {
                playlist: "Heist Movies".to_string()
            },
        }));
    }

    #[tokio::test]
    async fn test_lists_are_not_pushed() {
        let mapper = mapper_with(Vec::new()).await;
        let effects = run_list(&mapper, SyncMode::Push, None, Some(vec![imdb("tt0113277")]));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_watchlist_membership_from_playlist() {
        let handler =
            WatchlistHandler::new(SyncDataCategory::WATCHLIST_PERSONAL, SyncMediaType::MOVIES).unwrap();
        let settings = SyncSettings::default();
        let listed = local_movie("1", "tt0113277", &["Watchlist"]);
        let unlisted = local_movie("2", "tt0122690", &["Other"]);

        assert_eq!(handler.local_value(&listed, &settings), Some(SyncValue::Present));
        assert_eq!(handler.local_value(&unlisted, &settings), None);
    }

    #[test]
    fn test_watchlist_pull_adds_to_playlist() {
        let handler =
            WatchlistHandler::new(SyncDataCategory::WATCHLIST_PERSONAL, SyncMediaType::MOVIES).unwrap();
        let settings = SyncSettings::default();
        let mapper = IdentifierMapper::new();
        let env = HandlerEnv {
            settings: &settings,
            mapper: &mapper,
            now: Utc::now(),
        };
        let item = local_movie("1", "tt0113277", &[]);
        let path = ItemPath::root(imdb("tt0113277"));
        let comparison = Comparison {
            path: &path,
            media: SyncMediaType::MOVIES,
            title: "Heat",
            local: Some(&item),
            old: handler.local_value(&item, &settings),
            new: Some(SyncValue::Present),
        };

        assert_eq!(
            handler.run(SyncMode::Full, &comparison, &env),
            vec![Effect::Local {
                local_id: "1".to_string(),
                update: LocalUpdate::AddToPlaylist {
                    playlist: "Watchlist".to_string()
                },
            }]
        );
        assert!(handler.run(SyncMode::Push, &comparison, &env).is_empty());
    }

    #[test]
    fn test_liked_category_only_handles_lists() {
        let handler = data_handler(SyncDataCategory::WATCHLIST_LIKED).unwrap();
        assert_eq!(handler.media(), SyncMediaType::LISTS);
        let personal = data_handler(SyncDataCategory::WATCHLIST_PERSONAL).unwrap();
        assert_eq!(
            personal.media(),
            SyncMediaType::MOVIES | SyncMediaType::SHOWS | SyncMediaType::LISTS
        );
    }
}
