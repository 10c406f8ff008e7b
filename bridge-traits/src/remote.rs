//! Remote Account Abstractions
//!
//! The remote account service keeps the user's social and tracking state:
//! collection, ratings, watched history, playback progress and watchlists.
//!
//! Collections are fetched whole, keyed by primary key. Episodic media is
//! nested show → season → episode inside the show record. Writes go through a
//! single batched endpoint per data category.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::media::{AccountId, CollectionKey, IdentityKey, PrimaryKey, SyncDataCategory, SyncMediaType};

/// A remote rating with the value it replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRating {
    pub previous: Option<u8>,
    pub current: u8,
    pub rated_at: Option<DateTime<Utc>>,
}

impl RemoteRating {
    pub fn new(current: u8) -> Self {
        Self {
            previous: None,
            current,
            rated_at: None,
        }
    }
}

/// Per-category attributes of one remote node.
///
/// Only the fields belonging to the collection a snapshot was fetched for
/// are populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteProperties {
    pub collected_at: Option<DateTime<Utc>>,
    pub rating: Option<RemoteRating>,
    pub plays: Option<u32>,
    pub last_watched_at: Option<DateTime<Utc>>,
    /// Playback progress in percent (0-100)
    pub progress: Option<f32>,
    pub paused_at: Option<DateTime<Utc>>,
    pub listed_at: Option<DateTime<Utc>>,
}

impl RemoteProperties {
    pub fn is_empty(&self) -> bool {
        self == &RemoteProperties::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEpisode {
    pub number: u32,
    pub properties: RemoteProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSeason {
    pub number: u32,
    pub properties: RemoteProperties,
    pub episodes: BTreeMap<u32, RemoteEpisode>,
}

/// A top-level remote record: a movie, a show or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub pk: PrimaryKey,
    /// Every identity known for the item, `pk` included
    pub keys: Vec<IdentityKey>,
    pub media: SyncMediaType,
    pub title: String,
    pub properties: RemoteProperties,
    #[serde(default)]
    pub seasons: BTreeMap<u32, RemoteSeason>,
    /// Ordered entries of a list record
    #[serde(default)]
    pub entries: Vec<PrimaryKey>,
}

impl RemoteItem {
    pub fn new(pk: PrimaryKey, media: SyncMediaType, title: impl Into<String>) -> Self {
        Self {
            keys: vec![pk.clone()],
            pk,
            media,
            title: title.into(),
            properties: RemoteProperties::default(),
            seasons: BTreeMap::new(),
            entries: Vec::new(),
        }
    }

    pub fn with_properties(mut self, properties: RemoteProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Insert or replace one episode, creating its season on demand.
    pub fn with_episode(mut self, season: u32, episode: u32, properties: RemoteProperties) -> Self {
        self.seasons
            .entry(season)
            .or_insert_with(|| RemoteSeason {
                number: season,
                ..RemoteSeason::default()
            })
            .episodes
            .insert(
                episode,
                RemoteEpisode {
                    number: episode,
                    properties,
                },
            );
        self
    }
}

/// A whole remote collection keyed by primary key.
pub type RemoteSnapshot = BTreeMap<PrimaryKey, RemoteItem>;

/// Last activity timestamp per collection.
pub type ActivityMap = BTreeMap<CollectionKey, DateTime<Utc>>;

/// A collection whose activity advanced, refetched whole.
#[derive(Debug, Clone)]
pub struct ChangedCollection {
    pub key: CollectionKey,
    pub activity: DateTime<Utc>,
    pub snapshot: RemoteSnapshot,
}

/// Direction of a batched write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactOp {
    Add,
    Remove,
}

impl ArtifactOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactOp::Add => "add",
            ArtifactOp::Remove => "remove",
        }
    }
}

/// Outcome reported by the remote service for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub accepted: u32,
    pub not_found: Vec<IdentityKey>,
}

/// Remote account service trait
///
/// Implementations wrap the service's HTTP API, including pagination, rate
/// limiting and authentication. The engine awaits every call sequentially.
#[async_trait]
pub trait RemoteAccount: Send + Sync {
    /// Last activity timestamp of every collection of the account
    async fn last_activity(&self, account: &AccountId) -> Result<ActivityMap>;

    /// Fetch one collection in full
    async fn fetch_collection(
        &self,
        account: &AccountId,
        key: CollectionKey,
    ) -> Result<RemoteSnapshot>;

    /// Collections among `wanted` whose activity advanced past `since`
    ///
    /// A collection missing from `since` counts as never seen. The default
    /// implementation compares activity timestamps and refetches each
    /// advanced collection in full.
    async fn fetch_changes(
        &self,
        account: &AccountId,
        since: &ActivityMap,
        wanted: &[CollectionKey],
    ) -> Result<Vec<ChangedCollection>> {
        let current = self.last_activity(account).await?;
        let mut changed = Vec::new();

        for key in wanted {
            let Some(activity) = current.get(key) else {
                continue;
            };
            let advanced = since.get(key).map_or(true, |previous| activity > previous);
            if advanced {
                let snapshot = self.fetch_collection(account, *key).await?;
                changed.push(ChangedCollection {
                    key: *key,
                    activity: *activity,
                    snapshot,
                });
            }
        }

        Ok(changed)
    }

    /// Send one batch of mutations for a data category
    async fn batch_write(
        &self,
        account: &AccountId,
        category: SyncDataCategory,
        op: ArtifactOp,
        payload: serde_json::Value,
    ) -> Result<WriteResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct FixedRemote {
        activity: ActivityMap,
        fetched: Mutex<Vec<CollectionKey>>,
    }

    #[async_trait]
    impl RemoteAccount for FixedRemote {
        async fn last_activity(&self, _account: &AccountId) -> Result<ActivityMap> {
            Ok(self.activity.clone())
        }

        async fn fetch_collection(
            &self,
            _account: &AccountId,
            key: CollectionKey,
        ) -> Result<RemoteSnapshot> {
            self.fetched.lock().unwrap().push(key);
            Ok(RemoteSnapshot::new())
        }

        async fn batch_write(
            &self,
            _account: &AccountId,
            _category: SyncDataCategory,
            _op: ArtifactOp,
            _payload: serde_json::Value,
        ) -> Result<WriteResult> {
            Ok(WriteResult::default())
        }
    }

    #[tokio::test]
    async fn test_default_fetch_changes_only_refetches_advanced() {
        let ratings = CollectionKey::new(SyncMediaType::MOVIES, SyncDataCategory::RATINGS);
        let watched = CollectionKey::new(SyncMediaType::MOVIES, SyncDataCategory::WATCHED);
        let collection = CollectionKey::new(SyncMediaType::MOVIES, SyncDataCategory::COLLECTION);
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let remote = FixedRemote {
            activity: [(ratings, t2), (watched, t1), (collection, t1)]
                .into_iter()
                .collect(),
            fetched: Mutex::new(Vec::new()),
        };
        let since: ActivityMap = [(ratings, t1), (watched, t1)].into_iter().collect();

        let changed = remote
            .fetch_changes(
                &AccountId::new("acc"),
                &since,
                &[ratings, watched, collection],
            )
            .await
            .unwrap();

        let keys: Vec<_> = changed.iter().map(|c| c.key).collect();
        assert_eq!(keys, vec![ratings, collection]);
        assert_eq!(*remote.fetched.lock().unwrap(), vec![ratings, collection]);
    }

    #[test]
    fn test_with_episode_creates_season() {
        let show = RemoteItem::new(IdentityKey::new("tvdb", "1"), SyncMediaType::SHOWS, "Show")
            .with_episode(1, 2, RemoteProperties::default())
            .with_episode(1, 3, RemoteProperties::default());
        assert_eq!(show.seasons.len(), 1);
        assert_eq!(show.seasons[&1].episodes.len(), 2);
    }
}
