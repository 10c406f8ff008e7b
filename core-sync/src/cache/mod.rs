//! # Change Cache
//!
//! Persisted, versioned view of the remote account's collections.
//!
//! ## Overview
//!
//! One [`CacheEntry`] exists per (media, category) collection of an account.
//! Entries are loaded lazily from the [`ChangeCacheStore`] the first time a
//! task touches them and stay in memory for later tasks of the same account.
//!
//! [`ChangeCache::pending_changes`] asks the remote side which collections
//! moved past their committed activity timestamp, refetches only those and
//! returns a [`ChangeFeed`] per changed collection. A collection seen for the
//! first time yields a cold feed: every remote item is new.
//!
//! Reading the feed leaves the entries untouched. Only a pull that has
//! applied a feed hands it back to [`ChangeCache::commit`], which advances
//! the entry's activity and version. A cancelled or failed pull, or a push
//! that only looked at the feed, leaves the changes pending for the next
//! fast pull.
//!
//! The cache is shared by every task of an account. It relies on the sync
//! manager running one task at a time; the per-account lock only protects
//! against status readers.

mod store;

pub use store::{ChangeCacheStore, RevisionKind, SqliteChangeCacheStore};

use crate::Result;
use bridge_traits::{AccountId, ActivityMap, CollectionKey, RemoteAccount, RemoteSnapshot};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

static EMPTY: RemoteSnapshot = RemoteSnapshot::new();

/// Cached state of one remote collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    pub items: RemoteSnapshot,
    pub last_activity: Option<DateTime<Utc>>,
    pub version: u64,
    /// Consecutive delta revisions since the last full one
    pub delta_chain: u32,
}

/// What changed in one collection since the last committed pull
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    pub key: CollectionKey,
    pub previous: Option<RemoteSnapshot>,
    pub current: RemoteSnapshot,
    /// Remote activity `current` was read at
    pub activity: DateTime<Utc>,
    /// No earlier state was known
    pub cold: bool,
}

impl ChangeFeed {
    /// The snapshot to diff against; empty for a cold feed
    pub fn base(&self) -> &RemoteSnapshot {
        self.previous.as_ref().unwrap_or(&EMPTY)
    }
}

/// Change cache of one account
pub struct ChangeCache {
    account: AccountId,
    store: Arc<dyn ChangeCacheStore>,
    entries: BTreeMap<CollectionKey, CacheEntry>,
    /// Keys already looked up in the store, present or not
    loaded: Vec<CollectionKey>,
}

impl ChangeCache {
    pub fn new(account: AccountId, store: Arc<dyn ChangeCacheStore>) -> Self {
        Self {
            account,
            store,
            entries: BTreeMap::new(),
            loaded: Vec::new(),
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    async fn ensure_loaded(&mut self, key: CollectionKey) -> Result<()> {
        if self.loaded.contains(&key) {
            return Ok(());
        }
        if let Some(entry) = self.store.load(&self.account, key).await? {
            debug!(collection = %key, version = entry.version, "Loaded change cache entry");
            self.entries.insert(key, entry);
        }
        self.loaded.push(key);
        Ok(())
    }

    /// Cached entry for a collection, loading it on first use
    pub async fn entry(&mut self, key: CollectionKey) -> Result<Option<&CacheEntry>> {
        self.ensure_loaded(key).await?;
        Ok(self.entries.get(&key))
    }

    /// Cached snapshot for an already loaded collection
    pub fn snapshot(&self, key: CollectionKey) -> Option<&RemoteSnapshot> {
        self.entries.get(&key).map(|entry| &entry.items)
    }

    /// Fetch the collections that moved past their committed activity.
    ///
    /// The entries are not touched: the same changes are reported again
    /// until they are committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the change feed cannot be read
    pub async fn pending_changes(
        &mut self,
        remote: &dyn RemoteAccount,
        keys: &[CollectionKey],
    ) -> Result<Vec<ChangeFeed>> {
        for key in keys {
            self.ensure_loaded(*key).await?;
        }

        let since: ActivityMap = keys
            .iter()
            .filter_map(|key| {
                let activity = self.entries.get(key)?.last_activity?;
                Some((*key, activity))
            })
            .collect();

        let changed = remote.fetch_changes(&self.account, &since, keys).await?;
        let feeds = changed
            .into_iter()
            .map(|collection| {
                let previous = self.snapshot(collection.key).cloned();
                info!(
                    collection = %collection.key,
                    items = collection.snapshot.len(),
                    cold = previous.is_none(),
                    "Remote collection changed"
                );
                ChangeFeed {
                    key: collection.key,
                    cold: previous.is_none(),
                    previous,
                    current: collection.snapshot,
                    activity: collection.activity,
                }
            })
            .collect();

        Ok(feeds)
    }

    /// Record an applied feed as the collection's new state.
    ///
    /// A failure to persist the revision is logged and the in-memory entry
    /// still advances.
    pub async fn commit(&mut self, feed: ChangeFeed) {
        debug!(collection = %feed.key, activity = %feed.activity, "Committing change feed");
        self.store_snapshot(feed.key, feed.current, Some(feed.activity)).await;
    }

    /// Replace an entry with a freshly fetched snapshot
    pub async fn replace(
        &mut self,
        key: CollectionKey,
        snapshot: RemoteSnapshot,
        activity: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.ensure_loaded(key).await?;
        self.store_snapshot(key, snapshot, activity).await;
        Ok(())
    }

    /// Install a new snapshot, returning the one it replaced
    async fn store_snapshot(
        &mut self,
        key: CollectionKey,
        items: RemoteSnapshot,
        activity: Option<DateTime<Utc>>,
    ) -> Option<RemoteSnapshot> {
        let previous = self.entries.remove(&key);
        let mut next = CacheEntry {
            items,
            last_activity: activity.or_else(|| previous.as_ref().and_then(|p| p.last_activity)),
            version: previous.as_ref().map_or(1, |p| p.version + 1),
            delta_chain: 0,
        };

        match self.store.save(&self.account, key, previous.as_ref(), &next).await {
            Ok(RevisionKind::Delta) => {
                next.delta_chain = previous.as_ref().map_or(0, |p| p.delta_chain) + 1;
            }
            Ok(RevisionKind::Full) => {}
            Err(e) => {
                warn!(collection = %key, error = %e, "Failed to persist change cache revision");
            }
        }

        self.entries.insert(key, next);
        previous.map(|entry| entry.items)
    }
}

/// Per-account change caches shared across tasks
pub struct ChangeCacheRegistry {
    store: Arc<dyn ChangeCacheStore>,
    caches: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<ChangeCache>>>>,
}

impl ChangeCacheRegistry {
    pub fn new(store: Arc<dyn ChangeCacheStore>) -> Self {
        Self {
            store,
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// The cache of an account, created on first use
    pub fn get(&self, account: &AccountId) -> Arc<tokio::sync::Mutex<ChangeCache>> {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        caches
            .entry(account.clone())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(ChangeCache::new(
                    account.clone(),
                    self.store.clone(),
                )))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::store::plan_revision;
    use super::*;
    use crate::db::create_test_pool;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        ArtifactOp, IdentityKey, RemoteItem, RemoteProperties, RemoteRating, SyncDataCategory,
        SyncMediaType, WriteResult,
    };
    use chrono::TimeZone;

    fn ratings() -> CollectionKey {
        CollectionKey::new(SyncMediaType::MOVIES, SyncDataCategory::RATINGS)
    }

    fn rated_movie(n: u32, value: u8) -> RemoteItem {
        RemoteItem::new(IdentityKey::new("imdb", format!("tt{n}")), SyncMediaType::MOVIES, format!("Movie {n}"))
            .with_properties(RemoteProperties {
                rating: Some(RemoteRating::new(value)),
                ..RemoteProperties::default()
            })
    }

    fn snapshot(count: u32, value: u8) -> RemoteSnapshot {
        (0..count)
            .map(|n| rated_movie(n, value))
            .map(|item| (item.pk.clone(), item))
            .collect()
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    struct ScriptedRemote {
        activity: Mutex<ActivityMap>,
        collection: Mutex<RemoteSnapshot>,
    }

    impl ScriptedRemote {
        fn publish(&self, day: u32, snapshot: RemoteSnapshot) {
            self.activity.lock().unwrap().insert(ratings(), at(day));
            *self.collection.lock().unwrap() = snapshot;
        }
    }

    #[async_trait]
    impl RemoteAccount for ScriptedRemote {
        async fn last_activity(&self, _account: &AccountId) -> BridgeResult<ActivityMap> {
            Ok(self.activity.lock().unwrap().clone())
        }

        async fn fetch_collection(&self, _account: &AccountId, _key: CollectionKey) -> BridgeResult<RemoteSnapshot> {
            Ok(self.collection.lock().unwrap().clone())
        }

        async fn batch_write(
            &self,
            _account: &AccountId,
            _category: SyncDataCategory,
            _op: ArtifactOp,
            _payload: serde_json::Value,
        ) -> BridgeResult<WriteResult> {
            Ok(WriteResult::default())
        }
    }

    async fn store(threshold: f64, chain: u32) -> Arc<SqliteChangeCacheStore> {
        let pool = create_test_pool().await.unwrap();
        Arc::new(SqliteChangeCacheStore::new(pool, threshold, chain))
    }

    #[test]
    fn test_small_change_is_written_as_delta() {
        let previous = CacheEntry {
            items: snapshot(20, 7),
            version: 1,
            ..CacheEntry::default()
        };
        let mut items = previous.items.clone();
        items.insert(rated_movie(3, 9).pk.clone(), rated_movie(3, 9));
        let next = CacheEntry { items, version: 2, ..CacheEntry::default() };

        let (kind, _) = plan_revision(Some(&previous), &next, 0.25, 8).unwrap();
        assert_eq!(kind, RevisionKind::Delta);
    }

    #[test]
    fn test_large_change_is_written_in_full() {
        let previous = CacheEntry {
            items: snapshot(20, 7),
            version: 1,
            ..CacheEntry::default()
        };
        let next = CacheEntry {
            items: snapshot(20, 9),
            version: 2,
            ..CacheEntry::default()
        };

        let (kind, _) = plan_revision(Some(&previous), &next, 0.25, 8).unwrap();
        assert_eq!(kind, RevisionKind::Full);
        assert_eq!(plan_revision(None, &next, 0.25, 8).unwrap().0, RevisionKind::Full);
    }

    #[test]
    fn test_long_delta_chain_forces_full() {
        let previous = CacheEntry {
            items: snapshot(20, 7),
            version: 5,
            delta_chain: 2,
            ..CacheEntry::default()
        };
        let next = CacheEntry {
            items: snapshot(19, 7),
            version: 6,
            ..CacheEntry::default()
        };

        assert_eq!(plan_revision(Some(&previous), &next, 0.25, 2).unwrap().0, RevisionKind::Full);
        assert_eq!(plan_revision(Some(&previous), &next, 0.25, 3).unwrap().0, RevisionKind::Delta);
    }

    fn scripted_remote() -> ScriptedRemote {
        ScriptedRemote {
            activity: Mutex::new(ActivityMap::new()),
            collection: Mutex::new(RemoteSnapshot::new()),
        }
    }

    async fn commit_all(cache: &mut ChangeCache, feeds: Vec<ChangeFeed>) {
        for feed in feeds {
            cache.commit(feed).await;
        }
    }

    #[tokio::test]
    async fn test_committed_feeds_report_cold_then_incremental_changes() {
        let store = store(0.25, 8).await;
        let remote = scripted_remote();
        let mut cache = ChangeCache::new(AccountId::new("acc"), store.clone());

        remote.publish(1, snapshot(10, 7));
        let feeds = cache.pending_changes(&remote, &[ratings()]).await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert!(feeds[0].cold);
        assert!(feeds[0].base().is_empty());
        commit_all(&mut cache, feeds).await;
        assert_eq!(cache.entry(ratings()).await.unwrap().unwrap().version, 1);

        // Activity unchanged: nothing refetched
        assert!(cache.pending_changes(&remote, &[ratings()]).await.unwrap().is_empty());

        let mut next = snapshot(10, 7);
        next.insert(rated_movie(0, 9).pk.clone(), rated_movie(0, 9));
        remote.publish(2, next.clone());
        let feeds = cache.pending_changes(&remote, &[ratings()]).await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert!(!feeds[0].cold);
        assert_eq!(feeds[0].base(), &snapshot(10, 7));
        commit_all(&mut cache, feeds).await;

        let entry = cache.entry(ratings()).await.unwrap().unwrap().clone();
        assert_eq!(entry.version, 2);
        assert_eq!(entry.delta_chain, 1);
        assert_eq!(entry.last_activity, Some(at(2)));

        // A fresh cache rebuilds the same state from full + delta revisions
        let mut reloaded = ChangeCache::new(AccountId::new("acc"), store);
        let restored = reloaded.entry(ratings()).await.unwrap().unwrap();
        assert_eq!(restored.items, next);
        assert_eq!(restored.version, 2);
        assert_eq!(restored.delta_chain, 1);
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_reported_again() {
        let store = store(0.25, 8).await;
        let remote = scripted_remote();
        let mut cache = ChangeCache::new(AccountId::new("acc"), store.clone());

        remote.publish(1, snapshot(4, 7));
        let feeds = cache.pending_changes(&remote, &[ratings()]).await.unwrap();
        commit_all(&mut cache, feeds).await;

        remote.publish(2, snapshot(4, 9));
        let first = cache.pending_changes(&remote, &[ratings()]).await.unwrap();
        assert_eq!(first.len(), 1);
        drop(first);

        let entry = cache.entry(ratings()).await.unwrap().unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(entry.last_activity, Some(at(1)));
        assert_eq!(entry.items, snapshot(4, 7));

        let again = cache.pending_changes(&remote, &[ratings()]).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].base(), &snapshot(4, 7));
        assert_eq!(again[0].current, snapshot(4, 9));
        assert_eq!(again[0].activity, at(2));

        // Nothing was persisted either
        let mut reloaded = ChangeCache::new(AccountId::new("acc"), store);
        assert_eq!(reloaded.entry(ratings()).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_replace_bumps_version() {
        let store = store(0.25, 8).await;
        let mut cache = ChangeCache::new(AccountId::new("acc"), store);

        cache.replace(ratings(), snapshot(3, 7), Some(at(1))).await.unwrap();
        cache.replace(ratings(), snapshot(3, 8), None).await.unwrap();

        let entry = cache.entry(ratings()).await.unwrap().unwrap();
        assert_eq!(entry.version, 2);
        assert_eq!(entry.last_activity, Some(at(1)));
        assert_eq!(cache.snapshot(ratings()), Some(&snapshot(3, 8)));
    }

    #[tokio::test]
    async fn test_registry_shares_cache_per_account() {
        let registry = ChangeCacheRegistry::new(store(0.25, 8).await);
        let a = registry.get(&AccountId::new("a"));
        let again = registry.get(&AccountId::new("a"));
        let b = registry.get(&AccountId::new("b"));

        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.lock().await.account(), &AccountId::new("b"));
    }
}
