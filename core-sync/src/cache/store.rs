//! Persistence of change cache entries as versioned revisions.
//!
//! A revision is either a full snapshot or a delta against the revision
//! before it. Deltas are written when they are sufficiently smaller than the
//! full payload and the chain of consecutive deltas is still short; a full
//! revision prunes everything older.

use super::CacheEntry;
use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::{AccountId, CollectionKey, PrimaryKey, RemoteItem, RemoteSnapshot};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionKind {
    Full,
    Delta,
}

impl RevisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionKind::Full => "full",
            RevisionKind::Delta => "delta",
        }
    }
}

impl FromStr for RevisionKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(RevisionKind::Full),
            "delta" => Ok(RevisionKind::Delta),
            _ => Err(SyncError::Database(format!("Invalid revision kind: {s}"))),
        }
    }
}

/// Changes between two snapshots
#[derive(Debug, Default, Serialize, Deserialize)]
struct Delta {
    upserts: Vec<RemoteItem>,
    removals: Vec<PrimaryKey>,
}

impl Delta {
    fn between(previous: &RemoteSnapshot, next: &RemoteSnapshot) -> Self {
        let upserts = next
            .iter()
            .filter(|(pk, item)| previous.get(*pk) != Some(*item))
            .map(|(_, item)| item.clone())
            .collect();
        let removals = previous
            .keys()
            .filter(|pk| !next.contains_key(*pk))
            .cloned()
            .collect();
        Self { upserts, removals }
    }

    fn apply(self, snapshot: &mut RemoteSnapshot) {
        for pk in self.removals {
            snapshot.remove(&pk);
        }
        for item in self.upserts {
            snapshot.insert(item.pk.clone(), item);
        }
    }
}

fn full_payload(snapshot: &RemoteSnapshot) -> Result<String> {
    Ok(serde_json::to_string(&snapshot.values().collect::<Vec<_>>())?)
}

/// Decide how to persist `next` given the previously persisted entry.
///
/// Returns the kind and the serialized payload.
pub(crate) fn plan_revision(
    previous: Option<&CacheEntry>,
    next: &CacheEntry,
    savings_threshold: f64,
    max_delta_chain: u32,
) -> Result<(RevisionKind, String)> {
    let full = full_payload(&next.items)?;
    let Some(previous) = previous else {
        return Ok((RevisionKind::Full, full));
    };
    if previous.delta_chain >= max_delta_chain {
        return Ok((RevisionKind::Full, full));
    }

    let delta = serde_json::to_string(&Delta::between(&previous.items, &next.items))?;
    let budget = full.len() as f64 * (1.0 - savings_threshold);
    if (delta.len() as f64) <= budget {
        Ok((RevisionKind::Delta, delta))
    } else {
        Ok((RevisionKind::Full, full))
    }
}

/// Storage of change cache entries
#[async_trait]
pub trait ChangeCacheStore: Send + Sync {
    /// Rebuild the latest entry for a collection, if one was ever saved
    async fn load(&self, account: &AccountId, key: CollectionKey) -> Result<Option<CacheEntry>>;

    /// Persist `next`, given the entry it replaces
    async fn save(
        &self,
        account: &AccountId,
        key: CollectionKey,
        previous: Option<&CacheEntry>,
        next: &CacheEntry,
    ) -> Result<RevisionKind>;
}

/// SQLite implementation of ChangeCacheStore
pub struct SqliteChangeCacheStore {
    pool: SqlitePool,
    savings_threshold: f64,
    max_delta_chain: u32,
}

impl SqliteChangeCacheStore {
    pub fn new(pool: SqlitePool, savings_threshold: f64, max_delta_chain: u32) -> Self {
        Self {
            pool,
            savings_threshold,
            max_delta_chain,
        }
    }
}

#[derive(Debug, FromRow)]
struct RevisionRow {
    version: i64,
    kind: String,
    last_activity: Option<i64>,
    payload: String,
}

#[async_trait]
impl ChangeCacheStore for SqliteChangeCacheStore {
    async fn load(&self, account: &AccountId, key: CollectionKey) -> Result<Option<CacheEntry>> {
        let rows = sqlx::query_as::<_, RevisionRow>(
            r#"
            SELECT version, kind, last_activity, payload
            FROM change_cache_revisions
            WHERE account_id = ? AND media = ? AND category = ?
              AND version >= (
                  SELECT COALESCE(MAX(version), 0) FROM change_cache_revisions
                  WHERE account_id = ? AND media = ? AND category = ? AND kind = 'full'
              )
            ORDER BY version ASC
            "#,
        )
        .bind(account.as_str())
        .bind(key.media.bits() as i64)
        .bind(key.category.bits() as i64)
        .bind(account.as_str())
        .bind(key.media.bits() as i64)
        .bind(key.category.bits() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        let mut entry: Option<CacheEntry> = None;
        for row in rows {
            let kind: RevisionKind = row.kind.parse()?;
            let last_activity = row
                .last_activity
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single());

            match (kind, entry.as_mut()) {
                (RevisionKind::Full, _) => {
                    let items: Vec<RemoteItem> = serde_json::from_str(&row.payload)?;
                    entry = Some(CacheEntry {
                        items: items.into_iter().map(|item| (item.pk.clone(), item)).collect(),
                        last_activity,
                        version: row.version as u64,
                        delta_chain: 0,
                    });
                }
                (RevisionKind::Delta, Some(current)) => {
                    let delta: Delta = serde_json::from_str(&row.payload)?;
                    delta.apply(&mut current.items);
                    current.last_activity = last_activity;
                    current.version = row.version as u64;
                    current.delta_chain += 1;
                }
                (RevisionKind::Delta, None) => {
                    return Err(SyncError::Database(format!(
                        "Delta revision {} of {key} has no base",
                        row.version
                    )));
                }
            }
        }

        Ok(entry)
    }

    async fn save(
        &self,
        account: &AccountId,
        key: CollectionKey,
        previous: Option<&CacheEntry>,
        next: &CacheEntry,
    ) -> Result<RevisionKind> {
        let (kind, payload) =
            plan_revision(previous, next, self.savings_threshold, self.max_delta_chain)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO change_cache_revisions (
                account_id, media, category, version, kind,
                last_activity, payload, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.as_str())
        .bind(key.media.bits() as i64)
        .bind(key.category.bits() as i64)
        .bind(next.version as i64)
        .bind(kind.as_str())
        .bind(next.last_activity.map(|at: DateTime<Utc>| at.timestamp_millis()))
        .bind(&payload)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if kind == RevisionKind::Full {
            sqlx::query(
                r#"
                DELETE FROM change_cache_revisions
                WHERE account_id = ? AND media = ? AND category = ? AND version < ?
                "#,
            )
            .bind(account.as_str())
            .bind(key.media.bits() as i64)
            .bind(key.category.bits() as i64)
            .bind(next.version as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
        }

        debug!(
            collection = %key,
            version = next.version,
            kind = kind.as_str(),
            bytes = payload.len(),
            "Saved change cache revision"
        );
        Ok(kind)
    }
}
