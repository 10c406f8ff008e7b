//! # Artifact Collector
//!
//! Accumulates remote mutations into per-root batches.
//!
//! ## Overview
//!
//! Mutations are bucketed by (data category, add/remove) and keyed by the
//! remote primary key of their root (movie, show or list). Season and episode
//! mutations merge into their show's entry, so a show with ten changed
//! episodes travels as one record:
//!
//! ```text
//! {"shows": [{"ids": {"tvdb": "81189"},
//!             "seasons": [{"number": 1,
//!                          "episodes": [{"number": 1, "watched_at": ...},
//!                                       {"number": 2, "watched_at": ...}]}]}]}
//! ```
//!
//! [`ArtifactCollector::send`] flushes every bucket as batched writes of at
//! most `batch_size` roots and clears the collector. Each batch succeeds or
//! fails on its own.

use crate::types::ItemPath;
use bridge_traits::{AccountId, ArtifactOp, PrimaryKey, RemoteAccount, SyncDataCategory, SyncMediaType};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// One pending remote write, as produced by a handler
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactMutation {
    pub category: SyncDataCategory,
    pub op: ArtifactOp,
    /// Media type of the node being written
    pub media: SyncMediaType,
    pub path: ItemPath,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeasonEntry {
    pub fields: Map<String, Value>,
    pub episodes: BTreeMap<u32, Map<String, Value>>,
}

/// Accumulated mutations for one movie, show or list
#[derive(Debug, Clone, PartialEq)]
pub struct RootEntry {
    pub media: SyncMediaType,
    pub fields: Map<String, Value>,
    pub seasons: BTreeMap<u32, SeasonEntry>,
}

impl RootEntry {
    fn new(media: SyncMediaType) -> Self {
        Self {
            media: media.root(),
            fields: Map::new(),
            seasons: BTreeMap::new(),
        }
    }

    fn to_json(&self, pk: &PrimaryKey) -> Value {
        let mut ids = Map::new();
        ids.insert(pk.service.clone(), Value::String(pk.id.clone()));

        let mut record = Map::new();
        record.insert("ids".to_string(), Value::Object(ids));
        record.extend(self.fields.clone());

        if !self.seasons.is_empty() {
            let seasons: Vec<Value> = self
                .seasons
                .iter()
                .map(|(number, season)| {
                    let mut entry = Map::new();
                    entry.insert("number".to_string(), json!(number));
                    entry.extend(season.fields.clone());
                    if !season.episodes.is_empty() {
                        let episodes: Vec<Value> = season
                            .episodes
                            .iter()
                            .map(|(number, fields)| {
                                let mut episode = Map::new();
                                episode.insert("number".to_string(), json!(number));
                                episode.extend(fields.clone());
                                Value::Object(episode)
                            })
                            .collect();
                        entry.insert("episodes".to_string(), Value::Array(episodes));
                    }
                    Value::Object(entry)
                })
                .collect();
            record.insert("seasons".to_string(), Value::Array(seasons));
        }

        Value::Object(record)
    }
}

/// Outcome of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub accepted: u64,
    pub not_found: u64,
}

type Bucket = BTreeMap<PrimaryKey, RootEntry>;

#[derive(Debug)]
pub struct ArtifactCollector {
    buckets: BTreeMap<(SyncDataCategory, ArtifactOp), Bucket>,
    batch_size: usize,
}

impl ArtifactCollector {
    pub fn new(batch_size: usize) -> Self {
        Self {
            buckets: BTreeMap::new(),
            batch_size: batch_size.max(1),
        }
    }

    fn entry(
        &mut self,
        category: SyncDataCategory,
        op: ArtifactOp,
        pk: &PrimaryKey,
        media: SyncMediaType,
    ) -> &mut RootEntry {
        self.buckets
            .entry((category, op))
            .or_default()
            .entry(pk.clone())
            .or_insert_with(|| RootEntry::new(media))
    }

    pub fn store_movie(
        &mut self,
        category: SyncDataCategory,
        op: ArtifactOp,
        pk: &PrimaryKey,
        fields: Map<String, Value>,
    ) {
        self.entry(category, op, pk, SyncMediaType::MOVIES).fields.extend(fields);
    }

    pub fn store_show(
        &mut self,
        category: SyncDataCategory,
        op: ArtifactOp,
        pk: &PrimaryKey,
        fields: Map<String, Value>,
    ) {
        self.entry(category, op, pk, SyncMediaType::SHOWS).fields.extend(fields);
    }

    pub fn store_season(
        &mut self,
        category: SyncDataCategory,
        op: ArtifactOp,
        pk: &PrimaryKey,
        season: u32,
        fields: Map<String, Value>,
    ) {
        self.entry(category, op, pk, SyncMediaType::SHOWS)
            .seasons
            .entry(season)
            .or_default()
            .fields
            .extend(fields);
    }

    pub fn store_episode(
        &mut self,
        category: SyncDataCategory,
        op: ArtifactOp,
        pk: &PrimaryKey,
        season: u32,
        episode: u32,
        fields: Map<String, Value>,
    ) {
        self.entry(category, op, pk, SyncMediaType::SHOWS)
            .seasons
            .entry(season)
            .or_default()
            .episodes
            .entry(episode)
            .or_default()
            .extend(fields);
    }

    /// Merge a handler mutation at its path
    pub fn store(&mut self, mutation: ArtifactMutation) {
        let ArtifactMutation {
            category,
            op,
            media,
            path,
            fields,
        } = mutation;

        match (path.season, path.episode) {
            (Some(season), Some(episode)) => {
                self.store_episode(category, op, &path.root, season, episode, fields)
            }
            (Some(season), None) => self.store_season(category, op, &path.root, season, fields),
            _ if media.contains(SyncMediaType::MOVIES) => {
                self.store_movie(category, op, &path.root, fields)
            }
            _ if media.contains(SyncMediaType::SHOWS) => {
                self.store_show(category, op, &path.root, fields)
            }
            _ => self.entry(category, op, &path.root, media).fields.extend(fields),
        }
    }

    pub fn root(&self, category: SyncDataCategory, op: ArtifactOp, pk: &PrimaryKey) -> Option<&RootEntry> {
        self.buckets.get(&(category, op))?.get(pk)
    }

    /// Number of root entries across all buckets
    pub fn len(&self) -> usize {
        self.buckets.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batched payloads of one bucket
    pub fn payloads(&self, category: SyncDataCategory, op: ArtifactOp) -> Vec<Value> {
        let Some(bucket) = self.buckets.get(&(category, op)) else {
            return Vec::new();
        };

        let entries: Vec<_> = bucket.iter().collect();
        entries
            .chunks(self.batch_size)
            .map(|chunk| {
                let mut payload = Map::new();
                for (pk, entry) in chunk {
                    let records = payload
                        .entry(entry.media.label().to_string())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(records) = records {
                        records.push(entry.to_json(pk));
                    }
                }
                Value::Object(payload)
            })
            .collect()
    }

    /// Flush every bucket as batched writes and clear the collector
    pub async fn send(&mut self, remote: &dyn RemoteAccount, account: &AccountId) -> SendReport {
        let mut report = SendReport::default();
        let keys: Vec<_> = self.buckets.keys().copied().collect();

        for (category, op) in keys {
            for payload in self.payloads(category, op) {
                match remote.batch_write(account, category, op, payload).await {
                    Ok(result) => {
                        report.batches_sent += 1;
                        report.accepted += u64::from(result.accepted);
                        report.not_found += result.not_found.len() as u64;
                        if !result.not_found.is_empty() {
                            debug!(
                                category = category.label(),
                                op = op.as_str(),
                                count = result.not_found.len(),
                                "Remote did not recognize some items"
                            );
                        }
                    }
                    Err(e) => {
                        report.batches_failed += 1;
                        warn!(
                            category = category.label(),
                            op = op.as_str(),
                            error = %e,
                            "Batched write failed"
                        );
                    }
                }
            }
        }

        if report.batches_sent + report.batches_failed > 0 {
            info!(
                sent = report.batches_sent,
                failed = report.batches_failed,
                accepted = report.accepted,
                "Flushed artifacts"
            );
        }

        self.buckets.clear();
        report
    }
}
