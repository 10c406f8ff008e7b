//! Shared engine vocabulary: sync modes, actions, item paths and compared values.

use crate::{Result, SyncError};
use bridge_traits::{PrimaryKey, RemoteRating};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Sync Mode
// ============================================================================

/// Traversal strategy of a sync task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Pull against full snapshots, then push
    Full,
    /// Compare every local item with freshly fetched remote snapshots
    Pull,
    /// Process only what the remote change feed reports
    FastPull,
    /// Send local state the remote side does not have yet
    Push,
}

impl SyncMode {
    pub const ALL: [SyncMode; 4] = [
        SyncMode::Full,
        SyncMode::Pull,
        SyncMode::FastPull,
        SyncMode::Push,
    ];

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Pull => "pull",
            SyncMode::FastPull => "fast_pull",
            SyncMode::Push => "push",
        }
    }

    /// Whether handlers running in this mode may write to the local library
    pub fn writes_local(&self) -> bool {
        !matches!(self, SyncMode::Push)
    }

    /// Whether handlers running in this mode may queue remote writes
    pub fn writes_remote(&self) -> bool {
        matches!(self, SyncMode::Push | SyncMode::Full)
    }
}

impl FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "pull" => Ok(SyncMode::Pull),
            "fast_pull" | "fastpull" => Ok(SyncMode::FastPull),
            "push" => Ok(SyncMode::Push),
            _ => Err(SyncError::InvalidMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Triggers and Priority
// ============================================================================

/// What caused a task to be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    Scheduled,
    LibraryEvent,
    Startup,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::Scheduled => "scheduled",
            SyncTrigger::LibraryEvent => "library_event",
            SyncTrigger::Startup => "startup",
        }
    }
}

impl FromStr for SyncTrigger {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(SyncTrigger::Manual),
            "scheduled" => Ok(SyncTrigger::Scheduled),
            "library_event" => Ok(SyncTrigger::LibraryEvent),
            "startup" => Ok(SyncTrigger::Startup),
            _ => Err(SyncError::InvalidTrigger(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority of a queue request
///
/// Only a strictly higher priority may replace an active task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Classification of one compared pair of values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Added,
    Removed,
    Changed,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Added => "added",
            ActionKind::Removed => "removed",
            ActionKind::Changed => "changed",
        }
    }

    /// Default classification of an `(old, new)` pair.
    ///
    /// `None` means there is nothing to do: both sides absent or equal.
    pub fn classify<T: PartialEq>(old: Option<&T>, new: Option<&T>) -> Option<ActionKind> {
        match (old, new) {
            (None, Some(_)) => Some(ActionKind::Added),
            (Some(_), None) => Some(ActionKind::Removed),
            (Some(old), Some(new)) if old != new => Some(ActionKind::Changed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Item Paths and Values
// ============================================================================

/// Location of a node inside a remote collection.
///
/// Movies, shows and lists are addressed by their primary key alone; seasons
/// and episodes by their show's key plus numbering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemPath {
    pub root: PrimaryKey,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl ItemPath {
    pub fn root(pk: PrimaryKey) -> Self {
        Self {
            root: pk,
            season: None,
            episode: None,
        }
    }

    pub fn season(pk: PrimaryKey, season: u32) -> Self {
        Self {
            root: pk,
            season: Some(season),
            episode: None,
        }
    }

    pub fn episode(pk: PrimaryKey, season: u32, episode: u32) -> Self {
        Self {
            root: pk,
            season: Some(season),
            episode: Some(episode),
        }
    }

    pub fn is_root(&self) -> bool {
        self.season.is_none()
    }
}

impl std::fmt::Display for ItemPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.season, self.episode) {
            (Some(s), Some(e)) => write!(f, "{} S{:02}E{:02}", self.root, s, e),
            (Some(s), None) => write!(f, "{} S{:02}", self.root, s),
            _ => write!(f, "{}", self.root),
        }
    }
}

/// The category-specific value of one node, as compared by handlers
#[derive(Debug, Clone, PartialEq)]
pub enum SyncValue {
    /// Moment the node entered a state (collected, watched)
    Timestamp(DateTime<Utc>),
    /// Membership without a usable timestamp
    Present,
    /// Rating with the value it replaced
    Rating(RemoteRating),
    /// Playback position in percent of the runtime
    Progress(f32),
    /// Ordered list entries
    Entries(Vec<PrimaryKey>),
}

impl SyncValue {
    pub fn as_rating(&self) -> Option<&RemoteRating> {
        match self {
            SyncValue::Rating(rating) => Some(rating),
            _ => None,
        }
    }

    pub fn as_progress(&self) -> Option<f32> {
        match self {
            SyncValue::Progress(percent) => Some(*percent),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            SyncValue::Timestamp(at) => Some(*at),
            _ => None,
        }
    }

    pub fn entries(&self) -> &[PrimaryKey] {
        match self {
            SyncValue::Entries(entries) => entries,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::IdentityKey;

    #[test]
    fn test_action_classification() {
        let x = SyncValue::Progress(10.0);
        let y = SyncValue::Progress(20.0);

        assert_eq!(ActionKind::classify(None, Some(&x)), Some(ActionKind::Added));
        assert_eq!(ActionKind::classify(Some(&x), None), Some(ActionKind::Removed));
        assert_eq!(ActionKind::classify(Some(&x), Some(&x.clone())), None);
        assert_eq!(ActionKind::classify(Some(&x), Some(&y)), Some(ActionKind::Changed));
        assert_eq!(ActionKind::classify::<SyncValue>(None, None), None);
    }

    #[test]
    fn test_sync_mode_round_trip() {
        for mode in SyncMode::ALL {
            assert_eq!(mode.as_str().parse::<SyncMode>().unwrap(), mode);
        }
        assert!("sideways".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_mode_write_permissions() {
        assert!(!SyncMode::Push.writes_local());
        assert!(SyncMode::Push.writes_remote());
        assert!(SyncMode::Pull.writes_local());
        assert!(!SyncMode::Pull.writes_remote());
        assert!(!SyncMode::FastPull.writes_remote());
        assert!(SyncMode::Full.writes_local() && SyncMode::Full.writes_remote());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_item_path_ordering_groups_show_nodes() {
        let pk = IdentityKey::new("tvdb", "81189");
        let mut paths = vec![
            ItemPath::episode(pk.clone(), 1, 2),
            ItemPath::root(pk.clone()),
            ItemPath::season(pk.clone(), 1),
            ItemPath::episode(pk.clone(), 1, 1),
        ];
        paths.sort();
        assert_eq!(paths[0], ItemPath::root(pk.clone()));
        assert_eq!(paths[1], ItemPath::season(pk.clone(), 1));
        assert_eq!(paths[2], ItemPath::episode(pk.clone(), 1, 1));
        assert_eq!(paths[3].to_string(), "tvdb:81189 S01E02");
    }
}
