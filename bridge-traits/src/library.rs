//! Local Library Abstractions
//!
//! The local library is the source of truth for what the user owns and plays.
//! The sync engine reads mapped items from it and writes individual state
//! changes back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::media::{IdentityKey, SyncMediaType};

/// A library section holding one kind of media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySection {
    pub id: String,
    pub name: String,
    pub media: SyncMediaType,
}

/// Technical attributes of the best media file of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttributes {
    /// e.g. `uhd_4k`, `hd_1080p`
    pub resolution: Option<String>,
    /// e.g. `dolby_truehd`, `aac`
    pub audio_codec: Option<String>,
    /// e.g. `5.1`
    pub audio_channels: Option<String>,
}

impl MediaAttributes {
    pub fn is_empty(&self) -> bool {
        self.resolution.is_none() && self.audio_codec.is_none() && self.audio_channels.is_none()
    }
}

/// One item of the local library with its embedded identities parsed.
///
/// Shows, seasons and episodes are delivered as separate records linked
/// through `parent_id` (episode to season, season to show) and
/// `grandparent_id` (episode to show).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalItem {
    pub local_id: String,
    pub section_id: String,
    /// Single-bit media kind of this record
    pub media: SyncMediaType,
    pub title: String,
    pub identities: Vec<IdentityKey>,
    pub parent_id: Option<String>,
    pub grandparent_id: Option<String>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub duration_ms: Option<u64>,
    pub view_offset_ms: Option<u64>,
    pub view_count: u32,
    pub last_viewed_at: Option<DateTime<Utc>>,
    /// User rating on a 1-10 scale
    pub user_rating: Option<u8>,
    pub added_at: Option<DateTime<Utc>>,
    pub media_info: MediaAttributes,
    /// Names of the playlists the item belongs to
    pub playlists: BTreeSet<String>,
}

impl LocalItem {
    /// Minimal record, mostly useful for tests and adapters that fill fields incrementally.
    pub fn new(
        local_id: impl Into<String>,
        section_id: impl Into<String>,
        media: SyncMediaType,
        title: impl Into<String>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            section_id: section_id.into(),
            media,
            title: title.into(),
            identities: Vec::new(),
            parent_id: None,
            grandparent_id: None,
            season_number: None,
            episode_number: None,
            duration_ms: None,
            view_offset_ms: None,
            view_count: 0,
            last_viewed_at: None,
            user_rating: None,
            added_at: None,
            media_info: MediaAttributes::default(),
            playlists: BTreeSet::new(),
        }
    }

    pub fn with_identity(mut self, service: impl Into<String>, id: impl Into<String>) -> Self {
        self.identities.push(IdentityKey::new(service, id));
        self
    }

    pub fn is_watched(&self) -> bool {
        self.view_count > 0
    }
}

/// A single state change written back to the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalUpdate {
    /// Set the user rating, `None` clears it
    Rate(Option<u8>),
    MarkWatched,
    MarkUnwatched,
    SetProgress { view_offset_ms: u64 },
    AddToPlaylist { playlist: String },
    RemoveFromPlaylist { playlist: String },
}

impl LocalUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            LocalUpdate::Rate(_) => "rate",
            LocalUpdate::MarkWatched => "mark_watched",
            LocalUpdate::MarkUnwatched => "mark_unwatched",
            LocalUpdate::SetProgress { .. } => "set_progress",
            LocalUpdate::AddToPlaylist { .. } => "add_to_playlist",
            LocalUpdate::RemoveFromPlaylist { .. } => "remove_from_playlist",
        }
    }
}

/// Local library service trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::library::{LocalLibrary, LocalUpdate};
/// use bridge_traits::media::SyncMediaType;
///
/// async fn rate_all(library: &dyn LocalLibrary) -> Result<()> {
///     let sections = library.list_sections(SyncMediaType::MOVIES).await?;
///     for item in library.mapped_items(&sections, None).await? {
///         library.update_local_state(&item.local_id, LocalUpdate::Rate(Some(8))).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait LocalLibrary: Send + Sync {
    /// List sections holding any of the given media types
    async fn list_sections(&self, media: SyncMediaType) -> Result<Vec<LibrarySection>>;

    /// Items of the given sections with their identities parsed
    ///
    /// `account_filter` restricts per-user state (ratings, views) to one
    /// local user when the library is shared.
    async fn mapped_items(
        &self,
        sections: &[LibrarySection],
        account_filter: Option<&str>,
    ) -> Result<Vec<LocalItem>>;

    /// Apply one state change to one item
    async fn update_local_state(&self, local_id: &str, update: LocalUpdate) -> Result<()>;
}
