//! Media Model Primitives
//!
//! Flag sets, identity keys and account handles shared by both sides of a
//! synchronization: the local library and the remote account service.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Media types a task operates on.
    ///
    /// A single-bit value also tags the kind of one item.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct SyncMediaType: u32 {
        const MOVIES = 1 << 0;
        const SHOWS = 1 << 1;
        const SEASONS = 1 << 2;
        const EPISODES = 1 << 3;
        const LISTS = 1 << 4;
    }
}

bitflags! {
    /// Kinds of user state kept in sync.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct SyncDataCategory: u32 {
        const COLLECTION = 1 << 0;
        const PLAYBACK = 1 << 1;
        const RATINGS = 1 << 2;
        const WATCHED = 1 << 3;
        const WATCHLIST_LIKED = 1 << 4;
        const WATCHLIST_PERSONAL = 1 << 5;
    }
}

impl SyncMediaType {
    /// Lower-case label of a single-bit value, `"mixed"` otherwise.
    pub fn label(self) -> &'static str {
        if self == Self::MOVIES {
            "movies"
        } else if self == Self::SHOWS {
            "shows"
        } else if self == Self::SEASONS {
            "seasons"
        } else if self == Self::EPISODES {
            "episodes"
        } else if self == Self::LISTS {
            "lists"
        } else {
            "mixed"
        }
    }

    /// The top-level media a single-bit value is stored under.
    ///
    /// Seasons and episodes live inside show records.
    pub fn root(self) -> SyncMediaType {
        if self.intersects(Self::SHOWS | Self::SEASONS | Self::EPISODES) {
            Self::SHOWS
        } else {
            self
        }
    }

    /// Distinct root media covered by this set, in flag order.
    pub fn roots(self) -> Vec<SyncMediaType> {
        let mut roots = Vec::new();
        for flag in self.iter() {
            let root = flag.root();
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        roots
    }
}

impl SyncDataCategory {
    /// Lower-case label of a single-bit value, `"mixed"` otherwise.
    pub fn label(self) -> &'static str {
        if self == Self::COLLECTION {
            "collection"
        } else if self == Self::PLAYBACK {
            "playback"
        } else if self == Self::RATINGS {
            "ratings"
        } else if self == Self::WATCHED {
            "watched"
        } else if self == Self::WATCHLIST_LIKED {
            "watchlist_liked"
        } else if self == Self::WATCHLIST_PERSONAL {
            "watchlist_personal"
        } else {
            "mixed"
        }
    }
}

/// A `(service, id)` pair identifying one item inside one service namespace.
///
/// The same item usually carries several keys (`imdb`, `tmdb`, `tvdb`, ...);
/// keys are not comparable across services.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub service: String,
    pub id: String,
}

impl IdentityKey {
    pub fn new(service: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.service, self.id)
    }
}

/// Canonical remote identifier of an item.
pub type PrimaryKey = IdentityKey;

/// Identifier of a remote account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One remote collection: a root media type paired with a single data category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionKey {
    pub media: SyncMediaType,
    pub category: SyncDataCategory,
}

impl CollectionKey {
    pub fn new(media: SyncMediaType, category: SyncDataCategory) -> Self {
        Self {
            media: media.root(),
            category,
        }
    }
}

impl std::fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.media.label(), self.category.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_root() {
        assert_eq!(SyncMediaType::EPISODES.root(), SyncMediaType::SHOWS);
        assert_eq!(SyncMediaType::SEASONS.root(), SyncMediaType::SHOWS);
        assert_eq!(SyncMediaType::MOVIES.root(), SyncMediaType::MOVIES);
        assert_eq!(SyncMediaType::LISTS.root(), SyncMediaType::LISTS);
    }

    #[test]
    fn test_media_roots_deduplicates() {
        let media = SyncMediaType::MOVIES | SyncMediaType::SHOWS | SyncMediaType::EPISODES;
        assert_eq!(
            media.roots(),
            vec![SyncMediaType::MOVIES, SyncMediaType::SHOWS]
        );
    }

    #[test]
    fn test_labels() {
        assert_eq!(SyncMediaType::EPISODES.label(), "episodes");
        assert_eq!(SyncDataCategory::WATCHLIST_LIKED.label(), "watchlist_liked");
        assert_eq!(
            (SyncDataCategory::RATINGS | SyncDataCategory::WATCHED).label(),
            "mixed"
        );
    }

    #[test]
    fn test_collection_key_normalizes_media() {
        let key = CollectionKey::new(SyncMediaType::EPISODES, SyncDataCategory::WATCHED);
        assert_eq!(key.media, SyncMediaType::SHOWS);
        assert_eq!(key.to_string(), "shows/watched");
    }

    #[test]
    fn test_identity_key_display() {
        assert_eq!(IdentityKey::new("imdb", "tt100").to_string(), "imdb:tt100");
    }
}
