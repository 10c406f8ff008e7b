//! Ratings of movies, shows, seasons and episodes.
//!
//! Remote ratings are `(previous, current)` pairs. Two ratings differ when
//! their current values differ, or when the same value was re-rated later.

use super::{
    ActionParams, Binding, BindingTable, DataHandler, Effect, MediaHandler, FAST_PULL, PULL, PUSH,
};
use crate::diff::NodeRef;
use crate::handlers::format_timestamp;
use crate::types::{ActionKind, SyncMode, SyncValue};
use crate::Result;
use bridge_traits::{
    ArtifactOp, LocalItem, LocalUpdate, RemoteRating, SyncDataCategory, SyncMediaType,
};
use core_runtime::config::SyncSettings;
use serde_json::{json, Map, Value};

pub struct RatingsHandler {
    media: SyncMediaType,
    bindings: BindingTable,
}

impl RatingsHandler {
    pub fn new(media: SyncMediaType) -> Result<Self> {
        let bindings = BindingTable::build(
            "ratings",
            &[
                Binding::new(ActionKind::Added, PULL, rate_locally),
                Binding::new(ActionKind::Changed, PULL, rate_locally),
                Binding::new(ActionKind::Added, FAST_PULL, rate_locally),
                Binding::new(ActionKind::Changed, FAST_PULL, rate_locally),
                Binding::new(ActionKind::Removed, FAST_PULL, clear_rating),
                Binding::new(ActionKind::Added, PUSH, send_rating),
                Binding::new(ActionKind::Changed, PUSH, send_rating),
            ],
        )?;
        Ok(Self { media, bindings })
    }
}

pub fn data_handler() -> Result<DataHandler> {
    Ok(DataHandler::new(
        SyncDataCategory::RATINGS,
        vec![
            Box::new(RatingsHandler::new(SyncMediaType::MOVIES)?),
            Box::new(RatingsHandler::new(SyncMediaType::SHOWS)?),
            Box::new(RatingsHandler::new(SyncMediaType::SEASONS)?),
            Box::new(RatingsHandler::new(SyncMediaType::EPISODES)?),
        ],
    ))
}

fn rerated_later(old: &RemoteRating, new: &RemoteRating) -> bool {
    matches!((old.rated_at, new.rated_at), (Some(before), Some(after)) if after > before)
}

impl MediaHandler for RatingsHandler {
    fn name(&self) -> &'static str {
        "ratings"
    }

    fn category(&self) -> SyncDataCategory {
        SyncDataCategory::RATINGS
    }

    fn media(&self) -> SyncMediaType {
        self.media
    }

    fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    fn local_value(&self, item: &LocalItem, _settings: &SyncSettings) -> Option<SyncValue> {
        item.user_rating
            .map(|rating| SyncValue::Rating(RemoteRating::new(rating)))
    }

    fn remote_value(&self, node: NodeRef<'_>) -> Option<SyncValue> {
        node.properties().rating.clone().map(SyncValue::Rating)
    }

    fn get_action(&self, old: Option<&SyncValue>, new: Option<&SyncValue>) -> Option<ActionKind> {
        match (old.and_then(SyncValue::as_rating), new.and_then(SyncValue::as_rating)) {
            (Some(old), Some(new)) if old.current != new.current || rerated_later(old, new) => {
                Some(ActionKind::Changed)
            }
            (Some(_), Some(_)) => None,
            (old, new) => ActionKind::classify(old, new),
        }
    }

    fn build_action(&self, params: &ActionParams<'_>) -> bool {
        if params.mode != SyncMode::FastPull {
            return true;
        }
        // The feed reports remote transitions; skip those already reflected locally
        let local = params.local.and_then(|item| item.user_rating);
        match params.kind {
            ActionKind::Removed => local.is_some(),
            _ => local != params.new.and_then(SyncValue::as_rating).map(|r| r.current),
        }
    }
}

fn rate_locally(params: &ActionParams<'_>) -> Vec<Effect> {
    match params.new.and_then(SyncValue::as_rating) {
        Some(rating) => params.local_update(LocalUpdate::Rate(Some(rating.current))),
        None => Vec::new(),
    }
}

fn clear_rating(params: &ActionParams<'_>) -> Vec<Effect> {
    params.local_update(LocalUpdate::Rate(None))
}

fn send_rating(params: &ActionParams<'_>) -> Vec<Effect> {
    let Some(rating) = params.new.and_then(SyncValue::as_rating) else {
        return Vec::new();
    };

    let mut fields = Map::new();
    fields.insert("rating".to_string(), json!(rating.current));
    fields.insert(
        "rated_at".to_string(),
        Value::String(format_timestamp(rating.rated_at.unwrap_or(params.env.now))),
    );
    params.artifact(ArtifactOp::Add, fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{Comparison, HandlerEnv};
    use crate::mapper::IdentifierMapper;
    use crate::types::{ItemPath, SyncMode};
    use bridge_traits::IdentityKey;
    use chrono::{Duration, TimeZone, Utc};

    fn rating(current: u8) -> SyncValue {
        SyncValue::Rating(RemoteRating::new(current))
    }

    fn rated_movie(rating: Option<u8>) -> LocalItem {
        let mut item = LocalItem::new("42", "1", SyncMediaType::MOVIES, "Heat");
        item.user_rating = rating;
        item
    }

    fn apply(
        mode: SyncMode,
        local: &LocalItem,
        old: Option<SyncValue>,
        new: Option<SyncValue>,
    ) -> Vec<Effect> {
        let handler = RatingsHandler::new(SyncMediaType::MOVIES).unwrap();
        let settings = SyncSettings::default();
        let mapper = IdentifierMapper::new();
        let env = HandlerEnv {
            settings: &settings,
            mapper: &mapper,
            now: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let path = ItemPath::root(IdentityKey::new("imdb", "tt100"));
        let comparison = Comparison {
            path: &path,
            media: SyncMediaType::MOVIES,
            title: "Heat",
            local: Some(local),
            old,
            new,
        };
        handler.run(mode, &comparison, &env)
    }

    #[test]
    fn test_rerate_to_same_value_later_is_changed() {
        let handler = RatingsHandler::new(SyncMediaType::MOVIES).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let before = SyncValue::Rating(RemoteRating {
            previous: None,
            current: 8,
            rated_at: Some(at),
        });
        let after = SyncValue::Rating(RemoteRating {
            previous: Some(8),
            current: 8,
            rated_at: Some(at + Duration::days(1)),
        });

        assert_eq!(handler.get_action(Some(&before), Some(&after)), Some(ActionKind::Changed));
        assert_eq!(handler.get_action(Some(&before), Some(&before)), None);
        assert_eq!(handler.get_action(Some(&rating(8)), Some(&after)), None);
        assert_eq!(handler.get_action(None, Some(&after)), Some(ActionKind::Added));
        assert_eq!(handler.get_action(Some(&after), None), Some(ActionKind::Removed));
    }

    #[test]
    fn test_fast_pull_changed_rates_locally_once() {
        let effects = apply(SyncMode::FastPull, &rated_movie(Some(7)), Some(rating(7)), Some(rating(9)));
        assert_eq!(
            effects,
            vec![Effect::Local {
                local_id: "42".to_string(),
                update: LocalUpdate::Rate(Some(9)),
            }]
        );
    }

    #[test]
    fn test_fast_pull_skips_rating_already_applied() {
        let effects = apply(SyncMode::FastPull, &rated_movie(Some(9)), Some(rating(7)), Some(rating(9)));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_fast_pull_removed_clears_rating() {
        let effects = apply(SyncMode::FastPull, &rated_movie(Some(7)), Some(rating(7)), None);
        assert_eq!(
            effects,
            vec![Effect::Local {
                local_id: "42".to_string(),
                update: LocalUpdate::Rate(None),
            }]
        );
        // Nothing to clear
        assert!(apply(SyncMode::FastPull, &rated_movie(None), Some(rating(7)), None).is_empty());
    }

    #[test]
    fn test_pull_removed_keeps_local_rating() {
        assert!(apply(SyncMode::Pull, &rated_movie(Some(7)), Some(rating(7)), None).is_empty());
    }

    #[test]
    fn test_push_sends_rating_with_timestamp() {
        let effects = apply(SyncMode::Push, &rated_movie(Some(6)), None, Some(rating(6)));
        let [Effect::Artifact(mutation)] = &effects[..] else {
            panic!("expected one artifact");
        };
        assert_eq!(mutation.fields["rating"], json!(6));
        assert_eq!(mutation.fields["rated_at"], json!("2024-05-01T12:00:00.000-00:00"));
    }
}
