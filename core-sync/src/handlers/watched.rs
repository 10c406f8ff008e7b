//! Watched history of movies and episodes.
//!
//! Only the watched/unwatched transition matters: two watched states with
//! different timestamps are not a change.

use super::{
    ActionParams, Binding, BindingTable, DataHandler, Effect, MediaHandler, ANY_PULL, FAST_PULL,
    PUSH,
};
use crate::diff::NodeRef;
use crate::handlers::format_timestamp;
use crate::types::{ActionKind, SyncMode, SyncValue};
use crate::Result;
use bridge_traits::{ArtifactOp, LocalItem, LocalUpdate, SyncDataCategory, SyncMediaType};
use core_runtime::config::SyncSettings;
use serde_json::{Map, Value};

pub struct WatchedHandler {
    media: SyncMediaType,
    bindings: BindingTable,
}

impl WatchedHandler {
    pub fn new(media: SyncMediaType) -> Result<Self> {
        let bindings = BindingTable::build(
            "watched",
            &[
                Binding::new(ActionKind::Added, ANY_PULL, mark_watched),
                Binding::new(ActionKind::Removed, FAST_PULL, mark_unwatched),
                Binding::new(ActionKind::Added, PUSH, send_watched),
            ],
        )?;
        Ok(Self { media, bindings })
    }
}

pub fn data_handler() -> Result<DataHandler> {
    Ok(DataHandler::new(
        SyncDataCategory::WATCHED,
        vec![
            Box::new(WatchedHandler::new(SyncMediaType::MOVIES)?),
            Box::new(WatchedHandler::new(SyncMediaType::EPISODES)?),
        ],
    ))
}

impl MediaHandler for WatchedHandler {
    fn name(&self) -> &'static str {
        "watched"
    }

    fn category(&self) -> SyncDataCategory {
        SyncDataCategory::WATCHED
    }

    fn media(&self) -> SyncMediaType {
        self.media
    }

    fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    fn local_value(&self, item: &LocalItem, _settings: &SyncSettings) -> Option<SyncValue> {
        if !item.is_watched() {
            return None;
        }
        Some(
            item.last_viewed_at
                .map_or(SyncValue::Present, SyncValue::Timestamp),
        )
    }

    fn remote_value(&self, node: NodeRef<'_>) -> Option<SyncValue> {
        let properties = node.properties();
        match (properties.last_watched_at, properties.plays) {
            (Some(at), _) => Some(SyncValue::Timestamp(at)),
            (None, Some(plays)) if plays > 0 => Some(SyncValue::Present),
            _ => None,
        }
    }

    fn get_action(&self, old: Option<&SyncValue>, new: Option<&SyncValue>) -> Option<ActionKind> {
        ActionKind::classify(old.map(|_| &()), new.map(|_| &()))
    }

    fn build_action(&self, params: &ActionParams<'_>) -> bool {
        let Some(local) = params.local else {
            return true;
        };
        match (params.mode, params.kind) {
            (SyncMode::Push, _) => true,
            (_, ActionKind::Added) => !local.is_watched(),
            (_, ActionKind::Removed) => local.is_watched(),
            _ => true,
        }
    }
}

fn mark_watched(params: &ActionParams<'_>) -> Vec<Effect> {
    params.local_update(LocalUpdate::MarkWatched)
}

fn mark_unwatched(params: &ActionParams<'_>) -> Vec<Effect> {
    params.local_update(LocalUpdate::MarkUnwatched)
}

fn send_watched(params: &ActionParams<'_>) -> Vec<Effect> {
    let watched_at = params
        .new
        .and_then(SyncValue::as_timestamp)
        .unwrap_or(params.env.now);

    let mut fields = Map::new();
    fields.insert(
        "watched_at".to_string(),
        Value::String(format_timestamp(watched_at)),
    );
    params.artifact(ArtifactOp::Add, fields)
}
