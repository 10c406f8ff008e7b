//! Collection: which movies and episodes the user owns.
//!
//! Collection state only flows from the local library to the remote account.
//! Removals are sent only when `clean_collection` is enabled.

use super::{ActionParams, Binding, BindingTable, DataHandler, Effect, MediaHandler, PUSH};
use crate::diff::NodeRef;
use crate::handlers::format_timestamp;
use crate::types::{ActionKind, SyncValue};
use crate::Result;
use bridge_traits::{ArtifactOp, LocalItem, SyncDataCategory, SyncMediaType};
use core_runtime::config::SyncSettings;
use serde_json::{Map, Value};

pub struct CollectionHandler {
    media: SyncMediaType,
    bindings: BindingTable,
}

impl CollectionHandler {
    pub fn new(media: SyncMediaType) -> Result<Self> {
        let bindings = BindingTable::build(
            "collection",
            &[
                Binding::new(ActionKind::Added, PUSH, on_added),
                Binding::new(ActionKind::Removed, PUSH, on_removed),
            ],
        )?;
        Ok(Self { media, bindings })
    }
}

pub fn data_handler() -> Result<DataHandler> {
    Ok(DataHandler::new(
        SyncDataCategory::COLLECTION,
        vec![
            Box::new(CollectionHandler::new(SyncMediaType::MOVIES)?),
            Box::new(CollectionHandler::new(SyncMediaType::EPISODES)?),
        ],
    ))
}

impl MediaHandler for CollectionHandler {
    fn name(&self) -> &'static str {
        "collection"
    }

    fn category(&self) -> SyncDataCategory {
        SyncDataCategory::COLLECTION
    }

    fn media(&self) -> SyncMediaType {
        self.media
    }

    fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    fn local_value(&self, item: &LocalItem, _settings: &SyncSettings) -> Option<SyncValue> {
        item.added_at.map(SyncValue::Timestamp)
    }

    fn remote_value(&self, node: NodeRef<'_>) -> Option<SyncValue> {
        node.properties().collected_at.map(SyncValue::Timestamp)
    }
}

fn on_added(params: &ActionParams<'_>) -> Vec<Effect> {
    let Some(collected_at) = params.new.and_then(SyncValue::as_timestamp) else {
        return Vec::new();
    };

    let mut fields = Map::new();
    fields.insert(
        "collected_at".to_string(),
        Value::String(format_timestamp(collected_at)),
    );
    fields.insert("media_type".to_string(), Value::String("digital".to_string()));

    if let Some(item) = params.local {
        let attributes = &item.media_info;
        if let Some(resolution) = &attributes.resolution {
            fields.insert("resolution".to_string(), Value::String(resolution.clone()));
        }
        if let Some(audio) = &attributes.audio_codec {
            fields.insert("audio".to_string(), Value::String(audio.clone()));
        }
        if let Some(channels) = &attributes.audio_channels {
            fields.insert("audio_channels".to_string(), Value::String(channels.clone()));
        }
    }

    params.artifact(ArtifactOp::Add, fields)
}

fn on_removed(params: &ActionParams<'_>) -> Vec<Effect> {
    if !params.env.settings.clean_collection {
        return Vec::new();
    }
    params.artifact(ArtifactOp::Remove, Map::new())
}
