//! Playback: resume positions of partially watched movies and episodes.
//!
//! Both sides are compared as a percentage of the runtime. A remote position
//! is applied locally only when it is ahead of the local one by at least
//! `progress_floor_secs`.

use super::{ActionParams, Binding, BindingTable, DataHandler, Effect, MediaHandler, ANY_PULL};
use crate::diff::NodeRef;
use crate::types::{ActionKind, SyncValue};
use crate::Result;
use bridge_traits::{LocalItem, LocalUpdate, SyncDataCategory, SyncMediaType};
use core_runtime::config::SyncSettings;
use tracing::trace;

pub struct PlaybackHandler {
    media: SyncMediaType,
    bindings: BindingTable,
}

impl PlaybackHandler {
    pub fn new(media: SyncMediaType) -> Result<Self> {
        let bindings = BindingTable::build(
            "playback",
            &[
                Binding::new(ActionKind::Added, ANY_PULL, set_progress),
                Binding::new(ActionKind::Changed, ANY_PULL, set_progress),
            ],
        )?;
        Ok(Self { media, bindings })
    }
}

pub fn data_handler() -> Result<DataHandler> {
    Ok(DataHandler::new(
        SyncDataCategory::PLAYBACK,
        vec![
            Box::new(PlaybackHandler::new(SyncMediaType::MOVIES)?),
            Box::new(PlaybackHandler::new(SyncMediaType::EPISODES)?),
        ],
    ))
}

/// Remote position translated to the local item's runtime
fn target_offset_ms(params: &ActionParams<'_>) -> Option<u64> {
    let percent = params.new.and_then(SyncValue::as_progress)?;
    let duration = params.local?.duration_ms?;
    Some((f64::from(percent.clamp(0.0, 100.0)) / 100.0 * duration as f64) as u64)
}

impl MediaHandler for PlaybackHandler {
    fn name(&self) -> &'static str {
        "playback"
    }

    fn category(&self) -> SyncDataCategory {
        SyncDataCategory::PLAYBACK
    }

    fn media(&self) -> SyncMediaType {
        self.media
    }

    fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    fn local_value(&self, item: &LocalItem, _settings: &SyncSettings) -> Option<SyncValue> {
        let offset = item.view_offset_ms.filter(|offset| *offset > 0)?;
        let duration = item.duration_ms.filter(|duration| *duration > 0)?;
        Some(SyncValue::Progress((offset as f64 / duration as f64 * 100.0) as f32))
    }

    fn remote_value(&self, node: NodeRef<'_>) -> Option<SyncValue> {
        node.properties()
            .progress
            .filter(|percent| *percent > 0.0)
            .map(SyncValue::Progress)
    }

    fn build_action(&self, params: &ActionParams<'_>) -> bool {
        let Some(target) = target_offset_ms(params) else {
            return false;
        };
        let current = params.local.and_then(|item| item.view_offset_ms).unwrap_or(0);
        let floor_ms = params.env.settings.progress_floor_secs.saturating_mul(1000);

        let ahead = target.saturating_sub(current) >= floor_ms && target > current;
        if !ahead {
            trace!(path = %params.path, target, current, "Remote position not far enough ahead");
        }
        ahead
    }
}

fn set_progress(params: &ActionParams<'_>) -> Vec<Effect> {
    match target_offset_ms(params) {
        Some(view_offset_ms) => params.local_update(LocalUpdate::SetProgress { view_offset_ms }),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{Comparison, HandlerEnv};
    use crate::mapper::IdentifierMapper;
    use crate::types::{ItemPath, SyncMode};
    use bridge_traits::IdentityKey;
    use chrono::Utc;

    fn episode(offset_ms: u64) -> LocalItem {
        let mut item = LocalItem::new("7", "2", SyncMediaType::EPISODES, "Pilot");
        item.duration_ms = Some(3_600_000);
        item.view_offset_ms = Some(offset_ms);
        item
    }

    fn apply(mode: SyncMode, local: &LocalItem, remote_percent: f32) -> Vec<Effect> {
        let handler = PlaybackHandler::new(SyncMediaType::EPISODES).unwrap();
        let settings = SyncSettings::default();
        let mapper = IdentifierMapper::new();
        let env = HandlerEnv {
            settings: &settings,
            mapper: &mapper,
            now: Utc::now(),
        };
        let path = ItemPath::episode(IdentityKey::new("tvdb", "81189"), 1, 1);
        let comparison = Comparison {
            path: &path,
            media: SyncMediaType::EPISODES,
            title: "Pilot",
            local: Some(local),
            old: handler.local_value(local, &settings),
            new: Some(SyncValue::Progress(remote_percent)),
        };
        handler.run(mode, &comparison, &env)
    }

    #[test]
    fn test_remote_ahead_sets_local_offset() {
        // 50% of one hour is 30 minutes, 20 minutes ahead of local
        let effects = apply(SyncMode::Pull, &episode(600_000), 50.0);
        assert_eq!(
            effects,
            vec![Effect::Local {
                local_id: "7".to_string(),
                update: LocalUpdate::SetProgress { view_offset_ms: 1_800_000 },
            }]
        );
    }

    #[test]
    fn test_less_than_a_minute_ahead_is_vetoed() {
        // 1% of one hour is 36s
        let local = episode(1_000);
        assert!(apply(SyncMode::FastPull, &local, 1.0).is_empty());
    }

    #[test]
    fn test_remote_behind_is_vetoed() {
        assert!(apply(SyncMode::Full, &episode(3_000_000), 10.0).is_empty());
    }

    #[test]
    fn test_push_never_writes_progress() {
        assert!(apply(SyncMode::Push, &episode(0), 90.0).is_empty());
    }
}
