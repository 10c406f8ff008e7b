//! # Handler Registry
//!
//! Dispatch matrix from (data category, media type) to the code that turns a
//! compared pair of values into effects.
//!
//! ## Overview
//!
//! ```text
//! HandlerRegistry ── category ──▶ DataHandler ── media ──▶ MediaHandler
//!                                                         │
//!                                 (action, mode) ──▶ BindingTable ──▶ ActionFn
//! ```
//!
//! Each [`MediaHandler`] declares its bindings as a literal list in its
//! constructor. A binding names an action kind, the sync modes it applies to
//! (all modes when unspecified) and a plain function. The table is built
//! once; a handler without bindings fails to construct.
//!
//! Bound functions never perform I/O. They return [`Effect`]s, which the task
//! applies after checking that the current mode may perform them.

pub mod collection;
pub mod playback;
pub mod ratings;
pub mod watched;
pub mod watchlist;

use crate::artifacts::ArtifactMutation;
use crate::diff::NodeRef;
use crate::mapper::IdentifierMapper;
use crate::types::{ActionKind, ItemPath, SyncMode, SyncValue};
use crate::{Result, SyncError};
use bridge_traits::{ArtifactOp, LocalItem, LocalUpdate, SyncDataCategory, SyncMediaType};
use chrono::{DateTime, Utc};
use core_runtime::config::SyncSettings;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// Effects
// ============================================================================

/// Output of a bound action function
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write to the local library
    Local { local_id: String, update: LocalUpdate },
    /// Queue a remote write
    Artifact(ArtifactMutation),
    /// A remote entry has no local counterpart
    MissingLocally(ItemPath),
}

/// Format a timestamp the way the remote service expects it
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3f-00:00").to_string()
}

// ============================================================================
// Action Parameters
// ============================================================================

/// Task-wide state handlers may read
pub struct HandlerEnv<'a> {
    pub settings: &'a SyncSettings,
    pub mapper: &'a IdentifierMapper,
    pub now: DateTime<Utc>,
}

/// One compared node, before classification
#[derive(Debug, Clone)]
pub struct Comparison<'a> {
    pub path: &'a ItemPath,
    pub media: SyncMediaType,
    /// Title of the remote record, or of the local item when there is none
    pub title: &'a str,
    pub local: Option<&'a LocalItem>,
    pub old: Option<SyncValue>,
    pub new: Option<SyncValue>,
}

/// Everything a bound function receives
pub struct ActionParams<'a> {
    pub mode: SyncMode,
    pub kind: ActionKind,
    pub category: SyncDataCategory,
    pub path: &'a ItemPath,
    pub media: SyncMediaType,
    pub title: &'a str,
    pub local: Option<&'a LocalItem>,
    pub old: Option<&'a SyncValue>,
    pub new: Option<&'a SyncValue>,
    pub env: &'a HandlerEnv<'a>,
}

impl ActionParams<'_> {
    /// Local write against the compared local item, if there is one
    pub fn local_update(&self, update: LocalUpdate) -> Vec<Effect> {
        self.local
            .map(|item| Effect::Local {
                local_id: item.local_id.clone(),
                update,
            })
            .into_iter()
            .collect()
    }

    /// Remote write at the compared path
    pub fn artifact(&self, op: ArtifactOp, fields: Map<String, Value>) -> Vec<Effect> {
        vec![Effect::Artifact(ArtifactMutation {
            category: self.category,
            op,
            media: self.media,
            path: self.path.clone(),
            fields,
        })]
    }
}

// ============================================================================
// Bindings
// ============================================================================

pub type ActionFn = fn(&ActionParams<'_>) -> Vec<Effect>;

pub const PUSH: &[SyncMode] = &[SyncMode::Push];
pub const PULL: &[SyncMode] = &[SyncMode::Pull, SyncMode::Full];
pub const ANY_PULL: &[SyncMode] = &[SyncMode::Pull, SyncMode::Full, SyncMode::FastPull];
pub const FAST_PULL: &[SyncMode] = &[SyncMode::FastPull];

/// Declaration of one bound action
#[derive(Clone, Copy)]
pub struct Binding {
    pub action: ActionKind,
    /// `None` binds every mode
    pub modes: Option<&'static [SyncMode]>,
    pub func: ActionFn,
}

impl Binding {
    pub const fn new(action: ActionKind, modes: &'static [SyncMode], func: ActionFn) -> Self {
        Self {
            action,
            modes: Some(modes),
            func,
        }
    }
}

/// `(action, mode) → function` table of one handler
pub struct BindingTable {
    table: HashMap<(ActionKind, SyncMode), ActionFn>,
}

impl BindingTable {
    /// Build the table from declared bindings.
    ///
    /// # Errors
    ///
    /// Returns `NoBindings` if `bindings` is empty
    pub fn build(handler: &'static str, bindings: &[Binding]) -> Result<Self> {
        if bindings.is_empty() {
            return Err(SyncError::NoBindings { handler });
        }

        let mut table = HashMap::new();
        for binding in bindings {
            for mode in binding.modes.unwrap_or(&SyncMode::ALL) {
                table.insert((binding.action, *mode), binding.func);
            }
        }
        Ok(Self { table })
    }

    pub fn lookup(&self, action: ActionKind, mode: SyncMode) -> Option<ActionFn> {
        self.table.get(&(action, mode)).copied()
    }

    /// Whether any action is bound in `mode`
    pub fn supports(&self, mode: SyncMode) -> bool {
        self.table.keys().any(|(_, m)| *m == mode)
    }
}

// ============================================================================
// Media Handler
// ============================================================================

/// Handler of one (data category, media type) pair
pub trait MediaHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> SyncDataCategory;

    fn media(&self) -> SyncMediaType;

    fn bindings(&self) -> &BindingTable;

    /// The category value of a local item
    fn local_value(&self, item: &LocalItem, settings: &SyncSettings) -> Option<SyncValue>;

    /// The category value of a remote node
    fn remote_value(&self, node: NodeRef<'_>) -> Option<SyncValue>;

    /// Classify a compared pair; `None` means nothing to do
    fn get_action(&self, old: Option<&SyncValue>, new: Option<&SyncValue>) -> Option<ActionKind> {
        ActionKind::classify(old, new)
    }

    /// Last chance to veto a bound action
    fn build_action(&self, _params: &ActionParams<'_>) -> bool {
        true
    }

    /// Run the function bound to `(params.kind, params.mode)`
    fn execute_action(&self, params: &ActionParams<'_>) -> Vec<Effect> {
        let Some(func) = self.bindings().lookup(params.kind, params.mode) else {
            return Vec::new();
        };
        if !self.build_action(params) {
            return Vec::new();
        }
        func(params)
    }

    fn run(&self, mode: SyncMode, comparison: &Comparison<'_>, env: &HandlerEnv<'_>) -> Vec<Effect> {
        match mode {
            SyncMode::FastPull => self.fast_pull(comparison, env),
            SyncMode::Full => self.full(comparison, env),
            SyncMode::Pull => self.pull(comparison, env),
            SyncMode::Push => self.push(comparison, env),
        }
    }

    fn fast_pull(&self, comparison: &Comparison<'_>, env: &HandlerEnv<'_>) -> Vec<Effect> {
        self.dispatch(SyncMode::FastPull, comparison, env)
    }

    fn full(&self, comparison: &Comparison<'_>, env: &HandlerEnv<'_>) -> Vec<Effect> {
        self.dispatch(SyncMode::Full, comparison, env)
    }

    fn pull(&self, comparison: &Comparison<'_>, env: &HandlerEnv<'_>) -> Vec<Effect> {
        self.dispatch(SyncMode::Pull, comparison, env)
    }

    fn push(&self, comparison: &Comparison<'_>, env: &HandlerEnv<'_>) -> Vec<Effect> {
        self.dispatch(SyncMode::Push, comparison, env)
    }

    fn dispatch(&self, mode: SyncMode, comparison: &Comparison<'_>, env: &HandlerEnv<'_>) -> Vec<Effect> {
        let Some(kind) = self.get_action(comparison.old.as_ref(), comparison.new.as_ref()) else {
            return Vec::new();
        };

        let params = ActionParams {
            mode,
            kind,
            category: self.category(),
            path: comparison.path,
            media: comparison.media,
            title: comparison.title,
            local: comparison.local,
            old: comparison.old.as_ref(),
            new: comparison.new.as_ref(),
            env,
        };
        self.execute_action(&params)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// The media handlers of one data category
pub struct DataHandler {
    category: SyncDataCategory,
    handlers: BTreeMap<SyncMediaType, Box<dyn MediaHandler>>,
}

impl DataHandler {
    pub fn new(category: SyncDataCategory, handlers: Vec<Box<dyn MediaHandler>>) -> Self {
        Self {
            category,
            handlers: handlers.into_iter().map(|h| (h.media(), h)).collect(),
        }
    }

    pub fn category(&self) -> SyncDataCategory {
        self.category
    }

    pub fn get(&self, media: SyncMediaType) -> Option<&dyn MediaHandler> {
        self.handlers.get(&media).map(Box::as_ref)
    }

    /// Union of supported media types
    pub fn media(&self) -> SyncMediaType {
        self.handlers
            .keys()
            .fold(SyncMediaType::empty(), |acc, media| acc | *media)
    }
}

pub struct HandlerRegistry {
    categories: BTreeMap<SyncDataCategory, DataHandler>,
}

impl HandlerRegistry {
    /// Build every handler of the engine.
    ///
    /// # Errors
    ///
    /// Returns `NoBindings` if a handler declares no bindings
    pub fn new() -> Result<Self> {
        let handlers = vec![
            collection::data_handler()?,
            playback::data_handler()?,
            ratings::data_handler()?,
            watched::data_handler()?,
            watchlist::data_handler(SyncDataCategory::WATCHLIST_PERSONAL)?,
            watchlist::data_handler(SyncDataCategory::WATCHLIST_LIKED)?,
        ];

        Ok(Self {
            categories: handlers.into_iter().map(|h| (h.category(), h)).collect(),
        })
    }

    pub fn data_handler(&self, category: SyncDataCategory) -> Option<&DataHandler> {
        self.categories.get(&category)
    }

    pub fn get(&self, category: SyncDataCategory, media: SyncMediaType) -> Option<&dyn MediaHandler> {
        self.categories.get(&category)?.get(media)
    }

    /// (category, root media) pairs with a handler in the requested masks
    pub fn pairs(
        &self,
        categories: SyncDataCategory,
        media: SyncMediaType,
    ) -> Vec<(SyncDataCategory, SyncMediaType)> {
        let mut pairs = Vec::new();
        for category in categories.iter() {
            let Some(handler) = self.categories.get(&category) else {
                continue;
            };
            for root in (handler.media() & media).roots() {
                if !pairs.contains(&(category, root)) {
                    pairs.push((category, root));
                }
            }
        }
        pairs
    }
}
