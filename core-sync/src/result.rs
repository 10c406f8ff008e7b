//! # Sync Result Records
//!
//! Identifiers, counters and the terminal record persisted for every task.
//!
//! ## Overview
//!
//! A task ends in exactly one of three states. Cancellation is recorded
//! distinctly from failure; its success flag keeps whatever value it had when
//! the task stopped.
//!
//! ```text
//! Queued → Running → Completed
//!                 ↘  Failed
//!                 ↘  Cancelled
//! ```

use crate::types::{SyncMode, SyncTrigger};
use crate::{Result, SyncError};
use bridge_traits::{AccountId, SyncDataCategory, SyncMediaType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncTaskId(Uuid);

impl SyncTaskId {
    /// Create a new random task ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a task ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidTaskId(e.to_string()))?,
        ))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// Terminal status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Ran to the end, possibly with per-item failures
    Completed,
    /// Aborted by an unrecoverable error
    Failed,
    /// Stopped at a checkpoint after a cancel request
    Cancelled,
}

impl SyncStatus {
    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            "cancelled" => Ok(SyncStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters collected while a task runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Local items walked by a traversal
    pub items_processed: u64,
    /// Items skipped because a fetch or write for them failed
    pub items_failed: u64,
    /// Local items without any remote primary key
    pub items_unmatched: u64,
    /// Remote entries with no local counterpart
    pub items_missing_locally: u64,
    /// Identifiers from agents the engine cannot resolve
    pub unsupported_ids: u64,
    /// Writes applied to the local library
    pub local_updates: u64,
    /// Mutations merged into the artifact collector
    pub artifacts_stored: u64,
    /// Batched remote writes that succeeded
    pub batches_sent: u64,
    /// Batched remote writes that failed
    pub batches_failed: u64,
    /// Remote collections skipped because they could not be fetched
    pub collections_skipped: u64,
}

// ============================================================================
// Result Record
// ============================================================================

/// The record persisted for every finished task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub id: SyncTaskId,
    pub account: AccountId,
    pub mode: SyncMode,
    pub categories: SyncDataCategory,
    pub media: SyncMediaType,
    pub section: Option<String>,
    pub trigger: SyncTrigger,
    pub status: SyncStatus,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Summaries of captured unrecoverable errors
    pub exceptions: Vec<String>,
    pub stats: SyncStats,
}

impl SyncResult {
    /// Wall-clock duration of the run in seconds
    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn summary(&self) -> SyncSummary {
        SyncSummary {
            last_run: self.finished_at,
            last_elapsed_secs: self.elapsed_secs(),
            last_success: self.success,
            last_status: self.status,
        }
    }
}

/// Status line shown to users for one (account, mode, section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub last_run: DateTime<Utc>,
    pub last_elapsed_secs: f64,
    pub last_success: bool,
    pub last_status: SyncStatus,
}
