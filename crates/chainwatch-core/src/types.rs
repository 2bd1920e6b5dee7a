//! Shared types for the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── ConfirmationWindow ──────────────────────────────────────────────────────

/// A half-open block range `[from_block, to_block)` awaiting confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationWindow {
    pub from_block: u64,
    pub to_block: u64,
}

impl ConfirmationWindow {
    /// Open a window starting at `block` that closes `delay_blocks` later.
    pub fn open(block: u64, delay_blocks: u64) -> Self {
        Self {
            from_block: block,
            to_block: block.saturating_add(delay_blocks),
        }
    }

    /// Returns `true` once `block` is at or past the closing boundary.
    pub fn is_closed_by(&self, block: u64) -> bool {
        block >= self.to_block
    }

    /// Number of blocks covered by the window.
    pub fn len(&self) -> u64 {
        self.to_block - self.from_block
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for ConfirmationWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.from_block, self.to_block)
    }
}

// ─── LogEvent ─────────────────────────────────────────────────────────────────

/// A matched log, tagged with the rule that matched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub block_number: u64,
    pub block_hash: String,
    /// Identity key for deduplication and upserts.
    pub transaction_hash: String,
    pub address: String,
    pub data: String,
    pub topics: Vec<String>,
    pub rule_id: String,
}

// ─── StoredLog ────────────────────────────────────────────────────────────────

/// A persisted [`LogEvent`] with the fields owned by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredLog {
    /// Storage-assigned row id.
    pub id: i64,
    #[serde(flatten)]
    pub event: LogEvent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
