//! Storage abstraction for matched logs.
//!
//! Backends live in `chainwatch-storage` (memory, SQLite, Postgres). The
//! pipeline only ever writes through [`LogStore::bulk_upsert`]; reads go
//! through the paginated [`LogQuery`] surface.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FieldViolation, ValidationError, WatchError};
use crate::types::{LogEvent, StoredLog};

// ─── Upsert specification ────────────────────────────────────────────────────

/// Conflict key and the fields an upsert may overwrite on conflict.
///
/// Field names use the wire (camelCase) spelling; backends translate them to
/// their own column names and reject any they do not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertSpec {
    pub conflict_key: &'static str,
    pub update_fields: &'static [&'static str],
}

/// Upsert used for every persisted batch of [`LogEvent`]s.
pub const LOG_EVENT_UPSERT: UpsertSpec = UpsertSpec {
    conflict_key: "transactionHash",
    update_fields: &[
        "blockNumber",
        "blockHash",
        "address",
        "data",
        "topics",
        "ruleId",
        "updatedAt",
    ],
};

impl UpsertSpec {
    /// Fail with a persistence error if any field is not in `known`.
    pub fn check_fields(&self, known: &[&str]) -> Result<(), WatchError> {
        if !known.contains(&self.conflict_key) {
            return Err(WatchError::Persistence(format!(
                "unknown conflict key '{}'",
                self.conflict_key
            )));
        }
        if let Some(field) = self.update_fields.iter().find(|f| !known.contains(*f)) {
            return Err(WatchError::Persistence(format!("unknown update field '{field}'")));
        }
        Ok(())
    }

    pub fn updates(&self, field: &str) -> bool {
        self.update_fields.iter().any(|f| *f == field)
    }
}

// ─── Query model ──────────────────────────────────────────────────────────────

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Sortable columns of the query surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    BlockNumber,
    TransactionHash,
    RuleId,
    Address,
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    pub const ALL: [SortField; 6] = [
        SortField::BlockNumber,
        SortField::TransactionHash,
        SortField::RuleId,
        SortField::Address,
        SortField::CreatedAt,
        SortField::UpdatedAt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockNumber => "blockNumber",
            Self::TransactionHash => "transactionHash",
            Self::RuleId => "ruleId",
            Self::Address => "address",
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
        }
    }

    /// SQL column backing this field.
    pub fn column(&self) -> &'static str {
        match self {
            Self::BlockNumber => "block_number",
            Self::TransactionHash => "transaction_hash",
            Self::RuleId => "rule_id",
            Self::Address => "address",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                ValidationError::single(
                    "orderBy",
                    "one of blockNumber, transactionHash, ruleId, address, createdAt, updatedAt",
                    format!("\"{s}\""),
                )
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for SortDirection {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            other => Err(ValidationError::single(
                "sortType",
                "ASC or DESC",
                format!("\"{other}\""),
            )),
        }
    }
}

/// Filtered, paginated read over stored logs. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub transaction_hash: Option<String>,
    pub block_number: Option<u64>,
    pub rule_id: Option<String>,
    pub page: u32,
    pub page_size: u32,
    pub order_by: SortField,
    pub direction: SortDirection,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            transaction_hash: None,
            block_number: None,
            rule_id: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            order_by: SortField::default(),
            direction: SortDirection::default(),
        }
    }
}

impl LogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_hash(mut self, hash: impl Into<String>) -> Self {
        self.transaction_hash = Some(hash.into());
        self
    }

    pub fn block_number(mut self, block: u64) -> Self {
        self.block_number = Some(block);
        self
    }

    pub fn rule_id(mut self, id: impl Into<String>) -> Self {
        self.rule_id = Some(id.into());
        self
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn order(mut self, field: SortField, direction: SortDirection) -> Self {
        self.order_by = field;
        self.direction = direction;
        self
    }

    /// Check pagination bounds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        if self.page == 0 {
            violations.push(FieldViolation::new(
                "page",
                "integer >= 1",
                self.page.to_string(),
            ));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            violations.push(FieldViolation::new(
                "pageSize",
                format!("integer in 1..={MAX_PAGE_SIZE}"),
                self.page_size.to_string(),
            ));
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations))
        }
    }

    /// Rows to skip before the requested page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    /// Returns `true` if `event` passes every equality filter.
    pub fn matches(&self, event: &LogEvent) -> bool {
        self.transaction_hash
            .as_deref()
            .map_or(true, |h| h == event.transaction_hash)
            && self.block_number.map_or(true, |b| b == event.block_number)
            && self.rule_id.as_deref().map_or(true, |r| r == event.rule_id)
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub items: Vec<StoredLog>,
    pub page: u32,
    pub page_size: u32,
    /// Rows matching the filters across all pages.
    pub total: u64,
}

// ─── LogStore ─────────────────────────────────────────────────────────────────

/// Durable store of matched logs.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Insert `records`, or on a conflict on `spec.conflict_key` overwrite
    /// only `spec.update_fields`. Returns the number of rows written.
    ///
    /// Records sharing a transaction hash within one call collapse to the
    /// last of them, as [`dedup_by_transaction`](crate::dedup_by_transaction)
    /// does, so callers need not pre-dedup.
    async fn bulk_upsert(&self, records: &[LogEvent], spec: &UpsertSpec)
        -> Result<usize, WatchError>;

    /// Run a filtered, paginated read.
    async fn query(&self, query: &LogQuery) -> Result<LogPage, WatchError>;
}
