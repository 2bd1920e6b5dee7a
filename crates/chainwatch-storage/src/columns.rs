//! Mapping between wire field names and `log_events` columns.

#![cfg_attr(not(any(feature = "sqlite", feature = "postgres")), allow(dead_code))]

use chainwatch_core::{UpsertSpec, WatchError};

pub const TABLE: &str = "log_events";

/// Fields an upsert may target: the conflict key plus every column that a
/// conflict is allowed to overwrite. `id` and `createdAt` are never listed.
const UPSERT_COLUMNS: &[(&str, &str)] = &[
    ("transactionHash", "transaction_hash"),
    ("blockNumber", "block_number"),
    ("blockHash", "block_hash"),
    ("address", "address"),
    ("data", "data"),
    ("topics", "topics"),
    ("ruleId", "rule_id"),
    ("updatedAt", "updated_at"),
];

/// Columns written on insert, in bind order.
pub const INSERT_COLUMNS: &str =
    "block_number, block_hash, transaction_hash, address, data, topics, rule_id, created_at, updated_at";

pub const SELECT_COLUMNS: &str =
    "id, block_number, block_hash, transaction_hash, address, data, topics, rule_id, created_at, updated_at";

pub fn column(field: &str) -> Option<&'static str> {
    UPSERT_COLUMNS
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, c)| *c)
}

/// Check `spec` against the table and return `(conflict column, update columns)`.
pub fn resolve(spec: &UpsertSpec) -> Result<(&'static str, Vec<&'static str>), WatchError> {
    let known: Vec<&str> = UPSERT_COLUMNS.iter().map(|(f, _)| *f).collect();
    spec.check_fields(&known)?;
    if spec.conflict_key != "transactionHash" {
        return Err(WatchError::Persistence(format!(
            "'{}' is not a unique column of {TABLE}",
            spec.conflict_key
        )));
    }
    let updates = spec
        .update_fields
        .iter()
        .filter_map(|f| column(f))
        .filter(|c| *c != "transaction_hash")
        .collect();
    Ok(("transaction_hash", updates))
}

/// `ON CONFLICT` clause shared by the SQLite and Postgres backends.
pub fn on_conflict_clause(spec: &UpsertSpec) -> Result<String, WatchError> {
    let (key, updates) = resolve(spec)?;
    if updates.is_empty() {
        return Ok(format!(" ON CONFLICT ({key}) DO NOTHING"));
    }
    let set = updates
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(" ON CONFLICT ({key}) DO UPDATE SET {set}"))
}

pub fn encode_topics(topics: &[String]) -> Result<String, WatchError> {
    serde_json::to_string(topics).map_err(|e| WatchError::Persistence(format!("encode topics: {e}")))
}

pub fn decode_topics(raw: &str) -> Result<Vec<String>, WatchError> {
    serde_json::from_str(raw).map_err(|e| WatchError::Persistence(format!("decode topics: {e}")))
}
