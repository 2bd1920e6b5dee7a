//! Rules and the live configuration document that owns them.

use serde::{Deserialize, Serialize};

// ─── RuleMatch ────────────────────────────────────────────────────────────────

/// Log filter criteria for a rule. Absent fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatch {
    /// Contract address that must emit the log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Positional topic filters (`topics[0]` is the event signature hash).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
}

impl RuleMatch {
    /// Match logs emitted by `address`.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            address: Some(addr.into()),
            topics: None,
        }
    }

    /// Append a positional topic filter.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.get_or_insert_with(Vec::new).push(topic.into());
        self
    }
}

// ─── Rule ─────────────────────────────────────────────────────────────────────

/// A named, enable-able filter over contract address and/or event topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier (`[a-zA-Z0-9-]+`).
    pub id: String,
    /// Unique human-readable name.
    pub name: String,
    /// Disabled rules are kept in the document but never queried.
    pub enabled: bool,
    #[serde(rename = "match")]
    pub r#match: RuleMatch,
}

impl Rule {
    pub fn new(id: impl Into<String>, name: impl Into<String>, r#match: RuleMatch) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            r#match,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Returns `true` if everything except `id` and `name` is equal.
    pub fn same_spec(&self, other: &Rule) -> bool {
        self.enabled == other.enabled && self.r#match == other.r#match
    }

    /// Returns `true` if `other` would clash with this rule on insert:
    /// same id, same name, or an identical match spec.
    pub fn conflicts_with(&self, other: &Rule) -> bool {
        self.id == other.id || self.name == other.name || self.same_spec(other)
    }
}

// ─── Configuration ────────────────────────────────────────────────────────────

/// The process-wide configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Confirmation lag, in blocks, before a window is flushed.
    pub delay_blocks: u64,
    pub rules: Vec<Rule>,
}

impl Configuration {
    pub fn new(delay_blocks: u64, rules: Vec<Rule>) -> Self {
        Self { delay_blocks, rules }
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.rules.iter().position(|r| r.id == id)
    }

    /// Rules that should be queried on the next flush.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.enabled)
    }

    /// Serialize as the pretty-printed JSON document stored on disk.
    pub fn to_document(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
