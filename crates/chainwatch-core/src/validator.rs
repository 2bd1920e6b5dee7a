//! Structural and semantic validation of configuration documents and rules.
//!
//! Validation runs over raw JSON so that type mismatches (a string where a
//! boolean belongs, a negative `delayBlocks`) are reported as field
//! violations instead of deserialization failures. Every violation in the
//! document is collected before returning.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{FieldViolation, ValidationError};
use crate::rule::{Configuration, Rule};

const ADDRESS_HEX_LEN: usize = 40;
const TOPIC_HEX_LEN: usize = 64;

/// How strictly `match.address` and `match.topics` are checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HexPolicy {
    /// `0x` + 40 hex digits for addresses, `0x` + 64 hex digits for topics.
    #[default]
    Strict,
    /// Any non-empty string.
    Lenient,
}

/// Validates configuration documents and individual rules.
#[derive(Debug, Clone, Default)]
pub struct RuleValidator {
    policy: HexPolicy,
}

impl RuleValidator {
    pub fn new(policy: HexPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> HexPolicy {
        self.policy
    }

    /// Validate a raw configuration document and return its typed form.
    pub fn validate_configuration(&self, doc: &Value) -> Result<Configuration, ValidationError> {
        let mut violations = Vec::new();

        let Some(obj) = doc.as_object() else {
            return Err(ValidationError::single("$", "object", render(Some(doc))));
        };

        let delay = check_delay_blocks(obj.get("delayBlocks"), "delayBlocks", &mut violations);

        match obj.get("rules") {
            Some(Value::Array(rules)) => {
                for (i, rule) in rules.iter().enumerate() {
                    self.check_rule(rule, &format!("rules[{i}]"), &mut violations);
                }
                check_unique(rules, "id", &mut violations);
                check_unique(rules, "name", &mut violations);
            }
            other => violations.push(FieldViolation::new("rules", "array", render(other))),
        }

        // `5.0` and `1e2` are accepted; store them as plain integers
        match delay {
            Some(n) if obj.get("delayBlocks").and_then(Value::as_u64).is_none() => {
                let mut normalized = doc.clone();
                normalized["delayBlocks"] = Value::from(n);
                finish(&normalized, violations)
            }
            _ => finish(doc, violations),
        }
    }

    /// Validate a raw rule document and return its typed form.
    pub fn validate_rule(&self, rule: &Value) -> Result<Rule, ValidationError> {
        let mut violations = Vec::new();
        self.check_rule(rule, "", &mut violations);
        finish(rule, violations)
    }

    /// Validate an already-typed configuration.
    pub fn assert_valid_configuration(&self, config: &Configuration) -> Result<(), ValidationError> {
        let doc = to_value(config)?;
        self.validate_configuration(&doc).map(|_| ())
    }

    /// Validate an already-typed rule.
    pub fn assert_valid_rule(&self, rule: &Rule) -> Result<(), ValidationError> {
        let doc = to_value(rule)?;
        self.validate_rule(&doc).map(|_| ())
    }

    /// Parse a raw `delayBlocks` value (e.g. from a request body).
    pub fn delay_blocks(&self, raw: &Value) -> Result<u64, ValidationError> {
        let mut violations = Vec::new();
        check_delay_blocks(Some(raw), "delayBlocks", &mut violations)
            .ok_or_else(|| ValidationError::new(violations))
    }

    fn check_rule(&self, rule: &Value, prefix: &str, out: &mut Vec<FieldViolation>) {
        let Some(obj) = rule.as_object() else {
            out.push(FieldViolation::new(path(prefix, ""), "object", render(Some(rule))));
            return;
        };

        match obj.get("id") {
            Some(Value::String(id)) if is_rule_id(id) => {}
            other => out.push(FieldViolation::new(
                path(prefix, "id"),
                "string matching [a-zA-Z0-9-]+",
                render(other),
            )),
        }

        match obj.get("name") {
            Some(Value::String(name)) if !name.is_empty() => {}
            other => out.push(FieldViolation::new(
                path(prefix, "name"),
                "non-empty string",
                render(other),
            )),
        }

        if !matches!(obj.get("enabled"), Some(Value::Bool(_))) {
            out.push(FieldViolation::new(
                path(prefix, "enabled"),
                "boolean",
                render(obj.get("enabled")),
            ));
        }

        match obj.get("match") {
            Some(Value::Object(m)) => {
                let base = path(prefix, "match");
                match m.get("address") {
                    None | Some(Value::Null) => {}
                    Some(Value::String(a)) if self.address_ok(a) => {}
                    other => out.push(FieldViolation::new(
                        format!("{base}.address"),
                        self.address_constraint(),
                        render(other),
                    )),
                }
                match m.get("topics") {
                    None | Some(Value::Null) => {}
                    Some(Value::Array(topics)) => {
                        for (i, topic) in topics.iter().enumerate() {
                            match topic {
                                Value::String(t) if self.topic_ok(t) => {}
                                other => out.push(FieldViolation::new(
                                    format!("{base}.topics[{i}]"),
                                    self.topic_constraint(),
                                    render(Some(other)),
                                )),
                            }
                        }
                    }
                    other => out.push(FieldViolation::new(
                        format!("{base}.topics"),
                        "array of strings",
                        render(other),
                    )),
                }
            }
            other => out.push(FieldViolation::new(path(prefix, "match"), "object", render(other))),
        }
    }

    fn address_ok(&self, s: &str) -> bool {
        match self.policy {
            HexPolicy::Strict => is_prefixed_hex(s, ADDRESS_HEX_LEN),
            HexPolicy::Lenient => !s.is_empty(),
        }
    }

    fn topic_ok(&self, s: &str) -> bool {
        match self.policy {
            HexPolicy::Strict => is_prefixed_hex(s, TOPIC_HEX_LEN),
            HexPolicy::Lenient => !s.is_empty(),
        }
    }

    fn address_constraint(&self) -> &'static str {
        match self.policy {
            HexPolicy::Strict => "0x-prefixed 20-byte hex address",
            HexPolicy::Lenient => "non-empty string",
        }
    }

    fn topic_constraint(&self) -> &'static str {
        match self.policy {
            HexPolicy::Strict => "0x-prefixed 32-byte hex topic",
            HexPolicy::Lenient => "non-empty string",
        }
    }
}

/// Largest integer a JSON number can carry without losing precision.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn whole_number(n: &Number) -> Option<u64> {
    n.as_u64().or_else(|| {
        n.as_f64()
            .filter(|f| *f >= 0.0 && *f <= MAX_SAFE_INTEGER && f.fract() == 0.0)
            .map(|f| f as u64)
    })
}

fn check_delay_blocks(value: Option<&Value>, field: &str, out: &mut Vec<FieldViolation>) -> Option<u64> {
    let parsed = match value {
        Some(Value::Number(n)) => whole_number(n),
        _ => None,
    };
    if parsed.is_none() {
        out.push(FieldViolation::new(field, "integer >= 0", render(value)));
    }
    parsed
}

/// Report every rule whose `field` repeats an earlier rule's value.
fn check_unique(rules: &[Value], field: &str, out: &mut Vec<FieldViolation>) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (i, rule) in rules.iter().enumerate() {
        let Some(value) = rule.get(field).and_then(Value::as_str) else {
            continue;
        };
        if let Some(first) = seen.get(value) {
            out.push(FieldViolation::new(
                format!("rules[{i}].{field}"),
                format!("unique {field} (already used by rules[{first}])"),
                render(rule.get(field)),
            ));
        } else {
            seen.insert(value, i);
        }
    }
}

fn finish<T: serde::de::DeserializeOwned>(
    doc: &Value,
    violations: Vec<FieldViolation>,
) -> Result<T, ValidationError> {
    if !violations.is_empty() {
        return Err(ValidationError::new(violations));
    }
    serde_json::from_value(doc.clone())
        .map_err(|e| ValidationError::single("$", "well-formed document", e.to_string()))
}

fn to_value<T: Serialize>(v: &T) -> Result<Value, ValidationError> {
    serde_json::to_value(v)
        .map_err(|e| ValidationError::single("$", "serializable document", e.to_string()))
}

fn path(prefix: &str, field: &str) -> String {
    match (prefix.is_empty(), field.is_empty()) {
        (true, true) => "$".to_string(),
        (true, false) => field.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}.{field}"),
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(v) => v.to_string(),
    }
}

/// Returns `true` if `s` matches `[a-zA-Z0-9-]+`.
pub fn is_rule_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_prefixed_hex(s: &str, digits: usize) -> bool {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => hex.len() == digits && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}
