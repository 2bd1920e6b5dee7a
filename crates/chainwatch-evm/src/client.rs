//! Chain client abstraction and `eth_getLogs` wire types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainwatch_core::{ConfirmationWindow, LogEvent, RuleMatch, WatchError};

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    /// `null` for pending logs.
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Block number, if the node sent a well-formed quantity.
    pub fn block_number_u64(&self) -> Option<u64> {
        self.block_number.as_deref().and_then(parse_hex_u64)
    }

    /// Returns `true` if the node marked this log as removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Tag this log with the rule that matched it. `None` if the block
    /// number, block hash or transaction hash is missing or malformed.
    pub fn into_event(self, rule_id: &str) -> Option<LogEvent> {
        let block_number = self.block_number_u64()?;
        let block_hash = self.block_hash.filter(|h| !h.is_empty())?;
        let transaction_hash = self.transaction_hash.filter(|h| !h.is_empty())?;
        Some(LogEvent {
            block_number,
            block_hash,
            transaction_hash,
            address: self.address,
            data: self.data,
            topics: self.topics,
            rule_id: rule_id.to_string(),
        })
    }
}

/// Filter for one `eth_getLogs` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Option<String>,
    pub topics: Option<Vec<String>>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    /// Filter for `rule` over `window`. The window boundaries are passed
    /// through unchanged; the node treats `toBlock` as inclusive.
    pub fn for_rule(rule: &RuleMatch, window: &ConfirmationWindow) -> Self {
        Self {
            address: rule.address.clone(),
            topics: rule.topics.clone(),
            from_block: window.from_block,
            to_block: window.to_block,
        }
    }

    /// The JSON-RPC filter object.
    pub fn to_param(&self) -> Value {
        let mut obj = json!({
            "fromBlock": format!("0x{:x}", self.from_block),
            "toBlock": format!("0x{:x}", self.to_block),
        });
        if let Some(address) = &self.address {
            obj["address"] = json!(address);
        }
        if let Some(topics) = &self.topics {
            obj["topics"] = json!(topics);
        }
        obj
    }
}

/// Upstream chain access needed by the pipeline.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number.
    async fn block_number(&self) -> Result<u64, WatchError>;

    /// Logs matching `filter`.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, WatchError>;
}

/// Parse a `0x`-prefixed (or bare) hex quantity.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(block: &str) -> RawLog {
        RawLog {
            address: "0xa".into(),
            topics: vec!["0xt".into()],
            data: "0x".into(),
            block_number: Some(block.into()),
            block_hash: Some("0xbh".into()),
            transaction_hash: Some("0xtx".into()),
            log_index: Some("0x0".into()),
            removed: None,
        }
    }

    #[test]
    fn parse_hex_quantities() {
        assert_eq!(parse_hex_u64("0x1"), Some(1));
        assert_eq!(parse_hex_u64("0xff"), Some(255));
        assert_eq!(parse_hex_u64("1234"), Some(0x1234));
        assert_eq!(parse_hex_u64("0x"), None);
        assert_eq!(parse_hex_u64("0xzz"), None);
    }

    #[test]
    fn raw_log_deserializes_node_shape() {
        let v = json!({
            "address": "0xa",
            "topics": ["0xt"],
            "data": "0x",
            "blockNumber": "0x12a05f200",
            "blockHash": "0xbh",
            "transactionHash": "0xtx",
            "logIndex": "0x5",
            "transactionIndex": "0x1",
            "removed": false
        });
        let log: RawLog = serde_json::from_value(v).unwrap();
        assert_eq!(log.block_number_u64(), Some(5_000_000_000));
        assert!(!log.is_removed());
    }

    #[test]
    fn into_event_tags_rule() {
        let event = raw("0x64").into_event("usdc").unwrap();
        assert_eq!(event.block_number, 100);
        assert_eq!(event.rule_id, "usdc");
        assert_eq!(event.transaction_hash, "0xtx");
        assert!(raw("pending").into_event("usdc").is_none());

        let mut no_tx = raw("0x64");
        no_tx.transaction_hash = None;
        assert!(no_tx.into_event("usdc").is_none());
    }

    #[test]
    fn null_fields_do_not_fail_the_response() {
        let v = json!([
            {
                "address": "0xa", "topics": [], "data": "0x",
                "blockNumber": null, "blockHash": null, "transactionHash": null,
                "logIndex": null
            },
            {
                "address": "0xa", "topics": [], "data": "0x",
                "blockNumber": "0x2", "blockHash": "0xbh", "transactionHash": "0xtx"
            }
        ]);
        let logs: Vec<RawLog> = serde_json::from_value(v).unwrap();
        let events: Vec<_> = logs.into_iter().filter_map(|l| l.into_event("r")).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block_number, 2);
    }

    #[test]
    fn filter_param_shape() {
        let window = ConfirmationWindow::open(100, 2);
        let rule = RuleMatch::address("0xabc").topic("0xt0");
        let filter = LogFilter::for_rule(&rule, &window);
        assert_eq!(
            filter.to_param(),
            json!({"fromBlock": "0x64", "toBlock": "0x66", "address": "0xabc", "topics": ["0xt0"]})
        );

        let open = LogFilter::for_rule(&RuleMatch::default(), &window).to_param();
        assert!(open.get("address").is_none());
        assert!(open.get("topics").is_none());
    }
}
