//! Rule-driven log retrieval for a closed confirmation window.

use std::sync::Arc;

use chainwatch_core::{Configuration, ConfirmationWindow, LogEvent, PacingPolicy};

use crate::client::{ChainClient, LogFilter};

/// Fans a closed window out into one `eth_getLogs` query per enabled rule.
pub struct RuleEngine {
    client: Arc<dyn ChainClient>,
    pacing: Arc<dyn PacingPolicy>,
}

impl RuleEngine {
    pub fn new(client: Arc<dyn ChainClient>, pacing: Arc<dyn PacingPolicy>) -> Self {
        Self { client, pacing }
    }

    /// Query every enabled rule in `config` over `window` and return the
    /// tagged logs in rule order.
    ///
    /// Queries run one after another with a pacing delay between them. A
    /// failing rule is logged and skipped; the remaining rules still run.
    pub async fn flush(&self, window: ConfirmationWindow, config: &Configuration) -> Vec<LogEvent> {
        let mut events = Vec::new();
        let mut throttles = 0u32;
        let mut queried = 0usize;

        for rule in config.enabled_rules() {
            if queried > 0 {
                tokio::time::sleep(self.pacing.delay(throttles)).await;
            }
            queried += 1;

            let filter = LogFilter::for_rule(&rule.r#match, &window);
            match self.client.get_logs(&filter).await {
                Ok(logs) => {
                    throttles = 0;
                    let total = logs.len();
                    let before = events.len();
                    for log in logs {
                        if log.is_removed() {
                            continue;
                        }
                        let raw_block = log.block_number.clone();
                        let raw_tx = log.transaction_hash.clone();
                        match log.into_event(&rule.id) {
                            Some(event) => events.push(event),
                            None => tracing::warn!(
                                rule_id = %rule.id,
                                block = ?raw_block,
                                tx = ?raw_tx,
                                "dropping log without a usable block number or hashes"
                            ),
                        }
                    }
                    tracing::debug!(
                        rule_id = %rule.id,
                        %window,
                        logs = total,
                        kept = events.len() - before,
                        "rule queried"
                    );
                }
                Err(e) => {
                    if e.is_rate_limited() {
                        throttles = throttles.saturating_add(1);
                    } else {
                        throttles = 0;
                    }
                    tracing::warn!(rule_id = %rule.id, %window, error = %e, "log query failed; skipping rule");
                }
            }
        }

        tracing::info!(%window, rules = queried, events = events.len(), "window flushed");
        events
    }
}
