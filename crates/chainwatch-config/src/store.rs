//! The process-wide configuration store.
//!
//! Owns the live [`Configuration`], keeps it in sync with its
//! [`ConfigSource`], and notifies subscribers of every effective change.
//!
//! Reads are copies taken under a short read lock. Reloads and mutations are
//! serialized by a single async writer lock, so a debounced reload can never
//! interleave with a rule edit.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chainwatch_core::{Configuration, Rule, RuleValidator, WatchError};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::debounce::{spawn_debouncer, DEFAULT_DEBOUNCE};
use crate::source::{ConfigSource, SourceWatch};
use crate::subscribers::{SubscriberRegistry, SubscriptionId};

#[derive(Debug, Clone)]
pub struct ConfigStoreOptions {
    /// Quiet period that coalesces bursts of source changes into one reload.
    pub debounce: Duration,
}

impl Default for ConfigStoreOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

struct ActiveWatch {
    _source: SourceWatch,
    task: JoinHandle<()>,
}

pub struct ConfigStore {
    source: Arc<dyn ConfigSource>,
    validator: RuleValidator,
    options: ConfigStoreOptions,
    current: RwLock<Configuration>,
    writer: tokio::sync::Mutex<()>,
    subscribers: SubscriberRegistry,
    watch: Mutex<Option<ActiveWatch>>,
}

impl ConfigStore {
    /// Load and validate the document, writing the default one if the source
    /// is empty. Any failure here is fatal to startup.
    pub async fn load(
        source: Arc<dyn ConfigSource>,
        validator: RuleValidator,
        options: ConfigStoreOptions,
    ) -> Result<Arc<Self>, WatchError> {
        let config = match source.read().await? {
            Some(raw) => parse(&validator, &raw)?,
            None => {
                let config = Configuration::default();
                source.write(&render(&config)?).await?;
                tracing::info!(source = %source.describe(), "created default configuration");
                config
            }
        };
        tracing::info!(
            source = %source.describe(),
            delay_blocks = config.delay_blocks,
            rules = config.rules.len(),
            "configuration loaded"
        );

        Ok(Arc::new(Self {
            source,
            validator,
            options,
            current: RwLock::new(config),
            writer: tokio::sync::Mutex::new(()),
            subscribers: SubscriberRegistry::new(),
            watch: Mutex::new(None),
        }))
    }

    /// A copy of the live configuration.
    pub fn get(&self) -> Configuration {
        self.current.read().unwrap().clone()
    }

    pub fn validator(&self) -> &RuleValidator {
        &self.validator
    }

    /// Receive every future `configurationUpdated` snapshot.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Configuration>) {
        self.subscribers.register()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    /// Start observing the source. Calling it again while active is a no-op.
    pub fn watch(self: &Arc<Self>) -> Result<(), WatchError> {
        let mut active = self.watch.lock().unwrap();
        if active.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let source_watch = self.source.watch(tx)?;
        let weak = Arc::downgrade(self);
        let task = spawn_debouncer(self.options.debounce, rx, move || {
            let weak = weak.clone();
            async move {
                let Some(store) = weak.upgrade() else {
                    return false;
                };
                tracing::info!("reloading configuration");
                match store.reload().await {
                    Ok(true) => tracing::info!("configuration reloaded"),
                    Ok(false) => tracing::debug!("configuration unchanged"),
                    Err(e) => tracing::error!(
                        error = %e,
                        "failed to reload configuration; keeping previous version"
                    ),
                }
                true
            }
        });

        *active = Some(ActiveWatch {
            _source: source_watch,
            task,
        });
        Ok(())
    }

    /// Re-read the source. Returns `Ok(true)` if the live configuration
    /// changed (and was published), `Ok(false)` if the content is identical.
    /// On error the live configuration is left untouched.
    pub async fn reload(&self) -> Result<bool, WatchError> {
        let _guard = self.writer.lock().await;
        let raw = self
            .source
            .read()
            .await?
            .ok_or_else(|| WatchError::ConfigLoad(format!("{} is missing", self.source.describe())))?;
        let next = parse(&self.validator, &raw)?;
        if next == *self.current.read().unwrap() {
            return Ok(false);
        }
        self.install(next);
        Ok(true)
    }

    /// Append a rule. Fails with `Conflict` if another rule has the same id,
    /// the same name, or an identical match spec.
    pub async fn add_rule(&self, rule: Rule) -> Result<Rule, WatchError> {
        self.validator.assert_valid_rule(&rule)?;
        let _guard = self.writer.lock().await;
        let mut next = self.get();
        if let Some(existing) = next.rules.iter().find(|r| r.conflicts_with(&rule)) {
            return Err(WatchError::Conflict(format!(
                "rule '{}' already exists",
                existing.id
            )));
        }
        next.rules.push(rule.clone());
        self.commit(next).await?;
        tracing::info!(rule_id = %rule.id, "rule added");
        Ok(rule)
    }

    /// Replace the rule with `rule.id`.
    pub async fn update_rule(&self, rule: Rule) -> Result<Rule, WatchError> {
        self.validator.assert_valid_rule(&rule)?;
        let _guard = self.writer.lock().await;
        let mut next = self.get();
        let index = next
            .position(&rule.id)
            .ok_or_else(|| WatchError::NotFound(format!("rule '{}'", rule.id)))?;
        next.rules[index] = rule.clone();
        self.commit(next).await?;
        tracing::info!(rule_id = %rule.id, "rule updated");
        Ok(rule)
    }

    pub async fn delete_rule(&self, id: &str) -> Result<Rule, WatchError> {
        let _guard = self.writer.lock().await;
        let mut next = self.get();
        let index = next
            .position(id)
            .ok_or_else(|| WatchError::NotFound(format!("rule '{id}'")))?;
        let removed = next.rules.remove(index);
        self.commit(next).await?;
        tracing::info!(rule_id = %id, "rule deleted");
        Ok(removed)
    }

    pub async fn update_delay_blocks(&self, delay_blocks: u64) -> Result<Configuration, WatchError> {
        let _guard = self.writer.lock().await;
        let mut next = self.get();
        next.delay_blocks = delay_blocks;
        self.commit(next.clone()).await?;
        tracing::info!(delay_blocks, "delay blocks updated");
        Ok(next)
    }

    /// Like [`update_delay_blocks`](Self::update_delay_blocks) for an
    /// unparsed request value; negative or non-integer values are rejected.
    pub async fn update_delay_blocks_value(&self, raw: &Value) -> Result<Configuration, WatchError> {
        let delay = self.validator.delay_blocks(raw)?;
        self.update_delay_blocks(delay).await
    }

    /// Stop observing the source. Safe to call more than once.
    pub fn cleanup(&self) {
        // Runs from Drop, so a poisoned lock must not panic again.
        let active = self.watch.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(active) = active {
            active.task.abort();
            tracing::info!(source = %self.source.describe(), "stopped watching configuration");
        }
    }

    /// Persist and publish `next`. The writer lock must be held.
    async fn commit(&self, next: Configuration) -> Result<(), WatchError> {
        self.validator.assert_valid_configuration(&next)?;
        self.source.write(&render(&next)?).await?;
        self.install(next);
        Ok(())
    }

    fn install(&self, next: Configuration) {
        *self.current.write().unwrap() = next.clone();
        let reached = self.subscribers.publish(&next);
        tracing::debug!(subscribers = reached, "configurationUpdated published");
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn parse(validator: &RuleValidator, raw: &str) -> Result<Configuration, WatchError> {
    let doc: Value = serde_json::from_str(raw)
        .map_err(|e| WatchError::ConfigLoad(format!("invalid JSON: {e}")))?;
    validator
        .validate_configuration(&doc)
        .map_err(|e| WatchError::ConfigLoad(e.to_string()))
}

fn render(config: &Configuration) -> Result<String, WatchError> {
    config
        .to_document()
        .map_err(|e| WatchError::ConfigWrite(e.to_string()))
}
