//! The ingestion loop: blocks in, closed windows flushed to storage.
//!
//! ```text
//! block stream ──► WindowTracker ──closed window──► spawn flush task
//!                                                     ├── RuleEngine::flush (snapshot of rules)
//!                                                     └── Persister::persist
//! config updates ──► swap Arc<Configuration>
//! ```
//!
//! Blocks are handled strictly in arrival order. A flush starts before the
//! next block is read; flush tasks complete in any order.

use std::sync::Arc;
use std::time::Duration;

use chainwatch_core::{Configuration, Persister, WindowTracker};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::engine::RuleEngine;

/// Default wait for in-flight flushes on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ChainWatcherOptions {
    pub shutdown_grace: Duration,
}

impl Default for ChainWatcherOptions {
    fn default() -> Self {
        Self {
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherSummary {
    pub blocks_seen: u64,
    pub windows_flushed: u64,
    pub flushes_failed: u64,
    /// Flushes still running when the grace period ran out.
    pub flushes_abandoned: u64,
}

pub struct ChainWatcher {
    engine: Arc<RuleEngine>,
    persister: Persister,
    config: Arc<Configuration>,
    tracker: WindowTracker,
    options: ChainWatcherOptions,
}

impl ChainWatcher {
    pub fn new(
        engine: Arc<RuleEngine>,
        persister: Persister,
        initial: Configuration,
        options: ChainWatcherOptions,
    ) -> Self {
        Self {
            engine,
            persister,
            config: Arc::new(initial),
            tracker: WindowTracker::new(),
            options,
        }
    }

    /// Run the loop on a background task.
    pub fn spawn(
        self,
        blocks: mpsc::Receiver<u64>,
        updates: mpsc::UnboundedReceiver<Configuration>,
    ) -> WatcherHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(blocks, updates, shutdown_rx));
        WatcherHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Process blocks until shutdown is requested or the block stream ends,
    /// then wait (up to the grace period) for running flushes.
    pub async fn run(
        mut self,
        mut blocks: mpsc::Receiver<u64>,
        mut updates: mpsc::UnboundedReceiver<Configuration>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> WatcherSummary {
        let mut summary = WatcherSummary::default();
        let mut flushes: JoinSet<()> = JoinSet::new();
        let mut updates_open = true;

        tracing::info!(
            delay_blocks = self.config.delay_blocks,
            rules = self.config.rules.len(),
            "chain watcher started"
        );

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("chain watcher stopping");
                    break;
                }
                update = updates.recv(), if updates_open => match update {
                    Some(config) => {
                        tracing::info!(
                            delay_blocks = config.delay_blocks,
                            rules = config.rules.len(),
                            "configuration updated in chain watcher"
                        );
                        self.config = Arc::new(config);
                    }
                    None => updates_open = false,
                },
                block = blocks.recv() => match block {
                    Some(number) => {
                        summary.blocks_seen += 1;
                        self.on_block(number, &mut flushes, &mut summary);
                    }
                    None => {
                        tracing::info!("block stream closed");
                        break;
                    }
                },
            }

            while let Some(done) = flushes.try_join_next() {
                reap(done, &mut summary);
            }
        }

        // Unregister both listeners before draining.
        drop(blocks);
        drop(updates);
        self.drain(flushes, &mut summary).await;
        tracing::info!(?summary, "chain watcher stopped");
        summary
    }

    fn on_block(&mut self, number: u64, flushes: &mut JoinSet<()>, summary: &mut WatcherSummary) {
        let Some(window) = self.tracker.observe(number, self.config.delay_blocks) else {
            return;
        };
        summary.windows_flushed += 1;
        tracing::debug!(block = number, %window, next = ?self.tracker.current(), "window closed");

        let engine = Arc::clone(&self.engine);
        let persister = self.persister.clone();
        let snapshot = Arc::clone(&self.config);
        flushes.spawn(async move {
            let events = engine.flush(window, &snapshot).await;
            if events.is_empty() {
                tracing::debug!(%window, "no matching logs");
                return;
            }
            persister.persist(events).await;
        });
    }

    async fn drain(&self, mut flushes: JoinSet<()>, summary: &mut WatcherSummary) {
        if flushes.is_empty() {
            return;
        }
        tracing::info!(in_flight = flushes.len(), "waiting for in-flight flushes");
        let grace = self.options.shutdown_grace;
        let wait = async {
            while let Some(done) = flushes.join_next().await {
                reap(done, summary);
            }
        };
        if tokio::time::timeout(grace, wait).await.is_err() {
            summary.flushes_abandoned = flushes.len() as u64;
            tracing::warn!(
                abandoned = flushes.len(),
                grace_secs = grace.as_secs(),
                "grace period elapsed; abandoning in-flight flushes"
            );
            flushes.abort_all();
        }
    }
}

fn reap(done: Result<(), tokio::task::JoinError>, summary: &mut WatcherSummary) {
    if let Err(e) = done {
        summary.flushes_failed += 1;
        tracing::error!(error = %e, "flush task failed");
    }
}

/// Handle to a running [`ChainWatcher`]. Dropping it also stops the loop.
pub struct WatcherHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<WatcherSummary>,
}

impl WatcherHandle {
    /// Ask the loop to stop and wait for it to finish draining.
    pub async fn stop(mut self) -> WatcherSummary {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.join().await
    }

    /// Wait for the loop to end on its own (block stream closed).
    pub async fn join(self) -> WatcherSummary {
        let WatcherHandle { shutdown, task } = self;
        let result = task.await;
        drop(shutdown);
        match result {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(error = %e, "chain watcher task failed");
                WatcherSummary::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{raw_log, MockChain, RecordingStore};
    use chainwatch_core::{FixedPacing, Rule, RuleMatch};

    struct Harness {
        chain: Arc<MockChain>,
        store: Arc<RecordingStore>,
        blocks: mpsc::Sender<u64>,
        updates: mpsc::UnboundedSender<Configuration>,
        handle: WatcherHandle,
    }

    fn start(config: Configuration, chain: Arc<MockChain>) -> Harness {
        let store = Arc::new(RecordingStore::default());
        let engine = Arc::new(RuleEngine::new(
            chain.clone(),
            Arc::new(FixedPacing::new(Duration::ZERO)),
        ));
        let watcher = ChainWatcher::new(
            engine,
            Persister::new(store.clone()),
            config,
            ChainWatcherOptions::default(),
        );
        let (blocks, block_rx) = mpsc::channel(16);
        let (updates, update_rx) = mpsc::unbounded_channel();
        let handle = watcher.spawn(block_rx, update_rx);
        Harness {
            chain,
            store,
            blocks,
            updates,
            handle,
        }
    }

    fn rule_r() -> Rule {
        Rule::new("R", "rule R", RuleMatch::address("0xr"))
    }

    #[tokio::test]
    async fn closed_window_queries_rule_and_skips_empty_persist() {
        let h = start(Configuration::new(2, vec![rule_r()]), Arc::new(MockChain::default()));
        for b in [100, 101, 102] {
            h.blocks.send(b).await.unwrap();
        }
        drop(h.blocks);
        let summary = h.handle.join().await;

        assert_eq!(summary.blocks_seen, 3);
        assert_eq!(summary.windows_flushed, 1);
        let filters = h.chain.filters();
        assert_eq!(filters.len(), 1);
        assert_eq!((filters[0].from_block, filters[0].to_block), (100, 102));
        assert_eq!(filters[0].address.as_deref(), Some("0xr"));
        assert!(h.store.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn matched_logs_are_tagged_and_persisted() {
        let chain = Arc::new(MockChain::default());
        chain.respond("0xr", vec![raw_log("0xa", 100), raw_log("0xb", 101), raw_log("0xa", 101)]);
        let h = start(Configuration::new(2, vec![rule_r()]), chain);
        for b in [100, 101, 102] {
            h.blocks.send(b).await.unwrap();
        }
        drop(h.blocks);
        h.handle.join().await;

        let batches = h.store.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|e| e.rule_id == "R"));
        assert_eq!(batch[0].transaction_hash, "0xa");
        assert_eq!(batch[0].block_number, 101);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_update_applies_to_next_window() {
        let h = start(Configuration::new(2, vec![rule_r()]), Arc::new(MockChain::default()));
        h.blocks.send(100).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.updates.send(Configuration::new(5, vec![rule_r()])).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        for b in [101, 102, 106, 107] {
            h.blocks.send(b).await.unwrap();
        }
        drop(h.blocks);
        h.handle.join().await;

        let ranges: Vec<_> = h.chain.filters().iter().map(|f| (f.from_block, f.to_block)).collect();
        assert_eq!(ranges, vec![(100, 102), (102, 107)]);
    }

    #[tokio::test(start_paused = true)]
    async fn updated_rules_are_used_by_later_flushes() {
        let h = start(Configuration::new(1, vec![rule_r()]), Arc::new(MockChain::default()));
        h.blocks.send(10).await.unwrap();
        h.blocks.send(11).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        let replacement = Rule::new("S", "rule S", RuleMatch::address("0xs"));
        h.updates.send(Configuration::new(1, vec![replacement])).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.blocks.send(12).await.unwrap();
        drop(h.blocks);
        h.handle.join().await;

        let addresses: Vec<_> = h.chain.filters().into_iter().filter_map(|f| f.address).collect();
        assert_eq!(addresses, vec!["0xr".to_string(), "0xs".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_flush() {
        let chain = Arc::new(MockChain::default());
        chain.respond("0x2", vec![raw_log("0xdone", 1)]);
        let store = Arc::new(RecordingStore::default());
        let engine = Arc::new(RuleEngine::new(chain.clone(), Arc::new(FixedPacing::default())));
        let watcher = ChainWatcher::new(
            engine,
            Persister::new(store.clone()),
            Configuration::new(
                1,
                vec![
                    Rule::new("a", "a", RuleMatch::address("0x1")),
                    Rule::new("b", "b", RuleMatch::address("0x2")),
                ],
            ),
            ChainWatcherOptions::default(),
        );
        let (blocks, block_rx) = mpsc::channel(16);
        let (_updates, update_rx) = mpsc::unbounded_channel();
        let handle = watcher.spawn(block_rx, update_rx);

        blocks.send(1).await.unwrap();
        blocks.send(2).await.unwrap();
        // flush is now sleeping on the 2 s pacing delay
        tokio::time::sleep(Duration::from_millis(10)).await;
        let summary = handle.stop().await;

        assert_eq!(summary.flushes_abandoned, 0);
        assert_eq!(store.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_bounds_shutdown() {
        let chain = Arc::new(MockChain::default());
        let store = Arc::new(RecordingStore::default());
        let engine = Arc::new(RuleEngine::new(
            chain,
            Arc::new(FixedPacing::new(Duration::from_secs(120))),
        ));
        let watcher = ChainWatcher::new(
            engine,
            Persister::new(store),
            Configuration::new(
                0,
                vec![
                    Rule::new("a", "a", RuleMatch::address("0x1")),
                    Rule::new("b", "b", RuleMatch::address("0x2")),
                ],
            ),
            ChainWatcherOptions {
                shutdown_grace: Duration::from_secs(5),
            },
        );
        let (blocks, block_rx) = mpsc::channel(16);
        let (_updates, update_rx) = mpsc::unbounded_channel();
        let handle = watcher.spawn(block_rx, update_rx);

        blocks.send(1).await.unwrap();
        blocks.send(2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let start = tokio::time::Instant::now();
        let summary = handle.stop().await;
        assert_eq!(summary.flushes_abandoned, 1);
        assert!(start.elapsed() <= Duration::from_secs(6));
    }
}
