//! New-block notifications derived from polling the chain head.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::ChainClient;

/// Default head polling interval.
pub const DEFAULT_BLOCK_POLL: Duration = Duration::from_secs(4);

/// Poll `client` for its head and emit every new block number, in ascending
/// order, on the returned channel.
///
/// The first observed head is emitted on its own; after that each poll emits
/// every block between the last emitted one and the new head. A head that
/// moved backwards is ignored until it passes the last emitted block again.
/// The task ends when the receiver is dropped.
pub fn spawn_block_poller(
    client: Arc<dyn ChainClient>,
    interval: Duration,
) -> (mpsc::Receiver<u64>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(256);
    let task = tokio::spawn(async move {
        let mut last: Option<u64> = None;
        loop {
            match client.block_number().await {
                Ok(head) => {
                    let from = last.map_or(head, |prev| prev + 1);
                    for block in from..=head {
                        if tx.send(block).await.is_err() {
                            tracing::debug!("block listener dropped; poller exiting");
                            return;
                        }
                        last = Some(block);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to poll chain head"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tx.closed() => {
                    tracing::debug!("block listener dropped; poller exiting");
                    return;
                }
            }
        }
    });
    (rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{LogFilter, RawLog};
    use async_trait::async_trait;
    use chainwatch_core::WatchError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedHeads(Mutex<VecDeque<Result<u64, WatchError>>>);

    #[async_trait]
    impl ChainClient for ScriptedHeads {
        async fn block_number(&self) -> Result<u64, WatchError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(WatchError::Provider("script exhausted".into())))
        }

        async fn get_logs(&self, _filter: &LogFilter) -> Result<Vec<RawLog>, WatchError> {
            Ok(vec![])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_gap_blocks_in_order() {
        let script = vec![
            Ok(100),
            Ok(100),
            Err(WatchError::RateLimited("429".into())),
            Ok(103),
            Ok(102),
            Ok(104),
        ];
        let client = Arc::new(ScriptedHeads(Mutex::new(script.into())));
        let (mut rx, task) = spawn_block_poller(client, DEFAULT_BLOCK_POLL);

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, vec![100, 101, 102, 103, 104]);

        drop(rx);
        task.await.unwrap();
    }
}
