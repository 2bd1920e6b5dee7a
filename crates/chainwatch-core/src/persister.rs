//! Batch deduplication and idempotent persistence of matched logs.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::WatchError;
use crate::store::{LogStore, LOG_EVENT_UPSERT};
use crate::types::LogEvent;

/// Collapse `events` by `transaction_hash`.
///
/// The last occurrence of a hash wins but takes the position of the first,
/// so output order follows first appearance.
pub fn dedup_by_transaction(events: Vec<LogEvent>) -> Vec<LogEvent> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(events.len());
    let mut out: Vec<LogEvent> = Vec::with_capacity(events.len());
    for event in events {
        match index.get(&event.transaction_hash) {
            Some(&i) => out[i] = event,
            None => {
                index.insert(event.transaction_hash.clone(), out.len());
                out.push(event);
            }
        }
    }
    out
}

/// Writes flush results to a [`LogStore`].
#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn LogStore>,
}

impl Persister {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// Dedup and upsert `events`. Returns the number of rows written.
    pub async fn try_persist(&self, events: Vec<LogEvent>) -> Result<usize, WatchError> {
        if events.is_empty() {
            return Ok(0);
        }
        let received = events.len();
        let batch = dedup_by_transaction(events);
        let written = self.store.bulk_upsert(&batch, &LOG_EVENT_UPSERT).await?;
        tracing::debug!(received, deduped = batch.len(), written, "batch persisted");
        Ok(written)
    }

    /// Like [`try_persist`](Self::try_persist), but a failure is logged and
    /// the batch dropped.
    pub async fn persist(&self, events: Vec<LogEvent>) {
        let count = events.len();
        if let Err(e) = self.try_persist(events).await {
            tracing::error!(error = %e, count, "failed to persist log batch; dropping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LogPage, LogQuery, UpsertSpec};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn ev(tx: &str, block: u64) -> LogEvent {
        LogEvent {
            block_number: block,
            block_hash: format!("0xb{block}"),
            transaction_hash: tx.to_string(),
            address: "0xa".into(),
            data: "0x".into(),
            topics: vec![],
            rule_id: "r".into(),
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<Vec<LogEvent>>>,
        fail: bool,
    }

    #[async_trait]
    impl LogStore for RecordingStore {
        async fn bulk_upsert(
            &self,
            records: &[LogEvent],
            _spec: &UpsertSpec,
        ) -> Result<usize, WatchError> {
            if self.fail {
                return Err(WatchError::Persistence("db down".into()));
            }
            self.calls.lock().unwrap().push(records.to_vec());
            Ok(records.len())
        }

        async fn query(&self, query: &LogQuery) -> Result<LogPage, WatchError> {
            Ok(LogPage {
                items: vec![],
                page: query.page,
                page_size: query.page_size,
                total: 0,
            })
        }
    }

    #[test]
    fn last_occurrence_wins_at_first_position() {
        let out = dedup_by_transaction(vec![ev("a", 1), ev("b", 2), ev("a", 3)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].transaction_hash, "a");
        assert_eq!(out[0].block_number, 3);
        assert_eq!(out[1].transaction_hash, "b");
        assert_eq!(out[1].block_number, 2);
    }

    #[tokio::test]
    async fn empty_batch_skips_store() {
        let store = Arc::new(RecordingStore::default());
        let persister = Persister::new(store.clone());
        assert_eq!(persister.try_persist(vec![]).await.unwrap(), 0);
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn deduped_batch_is_upserted_once() {
        let store = Arc::new(RecordingStore::default());
        let persister = Persister::new(store.clone());
        let written = persister
            .try_persist(vec![ev("a", 1), ev("b", 2), ev("a", 3)])
            .await
            .unwrap();
        assert_eq!(written, 2);
        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0].block_number, 3);
    }

    #[tokio::test]
    async fn persist_swallows_store_errors() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        let persister = Persister::new(store);
        assert!(persister.try_persist(vec![ev("a", 1)]).await.is_err());
        // must not panic or propagate
        persister.persist(vec![ev("a", 1)]).await;
    }
}
