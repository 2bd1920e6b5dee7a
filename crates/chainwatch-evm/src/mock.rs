//! Test doubles shared by the engine and watcher tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chainwatch_core::{LogEvent, LogPage, LogQuery, LogStore, UpsertSpec, WatchError};
use tokio::time::Instant;

use crate::client::{ChainClient, LogFilter, RawLog};

pub fn raw_log(tx: &str, block: u64) -> RawLog {
    RawLog {
        address: "0xa".into(),
        topics: vec![],
        data: "0x".into(),
        block_number: Some(format!("0x{block:x}")),
        block_hash: Some(format!("0xb{block}")),
        transaction_hash: Some(tx.into()),
        log_index: Some("0x0".into()),
        removed: None,
    }
}

/// Answers `eth_getLogs` per filter address and records every call.
#[derive(Default)]
pub struct MockChain {
    by_address: Mutex<HashMap<String, Result<Vec<RawLog>, WatchError>>>,
    pub calls: Mutex<Vec<(LogFilter, Instant)>>,
}

impl MockChain {
    pub fn respond(&self, address: &str, logs: Vec<RawLog>) {
        self.by_address
            .lock()
            .unwrap()
            .insert(address.to_string(), Ok(logs));
    }

    pub fn fail(&self, address: &str, err: WatchError) {
        self.by_address
            .lock()
            .unwrap()
            .insert(address.to_string(), Err(err));
    }

    pub fn filters(&self) -> Vec<LogFilter> {
        self.calls.lock().unwrap().iter().map(|(f, _)| f.clone()).collect()
    }
}

fn replay(err: &WatchError) -> WatchError {
    match err {
        WatchError::RateLimited(m) => WatchError::RateLimited(m.clone()),
        other => WatchError::Provider(other.to_string()),
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, WatchError> {
        Ok(0)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, WatchError> {
        self.calls.lock().unwrap().push((filter.clone(), Instant::now()));
        let key = filter.address.clone().unwrap_or_default();
        match self.by_address.lock().unwrap().get(&key) {
            Some(Ok(logs)) => Ok(logs.clone()),
            Some(Err(e)) => Err(replay(e)),
            None => Ok(vec![]),
        }
    }
}

/// Records every upsert batch.
#[derive(Default)]
pub struct RecordingStore {
    pub batches: Mutex<Vec<Vec<LogEvent>>>,
}

#[async_trait]
impl LogStore for RecordingStore {
    async fn bulk_upsert(&self, records: &[LogEvent], _spec: &UpsertSpec) -> Result<usize, WatchError> {
        self.batches.lock().unwrap().push(records.to_vec());
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
