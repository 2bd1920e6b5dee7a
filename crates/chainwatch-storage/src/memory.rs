//! In-memory log store.
//!
//! Default backend when no `DATABASE_URL` is configured. All data is lost
//! when the process exits.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use chainwatch_core::{
    dedup_by_transaction, LogEvent, LogPage, LogQuery, LogStore, SortDirection, SortField, StoredLog, UpsertSpec,
    WatchError,
};

use crate::columns;

#[derive(Default)]
struct Table {
    rows: Vec<StoredLog>,
    by_tx: HashMap<String, usize>,
    next_id: i64,
}

#[derive(Default)]
pub struct InMemoryLogStore {
    table: Mutex<Table>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored logs.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, transaction_hash: &str) -> Option<StoredLog> {
        let table = self.table.lock().unwrap();
        table.by_tx.get(transaction_hash).map(|&i| table.rows[i].clone())
    }
}

fn apply_update(row: &mut StoredLog, new: &LogEvent, spec: &UpsertSpec, now: chrono::DateTime<Utc>) {
    for field in spec.update_fields {
        match *field {
            "blockNumber" => row.event.block_number = new.block_number,
            "blockHash" => row.event.block_hash = new.block_hash.clone(),
            "address" => row.event.address = new.address.clone(),
            "data" => row.event.data = new.data.clone(),
            "topics" => row.event.topics = new.topics.clone(),
            "ruleId" => row.event.rule_id = new.rule_id.clone(),
            "updatedAt" => row.updated_at = now,
            _ => {}
        }
    }
}

fn compare(a: &StoredLog, b: &StoredLog, field: SortField) -> Ordering {
    match field {
        SortField::BlockNumber => a.event.block_number.cmp(&b.event.block_number),
        SortField::TransactionHash => a.event.transaction_hash.cmp(&b.event.transaction_hash),
        SortField::RuleId => a.event.rule_id.cmp(&b.event.rule_id),
        SortField::Address => a.event.address.cmp(&b.event.address),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    }
    .then(a.id.cmp(&b.id))
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn bulk_upsert(&self, records: &[LogEvent], spec: &UpsertSpec) -> Result<usize, WatchError> {
        columns::resolve(spec)?;
        let records = dedup_by_transaction(records.to_vec());
        let now = Utc::now();
        let mut table = self.table.lock().unwrap();
        for record in &records {
            match table.by_tx.get(&record.transaction_hash).copied() {
                Some(i) => apply_update(&mut table.rows[i], record, spec, now),
                None => {
                    table.next_id += 1;
                    let row = StoredLog {
                        id: table.next_id,
                        event: record.clone(),
                        created_at: now,
                        updated_at: now,
                    };
                    let index = table.rows.len();
                    table.by_tx.insert(record.transaction_hash.clone(), index);
                    table.rows.push(row);
                }
            }
        }
        Ok(records.len())
    }

    async fn query(&self, query: &LogQuery) -> Result<LogPage, WatchError> {
        query.validate()?;
        let table = self.table.lock().unwrap();
        let mut matched: Vec<&StoredLog> = table.rows.iter().filter(|r| query.matches(&r.event)).collect();
        matched.sort_by(|a, b| {
            let ord = compare(a, b, query.order_by);
            match query.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size as usize)
            .cloned()
            .collect();
        Ok(LogPage {
            items,
            page: query.page,
            page_size: query.page_size,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwatch_core::LOG_EVENT_UPSERT;

    fn ev(tx: &str, block: u64, rule: &str) -> LogEvent {
        LogEvent {
            block_number: block,
            block_hash: format!("0xb{block}"),
            transaction_hash: tx.to_string(),
            address: "0xa".into(),
            data: "0x".into(),
            topics: vec!["0xt".into()],
            rule_id: rule.to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_transaction() {
        let store = InMemoryLogStore::new();
        let batch = vec![ev("0x1", 10, "r"), ev("0x2", 11, "r")];
        store.bulk_upsert(&batch, &LOG_EVENT_UPSERT).await.unwrap();
        let first = store.get("0x1").unwrap();

        let again = vec![ev("0x1", 12, "s"), ev("0x2", 11, "r")];
        store.bulk_upsert(&again, &LOG_EVENT_UPSERT).await.unwrap();

        assert_eq!(store.len(), 2);
        let updated = store.get("0x1").unwrap();
        assert_eq!(updated.id, first.id);
        assert_eq!(updated.created_at, first.created_at);
        assert_eq!(updated.event.block_number, 12);
        assert_eq!(updated.event.rule_id, "s");
        assert!(updated.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn duplicate_hashes_in_one_batch_keep_the_last() {
        let store = InMemoryLogStore::new();
        let batch = vec![ev("0x1", 10, "r"), ev("0x2", 11, "r"), ev("0x1", 12, "s")];
        assert_eq!(store.bulk_upsert(&batch, &LOG_EVENT_UPSERT).await.unwrap(), 2);

        assert_eq!(store.len(), 2);
        let row = store.get("0x1").unwrap();
        assert_eq!(row.event.block_number, 12);
        assert_eq!(row.event.rule_id, "s");
    }

    #[tokio::test]
    async fn only_listed_fields_are_overwritten() {
        let store = InMemoryLogStore::new();
        store.bulk_upsert(&[ev("0x1", 10, "r")], &LOG_EVENT_UPSERT).await.unwrap();

        let narrow = UpsertSpec {
            conflict_key: "transactionHash",
            update_fields: &["ruleId"],
        };
        store.bulk_upsert(&[ev("0x1", 99, "s")], &narrow).await.unwrap();

        let row = store.get("0x1").unwrap();
        assert_eq!(row.event.rule_id, "s");
        assert_eq!(row.event.block_number, 10);
    }

    #[tokio::test]
    async fn unknown_field_is_rejected() {
        let store = InMemoryLogStore::new();
        let bad = UpsertSpec {
            conflict_key: "transactionHash",
            update_fields: &["gasUsed"],
        };
        let err = store.bulk_upsert(&[ev("0x1", 1, "r")], &bad).await.unwrap_err();
        assert!(matches!(err, WatchError::Persistence(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn query_filters_sorts_and_pages() {
        let store = InMemoryLogStore::new();
        let batch: Vec<_> = (0..25)
            .map(|i| ev(&format!("0x{i:02}"), 100 + i, if i % 2 == 0 { "even" } else { "odd" }))
            .collect();
        store.bulk_upsert(&batch, &LOG_EVENT_UPSERT).await.unwrap();

        let page = store.query(&LogQuery::new()).await.unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.items.len(), 20);
        // equal created_at; ties fall back to id, newest first
        assert_eq!(page.items[0].event.transaction_hash, "0x24");

        let evens = store
            .query(
                &LogQuery::new()
                    .rule_id("even")
                    .order(SortField::BlockNumber, SortDirection::Asc)
                    .page(2, 5),
            )
            .await
            .unwrap();
        assert_eq!(evens.total, 13);
        let blocks: Vec<_> = evens.items.iter().map(|r| r.event.block_number).collect();
        assert_eq!(blocks, vec![110, 112, 114, 116, 118]);

        let one = store
            .query(&LogQuery::new().transaction_hash("0x07").block_number(107))
            .await
            .unwrap();
        assert_eq!(one.total, 1);

        let past_end = store.query(&LogQuery::new().page(9, 20)).await.unwrap();
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.total, 25);
    }

    #[tokio::test]
    async fn invalid_page_is_a_validation_error() {
        let store = InMemoryLogStore::new();
        let err = store.query(&LogQuery::new().page(0, 20)).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
