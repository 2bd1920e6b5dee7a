//! SQLite log store.
//!
//! # Usage
//! ```rust,no_run
//! use chainwatch_storage::sqlite::SqliteLogStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteLogStore::open("./chainwatch.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteLogStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use chainwatch_core::{dedup_by_transaction, LogEvent, LogPage, LogQuery, LogStore, StoredLog, UpsertSpec, WatchError};

use crate::columns::{self, INSERT_COLUMNS, SELECT_COLUMNS, TABLE};

/// Rows per `INSERT` statement; keeps bind parameters under SQLite's limit.
const CHUNK: usize = 500;

fn storage_err(e: sqlx::Error) -> WatchError {
    WatchError::Persistence(e.to_string())
}

pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    /// Open (or create) a database at `path`, a plain file path or a full
    /// `sqlite:` URL.
    pub async fn open(path: &str) -> Result<Self, WatchError> {
        let options = if path.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(path).map_err(storage_err)?
        } else {
            SqliteConnectOptions::new().filename(path)
        }
        .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema(true).await?;
        Ok(store)
    }

    /// A private in-memory database, dropped with the store.
    pub async fn in_memory() -> Result<Self, WatchError> {
        // one connection: each SQLite memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema(false).await?;
        Ok(store)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), WatchError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                block_number     INTEGER NOT NULL,
                block_hash       TEXT    NOT NULL,
                transaction_hash TEXT    NOT NULL UNIQUE,
                address          TEXT    NOT NULL,
                data             TEXT    NOT NULL,
                topics           TEXT    NOT NULL,
                rule_id          TEXT    NOT NULL,
                created_at       TEXT    NOT NULL,
                updated_at       TEXT    NOT NULL
            );"
        ))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        for (name, column) in [("block", "block_number"), ("rule", "rule_id")] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{TABLE}_{name} ON {TABLE} ({column});"
            ))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &LogQuery) {
    qb.push(" WHERE 1 = 1");
    if let Some(tx) = &query.transaction_hash {
        qb.push(" AND transaction_hash = ").push_bind(tx.clone());
    }
    if let Some(block) = query.block_number {
        qb.push(" AND block_number = ").push_bind(block as i64);
    }
    if let Some(rule) = &query.rule_id {
        qb.push(" AND rule_id = ").push_bind(rule.clone());
    }
}

fn row_to_log(row: &SqliteRow) -> Result<StoredLog, WatchError> {
    let topics: String = row.try_get("topics").map_err(storage_err)?;
    Ok(StoredLog {
        id: row.try_get("id").map_err(storage_err)?,
        event: LogEvent {
            block_number: row.try_get::<i64, _>("block_number").map_err(storage_err)? as u64,
            block_hash: row.try_get("block_hash").map_err(storage_err)?,
            transaction_hash: row.try_get("transaction_hash").map_err(storage_err)?,
            address: row.try_get("address").map_err(storage_err)?,
            data: row.try_get("data").map_err(storage_err)?,
            topics: columns::decode_topics(&topics)?,
            rule_id: row.try_get("rule_id").map_err(storage_err)?,
        },
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(storage_err)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(storage_err)?,
    })
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn bulk_upsert(&self, records: &[LogEvent], spec: &UpsertSpec) -> Result<usize, WatchError> {
        let conflict = columns::on_conflict_clause(spec)?;
        if records.is_empty() {
            return Ok(0);
        }
        // One statement may not touch the same conflict key twice.
        let records = dedup_by_transaction(records.to_vec());
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        for chunk in records.chunks(CHUNK) {
            let mut encoded = Vec::with_capacity(chunk.len());
            for record in chunk {
                encoded.push((record, columns::encode_topics(&record.topics)?));
            }

            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT INTO {TABLE} ({INSERT_COLUMNS}) "));
            qb.push_values(encoded, |mut b, (record, topics)| {
                b.push_bind(record.block_number as i64)
                    .push_bind(record.block_hash.clone())
                    .push_bind(record.transaction_hash.clone())
                    .push_bind(record.address.clone())
                    .push_bind(record.data.clone())
                    .push_bind(topics)
                    .push_bind(record.rule_id.clone())
                    .push_bind(now)
                    .push_bind(now);
            });
            qb.push(&conflict);
            qb.build().execute(&mut *tx).await.map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        debug!(rows = records.len(), "log batch upserted");
        Ok(records.len())
    }

    async fn query(&self, query: &LogQuery) -> Result<LogPage, WatchError> {
        query.validate()?;

        let mut count: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT COUNT(*) AS cnt FROM {TABLE}"));
        push_filters(&mut count, query);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?
            .try_get("cnt")
            .map_err(storage_err)?;

        let dir = query.direction.as_sql();
        let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {SELECT_COLUMNS} FROM {TABLE}"));
        push_filters(&mut select, query);
        select
            .push(format!(" ORDER BY {} {dir}, id {dir}", query.order_by.column()))
            .push(" LIMIT ")
            .push_bind(i64::from(query.page_size))
            .push(" OFFSET ")
            .push_bind(query.offset() as i64);

        let rows = select.build().fetch_all(&self.pool).await.map_err(storage_err)?;
        let items = rows.iter().map(row_to_log).collect::<Result<Vec<_>, _>>()?;

        Ok(LogPage {
            items,
            page: query.page,
            page_size: query.page_size,
            total: total as u64,
        })
    }
}
