use anyhow::Result;
use clap::Args;

use chainwatch_core::store::DEFAULT_PAGE_SIZE;
use chainwatch_core::{LogQuery, SortDirection, SortField};

use crate::backend;

#[derive(Args)]
pub struct QueryArgs {
    /// sqlite:<path> or postgres://...
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Filter by transaction hash
    #[arg(long)]
    tx: Option<String>,

    /// Filter by block number
    #[arg(long)]
    block: Option<u64>,

    /// Filter by rule id
    #[arg(long)]
    rule: Option<String>,

    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Rows per page (max 100)
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,

    /// blockNumber | transactionHash | ruleId | address | createdAt | updatedAt
    #[arg(long, default_value = "createdAt")]
    order_by: String,

    /// ASC | DESC
    #[arg(long, default_value = "DESC")]
    sort: String,
}

impl QueryArgs {
    fn to_query(&self) -> Result<LogQuery> {
        let field: SortField = self.order_by.parse()?;
        let direction: SortDirection = self.sort.parse()?;
        let mut query = LogQuery::new()
            .page(self.page, self.page_size)
            .order(field, direction);
        if let Some(tx) = &self.tx {
            query = query.transaction_hash(tx);
        }
        if let Some(block) = self.block {
            query = query.block_number(block);
        }
        if let Some(rule) = &self.rule {
            query = query.rule_id(rule);
        }
        query.validate()?;
        Ok(query)
    }
}

pub async fn run(args: QueryArgs) -> Result<()> {
    let query = args.to_query()?;
    let store = backend::open_store(args.database_url.as_deref()).await?;
    let page = store.query(&query).await?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}
