use std::sync::Arc;

use anyhow::{bail, Result};

use chainwatch_core::LogStore;
use chainwatch_storage::postgres::PostgresLogStore;
use chainwatch_storage::sqlite::SqliteLogStore;
use chainwatch_storage::InMemoryLogStore;

/// Which backend a `DATABASE_URL` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Sqlite,
    Postgres,
}

pub fn backend_for(url: Option<&str>) -> Result<Backend> {
    match url.map(str::trim) {
        None | Some("") => Ok(Backend::Memory),
        Some(u) if u.starts_with("sqlite:") => Ok(Backend::Sqlite),
        Some(u) if u.starts_with("postgres://") || u.starts_with("postgresql://") => {
            Ok(Backend::Postgres)
        }
        Some(u) => bail!("unsupported DATABASE_URL scheme: {u}"),
    }
}

pub async fn open_store(url: Option<&str>) -> Result<Arc<dyn LogStore>> {
    let store: Arc<dyn LogStore> = match backend_for(url)? {
        Backend::Memory => {
            tracing::warn!("DATABASE_URL not set; logs are kept in memory only");
            Arc::new(InMemoryLogStore::new())
        }
        Backend::Sqlite => Arc::new(SqliteLogStore::open(url.unwrap_or_default().trim()).await?),
        Backend::Postgres => Arc::new(PostgresLogStore::connect(url.unwrap_or_default().trim()).await?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_selects_backend() {
        assert_eq!(backend_for(None).unwrap(), Backend::Memory);
        assert_eq!(backend_for(Some("  ")).unwrap(), Backend::Memory);
        assert_eq!(backend_for(Some("sqlite:./logs.db")).unwrap(), Backend::Sqlite);
        assert_eq!(
            backend_for(Some("postgresql://u:p@localhost/chainwatch")).unwrap(),
            Backend::Postgres
        );
        assert!(backend_for(Some("mysql://localhost")).is_err());
    }

    #[tokio::test]
    async fn sqlite_url_opens() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("logs.db").display());
        let store = open_store(Some(&url)).await.unwrap();
        let page = store.query(&chainwatch_core::LogQuery::new()).await.unwrap();
        assert_eq!(page.total, 0);
    }
}
