//! PostgreSQL collection source.
//!
//! Every base table of a schema is a collection; clearing one runs
//! `DELETE FROM` on it. Tables are read from `information_schema` on each
//! call, so tables created after startup are picked up.

use crate::collection::{BulkClear, CollectionDescriptor, CollectionSource};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

const DEFAULT_SCHEMA: &str = "public";

/// Collection source over the tables of one PostgreSQL schema.
#[derive(Clone)]
pub struct PgCollectionSource {
    pool: PgPool,
    schema: String,
}

impl PgCollectionSource {
    pub fn new(pool: PgPool) -> Self {
        PgCollectionSource {
            pool,
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    /// Connect using `config.database_url`.
    ///
    /// # Errors
    /// `Error::ConfigError` if no URL is configured; `Error::StoreUnavailable`
    /// if the database cannot be reached.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| Error::ConfigError("DATABASE_URL is not set".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.connection_timeout)
            .connect(url)
            .await?;

        info!("✓ PostgreSQL pool connected (max connections: {})", config.pool_size);
        Ok(Self::new(pool))
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CollectionSource for PgCollectionSource {
    async fn collections(&self) -> Result<Vec<CollectionDescriptor>> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            "✓ Discovered {} tables in schema {}",
            tables.len(),
            self.schema
        );

        Ok(tables
            .into_iter()
            .map(|name| {
                let table = PgTable {
                    pool: self.pool.clone(),
                    qualified: format!("{}.{}", quote_ident(&self.schema), quote_ident(&name)),
                };
                CollectionDescriptor::new(name, Arc::new(table))
            })
            .collect())
    }
}

struct PgTable {
    pool: PgPool,
    qualified: String,
}

impl BulkClear for PgTable {
    fn clear_all(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let sql = format!("DELETE FROM {}", self.qualified);
            let result = sqlx::query(&sql).execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
