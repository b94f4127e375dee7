use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    PgPool, Postgres,
    postgres::{PgArguments, PgPoolOptions},
    query::QueryScalar,
};

use crate::adapters::{Param, QueryExecutor, Statement};
use crate::error::Error;

/// PostgreSQL executor.
///
/// Statements are rendered with `$n` placeholders against the application's
/// own tables. Each select is wrapped as
/// `SELECT to_jsonb(t) FROM (<statement>) t` so rows come back as JSON
/// objects keyed by column name.
pub struct PostgresAdapter {
    pub(crate) pool: PgPool,
}

impl PostgresAdapter {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self::from_pool(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn bind_params<'a, O>(
        mut query: QueryScalar<'a, Postgres, O, PgArguments>,
        params: &'a [Param],
    ) -> QueryScalar<'a, Postgres, O, PgArguments> {
        for param in params {
            query = match &param.value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64()),
                },
                Value::String(s) => query.bind(s.as_str()),
                other => query.bind(sqlx::types::Json(other)),
            };
        }
        query
    }
}

#[async_trait]
impl QueryExecutor for PostgresAdapter {
    async fn fetch(&self, statement: &Statement) -> Result<Vec<Value>, Error> {
        let sql = format!("SELECT to_jsonb(t) FROM ({}) t", statement.sql);
        let query = Self::bind_params(sqlx::query_scalar::<_, Value>(&sql), &statement.params);

        query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    async fn fetch_count(&self, statement: &Statement) -> Result<u64, Error> {
        let query = Self::bind_params(
            sqlx::query_scalar::<_, i64>(&statement.sql),
            &statement.params,
        );

        let count = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(count.max(0) as u64)
    }
}
