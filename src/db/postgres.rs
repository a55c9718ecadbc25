use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, types::Json, Executor, Pool, Postgres, Row};

use super::{Changeset, Store, Table, Write};
use crate::error::Error;

/// Every table is a `(key, data JSONB)` document table. A changeset is one
/// SQL transaction, insert-only writes rely on the primary key to conflict.
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    #[tracing::instrument(name = "PgStore::new", skip(db_uri))]
    pub async fn new(db_uri: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_uri)
            .await?;

        for table in Table::ALL {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} (key VARCHAR PRIMARY KEY, data JSONB NOT NULL)",
                table.name()
            );
            pool.execute(ddl.as_str()).await?;
        }

        tracing::info!("document tables ready");

        Ok(Self { pool })
    }
}

fn decode_all(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Value>, Error> {
    rows.into_iter()
        .map(|row| {
            let Json(data): Json<Value> = row.try_get("data")?;
            Ok(data)
        })
        .collect()
}

#[async_trait]
impl Store for PgStore {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, table: Table, key: &str) -> Result<Option<Value>, Error> {
        let sql = format!("SELECT data FROM {} WHERE key = $1", table.name());

        let maybe_row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match maybe_row {
            Some(row) => {
                let Json(data): Json<Value> = row.try_get("data")?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn find_by(&self, table: Table, field: &str, value: &str) -> Result<Vec<Value>, Error> {
        let sql = format!(
            "SELECT data FROM {} WHERE data->>$1 = $2 ORDER BY key",
            table.name()
        );

        let rows = sqlx::query(&sql)
            .bind(field)
            .bind(value)
            .fetch_all(&self.pool)
            .await?;

        decode_all(rows)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_all(&self, table: Table) -> Result<Vec<Value>, Error> {
        let sql = format!("SELECT data FROM {} ORDER BY key", table.name());
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        decode_all(rows)
    }

    #[tracing::instrument(skip(self, changes), fields(writes = changes.len()))]
    async fn commit(&self, changes: Changeset) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        for write in changes.into_writes() {
            let (sql, key, data) = match write {
                Write::Upsert { table, key, data } => (
                    format!(
                        "INSERT INTO {} (key, data) VALUES ($1, $2) \
                         ON CONFLICT (key) DO UPDATE SET data = EXCLUDED.data",
                        table.name()
                    ),
                    key,
                    data,
                ),
                Write::Insert { table, key, data } => (
                    format!("INSERT INTO {} (key, data) VALUES ($1, $2)", table.name()),
                    key,
                    data,
                ),
            };

            // dropping `tx` on error rolls the whole changeset back
            sqlx::query(&sql)
                .bind(key)
                .bind(Json(data))
                .execute(&mut tx)
                .await?;
        }

        tx.commit().await?;

        Ok(())
    }
}
