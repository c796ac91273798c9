//! PostgreSQL driver using `tokio-postgres` with `deadpool-postgres`
//! pooling.
//!
//! A query runner pins one pooled client for its lifetime so transaction
//! state stays on a single session; `release` returns the client to the
//! pool, rolling back any transaction left open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ferrite_core::{OrmError, OrmResult};
use ferrite_orm::driver::{
    DatabaseKind, Driver, QueryRunner, Row, TableColumnSchema, TableForeignKeySchema,
    TableIndexSchema, TableSchema,
};
use ferrite_orm::value::Value;
use tokio::sync::Mutex;

use crate::base::DatabaseConfig;

/// A PostgreSQL driver over a `deadpool-postgres` pool.
pub struct PostgresDriver {
    pool: deadpool_postgres::Pool,
}

impl PostgresDriver {
    /// Creates a driver from an existing pool.
    pub const fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }

    /// Creates a driver from a [`DatabaseConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub fn from_config(config: &DatabaseConfig) -> OrmResult<Self> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.dbname = Some(config.name.clone());
        pg_config.host = config.host.clone();
        pg_config.port = config.port;
        pg_config.user = config.user.clone();
        pg_config.password = config.password.clone();

        let pool = pg_config
            .create_pool(
                Some(deadpool_postgres::Runtime::Tokio1),
                tokio_postgres::NoTls,
            )
            .map_err(|e| OrmError::QueryFailed(format!("failed to create pool: {e}")))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    async fn connect(&self) -> OrmResult<()> {
        // Validate connectivity once; the pool manages sessions after.
        self.pool
            .get()
            .await
            .map(drop)
            .map_err(|e| OrmError::QueryFailed(format!("pool error: {e}")))
    }

    async fn disconnect(&self) -> OrmResult<()> {
        self.pool.close();
        Ok(())
    }

    fn create_query_runner(&self) -> Box<dyn QueryRunner> {
        Box::new(PostgresQueryRunner {
            pool: self.pool.clone(),
            client: Mutex::new(None),
            in_transaction: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// A query runner pinned to one pooled PostgreSQL session.
pub struct PostgresQueryRunner {
    pool: deadpool_postgres::Pool,
    client: Mutex<Option<deadpool_postgres::Object>>,
    in_transaction: Arc<AtomicBool>,
}

impl PostgresQueryRunner {
    /// Ensures the runner holds a session, acquiring one lazily.
    async fn ensure_client(
        &self,
    ) -> OrmResult<tokio::sync::MutexGuard<'_, Option<deadpool_postgres::Object>>> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| OrmError::QueryFailed(format!("pool error: {e}")))?;
            *guard = Some(client);
        }
        Ok(guard)
    }

    /// Converts ORM values to `tokio-postgres` parameters.
    fn to_sql_params(params: &[Value]) -> Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>> {
        params
            .iter()
            .map(|v| -> Box<dyn tokio_postgres::types::ToSql + Sync + Send> {
                match v {
                    Value::Null => Box::new(Option::<String>::None),
                    Value::Bool(b) => Box::new(*b),
                    Value::Int(i) => Box::new(*i),
                    Value::Float(f) => Box::new(*f),
                    Value::String(s) => Box::new(s.clone()),
                    Value::Bytes(b) => Box::new(b.clone()),
                    Value::Date(d) => Box::new(*d),
                    Value::DateTime(dt) => Box::new(*dt),
                    Value::Uuid(u) => Box::new(*u),
                    Value::Json(j) => Box::new(j.clone()),
                }
            })
            .collect()
    }

    /// Converts a `tokio_postgres::Row` to the generic row.
    fn convert_row(pg_row: &tokio_postgres::Row) -> Row {
        let columns: Vec<String> = pg_row
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let values: Vec<Value> = pg_row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| {
                use tokio_postgres::types::Type;
                match *col.type_() {
                    Type::BOOL => pg_row
                        .try_get::<_, Option<bool>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::Bool),
                    Type::INT2 => pg_row
                        .try_get::<_, Option<i16>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, |v| Value::Int(i64::from(v))),
                    Type::INT4 => pg_row
                        .try_get::<_, Option<i32>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, |v| Value::Int(i64::from(v))),
                    Type::INT8 => pg_row
                        .try_get::<_, Option<i64>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::Int),
                    Type::FLOAT4 => pg_row
                        .try_get::<_, Option<f32>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, |v| Value::Float(f64::from(v))),
                    Type::FLOAT8 | Type::NUMERIC => pg_row
                        .try_get::<_, Option<f64>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::Float),
                    Type::BYTEA => pg_row
                        .try_get::<_, Option<Vec<u8>>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::Bytes),
                    Type::UUID => pg_row
                        .try_get::<_, Option<uuid::Uuid>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::Uuid),
                    Type::DATE => pg_row
                        .try_get::<_, Option<chrono::NaiveDate>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::Date),
                    Type::TIMESTAMP => pg_row
                        .try_get::<_, Option<chrono::NaiveDateTime>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::DateTime),
                    Type::TIMESTAMPTZ => pg_row
                        .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, |v| Value::DateTime(v.naive_utc())),
                    Type::JSON | Type::JSONB => pg_row
                        .try_get::<_, Option<serde_json::Value>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::Json),
                    _ => pg_row
                        .try_get::<_, Option<String>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::String),
                }
            })
            .collect();
        Row::new(columns, values)
    }
}

#[async_trait]
impl QueryRunner for PostgresQueryRunner {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        let guard = self.ensure_client().await?;
        let Some(client) = guard.as_ref() else {
            return Err(OrmError::QueryFailed("no session".to_string()));
        };
        let sql_params = Self::to_sql_params(params);
        let param_refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = sql_params
            .iter()
            .map(|p| p.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();
        let rows = client
            .query(sql, &param_refs)
            .await
            .map_err(|e| OrmError::QueryFailed(format!("{e}")))?;
        Ok(rows.iter().map(Self::convert_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        let guard = self.ensure_client().await?;
        let Some(client) = guard.as_ref() else {
            return Err(OrmError::QueryFailed("no session".to_string()));
        };
        let sql_params = Self::to_sql_params(params);
        let param_refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = sql_params
            .iter()
            .map(|p| p.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();
        client
            .execute(sql, &param_refs)
            .await
            .map_err(|e| OrmError::QueryFailed(format!("{e}")))
    }

    async fn insert_returning(
        &self,
        sql: &str,
        params: &[Value],
        pk_column: &str,
    ) -> OrmResult<Value> {
        let sql = format!("{sql} RETURNING \"{pk_column}\"");
        let rows = self.query(&sql, params).await?;
        rows.into_iter()
            .next()
            .and_then(|row| row.get_value(pk_column).cloned())
            .ok_or_else(|| {
                OrmError::QueryFailed("INSERT RETURNING returned no rows".to_string())
            })
    }

    async fn begin_transaction(&self) -> OrmResult<()> {
        self.execute("BEGIN", &[]).await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit_transaction(&self) -> OrmResult<()> {
        self.execute("COMMIT", &[]).await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback_transaction(&self) -> OrmResult<()> {
        self.execute("ROLLBACK", &[]).await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self) -> OrmResult<()> {
        if self.in_transaction.swap(false, Ordering::SeqCst) {
            self.execute("ROLLBACK", &[]).await?;
        }
        *self.client.lock().await = None;
        Ok(())
    }

    async fn load_table_schema(&self, table: &str) -> OrmResult<Option<TableSchema>> {
        let column_rows = self
            .query(
                "SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns WHERE table_name = $1 \
                 ORDER BY ordinal_position",
                &[Value::from(table)],
            )
            .await?;
        if column_rows.is_empty() {
            return Ok(None);
        }
        let primary_rows = self
            .query(
                "SELECT a.attname AS column_name FROM pg_index i \
                 JOIN pg_class c ON c.oid = i.indrelid \
                 JOIN pg_attribute a ON a.attrelid = i.indrelid \
                 AND a.attnum = ANY(i.indkey) \
                 WHERE c.relname = $1 AND i.indisprimary",
                &[Value::from(table)],
            )
            .await?;
        let primary: Vec<String> = primary_rows
            .iter()
            .filter_map(|r| r.get::<String>("column_name").ok())
            .collect();

        let columns: Vec<TableColumnSchema> = column_rows
            .iter()
            .filter_map(|row| {
                let name = row.get::<String>("column_name").ok()?;
                Some(TableColumnSchema {
                    primary: primary.contains(&name),
                    name,
                    type_name: row
                        .get::<String>("data_type")
                        .unwrap_or_default()
                        .to_lowercase(),
                    nullable: row
                        .get::<String>("is_nullable")
                        .map(|v| v == "YES")
                        .unwrap_or(true),
                    default: row.get::<Option<String>>("column_default").ok().flatten(),
                })
            })
            .collect();

        let index_rows = self
            .query(
                "SELECT ic.relname AS index_name, i.indisunique AS is_unique, \
                 a.attname AS column_name \
                 FROM pg_index i \
                 JOIN pg_class ic ON ic.oid = i.indexrelid \
                 JOIN pg_class tc ON tc.oid = i.indrelid \
                 JOIN pg_attribute a ON a.attrelid = tc.oid \
                 AND a.attnum = ANY(i.indkey) \
                 WHERE tc.relname = $1 AND NOT i.indisprimary",
                &[Value::from(table)],
            )
            .await?;
        let mut indices: Vec<TableIndexSchema> = Vec::new();
        for row in &index_rows {
            let Ok(name) = row.get::<String>("index_name") else {
                continue;
            };
            let unique = row.get::<bool>("is_unique").unwrap_or(false);
            let Ok(column) = row.get::<String>("column_name") else {
                continue;
            };
            if let Some(existing) = indices.iter_mut().find(|i| i.name == name) {
                existing.columns.push(column);
            } else {
                indices.push(TableIndexSchema {
                    name,
                    unique,
                    columns: vec![column],
                });
            }
        }

        let fk_rows = self
            .query(
                "SELECT tc.constraint_name, kcu.column_name, \
                 ccu.table_name AS foreign_table, ccu.column_name AS foreign_column \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                 ON tc.constraint_name = kcu.constraint_name \
                 JOIN information_schema.constraint_column_usage ccu \
                 ON ccu.constraint_name = tc.constraint_name \
                 WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_name = $1",
                &[Value::from(table)],
            )
            .await?;
        let mut foreign_keys: Vec<TableForeignKeySchema> = Vec::new();
        for row in &fk_rows {
            let Ok(name) = row.get::<String>("constraint_name") else {
                continue;
            };
            let column = row.get::<String>("column_name").unwrap_or_default();
            let referenced_table = row.get::<String>("foreign_table").unwrap_or_default();
            let referenced_column = row.get::<String>("foreign_column").unwrap_or_default();
            if let Some(existing) = foreign_keys.iter_mut().find(|fk| fk.name == name) {
                existing.columns.push(column);
                existing.referenced_columns.push(referenced_column);
            } else {
                foreign_keys.push(TableForeignKeySchema {
                    name,
                    columns: vec![column],
                    referenced_table,
                    referenced_columns: vec![referenced_column],
                });
            }
        }

        Ok(Some(TableSchema {
            name: table.to_string(),
            columns,
            indices,
            foreign_keys,
        }))
    }
}
