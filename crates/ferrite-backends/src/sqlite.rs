//! SQLite driver using `rusqlite`.
//!
//! `rusqlite` is synchronous, so every operation runs inside
//! `tokio::task::spawn_blocking` with the connection behind an async
//! mutex. WAL journal mode and foreign-key enforcement are switched on at
//! open. In-memory databases (`:memory:`) make this the backend of choice
//! for tests.
//!
//! All runners created from one driver share the single underlying
//! connection; statement order within a transaction is serialized by the
//! connection mutex.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ferrite_core::{OrmError, OrmResult};
use ferrite_orm::driver::{
    DatabaseKind, Driver, QueryRunner, Row, TableColumnSchema, TableForeignKeySchema,
    TableIndexSchema, TableSchema,
};
use ferrite_orm::value::Value;
use tokio::sync::Mutex;

/// A SQLite driver over one `rusqlite` connection.
pub struct SqliteDriver {
    path: PathBuf,
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteDriver {
    /// Opens a SQLite database at the given path (`:memory:` for an
    /// in-memory database).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> OrmResult<Self> {
        let path = path.into();
        let conn = if path.to_str() == Some(":memory:") {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| OrmError::QueryFailed(format!("sqlite open failed: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| OrmError::QueryFailed(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn memory() -> OrmResult<Self> {
        Self::open(":memory:")
    }

    /// Returns the database file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    async fn connect(&self) -> OrmResult<()> {
        // The connection is opened eagerly in `open`.
        Ok(())
    }

    async fn disconnect(&self) -> OrmResult<()> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let conn = conn.blocking_lock();
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK")
                    .map_err(|e| OrmError::QueryFailed(format!("{e}")))?;
            }
            Ok(())
        })
        .await
    }

    fn create_query_runner(&self) -> Box<dyn QueryRunner> {
        Box::new(SqliteQueryRunner {
            conn: Arc::clone(&self.conn),
        })
    }
}

/// A query runner over the driver's shared SQLite connection.
pub struct SqliteQueryRunner {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

/// Runs a blocking closure on the tokio blocking pool.
async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> OrmResult<T> + Send + 'static,
) -> OrmResult<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| OrmError::QueryFailed(format!("task join error: {e}")))?
}

/// Binds ORM values to a prepared statement.
fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> OrmResult<()> {
    for (i, param) in params.iter().enumerate() {
        let idx = i + 1;
        match param {
            Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
            Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
            Value::Int(v) => stmt.raw_bind_parameter(idx, v),
            Value::Float(v) => stmt.raw_bind_parameter(idx, v),
            Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
            Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
            Value::Date(d) => stmt.raw_bind_parameter(idx, d.to_string().as_str()),
            Value::DateTime(dt) => stmt.raw_bind_parameter(idx, dt.to_string().as_str()),
            Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.to_string().as_str()),
            Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string().as_str()),
        }
        .map_err(|e| OrmError::QueryFailed(format!("bind error: {e}")))?;
    }
    Ok(())
}

/// Reads all rows from a bound statement.
fn read_rows(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> OrmResult<Vec<Row>> {
    let column_names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    bind_params(stmt, params)?;
    let mut raw_rows = stmt.raw_query();
    let mut rows = Vec::new();
    while let Some(raw) = raw_rows
        .next()
        .map_err(|e| OrmError::QueryFailed(format!("{e}")))?
    {
        let values: Vec<Value> = (0..column_names.len())
            .map(|i| {
                match raw
                    .get_ref(i)
                    .unwrap_or(rusqlite::types::ValueRef::Null)
                {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(v) => Value::Int(v),
                    rusqlite::types::ValueRef::Real(v) => Value::Float(v),
                    rusqlite::types::ValueRef::Text(b) => {
                        Value::String(String::from_utf8_lossy(b).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
                }
            })
            .collect();
        rows.push(Row::new(column_names.clone(), values));
    }
    Ok(rows)
}

#[async_trait]
impl QueryRunner for SqliteQueryRunner {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let params = params.to_vec();
        run_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| OrmError::QueryFailed(format!("{e}")))?;
            read_rows(&mut stmt, &params)
        })
        .await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let params = params.to_vec();
        run_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| OrmError::QueryFailed(format!("{e}")))?;
            bind_params(&mut stmt, &params)?;
            let count = stmt
                .raw_execute()
                .map_err(|e| OrmError::QueryFailed(format!("{e}")))?;
            Ok(count as u64)
        })
        .await
    }

    async fn insert_returning(
        &self,
        sql: &str,
        params: &[Value],
        _pk_column: &str,
    ) -> OrmResult<Value> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let params = params.to_vec();
        run_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| OrmError::QueryFailed(format!("{e}")))?;
            bind_params(&mut stmt, &params)?;
            stmt.raw_execute()
                .map_err(|e| OrmError::QueryFailed(format!("{e}")))?;
            Ok(Value::Int(conn.last_insert_rowid()))
        })
        .await
    }

    async fn begin_transaction(&self) -> OrmResult<()> {
        self.execute("BEGIN", &[]).await.map(|_| ())
    }

    async fn commit_transaction(&self) -> OrmResult<()> {
        self.execute("COMMIT", &[]).await.map(|_| ())
    }

    async fn rollback_transaction(&self) -> OrmResult<()> {
        self.execute("ROLLBACK", &[]).await.map(|_| ())
    }

    async fn release(&self) -> OrmResult<()> {
        // A transaction left open by an aborted operation must not leak
        // into the next one.
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let conn = conn.blocking_lock();
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK")
                    .map_err(|e| OrmError::QueryFailed(format!("{e}")))?;
            }
            Ok(())
        })
        .await
    }

    async fn load_table_schema(&self, table: &str) -> OrmResult<Option<TableSchema>> {
        let conn = Arc::clone(&self.conn);
        let table = table.to_string();
        run_blocking(move || {
            let conn = conn.blocking_lock();
            load_schema_blocking(&conn, &table)
        })
        .await
    }
}

/// Reads a table's live schema through SQLite pragmas.
fn load_schema_blocking(
    conn: &rusqlite::Connection,
    table: &str,
) -> OrmResult<Option<TableSchema>> {
    let failed = |e: rusqlite::Error| OrmError::QueryFailed(format!("{e}"));

    let mut columns = Vec::new();
    {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info(\"{table}\")"))
            .map_err(failed)?;
        let mut rows = stmt.query([]).map_err(failed)?;
        while let Some(row) = rows.next().map_err(failed)? {
            let name: String = row.get(1).map_err(failed)?;
            let type_name: String = row.get(2).map_err(failed)?;
            let notnull: i64 = row.get(3).map_err(failed)?;
            let default: Option<String> = row.get(4).map_err(failed)?;
            let pk: i64 = row.get(5).map_err(failed)?;
            columns.push(TableColumnSchema {
                name,
                type_name: type_name.to_lowercase(),
                nullable: notnull == 0,
                default,
                primary: pk > 0,
            });
        }
    }
    if columns.is_empty() {
        return Ok(None);
    }

    let mut indices = Vec::new();
    {
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_list(\"{table}\")"))
            .map_err(failed)?;
        let mut index_heads: Vec<(String, bool, String)> = Vec::new();
        let mut rows = stmt.query([]).map_err(failed)?;
        while let Some(row) = rows.next().map_err(failed)? {
            let name: String = row.get(1).map_err(failed)?;
            let unique: i64 = row.get(2).map_err(failed)?;
            let origin: String = row.get(3).map_err(failed)?;
            index_heads.push((name, unique != 0, origin));
        }
        for (name, unique, origin) in index_heads {
            // "pk" entries mirror the primary key; they are not real
            // indices.
            if origin == "pk" {
                continue;
            }
            let mut cols = Vec::new();
            let mut stmt = conn
                .prepare(&format!("PRAGMA index_info(\"{name}\")"))
                .map_err(failed)?;
            let mut rows = stmt.query([]).map_err(failed)?;
            while let Some(row) = rows.next().map_err(failed)? {
                let column: Option<String> = row.get(2).map_err(failed)?;
                if let Some(column) = column {
                    cols.push(column);
                }
            }
            indices.push(TableIndexSchema {
                name,
                unique,
                columns: cols,
            });
        }
    }

    let mut foreign_keys: Vec<TableForeignKeySchema> = Vec::new();
    {
        let mut stmt = conn
            .prepare(&format!("PRAGMA foreign_key_list(\"{table}\")"))
            .map_err(failed)?;
        let mut rows = stmt.query([]).map_err(failed)?;
        while let Some(row) = rows.next().map_err(failed)? {
            let id: i64 = row.get(0).map_err(failed)?;
            let referenced_table: String = row.get(2).map_err(failed)?;
            let from: String = row.get(3).map_err(failed)?;
            let to: Option<String> = row.get(4).map_err(failed)?;
            let name = format!("fk_{table}_{id}");
            if let Some(existing) = foreign_keys.iter_mut().find(|fk| fk.name == name) {
                existing.columns.push(from);
                if let Some(to) = to {
                    existing.referenced_columns.push(to);
                }
            } else {
                foreign_keys.push(TableForeignKeySchema {
                    name,
                    columns: vec![from],
                    referenced_table,
                    referenced_columns: to.into_iter().collect(),
                });
            }
        }
    }

    Ok(Some(TableSchema {
        name: table.to_string(),
        columns,
        indices,
        foreign_keys,
    }))
}
