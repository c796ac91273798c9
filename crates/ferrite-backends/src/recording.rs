//! A statement-recording query runner for tests.
//!
//! [`RecordingRunner`] wraps any runner, delegates every call, and keeps a
//! log of the executed statements. Tests use it to assert query counts —
//! most importantly that saving an unmodified entity issues zero write
//! statements.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ferrite_core::OrmResult;
use ferrite_orm::driver::{DatabaseKind, Driver, QueryRunner, Row, TableSchema};
use ferrite_orm::value::Value;

/// A shared statement log.
pub type StatementLog = Arc<Mutex<Vec<String>>>;

/// Wraps a runner and records every statement it executes.
pub struct RecordingRunner {
    inner: Box<dyn QueryRunner>,
    log: StatementLog,
}

impl RecordingRunner {
    /// Wraps `inner`, recording into a fresh log.
    pub fn new(inner: Box<dyn QueryRunner>) -> Self {
        Self {
            inner,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Wraps `inner`, recording into `log`. Useful when the runner is
    /// handed off but the test keeps the log.
    pub fn with_log(inner: Box<dyn QueryRunner>, log: StatementLog) -> Self {
        Self { inner, log }
    }

    /// Returns a handle to the statement log.
    pub fn log(&self) -> StatementLog {
        Arc::clone(&self.log)
    }

    /// Returns all recorded statements.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().expect("statement log poisoned").clone()
    }

    /// Returns the recorded INSERT/UPDATE/DELETE statements.
    pub fn write_statements(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| is_write(s))
            .collect()
    }

    /// Clears the log.
    pub fn reset(&self) {
        self.log.lock().expect("statement log poisoned").clear();
    }

    fn record(&self, sql: &str) {
        self.log
            .lock()
            .expect("statement log poisoned")
            .push(sql.to_string());
    }
}

/// Counts the write statements currently in `log`.
pub fn count_writes(log: &StatementLog) -> usize {
    log.lock()
        .expect("statement log poisoned")
        .iter()
        .filter(|s| is_write(s))
        .count()
}

fn is_write(sql: &str) -> bool {
    let sql = sql.trim_start();
    sql.starts_with("INSERT") || sql.starts_with("UPDATE") || sql.starts_with("DELETE")
}

#[async_trait]
impl QueryRunner for RecordingRunner {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        self.record(sql);
        self.inner.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        self.record(sql);
        self.inner.execute(sql, params).await
    }

    async fn insert_returning(
        &self,
        sql: &str,
        params: &[Value],
        pk_column: &str,
    ) -> OrmResult<Value> {
        self.record(sql);
        self.inner.insert_returning(sql, params, pk_column).await
    }

    async fn begin_transaction(&self) -> OrmResult<()> {
        self.record("BEGIN");
        self.inner.begin_transaction().await
    }

    async fn commit_transaction(&self) -> OrmResult<()> {
        self.record("COMMIT");
        self.inner.commit_transaction().await
    }

    async fn rollback_transaction(&self) -> OrmResult<()> {
        self.record("ROLLBACK");
        self.inner.rollback_transaction().await
    }

    async fn release(&self) -> OrmResult<()> {
        self.inner.release().await
    }

    async fn load_table_schema(&self, table: &str) -> OrmResult<Option<TableSchema>> {
        self.inner.load_table_schema(table).await
    }
}

/// A driver wrapper that hands out recording runners sharing one log.
///
/// Lets higher-level APIs (repositories, the entity manager) run over a
/// real driver while a test observes every statement.
pub struct RecordingDriver {
    inner: Arc<dyn Driver>,
    log: StatementLog,
}

impl RecordingDriver {
    /// Wraps `inner` with a fresh shared log.
    pub fn new(inner: Arc<dyn Driver>) -> Self {
        Self {
            inner,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns a handle to the shared statement log.
    pub fn log(&self) -> StatementLog {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    fn kind(&self) -> DatabaseKind {
        self.inner.kind()
    }

    async fn connect(&self) -> OrmResult<()> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> OrmResult<()> {
        self.inner.disconnect().await
    }

    fn create_query_runner(&self) -> Box<dyn QueryRunner> {
        Box::new(RecordingRunner::with_log(
            self.inner.create_query_runner(),
            Arc::clone(&self.log),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_detection() {
        assert!(is_write("INSERT INTO t VALUES (1)"));
        assert!(is_write("  UPDATE t SET x = 1"));
        assert!(is_write("DELETE FROM t"));
        assert!(!is_write("SELECT * FROM t"));
        assert!(!is_write("BEGIN"));
    }
}
