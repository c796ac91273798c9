//! Driver capability traits and the generic row abstraction.
//!
//! Concrete database drivers live in the `ferrite-backends` crate; these
//! traits are defined here, in the ORM crate, so query execution and the
//! persistence executor can be written against them without a circular
//! dependency. Every method that performs a database round-trip is async;
//! nothing else in the core suspends.

use async_trait::async_trait;
use ferrite_core::{OrmError, OrmResult};

use crate::value::{FromValue, Value};

/// Identifies a SQL dialect family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    /// PostgreSQL (and wire-compatible engines such as CockroachDB).
    Postgres,
    /// SQLite.
    Sqlite,
    /// MySQL / MariaDB.
    MySql,
}

impl DatabaseKind {
    /// Returns the lowercase vendor identifier string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
        }
    }
}

/// A generic database row passed between drivers and the ORM.
///
/// Holds column names and their values; typed access goes through
/// [`FromValue`].
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist or the value cannot be
    /// converted to the requested type.
    pub fn get<T: FromValue>(&self, column: &str) -> OrmResult<T> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                OrmError::ConversionFailed(format!("column \"{column}\" not found in row"))
            })?;
        T::from_value(&self.values[idx])
    }

    /// Returns a reference to the raw value at the given column name.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }
}

/// The shape of one column read from a live database table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumnSchema {
    /// The column name.
    pub name: String,
    /// The database's type string (e.g. `integer`, `varchar(255)`).
    pub type_name: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// The column default expression, if any.
    pub default: Option<String>,
    /// Whether the column is part of the primary key.
    pub primary: bool,
}

/// The shape of one index read from a live database table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableIndexSchema {
    /// The index name.
    pub name: String,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// The ordered column names covered by the index.
    pub columns: Vec<String>,
}

/// The shape of one foreign key read from a live database table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableForeignKeySchema {
    /// The constraint name.
    pub name: String,
    /// The local column names.
    pub columns: Vec<String>,
    /// The referenced table.
    pub referenced_table: String,
    /// The referenced column names.
    pub referenced_columns: Vec<String>,
}

/// The full shape of a live database table, as read by a driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    /// The table name.
    pub name: String,
    /// Ordered column shapes.
    pub columns: Vec<TableColumnSchema>,
    /// Index shapes.
    pub indices: Vec<TableIndexSchema>,
    /// Foreign key shapes.
    pub foreign_keys: Vec<TableForeignKeySchema>,
}

impl TableSchema {
    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&TableColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A single database session capable of running statements and owning a
/// transaction.
///
/// Obtained from [`Driver::create_query_runner`]; released with
/// [`release`](QueryRunner::release). A runner's transaction is exclusively
/// owned by the operation that opened it until commit/rollback/release.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Runs a SQL query and returns all result rows.
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>>;

    /// Runs a SQL statement that does not return rows.
    ///
    /// Returns the number of rows affected.
    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<u64>;

    /// Executes an INSERT and returns the generated value of `pk_column`.
    ///
    /// Drivers with `RETURNING` support append it; others follow up with
    /// their last-insert-id mechanism.
    async fn insert_returning(
        &self,
        sql: &str,
        params: &[Value],
        pk_column: &str,
    ) -> OrmResult<Value>;

    /// Begins a transaction on this runner's session.
    async fn begin_transaction(&self) -> OrmResult<()>;

    /// Commits the open transaction.
    async fn commit_transaction(&self) -> OrmResult<()>;

    /// Rolls back the open transaction.
    async fn rollback_transaction(&self) -> OrmResult<()>;

    /// Releases the underlying session back to its driver.
    ///
    /// An open transaction is rolled back first; a runner is never allowed
    /// to leak a half-committed transaction.
    async fn release(&self) -> OrmResult<()>;

    /// Reads the live schema of `table`, or `None` if the table does not
    /// exist.
    async fn load_table_schema(&self, table: &str) -> OrmResult<Option<TableSchema>>;
}

/// A database driver: a factory for [`QueryRunner`] sessions.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Returns the dialect family this driver speaks.
    fn kind(&self) -> DatabaseKind;

    /// Establishes the driver's underlying connection or pool.
    async fn connect(&self) -> OrmResult<()>;

    /// Tears down the driver's underlying connection or pool. Any open
    /// transaction on an outstanding runner is rolled back.
    async fn disconnect(&self) -> OrmResult<()>;

    /// Creates a new query runner bound to one database session.
    fn create_query_runner(&self) -> Box<dyn QueryRunner>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_typed_access() {
        let row = Row::new(
            vec!["id".to_string(), "name".to_string()],
            vec![Value::Int(1), Value::String("Alice".to_string())],
        );
        assert_eq!(row.get::<i64>("id").unwrap(), 1);
        assert_eq!(row.get::<String>("name").unwrap(), "Alice");
        assert!(row.get::<String>("missing").is_err());
        assert_eq!(row.get_value("id"), Some(&Value::Int(1)));
        assert_eq!(row.len(), 2);
        assert!(!row.is_empty());
    }

    #[test]
    fn row_optional_access() {
        let row = Row::new(vec!["bio".to_string()], vec![Value::Null]);
        let bio: Option<String> = row.get("bio").unwrap();
        assert_eq!(bio, None);
    }

    #[test]
    fn database_kind_strings() {
        assert_eq!(DatabaseKind::Postgres.as_str(), "postgres");
        assert_eq!(DatabaseKind::Sqlite.as_str(), "sqlite");
        assert_eq!(DatabaseKind::MySql.as_str(), "mysql");
    }

    #[test]
    fn table_schema_column_lookup() {
        let schema = TableSchema {
            name: "post".into(),
            columns: vec![TableColumnSchema {
                name: "id".into(),
                type_name: "integer".into(),
                nullable: false,
                default: None,
                primary: true,
            }],
            indices: vec![],
            foreign_keys: vec![],
        };
        assert!(schema.column("id").is_some());
        assert!(schema.column("nope").is_none());
    }
}
