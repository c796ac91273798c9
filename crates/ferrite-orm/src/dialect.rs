//! The dialect capability: every piece of dialect-variant SQL text.
//!
//! The query builder, persistence executor, and schema builder contain no
//! dialect-specific string literals; they ask the [`Dialect`] object for
//! identifier quoting, parameter placeholders, LIMIT/OFFSET spelling,
//! column type names, and DDL fragments. Drivers report their
//! [`DatabaseKind`](crate::driver::DatabaseKind) and [`dialect_for`] maps
//! it to the matching implementation.

use ferrite_core::OrmResult;

use crate::driver::DatabaseKind;
use crate::metadata::model::{ColumnMetadata, EntityMetadata, IndexMetadata, MetadataCollection};
use crate::metadata::types::{ColumnType, GeneratedKind};
use crate::value::Value;

/// Dialect-variant SQL generation.
pub trait Dialect: Send + Sync {
    /// The dialect family.
    fn kind(&self) -> DatabaseKind;

    /// Quotes an identifier.
    fn quote(&self, ident: &str) -> String {
        format!("\"{ident}\"")
    }

    /// Returns the parameter placeholder for the given 1-based index.
    fn placeholder(&self, index: usize) -> String;

    /// Renders the LIMIT/OFFSET clause (with a leading space), or an empty
    /// string when neither is set.
    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(l), None) => format!(" LIMIT {l}"),
            (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
            (None, Some(o)) => format!(" OFFSET {o}"),
        }
    }

    /// Whether INSERT ... RETURNING is available.
    fn supports_returning(&self) -> bool {
        false
    }

    /// The SQL type name for a column.
    fn column_type_sql(&self, column: &ColumnMetadata) -> String;

    /// Renders a default value as a SQL literal for DDL.
    fn default_literal(&self, value: &Value) -> String {
        default_literal_common(value)
    }

    /// Renders one column definition for CREATE TABLE / ADD COLUMN.
    ///
    /// `inline_pk` is set when the table's primary key is this single
    /// column and should be declared inline (required for auto-increment
    /// on some engines).
    fn column_definition_sql(&self, column: &ColumnMetadata, inline_pk: bool) -> String {
        let mut sql = format!(
            "{} {}",
            self.quote(&column.database_name),
            self.column_type_sql(column)
        );
        if inline_pk {
            sql.push_str(" PRIMARY KEY");
        }
        if column.generated == Some(GeneratedKind::Increment) {
            if let Some(keyword) = self.auto_increment_keyword() {
                sql.push(' ');
                sql.push_str(keyword);
            }
        }
        if !column.nullable && !inline_pk {
            sql.push_str(" NOT NULL");
        }
        if column.unique && !inline_pk {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&self.default_literal(default));
        }
        sql
    }

    /// The auto-increment column keyword, if the dialect uses one.
    fn auto_increment_keyword(&self) -> Option<&'static str> {
        None
    }

    /// Renders the full CREATE TABLE statement for an entity.
    ///
    /// # Errors
    ///
    /// Fails if a foreign-key column references an entity missing from the
    /// collection.
    fn create_table_sql(
        &self,
        entity: &EntityMetadata,
        collection: &MetadataCollection,
    ) -> OrmResult<String> {
        let primary: Vec<&ColumnMetadata> = entity
            .columns
            .iter()
            .filter(|c| c.primary)
            .map(AsRef::as_ref)
            .collect();
        let inline_pk_column = if primary.len() == 1 {
            Some(primary[0].database_name.clone())
        } else {
            None
        };

        let mut parts: Vec<String> = Vec::new();
        for column in &entity.columns {
            let inline = inline_pk_column.as_deref() == Some(column.database_name.as_str());
            parts.push(self.column_definition_sql(column, inline));
        }
        if inline_pk_column.is_none() && !primary.is_empty() {
            let cols: Vec<String> = primary
                .iter()
                .map(|c| self.quote(&c.database_name))
                .collect();
            parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }
        for column in &entity.columns {
            if let Some((referenced_entity, referenced_column)) = &column.references {
                let referenced_table = collection.get(referenced_entity)?.table_name.clone();
                parts.push(format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    self.quote(&column.database_name),
                    self.quote(&referenced_table),
                    self.quote(referenced_column)
                ));
            }
        }

        Ok(format!(
            "CREATE TABLE {} ({})",
            self.quote(&entity.table_name),
            parts.join(", ")
        ))
    }

    /// Renders ALTER TABLE ... ADD COLUMN.
    fn add_column_sql(&self, table: &str, column: &ColumnMetadata) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.column_definition_sql(column, false)
        )
    }

    /// Renders ALTER TABLE ... DROP COLUMN.
    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote(table),
            self.quote(column)
        )
    }

    /// Renders the statements changing a column's type/nullability, or
    /// `None` when the dialect cannot alter columns in place.
    fn alter_column_sql(&self, table: &str, column: &ColumnMetadata) -> Option<Vec<String>>;

    /// Renders CREATE [UNIQUE] INDEX.
    fn create_index_sql(&self, table: &str, index: &IndexMetadata) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        let cols: Vec<String> = index.columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "CREATE {unique}INDEX {} ON {} ({})",
            self.quote(&index.name),
            self.quote(table),
            cols.join(", ")
        )
    }

    /// Renders DROP INDEX.
    fn drop_index_sql(&self, table: &str, index: &str) -> String {
        let _ = table;
        format!("DROP INDEX {}", self.quote(index))
    }

    /// Renders DROP TABLE.
    fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote(table))
    }
}

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn column_type_sql(&self, column: &ColumnMetadata) -> String {
        if column.generated == Some(GeneratedKind::Increment) {
            return match column.column_type {
                ColumnType::BigInt => "BIGSERIAL".to_string(),
                _ => "SERIAL".to_string(),
            };
        }
        match column.column_type {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Decimal => "NUMERIC".to_string(),
            ColumnType::Varchar => {
                format!("VARCHAR({})", column.length.unwrap_or(255))
            }
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::DateTime => "TIMESTAMP".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Blob => "BYTEA".to_string(),
            ColumnType::Json => "JSONB".to_string(),
        }
    }

    fn alter_column_sql(&self, table: &str, column: &ColumnMetadata) -> Option<Vec<String>> {
        let mut out = vec![format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
            self.quote(table),
            self.quote(&column.database_name),
            self.column_type_sql(column)
        )];
        out.push(format!(
            "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
            self.quote(table),
            self.quote(&column.database_name),
            if column.nullable { "DROP" } else { "SET" }
        ));
        Some(out)
    }
}

/// SQLite dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(l), None) => format!(" LIMIT {l}"),
            (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
            // SQLite requires a LIMIT before OFFSET; -1 means unlimited.
            (None, Some(o)) => format!(" LIMIT -1 OFFSET {o}"),
        }
    }

    fn auto_increment_keyword(&self) -> Option<&'static str> {
        Some("AUTOINCREMENT")
    }

    fn column_type_sql(&self, column: &ColumnMetadata) -> String {
        if column.generated == Some(GeneratedKind::Increment) {
            // AUTOINCREMENT requires the exact INTEGER type.
            return "INTEGER".to_string();
        }
        match column.column_type {
            ColumnType::Integer | ColumnType::BigInt => "INTEGER".to_string(),
            ColumnType::Double => "REAL".to_string(),
            ColumnType::Decimal => "NUMERIC".to_string(),
            ColumnType::Varchar => {
                format!("VARCHAR({})", column.length.unwrap_or(255))
            }
            ColumnType::Text | ColumnType::Json => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Uuid => "CHAR(36)".to_string(),
            ColumnType::Blob => "BLOB".to_string(),
        }
    }

    fn default_literal(&self, value: &Value) -> String {
        match value {
            // SQLite has no boolean literals.
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            other => default_literal_common(other),
        }
    }

    fn alter_column_sql(&self, _table: &str, _column: &ColumnMetadata) -> Option<Vec<String>> {
        // SQLite cannot alter a column in place; the table would have to
        // be rebuilt.
        None
    }
}

/// MySQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::MySql
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{ident}`")
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(l), None) => format!(" LIMIT {l}"),
            (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
            // MySQL requires a LIMIT before OFFSET; use the documented
            // "all rows" maximum.
            (None, Some(o)) => format!(" LIMIT 18446744073709551615 OFFSET {o}"),
        }
    }

    fn auto_increment_keyword(&self) -> Option<&'static str> {
        Some("AUTO_INCREMENT")
    }

    fn column_type_sql(&self, column: &ColumnMetadata) -> String {
        match column.column_type {
            ColumnType::Integer => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Decimal => "DECIMAL".to_string(),
            ColumnType::Varchar => {
                format!("VARCHAR({})", column.length.unwrap_or(255))
            }
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "TINYINT(1)".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Uuid => "CHAR(36)".to_string(),
            ColumnType::Blob => "BLOB".to_string(),
            ColumnType::Json => "JSON".to_string(),
        }
    }

    fn alter_column_sql(&self, table: &str, column: &ColumnMetadata) -> Option<Vec<String>> {
        Some(vec![format!(
            "ALTER TABLE {} MODIFY {}",
            self.quote(table),
            self.column_definition_sql(column, false)
        )])
    }

    fn drop_index_sql(&self, table: &str, index: &str) -> String {
        format!("DROP INDEX {} ON {}", self.quote(index), self.quote(table))
    }
}

/// Shared default-literal rendering.
fn default_literal_common(value: &Value) -> String {
    match value {
        Value::Null | Value::Bytes(_) => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Date(d) => format!("'{d}'"),
        Value::DateTime(dt) => format!("'{dt}'"),
        Value::Uuid(u) => format!("'{u}'"),
        Value::Json(j) => format!("'{}'", j.to_string().replace('\'', "''")),
    }
}

/// Returns the dialect implementation for a driver's database kind.
pub fn dialect_for(kind: DatabaseKind) -> &'static dyn Dialect {
    match kind {
        DatabaseKind::Postgres => &PostgresDialect,
        DatabaseKind::Sqlite => &SqliteDialect,
        DatabaseKind::MySql => &MySqlDialect,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::blog_metadata;

    #[test]
    fn placeholders() {
        assert_eq!(PostgresDialect.placeholder(1), "$1");
        assert_eq!(PostgresDialect.placeholder(3), "$3");
        assert_eq!(SqliteDialect.placeholder(3), "?");
        assert_eq!(MySqlDialect.placeholder(3), "?");
    }

    #[test]
    fn quoting() {
        assert_eq!(PostgresDialect.quote("post"), "\"post\"");
        assert_eq!(MySqlDialect.quote("post"), "`post`");
    }

    #[test]
    fn limit_offset_spelling() {
        assert_eq!(PostgresDialect.limit_offset(Some(10), Some(5)), " LIMIT 10 OFFSET 5");
        assert_eq!(PostgresDialect.limit_offset(None, Some(5)), " OFFSET 5");
        assert_eq!(SqliteDialect.limit_offset(None, Some(5)), " LIMIT -1 OFFSET 5");
        assert_eq!(PostgresDialect.limit_offset(None, None), "");
    }

    #[test]
    fn create_table_for_blog_post() {
        let meta = blog_metadata();
        let post = meta.get("Post").unwrap();
        let sql = SqliteDialect.create_table_sql(&post, &meta).unwrap();
        assert!(sql.starts_with("CREATE TABLE \"post\" ("));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"title\" VARCHAR(255) NOT NULL"));
        assert!(sql.contains("\"views\" INTEGER NOT NULL DEFAULT 0"));
        assert!(sql.contains(
            "FOREIGN KEY (\"author_id\") REFERENCES \"user\" (\"id\")"
        ));
    }

    #[test]
    fn create_table_composite_pk_for_junction() {
        let meta = blog_metadata();
        let junction = meta.get("post_categories_category").unwrap();
        let sql = PostgresDialect.create_table_sql(&junction, &meta).unwrap();
        assert!(sql.contains("PRIMARY KEY (\"post_id\", \"category_id\")"));
        assert!(sql.contains("REFERENCES \"post\" (\"id\")"));
        assert!(sql.contains("REFERENCES \"category\" (\"id\")"));
    }

    #[test]
    fn postgres_serial_for_increment() {
        let meta = blog_metadata();
        let post = meta.get("Post").unwrap();
        let sql = PostgresDialect.create_table_sql(&post, &meta).unwrap();
        assert!(sql.contains("\"id\" SERIAL PRIMARY KEY"));
    }

    #[test]
    fn mysql_alter_modifies_in_place() {
        let meta = blog_metadata();
        let post = meta.get("Post").unwrap();
        let title = post.column("title").unwrap();
        let stmts = MySqlDialect.alter_column_sql("post", &title).unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].starts_with("ALTER TABLE `post` MODIFY `title`"));
    }

    #[test]
    fn sqlite_cannot_alter_columns() {
        let meta = blog_metadata();
        let post = meta.get("Post").unwrap();
        let title = post.column("title").unwrap();
        assert!(SqliteDialect.alter_column_sql("post", &title).is_none());
    }

    #[test]
    fn index_ddl() {
        let idx = IndexMetadata {
            name: "idx_post_title".to_string(),
            columns: vec!["title".to_string()],
            unique: false,
        };
        assert_eq!(
            SqliteDialect.create_index_sql("post", &idx),
            "CREATE INDEX \"idx_post_title\" ON \"post\" (\"title\")"
        );
        assert_eq!(
            MySqlDialect.drop_index_sql("post", "idx_post_title"),
            "DROP INDEX `idx_post_title` ON `post`"
        );
    }

    #[test]
    fn default_literals() {
        assert_eq!(PostgresDialect.default_literal(&Value::Bool(true)), "TRUE");
        assert_eq!(SqliteDialect.default_literal(&Value::Bool(true)), "1");
        assert_eq!(
            PostgresDialect.default_literal(&Value::String("it's".into())),
            "'it''s'"
        );
    }
}
