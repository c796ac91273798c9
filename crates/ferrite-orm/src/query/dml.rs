//! INSERT/UPDATE/DELETE statement compilation.
//!
//! Shared by the query builder's DML modes and the persistence executor.
//! Column names arriving here are already database names; values are
//! already transformed for the write path. Parameters are always bound
//! positionally through the dialect's placeholder syntax, never
//! concatenated into the statement text.

use crate::dialect::Dialect;
use crate::value::Value;

/// Compiles an INSERT statement.
pub fn insert(
    dialect: &dyn Dialect,
    table: &str,
    values: &[(String, Value)],
) -> (String, Vec<Value>) {
    let mut params = Vec::with_capacity(values.len());
    let columns: Vec<String> = values.iter().map(|(name, _)| dialect.quote(name)).collect();
    let placeholders: Vec<String> = values
        .iter()
        .map(|(_, value)| {
            params.push(value.clone());
            dialect.placeholder(params.len())
        })
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.quote(table),
        columns.join(", "),
        placeholders.join(", ")
    );
    (sql, params)
}

/// Compiles an UPDATE statement keyed by `keys` equality.
pub fn update(
    dialect: &dyn Dialect,
    table: &str,
    set: &[(String, Value)],
    keys: &[(String, Value)],
) -> (String, Vec<Value>) {
    let mut params = Vec::with_capacity(set.len() + keys.len());
    let assignments: Vec<String> = set
        .iter()
        .map(|(name, value)| {
            params.push(value.clone());
            format!("{} = {}", dialect.quote(name), dialect.placeholder(params.len()))
        })
        .collect();
    let conditions = key_conditions(dialect, keys, &mut params);
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.quote(table),
        assignments.join(", "),
        conditions
    );
    (sql, params)
}

/// Compiles a DELETE statement keyed by `keys` equality.
pub fn delete(
    dialect: &dyn Dialect,
    table: &str,
    keys: &[(String, Value)],
) -> (String, Vec<Value>) {
    let mut params = Vec::with_capacity(keys.len());
    let conditions = key_conditions(dialect, keys, &mut params);
    let sql = format!("DELETE FROM {} WHERE {}", dialect.quote(table), conditions);
    (sql, params)
}

/// Compiles a SELECT of `columns` keyed by `keys` equality; used to load
/// an entity's database snapshot by primary key.
pub fn select_by_keys(
    dialect: &dyn Dialect,
    table: &str,
    columns: &[String],
    keys: &[(String, Value)],
) -> (String, Vec<Value>) {
    let mut params = Vec::with_capacity(keys.len());
    let cols: Vec<String> = columns.iter().map(|c| dialect.quote(c)).collect();
    let conditions = key_conditions(dialect, keys, &mut params);
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        cols.join(", "),
        dialect.quote(table),
        conditions
    );
    (sql, params)
}

/// Renders `key = $n AND ...`, pushing parameter values.
fn key_conditions(
    dialect: &dyn Dialect,
    keys: &[(String, Value)],
    params: &mut Vec<Value>,
) -> String {
    keys.iter()
        .map(|(name, value)| {
            params.push(value.clone());
            format!("{} = {}", dialect.quote(name), dialect.placeholder(params.len()))
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};

    #[test]
    fn insert_postgres() {
        let (sql, params) = insert(
            &PostgresDialect,
            "post",
            &[
                ("title".to_string(), Value::from("Hello")),
                ("views".to_string(), Value::from(0_i64)),
            ],
        );
        assert_eq!(
            sql,
            "INSERT INTO \"post\" (\"title\", \"views\") VALUES ($1, $2)"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn insert_sqlite_placeholders() {
        let (sql, _) = insert(
            &SqliteDialect,
            "post",
            &[("title".to_string(), Value::from("x"))],
        );
        assert_eq!(sql, "INSERT INTO \"post\" (\"title\") VALUES (?)");
    }

    #[test]
    fn update_numbers_keys_after_set() {
        let (sql, params) = update(
            &PostgresDialect,
            "post",
            &[("title".to_string(), Value::from("New"))],
            &[("id".to_string(), Value::from(7_i64))],
        );
        assert_eq!(
            sql,
            "UPDATE \"post\" SET \"title\" = $1 WHERE \"id\" = $2"
        );
        assert_eq!(params, vec![Value::from("New"), Value::from(7_i64)]);
    }

    #[test]
    fn delete_composite_keys() {
        let (sql, params) = delete(
            &PostgresDialect,
            "post_categories_category",
            &[
                ("post_id".to_string(), Value::from(1_i64)),
                ("category_id".to_string(), Value::from(2_i64)),
            ],
        );
        assert_eq!(
            sql,
            "DELETE FROM \"post_categories_category\" WHERE \"post_id\" = $1 AND \"category_id\" = $2"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn select_by_keys_lists_columns() {
        let (sql, _) = select_by_keys(
            &SqliteDialect,
            "post",
            &["id".to_string(), "title".to_string()],
            &[("id".to_string(), Value::from(1_i64))],
        );
        assert_eq!(
            sql,
            "SELECT \"id\", \"title\" FROM \"post\" WHERE \"id\" = ?"
        );
    }
}
