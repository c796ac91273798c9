//! The schema builder: metadata vs. live schema diffing and DDL.
//!
//! For every mapped table the builder reads the live shape through the
//! runner, computes the minimal DDL to reconcile it with the entity
//! metadata, and either returns the statements (`log`) or executes them
//! (`synchronize`). Tables are created in foreign-key dependency order.
//!
//! DDL is not transactional on every engine; a failing `synchronize` may
//! leave earlier statements applied. That is a documented limitation of
//! the underlying dialects, not something this builder hides.

use std::collections::HashSet;
use std::sync::Arc;

use ferrite_core::OrmResult;
use ferrite_orm::dialect::Dialect;
use ferrite_orm::driver::{QueryRunner, TableSchema};
use ferrite_orm::metadata::model::{EntityMetadata, MetadataCollection};

/// Diffs entity metadata against the live database and emits DDL.
pub struct SchemaBuilder<'a> {
    runner: &'a dyn QueryRunner,
    collection: Arc<MetadataCollection>,
    dialect: &'static dyn Dialect,
}

impl<'a> SchemaBuilder<'a> {
    /// Creates a builder over a runner, a metadata collection, and the
    /// matching dialect.
    pub fn new(
        runner: &'a dyn QueryRunner,
        collection: Arc<MetadataCollection>,
        dialect: &'static dyn Dialect,
    ) -> Self {
        Self {
            runner,
            collection,
            dialect,
        }
    }

    /// Computes the pending DDL without executing anything.
    ///
    /// An empty result means the database already matches the metadata.
    pub async fn log(&self) -> OrmResult<Vec<String>> {
        let mut statements = Vec::new();
        for entity in self.ordered_entities() {
            let live = self.runner.load_table_schema(&entity.table_name).await?;
            match live {
                None => self.create_statements(&entity, &mut statements)?,
                Some(live) => self.diff_statements(&entity, &live, &mut statements)?,
            }
        }
        Ok(statements)
    }

    /// Executes the pending DDL, returning the statements that ran.
    pub async fn synchronize(&self) -> OrmResult<Vec<String>> {
        let statements = self.log().await?;
        for sql in &statements {
            tracing::debug!(sql = %sql, "executing ddl");
            self.runner.execute(sql, &[]).await?;
        }
        Ok(statements)
    }

    /// Entities in creation order: single-table-inheritance children are
    /// skipped (they share the root's table) and tables referencing other
    /// tables come after their targets.
    fn ordered_entities(&self) -> Vec<Arc<EntityMetadata>> {
        let candidates: Vec<Arc<EntityMetadata>> = self
            .collection
            .entities()
            .iter()
            .filter(|e| e.parent.is_none())
            .cloned()
            .collect();
        let mut emitted: HashSet<String> = HashSet::new();
        let mut ordered: Vec<Arc<EntityMetadata>> = Vec::new();
        // Repeated passes settle the dependency order; anything left
        // (reference cycles) is appended as-is.
        loop {
            let mut progressed = false;
            for entity in &candidates {
                if emitted.contains(&entity.name) {
                    continue;
                }
                let ready = entity.columns.iter().all(|c| {
                    c.references.as_ref().map_or(true, |(target, _)| {
                        *target == entity.name || emitted.contains(target)
                    })
                });
                if ready {
                    emitted.insert(entity.name.clone());
                    ordered.push(Arc::clone(entity));
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        for entity in candidates {
            if !emitted.contains(&entity.name) {
                ordered.push(entity);
            }
        }
        ordered
    }

    /// CREATE TABLE plus its indices.
    fn create_statements(
        &self,
        entity: &EntityMetadata,
        statements: &mut Vec<String>,
    ) -> OrmResult<()> {
        statements.push(self.dialect.create_table_sql(entity, &self.collection)?);
        for index in entity.indices() {
            statements.push(self.dialect.create_index_sql(&entity.table_name, &index));
        }
        Ok(())
    }

    /// Column and index diffs for an existing table.
    fn diff_statements(
        &self,
        entity: &EntityMetadata,
        live: &TableSchema,
        statements: &mut Vec<String>,
    ) -> OrmResult<()> {
        // Missing and drifted columns.
        for column in &entity.columns {
            match live.column(&column.database_name) {
                None => {
                    statements.push(self.dialect.add_column_sql(&entity.table_name, column));
                }
                Some(live_column) => {
                    let type_drift = !types_match(
                        &self.dialect.column_type_sql(column),
                        &live_column.type_name,
                    );
                    let null_drift = live_column.nullable != column.nullable;
                    if type_drift || null_drift {
                        match self.dialect.alter_column_sql(&entity.table_name, column) {
                            Some(alters) => statements.extend(alters),
                            None => tracing::warn!(
                                table = %entity.table_name,
                                column = %column.database_name,
                                "column drifted but this dialect cannot alter columns in place"
                            ),
                        }
                    }
                }
            }
        }
        // Columns the metadata no longer knows.
        for live_column in &live.columns {
            let known = entity
                .columns
                .iter()
                .any(|c| c.database_name == live_column.name);
            if !known {
                statements.push(
                    self.dialect
                        .drop_column_sql(&entity.table_name, &live_column.name),
                );
            }
        }

        // Index reconciliation by name: create missing, re-create
        // changed, drop those the metadata dropped. Only indices that
        // follow this ORM's naming are ever dropped; engine-internal
        // indices stay untouched.
        let wanted = entity.indices();
        for index in &wanted {
            match live.indices.iter().find(|i| i.name == index.name) {
                None => {
                    statements.push(self.dialect.create_index_sql(&entity.table_name, index));
                }
                Some(live_index) => {
                    if live_index.columns != index.columns || live_index.unique != index.unique {
                        statements
                            .push(self.dialect.drop_index_sql(&entity.table_name, &index.name));
                        statements.push(self.dialect.create_index_sql(&entity.table_name, index));
                    }
                }
            }
        }
        for live_index in &live.indices {
            let ours = live_index.name.starts_with("idx_") || live_index.name.starts_with("uq_");
            if ours && !wanted.iter().any(|i| i.name == live_index.name) {
                statements.push(
                    self.dialect
                        .drop_index_sql(&entity.table_name, &live_index.name),
                );
            }
        }
        Ok(())
    }
}

/// Compares a generated type spelling against an introspected one.
///
/// Engines report types in their own vocabulary (`character varying` for
/// `VARCHAR`, `int` for `INTEGER`); comparison happens on normalized base
/// tokens.
fn types_match(generated: &str, live: &str) -> bool {
    normalize_type(generated) == normalize_type(live)
}

fn normalize_type(type_name: &str) -> String {
    let lower = type_name.to_lowercase();
    let base = lower.split('(').next().unwrap_or("").trim().to_string();
    match base.as_str() {
        "character varying" | "varchar" => "varchar".to_string(),
        "int" | "int4" | "integer" | "serial" => "integer".to_string(),
        "int8" | "bigint" | "bigserial" => "bigint".to_string(),
        "bool" | "boolean" | "tinyint" => "boolean".to_string(),
        "timestamp without time zone" | "timestamp" | "datetime" => "datetime".to_string(),
        "double precision" | "double" | "real" | "float8" => "double".to_string(),
        "numeric" | "decimal" => "decimal".to_string(),
        "jsonb" | "json" => "json".to_string(),
        "bytea" | "blob" => "blob".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ferrite_orm::dialect::SqliteDialect;
    use ferrite_orm::driver::{Row, TableColumnSchema, TableIndexSchema};
    use ferrite_orm::metadata::args::{
        ColumnArgs, EntityArgs, IndexArgs, JoinTableArgs, MetadataRegistry, RelationArgs,
    };
    use ferrite_orm::metadata::builder::MetadataBuilder;
    use ferrite_orm::metadata::types::{GeneratedKind, PropertyKind, RelationKind};
    use ferrite_orm::naming::DefaultNamingStrategy;
    use ferrite_orm::value::Value;

    /// A runner that serves canned table schemas and records DDL.
    struct FixtureRunner {
        tables: HashMap<String, TableSchema>,
        executed: Mutex<Vec<String>>,
    }

    impl FixtureRunner {
        fn empty() -> Self {
            Self {
                tables: HashMap::new(),
                executed: Mutex::new(Vec::new()),
            }
        }

        fn with_table(mut self, schema: TableSchema) -> Self {
            self.tables.insert(schema.name.clone(), schema);
            self
        }
    }

    #[async_trait]
    impl QueryRunner for FixtureRunner {
        async fn query(&self, _sql: &str, _params: &[Value]) -> OrmResult<Vec<Row>> {
            Ok(Vec::new())
        }
        async fn execute(&self, sql: &str, _params: &[Value]) -> OrmResult<u64> {
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(0)
        }
        async fn insert_returning(
            &self,
            _sql: &str,
            _params: &[Value],
            _pk_column: &str,
        ) -> OrmResult<Value> {
            Ok(Value::Null)
        }
        async fn begin_transaction(&self) -> OrmResult<()> {
            Ok(())
        }
        async fn commit_transaction(&self) -> OrmResult<()> {
            Ok(())
        }
        async fn rollback_transaction(&self) -> OrmResult<()> {
            Ok(())
        }
        async fn release(&self) -> OrmResult<()> {
            Ok(())
        }
        async fn load_table_schema(&self, table: &str) -> OrmResult<Option<TableSchema>> {
            Ok(self.tables.get(table).cloned())
        }
    }

    fn blog_collection() -> Arc<MetadataCollection> {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(EntityArgs::new("User"))
            .add_column(
                ColumnArgs::new("User", "id")
                    .kind(PropertyKind::Int)
                    .primary()
                    .generated(GeneratedKind::Increment),
            )
            .add_column(ColumnArgs::new("User", "name").kind(PropertyKind::String));
        reg.add_entity(EntityArgs::new("Post"))
            .add_column(
                ColumnArgs::new("Post", "id")
                    .kind(PropertyKind::Int)
                    .primary()
                    .generated(GeneratedKind::Increment),
            )
            .add_column(ColumnArgs::new("Post", "title").kind(PropertyKind::String))
            .add_relation(
                RelationArgs::new("Post", "author", RelationKind::ManyToOne, "User")
                    .inverse("posts"),
            )
            .add_relation(
                RelationArgs::new("Post", "categories", RelationKind::ManyToMany, "Category"),
            )
            .add_join_table(JoinTableArgs::new("Post", "categories"))
            .add_index(IndexArgs::new("Post", vec!["title"]));
        reg.add_relation(
            RelationArgs::new("User", "posts", RelationKind::OneToMany, "Post")
                .inverse("author"),
        );
        reg.add_entity(EntityArgs::new("Category"))
            .add_column(
                ColumnArgs::new("Category", "id")
                    .kind(PropertyKind::Int)
                    .primary()
                    .generated(GeneratedKind::Increment),
            )
            .add_column(ColumnArgs::new("Category", "name").kind(PropertyKind::String));
        Arc::new(
            MetadataBuilder::new(&reg, &DefaultNamingStrategy, "test")
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn empty_database_gets_all_tables_in_dependency_order() {
        let runner = FixtureRunner::empty();
        let builder = SchemaBuilder::new(&runner, blog_collection(), &SqliteDialect);
        let statements = builder.log().await.unwrap();

        let creates: Vec<&String> = statements
            .iter()
            .filter(|s| s.starts_with("CREATE TABLE"))
            .collect();
        assert_eq!(creates.len(), 4);
        let pos = |needle: &str| {
            statements
                .iter()
                .position(|s| s.starts_with(&format!("CREATE TABLE \"{needle}\"")))
                .unwrap()
        };
        // "post" references "user"; the junction references both.
        assert!(pos("user") < pos("post"));
        assert!(pos("post") < pos("post_categories_category"));
        assert!(pos("category") < pos("post_categories_category"));
        assert!(statements
            .iter()
            .any(|s| s.starts_with("CREATE INDEX \"idx_post_title\"")));
    }

    #[tokio::test]
    async fn in_sync_database_yields_empty_log() {
        let collection = blog_collection();
        let mut runner = FixtureRunner::empty();
        // Seed the live schema exactly as the metadata describes it.
        for entity in collection.entities() {
            let columns = entity
                .columns
                .iter()
                .map(|c| TableColumnSchema {
                    name: c.database_name.clone(),
                    type_name: SqliteDialect.column_type_sql(c).to_lowercase(),
                    nullable: c.nullable,
                    default: None,
                    primary: c.primary,
                })
                .collect();
            let indices = entity
                .indices()
                .iter()
                .map(|i| TableIndexSchema {
                    name: i.name.clone(),
                    unique: i.unique,
                    columns: i.columns.clone(),
                })
                .collect();
            runner = runner.with_table(TableSchema {
                name: entity.table_name.clone(),
                columns,
                indices,
                foreign_keys: Vec::new(),
            });
        }
        let builder = SchemaBuilder::new(&runner, collection, &SqliteDialect);
        let statements = builder.log().await.unwrap();
        assert!(statements.is_empty(), "unexpected DDL: {statements:?}");
    }

    #[tokio::test]
    async fn missing_column_is_added_and_unknown_column_dropped() {
        let collection = blog_collection();
        let runner = FixtureRunner::empty()
            .with_table(TableSchema {
                name: "user".to_string(),
                columns: vec![
                    TableColumnSchema {
                        name: "id".to_string(),
                        type_name: "integer".to_string(),
                        nullable: false,
                        default: None,
                        primary: true,
                    },
                    TableColumnSchema {
                        name: "legacy".to_string(),
                        type_name: "text".to_string(),
                        nullable: true,
                        default: None,
                        primary: false,
                    },
                ],
                indices: vec![],
                foreign_keys: vec![],
            });
        let builder = SchemaBuilder::new(&runner, collection, &SqliteDialect);
        let statements = builder.log().await.unwrap();
        assert!(statements
            .iter()
            .any(|s| s.starts_with("ALTER TABLE \"user\" ADD COLUMN \"name\"")));
        assert!(statements
            .iter()
            .any(|s| s == "ALTER TABLE \"user\" DROP COLUMN \"legacy\""));
    }

    #[tokio::test]
    async fn changed_index_is_recreated_and_stale_index_dropped() {
        let collection = blog_collection();
        let post = collection.get("Post").unwrap();
        let runner = FixtureRunner::empty().with_table(TableSchema {
            name: "post".to_string(),
            columns: post
                .columns
                .iter()
                .map(|c| TableColumnSchema {
                    name: c.database_name.clone(),
                    type_name: SqliteDialect.column_type_sql(c).to_lowercase(),
                    nullable: c.nullable,
                    default: None,
                    primary: c.primary,
                })
                .collect(),
            indices: vec![
                TableIndexSchema {
                    name: "idx_post_title".to_string(),
                    unique: true, // metadata says non-unique
                    columns: vec!["title".to_string()],
                },
                TableIndexSchema {
                    name: "idx_post_stale".to_string(),
                    unique: false,
                    columns: vec!["views".to_string()],
                },
            ],
            foreign_keys: vec![],
        });
        let builder = SchemaBuilder::new(&runner, Arc::clone(&collection), &SqliteDialect);
        let statements = builder.log().await.unwrap();
        assert!(statements
            .iter()
            .any(|s| s == "DROP INDEX \"idx_post_title\""));
        assert!(statements
            .iter()
            .any(|s| s.starts_with("CREATE INDEX \"idx_post_title\"")));
        assert!(statements
            .iter()
            .any(|s| s == "DROP INDEX \"idx_post_stale\""));
    }

    #[tokio::test]
    async fn synchronize_executes_the_logged_statements() {
        let runner = FixtureRunner::empty();
        let builder = SchemaBuilder::new(&runner, blog_collection(), &SqliteDialect);
        let statements = builder.synchronize().await.unwrap();
        assert_eq!(*runner.executed.lock().unwrap(), statements);
        assert!(!statements.is_empty());
    }

    #[test]
    fn type_normalization() {
        assert!(types_match("VARCHAR(255)", "character varying"));
        assert!(types_match("INTEGER", "int"));
        assert!(types_match("SERIAL", "integer"));
        assert!(types_match("DATETIME", "timestamp without time zone"));
        assert!(!types_match("INTEGER", "text"));
    }
}
