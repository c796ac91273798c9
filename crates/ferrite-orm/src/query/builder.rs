//! The fluent query builder.
//!
//! A `QueryBuilder` accumulates clauses through chained calls and compiles
//! them to dialect-correct SQL plus a positional parameter list when a
//! terminal method runs. Conditions are raw SQL fragments over `:named`
//! parameters and `alias.property` paths; parameters are always bound
//! through the driver, never concatenated into the statement, and property
//! paths are rewritten to quoted identifier pairs at compile time.
//!
//! Joined to-many collections combined with `limit`/`offset` use a
//! two-query strategy: a DISTINCT primary-key query carries the
//! pagination, then the join query is restricted to exactly those roots.
//! This keeps pagination counting root entities instead of truncating
//! multiplied join rows.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ferrite_core::{OrmError, OrmResult};

use crate::dialect::Dialect;
use crate::driver::{QueryRunner, Row};
use crate::entity::{Entity, RelationValue};
use crate::metadata::model::{EntityMetadata, MetadataCollection, RelationMetadata};
use crate::metadata::types::RelationKind;
use crate::query::dml;
use crate::value::Value;

/// SQL JOIN flavors used by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// INNER JOIN.
    Inner,
    /// LEFT JOIN.
    Left,
}

impl JoinType {
    /// Returns the SQL keyword for this join type.
    pub const fn sql_keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl Direction {
    /// Returns the SQL keyword.
    pub const fn sql_keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A node of the where-condition tree.
///
/// The tree is the only deep-cloneable part of a builder; the builder
/// itself is owned by the call chain that creates it.
#[derive(Debug, Clone)]
pub enum WhereExpr {
    /// A raw SQL fragment with `:named` parameters and `alias.property`
    /// paths.
    Raw(String),
    /// Conjunction; compiles to a bracketed AND list.
    And(Vec<WhereExpr>),
    /// Disjunction; compiles to a bracketed OR list.
    Or(Vec<WhereExpr>),
    /// Negation.
    Not(Box<WhereExpr>),
}

impl WhereExpr {
    /// A raw fragment node.
    pub fn raw(fragment: impl Into<String>) -> Self {
        Self::Raw(fragment.into())
    }

    /// A bracketed AND node.
    pub fn and(children: Vec<Self>) -> Self {
        Self::And(children)
    }

    /// A bracketed OR node.
    pub fn or(children: Vec<Self>) -> Self {
        Self::Or(children)
    }

    /// A negated node.
    pub fn negate(inner: Self) -> Self {
        Self::Not(Box::new(inner))
    }
}

/// A caller-supplied modifier applied to the relation-count subquery
/// builder before compilation.
pub type CountModifier = Arc<dyn Fn(QueryBuilder) -> QueryBuilder + Send + Sync>;

/// What the builder compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// One alias registration.
struct AliasBinding {
    alias: String,
    entity: String,
}

/// One relation join.
struct JoinAttr {
    join_type: JoinType,
    alias: String,
    parent_alias: String,
    relation: Arc<RelationMetadata>,
    select: bool,
    /// The automatically registered junction alias for many-to-many
    /// joins.
    junction_alias: Option<String>,
}

/// One relation-count decoration.
struct RelationCountAttr {
    /// `alias.property` to write the scalar onto.
    map_to: String,
    /// `alias.relation` to count.
    relation_path: String,
    /// Alias for the counted target inside the subquery.
    alias_hint: Option<String>,
    /// Optional predicate modifier.
    modifier: Option<CountModifier>,
}

/// Select compilation variants.
enum SelectMode<'a> {
    /// The full row query.
    Full {
        /// Restrict roots to these primary-key values.
        id_filter: Option<&'a [Value]>,
        /// Whether LIMIT/OFFSET belongs in this statement.
        include_limit: bool,
    },
    /// The DISTINCT root-id query used for two-query pagination.
    DistinctIds,
    /// COUNT(DISTINCT root pk).
    Count,
}

/// A fluent, dialect-delegating SQL statement builder.
pub struct QueryBuilder {
    collection: Arc<MetadataCollection>,
    dialect: &'static dyn Dialect,
    kind: QueryKind,
    root_alias: String,
    root_entity: String,
    root_table: String,
    aliases: Vec<AliasBinding>,
    joins: Vec<JoinAttr>,
    where_tree: Option<WhereExpr>,
    having_tree: Option<WhereExpr>,
    params: HashMap<String, Value>,
    order: Vec<(String, Direction)>,
    group: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    counts: Vec<RelationCountAttr>,
    insert_rows: Vec<Vec<(String, Value)>>,
    update_set: Vec<(String, Value)>,
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("kind", &self.kind)
            .field("root_entity", &self.root_entity)
            .field("root_alias", &self.root_alias)
            .finish_non_exhaustive()
    }
}

impl QueryBuilder {
    fn new(
        collection: Arc<MetadataCollection>,
        dialect: &'static dyn Dialect,
        kind: QueryKind,
        entity: &str,
        alias: &str,
    ) -> OrmResult<Self> {
        let metadata = collection.get(entity)?;
        let mut builder = Self {
            collection,
            dialect,
            kind,
            root_alias: alias.to_string(),
            root_entity: entity.to_string(),
            root_table: metadata.table_name.clone(),
            aliases: Vec::new(),
            joins: Vec::new(),
            where_tree: None,
            having_tree: None,
            params: HashMap::new(),
            order: Vec::new(),
            group: Vec::new(),
            limit: None,
            offset: None,
            counts: Vec::new(),
            insert_rows: Vec::new(),
            update_set: Vec::new(),
        };
        builder.register_alias(alias, entity)?;
        Ok(builder)
    }

    /// Starts a SELECT over `entity` aliased as `alias`.
    pub fn select(
        collection: Arc<MetadataCollection>,
        dialect: &'static dyn Dialect,
        entity: &str,
        alias: &str,
    ) -> OrmResult<Self> {
        Self::new(collection, dialect, QueryKind::Select, entity, alias)
    }

    /// Starts an INSERT into `entity`.
    pub fn insert(
        collection: Arc<MetadataCollection>,
        dialect: &'static dyn Dialect,
        entity: &str,
    ) -> OrmResult<Self> {
        Self::new(collection, dialect, QueryKind::Insert, entity, entity)
    }

    /// Starts an UPDATE of `entity`.
    pub fn update(
        collection: Arc<MetadataCollection>,
        dialect: &'static dyn Dialect,
        entity: &str,
    ) -> OrmResult<Self> {
        Self::new(collection, dialect, QueryKind::Update, entity, entity)
    }

    /// Starts a DELETE from `entity`.
    pub fn delete_from(
        collection: Arc<MetadataCollection>,
        dialect: &'static dyn Dialect,
        entity: &str,
    ) -> OrmResult<Self> {
        Self::new(collection, dialect, QueryKind::Delete, entity, entity)
    }

    fn register_alias(&mut self, alias: &str, entity: &str) -> OrmResult<()> {
        if self.aliases.iter().any(|a| a.alias == alias) {
            return Err(OrmError::AliasAlreadyUsed(alias.to_string()));
        }
        self.aliases.push(AliasBinding {
            alias: alias.to_string(),
            entity: entity.to_string(),
        });
        Ok(())
    }

    fn binding(&self, alias: &str) -> OrmResult<&AliasBinding> {
        self.aliases
            .iter()
            .find(|a| a.alias == alias)
            .ok_or_else(|| OrmError::AliasNotFound(alias.to_string()))
    }

    // ── Joins ────────────────────────────────────────────────────────

    fn join(
        mut self,
        join_type: JoinType,
        path: &str,
        alias: &str,
        select: bool,
    ) -> OrmResult<Self> {
        let (parent_alias, property) = split_path(path)?;
        let parent = self.binding(parent_alias)?;
        let parent_meta = self.collection.get(&parent.entity)?;
        let relation =
            parent_meta
                .relation(property)
                .ok_or_else(|| OrmError::PropertyNotFound {
                    entity: parent.entity.clone(),
                    property: property.to_string(),
                })?;
        let target = relation.target.clone();
        self.register_alias(alias, &target)?;
        let junction_alias = if relation.kind == RelationKind::ManyToMany {
            let junction = format!("{alias}_jt");
            if self.aliases.iter().any(|a| a.alias == junction) {
                return Err(OrmError::AliasAlreadyUsed(junction));
            }
            Some(junction)
        } else {
            None
        };
        self.joins.push(JoinAttr {
            join_type,
            alias: alias.to_string(),
            parent_alias: parent_alias.to_string(),
            relation,
            select,
            junction_alias,
        });
        Ok(self)
    }

    /// Adds a LEFT JOIN on a relation path (`"alias.property"`).
    pub fn left_join(self, path: &str, alias: &str) -> OrmResult<Self> {
        self.join(JoinType::Left, path, alias, false)
    }

    /// Adds a LEFT JOIN and hydrates the joined rows onto the relation
    /// property of the parent entity.
    pub fn left_join_and_select(self, path: &str, alias: &str) -> OrmResult<Self> {
        self.join(JoinType::Left, path, alias, true)
    }

    /// Adds an INNER JOIN on a relation path.
    pub fn inner_join(self, path: &str, alias: &str) -> OrmResult<Self> {
        self.join(JoinType::Inner, path, alias, false)
    }

    /// Adds an INNER JOIN and hydrates the joined rows.
    pub fn inner_join_and_select(self, path: &str, alias: &str) -> OrmResult<Self> {
        self.join(JoinType::Inner, path, alias, true)
    }

    // ── Conditions and parameters ────────────────────────────────────

    /// Replaces the where tree with a single raw condition.
    #[must_use]
    pub fn where_(mut self, condition: impl Into<String>) -> Self {
        self.where_tree = Some(WhereExpr::Raw(condition.into()));
        self
    }

    /// ANDs a raw condition onto the where tree.
    #[must_use]
    pub fn and_where(self, condition: impl Into<String>) -> Self {
        self.and_where_expr(WhereExpr::Raw(condition.into()))
    }

    /// ORs a raw condition onto the where tree.
    #[must_use]
    pub fn or_where(self, condition: impl Into<String>) -> Self {
        self.or_where_expr(WhereExpr::Raw(condition.into()))
    }

    /// ANDs a bracketed expression onto the where tree.
    #[must_use]
    pub fn and_where_expr(mut self, expr: WhereExpr) -> Self {
        self.where_tree = Some(match self.where_tree.take() {
            Some(existing) => WhereExpr::And(vec![existing, expr]),
            None => expr,
        });
        self
    }

    /// ORs a bracketed expression onto the where tree.
    #[must_use]
    pub fn or_where_expr(mut self, expr: WhereExpr) -> Self {
        self.where_tree = Some(match self.where_tree.take() {
            Some(existing) => WhereExpr::Or(vec![existing, expr]),
            None => expr,
        });
        self
    }

    /// Replaces the HAVING tree with a raw condition.
    #[must_use]
    pub fn having(mut self, condition: impl Into<String>) -> Self {
        self.having_tree = Some(WhereExpr::Raw(condition.into()));
        self
    }

    /// Binds a named parameter.
    #[must_use]
    pub fn set_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Binds several named parameters.
    #[must_use]
    pub fn set_parameters(mut self, params: Vec<(String, Value)>) -> Self {
        self.params.extend(params);
        self
    }

    // ── Ordering, grouping, pagination ───────────────────────────────

    /// Replaces the ordering with a single (path, direction) pair.
    #[must_use]
    pub fn order_by(mut self, path: impl Into<String>, direction: Direction) -> Self {
        self.order = vec![(path.into(), direction)];
        self
    }

    /// Appends one (path, direction) pair; call order is preserved in the
    /// compiled ORDER BY clause.
    #[must_use]
    pub fn add_order_by(mut self, path: impl Into<String>, direction: Direction) -> Self {
        self.order.push((path.into(), direction));
        self
    }

    /// Replaces the ordering with an array-form spec. Compiles to exactly
    /// the same clause as the equivalent chain of
    /// [`add_order_by`](Self::add_order_by) calls.
    #[must_use]
    pub fn order_by_spec(mut self, spec: Vec<(String, Direction)>) -> Self {
        self.order = spec;
        self
    }

    /// Appends a GROUP BY path.
    #[must_use]
    pub fn add_group_by(mut self, path: impl Into<String>) -> Self {
        self.group.push(path.into());
        self
    }

    /// Sets the root-entity LIMIT.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the root-entity OFFSET.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    // ── Relation-count decorations ───────────────────────────────────

    /// Emits a correlated COUNT subquery for `relation_path` and maps the
    /// scalar result onto `map_to` (an `alias.property` path) of each
    /// hydrated row. The mapped property is synthetic: it is not a mapped
    /// relation and never participates in persistence.
    #[must_use]
    pub fn load_relation_count_and_map(mut self, map_to: &str, relation_path: &str) -> Self {
        self.counts.push(RelationCountAttr {
            map_to: map_to.to_string(),
            relation_path: relation_path.to_string(),
            alias_hint: None,
            modifier: None,
        });
        self
    }

    /// Like [`load_relation_count_and_map`](Self::load_relation_count_and_map)
    /// with an alias hint for the counted rows and a predicate modifier
    /// applied to the subquery builder.
    #[must_use]
    pub fn load_relation_count_and_map_with(
        mut self,
        map_to: &str,
        relation_path: &str,
        alias_hint: Option<&str>,
        modifier: CountModifier,
    ) -> Self {
        self.counts.push(RelationCountAttr {
            map_to: map_to.to_string(),
            relation_path: relation_path.to_string(),
            alias_hint: alias_hint.map(ToString::to_string),
            modifier: Some(modifier),
        });
        self
    }

    // ── DML clause accumulation ──────────────────────────────────────

    /// Appends one row of property values to an INSERT.
    #[must_use]
    pub fn values(mut self, row: Vec<(&str, Value)>) -> Self {
        self.insert_rows
            .push(row.into_iter().map(|(p, v)| (p.to_string(), v)).collect());
        self
    }

    /// Adds a SET assignment to an UPDATE.
    #[must_use]
    pub fn set(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.update_set.push((property.to_string(), value.into()));
        self
    }

    // ── Compilation ──────────────────────────────────────────────────

    /// Compiles the statement to SQL and its positional parameters
    /// without executing it.
    pub fn get_sql(&self) -> OrmResult<(String, Vec<Value>)> {
        match self.kind {
            QueryKind::Select => self.compile_select(&SelectMode::Full {
                id_filter: None,
                include_limit: true,
            }),
            QueryKind::Insert => {
                let mut statements = self.compile_insert()?;
                statements.pop().ok_or_else(|| {
                    OrmError::QueryFailed("insert builder has no values".to_string())
                })
            }
            QueryKind::Update => self.compile_update(),
            QueryKind::Delete => self.compile_delete(),
        }
    }

    fn compile_select(&self, mode: &SelectMode<'_>) -> OrmResult<(String, Vec<Value>)> {
        let mut params: Vec<Value> = Vec::new();
        let q = |s: &str| self.dialect.quote(s);
        let root_meta = self.collection.get(&self.root_entity)?;

        let mut sql = String::from("SELECT ");
        match mode {
            SelectMode::Full { .. } => {
                let mut columns = self.alias_select_columns(&self.root_alias, &root_meta);
                for join in &self.joins {
                    if join.select {
                        let meta = self.collection.get(&join.relation.target)?;
                        columns.extend(self.alias_select_columns(&join.alias, &meta));
                    }
                }
                for attr in &self.counts {
                    columns.push(self.compile_count(attr, &mut params)?);
                }
                sql.push_str(&columns.join(", "));
            }
            SelectMode::DistinctIds => {
                sql.push_str("DISTINCT ");
                let mut columns: Vec<String> = root_meta
                    .primary_columns()
                    .iter()
                    .map(|c| {
                        format!(
                            "{}.{} AS {}",
                            q(&self.root_alias),
                            q(&c.database_name),
                            q(&format!("{}_{}", self.root_alias, c.database_name))
                        )
                    })
                    .collect();
                for (i, (path, _)) in self.order.iter().enumerate() {
                    let column = self.resolve_path(path, true)?;
                    columns.push(format!("{column} AS {}", q(&format!("__ord_{i}"))));
                }
                sql.push_str(&columns.join(", "));
            }
            SelectMode::Count => {
                let pk = root_meta.primary_column()?;
                sql.push_str(&format!(
                    "COUNT(DISTINCT {}.{}) AS {}",
                    q(&self.root_alias),
                    q(&pk.database_name),
                    q("cnt")
                ));
            }
        }

        sql.push_str(&format!(
            " FROM {} {}",
            q(&self.root_table),
            q(&self.root_alias)
        ));
        self.compile_joins(&mut sql)?;

        let mut where_sql = String::new();
        if let Some(tree) = &self.where_tree {
            self.compile_where_expr(tree, &mut where_sql, &mut params, true)?;
        }
        if let SelectMode::Full {
            id_filter: Some(ids),
            ..
        } = mode
        {
            let pk = root_meta.primary_column()?;
            let placeholders: Vec<String> = ids
                .iter()
                .map(|id| {
                    params.push(id.clone());
                    self.dialect.placeholder(params.len())
                })
                .collect();
            let filter = format!(
                "{}.{} IN ({})",
                q(&self.root_alias),
                q(&pk.database_name),
                placeholders.join(", ")
            );
            if where_sql.is_empty() {
                where_sql = filter;
            } else {
                where_sql = format!("({where_sql}) AND {filter}");
            }
        }
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        if !self.group.is_empty() {
            let cols: OrmResult<Vec<String>> = self
                .group
                .iter()
                .map(|p| self.resolve_path(p, true))
                .collect();
            sql.push_str(&format!(" GROUP BY {}", cols?.join(", ")));
        }
        if let Some(tree) = &self.having_tree {
            sql.push_str(" HAVING ");
            let mut having_sql = String::new();
            self.compile_where_expr(tree, &mut having_sql, &mut params, true)?;
            sql.push_str(&having_sql);
        }

        let order_applies = !matches!(mode, SelectMode::Count);
        if order_applies && !self.order.is_empty() {
            let mut parts = Vec::with_capacity(self.order.len());
            for (path, direction) in &self.order {
                parts.push(format!(
                    "{} {}",
                    self.resolve_path(path, true)?,
                    direction.sql_keyword()
                ));
            }
            sql.push_str(&format!(" ORDER BY {}", parts.join(", ")));
        }

        match mode {
            SelectMode::Full {
                include_limit: true,
                ..
            }
            | SelectMode::DistinctIds => {
                sql.push_str(&self.dialect.limit_offset(self.limit, self.offset));
            }
            _ => {}
        }

        Ok((sql, params))
    }

    /// Select-list entries for one alias: every select-participating
    /// column, aliased `{alias}_{column}` for hydration.
    fn alias_select_columns(&self, alias: &str, meta: &EntityMetadata) -> Vec<String> {
        let q = |s: &str| self.dialect.quote(s);
        meta.columns
            .iter()
            .filter(|c| c.select)
            .map(|c| {
                format!(
                    "{}.{} AS {}",
                    q(alias),
                    q(&c.database_name),
                    q(&format!("{alias}_{}", c.database_name))
                )
            })
            .collect()
    }

    fn compile_joins(&self, sql: &mut String) -> OrmResult<()> {
        let q = |s: &str| self.dialect.quote(s);
        for join in &self.joins {
            let relation = &join.relation;
            let target_meta = self.collection.get(&relation.target)?;
            let keyword = join.join_type.sql_keyword();
            match relation.kind {
                RelationKind::ManyToOne | RelationKind::OneToOne => {
                    if let Some(jc) = &relation.join_column {
                        // Foreign key on the parent side.
                        sql.push_str(&format!(
                            " {keyword} {} {} ON {}.{} = {}.{}",
                            q(&target_meta.table_name),
                            q(&join.alias),
                            q(&join.alias),
                            q(&jc.referenced_column),
                            q(&join.parent_alias),
                            q(&jc.name)
                        ));
                    } else {
                        // Inverse one-to-one: foreign key on the joined side.
                        let owning = self
                            .collection
                            .owning_relation(relation)
                            .and_then(|r| r.join_column.clone())
                            .ok_or_else(|| OrmError::MissingJoinSpecification {
                                entity: relation.source.clone(),
                                property: relation.property_name.clone(),
                            })?;
                        sql.push_str(&format!(
                            " {keyword} {} {} ON {}.{} = {}.{}",
                            q(&target_meta.table_name),
                            q(&join.alias),
                            q(&join.alias),
                            q(&owning.name),
                            q(&join.parent_alias),
                            q(&owning.referenced_column)
                        ));
                    }
                }
                RelationKind::OneToMany => {
                    let owning = self
                        .collection
                        .owning_relation(relation)
                        .and_then(|r| r.join_column.clone())
                        .ok_or_else(|| OrmError::MissingJoinSpecification {
                            entity: relation.source.clone(),
                            property: relation.property_name.clone(),
                        })?;
                    sql.push_str(&format!(
                        " {keyword} {} {} ON {}.{} = {}.{}",
                        q(&target_meta.table_name),
                        q(&join.alias),
                        q(&join.alias),
                        q(&owning.name),
                        q(&join.parent_alias),
                        q(&owning.referenced_column)
                    ));
                }
                RelationKind::ManyToMany => {
                    let owning = self.collection.owning_relation(relation).ok_or_else(|| {
                        OrmError::MissingJoinSpecification {
                            entity: relation.source.clone(),
                            property: relation.property_name.clone(),
                        }
                    })?;
                    let jt = owning.join_table.clone().ok_or_else(|| {
                        OrmError::MissingJoinSpecification {
                            entity: relation.source.clone(),
                            property: relation.property_name.clone(),
                        }
                    })?;
                    let junction = join
                        .junction_alias
                        .as_deref()
                        .unwrap_or("junction");
                    let (near, far, parent_ref, target_ref) = if relation.owning {
                        (
                            &jt.join_column,
                            &jt.inverse_join_column,
                            &jt.source_referenced_column,
                            &jt.target_referenced_column,
                        )
                    } else {
                        (
                            &jt.inverse_join_column,
                            &jt.join_column,
                            &jt.target_referenced_column,
                            &jt.source_referenced_column,
                        )
                    };
                    sql.push_str(&format!(
                        " {keyword} {} {} ON {}.{} = {}.{}",
                        q(&jt.name),
                        q(junction),
                        q(junction),
                        q(near),
                        q(&join.parent_alias),
                        q(parent_ref)
                    ));
                    sql.push_str(&format!(
                        " {keyword} {} {} ON {}.{} = {}.{}",
                        q(&target_meta.table_name),
                        q(&join.alias),
                        q(&join.alias),
                        q(target_ref),
                        q(junction),
                        q(far)
                    ));
                }
            }
        }
        Ok(())
    }

    /// Compiles one relation-count decoration into a correlated subquery
    /// select-list entry.
    fn compile_count(
        &self,
        attr: &RelationCountAttr,
        params: &mut Vec<Value>,
    ) -> OrmResult<String> {
        let q = |s: &str| self.dialect.quote(s);
        let (map_alias, map_property) = split_path(&attr.map_to)?;
        self.binding(map_alias)?;
        let (rel_alias, rel_property) = split_path(&attr.relation_path)?;
        let owner = self.binding(rel_alias)?;
        let owner_meta = self.collection.get(&owner.entity)?;
        let relation =
            owner_meta
                .relation(rel_property)
                .ok_or_else(|| OrmError::PropertyNotFound {
                    entity: owner.entity.clone(),
                    property: rel_property.to_string(),
                })?;
        let target_meta = self.collection.get(&relation.target)?;
        let sub_alias = attr
            .alias_hint
            .clone()
            .unwrap_or_else(|| format!("{rel_alias}_{rel_property}"));

        let mut sub = Self::select(
            Arc::clone(&self.collection),
            self.dialect,
            &relation.target,
            &sub_alias,
        )?;
        if let Some(modifier) = &attr.modifier {
            sub = modifier(sub);
        }

        let mut subquery = String::from("(SELECT COUNT(*) FROM ");
        match relation.kind {
            RelationKind::ManyToMany => {
                let owning = self.collection.owning_relation(&relation).ok_or_else(|| {
                    OrmError::MissingJoinSpecification {
                        entity: relation.source.clone(),
                        property: relation.property_name.clone(),
                    }
                })?;
                let jt = owning.join_table.clone().ok_or_else(|| {
                    OrmError::MissingJoinSpecification {
                        entity: relation.source.clone(),
                        property: relation.property_name.clone(),
                    }
                })?;
                let junction = format!("{sub_alias}_jt");
                let (near, far, owner_ref, target_ref) = if relation.owning {
                    (
                        &jt.join_column,
                        &jt.inverse_join_column,
                        &jt.source_referenced_column,
                        &jt.target_referenced_column,
                    )
                } else {
                    (
                        &jt.inverse_join_column,
                        &jt.join_column,
                        &jt.target_referenced_column,
                        &jt.source_referenced_column,
                    )
                };
                subquery.push_str(&format!(
                    "{} {} INNER JOIN {} {} ON {}.{} = {}.{} WHERE {}.{} = {}.{}",
                    q(&jt.name),
                    q(&junction),
                    q(&target_meta.table_name),
                    q(&sub_alias),
                    q(&sub_alias),
                    q(target_ref),
                    q(&junction),
                    q(far),
                    q(&junction),
                    q(near),
                    q(rel_alias),
                    q(owner_ref)
                ));
            }
            RelationKind::OneToMany => {
                let owning = self
                    .collection
                    .owning_relation(&relation)
                    .and_then(|r| r.join_column.clone())
                    .ok_or_else(|| OrmError::MissingJoinSpecification {
                        entity: relation.source.clone(),
                        property: relation.property_name.clone(),
                    })?;
                subquery.push_str(&format!(
                    "{} {} WHERE {}.{} = {}.{}",
                    q(&target_meta.table_name),
                    q(&sub_alias),
                    q(&sub_alias),
                    q(&owning.name),
                    q(rel_alias),
                    q(&owning.referenced_column)
                ));
            }
            RelationKind::ManyToOne | RelationKind::OneToOne => {
                if let Some(jc) = &relation.join_column {
                    subquery.push_str(&format!(
                        "{} {} WHERE {}.{} = {}.{}",
                        q(&target_meta.table_name),
                        q(&sub_alias),
                        q(&sub_alias),
                        q(&jc.referenced_column),
                        q(rel_alias),
                        q(&jc.name)
                    ));
                } else {
                    let owning = self
                        .collection
                        .owning_relation(&relation)
                        .and_then(|r| r.join_column.clone())
                        .ok_or_else(|| OrmError::MissingJoinSpecification {
                            entity: relation.source.clone(),
                            property: relation.property_name.clone(),
                        })?;
                    subquery.push_str(&format!(
                        "{} {} WHERE {}.{} = {}.{}",
                        q(&target_meta.table_name),
                        q(&sub_alias),
                        q(&sub_alias),
                        q(&owning.name),
                        q(rel_alias),
                        q(&owning.referenced_column)
                    ));
                }
            }
        }

        if let Some(tree) = &sub.where_tree {
            subquery.push_str(" AND (");
            let mut condition = String::new();
            sub.compile_where_expr(tree, &mut condition, params, true)?;
            subquery.push_str(&condition);
            subquery.push(')');
        }

        subquery.push_str(&format!(
            ") AS {}",
            q(&format!("{map_alias}_{map_property}"))
        ));
        Ok(subquery)
    }

    fn compile_where_expr(
        &self,
        expr: &WhereExpr,
        out: &mut String,
        params: &mut Vec<Value>,
        qualify: bool,
    ) -> OrmResult<()> {
        match expr {
            WhereExpr::Raw(fragment) => self.compile_fragment(fragment, out, params, qualify),
            WhereExpr::And(children) => {
                if children.is_empty() {
                    out.push_str("1=1");
                    return Ok(());
                }
                out.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" AND ");
                    }
                    self.compile_where_expr(child, out, params, qualify)?;
                }
                out.push(')');
                Ok(())
            }
            WhereExpr::Or(children) => {
                if children.is_empty() {
                    out.push_str("1=0");
                    return Ok(());
                }
                out.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" OR ");
                    }
                    self.compile_where_expr(child, out, params, qualify)?;
                }
                out.push(')');
                Ok(())
            }
            WhereExpr::Not(inner) => {
                out.push_str("NOT (");
                self.compile_where_expr(inner, out, params, qualify)?;
                out.push(')');
                Ok(())
            }
        }
    }

    /// Rewrites one raw fragment: `alias.property` paths become quoted
    /// identifier pairs, `:name` parameters become dialect placeholders
    /// with their values appended to `params`. Text inside single quotes
    /// and `::` casts pass through untouched.
    fn compile_fragment(
        &self,
        fragment: &str,
        out: &mut String,
        params: &mut Vec<Value>,
        qualify: bool,
    ) -> OrmResult<()> {
        let chars: Vec<char> = fragment.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '\'' {
                // String literal: copy verbatim, honoring '' escapes.
                out.push(c);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == '\'' {
                        if i + 1 < chars.len() && chars[i + 1] == '\'' {
                            out.push('\'');
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            } else if c == ':' {
                if i + 1 < chars.len() && chars[i + 1] == ':' {
                    out.push_str("::");
                    i += 2;
                } else if i + 1 < chars.len() && is_ident_start(chars[i + 1]) {
                    let (name, next) = read_ident(&chars, i + 1);
                    let value = self
                        .params
                        .get(&name)
                        .ok_or_else(|| OrmError::MissingParameter(name.clone()))?;
                    params.push(value.clone());
                    out.push_str(&self.dialect.placeholder(params.len()));
                    i = next;
                } else {
                    out.push(c);
                    i += 1;
                }
            } else if is_ident_start(c) {
                let (first, next) = read_ident(&chars, i);
                if next < chars.len()
                    && chars[next] == '.'
                    && next + 1 < chars.len()
                    && is_ident_start(chars[next + 1])
                {
                    let (second, after) = read_ident(&chars, next + 1);
                    if let Ok(binding) = self.binding(&first) {
                        out.push_str(&self.resolve_property(
                            &binding.alias,
                            &binding.entity,
                            &second,
                            qualify,
                        )?);
                        i = after;
                        continue;
                    }
                    out.push_str(&first);
                    out.push('.');
                    out.push_str(&second);
                    i = after;
                } else if !qualify {
                    // DML fragments use bare property names of the root
                    // entity; anything else (keywords, functions) passes
                    // through.
                    let is_call = next_non_space(&chars, next) == Some('(');
                    let root_entity = self.root_entity.clone();
                    let meta = self.collection.get(&root_entity)?;
                    if !is_call && meta.column(&first).is_some() {
                        out.push_str(&self.resolve_property(
                            &self.root_alias,
                            &root_entity,
                            &first,
                            false,
                        )?);
                    } else {
                        out.push_str(&first);
                    }
                    i = next;
                } else {
                    out.push_str(&first);
                    i = next;
                }
            } else {
                out.push(c);
                i += 1;
            }
        }
        Ok(())
    }

    /// Resolves `property` on `entity` to a quoted column reference.
    ///
    /// Falls back from property names to relation properties (their
    /// foreign-key column) to raw database names.
    fn resolve_property(
        &self,
        alias: &str,
        entity: &str,
        property: &str,
        qualify: bool,
    ) -> OrmResult<String> {
        let meta = self.collection.get(entity)?;
        let database_name = if let Some(column) = meta.column(property) {
            column.database_name.clone()
        } else if let Some(relation) = meta.relation(property) {
            relation
                .join_column
                .as_ref()
                .map(|jc| jc.name.clone())
                .ok_or_else(|| OrmError::PropertyNotFound {
                    entity: entity.to_string(),
                    property: property.to_string(),
                })?
        } else if let Some(column) = meta.column_by_database_name(property) {
            column.database_name.clone()
        } else {
            return Err(OrmError::PropertyNotFound {
                entity: entity.to_string(),
                property: property.to_string(),
            });
        };
        Ok(if qualify {
            format!(
                "{}.{}",
                self.dialect.quote(alias),
                self.dialect.quote(&database_name)
            )
        } else {
            self.dialect.quote(&database_name)
        })
    }

    /// Resolves an order/group path (`alias.property` or a bare root
    /// property) to a quoted column reference.
    fn resolve_path(&self, path: &str, qualify: bool) -> OrmResult<String> {
        if let Some((alias, property)) = path.split_once('.') {
            let binding = self.binding(alias)?;
            let entity = binding.entity.clone();
            let alias = binding.alias.clone();
            self.resolve_property(&alias, &entity, property, qualify)
        } else {
            let root_entity = self.root_entity.clone();
            let root_alias = self.root_alias.clone();
            self.resolve_property(&root_alias, &root_entity, path, qualify)
        }
    }

    fn compile_insert(&self) -> OrmResult<Vec<(String, Vec<Value>)>> {
        let meta = self.collection.get(&self.root_entity)?;
        let mut statements = Vec::with_capacity(self.insert_rows.len());
        for row in &self.insert_rows {
            let mut values = Vec::with_capacity(row.len());
            for (property, value) in row {
                let column =
                    meta.column(property)
                        .ok_or_else(|| OrmError::PropertyNotFound {
                            entity: self.root_entity.clone(),
                            property: property.clone(),
                        })?;
                values.push((
                    column.database_name.clone(),
                    column.transform_to_db(value.clone()),
                ));
            }
            statements.push(dml::insert(self.dialect, &meta.table_name, &values));
        }
        Ok(statements)
    }

    fn compile_update(&self) -> OrmResult<(String, Vec<Value>)> {
        let meta = self.collection.get(&self.root_entity)?;
        let mut params: Vec<Value> = Vec::new();
        let mut assignments = Vec::with_capacity(self.update_set.len());
        for (property, value) in &self.update_set {
            let column = meta
                .column(property)
                .ok_or_else(|| OrmError::PropertyNotFound {
                    entity: self.root_entity.clone(),
                    property: property.clone(),
                })?;
            params.push(column.transform_to_db(value.clone()));
            assignments.push(format!(
                "{} = {}",
                self.dialect.quote(&column.database_name),
                self.dialect.placeholder(params.len())
            ));
        }
        let mut sql = format!(
            "UPDATE {} SET {}",
            self.dialect.quote(&meta.table_name),
            assignments.join(", ")
        );
        if let Some(tree) = &self.where_tree {
            sql.push_str(" WHERE ");
            let mut condition = String::new();
            self.compile_where_expr(tree, &mut condition, &mut params, false)?;
            sql.push_str(&condition);
        }
        Ok((sql, params))
    }

    fn compile_delete(&self) -> OrmResult<(String, Vec<Value>)> {
        let meta = self.collection.get(&self.root_entity)?;
        let mut params: Vec<Value> = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.dialect.quote(&meta.table_name));
        if let Some(tree) = &self.where_tree {
            sql.push_str(" WHERE ");
            let mut condition = String::new();
            self.compile_where_expr(tree, &mut condition, &mut params, false)?;
            sql.push_str(&condition);
        }
        Ok((sql, params))
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Executes an INSERT/UPDATE/DELETE builder, returning the affected
    /// row count.
    pub async fn execute(&self, runner: &dyn QueryRunner) -> OrmResult<u64> {
        match self.kind {
            QueryKind::Select => Err(OrmError::QueryFailed(
                "select builders execute through get_many/get_one/get_count".to_string(),
            )),
            QueryKind::Insert => {
                let mut affected = 0;
                for (sql, params) in self.compile_insert()? {
                    tracing::debug!(sql = %sql, params = params.len(), "executing");
                    affected += runner.execute(&sql, &params).await?;
                }
                Ok(affected)
            }
            QueryKind::Update => {
                let (sql, params) = self.compile_update()?;
                tracing::debug!(sql = %sql, params = params.len(), "executing");
                runner.execute(&sql, &params).await
            }
            QueryKind::Delete => {
                let (sql, params) = self.compile_delete()?;
                tracing::debug!(sql = %sql, params = params.len(), "executing");
                runner.execute(&sql, &params).await
            }
        }
    }

    /// Executes the SELECT and hydrates entity graphs.
    pub async fn get_many(&self, runner: &dyn QueryRunner) -> OrmResult<Vec<Entity>> {
        let paginated_joins = (self.limit.is_some() || self.offset.is_some())
            && self
                .joins
                .iter()
                .any(|j| j.select && j.relation.kind.is_to_many());
        let rows = if paginated_joins {
            let (ids_sql, ids_params) = self.compile_select(&SelectMode::DistinctIds)?;
            tracing::debug!(sql = %ids_sql, params = ids_params.len(), "executing");
            let id_rows = runner.query(&ids_sql, &ids_params).await?;
            let root_meta = self.collection.get(&self.root_entity)?;
            let pk_alias = format!(
                "{}_{}",
                self.root_alias,
                root_meta.primary_column()?.database_name
            );
            let ids: Vec<Value> = id_rows
                .iter()
                .filter_map(|r| r.get_value(&pk_alias).cloned())
                .collect();
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let (sql, params) = self.compile_select(&SelectMode::Full {
                id_filter: Some(&ids),
                include_limit: false,
            })?;
            tracing::debug!(sql = %sql, params = params.len(), "executing");
            runner.query(&sql, &params).await?
        } else {
            let (sql, params) = self.compile_select(&SelectMode::Full {
                id_filter: None,
                include_limit: true,
            })?;
            tracing::debug!(sql = %sql, params = params.len(), "executing");
            runner.query(&sql, &params).await?
        };
        self.hydrate(&rows)
    }

    /// Executes the SELECT and returns the first hydrated root entity.
    pub async fn get_one(&self, runner: &dyn QueryRunner) -> OrmResult<Option<Entity>> {
        Ok(self.get_many(runner).await?.into_iter().next())
    }

    /// Executes a COUNT(DISTINCT root primary key) over the current
    /// conditions, ignoring limit/offset.
    pub async fn get_count(&self, runner: &dyn QueryRunner) -> OrmResult<u64> {
        let (sql, params) = self.compile_select(&SelectMode::Count)?;
        tracing::debug!(sql = %sql, params = params.len(), "executing");
        let rows = runner.query(&sql, &params).await?;
        rows.first()
            .map_or(Ok(0), |row| row.get::<i64>("cnt").map(|c| c.max(0) as u64))
    }

    /// Executes the SELECT and returns the raw driver rows.
    pub async fn get_raw_many(&self, runner: &dyn QueryRunner) -> OrmResult<Vec<Row>> {
        let (sql, params) = self.compile_select(&SelectMode::Full {
            id_filter: None,
            include_limit: true,
        })?;
        tracing::debug!(sql = %sql, params = params.len(), "executing");
        runner.query(&sql, &params).await
    }

    // ── Hydration ────────────────────────────────────────────────────

    /// Builds entity graphs from aliased result rows: one root entity per
    /// distinct root key, joined rows nested onto relation properties,
    /// relation-count scalars mapped onto their named properties.
    fn hydrate(&self, rows: &[Row]) -> OrmResult<Vec<Entity>> {
        let mut result: Vec<Entity> = Vec::new();
        let mut registry: HashMap<(String, String), Entity> = HashMap::new();
        let mut attached: HashSet<(usize, String, String)> = HashSet::new();

        let root_meta = self.collection.get(&self.root_entity)?;
        for row in rows {
            let Some((root, root_new, _)) =
                self.entity_from_row(row, &self.root_alias, &root_meta, &mut registry)
            else {
                continue;
            };
            if root_new {
                result.push(root.clone());
            }
            let mut row_entities: HashMap<String, Entity> = HashMap::new();
            row_entities.insert(self.root_alias.clone(), root);

            for join in &self.joins {
                if !join.select {
                    continue;
                }
                let Some(parent) = row_entities.get(&join.parent_alias).cloned() else {
                    continue;
                };
                let target_meta = self.collection.get(&join.relation.target)?;
                let property = &join.relation.property_name;
                match self.entity_from_row(row, &join.alias, &target_meta, &mut registry) {
                    Some((child, _, key)) => {
                        if join.relation.kind.is_to_many() {
                            if attached.insert((parent.id(), join.alias.clone(), key)) {
                                let mut items = match parent.relation(property) {
                                    Some(RelationValue::Many(items)) => items,
                                    _ => Vec::new(),
                                };
                                items.push(child.clone());
                                parent.set_many(property.clone(), items);
                            }
                        } else {
                            parent.set_one(property.clone(), Some(child.clone()));
                        }
                        row_entities.insert(join.alias.clone(), child);
                    }
                    None => {
                        // LEFT JOIN produced no related row: mark the
                        // relation as loaded-but-empty once.
                        if parent.relation(property).is_none() {
                            if join.relation.kind.is_to_many() {
                                parent.set_many(property.clone(), Vec::new());
                            } else {
                                parent.set_one(property.clone(), None);
                            }
                        }
                    }
                }
            }

            for attr in &self.counts {
                let (alias, property) = split_path(&attr.map_to)?;
                if let Some(entity) = row_entities.get(alias) {
                    if let Some(value) = row.get_value(&format!("{alias}_{property}")) {
                        entity.set(property, coerce_count(value));
                    }
                }
            }
        }
        Ok(result)
    }

    /// Materializes the entity for one alias out of a row, deduplicated by
    /// primary-key value. Returns the entity, whether it is new, and its
    /// key string; `None` when the aliased columns are all NULL (an
    /// unmatched LEFT JOIN).
    fn entity_from_row(
        &self,
        row: &Row,
        alias: &str,
        meta: &EntityMetadata,
        registry: &mut HashMap<(String, String), Entity>,
    ) -> Option<(Entity, bool, String)> {
        let mut key = String::new();
        let mut any_present = false;
        for pk in meta.primary_columns() {
            match row.get_value(&format!("{alias}_{}", pk.database_name)) {
                Some(value) if !value.is_null() => {
                    any_present = true;
                    key.push_str(&value.to_string());
                }
                _ => key.push('\u{0}'),
            }
            key.push('|');
        }
        if !any_present {
            return None;
        }
        let registry_key = (alias.to_string(), key.clone());
        if let Some(existing) = registry.get(&registry_key) {
            return Some((existing.clone(), false, key));
        }
        let entity = Entity::new(&meta.name);
        for column in &meta.columns {
            if !column.select {
                continue;
            }
            if let Some(value) = row.get_value(&format!("{alias}_{}", column.database_name)) {
                entity.set(
                    column.property_name.clone(),
                    column.transform_from_db(value.clone()),
                );
            }
        }
        registry.insert(registry_key, entity.clone());
        Some((entity, true, key))
    }
}

/// Splits an `alias.property` path.
fn split_path(path: &str) -> OrmResult<(&str, &str)> {
    path.split_once('.')
        .ok_or_else(|| OrmError::QueryFailed(format!("\"{path}\" is not an alias.property path")))
}

const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn read_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

fn next_non_space(chars: &[char], mut i: usize) -> Option<char> {
    while i < chars.len() && chars[i] == ' ' {
        i += 1;
    }
    chars.get(i).copied()
}

/// Count scalars arrive as whatever integer shape the driver produced.
fn coerce_count(value: &Value) -> Value {
    match value {
        Value::Int(i) => Value::Int(*i),
        Value::Float(f) => Value::Int(*f as i64),
        Value::String(s) => Value::Int(s.parse().unwrap_or(0)),
        _ => Value::Int(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::test_support::blog_metadata;

    fn collection() -> Arc<MetadataCollection> {
        Arc::new(blog_metadata())
    }

    fn post_select() -> QueryBuilder {
        QueryBuilder::select(collection(), &PostgresDialect, "Post", "post").unwrap()
    }

    #[test]
    fn simple_select_shape() {
        let (sql, params) = post_select().get_sql().unwrap();
        assert!(sql.starts_with("SELECT "));
        assert!(sql.contains("\"post\".\"id\" AS \"post_id\""));
        assert!(sql.contains("\"post\".\"title\" AS \"post_title\""));
        assert!(sql.contains(" FROM \"post\" \"post\""));
        assert!(params.is_empty());
    }

    #[test]
    fn where_with_named_parameter_postgres() {
        let qb = post_select()
            .where_("post.title = :title")
            .set_parameter("title", "Hello");
        let (sql, params) = qb.get_sql().unwrap();
        assert!(sql.contains("WHERE \"post\".\"title\" = $1"));
        assert_eq!(params, vec![Value::from("Hello")]);
    }

    #[test]
    fn where_with_named_parameter_sqlite() {
        let qb = QueryBuilder::select(collection(), &SqliteDialect, "Post", "post")
            .unwrap()
            .where_("post.title = :title")
            .set_parameter("title", "Hello");
        let (sql, _) = qb.get_sql().unwrap();
        assert!(sql.contains("WHERE \"post\".\"title\" = ?"));
        assert!(!sql.contains('$'));
    }

    #[test]
    fn and_or_brackets() {
        let qb = post_select()
            .where_("post.views > :min")
            .and_where_expr(WhereExpr::or(vec![
                WhereExpr::raw("post.title = :a"),
                WhereExpr::raw("post.title = :b"),
            ]))
            .set_parameter("min", 10_i64)
            .set_parameter("a", "x")
            .set_parameter("b", "y");
        let (sql, params) = qb.get_sql().unwrap();
        assert!(sql.contains(
            "WHERE (\"post\".\"views\" > $1 AND (\"post\".\"title\" = $2 OR \"post\".\"title\" = $3))"
        ));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn missing_parameter_fails() {
        let qb = post_select().where_("post.title = :absent");
        let err = qb.get_sql().unwrap_err();
        assert!(matches!(err, OrmError::MissingParameter(ref name) if name == "absent"));
    }

    #[test]
    fn duplicate_alias_fails() {
        let err = post_select().left_join("post.author", "post").unwrap_err();
        assert!(matches!(err, OrmError::AliasAlreadyUsed(ref alias) if alias == "post"));
    }

    #[test]
    fn unknown_relation_property_fails() {
        let err = post_select().left_join("post.nothing", "x").unwrap_err();
        assert!(matches!(err, OrmError::PropertyNotFound { .. }));
    }

    #[test]
    fn many_to_one_join() {
        let qb = post_select()
            .left_join_and_select("post.author", "author")
            .unwrap();
        let (sql, _) = qb.get_sql().unwrap();
        assert!(sql.contains(
            "LEFT JOIN \"user\" \"author\" ON \"author\".\"id\" = \"post\".\"author_id\""
        ));
        assert!(sql.contains("\"author\".\"name\" AS \"author_name\""));
    }

    #[test]
    fn many_to_many_join_goes_through_junction() {
        let qb = post_select()
            .left_join_and_select("post.categories", "cat")
            .unwrap();
        let (sql, _) = qb.get_sql().unwrap();
        assert!(sql.contains(
            "LEFT JOIN \"post_categories_category\" \"cat_jt\" ON \"cat_jt\".\"post_id\" = \"post\".\"id\""
        ));
        assert!(sql.contains(
            "LEFT JOIN \"category\" \"cat\" ON \"cat\".\"id\" = \"cat_jt\".\"category_id\""
        ));
    }

    #[test]
    fn inverse_many_to_many_join_swaps_columns() {
        let qb = QueryBuilder::select(collection(), &PostgresDialect, "Category", "c")
            .unwrap()
            .inner_join_and_select("c.posts", "p")
            .unwrap();
        let (sql, _) = qb.get_sql().unwrap();
        assert!(sql.contains(
            "INNER JOIN \"post_categories_category\" \"p_jt\" ON \"p_jt\".\"category_id\" = \"c\".\"id\""
        ));
        assert!(sql.contains(
            "INNER JOIN \"post\" \"p\" ON \"p\".\"id\" = \"p_jt\".\"post_id\""
        ));
    }

    #[test]
    fn one_to_many_join_uses_inverse_foreign_key() {
        let qb = QueryBuilder::select(collection(), &PostgresDialect, "User", "u")
            .unwrap()
            .left_join_and_select("u.posts", "p")
            .unwrap();
        let (sql, _) = qb.get_sql().unwrap();
        assert!(sql.contains(
            "LEFT JOIN \"post\" \"p\" ON \"p\".\"author_id\" = \"u\".\"id\""
        ));
    }

    #[test]
    fn order_by_forms_compile_identically() {
        let chained = post_select()
            .add_order_by("post.title", Direction::Asc)
            .add_order_by("post.id", Direction::Desc);
        let array = post_select().order_by_spec(vec![
            ("post.title".to_string(), Direction::Asc),
            ("post.id".to_string(), Direction::Desc),
        ]);
        let (a, _) = chained.get_sql().unwrap();
        let (b, _) = array.get_sql().unwrap();
        assert_eq!(a, b);
        assert!(a.contains("ORDER BY \"post\".\"title\" ASC, \"post\".\"id\" DESC"));
    }

    #[test]
    fn bare_property_order_resolves_on_root() {
        let (sql, _) = post_select()
            .order_by("title", Direction::Desc)
            .get_sql()
            .unwrap();
        assert!(sql.contains("ORDER BY \"post\".\"title\" DESC"));
    }

    #[test]
    fn limit_offset_present() {
        let (sql, _) = post_select().limit(10).offset(5).get_sql().unwrap();
        assert!(sql.ends_with(" LIMIT 10 OFFSET 5"));
    }

    #[test]
    fn relation_count_emits_correlated_subquery() {
        let qb = post_select()
            .load_relation_count_and_map("post.categoryCount", "post.categories");
        let (sql, _) = qb.get_sql().unwrap();
        assert!(sql.contains("(SELECT COUNT(*) FROM \"post_categories_category\""));
        assert!(sql.contains("AS \"post_categoryCount\""));
        assert!(sql.contains("= \"post\".\"id\""));
    }

    #[test]
    fn relation_count_modifier_contributes_conditions_and_params() {
        let modifier: CountModifier = Arc::new(|qb: QueryBuilder| {
            qb.and_where("c.name = :needle").set_parameter("needle", "rust")
        });
        let qb = post_select()
            .load_relation_count_and_map_with(
                "post.categoryCount",
                "post.categories",
                Some("c"),
                modifier,
            )
            .where_("post.views > :min")
            .set_parameter("min", 1_i64);
        let (sql, params) = qb.get_sql().unwrap();
        // Subquery params come first in the select list, so the count
        // condition takes $1 and the outer where takes $2.
        assert!(sql.contains("AND (\"c\".\"name\" = $1)"));
        assert!(sql.contains("WHERE \"post\".\"views\" > $2"));
        assert_eq!(params, vec![Value::from("rust"), Value::from(1_i64)]);
    }

    #[test]
    fn update_compiles_with_bare_properties() {
        let qb = QueryBuilder::update(collection(), &PostgresDialect, "Post")
            .unwrap()
            .set("title", "New")
            .where_("id = :id")
            .set_parameter("id", 7_i64);
        let (sql, params) = qb.get_sql().unwrap();
        assert_eq!(sql, "UPDATE \"post\" SET \"title\" = $1 WHERE \"id\" = $2");
        assert_eq!(params, vec![Value::from("New"), Value::from(7_i64)]);
    }

    #[test]
    fn delete_compiles() {
        let qb = QueryBuilder::delete_from(collection(), &PostgresDialect, "Post")
            .unwrap()
            .where_("views < :min")
            .set_parameter("min", 1_i64);
        let (sql, params) = qb.get_sql().unwrap();
        assert_eq!(sql, "DELETE FROM \"post\" WHERE \"views\" < $1");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn insert_compiles() {
        let qb = QueryBuilder::insert(collection(), &PostgresDialect, "Post")
            .unwrap()
            .values(vec![("title", Value::from("Hi")), ("views", Value::from(0_i64))]);
        let (sql, params) = qb.get_sql().unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"post\" (\"title\", \"views\") VALUES ($1, $2)"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn string_literals_pass_through_untouched() {
        let qb = post_select().where_("post.title = ':kept'");
        let (sql, params) = qb.get_sql().unwrap();
        assert!(sql.contains("\"post\".\"title\" = ':kept'"));
        assert!(params.is_empty());
    }

    #[test]
    fn double_colon_cast_is_preserved() {
        let qb = post_select()
            .where_("post.views::text = :v")
            .set_parameter("v", "3");
        let (sql, _) = qb.get_sql().unwrap();
        assert!(sql.contains("\"post\".\"views\"::text = $1"));
    }

    #[test]
    fn unknown_alias_in_path_passes_through() {
        // `length(post.title)` rewrites; `foo.bar` is not an alias and is
        // left alone for the database to judge.
        let qb = post_select().where_("foo.bar = 1");
        let (sql, _) = qb.get_sql().unwrap();
        assert!(sql.contains("foo.bar = 1"));
    }

    #[test]
    fn group_by_and_having() {
        let qb = post_select()
            .add_group_by("post.author")
            .having("COUNT(post.id) > :n")
            .set_parameter("n", 2_i64);
        let (sql, _) = qb.get_sql().unwrap();
        assert!(sql.contains("GROUP BY \"post\".\"author_id\""));
        assert!(sql.contains("HAVING COUNT(\"post\".\"id\") > $1"));
    }

    #[test]
    fn hydrates_joined_collections_and_counts() {
        let qb = post_select()
            .left_join_and_select("post.categories", "cat")
            .unwrap()
            .load_relation_count_and_map("post.categoryCount", "post.categories");
        let columns = vec![
            "post_id".to_string(),
            "post_title".to_string(),
            "cat_id".to_string(),
            "cat_name".to_string(),
            "post_categoryCount".to_string(),
        ];
        let rows = vec![
            Row::new(
                columns.clone(),
                vec![
                    Value::Int(1),
                    Value::String("Hello".into()),
                    Value::Int(10),
                    Value::String("rust".into()),
                    Value::Int(2),
                ],
            ),
            Row::new(
                columns,
                vec![
                    Value::Int(1),
                    Value::String("Hello".into()),
                    Value::Int(11),
                    Value::String("orm".into()),
                    Value::Int(2),
                ],
            ),
        ];
        let entities = qb.hydrate(&rows).unwrap();
        assert_eq!(entities.len(), 1);
        let post = &entities[0];
        assert_eq!(post.get("title"), Some(Value::String("Hello".into())));
        assert_eq!(post.get("categoryCount"), Some(Value::Int(2)));
        match post.relation("categories") {
            Some(RelationValue::Many(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].get("name"), Some(Value::String("rust".into())));
                assert_eq!(items[1].get("name"), Some(Value::String("orm".into())));
            }
            _ => panic!("expected loaded collection"),
        }
    }

    #[test]
    fn hydrates_empty_left_join_as_loaded_empty() {
        let qb = post_select()
            .left_join_and_select("post.categories", "cat")
            .unwrap();
        let rows = vec![Row::new(
            vec![
                "post_id".to_string(),
                "post_title".to_string(),
                "cat_id".to_string(),
            ],
            vec![Value::Int(1), Value::String("Solo".into()), Value::Null],
        )];
        let entities = qb.hydrate(&rows).unwrap();
        assert_eq!(entities.len(), 1);
        match entities[0].relation("categories") {
            Some(RelationValue::Many(items)) => assert!(items.is_empty()),
            _ => panic!("expected loaded-but-empty collection"),
        }
    }
}
