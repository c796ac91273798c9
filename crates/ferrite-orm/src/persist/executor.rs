//! The persistence executor: a unit of work over one entity graph.
//!
//! `save` and `remove` walk the (possibly cyclic) object graph through
//! cascade-enabled relations, classify each reached entity into a
//! [`Subject`], order the subjects so foreign-key targets execute before
//! their owners, and run the plan inside a single transaction. Statement
//! order is exactly the dependency-ordered plan; junction-table rows are
//! reconciled only after both endpoints hold primary keys; a dependency
//! cycle is broken at a nullable foreign key by inserting NULL first and
//! patching the column after every subject has resolved its key.
//!
//! Any failure rolls the whole transaction back and surfaces the original
//! error; no partial writes remain visible.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ferrite_core::{OrmError, OrmResult};

use crate::dialect::Dialect;
use crate::driver::QueryRunner;
use crate::entity::{Entity, RelationValue};
use crate::events::{Broadcaster, EntityEvent, Hook};
use crate::metadata::model::MetadataCollection;
use crate::metadata::types::{ColumnType, GeneratedKind, RelationKind};
use crate::persist::subject::{JunctionChange, Subject, SubjectOperation};
use crate::query::dml;
use crate::value::Value;

/// One foreign-key dependency between two subjects: `owner` must execute
/// after `target`.
struct FkEdge {
    owner: usize,
    target: usize,
    column_db: String,
    referenced_property: String,
    nullable: bool,
    /// Broken out of the plan: insert NULL, patch by UPDATE afterwards.
    deferred: bool,
}

/// Executes save/remove plans against a query runner.
pub struct PersistExecutor<'a> {
    collection: Arc<MetadataCollection>,
    dialect: &'static dyn Dialect,
    broadcaster: &'a Broadcaster,
}

impl<'a> PersistExecutor<'a> {
    /// Creates an executor over the given metadata and broadcaster.
    pub fn new(
        collection: Arc<MetadataCollection>,
        dialect: &'static dyn Dialect,
        broadcaster: &'a Broadcaster,
    ) -> Self {
        Self {
            collection,
            dialect,
            broadcaster,
        }
    }

    /// Persists the root entities and everything reachable through
    /// save-cascading relations, in one transaction.
    ///
    /// Generated keys and database defaults are written back onto the
    /// in-memory entities before this returns.
    pub async fn save(&self, runner: &dyn QueryRunner, roots: &[Entity]) -> OrmResult<()> {
        let (mut subjects, visited) = self.collect_subjects(roots, false)?;
        for subject in &mut subjects {
            subject.snapshot = self.load_snapshot(runner, subject).await?;
            subject.operation = if subject.has_primary_key() && subject.snapshot.is_some() {
                SubjectOperation::Update
            } else {
                SubjectOperation::Insert
            };
            subject.junction_changes = self.plan_junctions(runner, subject).await?;
        }

        let mut edges = collect_fk_edges(&subjects, &visited, false);
        let order = self.resolve_order(&subjects, &mut edges)?;

        runner.begin_transaction().await?;
        let outcome = self
            .execute_save_plan(runner, &subjects, &order, &edges)
            .await;
        self.finish(runner, outcome).await
    }

    /// Removes the root entities and everything reachable through
    /// remove-cascading relations, in one transaction. Foreign-key owners
    /// are deleted before their targets.
    pub async fn remove(&self, runner: &dyn QueryRunner, roots: &[Entity]) -> OrmResult<()> {
        let (mut subjects, visited) = self.collect_subjects(roots, true)?;
        for subject in &mut subjects {
            if !subject.has_primary_key() {
                return Err(OrmError::MissingPrimaryKeyValue(
                    subject.metadata.name.clone(),
                ));
            }
            subject.operation = SubjectOperation::Remove;
        }

        let edges = collect_fk_edges(&subjects, &visited, true);
        let mut order = topological_order(subjects.len(), &edges)
            .map_err(|cycle| self.cycle_error(&subjects, &cycle))?;
        // Deleting runs owners-before-targets: reverse of insert order.
        order.reverse();

        runner.begin_transaction().await?;
        let outcome = self.execute_remove_plan(runner, &subjects, &order).await;
        self.finish(runner, outcome).await
    }

    /// Commits on success; rolls back and surfaces the original error on
    /// failure.
    async fn finish(&self, runner: &dyn QueryRunner, outcome: OrmResult<()>) -> OrmResult<()> {
        match outcome {
            Ok(()) => runner.commit_transaction().await,
            Err(err) => {
                if let Err(rollback_err) = runner.rollback_transaction().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    // ── Subject collection ───────────────────────────────────────────

    /// Walks the graph from the roots, creating one subject per distinct
    /// entity instance. The visited set is keyed by instance identity so
    /// cyclic and diamond-shaped graphs terminate.
    fn collect_subjects(
        &self,
        roots: &[Entity],
        for_remove: bool,
    ) -> OrmResult<(Vec<Subject>, HashMap<usize, usize>)> {
        let mut subjects = Vec::new();
        let mut visited = HashMap::new();
        for root in roots {
            self.collect(root, for_remove, &mut subjects, &mut visited)?;
        }
        Ok((subjects, visited))
    }

    fn collect(
        &self,
        entity: &Entity,
        for_remove: bool,
        subjects: &mut Vec<Subject>,
        visited: &mut HashMap<usize, usize>,
    ) -> OrmResult<()> {
        if visited.contains_key(&entity.id()) {
            return Ok(());
        }
        let metadata = self.collection.get(&entity.name())?;
        visited.insert(entity.id(), subjects.len());
        subjects.push(Subject {
            metadata: Arc::clone(&metadata),
            entity: entity.clone(),
            snapshot: None,
            operation: SubjectOperation::None,
            junction_changes: Vec::new(),
        });
        for relation in &metadata.relations {
            let cascades = if for_remove {
                relation.cascade.remove
            } else {
                relation.cascade.insert || relation.cascade.update
            };
            if !cascades {
                continue;
            }
            match entity.relation(&relation.property_name) {
                Some(RelationValue::One(Some(related))) => {
                    self.collect(&related, for_remove, subjects, visited)?;
                }
                Some(RelationValue::Many(items)) => {
                    for related in items {
                        self.collect(&related, for_remove, subjects, visited)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ── Planning ─────────────────────────────────────────────────────

    /// Loads the stored row for a subject with a primary key.
    async fn load_snapshot(
        &self,
        runner: &dyn QueryRunner,
        subject: &Subject,
    ) -> OrmResult<Option<HashMap<String, Value>>> {
        if !subject.has_primary_key() {
            return Ok(None);
        }
        let keys = subject.primary_key_values();
        let columns: Vec<String> = subject
            .metadata
            .columns
            .iter()
            .filter(|c| c.select)
            .map(|c| c.database_name.clone())
            .collect();
        let (sql, params) =
            dml::select_by_keys(self.dialect, &subject.metadata.table_name, &columns, &keys);
        tracing::debug!(sql = %sql, "loading snapshot");
        let rows = runner.query(&sql, &params).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let mut snapshot = HashMap::new();
        for column in &subject.metadata.columns {
            if !column.select {
                continue;
            }
            if let Some(value) = row.get_value(&column.database_name) {
                snapshot.insert(
                    column.property_name.clone(),
                    column.transform_from_db(value.clone()),
                );
            }
        }
        Ok(Some(snapshot))
    }

    /// Computes junction-table changes for every assigned many-to-many
    /// relation of a subject: the stored pair set is loaded and diffed
    /// against the assigned collection.
    async fn plan_junctions(
        &self,
        runner: &dyn QueryRunner,
        subject: &Subject,
    ) -> OrmResult<Vec<JunctionChange>> {
        let mut changes = Vec::new();
        for relation in &subject.metadata.relations {
            if relation.kind != RelationKind::ManyToMany {
                continue;
            }
            let Some(RelationValue::Many(items)) =
                subject.entity.relation(&relation.property_name)
            else {
                continue;
            };
            let owning = self.collection.owning_relation(relation).ok_or_else(|| {
                OrmError::MissingJoinSpecification {
                    entity: relation.source.clone(),
                    property: relation.property_name.clone(),
                }
            })?;
            let jt = owning
                .join_table
                .clone()
                .ok_or_else(|| OrmError::MissingJoinSpecification {
                    entity: relation.source.clone(),
                    property: relation.property_name.clone(),
                })?;
            let (near_column, far_column, near_ref, far_ref) = if relation.owning {
                (
                    jt.join_column.clone(),
                    jt.inverse_join_column.clone(),
                    jt.source_referenced_column.clone(),
                    jt.target_referenced_column.clone(),
                )
            } else {
                (
                    jt.inverse_join_column.clone(),
                    jt.join_column.clone(),
                    jt.target_referenced_column.clone(),
                    jt.source_referenced_column.clone(),
                )
            };
            let near_property = subject
                .metadata
                .column_by_database_name(&near_ref)
                .map(|c| c.property_name.clone())
                .ok_or_else(|| OrmError::PropertyNotFound {
                    entity: subject.metadata.name.clone(),
                    property: near_ref.clone(),
                })?;
            let far_meta = self.collection.get(&relation.target)?;
            let far_property = far_meta
                .column_by_database_name(&far_ref)
                .map(|c| c.property_name.clone())
                .ok_or_else(|| OrmError::PropertyNotFound {
                    entity: relation.target.clone(),
                    property: far_ref.clone(),
                })?;

            // Stored pair set, when the subject already has a key.
            let mut current: Vec<Value> = Vec::new();
            if subject.has_primary_key() {
                if let Some(near_value) = subject.entity.get(&near_property) {
                    let sql = format!(
                        "SELECT {} FROM {} WHERE {} = {}",
                        self.dialect.quote(&far_column),
                        self.dialect.quote(&jt.name),
                        self.dialect.quote(&near_column),
                        self.dialect.placeholder(1)
                    );
                    tracing::debug!(sql = %sql, "loading junction pairs");
                    let rows = runner.query(&sql, &[near_value]).await?;
                    current = rows
                        .iter()
                        .filter_map(|r| r.get_value(&far_column).cloned())
                        .collect();
                }
            }

            let desired: Vec<(Entity, Option<Value>)> = items
                .into_iter()
                .map(|e| {
                    let key = e.get(&far_property).filter(|v| !v.is_null());
                    (e, key)
                })
                .collect();
            let inserts: Vec<Entity> = desired
                .iter()
                .filter(|(_, key)| {
                    key.as_ref().map_or(true, |k| {
                        !current.iter().any(|c| same_key(c, k))
                    })
                })
                .map(|(e, _)| e.clone())
                .collect();
            let removals: Vec<Value> = current
                .iter()
                .filter(|c| {
                    !desired
                        .iter()
                        .any(|(_, key)| key.as_ref().is_some_and(|k| same_key(c, k)))
                })
                .cloned()
                .collect();

            changes.push(JunctionChange {
                table: jt.name.clone(),
                near_column,
                far_column,
                near_property,
                far_property,
                near_is_owning: relation.owning,
                inserts,
                removals,
            });
        }
        Ok(changes)
    }

    /// Topologically orders the subjects, breaking cycles at nullable
    /// foreign keys by deferring the edge to a post-insert UPDATE.
    fn resolve_order(
        &self,
        subjects: &[Subject],
        edges: &mut [FkEdge],
    ) -> OrmResult<Vec<usize>> {
        loop {
            match topological_order(subjects.len(), edges) {
                Ok(order) => return Ok(order),
                Err(cycle) => {
                    let deferrable = edges.iter_mut().find(|e| {
                        !e.deferred
                            && e.nullable
                            && cycle.contains(&e.owner)
                            && cycle.contains(&e.target)
                    });
                    match deferrable {
                        Some(edge) => {
                            tracing::debug!(
                                column = %edge.column_db,
                                "deferring nullable foreign key to break cycle"
                            );
                            edge.deferred = true;
                        }
                        None => return Err(self.cycle_error(subjects, &cycle)),
                    }
                }
            }
        }
    }

    fn cycle_error(&self, subjects: &[Subject], cycle: &[usize]) -> OrmError {
        let names: Vec<String> = cycle
            .iter()
            .map(|&i| subjects[i].metadata.name.clone())
            .collect();
        OrmError::CircularRelations(names.join(", "))
    }

    // ── Save execution ───────────────────────────────────────────────

    async fn execute_save_plan(
        &self,
        runner: &dyn QueryRunner,
        subjects: &[Subject],
        order: &[usize],
        edges: &[FkEdge],
    ) -> OrmResult<()> {
        let mut excluded: HashMap<usize, HashSet<String>> = HashMap::new();
        for edge in edges.iter().filter(|e| e.deferred) {
            excluded
                .entry(edge.owner)
                .or_default()
                .insert(edge.column_db.clone());
        }
        let no_exclusions = HashSet::new();

        for &idx in order {
            let subject = &subjects[idx];
            let exclusions = excluded.get(&idx).unwrap_or(&no_exclusions);
            match subject.operation {
                SubjectOperation::Insert => {
                    self.execute_insert(runner, subject, exclusions).await?;
                }
                SubjectOperation::Update => {
                    self.execute_update(runner, subject).await?;
                }
                SubjectOperation::Remove | SubjectOperation::None => {}
            }
        }

        // Two-phase fallback: patch deferred foreign keys now that every
        // subject has a key.
        for edge in edges.iter().filter(|e| e.deferred) {
            let owner = &subjects[edge.owner];
            let target = &subjects[edge.target];
            let value = target
                .entity
                .get(&edge.referenced_property)
                .filter(|v| !v.is_null())
                .ok_or_else(|| {
                    OrmError::QueryFailed(format!(
                        "deferred foreign key {} has no resolved target key",
                        edge.column_db
                    ))
                })?;
            let (sql, params) = dml::update(
                self.dialect,
                &owner.metadata.table_name,
                &[(edge.column_db.clone(), value.clone())],
                &owner.primary_key_values(),
            );
            tracing::debug!(sql = %sql, "executing");
            runner.execute(&sql, &params).await?;
            owner.entity.set(edge.column_db.clone(), value);
        }

        // Junction reconciliation runs last: both endpoints of every pair
        // have resolved keys by now. Pairs are deduplicated so a graph
        // that assigns both sides of a relation writes each pair once.
        let mut seen_pairs: HashSet<(String, String, String)> = HashSet::new();
        for &idx in order {
            let subject = &subjects[idx];
            for change in &subject.junction_changes {
                self.reconcile_junction(runner, subject, change, &mut seen_pairs)
                    .await?;
            }
        }
        Ok(())
    }

    async fn execute_insert(
        &self,
        runner: &dyn QueryRunner,
        subject: &Subject,
        excluded: &HashSet<String>,
    ) -> OrmResult<()> {
        let metadata = &subject.metadata;
        let event = EntityEvent {
            entity: &subject.entity,
            metadata,
            runner,
        };
        self.broadcaster.broadcast(Hook::BeforeInsert, &event);

        // UUID keys are generated here when the caller left them unset.
        for column in &metadata.columns {
            if column.generated == Some(GeneratedKind::Uuid) {
                let unset = subject
                    .entity
                    .get(&column.property_name)
                    .map_or(true, |v| v.is_null());
                if unset {
                    let id = uuid::Uuid::new_v4();
                    let value = if column.column_type == ColumnType::Uuid {
                        Value::Uuid(id)
                    } else {
                        Value::String(id.to_string())
                    };
                    subject.entity.set(column.property_name.clone(), value);
                }
            }
        }
        if let (Some(column), Some(value)) =
            (&metadata.discriminator_column, &metadata.discriminator_value)
        {
            subject.entity.set(column.clone(), value.clone());
        }
        self.apply_relation_foreign_keys(subject, excluded)?;

        // Values are gathered after the hook so listener mutations land
        // in the persisted row.
        let mut values: Vec<(String, Value)> = Vec::new();
        for column in &metadata.columns {
            if !column.insert || column.generated == Some(GeneratedKind::Increment) {
                continue;
            }
            if excluded.contains(&column.database_name) {
                continue;
            }
            let Some(value) = subject.entity.get(&column.property_name) else {
                continue;
            };
            values.push((column.database_name.clone(), column.transform_to_db(value)));
        }

        let (sql, params) = dml::insert(self.dialect, &metadata.table_name, &values);
        tracing::debug!(sql = %sql, "executing");
        if let Some(increment) = metadata.increment_column() {
            let key = runner
                .insert_returning(&sql, &params, &increment.database_name)
                .await?;
            subject.entity.set(increment.property_name.clone(), key);
        } else {
            runner.execute(&sql, &params).await?;
        }

        self.reload_defaults(runner, subject).await?;
        self.broadcaster.broadcast(Hook::AfterInsert, &event);
        Ok(())
    }

    /// Writes database-filled default values back onto the entity for
    /// columns the insert did not provide.
    async fn reload_defaults(
        &self,
        runner: &dyn QueryRunner,
        subject: &Subject,
    ) -> OrmResult<()> {
        let missing: Vec<_> = subject
            .metadata
            .columns
            .iter()
            .filter(|c| c.default.is_some() && subject.entity.get(&c.property_name).is_none())
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let keys = subject.primary_key_values();
        if keys.is_empty() {
            return Ok(());
        }
        let columns: Vec<String> = missing.iter().map(|c| c.database_name.clone()).collect();
        let (sql, params) =
            dml::select_by_keys(self.dialect, &subject.metadata.table_name, &columns, &keys);
        let rows = runner.query(&sql, &params).await?;
        if let Some(row) = rows.first() {
            for column in &missing {
                if let Some(value) = row.get_value(&column.database_name) {
                    subject.entity.set(
                        column.property_name.clone(),
                        column.transform_from_db(value.clone()),
                    );
                }
            }
        }
        Ok(())
    }

    async fn execute_update(
        &self,
        runner: &dyn QueryRunner,
        subject: &Subject,
    ) -> OrmResult<()> {
        self.apply_relation_foreign_keys(subject, &HashSet::new())?;
        let changed = subject.changed_columns();
        if changed.is_empty() {
            // Clean row: no SQL, no hooks. Junction diffs, if any, run in
            // the junction phase.
            return Ok(());
        }
        let metadata = &subject.metadata;
        let event = EntityEvent {
            entity: &subject.entity,
            metadata,
            runner,
        };
        self.broadcaster.broadcast(Hook::BeforeUpdate, &event);

        // Re-read after the hook; a listener may have touched more
        // columns.
        let changed = subject.changed_columns();
        if !changed.is_empty() {
            let mut set: Vec<(String, Value)> = Vec::with_capacity(changed.len());
            for column in &changed {
                if let Some(value) = subject.entity.get(&column.property_name) {
                    set.push((column.database_name.clone(), column.transform_to_db(value)));
                }
            }
            let (sql, params) = dml::update(
                self.dialect,
                &metadata.table_name,
                &set,
                &subject.primary_key_values(),
            );
            tracing::debug!(sql = %sql, "executing");
            runner.execute(&sql, &params).await?;
        }
        self.broadcaster.broadcast(Hook::AfterUpdate, &event);
        Ok(())
    }

    /// Copies assigned to-one relation targets' keys into the owning
    /// foreign-key columns.
    fn apply_relation_foreign_keys(
        &self,
        subject: &Subject,
        excluded: &HashSet<String>,
    ) -> OrmResult<()> {
        for relation in &subject.metadata.relations {
            let Some(jc) = &relation.join_column else {
                continue;
            };
            if excluded.contains(&jc.name) {
                continue;
            }
            match subject.entity.relation(&relation.property_name) {
                Some(RelationValue::One(Some(related))) => {
                    let value = related
                        .get(&jc.referenced_property)
                        .filter(|v| !v.is_null())
                        .ok_or_else(|| {
                            OrmError::QueryFailed(format!(
                                "{}.{} references an unsaved {} with no key",
                                subject.metadata.name,
                                relation.property_name,
                                related.name()
                            ))
                        })?;
                    subject.entity.set(jc.name.clone(), value);
                }
                Some(RelationValue::One(None)) => {
                    subject.entity.set(jc.name.clone(), Value::Null);
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn reconcile_junction(
        &self,
        runner: &dyn QueryRunner,
        subject: &Subject,
        change: &JunctionChange,
        seen_pairs: &mut HashSet<(String, String, String)>,
    ) -> OrmResult<()> {
        let near_value = subject
            .entity
            .get(&change.near_property)
            .filter(|v| !v.is_null())
            .ok_or_else(|| {
                OrmError::QueryFailed(format!(
                    "{} has no key for junction table {}",
                    subject.metadata.name, change.table
                ))
            })?;

        // Removed pairs first, then added pairs.
        for removed in &change.removals {
            let pair = pair_key(&change.table, change.near_is_owning, &near_value, removed);
            if !seen_pairs.insert(pair) {
                continue;
            }
            let (sql, params) = dml::delete(
                self.dialect,
                &change.table,
                &[
                    (change.near_column.clone(), near_value.clone()),
                    (change.far_column.clone(), removed.clone()),
                ],
            );
            tracing::debug!(sql = %sql, "executing");
            runner.execute(&sql, &params).await?;
        }
        for related in &change.inserts {
            let far_value = related
                .get(&change.far_property)
                .filter(|v| !v.is_null())
                .ok_or_else(|| {
                    OrmError::QueryFailed(format!(
                        "{} has no key for junction table {}",
                        related.name(),
                        change.table
                    ))
                })?;
            let pair = pair_key(&change.table, change.near_is_owning, &near_value, &far_value);
            if !seen_pairs.insert(pair) {
                continue;
            }
            let (sql, params) = dml::insert(
                self.dialect,
                &change.table,
                &[
                    (change.near_column.clone(), near_value.clone()),
                    (change.far_column.clone(), far_value),
                ],
            );
            tracing::debug!(sql = %sql, "executing");
            runner.execute(&sql, &params).await?;
        }
        Ok(())
    }

    // ── Remove execution ─────────────────────────────────────────────

    async fn execute_remove_plan(
        &self,
        runner: &dyn QueryRunner,
        subjects: &[Subject],
        order: &[usize],
    ) -> OrmResult<()> {
        for &idx in order {
            let subject = &subjects[idx];
            let metadata = &subject.metadata;
            let event = EntityEvent {
                entity: &subject.entity,
                metadata,
                runner,
            };
            self.broadcaster.broadcast(Hook::BeforeRemove, &event);

            // Junction rows referencing the departing row go first.
            for relation in &metadata.relations {
                if relation.kind != RelationKind::ManyToMany {
                    continue;
                }
                let Some(owning) = self.collection.owning_relation(relation) else {
                    continue;
                };
                let Some(jt) = owning.join_table.clone() else {
                    continue;
                };
                let (near_column, near_ref) = if relation.owning {
                    (jt.join_column.clone(), jt.source_referenced_column.clone())
                } else {
                    (
                        jt.inverse_join_column.clone(),
                        jt.target_referenced_column.clone(),
                    )
                };
                let near_property = metadata
                    .column_by_database_name(&near_ref)
                    .map(|c| c.property_name.clone());
                let Some(near_value) =
                    near_property.and_then(|p| subject.entity.get(&p)).filter(|v| !v.is_null())
                else {
                    continue;
                };
                let (sql, params) = dml::delete(
                    self.dialect,
                    &jt.name,
                    &[(near_column, near_value)],
                );
                tracing::debug!(sql = %sql, "executing");
                runner.execute(&sql, &params).await?;
            }

            let (sql, params) = dml::delete(
                self.dialect,
                &metadata.table_name,
                &subject.primary_key_values(),
            );
            tracing::debug!(sql = %sql, "executing");
            runner.execute(&sql, &params).await?;
            self.broadcaster.broadcast(Hook::AfterRemove, &event);
        }
        Ok(())
    }
}

/// Collects foreign-key dependency edges between subjects.
///
/// For saves, only edges into subjects that are being inserted matter: a
/// stored target's key is already known. For removes, every edge matters
/// because deletion order must respect constraints regardless.
fn collect_fk_edges(
    subjects: &[Subject],
    visited: &HashMap<usize, usize>,
    for_remove: bool,
) -> Vec<FkEdge> {
    let mut edges = Vec::new();
    for (idx, subject) in subjects.iter().enumerate() {
        for relation in &subject.metadata.relations {
            let Some(jc) = &relation.join_column else {
                continue;
            };
            let Some(RelationValue::One(Some(related))) =
                subject.entity.relation(&relation.property_name)
            else {
                continue;
            };
            let Some(&target) = visited.get(&related.id()) else {
                continue;
            };
            if !for_remove && subjects[target].operation != SubjectOperation::Insert {
                continue;
            }
            edges.push(FkEdge {
                owner: idx,
                target,
                column_db: jc.name.clone(),
                referenced_property: jc.referenced_property.clone(),
                nullable: relation.nullable,
                deferred: false,
            });
        }
    }
    edges
}

/// Stable topological order: foreign-key targets before owners, ties
/// broken by original traversal index. Returns the unresolved node set on
/// a cycle.
fn topological_order(count: usize, edges: &[FkEdge]) -> Result<Vec<usize>, Vec<usize>> {
    let mut indegree = vec![0_usize; count];
    for edge in edges.iter().filter(|e| !e.deferred && e.owner != e.target) {
        indegree[edge.owner] += 1;
    }
    // Self-edges count too: a self-referencing insert can only proceed
    // once its edge is deferred.
    for edge in edges.iter().filter(|e| !e.deferred && e.owner == e.target) {
        indegree[edge.owner] += 1;
    }
    let mut emitted = vec![false; count];
    let mut order = Vec::with_capacity(count);
    loop {
        let Some(next) = (0..count).find(|&i| !emitted[i] && indegree[i] == 0) else {
            break;
        };
        emitted[next] = true;
        order.push(next);
        for edge in edges.iter().filter(|e| !e.deferred && e.target == next) {
            if !emitted[edge.owner] {
                indegree[edge.owner] -= 1;
            }
        }
    }
    if order.len() == count {
        Ok(order)
    } else {
        Err((0..count).filter(|&i| !emitted[i]).collect())
    }
}

/// Key comparison for junction pair membership, tolerant of driver
/// representation differences.
fn same_key(a: &Value, b: &Value) -> bool {
    a == b || a.to_string() == b.to_string()
}

/// Orientation-normalized pair identity: the same pair reached from
/// either side of the relation maps to one key.
fn pair_key(table: &str, near_is_owning: bool, near: &Value, far: &Value) -> (String, String, String) {
    if near_is_owning {
        (table.to_string(), near.to_string(), far.to_string())
    } else {
        (table.to_string(), far.to_string(), near.to_string())
    }
}
