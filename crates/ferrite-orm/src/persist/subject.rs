//! Subjects: the working units of one persistence operation.
//!
//! A [`Subject`] wraps one entity instance for the duration of a single
//! `save`/`remove` call: its metadata, its loaded database snapshot, the
//! classified operation, the column-level diff, and the junction-table
//! changes its many-to-many relations require. Subjects are created at the
//! start of the call, consumed by the plan executor, and discarded.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::Entity;
use crate::metadata::model::{ColumnMetadata, EntityMetadata};
use crate::metadata::types::ColumnType;
use crate::value::Value;

/// What the plan will do with a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectOperation {
    /// INSERT a new row.
    Insert,
    /// UPDATE an existing row.
    Update,
    /// DELETE the row.
    Remove,
    /// Nothing changed; no SQL is issued.
    None,
}

/// A pending junction-table reconciliation for one many-to-many relation
/// of one subject.
pub struct JunctionChange {
    /// The junction table name.
    pub table: String,
    /// The junction column pointing at this subject's entity.
    pub near_column: String,
    /// The junction column pointing at the related entity.
    pub far_column: String,
    /// The property on this subject's entity supplying the near value.
    pub near_property: String,
    /// The property on related entities supplying the far value.
    pub far_property: String,
    /// Whether the near column is the owning side's join column; used to
    /// normalize pair identity when both sides of a relation are saved.
    pub near_is_owning: bool,
    /// Related entities whose pairs must be inserted (primary keys may
    /// still be pending at plan time).
    pub inserts: Vec<Entity>,
    /// Far-side key values whose pairs must be deleted.
    pub removals: Vec<Value>,
}

/// One entity instance's persistence-plan unit.
pub struct Subject {
    /// The entity's metadata.
    pub metadata: Arc<EntityMetadata>,
    /// The live entity instance.
    pub entity: Entity,
    /// The row as currently stored, keyed by property name; `None` when
    /// the entity has no primary key or no row exists.
    pub snapshot: Option<HashMap<String, Value>>,
    /// The classified operation.
    pub operation: SubjectOperation,
    /// Junction reconciliations owned by this subject.
    pub junction_changes: Vec<JunctionChange>,
}

impl Subject {
    /// Returns `true` when every primary column carries a non-null value.
    pub fn has_primary_key(&self) -> bool {
        self.metadata.primary_columns().iter().all(|pk| {
            self.entity
                .get(&pk.property_name)
                .is_some_and(|v| !v.is_null())
        })
    }

    /// Returns the primary key as (database name, value) pairs.
    pub fn primary_key_values(&self) -> Vec<(String, Value)> {
        self.metadata
            .primary_columns()
            .iter()
            .filter_map(|pk| {
                self.entity
                    .get(&pk.property_name)
                    .map(|v| (pk.database_name.clone(), pk.transform_to_db(v)))
            })
            .collect()
    }

    /// Computes the changed columns against the snapshot.
    ///
    /// A column counts as changed when the entity carries a value for it
    /// and that value differs from the stored one. Properties never set on
    /// the entity are left alone (a partial entity updates only what it
    /// carries).
    pub fn changed_columns(&self) -> Vec<Arc<ColumnMetadata>> {
        let Some(snapshot) = &self.snapshot else {
            return Vec::new();
        };
        self.metadata
            .columns
            .iter()
            .filter(|column| {
                if column.primary || !column.update {
                    return false;
                }
                let Some(current) = self.entity.get(&column.property_name) else {
                    return false;
                };
                let stored = snapshot.get(&column.property_name);
                !stored.is_some_and(|stored| values_equal(column, &current, stored))
            })
            .cloned()
            .collect()
    }

    /// Returns `true` when the subject requires no SQL at all.
    pub fn is_clean(&self) -> bool {
        self.operation == SubjectOperation::None
            || (self.operation == SubjectOperation::Update
                && self.changed_columns().is_empty()
                && self
                    .junction_changes
                    .iter()
                    .all(|j| j.inserts.is_empty() && j.removals.is_empty()))
    }
}

/// Compares an in-memory value against a stored one, tolerating driver
/// representation differences (SQLite booleans arrive as integers,
/// timestamps and UUIDs as strings).
pub fn values_equal(column: &ColumnMetadata, a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (column.column_type, a, b) {
        (ColumnType::Boolean, Value::Bool(x), Value::Int(y))
        | (ColumnType::Boolean, Value::Int(y), Value::Bool(x)) => *x == (*y != 0),
        (_, Value::Null, _) | (_, _, Value::Null) => false,
        _ => a.to_string() == b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::blog_metadata;

    fn post_subject(entity: Entity, snapshot: Option<HashMap<String, Value>>) -> Subject {
        let meta = blog_metadata().get("Post").unwrap();
        Subject {
            metadata: meta,
            entity,
            snapshot,
            operation: SubjectOperation::Update,
            junction_changes: Vec::new(),
        }
    }

    #[test]
    fn primary_key_presence() {
        let with = post_subject(Entity::new("Post").with("id", 1_i64), None);
        assert!(with.has_primary_key());
        let without = post_subject(Entity::new("Post"), None);
        assert!(!without.has_primary_key());
        let null = post_subject(Entity::new("Post").with("id", Value::Null), None);
        assert!(!null.has_primary_key());
    }

    #[test]
    fn diff_detects_changed_column() {
        let mut snapshot = HashMap::new();
        snapshot.insert("title".to_string(), Value::from("Old"));
        snapshot.insert("views".to_string(), Value::from(3_i64));
        let entity = Entity::new("Post")
            .with("id", 1_i64)
            .with("title", "New")
            .with("views", 3_i64);
        let subject = post_subject(entity, Some(snapshot));
        let changed = subject.changed_columns();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].property_name, "title");
    }

    #[test]
    fn unchanged_entity_is_clean() {
        let mut snapshot = HashMap::new();
        snapshot.insert("title".to_string(), Value::from("Same"));
        let entity = Entity::new("Post").with("id", 1_i64).with("title", "Same");
        let subject = post_subject(entity, Some(snapshot));
        assert!(subject.changed_columns().is_empty());
        assert!(subject.is_clean());
    }

    #[test]
    fn unset_properties_do_not_count_as_changes() {
        let mut snapshot = HashMap::new();
        snapshot.insert("title".to_string(), Value::from("Kept"));
        snapshot.insert("views".to_string(), Value::from(9_i64));
        let entity = Entity::new("Post").with("id", 1_i64).with("views", 10_i64);
        let subject = post_subject(entity, Some(snapshot));
        let changed = subject.changed_columns();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].property_name, "views");
    }

    #[test]
    fn representation_tolerant_equality() {
        let meta = blog_metadata().get("Post").unwrap();
        let views = meta.column("views").unwrap();
        assert!(values_equal(&views, &Value::Int(3), &Value::String("3".into())));
        assert!(!values_equal(&views, &Value::Int(3), &Value::Int(4)));
        assert!(!values_equal(&views, &Value::Null, &Value::Int(0)));
    }
}
