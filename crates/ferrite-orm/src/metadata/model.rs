//! The built, normalized metadata model.
//!
//! One [`EntityMetadata`] exists per mapped entity (plus one per generated
//! junction table). The whole collection is built once when a connection
//! opens and is read-only afterwards, with one sanctioned exception: index
//! metadata may be replaced through [`EntityMetadata::set_indices`] to
//! support schema re-synchronization.
//!
//! Relations reference their target entity and inverse side by *name*,
//! resolved through the [`MetadataCollection`]. The inverse side is a
//! lookup pointer, never an owning reference.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use ferrite_core::{OrmError, OrmResult};

use super::types::{
    CascadeOptions, ColumnType, GeneratedKind, InheritancePattern, RelationKind, ValueTransformer,
};
use crate::value::Value;

/// Metadata for one table column.
#[derive(Clone)]
pub struct ColumnMetadata {
    /// The property name on the entity.
    pub property_name: String,
    /// The database column name (naming strategy applied, embedded prefix
    /// included).
    pub database_name: String,
    /// The resolved SQL type.
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether the column is part of the primary key.
    pub primary: bool,
    /// Whether a UNIQUE constraint applies.
    pub unique: bool,
    /// Generation strategy.
    pub generated: Option<GeneratedKind>,
    /// Default value.
    pub default: Option<Value>,
    /// Maximum length for bounded string types.
    pub length: Option<u32>,
    /// Whether the column participates in SELECT clauses.
    pub select: bool,
    /// Whether the column participates in INSERT statements.
    pub insert: bool,
    /// Whether the column participates in UPDATE statements.
    pub update: bool,
    /// The embedded prefix applied to this column, if it came from an
    /// embedded object.
    pub embedded_prefix: Option<String>,
    /// Optional bidirectional value transformer.
    pub transformer: Option<Arc<dyn ValueTransformer>>,
    /// For foreign-key columns: the referenced entity and its referenced
    /// column's database name.
    pub references: Option<(String, String)>,
}

impl ColumnMetadata {
    /// Returns `true` if this column is a foreign-key column synthesized
    /// from an owning relation.
    pub const fn is_foreign_key(&self) -> bool {
        self.references.is_some()
    }

    /// Applies the read-path transformer, if any.
    pub fn transform_from_db(&self, value: Value) -> Value {
        self.transformer
            .as_ref()
            .map_or(value.clone(), |t| t.from_db(value))
    }

    /// Applies the write-path transformer, if any.
    pub fn transform_to_db(&self, value: Value) -> Value {
        self.transformer
            .as_ref()
            .map_or(value.clone(), |t| t.to_db(value))
    }
}

impl fmt::Debug for ColumnMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnMetadata")
            .field("property_name", &self.property_name)
            .field("database_name", &self.database_name)
            .field("column_type", &self.column_type)
            .field("nullable", &self.nullable)
            .field("primary", &self.primary)
            .field("generated", &self.generated)
            .field("references", &self.references)
            .finish_non_exhaustive()
    }
}

/// The join-column spec of an owning to-one relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinColumnSpec {
    /// The foreign-key column's database name on the owning table.
    pub name: String,
    /// The referenced property on the target entity.
    pub referenced_property: String,
    /// The referenced column's database name.
    pub referenced_column: String,
}

/// The join-table spec of an owning many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTableSpec {
    /// The junction table name.
    pub name: String,
    /// The junction column pointing at the owning entity.
    pub join_column: String,
    /// The junction column pointing at the target entity.
    pub inverse_join_column: String,
    /// The owning entity's referenced column (database name).
    pub source_referenced_column: String,
    /// The target entity's referenced column (database name).
    pub target_referenced_column: String,
}

/// Metadata for one relation.
#[derive(Debug, Clone)]
pub struct RelationMetadata {
    /// The relation property name.
    pub property_name: String,
    /// The relation kind.
    pub kind: RelationKind,
    /// The entity declaring this relation.
    pub source: String,
    /// The related entity.
    pub target: String,
    /// The inverse property on the target entity, if bidirectional.
    pub inverse_property: Option<String>,
    /// Whether this side holds the join column / join table.
    pub owning: bool,
    /// Join-column spec (owning to-one sides only).
    pub join_column: Option<JoinColumnSpec>,
    /// Join-table spec (owning many-to-many sides only).
    pub join_table: Option<JoinTableSpec>,
    /// Cascade flags.
    pub cascade: CascadeOptions,
    /// Whether the relation is eagerly loaded by `find`.
    pub eager: bool,
    /// Whether the owning join column may hold NULL.
    pub nullable: bool,
}

/// Metadata for one index.
///
/// Unlike the rest of the model, indices stay mutable after build (through
/// [`EntityMetadata::set_indices`]) so schema re-synchronization can edit
/// them and sync again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    /// The index name.
    pub name: String,
    /// The indexed columns' database names, in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// Metadata for one mapped entity.
pub struct EntityMetadata {
    /// The target identifier (entity name).
    pub name: String,
    /// The table name.
    pub table_name: String,
    /// Ordered column metadata.
    pub columns: Vec<Arc<ColumnMetadata>>,
    /// Relation metadata.
    pub relations: Vec<Arc<RelationMetadata>>,
    /// Index metadata; mutable post-build.
    indices: RwLock<Vec<IndexMetadata>>,
    /// The inheritance pattern.
    pub inheritance: InheritancePattern,
    /// Discriminator column database name (single-table inheritance).
    pub discriminator_column: Option<String>,
    /// Discriminator value for this entity (single-table inheritance).
    pub discriminator_value: Option<String>,
    /// Root entity name for single-table-inheritance children.
    pub parent: Option<String>,
    /// Whether this metadata describes a generated junction table.
    pub is_junction: bool,
}

impl EntityMetadata {
    /// Creates entity metadata. Used by the builder; not public API.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        table_name: String,
        columns: Vec<Arc<ColumnMetadata>>,
        relations: Vec<Arc<RelationMetadata>>,
        indices: Vec<IndexMetadata>,
        inheritance: InheritancePattern,
        discriminator_column: Option<String>,
        discriminator_value: Option<String>,
        parent: Option<String>,
        is_junction: bool,
    ) -> Self {
        Self {
            name,
            table_name,
            columns,
            relations,
            indices: RwLock::new(indices),
            inheritance,
            discriminator_column,
            discriminator_value,
            parent,
            is_junction,
        }
    }

    /// Returns the primary columns, in declaration order.
    pub fn primary_columns(&self) -> Vec<Arc<ColumnMetadata>> {
        self.columns.iter().filter(|c| c.primary).cloned().collect()
    }

    /// Returns the single primary column of a simple-keyed entity.
    ///
    /// # Errors
    ///
    /// Fails if the entity has no primary column.
    pub fn primary_column(&self) -> OrmResult<Arc<ColumnMetadata>> {
        self.columns
            .iter()
            .find(|c| c.primary)
            .cloned()
            .ok_or_else(|| OrmError::MissingPrimaryColumn {
                entity: self.name.clone(),
            })
    }

    /// Looks up a column by property name.
    pub fn column(&self, property: &str) -> Option<Arc<ColumnMetadata>> {
        self.columns
            .iter()
            .find(|c| c.property_name == property)
            .cloned()
    }

    /// Looks up a column by database name.
    pub fn column_by_database_name(&self, name: &str) -> Option<Arc<ColumnMetadata>> {
        self.columns
            .iter()
            .find(|c| c.database_name == name)
            .cloned()
    }

    /// Looks up a relation by property name.
    pub fn relation(&self, property: &str) -> Option<Arc<RelationMetadata>> {
        self.relations
            .iter()
            .find(|r| r.property_name == property)
            .cloned()
    }

    /// Returns the auto-increment column, if any.
    pub fn increment_column(&self) -> Option<Arc<ColumnMetadata>> {
        self.columns
            .iter()
            .find(|c| c.generated == Some(GeneratedKind::Increment))
            .cloned()
    }

    /// Returns a snapshot of the current index metadata.
    pub fn indices(&self) -> Vec<IndexMetadata> {
        self.indices.read().expect("index lock poisoned").clone()
    }

    /// Replaces the index metadata. This is the explicit metadata-mutation
    /// API used before a schema re-synchronization.
    pub fn set_indices(&self, indices: Vec<IndexMetadata>) {
        *self.indices.write().expect("index lock poisoned") = indices;
    }

    /// Appends one index. See [`set_indices`](Self::set_indices).
    pub fn add_index(&self, index: IndexMetadata) {
        self.indices
            .write()
            .expect("index lock poisoned")
            .push(index);
    }
}

impl fmt::Debug for EntityMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMetadata")
            .field("name", &self.name)
            .field("table_name", &self.table_name)
            .field("columns", &self.columns.len())
            .field("relations", &self.relations.len())
            .field("inheritance", &self.inheritance)
            .field("is_junction", &self.is_junction)
            .finish_non_exhaustive()
    }
}

/// All entity metadata of one connection.
pub struct MetadataCollection {
    connection: String,
    entities: Vec<Arc<EntityMetadata>>,
    by_name: HashMap<String, usize>,
}

impl MetadataCollection {
    /// Creates a collection. Used by the builder; not public API.
    pub(crate) fn new(connection: String, entities: Vec<Arc<EntityMetadata>>) -> Self {
        let by_name = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        Self {
            connection,
            entities,
            by_name,
        }
    }

    /// Returns the connection name this collection belongs to.
    pub fn connection(&self) -> &str {
        &self.connection
    }

    /// Returns all entity metadata, junction tables included.
    pub fn entities(&self) -> &[Arc<EntityMetadata>] {
        &self.entities
    }

    /// Looks up an entity's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::EntityNotFound`] naming the entity and the
    /// connection.
    pub fn get(&self, entity: &str) -> OrmResult<Arc<EntityMetadata>> {
        self.by_name
            .get(entity)
            .map(|&i| Arc::clone(&self.entities[i]))
            .ok_or_else(|| OrmError::EntityNotFound {
                entity: entity.to_string(),
                connection: self.connection.clone(),
            })
    }

    /// Returns `true` if the entity is registered.
    pub fn contains(&self, entity: &str) -> bool {
        self.by_name.contains_key(entity)
    }

    /// Resolves the inverse relation of `relation`, if it is bidirectional.
    pub fn inverse_relation(
        &self,
        relation: &RelationMetadata,
    ) -> Option<Arc<RelationMetadata>> {
        let inverse = relation.inverse_property.as_deref()?;
        self.get(&relation.target).ok()?.relation(inverse)
    }

    /// Resolves the owning side of a relation pair: the relation itself if
    /// it owns the join column/table, otherwise its inverse.
    pub fn owning_relation(
        &self,
        relation: &Arc<RelationMetadata>,
    ) -> Option<Arc<RelationMetadata>> {
        if relation.owning {
            Some(Arc::clone(relation))
        } else {
            self.inverse_relation(relation).filter(|r| r.owning)
        }
    }
}

impl fmt::Debug for MetadataCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataCollection")
            .field("connection", &self.connection)
            .field("entities", &self.entities.len())
            .finish()
    }
}
