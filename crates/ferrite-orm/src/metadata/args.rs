//! Declarative metadata argument records and the registry that collects
//! them.
//!
//! These records are the data-driven replacement for an annotation
//! front-end: whatever collects entity descriptions (a macro, a schema
//! file, hand-written registration code) normalizes them into these
//! structs and hands a [`MetadataRegistry`] to the connection. The
//! registry is owned by the connection — there is no ambient global
//! storage.

use std::sync::Arc;

use super::types::{
    CascadeOptions, ColumnType, GeneratedKind, InheritancePattern, PropertyKind, RelationKind,
    ValueTransformer,
};
use crate::value::Value;

/// Entity-level arguments.
#[derive(Clone, Default)]
pub struct EntityArgs {
    /// The target identifier (the entity's name).
    pub name: String,
    /// Explicit table name override.
    pub table: Option<String>,
    /// Inheritance pattern declared on this entity (roots and tree
    /// entities only).
    pub inheritance: InheritancePattern,
    /// For single-table-inheritance children: the parent entity.
    pub parent: Option<String>,
    /// For single-table-inheritance members: the discriminator value
    /// (defaults to the entity name).
    pub discriminator_value: Option<String>,
    /// Embeddable value-object types produce no table of their own; their
    /// columns are flattened into each embedding owner.
    pub embeddable: bool,
}

impl EntityArgs {
    /// Creates entity args for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets an explicit table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Declares the inheritance pattern.
    #[must_use]
    pub const fn inheritance(mut self, pattern: InheritancePattern) -> Self {
        self.inheritance = pattern;
        self
    }

    /// Declares this entity as a single-table-inheritance child of
    /// `parent`.
    #[must_use]
    pub fn child_of(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Sets the discriminator value.
    #[must_use]
    pub fn discriminator_value(mut self, value: impl Into<String>) -> Self {
        self.discriminator_value = Some(value.into());
        self
    }

    /// Marks this entity as an embeddable value object.
    #[must_use]
    pub const fn embeddable(mut self) -> Self {
        self.embeddable = true;
        self
    }
}

/// Column-level arguments.
#[derive(Clone)]
pub struct ColumnArgs {
    /// The entity this column belongs to.
    pub target: String,
    /// The property name.
    pub property: String,
    /// Explicit SQL type; inferred from `kind` when absent.
    pub column_type: Option<ColumnType>,
    /// The declared in-memory kind, used for inference.
    pub kind: Option<PropertyKind>,
    /// Explicit database column name.
    pub name: Option<String>,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether this column is part of the primary key.
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
    /// Optional bidirectional value transformer.
    pub transformer: Option<Arc<dyn ValueTransformer>>,
}

impl ColumnArgs {
    /// Creates column args for `target.property`.
    pub fn new(target: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            property: property.into(),
            column_type: None,
            kind: None,
            name: None,
            nullable: false,
            primary: false,
            unique: false,
            generated: None,
            default: None,
            length: None,
            select: true,
            insert: true,
            update: true,
            transformer: None,
        }
    }

    /// Sets the explicit SQL type.
    #[must_use]
    pub const fn column_type(mut self, t: ColumnType) -> Self {
        self.column_type = Some(t);
        self
    }

    /// Sets the declared property kind (drives inference).
    #[must_use]
    pub const fn kind(mut self, k: PropertyKind) -> Self {
        self.kind = Some(k);
        self
    }

    /// Sets the explicit database column name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Allows NULL values.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Marks the column as (part of) the primary key.
    #[must_use]
    pub const fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Applies a UNIQUE constraint.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the generation strategy.
    #[must_use]
    pub const fn generated(mut self, g: GeneratedKind) -> Self {
        self.generated = Some(g);
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets the maximum length.
    #[must_use]
    pub const fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Excludes the column from SELECT clauses.
    #[must_use]
    pub const fn no_select(mut self) -> Self {
        self.select = false;
        self
    }

    /// Excludes the column from INSERT statements.
    #[must_use]
    pub const fn no_insert(mut self) -> Self {
        self.insert = false;
        self
    }

    /// Excludes the column from UPDATE statements.
    #[must_use]
    pub const fn no_update(mut self) -> Self {
        self.update = false;
        self
    }

    /// Attaches a value transformer.
    #[must_use]
    pub fn transformer(mut self, t: Arc<dyn ValueTransformer>) -> Self {
        self.transformer = Some(t);
        self
    }
}

/// Relation-level arguments.
#[derive(Clone)]
pub struct RelationArgs {
    /// The entity declaring the relation.
    pub target: String,
    /// The relation property name.
    pub property: String,
    /// The relation kind.
    pub kind: RelationKind,
    /// The related entity.
    pub related: String,
    /// The inverse property on the related entity (bidirectional
    /// relations reference each other through this).
    pub inverse: Option<String>,
    /// Cascade flags.
    pub cascade: CascadeOptions,
    /// Whether the relation is loaded eagerly by `find`.
    pub eager: bool,
    /// Whether an owning join column may hold NULL.
    pub nullable: bool,
}

impl RelationArgs {
    /// Creates relation args for `target.property` pointing at `related`.
    pub fn new(
        target: impl Into<String>,
        property: impl Into<String>,
        kind: RelationKind,
        related: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            property: property.into(),
            kind,
            related: related.into(),
            inverse: None,
            cascade: CascadeOptions::NONE,
            eager: false,
            nullable: true,
        }
    }

    /// Names the inverse property on the related entity.
    #[must_use]
    pub fn inverse(mut self, property: impl Into<String>) -> Self {
        self.inverse = Some(property.into());
        self
    }

    /// Sets cascade flags.
    #[must_use]
    pub const fn cascade(mut self, cascade: CascadeOptions) -> Self {
        self.cascade = cascade;
        self
    }

    /// Marks the relation for eager loading.
    #[must_use]
    pub const fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    /// Forbids NULL in the owning join column.
    #[must_use]
    pub const fn not_nullable(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Join-column arguments: declares the owning side of a one-to-one or
/// customizes the implicit join column of a many-to-one.
#[derive(Debug, Clone)]
pub struct JoinColumnArgs {
    /// The entity declaring the join column.
    pub target: String,
    /// The relation property the join column belongs to.
    pub property: String,
    /// Explicit column name.
    pub name: Option<String>,
    /// The referenced property on the related entity (defaults to its
    /// primary column).
    pub referenced_property: Option<String>,
}

impl JoinColumnArgs {
    /// Creates join-column args for `target.property`.
    pub fn new(target: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            property: property.into(),
            name: None,
            referenced_property: None,
        }
    }

    /// Sets the explicit column name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the referenced property.
    #[must_use]
    pub fn referenced_property(mut self, property: impl Into<String>) -> Self {
        self.referenced_property = Some(property.into());
        self
    }
}

/// Join-table arguments: declares the owning side of a many-to-many.
#[derive(Debug, Clone)]
pub struct JoinTableArgs {
    /// The entity declaring the join table.
    pub target: String,
    /// The relation property the join table belongs to.
    pub property: String,
    /// Explicit junction table name.
    pub name: Option<String>,
    /// Explicit name of the junction column pointing at the declaring
    /// entity.
    pub join_column: Option<String>,
    /// Explicit name of the junction column pointing at the related
    /// entity.
    pub inverse_join_column: Option<String>,
}

impl JoinTableArgs {
    /// Creates join-table args for `target.property`.
    pub fn new(target: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            property: property.into(),
            name: None,
            join_column: None,
            inverse_join_column: None,
        }
    }

    /// Sets the explicit junction table name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the junction column pointing at the declaring entity.
    #[must_use]
    pub fn join_column(mut self, name: impl Into<String>) -> Self {
        self.join_column = Some(name.into());
        self
    }

    /// Sets the junction column pointing at the related entity.
    #[must_use]
    pub fn inverse_join_column(mut self, name: impl Into<String>) -> Self {
        self.inverse_join_column = Some(name.into());
        self
    }
}

/// Index arguments.
#[derive(Debug, Clone)]
pub struct IndexArgs {
    /// The entity the index belongs to.
    pub target: String,
    /// Explicit index name.
    pub name: Option<String>,
    /// The indexed properties, in order.
    pub properties: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl IndexArgs {
    /// Creates index args over `properties` of `target`.
    pub fn new(target: impl Into<String>, properties: Vec<&str>) -> Self {
        Self {
            target: target.into(),
            name: None,
            properties: properties.into_iter().map(String::from).collect(),
            unique: false,
        }
    }

    /// Sets the explicit index name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Enforces uniqueness.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Embedded arguments: flattens an embeddable entity's columns into the
/// owner's table.
#[derive(Debug, Clone)]
pub struct EmbeddedArgs {
    /// The embedding owner entity.
    pub target: String,
    /// The property holding the embedded object.
    pub property: String,
    /// The embeddable entity.
    pub embedded: String,
    /// The column-name prefix: `None` derives one from the naming
    /// strategy, `Some("")` applies no prefix, any other value is used
    /// literally.
    pub prefix: Option<String>,
}

impl EmbeddedArgs {
    /// Creates embedded args for `target.property` of embeddable type
    /// `embedded`.
    pub fn new(
        target: impl Into<String>,
        property: impl Into<String>,
        embedded: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            property: property.into(),
            embedded: embedded.into(),
            prefix: None,
        }
    }

    /// Sets the explicit prefix (the empty string disables prefixing).
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Collects every declarative argument record for one connection.
///
/// Construction is additive; the [`MetadataBuilder`](super::builder::MetadataBuilder)
/// consumes the registry wholesale and validates everything at once.
#[derive(Clone, Default)]
pub struct MetadataRegistry {
    /// Entity-level records.
    pub entities: Vec<EntityArgs>,
    /// Column records.
    pub columns: Vec<ColumnArgs>,
    /// Relation records.
    pub relations: Vec<RelationArgs>,
    /// Join-column records.
    pub join_columns: Vec<JoinColumnArgs>,
    /// Join-table records.
    pub join_tables: Vec<JoinTableArgs>,
    /// Index records.
    pub indices: Vec<IndexArgs>,
    /// Embedded records.
    pub embeddeds: Vec<EmbeddedArgs>,
}

impl MetadataRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity.
    pub fn add_entity(&mut self, args: EntityArgs) -> &mut Self {
        self.entities.push(args);
        self
    }

    /// Registers a column.
    pub fn add_column(&mut self, args: ColumnArgs) -> &mut Self {
        self.columns.push(args);
        self
    }

    /// Registers a relation.
    pub fn add_relation(&mut self, args: RelationArgs) -> &mut Self {
        self.relations.push(args);
        self
    }

    /// Registers a join column.
    pub fn add_join_column(&mut self, args: JoinColumnArgs) -> &mut Self {
        self.join_columns.push(args);
        self
    }

    /// Registers a join table.
    pub fn add_join_table(&mut self, args: JoinTableArgs) -> &mut Self {
        self.join_tables.push(args);
        self
    }

    /// Registers an index.
    pub fn add_index(&mut self, args: IndexArgs) -> &mut Self {
        self.indices.push(args);
        self
    }

    /// Registers an embedded property.
    pub fn add_embedded(&mut self, args: EmbeddedArgs) -> &mut Self {
        self.embeddeds.push(args);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_collects_records() {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(EntityArgs::new("Post"))
            .add_column(ColumnArgs::new("Post", "id").primary())
            .add_relation(RelationArgs::new(
                "Post",
                "author",
                RelationKind::ManyToOne,
                "User",
            ))
            .add_index(IndexArgs::new("Post", vec!["title"]).unique());
        assert_eq!(reg.entities.len(), 1);
        assert_eq!(reg.columns.len(), 1);
        assert_eq!(reg.relations.len(), 1);
        assert!(reg.indices[0].unique);
    }

    #[test]
    fn column_args_builder_defaults() {
        let c = ColumnArgs::new("Post", "title");
        assert!(c.select && c.insert && c.update);
        assert!(!c.primary);
        assert!(c.column_type.is_none());
        let c = c.no_update().nullable();
        assert!(!c.update);
        assert!(c.nullable);
    }

    #[test]
    fn embedded_prefix_spellings() {
        let unset = EmbeddedArgs::new("User", "address", "Address");
        assert_eq!(unset.prefix, None);
        let empty = EmbeddedArgs::new("User", "address", "Address").prefix("");
        assert_eq!(empty.prefix.as_deref(), Some(""));
        let explicit = EmbeddedArgs::new("User", "address", "Address").prefix("addr_");
        assert_eq!(explicit.prefix.as_deref(), Some("addr_"));
    }
}
