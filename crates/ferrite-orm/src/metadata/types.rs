//! Shared metadata type vocabulary.
//!
//! These enums and small structs are used by both the declarative argument
//! records ([`args`](crate::metadata::args)) and the built metadata model
//! ([`model`](crate::metadata::model)).

use crate::value::Value;

/// The SQL type of a column, resolved at build time.
///
/// Dialect-specific spelling (e.g. `SERIAL` vs `INTEGER PRIMARY KEY
/// AUTOINCREMENT`) is left to the dialect capability; this enum is the
/// dialect-independent classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ColumnType {
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    BigInt,
    /// 64-bit floating-point number.
    Double,
    /// Fixed-precision decimal.
    Decimal,
    /// Bounded variable-length string.
    Varchar,
    /// Unbounded text.
    Text,
    /// Boolean.
    Boolean,
    /// Date without time.
    Date,
    /// Time without date.
    Time,
    /// Date and time.
    DateTime,
    /// UUID.
    Uuid,
    /// Raw binary data.
    Blob,
    /// JSON document.
    Json,
}

/// The declared in-memory kind of a property, used to infer a
/// [`ColumnType`] when none is given explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Integral number.
    Int,
    /// Floating-point number.
    Float,
    /// Boolean.
    Bool,
    /// String.
    String,
    /// Date/time.
    Date,
    /// Binary buffer.
    Bytes,
    /// UUID.
    Uuid,
    /// JSON document.
    Json,
}

impl PropertyKind {
    /// The inferred column type for this property kind.
    pub const fn inferred_column_type(self) -> ColumnType {
        match self {
            Self::Int => ColumnType::Integer,
            Self::Float => ColumnType::Double,
            Self::Bool => ColumnType::Boolean,
            Self::String => ColumnType::Varchar,
            Self::Date => ColumnType::DateTime,
            Self::Bytes => ColumnType::Blob,
            Self::Uuid => ColumnType::Uuid,
            Self::Json => ColumnType::Json,
        }
    }
}

/// How a column's value is generated at insert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedKind {
    /// Database auto-increment; at most one per table.
    Increment,
    /// A UUID generated by the ORM at insert time when the property is
    /// unset.
    Uuid,
}

/// The kind of a relation between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// One row on each side; the owning side holds the join column.
    OneToOne,
    /// Many source rows point at one target row; always owning.
    ManyToOne,
    /// Inverse of many-to-one; never owning.
    OneToMany,
    /// Junction-table relation; exactly one side owns the table.
    ManyToMany,
}

impl RelationKind {
    /// Returns `true` for kinds whose value on an entity is a collection.
    pub const fn is_to_many(self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }
}

/// Which persistence operations cascade across a relation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeOptions {
    /// Cascade inserts of new related entities.
    pub insert: bool,
    /// Cascade updates of changed related entities.
    pub update: bool,
    /// Cascade removal of related entities.
    pub remove: bool,
}

impl CascadeOptions {
    /// Cascades nothing.
    pub const NONE: Self = Self {
        insert: false,
        update: false,
        remove: false,
    };

    /// Cascades inserts and updates (the common "save" cascade).
    pub const SAVE: Self = Self {
        insert: true,
        update: true,
        remove: false,
    };

    /// Cascades everything.
    pub const ALL: Self = Self {
        insert: true,
        update: true,
        remove: true,
    };
}

/// The inheritance pattern an entity participates in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InheritancePattern {
    /// No inheritance.
    #[default]
    None,
    /// All subtypes share the root's table, distinguished by a
    /// discriminator column.
    SingleTable,
    /// Tree entity with an auxiliary ancestor/descendant closure table.
    ClosureTable,
    /// Tree entity with a materialized path column.
    MaterializedPath,
}

/// Bidirectional mapping between a column's in-memory and persisted
/// representations, applied on every read and write of a configured
/// column.
pub trait ValueTransformer: Send + Sync {
    /// Maps a database value to its domain representation (read path).
    fn from_db(&self, value: Value) -> Value;

    /// Maps a domain value to its database representation (write path).
    fn to_db(&self, value: Value) -> Value;
}
