//! Core error types for the ferrite ORM.
//!
//! Every failure the ORM can surface carries a stable, named variant and a
//! message identifying the offending entity, connection, or property. The
//! taxonomy splits into metadata/build-time errors (fatal at connect),
//! connection-state errors (caller misuse), lookup errors, query-builder
//! contract errors, and persistence errors propagated from the driver after
//! a guaranteed rollback.

use thiserror::Error;

/// The primary error type for the ferrite ORM.
#[derive(Error, Debug)]
pub enum OrmError {
    // ── Metadata / build-time errors ─────────────────────────────────

    /// A column's SQL type could not be resolved, neither explicitly nor by
    /// inference from the declared property kind.
    #[error("Column type for {entity}.{property} is not defined and cannot be guessed")]
    ColumnTypeUndefined {
        /// The entity owning the column.
        entity: String,
        /// The property whose type is unresolved.
        property: String,
    },

    /// Neither side of a one-to-one or many-to-many relation declares the
    /// join column/table, so ownership cannot be determined.
    #[error("Relation {entity}.{property} has no owning side: one side must declare a join column or join table")]
    MissingJoinSpecification {
        /// The entity declaring the relation.
        entity: String,
        /// The relation property.
        property: String,
    },

    /// Both sides of a relation declare the join annotation.
    #[error("Relation {entity}.{property} has ambiguous ownership: only one side may declare the join column or join table")]
    AmbiguousOwnership {
        /// The entity declaring the relation.
        entity: String,
        /// The relation property.
        property: String,
    },

    /// A one-to-many relation declares a join column or join table; the
    /// foreign key always lives on the many-to-one side.
    #[error("Relation {entity}.{property} is one-to-many and must not declare a join column or join table")]
    InvalidJoinPlacement {
        /// The entity declaring the relation.
        entity: String,
        /// The relation property.
        property: String,
    },

    /// A bidirectional relation names an inverse property that does not
    /// exist on the target entity.
    #[error("Relation {entity}.{property} names inverse side \"{inverse}\" which does not exist on {target}")]
    MissingInverseSide {
        /// The entity declaring the relation.
        entity: String,
        /// The relation property.
        property: String,
        /// The target entity searched for the inverse.
        target: String,
        /// The missing inverse property name.
        inverse: String,
    },

    /// A one-to-many relation has no inverse many-to-one side; the foreign
    /// key column would have nowhere to live.
    #[error("Relation {entity}.{property} is one-to-many and requires an inverse many-to-one side on the target")]
    OneToManyWithoutInverse {
        /// The entity declaring the relation.
        entity: String,
        /// The relation property.
        property: String,
    },

    /// Embedded value objects form a cycle.
    #[error("Embedded property {entity}.{property} forms a cycle")]
    CircularEmbedding {
        /// The entity that closes the cycle.
        entity: String,
        /// The embedded property.
        property: String,
    },

    /// An inheritance declaration is inconsistent (e.g. a child whose root
    /// declares no inheritance pattern).
    #[error("Invalid inheritance on entity {entity}: {reason}")]
    InvalidInheritance {
        /// The offending entity.
        entity: String,
        /// What is inconsistent.
        reason: String,
    },

    /// Two entities map to the same table within one connection.
    #[error("Table \"{table}\" is mapped by both {first} and {second}")]
    DuplicateTableName {
        /// The contested table name.
        table: String,
        /// The entity registered first.
        first: String,
        /// The entity registered second.
        second: String,
    },

    /// An entity defines no primary column.
    #[error("Entity {entity} has no primary column")]
    MissingPrimaryColumn {
        /// The offending entity.
        entity: String,
    },

    /// An entity defines more than one auto-increment column.
    #[error("Entity {entity} declares more than one increment-generated column")]
    MultipleIncrementColumns {
        /// The offending entity.
        entity: String,
    },

    /// A column, relation, or embedded declaration references an entity that
    /// was never registered.
    #[error("Entity \"{entity}\" was not found in the metadata of connection \"{connection}\"")]
    EntityNotFound {
        /// The missing entity name.
        entity: String,
        /// The connection whose metadata was searched.
        connection: String,
    },

    // ── Connection-state errors ──────────────────────────────────────

    /// An operation was attempted before `connect` (or after `disconnect`).
    #[error("Connection \"{0}\" is not established")]
    ConnectionNotEstablished(String),

    /// `connect` was called on an already-open connection.
    #[error("Connection \"{0}\" is already established")]
    AlreadyConnected(String),

    // ── Query-builder contract errors ────────────────────────────────

    /// The same alias was registered twice in one query.
    #[error("Alias \"{0}\" is already registered in this query")]
    AliasAlreadyUsed(String),

    /// A property path referenced an alias that was never registered.
    #[error("Alias \"{0}\" is not registered in this query")]
    AliasNotFound(String),

    /// A SQL fragment referenced a named parameter that was never bound.
    #[error("Parameter \"{0}\" was used in a query but never set")]
    MissingParameter(String),

    /// A property path did not resolve to a column or relation.
    #[error("Property \"{property}\" was not found on entity {entity}")]
    PropertyNotFound {
        /// The searched entity.
        entity: String,
        /// The unresolved property.
        property: String,
    },

    // ── Persistence errors ───────────────────────────────────────────

    /// The dependency graph of one save operation contains a cycle that
    /// cannot be broken at a nullable foreign key.
    #[error("Circular relations detected among inserted entities: {0}")]
    CircularRelations(String),

    /// An entity scheduled for removal carries no primary key value.
    #[error("Entity {0} cannot be removed because it has no primary key value")]
    MissingPrimaryKeyValue(String),

    /// A driver-level error. Driver errors propagate unchanged apart from
    /// this wrapping; the surrounding transaction is always rolled back
    /// before the error is surfaced.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A value read from the database could not be converted to the
    /// requested Rust type.
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    /// An I/O error from the underlying driver or file-backed database.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience alias for `Result<T, OrmError>`.
pub type OrmResult<T> = Result<T, OrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_type_undefined_names_entity_and_property() {
        let err = OrmError::ColumnTypeUndefined {
            entity: "Post".into(),
            property: "title".into(),
        };
        assert_eq!(
            err.to_string(),
            "Column type for Post.title is not defined and cannot be guessed"
        );
    }

    #[test]
    fn entity_not_found_names_connection() {
        let err = OrmError::EntityNotFound {
            entity: "Ghost".into(),
            connection: "default".into(),
        };
        assert!(err.to_string().contains("Ghost"));
        assert!(err.to_string().contains("default"));
    }

    #[test]
    fn duplicate_table_names_both_entities() {
        let err = OrmError::DuplicateTableName {
            table: "post".into(),
            first: "Post".into(),
            second: "Article".into(),
        };
        assert!(err.to_string().contains("Post"));
        assert!(err.to_string().contains("Article"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: OrmError = io.into();
        assert!(err.to_string().contains("gone"));
    }
}
