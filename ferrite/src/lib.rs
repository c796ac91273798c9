//! # ferrite
//!
//! A metadata-driven ORM for Rust. This umbrella crate re-exports the
//! ferrite workspace behind feature flags:
//!
//! - [`core`] — error taxonomy and logging setup
//! - [`orm`] — entity metadata, query builder, persistence executor,
//!   broadcaster, connections
//! - [`backends`] — SQLite / PostgreSQL / MySQL drivers (features
//!   `sqlite`, `postgres`, `mysql`)
//! - [`schema`] — schema synchronization (feature `schema`, on by
//!   default)
//!
//! ```no_run
//! use std::sync::Arc;
//! use ferrite::orm::metadata::args::{ColumnArgs, EntityArgs, MetadataRegistry};
//! use ferrite::orm::metadata::types::{GeneratedKind, PropertyKind};
//! use ferrite::orm::{Connection, ConnectionOptions, Entity};
//!
//! # #[cfg(feature = "sqlite")]
//! # async fn example() -> ferrite::core::OrmResult<()> {
//! let mut registry = MetadataRegistry::new();
//! registry
//!     .add_entity(EntityArgs::new("Post"))
//!     .add_column(
//!         ColumnArgs::new("Post", "id")
//!             .kind(PropertyKind::Int)
//!             .primary()
//!             .generated(GeneratedKind::Increment),
//!     )
//!     .add_column(ColumnArgs::new("Post", "title").kind(PropertyKind::String));
//!
//! let driver = Arc::new(ferrite::backends::SqliteDriver::memory()?);
//! let connection = Connection::new(ConnectionOptions::new("default", registry), driver);
//! connection.connect().await?;
//!
//! let posts = connection.repository("Post")?;
//! let saved = posts.save(Entity::new("Post").with("title", "Hello")).await?;
//! assert!(saved.get("id").is_some());
//! # Ok(())
//! # }
//! ```

/// Error taxonomy and logging setup.
pub use ferrite_core as core;

/// The ORM core.
pub use ferrite_orm as orm;

/// Database drivers.
pub use ferrite_backends as backends;

/// Schema synchronization.
#[cfg(feature = "schema")]
pub use ferrite_schema as schema;

// The everyday types, flattened for convenience.
pub use ferrite_core::{OrmError, OrmResult};
pub use ferrite_orm::{
    Connection, ConnectionOptions, Direction, Entity, EntityManager, EntitySubscriber,
    QueryBuilder, RelationValue, Repository, Value, WhereExpr,
};
