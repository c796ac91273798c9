//! # ferrite-orm
//!
//! The ORM core of ferrite: a metadata-driven query and persistence
//! engine. Entity descriptions are plain data ([`metadata::args`]); the
//! [`metadata::builder`] normalizes them into an immutable model at
//! connect time; the [`query`] builder compiles fluent call chains into
//! dialect-correct SQL; and the [`persist`] executor computes and runs
//! dependency-ordered persistence plans inside one transaction.
//!
//! Concrete database drivers implement the [`driver`] traits and live in
//! the `ferrite-backends` crate; schema synchronization lives in
//! `ferrite-schema`.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ferrite_orm::metadata::args::{ColumnArgs, EntityArgs, MetadataRegistry};
//! use ferrite_orm::metadata::types::{GeneratedKind, PropertyKind};
//! use ferrite_orm::{Connection, ConnectionOptions, Entity};
//!
//! # async fn example(driver: Arc<dyn ferrite_orm::Driver>) -> ferrite_core::OrmResult<()> {
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
//! let connection = Connection::new(ConnectionOptions::new("default", registry), driver);
//! connection.connect().await?;
//!
//! let posts = connection.repository("Post")?;
//! let saved = posts.save(Entity::new("Post").with("title", "Hello")).await?;
//! assert!(saved.get("id").is_some());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod dialect;
pub mod driver;
pub mod entity;
pub mod events;
pub mod manager;
pub mod metadata;
pub mod naming;
pub mod persist;
pub mod query;
pub mod value;

#[cfg(test)]
mod test_support;

// The most commonly used types, re-exported at the crate root.
pub use connection::{Connection, ConnectionOptions};
pub use dialect::{dialect_for, Dialect};
pub use driver::{
    DatabaseKind, Driver, QueryRunner, Row, TableColumnSchema, TableForeignKeySchema,
    TableIndexSchema, TableSchema,
};
pub use entity::{Entity, RelationValue};
pub use events::{Broadcaster, EntityEvent, EntitySubscriber, Hook};
pub use manager::{EntityManager, Repository};
pub use metadata::{MetadataCollection, MetadataRegistry};
pub use persist::PersistExecutor;
pub use query::{Direction, QueryBuilder, WhereExpr};
pub use value::{FromValue, Value};
