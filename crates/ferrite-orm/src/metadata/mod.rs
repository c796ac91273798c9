//! Entity metadata: declarative argument records, the normalized model,
//! and the builder that turns one into the other at connect time.

pub mod args;
pub mod builder;
pub mod model;
pub mod types;

pub use args::MetadataRegistry;
pub use builder::MetadataBuilder;
pub use model::{
    ColumnMetadata, EntityMetadata, IndexMetadata, MetadataCollection, RelationMetadata,
};
pub use types::{
    CascadeOptions, ColumnType, GeneratedKind, InheritancePattern, PropertyKind, RelationKind,
    ValueTransformer,
};
