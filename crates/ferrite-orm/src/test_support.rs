//! Shared fixtures for unit tests: a small blog schema exercising every
//! relation kind.

use crate::metadata::args::{
    ColumnArgs, EntityArgs, IndexArgs, JoinTableArgs, MetadataRegistry, RelationArgs,
};
use crate::metadata::builder::MetadataBuilder;
use crate::metadata::model::MetadataCollection;
use crate::metadata::types::{CascadeOptions, GeneratedKind, PropertyKind, RelationKind};
use crate::naming::DefaultNamingStrategy;

/// Builds the registry for the blog fixture:
///
/// - `User` (id, name) 1:N `Post.author`
/// - `Post` (id, title, views) M:1 `User`, M:N `Category` (owning side)
/// - `Category` (id, name) M:N `Post` (inverse side)
pub(crate) fn blog_registry() -> MetadataRegistry {
    let mut reg = MetadataRegistry::new();
    reg.add_entity(EntityArgs::new("User"))
        .add_column(
            ColumnArgs::new("User", "id")
                .kind(PropertyKind::Int)
                .primary()
                .generated(GeneratedKind::Increment),
        )
        .add_column(ColumnArgs::new("User", "name").kind(PropertyKind::String))
        .add_relation(
            RelationArgs::new("User", "posts", RelationKind::OneToMany, "Post")
                .inverse("author"),
        );
    reg.add_entity(EntityArgs::new("Post"))
        .add_column(
            ColumnArgs::new("Post", "id")
                .kind(PropertyKind::Int)
                .primary()
                .generated(GeneratedKind::Increment),
        )
        .add_column(ColumnArgs::new("Post", "title").kind(PropertyKind::String))
        .add_column(
            ColumnArgs::new("Post", "views")
                .kind(PropertyKind::Int)
                .default(0_i64),
        )
        .add_relation(
            RelationArgs::new("Post", "author", RelationKind::ManyToOne, "User")
                .inverse("posts")
                .cascade(CascadeOptions::SAVE),
        )
        .add_relation(
            RelationArgs::new("Post", "categories", RelationKind::ManyToMany, "Category")
                .inverse("posts")
                .cascade(CascadeOptions::SAVE),
        )
        .add_join_table(JoinTableArgs::new("Post", "categories"))
        .add_index(IndexArgs::new("Post", vec!["title"]));
    reg.add_entity(EntityArgs::new("Category"))
        .add_column(
            ColumnArgs::new("Category", "id")
                .kind(PropertyKind::Int)
                .primary()
                .generated(GeneratedKind::Increment),
        )
        .add_column(ColumnArgs::new("Category", "name").kind(PropertyKind::String))
        .add_relation(
            RelationArgs::new("Category", "posts", RelationKind::ManyToMany, "Post")
                .inverse("categories"),
        );
    reg
}

/// Builds the blog fixture's metadata collection.
pub(crate) fn blog_metadata() -> MetadataCollection {
    let registry = blog_registry();
    MetadataBuilder::new(&registry, &DefaultNamingStrategy, "test")
        .build()
        .expect("blog fixture must build")
}
