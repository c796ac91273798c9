//! # ferrite-schema
//!
//! Schema synchronization for the ferrite ORM. The [`SchemaBuilder`]
//! diffs a connection's entity metadata against the live database schema
//! (read through the driver's `load_table_schema` capability) and emits
//! the DDL statements that reconcile them — [`SchemaBuilder::log`] to
//! inspect, [`SchemaBuilder::synchronize`] to execute.

pub mod builder;

pub use builder::SchemaBuilder;
