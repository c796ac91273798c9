//! Query building: the fluent builder and the shared DML compilation
//! helpers.

pub mod builder;
pub mod dml;

pub use builder::{CountModifier, Direction, JoinType, QueryBuilder, WhereExpr};
