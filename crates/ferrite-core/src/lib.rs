//! # ferrite-core
//!
//! Core types for the ferrite ORM. This crate has zero internal dependencies
//! and provides the foundation shared by all other ferrite crates.
//!
//! ## Modules
//!
//! - [`error`] - Error types and the [`OrmResult`] alias
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;

// Re-export the most commonly used types at the crate root.
pub use error::{OrmError, OrmResult};
