//! # ferrite-backends
//!
//! Database drivers for the ferrite ORM. Each backend implements the
//! [`Driver`](ferrite_orm::Driver) and [`QueryRunner`](ferrite_orm::QueryRunner)
//! traits from `ferrite-orm`:
//!
//! - [`sqlite`] — `rusqlite` wrapped in `spawn_blocking` (feature `sqlite`,
//!   on by default; in-memory databases make it the test backend)
//! - [`postgresql`] — `tokio-postgres` + `deadpool-postgres` (feature
//!   `postgres`)
//! - [`mysql`] — `mysql_async` (feature `mysql`)
//!
//! [`recording`] wraps any runner and captures executed statements for
//! query-count assertions in tests.

pub mod base;
pub mod recording;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgresql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use base::DatabaseConfig;
pub use recording::RecordingRunner;

#[cfg(feature = "mysql")]
pub use mysql::MySqlDriver;
#[cfg(feature = "postgres")]
pub use postgresql::PostgresDriver;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;
