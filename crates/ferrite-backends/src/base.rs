//! Connection configuration shared by all backends.

use std::collections::HashMap;

use ferrite_orm::DatabaseKind;

/// Configuration for connecting to a database.
///
/// Holds the connection parameters needed to construct any supported
/// driver; per-backend constructors fill in the conventional defaults.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// The backend kind.
    pub kind: DatabaseKind,
    /// The database name or file path.
    pub name: String,
    /// The database host (network backends).
    pub host: Option<String>,
    /// The database port.
    pub port: Option<u16>,
    /// The database user.
    pub user: Option<String>,
    /// The database password.
    pub password: Option<String>,
    /// Additional driver options.
    pub options: HashMap<String, String>,
}

impl DatabaseConfig {
    /// Configuration for an in-memory SQLite database.
    pub fn sqlite_memory() -> Self {
        Self {
            kind: DatabaseKind::Sqlite,
            name: ":memory:".to_string(),
            host: None,
            port: None,
            user: None,
            password: None,
            options: HashMap::new(),
        }
    }

    /// Configuration for a SQLite file database.
    pub fn sqlite_file(path: impl Into<String>) -> Self {
        Self {
            name: path.into(),
            ..Self::sqlite_memory()
        }
    }

    /// Configuration for a PostgreSQL database.
    pub fn postgres(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            kind: DatabaseKind::Postgres,
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            options: HashMap::new(),
        }
    }

    /// Configuration for a MySQL database.
    pub fn mysql(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            kind: DatabaseKind::MySql,
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            options: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_memory_config() {
        let cfg = DatabaseConfig::sqlite_memory();
        assert_eq!(cfg.kind, DatabaseKind::Sqlite);
        assert_eq!(cfg.name, ":memory:");
        assert!(cfg.host.is_none());
    }

    #[test]
    fn postgres_config() {
        let cfg = DatabaseConfig::postgres("mydb", "localhost", 5432, "user", "pass");
        assert_eq!(cfg.kind, DatabaseKind::Postgres);
        assert_eq!(cfg.port, Some(5432));
        assert_eq!(cfg.user.as_deref(), Some("user"));
    }

    #[test]
    fn mysql_config() {
        let cfg = DatabaseConfig::mysql("mydb", "localhost", 3306, "root", "secret");
        assert_eq!(cfg.kind, DatabaseKind::MySql);
        assert_eq!(cfg.port, Some(3306));
    }
}
