//! Connections: the owner of a driver, a metadata registry, and the
//! metadata built from it.
//!
//! Metadata is built once, at [`Connection::connect`], before the driver
//! is touched — every metadata inconsistency fails at connect time, never
//! at query time. After connect the collection is shared read-only by all
//! operations; it is dropped again on disconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use ferrite_core::{OrmError, OrmResult};

use crate::dialect::dialect_for;
use crate::driver::Driver;
use crate::events::{Broadcaster, EntitySubscriber};
use crate::manager::{EntityManager, Repository};
use crate::metadata::args::MetadataRegistry;
use crate::metadata::builder::MetadataBuilder;
use crate::metadata::model::{EntityMetadata, MetadataCollection};
use crate::naming::{DefaultNamingStrategy, NamingStrategy};

/// Construction options for a [`Connection`].
pub struct ConnectionOptions {
    /// The connection name, used in error messages and lookups.
    pub name: String,
    /// The declarative metadata registry this connection owns.
    pub registry: MetadataRegistry,
    /// The naming strategy applied during the metadata build.
    pub naming: Arc<dyn NamingStrategy>,
}

impl ConnectionOptions {
    /// Creates options with the default naming strategy.
    pub fn new(name: impl Into<String>, registry: MetadataRegistry) -> Self {
        Self {
            name: name.into(),
            registry,
            naming: Arc::new(DefaultNamingStrategy),
        }
    }

    /// Replaces the naming strategy.
    #[must_use]
    pub fn naming(mut self, naming: Arc<dyn NamingStrategy>) -> Self {
        self.naming = naming;
        self
    }
}

/// One database connection: driver + registry + built metadata +
/// broadcaster.
pub struct Connection {
    name: String,
    driver: Arc<dyn Driver>,
    naming: Arc<dyn NamingStrategy>,
    registry: MetadataRegistry,
    broadcaster: Arc<Broadcaster>,
    metadata: RwLock<Option<Arc<MetadataCollection>>>,
    connected: AtomicBool,
}

impl Connection {
    /// Creates an unconnected connection.
    pub fn new(options: ConnectionOptions, driver: Arc<dyn Driver>) -> Self {
        Self {
            name: options.name,
            driver,
            naming: options.naming,
            registry: options.registry,
            broadcaster: Arc::new(Broadcaster::new()),
            metadata: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Returns the connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` after a successful [`connect`](Self::connect).
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Builds the metadata and establishes the driver connection.
    ///
    /// # Errors
    ///
    /// [`OrmError::AlreadyConnected`] when called twice; any metadata
    /// build error fails the call before the driver is touched.
    pub async fn connect(&self) -> OrmResult<()> {
        if self.is_connected() {
            return Err(OrmError::AlreadyConnected(self.name.clone()));
        }
        let collection =
            MetadataBuilder::new(&self.registry, self.naming.as_ref(), &self.name).build()?;
        self.driver.connect().await?;
        *self.metadata.write().expect("metadata lock poisoned") = Some(Arc::new(collection));
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(connection = %self.name, "connected");
        Ok(())
    }

    /// Tears the connection down and drops the built metadata.
    pub async fn disconnect(&self) -> OrmResult<()> {
        if !self.is_connected() {
            return Err(OrmError::ConnectionNotEstablished(self.name.clone()));
        }
        self.driver.disconnect().await?;
        *self.metadata.write().expect("metadata lock poisoned") = None;
        self.connected.store(false, Ordering::SeqCst);
        tracing::debug!(connection = %self.name, "disconnected");
        Ok(())
    }

    /// Returns the built metadata collection.
    pub fn metadata(&self) -> OrmResult<Arc<MetadataCollection>> {
        self.metadata
            .read()
            .expect("metadata lock poisoned")
            .clone()
            .ok_or_else(|| OrmError::ConnectionNotEstablished(self.name.clone()))
    }

    /// Returns one entity's metadata.
    pub fn entity_metadata(&self, entity: &str) -> OrmResult<Arc<EntityMetadata>> {
        self.metadata()?.get(entity)
    }

    /// Returns the driver this connection runs on.
    pub fn driver(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.driver)
    }

    /// Registers a lifecycle subscriber under `id`.
    pub fn subscribe(&self, id: impl Into<String>, subscriber: Arc<dyn EntitySubscriber>) {
        self.broadcaster.connect(id, subscriber);
    }

    /// Removes the subscriber registered under `id`.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.broadcaster.disconnect(id)
    }

    /// Returns an entity manager over this connection.
    pub fn manager(&self) -> OrmResult<EntityManager> {
        Ok(EntityManager::new(
            self.metadata()?,
            dialect_for(self.driver.kind()),
            Arc::clone(&self.driver),
            Arc::clone(&self.broadcaster),
        ))
    }

    /// Returns a repository for `entity`.
    pub fn repository(&self, entity: &str) -> OrmResult<Repository> {
        self.manager()?.repository(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::driver::{DatabaseKind, QueryRunner, Row, TableSchema};
    use crate::test_support::blog_registry;
    use crate::value::Value;

    struct NullDriver;

    struct NullRunner;

    #[async_trait]
    impl QueryRunner for NullRunner {
        async fn query(&self, _sql: &str, _params: &[Value]) -> OrmResult<Vec<Row>> {
            Ok(Vec::new())
        }
        async fn execute(&self, _sql: &str, _params: &[Value]) -> OrmResult<u64> {
            Ok(0)
        }
        async fn insert_returning(
            &self,
            _sql: &str,
            _params: &[Value],
            _pk_column: &str,
        ) -> OrmResult<Value> {
            Ok(Value::Int(1))
        }
        async fn begin_transaction(&self) -> OrmResult<()> {
            Ok(())
        }
        async fn commit_transaction(&self) -> OrmResult<()> {
            Ok(())
        }
        async fn rollback_transaction(&self) -> OrmResult<()> {
            Ok(())
        }
        async fn release(&self) -> OrmResult<()> {
            Ok(())
        }
        async fn load_table_schema(&self, _table: &str) -> OrmResult<Option<TableSchema>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl Driver for NullDriver {
        fn kind(&self) -> DatabaseKind {
            DatabaseKind::Sqlite
        }
        async fn connect(&self) -> OrmResult<()> {
            Ok(())
        }
        async fn disconnect(&self) -> OrmResult<()> {
            Ok(())
        }
        fn create_query_runner(&self) -> Box<dyn QueryRunner> {
            Box::new(NullRunner)
        }
    }

    fn connection() -> Connection {
        Connection::new(
            ConnectionOptions::new("default", blog_registry()),
            Arc::new(NullDriver),
        )
    }

    #[tokio::test]
    async fn connect_builds_metadata_once() {
        let conn = connection();
        assert!(!conn.is_connected());
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert!(conn.entity_metadata("Post").is_ok());

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, OrmError::AlreadyConnected(_)));

        conn.disconnect().await.unwrap();
        assert!(!conn.is_connected());
        let err = conn.metadata().unwrap_err();
        assert!(matches!(err, OrmError::ConnectionNotEstablished(_)));
    }

    #[tokio::test]
    async fn repository_requires_connection_and_known_entity() {
        let conn = connection();
        let err = conn.repository("Post").unwrap_err();
        assert!(matches!(err, OrmError::ConnectionNotEstablished(_)));

        conn.connect().await.unwrap();
        assert!(conn.repository("Post").is_ok());
        let err = conn.repository("Ghost").unwrap_err();
        assert!(matches!(
            err,
            OrmError::EntityNotFound { ref entity, ref connection }
                if entity == "Ghost" && connection == "default"
        ));
    }

    #[tokio::test]
    async fn disconnect_twice_fails() {
        let conn = connection();
        conn.connect().await.unwrap();
        conn.disconnect().await.unwrap();
        let err = conn.disconnect().await.unwrap_err();
        assert!(matches!(err, OrmError::ConnectionNotEstablished(_)));
    }

    #[tokio::test]
    async fn metadata_build_failure_blocks_connect() {
        let mut registry = blog_registry();
        registry.join_tables.clear();
        let conn = Connection::new(
            ConnectionOptions::new("broken", registry),
            Arc::new(NullDriver),
        );
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, OrmError::MissingJoinSpecification { .. }));
        assert!(!conn.is_connected());
    }
}
