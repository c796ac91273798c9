//! Entity manager and per-entity repositories.
//!
//! The [`EntityManager`] is the thin façade over the query builder and
//! the persistence executor: it opens a runner per operation, delegates,
//! and releases the runner. A [`Repository`] narrows the manager to one
//! entity type.

use std::sync::Arc;

use ferrite_core::{OrmError, OrmResult};

use crate::dialect::Dialect;
use crate::driver::Driver;
use crate::entity::Entity;
use crate::events::{Broadcaster, EntityEvent, Hook};
use crate::metadata::model::{EntityMetadata, MetadataCollection};
use crate::persist::executor::PersistExecutor;
use crate::query::builder::QueryBuilder;
use crate::value::Value;

/// CRUD and query operations over a connection's entities.
#[derive(Clone)]
pub struct EntityManager {
    collection: Arc<MetadataCollection>,
    dialect: &'static dyn Dialect,
    driver: Arc<dyn Driver>,
    broadcaster: Arc<Broadcaster>,
}

impl EntityManager {
    /// Creates a manager. Usually obtained from
    /// [`Connection::manager`](crate::connection::Connection::manager).
    pub fn new(
        collection: Arc<MetadataCollection>,
        dialect: &'static dyn Dialect,
        driver: Arc<dyn Driver>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            collection,
            dialect,
            driver,
            broadcaster,
        }
    }

    /// Returns the metadata of `entity`.
    pub fn metadata(&self, entity: &str) -> OrmResult<Arc<EntityMetadata>> {
        self.collection.get(entity)
    }

    /// Returns a repository for `entity`.
    pub fn repository(&self, entity: &str) -> OrmResult<Repository> {
        self.collection.get(entity)?;
        Ok(Repository {
            manager: self.clone(),
            entity: entity.to_string(),
        })
    }

    /// Starts a SELECT query builder over `entity`.
    pub fn create_query_builder(&self, entity: &str, alias: &str) -> OrmResult<QueryBuilder> {
        QueryBuilder::select(Arc::clone(&self.collection), self.dialect, entity, alias)
    }

    /// Persists the entities (and their save-cascading graphs) in one
    /// transaction, returning them with generated values filled in.
    pub async fn save(&self, entities: Vec<Entity>) -> OrmResult<Vec<Entity>> {
        let runner = self.driver.create_query_runner();
        let executor = PersistExecutor::new(
            Arc::clone(&self.collection),
            self.dialect,
            &self.broadcaster,
        );
        let outcome = executor.save(runner.as_ref(), &entities).await;
        let released = runner.release().await;
        outcome?;
        released?;
        Ok(entities)
    }

    /// Removes the entities (and their remove-cascading graphs) in one
    /// transaction.
    pub async fn remove(&self, entities: Vec<Entity>) -> OrmResult<()> {
        let runner = self.driver.create_query_runner();
        let executor = PersistExecutor::new(
            Arc::clone(&self.collection),
            self.dialect,
            &self.broadcaster,
        );
        let outcome = executor.remove(runner.as_ref(), &entities).await;
        let released = runner.release().await;
        outcome?;
        released?;
        Ok(())
    }

    /// Finds entities matching the property equality conditions, loading
    /// eager relations alongside.
    pub async fn find(
        &self,
        entity: &str,
        conditions: &[(&str, Value)],
    ) -> OrmResult<Vec<Entity>> {
        let alias = entity.to_lowercase();
        let builder = self.find_builder(entity, &alias, conditions)?;
        let runner = self.driver.create_query_runner();
        let outcome = builder.get_many(runner.as_ref()).await;
        match &outcome {
            Ok(found) => {
                let metadata = self.collection.get(entity)?;
                for loaded in found {
                    let event = EntityEvent {
                        entity: loaded,
                        metadata: &metadata,
                        runner: runner.as_ref(),
                    };
                    self.broadcaster.broadcast(Hook::AfterLoad, &event);
                }
            }
            Err(_) => {}
        }
        let released = runner.release().await;
        let found = outcome?;
        released?;
        Ok(found)
    }

    /// Finds one entity by primary key.
    pub async fn find_by_id(&self, entity: &str, id: impl Into<Value>) -> OrmResult<Option<Entity>> {
        let metadata = self.collection.get(entity)?;
        let pk = metadata.primary_column()?;
        let found = self
            .find(entity, &[(pk.property_name.as_str(), id.into())])
            .await?;
        Ok(found.into_iter().next())
    }

    /// Counts entities matching the property equality conditions.
    pub async fn count(&self, entity: &str, conditions: &[(&str, Value)]) -> OrmResult<u64> {
        let alias = entity.to_lowercase();
        let builder = self.find_builder(entity, &alias, conditions)?;
        let runner = self.driver.create_query_runner();
        let outcome = builder.get_count(runner.as_ref()).await;
        let released = runner.release().await;
        let count = outcome?;
        released?;
        Ok(count)
    }

    /// Assembles the SELECT builder shared by `find`/`count`: eager
    /// relations joined-and-selected, conditions ANDed as equality.
    fn find_builder(
        &self,
        entity: &str,
        alias: &str,
        conditions: &[(&str, Value)],
    ) -> OrmResult<QueryBuilder> {
        let metadata = self.collection.get(entity)?;
        let mut builder = self.create_query_builder(entity, alias)?;
        for relation in &metadata.relations {
            if relation.eager {
                builder = builder.left_join_and_select(
                    &format!("{alias}.{}", relation.property_name),
                    &format!("{alias}_{}", relation.property_name),
                )?;
            }
        }
        for (i, (property, value)) in conditions.iter().enumerate() {
            if value.is_null() {
                builder = builder.and_where(format!("{alias}.{property} IS NULL"));
            } else {
                let name = format!("p{i}");
                builder = builder
                    .and_where(format!("{alias}.{property} = :{name}"))
                    .set_parameter(name, value.clone());
            }
        }
        Ok(builder)
    }
}

/// A per-entity façade over the [`EntityManager`].
#[derive(Clone)]
pub struct Repository {
    manager: EntityManager,
    entity: String,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &self.entity)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// The entity this repository serves.
    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    /// Returns the entity's metadata.
    pub fn metadata(&self) -> OrmResult<Arc<EntityMetadata>> {
        self.manager.metadata(&self.entity)
    }

    /// Creates a new unsaved instance of this repository's entity.
    pub fn create(&self) -> Entity {
        Entity::new(&self.entity)
    }

    /// Starts a SELECT query builder aliased as `alias`.
    pub fn create_query_builder(&self, alias: &str) -> OrmResult<QueryBuilder> {
        self.manager.create_query_builder(&self.entity, alias)
    }

    /// Saves one entity graph.
    pub async fn save(&self, entity: Entity) -> OrmResult<Entity> {
        self.guard(&entity)?;
        let mut saved = self.manager.save(vec![entity]).await?;
        Ok(saved.remove(0))
    }

    /// Saves several entity graphs in one transaction.
    pub async fn save_all(&self, entities: Vec<Entity>) -> OrmResult<Vec<Entity>> {
        for entity in &entities {
            self.guard(entity)?;
        }
        self.manager.save(entities).await
    }

    /// Removes one entity graph.
    pub async fn remove(&self, entity: Entity) -> OrmResult<()> {
        self.guard(&entity)?;
        self.manager.remove(vec![entity]).await
    }

    /// Finds entities matching the property equality conditions.
    pub async fn find(&self, conditions: &[(&str, Value)]) -> OrmResult<Vec<Entity>> {
        self.manager.find(&self.entity, conditions).await
    }

    /// Finds all entities.
    pub async fn find_all(&self) -> OrmResult<Vec<Entity>> {
        self.manager.find(&self.entity, &[]).await
    }

    /// Finds one entity by primary key.
    pub async fn find_by_id(&self, id: impl Into<Value>) -> OrmResult<Option<Entity>> {
        self.manager.find_by_id(&self.entity, id).await
    }

    /// Counts entities matching the property equality conditions.
    pub async fn count(&self, conditions: &[(&str, Value)]) -> OrmResult<u64> {
        self.manager.count(&self.entity, conditions).await
    }

    /// Repositories only accept instances of their own entity.
    fn guard(&self, entity: &Entity) -> OrmResult<()> {
        if entity.name() == self.entity {
            Ok(())
        } else {
            Err(OrmError::EntityNotFound {
                entity: entity.name(),
                connection: format!("repository for {}", self.entity),
            })
        }
    }
}
