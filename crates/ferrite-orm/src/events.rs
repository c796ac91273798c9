//! Lifecycle event broadcasting.
//!
//! Subscribers implement [`EntitySubscriber`] with only the hooks they
//! care about; the [`Broadcaster`] dispatches synchronously, in connection
//! order, at defined points inside the persistence executor (and after
//! query hydration for `after_load`). A subscriber may restrict itself to
//! one entity via [`listen_to`](EntitySubscriber::listen_to).
//!
//! Hooks receive the live entity handle: a `before_*` hook that mutates a
//! property is re-read before the SQL for that entity is issued, so the
//! mutation lands in the persisted row.

use std::sync::{Arc, RwLock};

use crate::driver::QueryRunner;
use crate::entity::Entity;
use crate::metadata::model::EntityMetadata;

/// The payload delivered to every hook.
pub struct EntityEvent<'a> {
    /// The entity instance the operation applies to.
    pub entity: &'a Entity,
    /// The entity's metadata.
    pub metadata: &'a EntityMetadata,
    /// The query runner executing the surrounding operation.
    pub runner: &'a dyn QueryRunner,
}

/// A lifecycle subscriber: a capability set of optional hooks.
///
/// Every hook defaults to a no-op; implement only what you need.
pub trait EntitySubscriber: Send + Sync {
    /// Restricts this subscriber to one entity name; `None` listens to
    /// every entity.
    fn listen_to(&self) -> Option<&str> {
        None
    }

    /// Called immediately before an entity row INSERT.
    fn before_insert(&self, _event: &EntityEvent<'_>) {}

    /// Called immediately after an entity row INSERT.
    fn after_insert(&self, _event: &EntityEvent<'_>) {}

    /// Called immediately before an entity row UPDATE.
    fn before_update(&self, _event: &EntityEvent<'_>) {}

    /// Called immediately after an entity row UPDATE.
    fn after_update(&self, _event: &EntityEvent<'_>) {}

    /// Called immediately before an entity row DELETE.
    fn before_remove(&self, _event: &EntityEvent<'_>) {}

    /// Called immediately after an entity row DELETE.
    fn after_remove(&self, _event: &EntityEvent<'_>) {}

    /// Called after an entity is hydrated from a query result.
    fn after_load(&self, _event: &EntityEvent<'_>) {}
}

/// The lifecycle hook points a broadcaster can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// Before INSERT.
    BeforeInsert,
    /// After INSERT.
    AfterInsert,
    /// Before UPDATE.
    BeforeUpdate,
    /// After UPDATE.
    AfterUpdate,
    /// Before DELETE.
    BeforeRemove,
    /// After DELETE.
    AfterRemove,
    /// After hydration.
    AfterLoad,
}

/// Dispatches lifecycle events to registered subscribers.
///
/// Subscribers are registered under an id; re-connecting the same id
/// replaces the previous subscriber. Dispatch happens in connection order.
pub struct Broadcaster {
    subscribers: RwLock<Vec<(String, Arc<dyn EntitySubscriber>)>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    /// Creates a broadcaster with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Connects a subscriber under `id`, replacing any previous
    /// subscriber with the same id.
    pub fn connect(&self, id: impl Into<String>, subscriber: Arc<dyn EntitySubscriber>) {
        let id = id.into();
        let mut subscribers = self.subscribers.write().expect("broadcaster lock poisoned");
        if let Some(entry) = subscribers.iter_mut().find(|(sid, _)| *sid == id) {
            entry.1 = subscriber;
        } else {
            subscribers.push((id, subscriber));
        }
    }

    /// Disconnects the subscriber registered under `id`.
    ///
    /// Returns `true` if a subscriber was removed.
    pub fn disconnect(&self, id: &str) -> bool {
        let mut subscribers = self.subscribers.write().expect("broadcaster lock poisoned");
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| sid != id);
        subscribers.len() < before
    }

    /// Returns the number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("broadcaster lock poisoned")
            .len()
    }

    /// Dispatches `hook` to every subscriber listening to the event's
    /// entity.
    pub fn broadcast(&self, hook: Hook, event: &EntityEvent<'_>) {
        let subscribers = self.subscribers.read().expect("broadcaster lock poisoned");
        for (_, subscriber) in subscribers.iter() {
            if let Some(only) = subscriber.listen_to() {
                if only != event.metadata.name {
                    continue;
                }
            }
            match hook {
                Hook::BeforeInsert => subscriber.before_insert(event),
                Hook::AfterInsert => subscriber.after_insert(event),
                Hook::BeforeUpdate => subscriber.before_update(event),
                Hook::AfterUpdate => subscriber.after_update(event),
                Hook::BeforeRemove => subscriber.before_remove(event),
                Hook::AfterRemove => subscriber.after_remove(event),
                Hook::AfterLoad => subscriber.after_load(event),
            }
        }
    }
}
