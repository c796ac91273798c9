//! Runtime entity representation.
//!
//! With the annotation front-end out of scope, an entity instance is a
//! dynamic record: a property → value map plus a property → relation map,
//! tagged with its entity name. Instances are shared (`Arc`) so the
//! persistence executor can write generated keys back onto the caller's
//! objects and subscribers can mutate an entity before its SQL is issued.
//! Sharing also makes cyclic object graphs representable; the executor
//! walks them with an identity-keyed visited set.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::value::Value;

/// The value of a relation property on an entity instance.
#[derive(Clone)]
pub enum RelationValue {
    /// A to-one relation: present or explicitly cleared.
    One(Option<Entity>),
    /// A to-many relation.
    Many(Vec<Entity>),
}

/// The interior state of an [`Entity`].
pub struct EntityData {
    name: String,
    values: HashMap<String, Value>,
    relations: HashMap<String, RelationValue>,
}

/// A shared, mutable entity instance.
///
/// Cloning an `Entity` clones the handle, not the data: both handles
/// observe the same property values. Identity (for graph walks and
/// visited sets) is the allocation, exposed via [`Entity::id`].
///
/// # Examples
///
/// ```
/// use ferrite_orm::entity::Entity;
/// use ferrite_orm::value::Value;
///
/// let post = Entity::new("Post").with("title", "Hello");
/// assert_eq!(post.get("title"), Some(Value::String("Hello".into())));
/// post.set("title", "Updated");
/// assert_eq!(post.get("title"), Some(Value::String("Updated".into())));
/// ```
#[derive(Clone)]
pub struct Entity {
    inner: Arc<RwLock<EntityData>>,
}

impl Entity {
    /// Creates an empty instance of the named entity.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(EntityData {
                name: name.into(),
                values: HashMap::new(),
                relations: HashMap::new(),
            })),
        }
    }

    /// Returns the entity name this instance belongs to.
    pub fn name(&self) -> String {
        self.inner.read().expect("entity lock poisoned").name.clone()
    }

    /// Returns the identity of this instance (stable for the lifetime of
    /// the allocation; shared by all clones of the handle).
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Returns `true` if both handles point at the same instance.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sets a property value.
    pub fn set(&self, property: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .write()
            .expect("entity lock poisoned")
            .values
            .insert(property.into(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(property, value);
        self
    }

    /// Returns a property value, or `None` if it was never set.
    ///
    /// An explicit SQL NULL is `Some(Value::Null)`; "never set" is `None`.
    /// The distinction matters to the persistence diff: unset generated
    /// columns are filled by the database, unset ordinary columns are
    /// simply not written.
    pub fn get(&self, property: &str) -> Option<Value> {
        self.inner
            .read()
            .expect("entity lock poisoned")
            .values
            .get(property)
            .cloned()
    }

    /// Removes a property value, returning the previous one.
    pub fn unset(&self, property: &str) -> Option<Value> {
        self.inner
            .write()
            .expect("entity lock poisoned")
            .values
            .remove(property)
    }

    /// Returns a snapshot of all set property values.
    pub fn values(&self) -> HashMap<String, Value> {
        self.inner
            .read()
            .expect("entity lock poisoned")
            .values
            .clone()
    }

    /// Sets a to-one relation.
    pub fn set_one(&self, property: impl Into<String>, related: Option<Self>) {
        self.inner
            .write()
            .expect("entity lock poisoned")
            .relations
            .insert(property.into(), RelationValue::One(related));
    }

    /// Builder-style [`set_one`](Self::set_one).
    #[must_use]
    pub fn with_one(self, property: impl Into<String>, related: Option<Self>) -> Self {
        self.set_one(property, related);
        self
    }

    /// Sets a to-many relation.
    pub fn set_many(&self, property: impl Into<String>, related: Vec<Self>) {
        self.inner
            .write()
            .expect("entity lock poisoned")
            .relations
            .insert(property.into(), RelationValue::Many(related));
    }

    /// Builder-style [`set_many`](Self::set_many).
    #[must_use]
    pub fn with_many(self, property: impl Into<String>, related: Vec<Self>) -> Self {
        self.set_many(property, related);
        self
    }

    /// Returns the value of a relation property, or `None` if the relation
    /// was never assigned on this instance.
    pub fn relation(&self, property: &str) -> Option<RelationValue> {
        self.inner
            .read()
            .expect("entity lock poisoned")
            .relations
            .get(property)
            .cloned()
    }

    /// Returns the names of all assigned relation properties.
    pub fn relation_names(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("entity lock poisoned")
            .relations
            .keys()
            .cloned()
            .collect()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Relations are omitted: the graph may be cyclic.
        let data = self.inner.read().expect("entity lock poisoned");
        f.debug_struct("Entity")
            .field("name", &data.name)
            .field("values", &data.values)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let e = Entity::new("Post").with("title", "Hi").with("views", 3_i64);
        assert_eq!(e.get("title"), Some(Value::String("Hi".into())));
        assert_eq!(e.get("views"), Some(Value::Int(3)));
        assert_eq!(e.get("missing"), None);
    }

    #[test]
    fn clones_share_state() {
        let a = Entity::new("Post");
        let b = a.clone();
        b.set("title", "shared");
        assert_eq!(a.get("title"), Some(Value::String("shared".into())));
        assert!(a.same_instance(&b));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn distinct_instances_differ() {
        let a = Entity::new("Post");
        let b = Entity::new("Post");
        assert!(!a.same_instance(&b));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn relations() {
        let cat = Entity::new("Category").with("name", "rust");
        let post = Entity::new("Post").with_many("categories", vec![cat.clone()]);
        match post.relation("categories") {
            Some(RelationValue::Many(items)) => {
                assert_eq!(items.len(), 1);
                assert!(items[0].same_instance(&cat));
            }
            _ => panic!("expected Many"),
        }
        assert!(post.relation("author").is_none());
    }

    #[test]
    fn cyclic_graph_is_representable() {
        let a = Entity::new("Node");
        let b = Entity::new("Node");
        a.set_one("next", Some(b.clone()));
        b.set_one("next", Some(a.clone()));
        match a.relation("next") {
            Some(RelationValue::One(Some(n))) => assert!(n.same_instance(&b)),
            _ => panic!("expected One"),
        }
    }
}
