//! Single-property resource links
//!
//! A [`ResourceLink`] exposes exactly one property of an endpoint as a
//! fetch/invoke pair with a fixed mutation semantic. Other subsystems (pairing
//! forwarding, per-property directives) hold links instead of the whole
//! endpoint.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::endpoint::FunctionalEndpoint;
use crate::error::{PropertyError, Result};
use crate::key::{PropertyKey, ValueType};
use crate::observable::{Observable, Watcher, WatcherId};

/// What invoking a link does to its property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutation {
    /// Set the property to the invoked value
    Replace,
    /// Add the invoked value, 1 when null
    Increment,
    /// Flip the property, ignoring the invoked value
    Toggle,
    /// Insert the invoked value into the collection
    Insert,
    /// Remove the invoked value from the collection
    Remove,
}

impl Mutation {
    /// Whether the link addresses a collection element rather than the property
    pub fn is_element(&self) -> bool {
        matches!(self, Mutation::Insert | Mutation::Remove)
    }
}

/// A property exposed with one mutation semantic
pub struct ResourceLink {
    endpoint: Arc<dyn FunctionalEndpoint>,
    key: PropertyKey,
    locator: String,
    mutation: Mutation,
    observable: Arc<Observable>,
}

impl ResourceLink {
    /// Link with replace semantics
    pub fn create(endpoint: Arc<dyn FunctionalEndpoint>, key: PropertyKey, locator: impl Into<String>) -> Self {
        Self::with_mutation(endpoint, key, locator.into(), Mutation::Replace)
    }

    /// Link that increments; a null invocation increments by 1
    pub fn create_increment(endpoint: Arc<dyn FunctionalEndpoint>, key: PropertyKey, locator: impl Into<String>) -> Self {
        Self::with_mutation(endpoint, key, locator.into(), Mutation::Increment)
    }

    /// Link that toggles a boolean property
    pub fn create_toggle(endpoint: Arc<dyn FunctionalEndpoint>, key: PropertyKey, locator: impl Into<String>) -> Self {
        Self::with_mutation(endpoint, key, locator.into(), Mutation::Toggle)
    }

    /// Link that inserts elements into a collection property
    pub fn create_insert(endpoint: Arc<dyn FunctionalEndpoint>, key: PropertyKey, locator: impl Into<String>) -> Self {
        Self::with_mutation(endpoint, key, locator.into(), Mutation::Insert)
    }

    /// Link that removes elements from a collection property
    pub fn create_remove(endpoint: Arc<dyn FunctionalEndpoint>, key: PropertyKey, locator: impl Into<String>) -> Self {
        Self::with_mutation(endpoint, key, locator.into(), Mutation::Remove)
    }

    fn with_mutation(
        endpoint: Arc<dyn FunctionalEndpoint>,
        key: PropertyKey,
        locator: String,
        mutation: Mutation,
    ) -> Self {
        // Element links have nothing meaningful to report
        let observable = if mutation.is_element() {
            Arc::new(Observable::detached(key.name()))
        } else {
            Observable::for_property(Arc::clone(&endpoint), key.clone())
        };

        Self {
            endpoint,
            key,
            locator,
            mutation,
            observable,
        }
    }

    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// Addressable locator of the linked property
    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn mutation(&self) -> Mutation {
        self.mutation
    }

    /// Fetch the property value
    ///
    /// Element links cannot report the whole collection and always fail with
    /// [`PropertyError::Unsupported`].
    pub async fn fetch(&self) -> Result<Value> {
        if self.mutation.is_element() {
            return Err(PropertyError::Unsupported(format!(
                "fetch of {} through an element link",
                self.key
            )));
        }
        self.endpoint.fetch_property(&self.key).await
    }

    /// Apply the link's mutation with `value`
    pub async fn invoke(&self, value: Value) -> Result<()> {
        tracing::debug!(key = %self.key, mutation = ?self.mutation, "Invoking link");

        match self.mutation {
            Mutation::Replace => self.endpoint.set_property(&self.key, value).await,
            Mutation::Increment => {
                let delta = if value.is_null() {
                    ValueType::Number
                        .coerce(self.key.name(), &Value::from(1))
                        .expect("literal 1 is always a number")
                } else {
                    value
                };
                self.endpoint.increment_property(&self.key, delta).await
            }
            Mutation::Toggle => self.endpoint.toggle_property(&self.key).await,
            Mutation::Insert | Mutation::Remove if value.is_null() => Err(PropertyError::InvalidValue(
                format!("missing element for {}", self.key),
            )),
            Mutation::Insert => self.endpoint.add_value_to_property(&self.key, value).await,
            Mutation::Remove => self.endpoint.remove_value_from_property(&self.key, value).await,
        }
    }

    /// Watch the linked property
    ///
    /// The endpoint listener is attached with the first watcher only. For
    /// element links this registers nothing upstream.
    pub fn register_listener(&self, id: WatcherId, watcher: Watcher) -> bool {
        self.observable.add_watcher(id, watcher)
    }

    pub fn unregister_listener(&self, id: WatcherId) -> bool {
        self.observable.remove_watcher(id)
    }

    pub fn observable(&self) -> &Arc<Observable> {
        &self.observable
    }
}

impl fmt::Debug for ResourceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLink")
            .field("key", &self.key)
            .field("locator", &self.locator)
            .field("mutation", &self.mutation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Section;
    use crate::local::{LocalEndpoint, PropertySpec};
    use serde_json::json;

    fn keys() -> (PropertyKey, PropertyKey, PropertyKey) {
        (
            PropertyKey::new(Section::State, "levl", "v", ValueType::Number),
            PropertyKey::new(Section::State, "onof", "v", ValueType::Bool),
            PropertyKey::new(Section::Config, "grup", "ids", ValueType::Array),
        )
    }

    fn lamp() -> Arc<LocalEndpoint> {
        let (level, on_off, groups) = keys();
        Arc::new(LocalEndpoint::new(
            "lamp",
            [
                PropertySpec::new(level).with_default(json!(0)),
                PropertySpec::new(on_off).with_default(json!(false)),
                PropertySpec::new(groups),
            ],
        ))
    }

    #[tokio::test]
    async fn test_replace_sets_value() {
        let lamp = lamp();
        let link = ResourceLink::create(lamp.clone(), keys().0, "/1/s/levl/v");
        link.invoke(json!(0.4)).await.unwrap();
        assert_eq!(link.fetch().await.unwrap(), json!(0.4));
        assert_eq!(link.locator(), "/1/s/levl/v");
    }

    #[tokio::test]
    async fn test_increment_defaults_to_one() {
        let lamp = lamp();
        let link = ResourceLink::create_increment(lamp.clone(), keys().0, "/1/s/levl/v");
        link.invoke(Value::Null).await.unwrap();
        link.invoke(json!(5)).await.unwrap();
        assert_eq!(lamp.value("s/levl/v"), Some(json!(6)));
    }

    #[tokio::test]
    async fn test_toggle_ignores_argument() {
        let lamp = lamp();
        let link = ResourceLink::create_toggle(lamp.clone(), keys().1, "/1/s/onof/v");
        link.invoke(json!(false)).await.unwrap();
        assert_eq!(lamp.value("s/onof/v"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_element_links() {
        let lamp = lamp();
        let insert = ResourceLink::create_insert(lamp.clone(), keys().2, "/1/c/grup/ids");
        let remove = ResourceLink::create_remove(lamp.clone(), keys().2, "/1/c/grup/ids");

        insert.invoke(json!("kitchen")).await.unwrap();
        insert.invoke(json!("hall")).await.unwrap();
        remove.invoke(json!("kitchen")).await.unwrap();
        assert_eq!(lamp.value("c/grup/ids"), Some(json!(["hall"])));

        assert!(matches!(insert.fetch().await, Err(PropertyError::Unsupported(_))));
        assert!(matches!(remove.fetch().await, Err(PropertyError::Unsupported(_))));
        assert!(matches!(insert.invoke(Value::Null).await, Err(PropertyError::InvalidValue(_))));
        assert!(matches!(remove.invoke(Value::Null).await, Err(PropertyError::InvalidValue(_))));
    }

    #[tokio::test]
    async fn test_listener_registration_is_ref_counted() {
        let lamp = lamp();
        let link = ResourceLink::create(lamp.clone(), keys().1, "/1/s/onof/v");
        let (a, b) = (WatcherId::next(), WatcherId::next());

        link.register_listener(a, Arc::new(|_| true));
        link.register_listener(b, Arc::new(|_| true));
        assert_eq!(lamp.listener_count(), 1);

        link.unregister_listener(a);
        assert_eq!(lamp.listener_count(), 1);
        link.unregister_listener(b);
        assert_eq!(lamp.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_element_link_registers_nothing_upstream() {
        let lamp = lamp();
        let link = ResourceLink::create_insert(lamp.clone(), keys().2, "/1/c/grup/ids");
        link.register_listener(WatcherId::next(), Arc::new(|_| true));
        assert_eq!(lamp.listener_count(), 0);
    }
}
