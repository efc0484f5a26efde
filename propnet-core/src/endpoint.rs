//! The functional endpoint contract
//!
//! A functional endpoint is the device abstraction everything else talks to:
//! asynchronous fetch and mutate operations over named properties, partitioned
//! into sections, plus synchronous change-listener registration.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::key::{PropertyKey, Section};

/// Flat property map keyed by full name (`section/trait/prop`)
pub type PropertyMap = BTreeMap<String, Value>;

/// Callback invoked with a property's new value
pub type PropertyListener = Arc<dyn Fn(&PropertyKey, &Value) + Send + Sync>;

/// Callback invoked with the full contents of a section after it changed
pub type SectionListener = Arc<dyn Fn(Section, &PropertyMap) + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by listener registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocate a process-unique listener id
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Asynchronous property operations of a single device or child object
///
/// All mutating operations resolve once the change has been applied. Listener
/// callbacks run synchronously on whichever task applied the change and must
/// not block.
#[async_trait]
pub trait FunctionalEndpoint: Send + Sync {
    /// Look up the typed key for a full property name
    fn property_key(&self, name: &str) -> Option<PropertyKey>;

    /// Fetch every set property of a section as a flat map
    async fn fetch_section(&self, section: Section) -> Result<PropertyMap>;

    /// Fetch a single property value
    async fn fetch_property(&self, key: &PropertyKey) -> Result<Value>;

    /// Apply a flat map of property changes
    ///
    /// The whole map is validated before anything is written.
    async fn apply_properties(&self, properties: PropertyMap) -> Result<()>;

    /// Set a single property
    async fn set_property(&self, key: &PropertyKey, value: Value) -> Result<()> {
        let mut properties = PropertyMap::new();
        properties.insert(key.name().to_string(), value);
        self.apply_properties(properties).await
    }

    /// Add `delta` to a numeric property
    async fn increment_property(&self, key: &PropertyKey, delta: Value) -> Result<()>;

    /// Flip a boolean property
    async fn toggle_property(&self, key: &PropertyKey) -> Result<()>;

    /// Insert an element into a collection-valued property
    async fn add_value_to_property(&self, key: &PropertyKey, value: Value) -> Result<()>;

    /// Remove an element from a collection-valued property
    async fn remove_value_from_property(&self, key: &PropertyKey, value: Value) -> Result<()>;

    /// Register for changes of a single property
    fn register_property_listener(&self, key: &PropertyKey, listener: PropertyListener)
        -> ListenerId;

    /// Register for changes of any property in a section
    fn register_section_listener(&self, section: Section, listener: SectionListener)
        -> ListenerId;

    /// Unregister a property or section listener
    ///
    /// Returns `false` if the id was not registered.
    fn unregister_listener(&self, id: ListenerId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_ids_are_unique() {
        let a = ListenerId::next();
        let b = ListenerId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }
}
