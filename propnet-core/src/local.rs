//! In-memory functional endpoint
//!
//! `LocalEndpoint` keeps every property in process memory and implements the
//! full [`FunctionalEndpoint`] contract: type coercion, read-only enforcement,
//! increment/toggle/insert/remove mutators, property and section listeners, and
//! [`Persistable`] over the properties marked persistent.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use persist_store::{PersistListener, Persistable, StateBlob};
use serde_json::{Number, Value};

use crate::endpoint::{
    FunctionalEndpoint, ListenerId, PropertyListener, PropertyMap, SectionListener,
};
use crate::error::{PropertyError, Result};
use crate::key::{PropertyKey, Section, ValueType};

/// Whether a property accepts writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Declaration of one property of a [`LocalEndpoint`]
#[derive(Debug, Clone)]
pub struct PropertySpec {
    key: PropertyKey,
    access: Access,
    default: Value,
    persistent: bool,
}

impl PropertySpec {
    /// A writable, non-persistent property that starts unset
    pub fn new(key: PropertyKey) -> Self {
        Self {
            key,
            access: Access::ReadWrite,
            default: Value::Null,
            persistent: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = value;
        self
    }

    /// Include this property in persisted state
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

struct Slot {
    spec: PropertySpec,
    value: Value,
}

#[derive(Default)]
struct Listeners {
    property: HashMap<ListenerId, (String, PropertyListener)>,
    section: HashMap<ListenerId, (Section, SectionListener)>,
}

/// Values actually changed by a single write
#[derive(Default)]
struct Changes {
    values: Vec<(PropertyKey, Value)>,
    persistent: bool,
}

/// A functional endpoint whose properties live in memory
///
/// # Example
///
/// ```rust
/// use propnet_core::{FunctionalEndpoint, LocalEndpoint, PropertyKey, PropertySpec, Section, ValueType};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let level = PropertyKey::new(Section::State, "levl", "v", ValueType::Number);
/// let endpoint = LocalEndpoint::new("lamp", [PropertySpec::new(level.clone()).with_default(json!(0))]);
///
/// endpoint.increment_property(&level, json!(0.25)).await.unwrap();
/// assert_eq!(endpoint.fetch_property(&level).await.unwrap(), json!(0.25));
/// # });
/// ```
pub struct LocalEndpoint {
    name: String,
    slots: RwLock<BTreeMap<String, Slot>>,
    listeners: Mutex<Listeners>,
    persist_listener: Mutex<Option<PersistListener>>,
}

impl LocalEndpoint {
    /// Create an endpoint exposing exactly the given properties
    pub fn new(name: impl Into<String>, specs: impl IntoIterator<Item = PropertySpec>) -> Self {
        let slots = specs
            .into_iter()
            .map(|spec| {
                let value = spec.default.clone();
                (spec.key.name().to_string(), Slot { spec, value })
            })
            .collect();

        Self {
            name: name.into(),
            slots: RwLock::new(slots),
            listeners: Mutex::new(Listeners::default()),
            persist_listener: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All declared property keys
    pub fn keys(&self) -> Vec<PropertyKey> {
        self.slots
            .read()
            .values()
            .map(|slot| slot.spec.key.clone())
            .collect()
    }

    /// Current value of a property, synchronously
    pub fn value(&self, name: &str) -> Option<Value> {
        self.slots.read().get(name).map(|slot| slot.value.clone())
    }

    /// Number of registered property and section listeners
    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.lock();
        listeners.property.len() + listeners.section.len()
    }

    /// Validate and apply a flat map synchronously
    ///
    /// This is what [`FunctionalEndpoint::apply_properties`] resolves to; it is
    /// exposed for callers that cannot await, such as teardown paths.
    pub fn apply_now(&self, properties: PropertyMap) -> Result<()> {
        let changes = {
            let mut slots = self.slots.write();
            let values = Self::validate(&slots, &properties)?;
            Self::write(&mut slots, values)
        };

        self.notify(changes, true);
        Ok(())
    }

    fn validate(slots: &BTreeMap<String, Slot>, properties: &PropertyMap) -> Result<Vec<(String, Value)>> {
        properties
            .iter()
            .map(|(name, value)| {
                let slot = slots
                    .get(name)
                    .ok_or_else(|| PropertyError::NotFound(name.clone()))?;
                if slot.spec.access == Access::ReadOnly {
                    return Err(PropertyError::ReadOnly(name.clone()));
                }
                Ok((name.clone(), slot.spec.key.coerce(value)?))
            })
            .collect()
    }

    fn write(slots: &mut BTreeMap<String, Slot>, values: Vec<(String, Value)>) -> Changes {
        let mut changes = Changes::default();

        for (name, value) in values {
            let Some(slot) = slots.get_mut(&name) else {
                continue;
            };
            if slot.value == value {
                continue;
            }
            slot.value = value.clone();
            changes.persistent |= slot.spec.persistent;
            changes.values.push((slot.spec.key.clone(), value));
        }

        changes
    }

    /// Read-modify-write a single property under the write lock
    fn mutate<F>(&self, key: &PropertyKey, f: F) -> Result<()>
    where
        F: FnOnce(&PropertyKey, &Value) -> Result<Value>,
    {
        let changes = {
            let mut slots = self.slots.write();
            let next = {
                let slot = slots
                    .get(key.name())
                    .ok_or_else(|| PropertyError::NotFound(key.name().to_string()))?;
                if slot.spec.access == Access::ReadOnly {
                    return Err(PropertyError::ReadOnly(key.name().to_string()));
                }
                let next = f(&slot.spec.key, &slot.value)?;
                slot.spec.key.coerce(&next)?
            };
            Self::write(&mut slots, vec![(key.name().to_string(), next)])
        };

        self.notify(changes, true);
        Ok(())
    }

    fn section_map(&self, section: Section) -> PropertyMap {
        self.slots
            .read()
            .iter()
            .filter(|(name, slot)| section.contains(name) && !slot.value.is_null())
            .map(|(name, slot)| (name.clone(), slot.value.clone()))
            .collect()
    }

    /// Deliver change notifications outside of every lock
    fn notify(&self, changes: Changes, persist: bool) {
        if changes.values.is_empty() {
            return;
        }

        tracing::trace!(
            endpoint = %self.name,
            changed = changes.values.len(),
            "Properties changed"
        );

        let (property, section): (Vec<_>, Vec<_>) = {
            let listeners = self.listeners.lock();
            (
                listeners.property.values().cloned().collect(),
                listeners.section.values().cloned().collect(),
            )
        };

        for (key, value) in &changes.values {
            for (name, listener) in &property {
                if name == key.name() {
                    listener(key, value);
                }
            }
        }

        for touched in Section::ALL {
            let interested: Vec<&SectionListener> = section
                .iter()
                .filter(|(s, _)| *s == touched)
                .map(|(_, listener)| listener)
                .collect();
            if interested.is_empty() || !changes.values.iter().any(|(k, _)| k.section() == Some(touched)) {
                continue;
            }
            let map = self.section_map(touched);
            for listener in interested {
                listener(touched, &map);
            }
        }

        if persist && changes.persistent {
            let listener = self.persist_listener.lock().clone();
            if let Some(listener) = listener {
                listener();
            }
        }
    }
}

fn increment_value(key: &PropertyKey, current: &Value, delta: &Value) -> Result<Value> {
    if !key.value_type().is_numeric() {
        return Err(PropertyError::Unsupported(format!("{key} cannot be incremented")));
    }
    if !delta.is_number() {
        return Err(PropertyError::InvalidValue(format!(
            "Increment value for {key} is not a number"
        )));
    }

    let zero = Value::from(0);
    let current = if current.is_null() { &zero } else { current };

    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        return a
            .checked_add(b)
            .map(Value::from)
            .ok_or_else(|| PropertyError::InvalidValue(format!("{key} overflowed")));
    }

    match (current.as_f64(), delta.as_f64()) {
        (Some(a), Some(b)) => Number::from_f64(a + b)
            .map(Value::Number)
            .ok_or_else(|| PropertyError::InvalidValue(format!("{key} is not finite"))),
        _ => Err(PropertyError::TypeMismatch {
            key: key.name().to_string(),
            expected: ValueType::Number,
        }),
    }
}

fn toggle_value(key: &PropertyKey, current: &Value) -> Result<Value> {
    match current {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        Value::Null => Ok(Value::Bool(true)),
        _ => Err(PropertyError::TypeMismatch {
            key: key.name().to_string(),
            expected: ValueType::Bool,
        }),
    }
}

fn collection_of(key: &PropertyKey, current: &Value) -> Result<Vec<Value>> {
    if !matches!(key.value_type(), ValueType::Array | ValueType::Any) {
        return Err(PropertyError::Unsupported(format!("{key} is not a collection")));
    }
    match current {
        Value::Array(items) => Ok(items.clone()),
        Value::Null => Ok(Vec::new()),
        _ => Err(PropertyError::TypeMismatch {
            key: key.name().to_string(),
            expected: ValueType::Array,
        }),
    }
}

#[async_trait]
impl FunctionalEndpoint for LocalEndpoint {
    fn property_key(&self, name: &str) -> Option<PropertyKey> {
        self.slots.read().get(name).map(|slot| slot.spec.key.clone())
    }

    async fn fetch_section(&self, section: Section) -> Result<PropertyMap> {
        Ok(self.section_map(section))
    }

    async fn fetch_property(&self, key: &PropertyKey) -> Result<Value> {
        self.value(key.name())
            .ok_or_else(|| PropertyError::NotFound(key.name().to_string()))
    }

    async fn apply_properties(&self, properties: PropertyMap) -> Result<()> {
        self.apply_now(properties)
    }

    async fn increment_property(&self, key: &PropertyKey, delta: Value) -> Result<()> {
        self.mutate(key, |key, current| increment_value(key, current, &delta))
    }

    async fn toggle_property(&self, key: &PropertyKey) -> Result<()> {
        self.mutate(key, toggle_value)
    }

    async fn add_value_to_property(&self, key: &PropertyKey, value: Value) -> Result<()> {
        self.mutate(key, |key, current| {
            let mut items = collection_of(key, current)?;
            if !items.contains(&value) {
                items.push(value);
            }
            Ok(Value::Array(items))
        })
    }

    async fn remove_value_from_property(&self, key: &PropertyKey, value: Value) -> Result<()> {
        self.mutate(key, |key, current| {
            if current.is_null() {
                return Ok(Value::Null);
            }
            let mut items = collection_of(key, current)?;
            items.retain(|item| item != &value);
            Ok(Value::Array(items))
        })
    }

    fn register_property_listener(&self, key: &PropertyKey, listener: PropertyListener) -> ListenerId {
        let id = ListenerId::next();
        self.listeners
            .lock()
            .property
            .insert(id, (key.name().to_string(), listener));
        id
    }

    fn register_section_listener(&self, section: Section, listener: SectionListener) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.lock().section.insert(id, (section, listener));
        id
    }

    fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        listeners.property.remove(&id).is_some() || listeners.section.remove(&id).is_some()
    }
}

impl Persistable for LocalEndpoint {
    fn copy_persistent_state(&self) -> StateBlob {
        self.slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.spec.persistent && !slot.value.is_null())
            .map(|(name, slot)| (name.clone(), slot.value.clone()))
            .collect()
    }

    fn init_with_persistent_state(&self, state: &StateBlob) {
        let changes = {
            let mut slots = self.slots.write();
            let values: Vec<(String, Value)> = state
                .iter()
                .filter(|(name, _)| slots.get(*name).map_or(false, |slot| slot.spec.persistent))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            Self::write(&mut slots, values)
        };

        // Restoring is not a change worth persisting again
        self.notify(changes, false);
    }

    fn set_persistent_state_listener(&self, listener: Option<PersistListener>) {
        *self.persist_listener.lock() = listener;
    }
}

impl fmt::Debug for LocalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEndpoint")
            .field("name", &self.name)
            .field("properties", &self.slots.read().len())
            .finish()
    }
}
