//! Hierarchical persistent state storage
//!
//! This module provides `NestedStateStore`, which keeps one state blob per
//! managed child id and refreshes it whenever the child reports a change.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::persistable::{PersistListener, Persistable, StateBlob};

// ============================================================================
// Inner state
// ============================================================================

#[derive(Default)]
struct Inner {
    /// Live children: id -> persistable
    managed: HashMap<String, Arc<dyn Persistable>>,

    /// Last known blob for every id, live or not: id -> Value::Object
    stored: StateBlob,
}

// ============================================================================
// NestedStateStore
// ============================================================================

/// Hierarchical blob store with change notification
///
/// Children are registered with [`start_managing`](Self::start_managing) and
/// keyed by a string id. The store snapshots a child's state whenever the
/// child reports a change, and exposes the whole tree through
/// [`copy_state`](Self::copy_state) as `{ id → blob }`.
///
/// Blobs outlive their children: after [`stop_managing`](Self::stop_managing)
/// the last snapshot is retained until [`reset`](Self::reset) discards it.
///
/// Cloning the store is cheap and clones share the same state.
///
/// # Example
///
/// ```rust,ignore
/// let store = NestedStateStore::new();
/// store.set_change_listener(Some(Arc::new(|| println!("state changed"))));
///
/// store.start_managing("3", pairing.clone());
/// let snapshot = store.copy_state();
///
/// // later, in a fresh process
/// let restored = NestedStateStore::new();
/// restored.init_with_state(&snapshot);
/// ```
#[derive(Clone, Default)]
pub struct NestedStateStore {
    inner: Arc<RwLock<Inner>>,

    /// Store-level change listener
    listener: Arc<RwLock<Option<PersistListener>>>,
}

impl NestedStateStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Start managing `child` under `id`
    ///
    /// If a blob was previously stored for `id`, the child is initialized
    /// from it before its change listener is installed. A child already
    /// managed under the same id is replaced and detached.
    pub fn start_managing(&self, id: impl Into<String>, child: Arc<dyn Persistable>) {
        let id = id.into();

        let previous = self
            .inner
            .read()
            .ok()
            .and_then(|inner| inner.stored.get(&id).and_then(Value::as_object).cloned());

        if let Some(state) = previous {
            tracing::debug!(id = %id, keys = state.len(), "Restoring managed state");
            child.init_with_persistent_state(&state);
        }

        child.set_persistent_state_listener(Some(self.child_listener(&id)));

        let replaced = match self.inner.write() {
            Ok(mut inner) => inner.managed.insert(id.clone(), child),
            Err(_) => return,
        };

        if let Some(old) = replaced {
            tracing::debug!(id = %id, "Replaced previously managed state");
            old.set_persistent_state_listener(None);
        }
    }

    /// Stop managing the child under `id`
    ///
    /// Takes a final snapshot of the child and detaches its listener.
    /// Returns `false` if nothing was managed under `id`.
    pub fn stop_managing(&self, id: &str) -> bool {
        let child = match self.inner.write() {
            Ok(mut inner) => inner.managed.remove(id),
            Err(_) => None,
        };

        let Some(child) = child else {
            return false;
        };

        child.set_persistent_state_listener(None);
        let snapshot = child.copy_persistent_state();

        if let Ok(mut inner) = self.inner.write() {
            inner.stored.insert(id.to_string(), Value::Object(snapshot));
        }

        true
    }

    /// Discard the stored blob for `id`
    ///
    /// Returns `true` if a blob existed. Fires the change listener when
    /// something was removed.
    pub fn reset(&self, id: &str) -> bool {
        let removed = self
            .inner
            .write()
            .map(|mut inner| inner.stored.remove(id).is_some())
            .unwrap_or(false);

        if removed {
            self.notify();
        }

        removed
    }

    /// Copy the complete nested state, refreshing every live child first
    pub fn copy_state(&self) -> StateBlob {
        let children: Vec<(String, Arc<dyn Persistable>)> = self
            .inner
            .read()
            .map(|inner| {
                inner
                    .managed
                    .iter()
                    .map(|(id, child)| (id.clone(), Arc::clone(child)))
                    .collect()
            })
            .unwrap_or_default();

        let snapshots: Vec<(String, StateBlob)> = children
            .into_iter()
            .map(|(id, child)| (id, child.copy_persistent_state()))
            .collect();

        match self.inner.write() {
            Ok(mut inner) => {
                for (id, snapshot) in snapshots {
                    inner.stored.insert(id, Value::Object(snapshot));
                }
                inner.stored.clone()
            }
            Err(_) => StateBlob::new(),
        }
    }

    /// Replace the stored tree with `state`
    ///
    /// Children that are already managed and have an entry in `state` are
    /// re-initialized from it.
    pub fn init_with_state(&self, state: &StateBlob) {
        let children: Vec<(Arc<dyn Persistable>, StateBlob)> = match self.inner.write() {
            Ok(mut inner) => {
                inner.stored = state.clone();
                inner
                    .managed
                    .iter()
                    .filter_map(|(id, child)| {
                        state
                            .get(id)
                            .and_then(Value::as_object)
                            .map(|blob| (Arc::clone(child), blob.clone()))
                    })
                    .collect()
            }
            Err(_) => return,
        };

        for (child, blob) in children {
            child.init_with_persistent_state(&blob);
        }
    }

    /// Install (or clear) the store-level change listener
    pub fn set_change_listener(&self, listener: Option<PersistListener>) {
        if let Ok(mut slot) = self.listener.write() {
            *slot = listener;
        }
    }

    /// Get the stored blob for a single id
    pub fn state_for(&self, id: &str) -> Result<StateBlob> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        inner
            .stored
            .get(id)
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| StoreError::NotManaged(id.to_string()))
    }

    /// Check whether a child is currently managed under `id`
    pub fn is_managed(&self, id: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.managed.contains_key(id))
            .unwrap_or(false)
    }

    /// Get all ids with a live child
    pub fn managed_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .map(|inner| inner.managed.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Build the listener installed on a managed child
    fn child_listener(&self, id: &str) -> PersistListener {
        let inner: Weak<RwLock<Inner>> = Arc::downgrade(&self.inner);
        let listener = Arc::clone(&self.listener);
        let id = id.to_string();

        Arc::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };

            let child = match inner.read() {
                Ok(guard) => guard.managed.get(&id).cloned(),
                Err(_) => return,
            };

            if let Some(child) = child {
                let snapshot = child.copy_persistent_state();
                if let Ok(mut guard) = inner.write() {
                    guard.stored.insert(id.clone(), Value::Object(snapshot));
                }
            }

            notify_listener(&listener);
        })
    }

    fn notify(&self) {
        notify_listener(&self.listener);
    }
}

fn notify_listener(listener: &RwLock<Option<PersistListener>>) {
    let callback = listener.read().ok().and_then(|slot| slot.clone());
    if let Some(callback) = callback {
        callback();
    }
}

impl std::fmt::Debug for NestedStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedStateStore")
            .field("managed", &self.managed_ids())
            .finish()
    }
}
