//! Lazy reference-counted observation
//!
//! An [`Observable`] tracks the remote watchers of one resource and attaches
//! to the underlying change stream only while at least one watcher exists.
//! The attach hook runs exactly on the 0→1 transition and the detach hook
//! exactly on the 1→0 transition.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::endpoint::{FunctionalEndpoint, ListenerId};
use crate::key::{PropertyKey, Section};
use crate::nesting::uncollapse_section;

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one watcher of an observable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    pub fn next() -> Self {
        Self(NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives triggered values; returning `false` drops the watcher
pub type Watcher = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct WatchState {
    watchers: HashMap<WatcherId, Watcher>,
    last_value: Option<Value>,
}

/// Reference-counted subscription primitive
///
/// `add_watcher` and `remove_watcher` serialize on a transition lock that is
/// held while the attach/detach hook runs, so two callers can never both
/// observe the same 0→1 or 1→0 transition. Hooks must not call back into the
/// same observable.
pub struct Observable {
    name: String,
    transition: Mutex<()>,
    state: Mutex<WatchState>,
    on_first: Option<Hook>,
    on_last: Option<Hook>,
}

impl Observable {
    /// Create an observable with attach and detach hooks
    pub fn new<F, L>(name: impl Into<String>, on_first: F, on_last: L) -> Self
    where
        F: Fn() + Send + Sync + 'static,
        L: Fn() + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            transition: Mutex::new(()),
            state: Mutex::new(WatchState::default()),
            on_first: Some(Box::new(on_first)),
            on_last: Some(Box::new(on_last)),
        }
    }

    /// Create an observable with no underlying stream
    pub fn detached(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transition: Mutex::new(()),
            state: Mutex::new(WatchState::default()),
            on_first: None,
            on_last: None,
        }
    }

    /// Observe one property of an endpoint
    ///
    /// The endpoint listener is registered on the first watcher and removed
    /// when the last one goes away.
    pub fn for_property(endpoint: Arc<dyn FunctionalEndpoint>, key: PropertyKey) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Observable>| {
            let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
            let name = key.name().to_string();

            let on_first = {
                let endpoint = Arc::clone(&endpoint);
                let slot = Arc::clone(&slot);
                let weak = weak.clone();
                move || {
                    let weak = weak.clone();
                    let id = endpoint.register_property_listener(
                        &key,
                        Arc::new(move |_, value| {
                            if let Some(observable) = weak.upgrade() {
                                observable.trigger(value);
                            }
                        }),
                    );
                    *slot.lock() = Some(id);
                }
            };

            let on_last = move || {
                if let Some(id) = slot.lock().take() {
                    endpoint.unregister_listener(id);
                }
            };

            Observable::new(name, on_first, on_last)
        })
    }

    /// Observe a whole section of an endpoint
    ///
    /// Watchers receive the section re-nested by trait.
    pub fn for_section(endpoint: Arc<dyn FunctionalEndpoint>, section: Section) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Observable>| {
            let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

            let on_first = {
                let endpoint = Arc::clone(&endpoint);
                let slot = Arc::clone(&slot);
                let weak = weak.clone();
                move || {
                    let weak = weak.clone();
                    let id = endpoint.register_section_listener(
                        section,
                        Arc::new(move |section, map| {
                            if let Some(observable) = weak.upgrade() {
                                observable.trigger(&Value::Object(uncollapse_section(map, section)));
                            }
                        }),
                    );
                    *slot.lock() = Some(id);
                }
            };

            let on_last = move || {
                if let Some(id) = slot.lock().take() {
                    endpoint.unregister_listener(id);
                }
            };

            Observable::new(section.tag(), on_first, on_last)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a watcher, attaching on the first one
    ///
    /// Returns `false` if `id` was already watching; the watcher is replaced
    /// and no transition happens.
    pub fn add_watcher(&self, id: WatcherId, watcher: Watcher) -> bool {
        let _transition = self.transition.lock();

        let (was_zero, count) = {
            let mut state = self.state.lock();
            let was_zero = state.watchers.is_empty();
            if state.watchers.insert(id, watcher).is_some() {
                return false;
            }
            (was_zero, state.watchers.len())
        };

        tracing::debug!(
            observable = %self.name,
            "Watcher count: {} -> {}",
            count - 1,
            count
        );

        if was_zero {
            tracing::debug!(observable = %self.name, "Attaching to change stream");
            if let Some(hook) = &self.on_first {
                hook();
            }
        }

        true
    }

    /// Remove a watcher, detaching on the last one
    ///
    /// Removing an unknown watcher is a no-op and returns `false`.
    pub fn remove_watcher(&self, id: WatcherId) -> bool {
        let _transition = self.transition.lock();

        let now_empty = {
            let mut state = self.state.lock();
            if state.watchers.remove(&id).is_none() {
                return false;
            }
            let count = state.watchers.len();
            tracing::debug!(
                observable = %self.name,
                "Watcher count: {} -> {}",
                count + 1,
                count
            );
            if count == 0 {
                state.last_value = None;
            }
            count == 0
        };

        if now_empty {
            tracing::debug!(observable = %self.name, "Detaching from change stream");
            if let Some(hook) = &self.on_last {
                hook();
            }
        }

        true
    }

    /// Fan a new value out to every current watcher
    ///
    /// Without watchers this is a no-op and nothing is cached.
    pub fn trigger(&self, value: &Value) {
        let watchers: Vec<(WatcherId, Watcher)> = {
            let mut state = self.state.lock();
            if state.watchers.is_empty() {
                return;
            }
            state.last_value = Some(value.clone());
            state
                .watchers
                .iter()
                .map(|(id, watcher)| (*id, Arc::clone(watcher)))
                .collect()
        };

        tracing::trace!(observable = %self.name, watchers = watchers.len(), "Triggered");

        let dead: Vec<WatcherId> = watchers
            .into_iter()
            .filter(|(_, watcher)| !watcher(value))
            .map(|(id, _)| id)
            .collect();

        for id in dead {
            self.remove_watcher(id);
        }
    }

    /// Last value triggered while attached
    pub fn cached_value(&self) -> Option<Value> {
        self.state.lock().last_value.clone()
    }

    pub fn watcher_count(&self) -> usize {
        self.state.lock().watchers.len()
    }

    pub fn is_attached(&self) -> bool {
        self.watcher_count() > 0
    }
}

impl Drop for Observable {
    fn drop(&mut self) {
        if !self.state.get_mut().watchers.is_empty() {
            if let Some(hook) = &self.on_last {
                hook();
            }
        }
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("name", &self.name)
            .field("watchers", &self.watcher_count())
            .finish()
    }
}
