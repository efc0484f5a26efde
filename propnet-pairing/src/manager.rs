//! Pairing lifecycle and persistence
//!
//! `PairingManager` owns every live pairing of one parent endpoint. It
//! allocates child ids, keeps the id ↔ pairing maps bijective, rolls back
//! failed creations, and mediates persistence through a nested state store.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use persist_store::{NestedStateStore, PersistListener, Persistable, StateBlob};
use propnet_core::{FunctionalEndpoint, PropertyError};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::args::CreateArgs;
use crate::error::{PairingError, Result};
use crate::pairing::{LocatorResolver, Pairing};

/// Capacity of the child event channel
const EVENT_CAPACITY: usize = 64;

/// Notification that the set of children changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    Added(String),
    Removed(String),
}

/// Id ↔ pairing maps and the id counter, always mutated together
struct Registry {
    by_id: HashMap<String, Arc<Pairing>>,
    /// Pairing instance id -> child id
    ids: HashMap<u64, String>,
    next_id: u64,
}

impl Registry {
    fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            ids: HashMap::new(),
            next_id: 1,
        }
    }

    /// Scan forward from the counter, skipping ids still mapped
    fn allocate_id(&mut self) -> String {
        loop {
            let id = self.next_id.to_string();
            self.next_id += 1;
            if !self.by_id.contains_key(&id) {
                return id;
            }
        }
    }

    fn insert(&mut self, id: String, pairing: Arc<Pairing>) {
        self.ids.insert(pairing.instance_id(), id.clone());
        self.by_id.insert(id, pairing);
    }

    fn remove(&mut self, pairing: &Pairing) -> Option<String> {
        let id = self.ids.remove(&pairing.instance_id())?;
        self.by_id.remove(&id);
        Some(id)
    }
}

/// Owner of a dynamic, persisted set of pairings
///
/// # Example
///
/// ```rust
/// use propnet_pairing::{CreateArgs, PairingManager};
///
/// # tokio_test::block_on(async {
/// let manager = PairingManager::new("local");
///
/// let (id, pairing) = manager
///     .create(CreateArgs::new().source("/1/s/onof/v").destination("/2/s/onof/v"))
///     .await
///     .unwrap();
/// assert_eq!(id, "1");
/// assert_eq!(pairing.source().as_deref(), Some("/1/s/onof/v"));
///
/// assert!(manager.delete(&pairing));
/// assert!(manager.child("1").is_none());
/// # });
/// ```
pub struct PairingManager {
    technology: String,
    registry: Mutex<Registry>,
    store: NestedStateStore,
    events: broadcast::Sender<ChildEvent>,
    resolver: Option<Arc<dyn LocatorResolver>>,
    runtime: Option<Handle>,
    interrupted: AtomicBool,
}

impl PairingManager {
    /// Create a manager for pairings of the given technology
    ///
    /// Forwarding tasks are spawned on the runtime current at construction,
    /// if any.
    pub fn new(technology: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            technology: technology.into(),
            registry: Mutex::new(Registry::new()),
            store: NestedStateStore::new(),
            events,
            resolver: None,
            runtime: Handle::try_current().ok(),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Resolve pairing locators with `resolver` so pairings can forward
    pub fn with_resolver(mut self, resolver: Arc<dyn LocatorResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Spawn forwarding tasks on `runtime`
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn technology(&self) -> &str {
        &self.technology
    }

    /// Subscribe to child added/removed events
    pub fn subscribe(&self) -> broadcast::Receiver<ChildEvent> {
        self.events.subscribe()
    }

    /// Create and configure a new pairing
    ///
    /// Arguments are applied one at a time in [`Param`](crate::Param) order.
    /// If any of them fails, or the manager is interrupted meanwhile, the
    /// pairing is deleted before the error is returned, so a half-configured
    /// pairing never stays reachable.
    pub async fn create(&self, args: CreateArgs) -> Result<(String, Arc<Pairing>)> {
        let (id, pairing) = {
            let mut registry = self.registry.lock();
            let id = registry.allocate_id();
            let pairing = self.new_pairing();
            registry.insert(id.clone(), Arc::clone(&pairing));
            (id, pairing)
        };
        self.attach(&id, &pairing);

        for (param, value) in args.iter() {
            let applied = if self.is_interrupted() {
                Err(PropertyError::Interrupted)
            } else {
                pairing.set_property(&param.key(), value.clone()).await
            };
            if let Err(err) = applied {
                tracing::debug!(id = %id, param = %param, "Rolling back pairing: {}", err);
                self.delete(&pairing);

                return Err(match err {
                    PropertyError::Interrupted => PairingError::Interrupted,
                    err => PairingError::InvalidArguments {
                        param: param.name().to_string(),
                        message: err.to_string(),
                    },
                });
            }
        }

        if self.is_interrupted() {
            tracing::debug!(id = %id, "Rolling back interrupted pairing");
            self.delete(&pairing);
            return Err(PairingError::Interrupted);
        }

        tracing::info!(id = %id, technology = %self.technology, "Pairing created");
        Ok((id, pairing))
    }

    /// Stop creating pairings
    ///
    /// Creations in progress roll back and every later one fails, both with
    /// [`PairingError::Interrupted`]. Live pairings are left alone.
    pub fn interrupt(&self) {
        if !self.interrupted.swap(true, Ordering::SeqCst) {
            tracing::info!(technology = %self.technology, "Pairing creation interrupted");
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Delete a pairing
    ///
    /// The pairing is disabled before it is unlinked so forwarding stops
    /// first. Returns `false` if it is not a live child of this manager.
    pub fn delete(&self, pairing: &Arc<Pairing>) -> bool {
        if self.id_of(pairing).is_none() {
            return false;
        }

        pairing.disable();

        let Some(id) = self.registry.lock().remove(pairing) else {
            return false;
        };

        pairing.detach();
        self.store.stop_managing(&id);
        self.store.reset(&id);

        tracing::info!(id = %id, "Pairing deleted");
        let _ = self.events.send(ChildEvent::Removed(id));
        true
    }

    /// Delete the pairing under `id`
    pub fn delete_id(&self, id: &str) -> bool {
        match self.child(id) {
            Some(pairing) => self.delete(&pairing),
            None => false,
        }
    }

    pub fn child(&self, id: &str) -> Option<Arc<Pairing>> {
        self.registry.lock().by_id.get(id).cloned()
    }

    /// Child id of a pairing, if it is live
    pub fn id_of(&self, pairing: &Pairing) -> Option<String> {
        self.registry.lock().ids.get(&pairing.instance_id()).cloned()
    }

    /// Ids of all live children, in numeric order
    pub fn child_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.lock().by_id.keys().cloned().collect();
        ids.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        ids
    }

    pub fn len(&self) -> usize {
        self.registry.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persisted blob of one child
    pub fn persisted_state(&self, id: &str) -> Result<StateBlob> {
        Ok(self.store.state_for(id)?)
    }

    fn new_pairing(&self) -> Arc<Pairing> {
        Pairing::new(&self.technology, self.resolver.clone(), self.runtime.clone())
    }

    /// Put a freshly mapped pairing under persistence and announce it
    fn attach(&self, id: &str, pairing: &Arc<Pairing>) {
        self.store
            .start_managing(id, Arc::clone(pairing) as Arc<dyn Persistable>);
        let _ = self.events.send(ChildEvent::Added(id.to_string()));
    }

    /// Recreate a child from persisted state without argument validation
    fn restore_child(&self, id: &str) {
        let pairing = self.new_pairing();
        self.registry.lock().insert(id.to_string(), Arc::clone(&pairing));

        self.attach(id, &pairing);
        tracing::debug!(id = %id, "Pairing restored");
    }
}

impl Persistable for PairingManager {
    fn copy_persistent_state(&self) -> StateBlob {
        self.store.copy_state()
    }

    fn init_with_persistent_state(&self, state: &StateBlob) {
        let children: Vec<&String> = state
            .iter()
            .filter(|(_, entry)| entry.is_object())
            .map(|(id, _)| id)
            .collect();

        // A live child under a restored id is replaced, not merged
        for id in &children {
            if let Some(live) = self.child(id) {
                tracing::debug!(id = %id, "Replacing live pairing with persisted state");
                self.delete(&live);
            }
        }

        self.store.init_with_state(state);
        for id in children {
            self.restore_child(id);
        }
    }

    fn set_persistent_state_listener(&self, listener: Option<PersistListener>) {
        self.store.set_change_listener(listener);
    }
}

impl fmt::Debug for PairingManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingManager")
            .field("technology", &self.technology)
            .field("children", &self.child_ids())
            .finish()
    }
}
