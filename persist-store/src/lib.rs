//! Nested Persistent State Store
//!
//! A small, hierarchical blob store that keeps the durable state of a set of
//! child objects under string ids and reports when any of it changes.
//!
//! # Features
//!
//! - **Managed children**: Register any [`Persistable`] under an id; its state is
//!   snapshotted whenever it reports a change
//! - **Restore before live**: A child that starts being managed is initialized
//!   from the previously stored blob for its id before anything else sees it
//! - **Nested export**: `copy_state()` returns `{ id → { ...child state... } }`
//! - **Change notification**: A single store-level listener fires on every change
//!
//! # Quick Start
//!
//! ```rust
//! use persist_store::{NestedStateStore, Persistable, PersistListener, StateBlob};
//! use serde_json::json;
//! use std::sync::Mutex;
//!
//! struct Counter(Mutex<i64>);
//!
//! impl Persistable for Counter {
//!     fn copy_persistent_state(&self) -> StateBlob {
//!         let mut blob = StateBlob::new();
//!         blob.insert("n".into(), json!(*self.0.lock().unwrap()));
//!         blob
//!     }
//!
//!     fn init_with_persistent_state(&self, state: &StateBlob) {
//!         if let Some(n) = state.get("n").and_then(|v| v.as_i64()) {
//!             *self.0.lock().unwrap() = n;
//!         }
//!     }
//!
//!     fn set_persistent_state_listener(&self, _listener: Option<PersistListener>) {}
//! }
//!
//! let store = NestedStateStore::new();
//! store.start_managing("1", std::sync::Arc::new(Counter(Mutex::new(7))));
//!
//! let state = store.copy_state();
//! assert_eq!(state["1"]["n"], json!(7));
//! ```
//!
//! # Architecture
//!
//! ```text
//! NestedStateStore
//!     │
//!     ├── managed: HashMap<id, Arc<dyn Persistable>>
//!     │
//!     ├── stored:  { id → StateBlob }   (last snapshot / restored blobs)
//!     │
//!     └── listener: Option<PersistListener>
//! ```

pub mod error;
pub mod persistable;
pub mod store;

pub use error::{Result, StoreError};
pub use persistable::{PersistListener, Persistable, StateBlob};
pub use store::NestedStateStore;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::persistable::{PersistListener, Persistable, StateBlob};
    pub use crate::store::NestedStateStore;
}
