//! Contract for objects whose state can be persisted
//!
//! A `Persistable` exports its durable state as a flat blob, accepts a blob to
//! restore from, and reports when its durable state changed so the owning
//! store can take a fresh snapshot.

use std::sync::Arc;

/// A persisted state blob: string keys to arbitrary JSON-shaped values
pub type StateBlob = serde_json::Map<String, serde_json::Value>;

/// Callback invoked when persistent state changed
pub type PersistListener = Arc<dyn Fn() + Send + Sync>;

/// An object whose durable state can be copied out and restored
///
/// Implementations must be:
/// - Send + Sync: snapshots may be taken from any thread
/// - Cheap to snapshot: `copy_persistent_state` is called on every change
///
/// `init_with_persistent_state` is a trusted restore path. Values in the blob
/// were validated when they were first written, so implementations apply them
/// without re-running user-facing validation.
pub trait Persistable: Send + Sync {
    /// Copy the current durable state
    fn copy_persistent_state(&self) -> StateBlob;

    /// Restore durable state from a previously copied blob
    fn init_with_persistent_state(&self, state: &StateBlob);

    /// Install (or clear) the listener notified when durable state changes
    fn set_persistent_state_listener(&self, listener: Option<PersistListener>);
}
