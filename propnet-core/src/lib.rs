//! Propnet Core
//!
//! Typed properties of networked devices and the primitives used to expose
//! them as resources.
//!
//! # Features
//!
//! - **Property keys**: `section/trait/prop` names with a typed coercion hint
//! - **Functional endpoints**: Async fetch/mutate contract over named properties
//! - **Local endpoints**: In-memory endpoints with validation, listeners and persistence
//! - **Observables**: Lazy, reference-counted attachment to change streams
//! - **Resource links**: One property, one mutation semantic
//! - **Transforms**: Small postfix expressions for rewriting forwarded values
//!
//! # Architecture
//!
//! ```text
//! PropertyKey ──► FunctionalEndpoint ◄── LocalEndpoint
//!                     │       │
//!                     ▼       ▼
//!              ResourceLink  Observable ──► watchers
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use propnet_core::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let on_off = PropertyKey::new(Section::State, "onof", "v", ValueType::Bool);
//! let lamp = Arc::new(LocalEndpoint::new("lamp", [PropertySpec::new(on_off.clone())]));
//!
//! let toggle = ResourceLink::create_toggle(lamp.clone(), on_off.clone(), "/1/s/onof/v");
//! toggle.invoke(serde_json::Value::Null).await.unwrap();
//!
//! assert_eq!(lamp.fetch_property(&on_off).await.unwrap(), json!(true));
//! # });
//! ```

// Core modules
pub mod endpoint;
pub mod key;
pub mod link;
pub mod local;
pub mod nesting;
pub mod observable;
pub mod transform;

// Configuration
pub mod config;

// Error types
pub mod error;

// Logging infrastructure
pub mod logging;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{ConfigError, ResourceConfig};
pub use endpoint::{FunctionalEndpoint, ListenerId, PropertyListener, PropertyMap, SectionListener};
pub use error::{PropertyError, Result};
pub use key::{PropertyKey, Section, ValueType};
pub use link::{Mutation, ResourceLink};
pub use local::{Access, LocalEndpoint, PropertySpec};
pub use nesting::{collapse_section, uncollapse_section};
pub use observable::{Observable, Watcher, WatcherId};
pub use transform::{Transform, TransformError};

pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};

// ============================================================================
// Prelude
// ============================================================================

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::endpoint::{FunctionalEndpoint, PropertyMap};
    pub use crate::error::PropertyError;
    pub use crate::key::{PropertyKey, Section, ValueType};
    pub use crate::link::{Mutation, ResourceLink};
    pub use crate::local::{LocalEndpoint, PropertySpec};
    pub use crate::observable::{Observable, WatcherId};
}
