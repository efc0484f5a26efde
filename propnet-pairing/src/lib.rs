//! # Propnet Pairing
//!
//! Automation pairings: persisted, addressable bindings that forward a value
//! from a source property to a destination property.
//!
//! ## Key Features
//!
//! - **All-or-nothing creation**: Arguments are applied in a fixed order and any
//!   failure rolls the new pairing back
//! - **Bijective bookkeeping**: Child ids and pairings are mapped both ways under one lock
//! - **Id allocation**: Ids count up from 1 and skip any id still mapped
//! - **Persistence**: Each pairing's configuration lives in a nested state store
//!   and is recreated on restore without re-validation
//! - **Forwarding**: Enabled pairings forward changes through resource links,
//!   with optional transforms in each direction
//!
//! ## Usage
//!
//! ```rust,ignore
//! use propnet_pairing::{CreateArgs, PairingManager, StaticResolver};
//!
//! let manager = PairingManager::new("local").with_resolver(resolver);
//!
//! let (id, pairing) = manager
//!     .create(
//!         CreateArgs::new()
//!             .source("/1/s/levl/v")
//!             .destination("/2/s/levl/v")
//!             .push(true)
//!             .enabled(true),
//!     )
//!     .await?;
//!
//! // Persist
//! let blob = manager.copy_persistent_state();
//!
//! // Later
//! manager.delete(&pairing);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! PairingManager
//!     │
//!     ├── Registry (one mutex)
//!     │     ├── by_id: id → Pairing
//!     │     ├── ids:   Pairing → id
//!     │     └── next_id
//!     │
//!     ├── NestedStateStore: id → persisted pairing config
//!     │
//!     └── broadcast<ChildEvent>
//!
//! Pairing (LocalEndpoint with the pairing schema)
//!     └── Binding: watchers on resolved source/destination links
//! ```

pub mod args;
pub mod error;
pub mod manager;
pub mod pairing;

pub use args::{CreateArgs, Param};
pub use error::{PairingError, Result};
pub use manager::{ChildEvent, PairingManager};
pub use pairing::{schema, LocatorResolver, Pairing, StaticResolver};
