//! # Propnet Resource
//!
//! Serves functional endpoints as addressable resources: one resource per
//! section, with content negotiation, query directives for writes and lazy
//! observation.
//!
//! ```rust
//! use std::sync::Arc;
//! use propnet_core::{LocalEndpoint, PropertyKey, PropertySpec, ResourceConfig, Section, ValueType};
//! use propnet_resource::{Code, EndpointResource, InboundRequest, Method, Resource};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let level = PropertyKey::new(Section::State, "levl", "v", ValueType::Number);
//! let lamp = Arc::new(LocalEndpoint::new("lamp", [PropertySpec::new(level).with_default(json!(0))]));
//! let resource = EndpointResource::new(lamp, Arc::new(ResourceConfig::default()));
//!
//! let (request, pending) = InboundRequest::builder(Method::Post, "s/levl/v").query("inc").build();
//! resource.handle(request).await;
//! assert_eq!(pending.recv().await.unwrap().code, Code::Changed);
//!
//! let (request, pending) = InboundRequest::builder(Method::Get, "s/levl/v").build();
//! resource.handle(request).await;
//! assert_eq!(pending.recv().await.unwrap().text(), "1");
//! # });
//! ```
//!
//! ## Architecture
//!
//! ```text
//! EndpointResource
//!     ├── SectionResource (s)   ── Observable (section)
//!     │                         └─ DashMap<name, Observable> (properties)
//!     ├── SectionResource (c)
//!     ├── SectionResource (m)
//!     └── f/<id> → EndpointResource of each PairingManager child
//! ```
//!
//! Every request ends in exactly one response sent through the request's own
//! responder, unless the peer has gone away first.

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod format;
pub mod message;
pub mod resource;
pub mod section;

pub use codec::{decode_value, encode_value, etag, link_format};
pub use endpoint::{EndpointResource, CHILDREN_SEGMENT};
pub use error::{status_for_error, ResourceError, Result};
pub use format::{negotiate, ContentFormat, MediaType, Target};
pub use message::{Code, InboundRequest, Method, Observe, PendingResponse, RequestBuilder, Response};
pub use resource::{spawn_request, Completion, Resource};
pub use section::{Directive, SectionResource};
