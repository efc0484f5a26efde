//! HTTP binding for propnet endpoint resources.
//!
//! This crate is a thin HTTP layer over [`propnet_resource`]. It has no
//! knowledge of particular devices; it only maps HTTP onto the resource
//! request model and back.
//!
//! # Overview
//!
//! - [`ResourceServer`]: binds to the first free port of a range and serves
//!   every mounted resource until shut down.
//! - [`ResourceRouter`]: maps the first path segment to a mounted resource.
//! - [`ServerConfig`]: port range, bind address and request timeout.
//!
//! # Mapping
//!
//! | HTTP                         | Resource model                        |
//! |------------------------------|---------------------------------------|
//! | `GET/POST/PUT/DELETE`        | [`Method`](propnet_resource::Method)  |
//! | path after the mount name    | request path                          |
//! | query string                 | query tokens (`inc`, `d=0.5`)         |
//! | `Accept` / `Content-Type`    | content formats                       |
//! | `Cache-Control: max-age`     | freshness hint                        |
//! | `ETag`                       | content fingerprint                   |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use propnet_core::{LocalEndpoint, PropertySpec, ResourceConfig};
//! use propnet_resource::EndpointResource;
//! use resource_server::{ResourceRouter, ResourceServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), resource_server::ServerError> {
//!     let lamp = Arc::new(LocalEndpoint::new("lamp", Vec::<PropertySpec>::new()));
//!
//!     let router = ResourceRouter::new();
//!     router
//!         .mount("1", Arc::new(EndpointResource::new(lamp, Arc::new(ResourceConfig::default()))))
//!         .await;
//!
//!     let server = ResourceServer::start(ServerConfig::default(), router).await?;
//!     println!("GET {}/1/s", server.base_url());
//!
//!     server.shutdown().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use router::ResourceRouter;
pub use server::ResourceServer;
