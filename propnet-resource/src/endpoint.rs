//! Serving a whole endpoint and its children
//!
//! ```text
//! <root>/                 section directory
//! <root>/s|c|m/...        SectionResource
//! <root>/f/               child directory, POST creates a child
//! <root>/f/<id>           DELETE removes the child
//! <root>/f/<id>/s|c|m/... the child's own sections
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use propnet_core::{FunctionalEndpoint, PropertyMap, ResourceConfig, Section};
use propnet_pairing::{ChildEvent, CreateArgs, PairingManager};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::codec::{encode_value, etag};
use crate::error::{ResourceError, Result};
use crate::format::{negotiate, ContentFormat, Target};
use crate::message::{Code, InboundRequest, Method, Response};
use crate::resource::{complete, finish, required_body, Completion, Resource};
use crate::section::SectionResource;

/// Path segment under which children are addressed
pub const CHILDREN_SEGMENT: &str = "f";

struct ChildResource {
    instance: u64,
    resource: Arc<EndpointResource>,
}

type ChildCache = DashMap<String, ChildResource>;

/// Drop cached resources of children that are no longer live
fn prune(cache: &ChildCache, manager: &PairingManager) {
    cache.retain(|id, child| {
        manager
            .child(id)
            .is_some_and(|pairing| pairing.instance_id() == child.instance)
    });
}

/// Serves the sections of one endpoint and, optionally, its pairing children
pub struct EndpointResource {
    sections: [SectionResource; 3],
    children: Option<Arc<PairingManager>>,
    child_resources: Arc<ChildCache>,
    config: Arc<ResourceConfig>,
}

impl EndpointResource {
    pub fn new(endpoint: Arc<dyn FunctionalEndpoint>, config: Arc<ResourceConfig>) -> Self {
        let sections = Section::ALL.map(|section| {
            SectionResource::new(Arc::clone(&endpoint), section, Arc::clone(&config))
        });

        Self {
            sections,
            children: None,
            child_resources: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Serve the children of `manager` under `f/`
    ///
    /// Inside a runtime, cached child resources are evicted as soon as the
    /// manager removes the child. Otherwise they are pruned on the next
    /// child listing or lookup.
    pub fn with_children(mut self, manager: Arc<PairingManager>) -> Self {
        if let Ok(runtime) = Handle::try_current() {
            runtime.spawn(evict_removed(
                manager.subscribe(),
                Arc::downgrade(&self.child_resources),
                Arc::downgrade(&manager),
            ));
        }
        self.children = Some(manager);
        self
    }

    pub fn section(&self, section: Section) -> &SectionResource {
        let index = Section::ALL
            .iter()
            .position(|s| *s == section)
            .unwrap_or_default();
        &self.sections[index]
    }

    pub fn children(&self) -> Option<&Arc<PairingManager>> {
        self.children.as_ref()
    }

    /// Resource for a live child, reusing the cached one while the same
    /// pairing holds the id
    fn child_resource(&self, manager: &PairingManager, id: &str) -> Option<Arc<EndpointResource>> {
        let Some(pairing) = manager.child(id) else {
            self.child_resources.remove(id);
            return None;
        };

        let mut entry = self
            .child_resources
            .entry(id.to_string())
            .or_insert_with(|| ChildResource {
                instance: pairing.instance_id(),
                resource: Arc::new(EndpointResource::new(pairing.clone(), Arc::clone(&self.config))),
            });
        if entry.instance != pairing.instance_id() {
            *entry = ChildResource {
                instance: pairing.instance_id(),
                resource: Arc::new(EndpointResource::new(pairing.clone(), Arc::clone(&self.config))),
            };
        }
        Some(Arc::clone(&entry.resource))
    }

    fn directory(&self, request: InboundRequest) -> Completion {
        let mut entries: Vec<String> = Section::ALL.iter().map(|s| format!("{}/", s.tag())).collect();
        if self.children.is_some() {
            entries.push(format!("{CHILDREN_SEGMENT}/"));
        }
        let response = listing(&request, &entries);
        finish(request, response)
    }

    async fn handle_children(&self, manager: Arc<PairingManager>, mut request: InboundRequest) -> Completion {
        let path = request.path().to_vec();
        match (&path[1..], request.method()) {
            ([], Method::Get) => {
                prune(&self.child_resources, &manager);
                let ids: Vec<String> = manager.child_ids().into_iter().map(|id| format!("{id}/")).collect();
                let response = listing(&request, &ids);
                finish(request, response)
            }
            ([], Method::Post) => {
                let args = match create_args(&request) {
                    Ok(args) => args,
                    Err(e) => return finish(request, Err(e)),
                };
                complete(request, async move {
                    let (id, _) = manager.create(args).await?;
                    Ok(Response::message(Code::Created, id))
                })
                .await
            }
            ([], _) => finish(request, Err(ResourceError::MethodNotAllowed)),
            ([id], Method::Delete) => {
                let response = if manager.delete_id(id) {
                    self.child_resources.remove(id.as_str());
                    Ok(Response::empty(Code::Deleted))
                } else {
                    Err(ResourceError::NotFound)
                };
                finish(request, response)
            }
            ([id, ..], _) => match self.child_resource(&manager, id) {
                Some(child) => {
                    request.strip_prefix(2);
                    child.handle(request).await
                }
                None => finish(request, Err(ResourceError::NotFound)),
            },
        }
    }
}

/// Evict cached child resources as the manager removes children
///
/// Ends once either the cache or the manager is gone.
async fn evict_removed(
    mut events: broadcast::Receiver<ChildEvent>,
    cache: Weak<ChildCache>,
    manager: Weak<PairingManager>,
) {
    loop {
        let event = events.recv().await;
        let Some(cache) = cache.upgrade() else {
            return;
        };
        match event {
            Ok(ChildEvent::Removed(id)) => {
                if cache.remove(&id).is_some() {
                    debug!(id = %id, "Evicted child resource");
                }
            }
            Ok(ChildEvent::Added(_)) => {}
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "Child events lagged, pruning cache");
                match manager.upgrade() {
                    Some(manager) => prune(&cache, &manager),
                    None => return,
                }
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Parse a creation request body into pairing arguments
fn create_args(request: &InboundRequest) -> Result<CreateArgs> {
    let map: PropertyMap = match required_body(request)? {
        Value::Object(map) => map.into_iter().collect(),
        _ => return Err(ResourceError::BadRequest("Expected a map of arguments".to_string())),
    };
    Ok(CreateArgs::from_map(&map)?)
}

/// Answer a directory read as a link listing or a JSON array of entries
fn listing(request: &InboundRequest, entries: &[String]) -> Result<Response> {
    let format = negotiate(request.accept(), Target::Section).ok_or(ResourceError::NotAcceptable)?;
    let payload = match format {
        ContentFormat::LinkFormat => entries
            .iter()
            .map(|entry| format!("<{entry}>"))
            .collect::<Vec<_>>()
            .join(",")
            .into(),
        format => encode_value(&Value::from(entries.to_vec()), format)?,
    };
    let tag = etag(&payload);
    Ok(Response::content(format, payload).with_etag(tag))
}

#[async_trait]
impl Resource for EndpointResource {
    async fn handle(&self, mut request: InboundRequest) -> Completion {
        let Some(first) = request.path().first().cloned() else {
            return match request.method() {
                Method::Get => self.directory(request),
                _ => finish(request, Err(ResourceError::MethodNotAllowed)),
            };
        };

        if let Some(section) = Section::from_tag(&first) {
            request.strip_prefix(1);
            return self.section(section).handle(request).await;
        }

        match (&self.children, first.as_str()) {
            (Some(manager), CHILDREN_SEGMENT) => {
                debug!(method = %request.method(), path = %request.path().join("/"), "Child request");
                self.handle_children(Arc::clone(manager), request).await
            }
            _ => finish(request, Err(ResourceError::NotFound)),
        }
    }
}

impl fmt::Debug for EndpointResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointResource")
            .field("sections", &self.sections)
            .field("children", &self.children.as_ref().map(|m| m.len()))
            .field("cached_children", &self.child_resources.len())
            .finish()
    }
}
