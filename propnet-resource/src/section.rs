//! Serving one section of a functional endpoint
//!
//! A [`SectionResource`] answers requests for `""` (the whole section),
//! `<trait>` and `<trait>/<prop>` relative to the section tag. Reads are
//! content negotiated and may register observers; property writes take a
//! directive from the query.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use propnet_core::{
    collapse_section, uncollapse_section, FunctionalEndpoint, Observable, PropertyKey, PropertyMap,
    ResourceConfig, ResourceLink, Section,
};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::codec::{encode_value, etag, link_format};
use crate::error::{ResourceError, Result};
use crate::format::{negotiate, ContentFormat, Target};
use crate::message::{Code, InboundRequest, Method, Observe, Response};
use crate::resource::{complete, finish, optional_body, required_body, Completion, Resource};

/// Write mode selected by the first query token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Replace,
    Increment,
    Toggle,
    Add,
    Remove,
}

impl Directive {
    /// Read the directive from a request's queries
    ///
    /// No queries, or a first token that is an assignment, means replace.
    pub fn parse(queries: &[String]) -> Result<Directive> {
        let Some(first) = queries.first() else {
            return Ok(Directive::Replace);
        };
        if first.contains('=') {
            return Ok(Directive::Replace);
        }

        match first.as_str() {
            "inc" => Ok(Directive::Increment),
            "tog" => Ok(Directive::Toggle),
            "add" => Ok(Directive::Add),
            "rem" => Ok(Directive::Remove),
            other => Err(ResourceError::BadRequest(format!(
                "Unknown query action \"{other}\""
            ))),
        }
    }
}

/// Turns fetched or triggered values into responses
#[derive(Debug, Clone)]
struct Renderer {
    format: ContentFormat,
    target: Target,
    max_age: Duration,
    link_prefix: String,
    inline_limit: usize,
}

impl Renderer {
    fn render(&self, value: &Value) -> Result<Response> {
        let payload = match (self.format, self.target) {
            (ContentFormat::LinkFormat, Target::Section) => {
                let empty = Map::new();
                let nested = value.as_object().unwrap_or(&empty);
                link_format(nested, &self.link_prefix, self.inline_limit).into()
            }
            (ContentFormat::Json, Target::Property) => encode_value(&json!({ "v": value }), self.format)?,
            (format, _) => encode_value(value, format)?,
        };

        let tag = etag(&payload);
        Ok(Response::content(self.format, payload)
            .with_max_age(self.max_age)
            .with_etag(tag))
    }
}

/// Serves one section of one endpoint
pub struct SectionResource {
    endpoint: Arc<dyn FunctionalEndpoint>,
    section: Section,
    config: Arc<ResourceConfig>,
    observable: Arc<Observable>,
    properties: DashMap<String, Arc<Observable>>,
}

impl SectionResource {
    pub fn new(endpoint: Arc<dyn FunctionalEndpoint>, section: Section, config: Arc<ResourceConfig>) -> Self {
        let observable = Observable::for_section(Arc::clone(&endpoint), section);
        Self {
            endpoint,
            section,
            config,
            observable,
            properties: DashMap::new(),
        }
    }

    pub fn section(&self) -> Section {
        self.section
    }

    /// Observable of the whole section
    pub fn observable(&self) -> &Arc<Observable> {
        &self.observable
    }

    /// Observable of one property, created on first use
    ///
    /// Exactly one observable exists per property name.
    pub fn property_observable(&self, key: &PropertyKey) -> Arc<Observable> {
        self.properties
            .entry(key.name().to_string())
            .or_insert_with(|| Observable::for_property(Arc::clone(&self.endpoint), key.clone()))
            .clone()
    }

    /// Number of properties with a cached observable
    pub fn observed_property_count(&self) -> usize {
        self.properties.len()
    }

    fn renderer(&self, format: ContentFormat, target: Target, trailing_slash: bool) -> Renderer {
        Renderer {
            format,
            target,
            max_age: self.config.max_age(self.section),
            link_prefix: if trailing_slash {
                String::new()
            } else {
                format!("{}/", self.section.tag())
            },
            inline_limit: self.config.link_value_inline_limit,
        }
    }

    fn resolve(&self, trait_id: &str, prop_id: &str) -> Result<PropertyKey> {
        let name = format!("{}/{}/{}", self.section.tag(), trait_id, prop_id);
        self.endpoint
            .property_key(&name)
            .ok_or(ResourceError::NotFound)
    }

    /// Apply the request's observe option to `observable`
    ///
    /// Returns the cached value when a registration can be answered from it.
    fn observe(&self, request: &mut InboundRequest, observable: &Observable, renderer: &Renderer) -> Option<Value> {
        match request.take_observe()? {
            Observe::Register { id, sink } => {
                let renderer = renderer.clone();
                let name = observable.name().to_string();
                observable.add_watcher(
                    id,
                    Arc::new(move |value| match renderer.render(value) {
                        Ok(response) => sink.send(response).is_ok(),
                        Err(e) => {
                            warn!("Unable to render notification for {}: {}", name, e);
                            true
                        }
                    }),
                );
                debug!(observer = %id, resource = observable.name(), "Observer registered");
                observable.cached_value()
            }
            Observe::Deregister { id } => {
                observable.remove_watcher(id);
                debug!(observer = %id, resource = observable.name(), "Observer removed");
                None
            }
        }
    }

    async fn get_section(&self, mut request: InboundRequest) -> Completion {
        let Some(format) = negotiate(request.accept(), Target::Section) else {
            return finish(request, Err(ResourceError::NotAcceptable));
        };
        let renderer = self.renderer(format, Target::Section, request.has_trailing_slash());

        if let Some(cached) = self.observe(&mut request, &self.observable, &renderer) {
            return finish(request, renderer.render(&cached));
        }

        let endpoint = Arc::clone(&self.endpoint);
        let section = self.section;
        complete(request, async move {
            let flat = endpoint.fetch_section(section).await?;
            renderer.render(&Value::Object(uncollapse_section(&flat, section)))
        })
        .await
    }

    async fn post_section(&self, request: InboundRequest) -> Completion {
        let properties = match self.section_body(&request) {
            Ok(properties) => properties,
            Err(e) => return finish(request, Err(e)),
        };

        let endpoint = Arc::clone(&self.endpoint);
        complete(request, async move {
            endpoint.apply_properties(properties).await?;
            Ok(Response::empty(Code::Changed))
        })
        .await
    }

    fn section_body(&self, request: &InboundRequest) -> Result<PropertyMap> {
        match required_body(request)? {
            Value::Object(nested) => collapse_section(&nested, self.section)
                .map_err(|e| ResourceError::BadRequest(e.to_string())),
            _ => Err(ResourceError::BadRequest("Expected a map of traits".to_string())),
        }
    }

    async fn get_trait(&self, request: InboundRequest, trait_id: String) -> Completion {
        let Some(format) = negotiate(request.accept(), Target::Trait) else {
            return finish(request, Err(ResourceError::NotAcceptable));
        };
        let renderer = self.renderer(format, Target::Trait, request.has_trailing_slash());

        let endpoint = Arc::clone(&self.endpoint);
        let section = self.section;
        complete(request, async move {
            let flat = endpoint.fetch_section(section).await?;
            let props = uncollapse_section(&flat, section)
                .remove(&trait_id)
                .filter(Value::is_object)
                .ok_or(ResourceError::NotFound)?;
            renderer.render(&props)
        })
        .await
    }

    async fn get_property(&self, mut request: InboundRequest, key: PropertyKey) -> Completion {
        let Some(format) = negotiate(request.accept(), Target::Property) else {
            return finish(request, Err(ResourceError::NotAcceptable));
        };
        let renderer = self.renderer(format, Target::Property, false);

        let observable = self.property_observable(&key);
        if let Some(cached) = self.observe(&mut request, &observable, &renderer) {
            return finish(request, renderer.render(&cached));
        }

        let endpoint = Arc::clone(&self.endpoint);
        complete(request, async move {
            let value = endpoint.fetch_property(&key).await?;
            renderer.render(&value)
        })
        .await
    }

    async fn post_property(&self, request: InboundRequest, key: PropertyKey) -> Completion {
        let write = match self.property_write(&request, key) {
            Ok(write) => write,
            Err(e) => return finish(request, Err(e)),
        };

        complete(request, async move {
            match write {
                PropertyWrite::Apply(properties, endpoint) => endpoint.apply_properties(properties).await?,
                PropertyWrite::Link(link, value) => link.invoke(value).await?,
            }
            Ok(Response::empty(Code::Changed))
        })
        .await
    }

    /// Validate a property write and decide how to perform it
    fn property_write(&self, request: &InboundRequest, key: PropertyKey) -> Result<PropertyWrite> {
        let directive = Directive::parse(request.queries())?;
        let duration = match request.query_value("d") {
            Some(raw) => Some(
                raw.parse::<f64>()
                    .ok()
                    .filter(|d| d.is_finite())
                    .ok_or_else(|| ResourceError::BadRequest("Unable to parse query duration".to_string()))?,
            ),
            None => None,
        };
        let body = optional_body(request)?;
        let endpoint = Arc::clone(&self.endpoint);
        let locator = key.name().to_string();

        let write = match directive {
            Directive::Replace => {
                let mut properties = PropertyMap::new();
                properties.insert(key.name().to_string(), body.unwrap_or(Value::Null));
                if let Some(duration) = duration {
                    properties.insert(self.config.transition_duration_key.clone(), json!(duration));
                }
                PropertyWrite::Apply(properties, endpoint)
            }
            Directive::Increment => {
                let delta = match body {
                    None => Value::Null,
                    Some(delta) if delta.is_number() => delta,
                    Some(_) => {
                        return Err(ResourceError::BadRequest("Increment value not a number".to_string()))
                    }
                };
                PropertyWrite::Link(ResourceLink::create_increment(endpoint, key, locator), delta)
            }
            Directive::Toggle => {
                PropertyWrite::Link(ResourceLink::create_toggle(endpoint, key, locator), Value::Null)
            }
            Directive::Add => {
                let value = body.ok_or_else(|| ResourceError::BadRequest("Missing value to add".to_string()))?;
                PropertyWrite::Link(ResourceLink::create_insert(endpoint, key, locator), value)
            }
            Directive::Remove => {
                let value =
                    body.ok_or_else(|| ResourceError::BadRequest("Missing value to remove".to_string()))?;
                PropertyWrite::Link(ResourceLink::create_remove(endpoint, key, locator), value)
            }
        };

        Ok(write)
    }
}

enum PropertyWrite {
    Apply(PropertyMap, Arc<dyn FunctionalEndpoint>),
    Link(ResourceLink, Value),
}

#[async_trait]
impl Resource for SectionResource {
    async fn handle(&self, request: InboundRequest) -> Completion {
        debug!(section = %self.section, method = %request.method(), path = %request.path().join("/"), "Section request");

        let path = request.path().to_vec();
        match (path.as_slice(), request.method()) {
            ([], Method::Get) => self.get_section(request).await,
            ([], Method::Post) => self.post_section(request).await,
            ([_], Method::Get) => {
                let trait_id = path[0].clone();
                self.get_trait(request, trait_id).await
            }
            ([trait_id, prop_id], method) => {
                let key = match self.resolve(trait_id, prop_id) {
                    Ok(key) => key,
                    Err(e) => return finish(request, Err(e)),
                };
                match method {
                    Method::Get => self.get_property(request, key).await,
                    Method::Post => self.post_property(request, key).await,
                    Method::Put | Method::Delete => finish(request, Err(ResourceError::MethodNotAllowed)),
                }
            }
            ([] | [_], _) => finish(request, Err(ResourceError::MethodNotAllowed)),
            _ => finish(request, Err(ResourceError::NotFound)),
        }
    }
}

impl fmt::Debug for SectionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionResource")
            .field("section", &self.section)
            .field("observers", &self.observable.watcher_count())
            .field("observed_properties", &self.properties.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use propnet_core::{LocalEndpoint, PropertySpec, ValueType, WatcherId};
    use rstest::rstest;
    use tokio::sync::mpsc;

    fn lamp() -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint::new(
            "lamp",
            [
                PropertySpec::new(PropertyKey::new(Section::State, "onof", "v", ValueType::Bool))
                    .with_default(json!(false)),
                PropertySpec::new(PropertyKey::new(Section::State, "levl", "v", ValueType::Number))
                    .with_default(json!(0.5)),
                PropertySpec::new(PropertyKey::new(Section::State, "trans", "d", ValueType::Number)),
                PropertySpec::new(PropertyKey::new(Section::State, "scen", "grp", ValueType::Array))
                    .with_default(json!(["a"])),
            ],
        ))
    }

    fn state(endpoint: &Arc<LocalEndpoint>) -> SectionResource {
        SectionResource::new(endpoint.clone(), Section::State, Arc::new(ResourceConfig::default()))
    }

    async fn send(resource: &SectionResource, request: (InboundRequest, crate::message::PendingResponse)) -> Response {
        let (request, pending) = request;
        assert_eq!(resource.handle(request).await, Completion::Responded);
        pending.recv().await.unwrap()
    }

    #[rstest]
    #[case(&[], Directive::Replace)]
    #[case(&["d=0.5"], Directive::Replace)]
    #[case(&["inc"], Directive::Increment)]
    #[case(&["tog", "d=1"], Directive::Toggle)]
    #[case(&["add"], Directive::Add)]
    #[case(&["rem"], Directive::Remove)]
    fn test_directive_parse(#[case] queries: &[&str], #[case] expected: Directive) {
        let queries: Vec<String> = queries.iter().map(|q| q.to_string()).collect();
        assert_eq!(Directive::parse(&queries), Ok(expected));
    }

    #[test]
    fn test_unknown_directive_named() {
        assert_eq!(
            Directive::parse(&["dec".to_string()]),
            Err(ResourceError::BadRequest("Unknown query action \"dec\"".to_string()))
        );
    }

    #[tokio::test]
    async fn test_section_get_defaults_to_text() {
        let endpoint = lamp();
        let resource = state(&endpoint);

        let response = send(&resource, InboundRequest::builder(Method::Get, "").build()).await;
        assert_eq!(response.code, Code::Content);
        assert_eq!(response.content_format, Some(ContentFormat::TextPlain));
        assert_eq!(response.max_age, Some(Duration::from_secs(30)));
        assert_eq!(response.etag, Some(etag(&response.payload)));

        let body: Value = serde_json::from_slice(&response.payload).unwrap();
        assert_eq!(
            body,
            json!({"levl": {"v": 0.5}, "onof": {"v": false}, "scen": {"grp": ["a"]}})
        );
    }

    #[tokio::test]
    async fn test_property_json_is_wrapped() {
        let endpoint = lamp();
        let resource = state(&endpoint);

        let response = send(
            &resource,
            InboundRequest::builder(Method::Get, "levl/v")
                .accept(ContentFormat::Json)
                .build(),
        )
        .await;
        assert_eq!(response.text(), r#"{"v":0.5}"#);

        let response = send(&resource, InboundRequest::builder(Method::Get, "levl/v").build()).await;
        assert_eq!(response.text(), "0.5");
    }

    #[tokio::test]
    async fn test_link_format_only_for_sections() {
        let endpoint = lamp();
        let resource = state(&endpoint);

        let response = send(
            &resource,
            InboundRequest::builder(Method::Get, "onof/v")
                .accept(ContentFormat::LinkFormat)
                .build(),
        )
        .await;
        assert_eq!(response.code, Code::NotAcceptable);

        let response = send(
            &resource,
            InboundRequest::builder(Method::Get, "")
                .accept(ContentFormat::LinkFormat)
                .build(),
        )
        .await;
        assert_eq!(response.code, Code::Content);
        assert!(response.text().contains("<s/onof/v>;v=false;if=prop"));
    }

    #[tokio::test]
    async fn test_increment_without_body() {
        let endpoint = lamp();
        let resource = state(&endpoint);

        let response = send(
            &resource,
            InboundRequest::builder(Method::Post, "levl/v").query("inc").build(),
        )
        .await;
        assert_eq!(response.code, Code::Changed);
        assert!(response.payload.is_empty());
        assert_eq!(endpoint.value("s/levl/v"), Some(json!(1.5)));
    }

    #[tokio::test]
    async fn test_add_without_body_is_rejected() {
        let endpoint = lamp();
        let resource = state(&endpoint);

        let response = send(
            &resource,
            InboundRequest::builder(Method::Post, "scen/grp").query("add").build(),
        )
        .await;
        assert_eq!(response.code, Code::BadRequest);
        assert_eq!(response.text(), "Missing value to add");
        assert_eq!(endpoint.value("s/scen/grp"), Some(json!(["a"])));
    }

    #[tokio::test]
    async fn test_replace_with_duration() {
        let endpoint = lamp();
        let resource = state(&endpoint);

        let response = send(
            &resource,
            InboundRequest::builder(Method::Post, "onof/v")
                .query("d=2.5")
                .payload("true")
                .build(),
        )
        .await;
        assert_eq!(response.code, Code::Changed);
        assert_eq!(endpoint.value("s/onof/v"), Some(json!(true)));
        assert_eq!(endpoint.value("s/trans/d"), Some(json!(2.5)));

        let response = send(
            &resource,
            InboundRequest::builder(Method::Post, "onof/v")
                .query("d=soon")
                .payload("true")
                .build(),
        )
        .await;
        assert_eq!(response.code, Code::BadRequest);
        assert_eq!(response.text(), "Unable to parse query duration");
    }

    #[tokio::test]
    async fn test_section_post_requires_body() {
        let endpoint = lamp();
        let resource = state(&endpoint);

        let response = send(&resource, InboundRequest::builder(Method::Post, "").build()).await;
        assert_eq!(response.code, Code::BadRequest);
        assert_eq!(response.text(), "No payload");

        let response = send(
            &resource,
            InboundRequest::builder(Method::Post, "")
                .content_format(ContentFormat::Json)
                .payload(r#"{"onof": {"v": true}, "levl": {"v": 0.1}}"#)
                .build(),
        )
        .await;
        assert_eq!(response.code, Code::Changed);
        assert_eq!(endpoint.value("s/onof/v"), Some(json!(true)));
        assert_eq!(endpoint.value("s/levl/v"), Some(json!(0.1)));
    }

    #[tokio::test]
    async fn test_put_not_allowed() {
        let endpoint = lamp();
        let resource = state(&endpoint);

        let response = send(
            &resource,
            InboundRequest::builder(Method::Put, "onof/v").payload("true").build(),
        )
        .await;
        assert_eq!(response.code, Code::MethodNotAllowed);
        assert_eq!(endpoint.value("s/onof/v"), Some(json!(false)));
    }

    #[tokio::test]
    async fn test_unknown_property() {
        let endpoint = lamp();
        let resource = state(&endpoint);

        let response = send(&resource, InboundRequest::builder(Method::Get, "nope/v").build()).await;
        assert_eq!(response.code, Code::NotFound);
    }

    #[tokio::test]
    async fn test_observe_property() {
        let endpoint = lamp();
        let resource = state(&endpoint);
        let (sink, mut notifications) = mpsc::unbounded_channel();
        let id = WatcherId::next();

        let response = send(
            &resource,
            InboundRequest::builder(Method::Get, "onof/v")
                .observe(Observe::Register { id, sink })
                .build(),
        )
        .await;
        assert_eq!(response.text(), "false");
        assert_eq!(endpoint.listener_count(), 1);

        endpoint
            .set_property(
                &PropertyKey::new(Section::State, "onof", "v", ValueType::Bool),
                json!(true),
            )
            .await
            .unwrap();
        assert_eq!(notifications.recv().await.unwrap().text(), "true");

        // A second registration is answered from the cached value
        let (other_sink, _other) = mpsc::unbounded_channel();
        let response = send(
            &resource,
            InboundRequest::builder(Method::Get, "onof/v")
                .observe(Observe::Register { id: WatcherId::next(), sink: other_sink })
                .build(),
        )
        .await;
        assert_eq!(response.text(), "true");
        assert_eq!(endpoint.listener_count(), 1);

        send(
            &resource,
            InboundRequest::builder(Method::Get, "onof/v")
                .observe(Observe::Deregister { id })
                .build(),
        )
        .await;
        assert_eq!(resource.property_observable(&PropertyKey::from_name("s/onof/v", ValueType::Bool)).watcher_count(), 1);
        assert_eq!(resource.observed_property_count(), 1);
    }

    #[tokio::test]
    async fn test_trait_get() {
        let endpoint = lamp();
        let resource = state(&endpoint);

        let response = send(&resource, InboundRequest::builder(Method::Get, "levl").build()).await;
        assert_eq!(response.text(), r#"{"v":0.5}"#);

        let response = send(&resource, InboundRequest::builder(Method::Post, "levl").build()).await;
        assert_eq!(response.code, Code::MethodNotAllowed);
    }
}
