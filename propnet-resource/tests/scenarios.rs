//! End-to-end request scenarios against a local endpoint

use std::sync::Arc;
use std::time::Duration;

use propnet_core::prelude::*;
use propnet_core::{ListenerId, PropertyListener, ResourceConfig, SectionListener, WatcherId};
use propnet_resource::{
    spawn_request, Code, Completion, ContentFormat, EndpointResource, InboundRequest, Method,
    Observe, Resource, Response,
};
use rstest::rstest;
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn lamp() -> Arc<LocalEndpoint> {
    Arc::new(LocalEndpoint::new(
        "lamp",
        [
            PropertySpec::new(PropertyKey::new(Section::State, "onof", "v", ValueType::Bool))
                .with_default(json!(true)),
            PropertySpec::new(PropertyKey::new(Section::State, "levl", "v", ValueType::Number))
                .with_default(json!(3)),
            PropertySpec::new(PropertyKey::new(Section::State, "scen", "grp", ValueType::Array))
                .with_default(json!(["kitchen"])),
            PropertySpec::new(PropertyKey::new(Section::Config, "levl", "min", ValueType::Number))
                .with_default(json!(0.1)),
            PropertySpec::new(PropertyKey::new(Section::Metadata, "base", "name", ValueType::Text))
                .with_default(json!("Desk lamp"))
                .read_only(),
        ],
    ))
}

fn resource(endpoint: &Arc<LocalEndpoint>) -> EndpointResource {
    EndpointResource::new(endpoint.clone(), Arc::new(ResourceConfig::default()))
}

async fn exchange(
    resource: &EndpointResource,
    (request, pending): (InboundRequest, propnet_resource::PendingResponse),
) -> Response {
    resource.handle(request).await;
    pending.recv().await.expect("response")
}

#[tokio::test]
async fn test_increment_without_body_adds_one() {
    let endpoint = lamp();
    let resource = resource(&endpoint);

    let response = exchange(
        &resource,
        InboundRequest::builder(Method::Post, "s/levl/v").query("inc").build(),
    )
    .await;

    assert_eq!(response.code, Code::Changed);
    assert!(response.payload.is_empty());
    assert_eq!(endpoint.value("s/levl/v"), Some(json!(4)));
}

#[tokio::test]
async fn test_add_without_body_leaves_collection() {
    let endpoint = lamp();
    let resource = resource(&endpoint);

    let response = exchange(
        &resource,
        InboundRequest::builder(Method::Post, "s/scen/grp").query("add").build(),
    )
    .await;

    assert_eq!(response.code, Code::BadRequest);
    assert_eq!(response.text(), "Missing value to add");
    assert_eq!(endpoint.value("s/scen/grp"), Some(json!(["kitchen"])));
}

#[tokio::test]
async fn test_section_get_without_accept() {
    let endpoint = lamp();
    let resource = resource(&endpoint);

    let response = exchange(&resource, InboundRequest::builder(Method::Get, "s").build()).await;

    assert_eq!(response.code, Code::Content);
    assert_eq!(response.content_format, Some(ContentFormat::TextPlain));
    assert_eq!(response.max_age, Some(Duration::from_secs(30)));
    let body: Value = serde_json::from_slice(&response.payload).unwrap();
    assert_eq!(
        body,
        json!({"levl": {"v": 3}, "onof": {"v": true}, "scen": {"grp": ["kitchen"]}})
    );
}

#[rstest]
#[case("s", 30)]
#[case("c", 3600)]
#[case("m", 600)]
#[tokio::test]
async fn test_section_max_age(#[case] path: &str, #[case] seconds: u64) {
    let endpoint = lamp();
    let resource = resource(&endpoint);

    let response = exchange(&resource, InboundRequest::builder(Method::Get, path).build()).await;
    assert_eq!(response.max_age, Some(Duration::from_secs(seconds)));
}

#[rstest]
#[case(&["tog"], "", "s/onof/v", json!(false))]
#[case(&["inc"], "2", "s/levl/v", json!(5))]
#[case(&["add"], "\"porch\"", "s/scen/grp", json!(["kitchen", "porch"]))]
#[case(&["rem"], "\"kitchen\"", "s/scen/grp", json!([]))]
#[case(&[], "7", "s/levl/v", json!(7))]
#[tokio::test]
async fn test_directives(
    #[case] queries: &[&str],
    #[case] body: &str,
    #[case] name: &str,
    #[case] expected: Value,
) {
    let endpoint = lamp();
    let resource = resource(&endpoint);

    let path = name.to_string();
    let mut builder = InboundRequest::builder(Method::Post, &path).payload(body.to_string());
    for query in queries {
        builder = builder.query(*query);
    }

    let response = exchange(&resource, builder.build()).await;
    assert_eq!(response.code, Code::Changed, "{}", response.text());
    assert_eq!(endpoint.value(name), Some(expected));
}

#[rstest]
#[case("inc", "\"lots\"", Code::BadRequest, "Increment value not a number")]
#[case("rem", "", Code::BadRequest, "Missing value to remove")]
#[case("dim", "", Code::BadRequest, "Unknown query action \"dim\"")]
#[tokio::test]
async fn test_directive_errors(
    #[case] query: &str,
    #[case] body: &str,
    #[case] code: Code,
    #[case] message: &str,
) {
    let endpoint = lamp();
    let resource = resource(&endpoint);

    let response = exchange(
        &resource,
        InboundRequest::builder(Method::Post, "s/levl/v")
            .query(query)
            .payload(body.to_string())
            .build(),
    )
    .await;
    assert_eq!(response.code, code);
    assert_eq!(response.text(), message);
}

#[rstest]
#[case(Some("application/json"), Code::Content)]
#[case(Some("application/cbor"), Code::Content)]
#[case(Some("text/plain"), Code::Content)]
#[case(None, Code::Content)]
#[case(Some("application/xml"), Code::NotAcceptable)]
#[tokio::test]
async fn test_negotiation(#[case] accept: Option<&str>, #[case] code: Code) {
    let endpoint = lamp();
    let resource = resource(&endpoint);

    let mut builder = InboundRequest::builder(Method::Get, "s/onof/v");
    if let Some(mime) = accept {
        builder = builder.accept(propnet_resource::MediaType::parse(mime));
    }

    let response = exchange(&resource, builder.build()).await;
    assert_eq!(response.code, code);
}

#[tokio::test]
async fn test_cbor_body_and_response() {
    let endpoint = lamp();
    let resource = resource(&endpoint);
    let body = propnet_resource::encode_value(&json!(9), ContentFormat::Cbor).unwrap();

    let response = exchange(
        &resource,
        InboundRequest::builder(Method::Post, "s/levl/v")
            .content_format(ContentFormat::Cbor)
            .payload(body)
            .build(),
    )
    .await;
    assert_eq!(response.code, Code::Changed);

    let response = exchange(
        &resource,
        InboundRequest::builder(Method::Get, "s/levl/v")
            .accept(ContentFormat::Cbor)
            .build(),
    )
    .await;
    let value = propnet_resource::decode_value(&response.payload, ContentFormat::Cbor).unwrap();
    assert_eq!(value, json!(9));
}

#[tokio::test]
async fn test_read_only_is_forbidden() {
    let endpoint = lamp();
    let resource = resource(&endpoint);

    let response = exchange(
        &resource,
        InboundRequest::builder(Method::Post, "m/base/name")
            .payload("\"Hall lamp\"")
            .build(),
    )
    .await;
    assert_eq!(response.code, Code::Forbidden);
    assert!(response.text().contains("m/base/name"));
    assert_eq!(endpoint.value("m/base/name"), Some(json!("Desk lamp")));
}

#[tokio::test]
async fn test_type_mismatch_is_forbidden() {
    let endpoint = lamp();
    let resource = resource(&endpoint);

    let response = exchange(
        &resource,
        InboundRequest::builder(Method::Post, "s/onof/v")
            .payload("\"maybe\"")
            .build(),
    )
    .await;
    assert_eq!(response.code, Code::Forbidden);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let endpoint = lamp();
    let resource = resource(&endpoint);

    let response = exchange(
        &resource,
        InboundRequest::builder(Method::Post, "s")
            .content_format(ContentFormat::Json)
            .payload("{\"onof\": ")
            .build(),
    )
    .await;
    assert_eq!(response.code, Code::BadRequest);
    assert!(!response.payload.is_empty());
}

#[tokio::test]
async fn test_section_observe_notifies_nested_map() {
    let endpoint = lamp();
    let resource = resource(&endpoint);
    let (sink, mut notifications) = mpsc::unbounded_channel();
    let id = WatcherId::next();

    let response = exchange(
        &resource,
        InboundRequest::builder(Method::Get, "c")
            .accept(ContentFormat::Json)
            .observe(Observe::Register { id, sink })
            .build(),
    )
    .await;
    assert_eq!(response.text(), r#"{"levl":{"min":0.1}}"#);

    exchange(
        &resource,
        InboundRequest::builder(Method::Post, "c/levl/min").payload("0.2").build(),
    )
    .await;

    let notification = notifications.recv().await.unwrap();
    assert_eq!(notification.code, Code::Content);
    assert_eq!(notification.text(), r#"{"levl":{"min":0.2}}"#);
    assert_eq!(notification.max_age, Some(Duration::from_secs(3600)));

    exchange(
        &resource,
        InboundRequest::builder(Method::Get, "c")
            .observe(Observe::Deregister { id })
            .build(),
    )
    .await;
    assert_eq!(endpoint.listener_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_observers_share_one_attachment() {
    let endpoint = lamp();
    let resource = Arc::new(resource(&endpoint));
    let runtime = tokio::runtime::Handle::current();

    let mut sinks = Vec::new();
    let mut handles = Vec::new();
    let mut pendings = Vec::new();
    for _ in 0..16 {
        let (sink, notifications) = mpsc::unbounded_channel();
        sinks.push(notifications);
        let (request, pending) = InboundRequest::builder(Method::Get, "s/onof/v")
            .observe(Observe::Register { id: WatcherId::next(), sink })
            .build();
        pendings.push(pending);
        handles.push(spawn_request(resource.clone(), request, &runtime));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Completion::Responded);
    }
    for pending in pendings {
        assert_eq!(pending.recv().await.unwrap().code, Code::Content);
    }

    assert_eq!(endpoint.listener_count(), 1);
    assert_eq!(resource.section(Section::State).observed_property_count(), 1);
}

#[tokio::test]
async fn test_abandoned_request_gets_no_response() {
    let endpoint = lamp();
    let resource = resource(&endpoint);

    let (request, pending) = InboundRequest::builder(Method::Post, "s/levl/v").query("inc").build();
    drop(pending);

    assert_eq!(resource.handle(request).await, Completion::Abandoned);
}

/// Endpoint whose every operation is interrupted
struct Interrupting;

#[async_trait::async_trait]
impl FunctionalEndpoint for Interrupting {
    fn property_key(&self, name: &str) -> Option<PropertyKey> {
        Some(PropertyKey::from_name(name, ValueType::Any))
    }

    async fn fetch_section(&self, _section: Section) -> propnet_core::Result<PropertyMap> {
        Err(PropertyError::Interrupted)
    }

    async fn fetch_property(&self, _key: &PropertyKey) -> propnet_core::Result<Value> {
        Err(PropertyError::Interrupted)
    }

    async fn apply_properties(&self, _properties: PropertyMap) -> propnet_core::Result<()> {
        Err(PropertyError::Interrupted)
    }

    async fn increment_property(&self, _key: &PropertyKey, _delta: Value) -> propnet_core::Result<()> {
        Err(PropertyError::Interrupted)
    }

    async fn toggle_property(&self, _key: &PropertyKey) -> propnet_core::Result<()> {
        Err(PropertyError::Interrupted)
    }

    async fn add_value_to_property(&self, _key: &PropertyKey, _value: Value) -> propnet_core::Result<()> {
        Err(PropertyError::Interrupted)
    }

    async fn remove_value_from_property(&self, _key: &PropertyKey, _value: Value) -> propnet_core::Result<()> {
        Err(PropertyError::Interrupted)
    }

    fn register_property_listener(&self, _key: &PropertyKey, _listener: PropertyListener) -> ListenerId {
        ListenerId::next()
    }

    fn register_section_listener(&self, _section: Section, _listener: SectionListener) -> ListenerId {
        ListenerId::next()
    }

    fn unregister_listener(&self, _id: ListenerId) -> bool {
        false
    }
}

#[tokio::test]
async fn test_interrupted_fetch_is_service_unavailable() {
    let resource: Arc<dyn Resource> = Arc::new(EndpointResource::new(
        Arc::new(Interrupting),
        Arc::new(ResourceConfig::default()),
    ));

    let (request, pending) = InboundRequest::builder(Method::Get, "s").build();
    let completion = spawn_request(resource, request, &tokio::runtime::Handle::current())
        .await
        .unwrap();

    assert_eq!(completion, Completion::Interrupted);
    assert_eq!(pending.recv().await.unwrap().code, Code::ServiceUnavailable);
}

#[tokio::test]
async fn test_interrupted_child_creation_is_service_unavailable() {
    let manager = Arc::new(propnet_pairing::PairingManager::new("local"));
    let resource = resource(&lamp()).with_children(Arc::clone(&manager));
    manager.interrupt();

    let (request, pending) = InboundRequest::builder(Method::Post, "f")
        .payload(r#"{"push": true}"#)
        .build();

    assert_eq!(resource.handle(request).await, Completion::Interrupted);
    assert_eq!(pending.recv().await.unwrap().code, Code::ServiceUnavailable);
    assert!(manager.is_empty());
}
