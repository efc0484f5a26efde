//! Serves a simulated lamp and its pairings over HTTP
//!
//! ```text
//! PROPNET_LOG_MODE=debug cargo run -p propnet-resource-server
//! curl http://127.0.0.1:5683/1/s
//! curl -X POST 'http://127.0.0.1:5683/1/s/levl/v?inc'
//! ```

use std::sync::Arc;

use propnet_core::{
    init_logging_from_env, LocalEndpoint, PropertyKey, PropertySpec, ResourceConfig, Section,
    ValueType,
};
use propnet_pairing::PairingManager;
use propnet_resource::EndpointResource;
use resource_server::{ResourceRouter, ResourceServer, ServerConfig};
use serde_json::json;

fn lamp() -> LocalEndpoint {
    LocalEndpoint::new(
        "lamp",
        [
            PropertySpec::new(PropertyKey::new(Section::State, "onof", "v", ValueType::Bool))
                .with_default(json!(false)),
            PropertySpec::new(PropertyKey::new(Section::State, "levl", "v", ValueType::Number))
                .with_default(json!(0)),
            PropertySpec::new(PropertyKey::new(Section::State, "trans", "d", ValueType::Number)),
            PropertySpec::new(PropertyKey::new(Section::State, "scen", "grp", ValueType::Array))
                .with_default(json!([])),
            PropertySpec::new(PropertyKey::new(Section::Metadata, "base", "name", ValueType::Text))
                .with_default(json!("Lamp"))
                .read_only(),
        ],
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;

    let config = Arc::new(ResourceConfig::default());
    config.validate()?;

    let pairings = Arc::new(PairingManager::new("local"));
    let lamp = EndpointResource::new(Arc::new(lamp()), Arc::clone(&config))
        .with_children(Arc::clone(&pairings));

    let router = ResourceRouter::new();
    router.mount("1", Arc::new(lamp)).await;

    let server = ResourceServer::start(ServerConfig::default(), router).await?;
    tracing::info!("Serving lamp at {}/1/", server.base_url());

    tokio::signal::ctrl_c().await?;
    pairings.interrupt();
    server.shutdown().await?;
    Ok(())
}
