//! Routing of HTTP paths to mounted resources
//!
//! The first path segment names a mounted resource; the rest of the path is
//! handed to that resource.

use std::collections::HashMap;
use std::sync::Arc;

use propnet_resource::Resource;
use tokio::sync::RwLock;

/// Maps mount names to resources
///
/// Cloning shares the same mount table.
#[derive(Clone, Default)]
pub struct ResourceRouter {
    mounts: Arc<RwLock<HashMap<String, Arc<dyn Resource>>>>,
}

impl ResourceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `resource` under `/<name>/`
    ///
    /// Returns the resource previously mounted under the same name.
    ///
    /// # Example
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use propnet_core::{LocalEndpoint, PropertySpec, ResourceConfig};
    /// # use propnet_resource::EndpointResource;
    /// # use resource_server::ResourceRouter;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let lamp = Arc::new(LocalEndpoint::new("lamp", Vec::<PropertySpec>::new()));
    /// let router = ResourceRouter::new();
    /// router
    ///     .mount("1", Arc::new(EndpointResource::new(lamp, Arc::new(ResourceConfig::default()))))
    ///     .await;
    /// assert!(router.route("1").await.is_some());
    /// # }
    /// ```
    pub async fn mount(&self, name: impl Into<String>, resource: Arc<dyn Resource>) -> Option<Arc<dyn Resource>> {
        let name = name.into();
        tracing::debug!(mount = %name, "Mounting resource");
        self.mounts.write().await.insert(name, resource)
    }

    pub async fn unmount(&self, name: &str) -> Option<Arc<dyn Resource>> {
        self.mounts.write().await.remove(name)
    }

    /// Resource mounted under `name`
    pub async fn route(&self, name: &str) -> Option<Arc<dyn Resource>> {
        self.mounts.read().await.get(name).cloned()
    }

    /// Mounted names, sorted
    pub async fn mounts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mounts.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ResourceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRouter").finish_non_exhaustive()
    }
}
