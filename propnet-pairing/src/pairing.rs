//! A single automation pairing
//!
//! A pairing binds a source property to a destination property. While it is
//! enabled and both locators resolve, changes are forwarded source → destination
//! (`push`) and destination → source (`pull`), each through an optional
//! transform. The pairing itself is a functional endpoint, so its configuration
//! is read, written and persisted like any other child.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use persist_store::{PersistListener, Persistable, StateBlob};
use propnet_core::{
    FunctionalEndpoint, ListenerId, LocalEndpoint, PropertyKey, PropertyListener, PropertyMap,
    PropertySpec, ResourceLink, Result, Section, SectionListener, Transform, ValueType, WatcherId,
};
use serde_json::Value;
use tokio::runtime::Handle;

/// Property keys of the pairing schema
pub mod schema {
    use super::*;

    pub const PAIRING_TRAIT: &str = "pair";
    pub const ENABLED_TRAIT: &str = "enab";

    /// Forward source changes to the destination
    pub fn push() -> PropertyKey {
        PropertyKey::new(Section::Config, PAIRING_TRAIT, "push", ValueType::Bool)
    }

    /// Forward destination changes back to the source
    pub fn pull() -> PropertyKey {
        PropertyKey::new(Section::Config, PAIRING_TRAIT, "pull", ValueType::Bool)
    }

    pub fn source() -> PropertyKey {
        PropertyKey::new(Section::Config, PAIRING_TRAIT, "src", ValueType::Uri)
    }

    pub fn destination() -> PropertyKey {
        PropertyKey::new(Section::Config, PAIRING_TRAIT, "dst", ValueType::Uri)
    }

    pub fn forward_transform() -> PropertyKey {
        PropertyKey::new(Section::Config, PAIRING_TRAIT, "xfwd", ValueType::Expression)
    }

    pub fn reverse_transform() -> PropertyKey {
        PropertyKey::new(Section::Config, PAIRING_TRAIT, "xrev", ValueType::Expression)
    }

    pub fn enabled() -> PropertyKey {
        PropertyKey::new(Section::State, ENABLED_TRAIT, "v", ValueType::Bool)
    }

    /// Technology that owns the pairing, read-only
    pub fn technology() -> PropertyKey {
        PropertyKey::new(Section::Metadata, PAIRING_TRAIT, "tech", ValueType::Text)
    }

    pub(crate) fn specs(tech: &str) -> Vec<PropertySpec> {
        vec![
            PropertySpec::new(push()).with_default(Value::Bool(false)).persistent(),
            PropertySpec::new(pull()).with_default(Value::Bool(false)).persistent(),
            PropertySpec::new(source()).persistent(),
            PropertySpec::new(destination()).persistent(),
            PropertySpec::new(forward_transform()).persistent(),
            PropertySpec::new(reverse_transform()).persistent(),
            PropertySpec::new(enabled()).with_default(Value::Bool(false)).persistent(),
            PropertySpec::new(technology())
                .read_only()
                .with_default(Value::from(tech)),
        ]
    }
}

/// Maps locators to links on reachable endpoints
pub trait LocatorResolver: Send + Sync {
    /// Resolve a locator, or `None` if it is not reachable
    fn resolve(&self, locator: &str) -> Option<Arc<ResourceLink>>;
}

/// A resolver backed by a fixed table of links, keyed by locator
#[derive(Default)]
pub struct StaticResolver {
    links: Mutex<HashMap<String, Arc<ResourceLink>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a link reachable under its own locator
    pub fn insert(&self, link: ResourceLink) -> Arc<ResourceLink> {
        let link = Arc::new(link);
        self.links
            .lock()
            .insert(link.locator().to_string(), Arc::clone(&link));
        link
    }
}

impl LocatorResolver for StaticResolver {
    fn resolve(&self, locator: &str) -> Option<Arc<ResourceLink>> {
        self.links.lock().get(locator).cloned()
    }
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Watchers a pairing currently holds on its resolved links
struct Binding {
    watches: Vec<(Arc<ResourceLink>, WatcherId)>,
}

impl Binding {
    fn release(self) {
        for (link, id) in self.watches {
            link.unregister_listener(id);
        }
    }
}

/// Value last forwarded into each locator whose echo is still expected
type SentValues = Arc<Mutex<HashMap<String, Value>>>;

/// An automation pairing
///
/// Created and destroyed only by its
/// [`PairingManager`](crate::manager::PairingManager).
pub struct Pairing {
    instance: u64,
    endpoint: LocalEndpoint,
    resolver: Option<Arc<dyn LocatorResolver>>,
    runtime: Option<Handle>,
    binding: Mutex<Option<Binding>>,
    own_listeners: Mutex<Vec<ListenerId>>,
}

impl Pairing {
    pub(crate) fn new(
        technology: &str,
        resolver: Option<Arc<dyn LocatorResolver>>,
        runtime: Option<Handle>,
    ) -> Arc<Self> {
        let pairing = Arc::new_cyclic(|weak: &Weak<Pairing>| {
            let endpoint = LocalEndpoint::new(
                format!("{technology} pairing"),
                schema::specs(technology),
            );

            let mut own_listeners = Vec::new();
            if resolver.is_some() {
                for section in [Section::Config, Section::State] {
                    let weak = weak.clone();
                    let rebind: SectionListener = Arc::new(move |_, _| {
                        if let Some(pairing) = weak.upgrade() {
                            pairing.rebind();
                        }
                    });
                    own_listeners.push(endpoint.register_section_listener(section, rebind));
                }
            }

            Pairing {
                instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                endpoint,
                resolver,
                runtime,
                binding: Mutex::new(None),
                own_listeners: Mutex::new(own_listeners),
            }
        });

        tracing::trace!(instance = pairing.instance, "Pairing constructed");
        pairing
    }

    /// Process-unique identity, independent of the child id
    pub fn instance_id(&self) -> u64 {
        self.instance
    }

    pub fn is_enabled(&self) -> bool {
        self.flag(&schema::enabled())
    }

    pub fn is_push(&self) -> bool {
        self.flag(&schema::push())
    }

    pub fn is_pull(&self) -> bool {
        self.flag(&schema::pull())
    }

    pub fn source(&self) -> Option<String> {
        self.text(&schema::source())
    }

    pub fn destination(&self) -> Option<String> {
        self.text(&schema::destination())
    }

    pub fn technology(&self) -> Option<String> {
        self.text(&schema::technology())
    }

    /// Whether forwarding watchers are currently attached
    pub fn is_forwarding(&self) -> bool {
        self.binding.lock().is_some()
    }

    /// Disable the pairing and stop forwarding immediately
    pub(crate) fn disable(&self) {
        let mut properties = PropertyMap::new();
        properties.insert(schema::enabled().name().to_string(), Value::Bool(false));
        if let Err(err) = self.endpoint.apply_now(properties) {
            tracing::warn!(instance = self.instance, "Failed to disable pairing: {}", err);
        }
        if let Some(binding) = self.binding.lock().take() {
            binding.release();
        }
    }

    /// Drop the pairing's listeners on its own properties
    pub(crate) fn detach(&self) {
        for id in self.own_listeners.lock().drain(..) {
            self.endpoint.unregister_listener(id);
        }
    }

    fn flag(&self, key: &PropertyKey) -> bool {
        self.endpoint
            .value(key.name())
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn text(&self, key: &PropertyKey) -> Option<String> {
        self.endpoint
            .value(key.name())
            .and_then(|v| v.as_str().map(str::to_string))
    }

    fn transform(&self, key: &PropertyKey) -> Transform {
        self.text(key)
            .and_then(|expr| expr.parse().ok())
            .unwrap_or_else(Transform::identity)
    }

    /// Tear down forwarding and rebuild it from the current configuration
    fn rebind(&self) {
        let mut slot = self.binding.lock();
        if let Some(old) = slot.take() {
            old.release();
        }

        if !self.is_enabled() {
            return;
        }

        let (Some(resolver), Some(runtime)) = (&self.resolver, &self.runtime) else {
            return;
        };

        let source = self.source().and_then(|l| resolver.resolve(&l));
        let destination = self.destination().and_then(|l| resolver.resolve(&l));
        let (Some(source), Some(destination)) = (source, destination) else {
            tracing::debug!(instance = self.instance, "Pairing locators not resolvable");
            return;
        };

        let sent: SentValues = Arc::new(Mutex::new(HashMap::new()));
        let mut watches = Vec::new();

        if self.is_push() {
            watches.push(forward(
                &source,
                &destination,
                self.transform(&schema::forward_transform()),
                Arc::clone(&sent),
                runtime.clone(),
            ));
        }
        if self.is_pull() {
            watches.push(forward(
                &destination,
                &source,
                self.transform(&schema::reverse_transform()),
                Arc::clone(&sent),
                runtime.clone(),
            ));
        }

        tracing::debug!(
            instance = self.instance,
            source = source.locator(),
            destination = destination.locator(),
            directions = watches.len(),
            "Pairing bound"
        );

        *slot = Some(Binding { watches });
    }
}

/// Watch `from` and forward its changes into `to`
fn forward(
    from: &Arc<ResourceLink>,
    to: &Arc<ResourceLink>,
    transform: Transform,
    sent: SentValues,
    runtime: Handle,
) -> (Arc<ResourceLink>, WatcherId) {
    let id = WatcherId::next();
    let origin = from.locator().to_string();
    let target = Arc::clone(to);

    from.register_listener(
        id,
        Arc::new(move |value| {
            let output = {
                let mut sent = sent.lock();

                // Echo of a value this pairing wrote; anything else makes the
                // remembered value stale
                if sent.remove(&origin).as_ref() == Some(value) {
                    return true;
                }

                let output = match transform.apply(value) {
                    Ok(output) => output,
                    Err(err) => {
                        tracing::warn!(from = %origin, "Transform failed: {}", err);
                        return true;
                    }
                };

                sent.insert(target.locator().to_string(), output.clone());
                output
            };

            let target = Arc::clone(&target);
            runtime.spawn(async move {
                if let Err(err) = target.invoke(output).await {
                    tracing::warn!(to = target.locator(), "Forwarding failed: {}", err);
                }
            });
            true
        }),
    );

    (Arc::clone(from), id)
}

#[async_trait]
impl FunctionalEndpoint for Pairing {
    fn property_key(&self, name: &str) -> Option<PropertyKey> {
        self.endpoint.property_key(name)
    }

    async fn fetch_section(&self, section: Section) -> Result<PropertyMap> {
        self.endpoint.fetch_section(section).await
    }

    async fn fetch_property(&self, key: &PropertyKey) -> Result<Value> {
        self.endpoint.fetch_property(key).await
    }

    async fn apply_properties(&self, properties: PropertyMap) -> Result<()> {
        self.endpoint.apply_properties(properties).await
    }

    async fn increment_property(&self, key: &PropertyKey, delta: Value) -> Result<()> {
        self.endpoint.increment_property(key, delta).await
    }

    async fn toggle_property(&self, key: &PropertyKey) -> Result<()> {
        self.endpoint.toggle_property(key).await
    }

    async fn add_value_to_property(&self, key: &PropertyKey, value: Value) -> Result<()> {
        self.endpoint.add_value_to_property(key, value).await
    }

    async fn remove_value_from_property(&self, key: &PropertyKey, value: Value) -> Result<()> {
        self.endpoint.remove_value_from_property(key, value).await
    }

    fn register_property_listener(&self, key: &PropertyKey, listener: PropertyListener) -> ListenerId {
        self.endpoint.register_property_listener(key, listener)
    }

    fn register_section_listener(&self, section: Section, listener: SectionListener) -> ListenerId {
        self.endpoint.register_section_listener(section, listener)
    }

    fn unregister_listener(&self, id: ListenerId) -> bool {
        self.endpoint.unregister_listener(id)
    }
}

impl Persistable for Pairing {
    fn copy_persistent_state(&self) -> StateBlob {
        self.endpoint.copy_persistent_state()
    }

    fn init_with_persistent_state(&self, state: &StateBlob) {
        self.endpoint.init_with_persistent_state(state);
    }

    fn set_persistent_state_listener(&self, listener: Option<PersistListener>) {
        self.endpoint.set_persistent_state_listener(listener);
    }
}

impl Drop for Pairing {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.get_mut().take() {
            binding.release();
        }
    }
}

impl fmt::Debug for Pairing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pairing")
            .field("instance", &self.instance)
            .field("enabled", &self.is_enabled())
            .field("source", &self.source())
            .field("destination", &self.destination())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn level() -> PropertyKey {
        PropertyKey::new(Section::State, "levl", "v", ValueType::Number)
    }

    fn device(name: &str) -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint::new(
            name,
            [PropertySpec::new(level()).with_default(json!(0))],
        ))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_defaults() {
        let pairing = Pairing::new("local", None, None);
        assert!(!pairing.is_enabled());
        assert!(!pairing.is_push());
        assert_eq!(pairing.source(), None);
        assert_eq!(pairing.technology(), Some("local".to_string()));

        let result = pairing.set_property(&schema::technology(), json!("other")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rejects_bad_configuration() {
        let pairing = Pairing::new("local", None, None);
        assert!(pairing.set_property(&schema::source(), json!("not a locator")).await.is_err());
        assert!(pairing.set_property(&schema::forward_transform(), json!("v +")).await.is_err());
        assert!(pairing.set_property(&schema::push(), json!("yes")).await.is_err());
    }

    #[tokio::test]
    async fn test_push_forwards_with_transform() {
        let (a, b) = (device("a"), device("b"));
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert(ResourceLink::create(a.clone(), level(), "/a/s/levl/v"));
        resolver.insert(ResourceLink::create(b.clone(), level(), "/b/s/levl/v"));

        let pairing = Pairing::new("local", Some(resolver), Some(Handle::current()));
        let mut config = PropertyMap::new();
        config.insert("c/pair/src".into(), json!("/a/s/levl/v"));
        config.insert("c/pair/dst".into(), json!("/b/s/levl/v"));
        config.insert("c/pair/push".into(), json!(true));
        config.insert("c/pair/xfwd".into(), json!("v 2 *"));
        pairing.apply_properties(config).await.unwrap();
        assert!(!pairing.is_forwarding());

        pairing.set_property(&schema::enabled(), json!(true)).await.unwrap();
        assert!(pairing.is_forwarding());

        a.set_property(&level(), json!(3)).await.unwrap();
        settle().await;
        assert_eq!(b.value("s/levl/v"), Some(json!(6)));

        // Pull is off: nothing flows back
        b.set_property(&level(), json!(1)).await.unwrap();
        settle().await;
        assert_eq!(a.value("s/levl/v"), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_disable_stops_forwarding() {
        let (a, b) = (device("a"), device("b"));
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert(ResourceLink::create(a.clone(), level(), "/a"));
        resolver.insert(ResourceLink::create(b.clone(), level(), "/b"));

        let pairing = Pairing::new("local", Some(resolver), Some(Handle::current()));
        let mut config = PropertyMap::new();
        config.insert("c/pair/src".into(), json!("/a"));
        config.insert("c/pair/dst".into(), json!("/b"));
        config.insert("c/pair/push".into(), json!(true));
        config.insert("s/enab/v".into(), json!(true));
        pairing.apply_properties(config).await.unwrap();
        assert_eq!(a.listener_count(), 1);

        pairing.disable();
        assert!(!pairing.is_enabled());
        assert!(!pairing.is_forwarding());
        assert_eq!(a.listener_count(), 0);

        a.set_property(&level(), json!(5)).await.unwrap();
        settle().await;
        assert_eq!(b.value("s/levl/v"), Some(json!(0)));
    }

    #[tokio::test]
    async fn test_push_and_pull_settle_without_looping() {
        let (a, b) = (device("a"), device("b"));
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert(ResourceLink::create(a.clone(), level(), "/a"));
        resolver.insert(ResourceLink::create(b.clone(), level(), "/b"));

        let pairing = Pairing::new("local", Some(resolver), Some(Handle::current()));
        let mut config = PropertyMap::new();
        config.insert("c/pair/src".into(), json!("/a"));
        config.insert("c/pair/dst".into(), json!("/b"));
        config.insert("c/pair/push".into(), json!(true));
        config.insert("c/pair/pull".into(), json!(true));
        config.insert("c/pair/xfwd".into(), json!("v 1 +"));
        config.insert("c/pair/xrev".into(), json!("v 1 -"));
        config.insert("s/enab/v".into(), json!(true));
        pairing.apply_properties(config).await.unwrap();

        a.set_property(&level(), json!(10)).await.unwrap();
        settle().await;
        assert_eq!(b.value("s/levl/v"), Some(json!(11)));
        assert_eq!(a.value("s/levl/v"), Some(json!(10)));

        b.set_property(&level(), json!(20)).await.unwrap();
        settle().await;
        assert_eq!(a.value("s/levl/v"), Some(json!(19)));
        assert_eq!(b.value("s/levl/v"), Some(json!(20)));
    }

    #[tokio::test]
    async fn test_mirrors_value_after_destination_changed_on_its_own() {
        let (a, b) = (device("a"), device("b"));
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert(ResourceLink::create(a.clone(), level(), "/a"));
        resolver.insert(ResourceLink::create(b.clone(), level(), "/b"));

        let pairing = Pairing::new("local", Some(resolver), Some(Handle::current()));
        let mut config = PropertyMap::new();
        config.insert("c/pair/src".into(), json!("/a"));
        config.insert("c/pair/dst".into(), json!("/b"));
        config.insert("c/pair/push".into(), json!(true));
        config.insert("c/pair/pull".into(), json!(true));
        config.insert("s/enab/v".into(), json!(true));
        pairing.apply_properties(config).await.unwrap();

        a.set_property(&level(), json!(7)).await.unwrap();
        settle().await;
        assert_eq!(b.value("s/levl/v"), Some(json!(7)));

        b.set_property(&level(), json!(5)).await.unwrap();
        settle().await;
        assert_eq!(a.value("s/levl/v"), Some(json!(5)));

        // 7 was forwarded to b once before; it must still be forwarded again
        a.set_property(&level(), json!(7)).await.unwrap();
        settle().await;
        assert_eq!(b.value("s/levl/v"), Some(json!(7)));
        assert_eq!(a.value("s/levl/v"), Some(json!(7)));
    }
}
