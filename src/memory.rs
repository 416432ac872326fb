//! In-memory collaborators: containers, adapters, a container registry and a
//! service space.
//!
//! Useful for embedding the bridge without a real transport and for tests.
//! The adapter supports failure injection per interface and emits removal
//! events when a published service is withdrawn.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::container::{
    ContainerAdapter, ContainerManager, Proxy, ReferenceId, RemoteService, RemoteServiceReference,
    RemovalEvent, RemovalListener, SubscriptionId, TransportContainer,
};
use crate::endpoint::{keys, ContainerId};
use crate::filter::Filter;
use crate::properties::Properties;
use crate::service_space::{LocalServiceSpace, ProxyRegistration, RegistrationHandle};
use crate::{Error, Result};

/// Failure injected into [`MemoryAdapter::references`] for one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupFailure {
    /// Behave as if the remote container were unreachable.
    Connect,
    /// Behave as if the filter were malformed.
    FilterSyntax,
}

#[derive(Default)]
struct AdapterState {
    services: BTreeMap<ReferenceId, RemoteServiceReference>,
    failures: HashMap<String, LookupFailure>,
    listeners: HashMap<SubscriptionId, Arc<dyn RemovalListener>>,
    lookups: usize,
}

/// Remote-service adapter backed by an in-memory table of published services.
pub struct MemoryAdapter {
    local: ContainerId,
    state: Mutex<AdapterState>,
    next_reference: AtomicU64,
    next_subscription: AtomicU64,
}

impl MemoryAdapter {
    /// Create an adapter for the local container `local`.
    pub fn new(local: ContainerId) -> Self {
        Self {
            local,
            state: Mutex::new(AdapterState::default()),
            next_reference: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Publish a remote service under `interfaces`, returning its reference.
    pub fn publish<I, S>(&self, interfaces: I, properties: Properties) -> RemoteServiceReference
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = ReferenceId(self.next_reference.fetch_add(1, Ordering::Relaxed));
        let classes: Vec<String> = interfaces.into_iter().map(Into::into).collect();
        let properties = properties
            .with(keys::OBJECT_CLASS, classes)
            .with(keys::SERVICE_ID, id.0 as i64);
        let reference = RemoteServiceReference::new(id, self.local.clone(), properties);
        self.state.lock().services.insert(id, reference.clone());
        debug!(container = %self.local, reference = %id, "published memory service");
        reference
    }

    /// Withdraw a published service and notify removal listeners.
    ///
    /// Listeners run on the calling thread after the adapter's lock is released.
    pub fn withdraw(&self, id: ReferenceId) -> bool {
        let (reference, listeners) = {
            let mut state = self.state.lock();
            let Some(reference) = state.services.remove(&id) else {
                return false;
            };
            let listeners: Vec<_> = state.listeners.values().cloned().collect();
            (reference, listeners)
        };
        let event = RemovalEvent {
            local_container: self.local.clone(),
            remote_container: None,
            reference,
        };
        for listener in listeners {
            listener.on_removed(&event);
        }
        true
    }

    /// Make lookups for `interface` fail.
    pub fn fail_interface(&self, interface: impl Into<String>, failure: LookupFailure) {
        self.state.lock().failures.insert(interface.into(), failure);
    }

    /// Stop failing lookups for `interface`.
    pub fn heal_interface(&self, interface: &str) {
        self.state.lock().failures.remove(interface);
    }

    /// Number of active removal listeners.
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Number of reference lookups performed.
    pub fn lookup_count(&self) -> usize {
        self.state.lock().lookups
    }
}

#[async_trait]
impl ContainerAdapter for MemoryAdapter {
    async fn references(
        &self,
        target: Option<&ContainerId>,
        interface: &str,
        filter: Option<&str>,
    ) -> Result<Vec<RemoteServiceReference>> {
        let mut state = self.state.lock();
        state.lookups += 1;
        match state.failures.get(interface) {
            Some(LookupFailure::Connect) => {
                let target = target.map_or_else(|| "<none>".to_owned(), ToString::to_string);
                return Err(Error::connect(format!("{target} unreachable")));
            }
            Some(LookupFailure::FilterSyntax) => {
                return Err(Error::filter_syntax(
                    filter.unwrap_or_default(),
                    "rejected by adapter",
                ))
            }
            None => {}
        }
        let filter = filter.map(Filter::parse).transpose()?;
        let found: Vec<_> = state
            .services
            .values()
            .filter(|r| r.object_classes().iter().any(|c| c == interface))
            .filter(|r| filter.as_ref().map_or(true, |f| f.matches(r.properties())))
            .cloned()
            .collect();
        trace!(container = %self.local, interface, found = found.len(), "memory lookup");
        Ok(found)
    }

    fn remote_service(&self, reference: &RemoteServiceReference) -> Option<Arc<dyn RemoteService>> {
        let state = self.state.lock();
        let published = state.services.get(&reference.id())?;
        Some(Arc::new(MemoryRemoteService {
            reference: published.clone(),
        }))
    }

    fn subscribe(&self, listener: Arc<dyn RemovalListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.state.lock().listeners.insert(id, listener);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().listeners.remove(&id);
    }
}

/// Remote service handed out by [`MemoryAdapter`].
pub struct MemoryRemoteService {
    reference: RemoteServiceReference,
}

impl RemoteService for MemoryRemoteService {
    fn proxy(&self) -> Result<Proxy> {
        Ok(Arc::new(MemoryProxy {
            reference: self.reference.clone(),
        }))
    }
}

/// Proxy object produced by [`MemoryRemoteService`].
#[derive(Debug, Clone)]
pub struct MemoryProxy {
    /// The reference this proxy forwards to.
    pub reference: RemoteServiceReference,
}

/// Transport container living entirely in memory.
pub struct MemoryContainer {
    id: ContainerId,
    namespace: Option<String>,
    adapter: Option<Arc<MemoryAdapter>>,
}

impl MemoryContainer {
    /// Container with a [`MemoryAdapter`], connecting with the id's namespace.
    pub fn new(id: ContainerId) -> Self {
        let namespace = Some(id.namespace().to_owned());
        let adapter = Some(Arc::new(MemoryAdapter::new(id.clone())));
        Self {
            id,
            namespace,
            adapter,
        }
    }

    /// Container without remote-service support.
    pub fn without_adapter(id: ContainerId) -> Self {
        Self {
            namespace: Some(id.namespace().to_owned()),
            id,
            adapter: None,
        }
    }

    /// Override the connect namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// The concrete adapter, for publishing and failure injection.
    pub fn memory_adapter(&self) -> Option<&Arc<MemoryAdapter>> {
        self.adapter.as_ref()
    }
}

impl TransportContainer for MemoryContainer {
    fn id(&self) -> &ContainerId {
        &self.id
    }

    fn connect_namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn adapter(&self) -> Option<Arc<dyn ContainerAdapter>> {
        self.adapter
            .as_ref()
            .map(|a| Arc::clone(a) as Arc<dyn ContainerAdapter>)
    }
}

/// Mutable set of containers implementing [`ContainerManager`].
#[derive(Default)]
pub struct ContainerRegistry {
    containers: Mutex<Vec<Arc<dyn TransportContainer>>>,
}

impl ContainerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a container, replacing any with the same id.
    pub fn add(&self, container: Arc<dyn TransportContainer>) {
        let mut containers = self.containers.lock();
        containers.retain(|c| c.id() != container.id());
        containers.push(container);
    }

    /// Remove a container by id.
    pub fn remove(&self, id: &ContainerId) -> bool {
        let mut containers = self.containers.lock();
        let before = containers.len();
        containers.retain(|c| c.id() != id);
        containers.len() != before
    }
}

impl ContainerManager for ContainerRegistry {
    fn containers(&self) -> Vec<Arc<dyn TransportContainer>> {
        self.containers.lock().clone()
    }
}

struct Entry {
    interfaces: Vec<String>,
    properties: Properties,
    proxy: Proxy,
}

/// Service space that keeps registrations in a map.
///
/// Imports reported through [`LocalServiceSpace::imported`] are tracked
/// separately and listed by [`imported_services`](Self::imported_services).
#[derive(Default)]
pub struct MemoryServiceSpace {
    entries: Mutex<HashMap<u64, Entry>>,
    imports: Mutex<BTreeMap<u64, RemoteServiceReference>>,
    next_id: AtomicU64,
}

impl MemoryServiceSpace {
    /// Create an empty service space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether `handle` is still registered.
    pub fn contains(&self, handle: &RegistrationHandle) -> bool {
        self.entries.lock().contains_key(&handle.id())
    }

    /// Properties of a live registration.
    pub fn properties(&self, handle: &RegistrationHandle) -> Option<Properties> {
        self.entries
            .lock()
            .get(&handle.id())
            .map(|e| e.properties.clone())
    }

    /// Proxy of a live registration.
    pub fn proxy(&self, handle: &RegistrationHandle) -> Option<Proxy> {
        self.entries.lock().get(&handle.id()).map(|e| Arc::clone(&e.proxy))
    }

    /// Handles of every registration published under `interface`.
    pub fn find(&self, interface: &str) -> Vec<RegistrationHandle> {
        let mut found: Vec<_> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| e.interfaces.iter().any(|i| i == interface))
            .map(|(id, e)| RegistrationHandle::new(*id, e.interfaces.clone()))
            .collect();
        found.sort_by_key(RegistrationHandle::id);
        found
    }

    /// Remote services currently imported, in registration order.
    pub fn imported_services(&self) -> Vec<RemoteServiceReference> {
        self.imports.lock().values().cloned().collect()
    }
}

impl LocalServiceSpace for MemoryServiceSpace {
    fn register(&self, registration: ProxyRegistration) -> Result<RegistrationHandle> {
        if registration.interfaces.is_empty() {
            return Err(Error::service_space("no interfaces to register under"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = RegistrationHandle::new(id, registration.interfaces.clone());
        self.entries.lock().insert(
            id,
            Entry {
                interfaces: registration.interfaces,
                properties: registration.properties,
                proxy: registration.proxy,
            },
        );
        Ok(handle)
    }

    fn unregister(&self, handle: &RegistrationHandle) -> Result<()> {
        match self.entries.lock().remove(&handle.id()) {
            Some(_) => Ok(()),
            None => Err(Error::AlreadyUnregistered(handle.id())),
        }
    }

    fn imported(&self, handle: &RegistrationHandle, reference: &RemoteServiceReference) {
        trace!(registration = %handle, reference = %reference, "remote service imported");
        self.imports.lock().insert(handle.id(), reference.clone());
    }

    fn withdrawn(&self, handle: &RegistrationHandle) {
        if let Some(reference) = self.imports.lock().remove(&handle.id()) {
            trace!(registration = %handle, reference = %reference, "remote service withdrawn");
        }
    }
}
