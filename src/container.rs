//! Transport containers, their remote-service adapters, and the references
//! and removal events they produce.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::endpoint::{keys, ContainerId};
use crate::properties::Properties;
use crate::Result;

/// A local proxy object standing in for a remote service.
pub type Proxy = Arc<dyn Any + Send + Sync>;

/// Identifier of a remote service reference, unique within its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceId(pub u64);

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{}", self.0)
    }
}

/// Handle to one concrete remote service instance reachable through a container.
#[derive(Debug, Clone)]
pub struct RemoteServiceReference {
    id: ReferenceId,
    container: ContainerId,
    properties: Properties,
}

impl RemoteServiceReference {
    /// Create a reference.
    pub fn new(id: ReferenceId, container: ContainerId, properties: Properties) -> Self {
        Self {
            id,
            container,
            properties,
        }
    }

    /// Reference id.
    pub fn id(&self) -> ReferenceId {
        self.id
    }

    /// Container that returned this reference.
    pub fn container(&self) -> &ContainerId {
        &self.container
    }

    /// Remote service properties.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Interfaces the remote service is registered under (`objectClass`).
    pub fn object_classes(&self) -> Vec<String> {
        self.properties.get_strings(keys::OBJECT_CLASS)
    }
}

impl PartialEq for RemoteServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.container == other.container
    }
}

impl Eq for RemoteServiceReference {}

impl fmt::Display for RemoteServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.id)
    }
}

/// A callable remote service obtained from a reference.
pub trait RemoteService: Send + Sync + 'static {
    /// Produce the local proxy object.
    fn proxy(&self) -> Result<Proxy>;
}

/// Event delivered when a previously returned reference goes away.
#[derive(Debug, Clone)]
pub struct RemovalEvent {
    /// Local container that observed the removal.
    pub local_container: ContainerId,
    /// Remote container that hosted the service, if known.
    pub remote_container: Option<ContainerId>,
    /// The reference that is no longer available.
    pub reference: RemoteServiceReference,
}

/// Receives reference-removal events. May be invoked from any thread.
pub trait RemovalListener: Send + Sync + 'static {
    /// Handle a removal.
    fn on_removed(&self, event: &RemovalEvent);
}

/// Token identifying a listener registration on an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Remote-service capability of a transport container.
#[async_trait]
pub trait ContainerAdapter: Send + Sync + 'static {
    /// Look up references for `interface` on the remote container `target`.
    ///
    /// Fails with [`Error::Connect`](crate::Error::Connect) when the transport
    /// is unreachable and [`Error::FilterSyntax`](crate::Error::FilterSyntax)
    /// for a malformed filter. An empty vec is not an error.
    async fn references(
        &self,
        target: Option<&ContainerId>,
        interface: &str,
        filter: Option<&str>,
    ) -> Result<Vec<RemoteServiceReference>>;

    /// Resolve a reference into a callable remote service.
    fn remote_service(&self, reference: &RemoteServiceReference) -> Option<Arc<dyn RemoteService>>;

    /// Register a removal listener.
    fn subscribe(&self, listener: Arc<dyn RemovalListener>) -> SubscriptionId;

    /// Remove a removal listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// A local capability to communicate with remote containers.
pub trait TransportContainer: Send + Sync + 'static {
    /// Container identity.
    fn id(&self) -> &ContainerId;

    /// Name of the namespace this container connects with.
    fn connect_namespace(&self) -> Option<&str>;

    /// Remote-service adapter, if this container supports remote services.
    fn adapter(&self) -> Option<Arc<dyn ContainerAdapter>>;
}

/// Enumerates every transport container known locally.
pub trait ContainerManager: Send + Sync + 'static {
    /// Snapshot of all containers.
    fn containers(&self) -> Vec<Arc<dyn TransportContainer>>;
}

/// A container paired with its remote-service adapter.
#[derive(Clone)]
pub struct ResolvedContainer {
    container: Arc<dyn TransportContainer>,
    adapter: Arc<dyn ContainerAdapter>,
}

impl ResolvedContainer {
    /// Pair a container with an adapter.
    pub fn new(container: Arc<dyn TransportContainer>, adapter: Arc<dyn ContainerAdapter>) -> Self {
        Self { container, adapter }
    }

    /// Pair a container with its own adapter, if it has one.
    pub fn from_container(container: Arc<dyn TransportContainer>) -> Option<Self> {
        let adapter = container.adapter()?;
        Some(Self { container, adapter })
    }

    /// Container identity.
    pub fn id(&self) -> &ContainerId {
        self.container.id()
    }

    /// The container.
    pub fn container(&self) -> &Arc<dyn TransportContainer> {
        &self.container
    }

    /// The remote-service adapter.
    pub fn adapter(&self) -> &Arc<dyn ContainerAdapter> {
        &self.adapter
    }
}

impl fmt::Debug for ResolvedContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedContainer")
            .field("id", self.id())
            .field("namespace", &self.container.connect_namespace())
            .finish()
    }
}

/// A live listener registration; cancelled when dropped.
pub struct Subscription {
    adapter: Arc<dyn ContainerAdapter>,
    id: SubscriptionId,
}

impl Subscription {
    /// Subscribe `listener` to `adapter`'s removal events.
    pub fn new(adapter: Arc<dyn ContainerAdapter>, listener: Arc<dyn RemovalListener>) -> Self {
        let id = adapter.subscribe(listener);
        Self { adapter, id }
    }

    /// Subscription token.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        tracing::trace!(subscription = self.id.0, "cancelling removal subscription");
        self.adapter.unsubscribe(self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Subscription").field(&self.id.0).finish()
    }
}
