//! The bridging coordinator.
//!
//! Notifications are handled on the caller's thread up to the dedup check.
//! Resolution then runs as a task on the captured runtime, bounded by a
//! semaphore; unavailability and transport removals are applied
//! synchronously against the ledger.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, debug_span, error, info, trace, warn, Instrument};

use super::dedup::LocationDeduplicator;
use super::ledger::{Admission, RegistrationLedger};
use super::proxy::{register_proxy, teardown};
use super::references::ReferenceResolver;
use super::resolver::{ContainerFinder, ContainerResolver};
use crate::config::BridgeConfig;
use crate::container::{
    ContainerManager, ReferenceId, RemoteServiceReference, RemovalEvent, RemovalListener,
    ResolvedContainer, Subscription,
};
use crate::endpoint::{ContainerId, EndpointDescription, EndpointId};
use crate::notification::{
    DiscoveredEndpoint, EndpointAdapter, Notification, NotificationKind, NotificationSink,
    PropertiesEndpointAdapter,
};
use crate::service_space::LocalServiceSpace;
use crate::{Error, Result};

/// Where an endpoint currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Never accepted, or released by an UNAVAILABLE notification.
    Unseen,
    /// Accepted; resolution is in flight.
    PendingResolution,
    /// At least one proxy is registered.
    Registered,
    /// The location is still deduplicated but nothing is registered, either
    /// because resolution failed or transport removals emptied the record.
    /// Another AVAILABLE is ignored until an UNAVAILABLE releases it.
    Retained,
}

/// Result of one resolution pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// This many proxies were registered.
    Registered(usize),
    /// No container could service the endpoint.
    NoContainers,
    /// Containers were found but none returned references.
    NoReferences,
    /// References were found but no proxy was registered.
    NothingRegistered {
        /// How many references the ledger refused as duplicates.
        rejected: usize,
    },
}

impl fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered(n) => write!(f, "registered {n} proxies"),
            Self::NoContainers => f.write_str("no containers"),
            Self::NoReferences => f.write_str("no remote references"),
            Self::NothingRegistered { rejected } => {
                write!(f, "nothing registered ({rejected} rejected)")
            }
        }
    }
}

enum Step {
    Registered,
    Rejected,
    Failed,
}

struct Inner {
    config: BridgeConfig,
    runtime: Handle,
    space: Arc<dyn LocalServiceSpace>,
    adapter: Arc<dyn EndpointAdapter>,
    resolver: ContainerResolver,
    references: ReferenceResolver,
    dedup: LocationDeduplicator,
    ledger: RegistrationLedger,
    limiter: Semaphore,
    tasks: Mutex<JoinSet<()>>,
    finished: Mutex<Vec<(EndpointId, ResolutionOutcome)>>,
    feeds: Mutex<Vec<AbortHandle>>,
    pending: Mutex<HashMap<EndpointId, usize>>,
    idle: Notify,
}

/// Converts discovery notifications into registered local proxies.
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct BridgeCoordinator {
    inner: Arc<Inner>,
}

impl BridgeCoordinator {
    /// Start building a coordinator that registers proxies into `space`.
    pub fn builder(space: Arc<dyn LocalServiceSpace>) -> BridgeCoordinatorBuilder {
        BridgeCoordinatorBuilder::new(space)
    }

    /// Handle an AVAILABLE notification for `endpoint`.
    pub fn available(&self, endpoint: EndpointDescription) {
        if !self.inner.dedup.accept(&endpoint) {
            debug!(
                endpoint = %endpoint.id(),
                location = %endpoint.location(),
                "location already accepted, ignoring"
            );
            return;
        }
        if endpoint.interfaces().is_empty() {
            warn!(endpoint = %endpoint.id(), "endpoint advertises no interfaces");
        }

        let guard = PendingGuard::new(&self.inner, endpoint.id().clone());
        let span = debug_span!(
            "resolution",
            endpoint = %endpoint.id(),
            location = %endpoint.location()
        );
        let inner = Arc::clone(&self.inner);
        let task = async move {
            let _guard = guard;
            let _permit = inner.limiter.acquire().await;
            let outcome = inner.resolve(&endpoint).await;
            match &outcome {
                ResolutionOutcome::Registered(n) => {
                    info!(endpoint = %endpoint.id(), proxies = n, "endpoint imported");
                }
                other => {
                    warn!(endpoint = %endpoint.id(), outcome = %other, "endpoint not imported");
                }
            }
            inner.finished.lock().push((endpoint.id().clone(), outcome));
        };

        let mut tasks = self.inner.tasks.lock();
        reap(&mut tasks);
        tasks.spawn_on(task.instrument(span), &self.inner.runtime);
    }

    /// Handle an UNAVAILABLE notification for `endpoint`.
    ///
    /// Releases the location, then unregisters every proxy for the endpoint.
    pub fn unavailable(&self, endpoint: &EndpointDescription) {
        let released = self.inner.dedup.release(endpoint.location());
        let handles = self.inner.ledger.unregister_all(endpoint);
        if handles.is_empty() && !released {
            debug!(endpoint = %endpoint.id(), "unavailable for unknown endpoint");
            return;
        }
        teardown(self.inner.space.as_ref(), &handles);
        info!(
            endpoint = %endpoint.id(),
            proxies = handles.len(),
            "endpoint unavailable"
        );
    }

    /// Deliver a notification given as a raw OSGi type code.
    pub fn notify_raw(&self, code: u32, endpoint: impl Into<DiscoveredEndpoint>) -> Result<()> {
        self.notify(Notification::from_code(code, endpoint)?);
        Ok(())
    }

    /// Forward every notification from `feed` into this coordinator.
    ///
    /// The feed runs on the coordinator's runtime until it ends or
    /// [`shutdown`](Self::shutdown) is called.
    pub fn attach<S>(&self, feed: S) -> AbortHandle
    where
        S: Stream<Item = Notification> + Send + 'static,
    {
        let this = self.clone();
        let handle = self.inner.runtime.spawn(async move {
            let mut feed = Box::pin(feed);
            while let Some(notification) = feed.next().await {
                this.notify(notification);
            }
            debug!("notification feed ended");
        });
        let abort = handle.abort_handle();
        self.inner.feeds.lock().push(abort.clone());
        abort
    }

    /// Wait for every in-flight resolution, returning the outcomes of all
    /// resolutions completed since the previous call.
    ///
    /// Resolutions aborted by [`shutdown`](Self::shutdown) report nothing.
    pub async fn settle(&self) -> Vec<(EndpointId, ResolutionOutcome)> {
        loop {
            let idle = self.inner.idle.notified();
            let mut idle = std::pin::pin!(idle);
            idle.as_mut().enable();
            if self.inner.pending.lock().is_empty() {
                break;
            }
            idle.await;
        }
        reap(&mut self.inner.tasks.lock());
        std::mem::take(&mut *self.inner.finished.lock())
    }

    /// Abort in-flight resolutions and attached feeds.
    ///
    /// Proxies already registered stay registered.
    pub fn shutdown(&self) {
        self.inner.tasks.lock().abort_all();
        for feed in self.inner.feeds.lock().drain(..) {
            feed.abort();
        }
        debug!("bridge coordinator shut down");
    }

    /// Current state of `endpoint`.
    pub fn state(&self, endpoint: &EndpointDescription) -> EndpointState {
        if self.inner.ledger.contains(endpoint.id()) {
            EndpointState::Registered
        } else if self.inner.pending.lock().contains_key(endpoint.id()) {
            EndpointState::PendingResolution
        } else if self.inner.dedup.contains(endpoint.location()) {
            EndpointState::Retained
        } else {
            EndpointState::Unseen
        }
    }

    /// The registration ledger.
    pub fn ledger(&self) -> &RegistrationLedger {
        &self.inner.ledger
    }

    /// The location deduplicator.
    pub fn deduplicator(&self) -> &LocationDeduplicator {
        &self.inner.dedup
    }

    /// Active configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }
}

impl NotificationSink for BridgeCoordinator {
    fn notify(&self, notification: Notification) {
        let endpoint = match self.inner.adapter.adapt(&notification.endpoint) {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                warn!(kind = %notification.kind, "endpoint description not applicable, ignoring");
                return;
            }
            Err(e) => {
                error!(kind = %notification.kind, error = %e, "could not adapt endpoint description");
                return;
            }
        };
        trace!(kind = %notification.kind, endpoint = %endpoint, "notification");

        match notification.kind {
            NotificationKind::Available => self.available(endpoint),
            NotificationKind::Unavailable => self.unavailable(&endpoint),
            NotificationKind::Modified | NotificationKind::ModifiedEndMatch => {
                debug!(kind = %notification.kind, endpoint = %endpoint.id(), "modification ignored");
            }
        }
    }
}

impl ContainerFinder for BridgeCoordinator {
    fn name(&self) -> &'static str {
        "coordinator"
    }

    fn find(&self, endpoint: &EndpointDescription) -> Vec<ResolvedContainer> {
        self.inner.resolver.resolve_by_namespace(endpoint)
    }
}

impl fmt::Debug for BridgeCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeCoordinator")
            .field("config", &self.inner.config)
            .field("ledger", &self.inner.ledger)
            .field("locations", &self.inner.dedup.len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn resolve(self: &Arc<Self>, endpoint: &EndpointDescription) -> ResolutionOutcome {
        let containers = self.resolver.resolve(endpoint);
        if containers.is_empty() {
            warn!(endpoint = %endpoint.id(), "no remote service containers found");
            return ResolutionOutcome::NoContainers;
        }

        let mut registered = 0;
        let mut rejected = 0;
        let mut any_references = false;
        for container in &containers {
            let found = self.references.resolve(container, endpoint).await;
            if found.is_empty() {
                continue;
            }
            any_references = true;

            let listener = Arc::new(RemovalHandler {
                inner: Arc::downgrade(self),
                container: container.id().clone(),
            });
            let mut subscription = Some(Subscription::new(Arc::clone(container.adapter()), listener));

            // A reference offering several interfaces shows up once per interface.
            let mut seen: Vec<ReferenceId> = Vec::new();
            for reference in found.iter().flat_map(|f| f.references.iter()) {
                if seen.contains(&reference.id()) {
                    continue;
                }
                seen.push(reference.id());
                match self.import(endpoint, container, reference, &mut subscription) {
                    Step::Registered => registered += 1,
                    Step::Rejected => rejected += 1,
                    Step::Failed => {}
                }
            }
        }

        if registered > 0 {
            ResolutionOutcome::Registered(registered)
        } else if !any_references {
            ResolutionOutcome::NoReferences
        } else {
            ResolutionOutcome::NothingRegistered { rejected }
        }
    }

    fn import(
        &self,
        endpoint: &EndpointDescription,
        container: &ResolvedContainer,
        reference: &RemoteServiceReference,
        subscription: &mut Option<Subscription>,
    ) -> Step {
        if let Err(rejection) = self.ledger.accepts(endpoint, container.id(), reference) {
            error!(
                container = %container.id(),
                reference = %reference,
                error = %rejection,
                "endpoint previously registered locally, ignoring"
            );
            return Step::Rejected;
        }

        let handle =
            match register_proxy(self.space.as_ref(), &self.config, endpoint, container, reference) {
                Ok(handle) => handle,
                Err(e) => {
                    error!(
                        container = %container.id(),
                        reference = %reference,
                        error = %e,
                        "could not create or register proxy"
                    );
                    return Step::Failed;
                }
            };

        match self
            .ledger
            .try_register(endpoint, container.id(), reference, handle.clone(), subscription)
        {
            Ok(admission) => {
                debug!(
                    container = %container.id(),
                    reference = %reference,
                    registration = %handle,
                    new_record = admission == Admission::Created,
                    "proxy registered"
                );
                Step::Registered
            }
            Err(rejection) => {
                error!(
                    container = %container.id(),
                    reference = %reference,
                    error = %rejection,
                    "lost registration race, withdrawing proxy"
                );
                teardown(self.space.as_ref(), [&handle]);
                Step::Rejected
            }
        }
    }

    fn transport_removed(&self, container: &ContainerId, event: &RemovalEvent) {
        let removal = self.ledger.unregister_one(container, event.reference.id());
        if removal.is_empty() {
            trace!(
                container = %container,
                reference = %event.reference,
                "removal for unregistered reference"
            );
            return;
        }
        teardown(self.space.as_ref(), &removal.handles);
        for endpoint in &removal.emptied {
            info!(
                endpoint = %endpoint.id(),
                container = %container,
                "last proxy removed by transport"
            );
            if self.config.release_on_transport_removal {
                self.dedup.release(endpoint.location());
            }
        }
    }
}

struct RemovalHandler {
    inner: Weak<Inner>,
    container: ContainerId,
}

impl RemovalListener for RemovalHandler {
    fn on_removed(&self, event: &RemovalEvent) {
        match self.inner.upgrade() {
            Some(inner) => inner.transport_removed(&self.container, event),
            None => trace!(container = %self.container, "removal after coordinator dropped"),
        }
    }
}

struct PendingGuard {
    inner: Arc<Inner>,
    endpoint: EndpointId,
}

impl PendingGuard {
    fn new(inner: &Arc<Inner>, endpoint: EndpointId) -> Self {
        *inner.pending.lock().entry(endpoint.clone()).or_default() += 1;
        Self {
            inner: Arc::clone(inner),
            endpoint,
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let idle = {
            let mut pending = self.inner.pending.lock();
            if let Some(count) = pending.get_mut(&self.endpoint) {
                *count -= 1;
                if *count == 0 {
                    pending.remove(&self.endpoint);
                }
            }
            pending.is_empty()
        };
        if idle {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Drop finished tasks from the set, logging panics.
fn reap(tasks: &mut JoinSet<()>) {
    while let Some(done) = tasks.try_join_next() {
        match done {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(error = %e, "resolution task failed"),
        }
    }
}

/// Builder for [`BridgeCoordinator`].
pub struct BridgeCoordinatorBuilder {
    space: Arc<dyn LocalServiceSpace>,
    config: BridgeConfig,
    resolver: ContainerResolver,
    adapter: Arc<dyn EndpointAdapter>,
    runtime: Option<Handle>,
}

impl BridgeCoordinatorBuilder {
    fn new(space: Arc<dyn LocalServiceSpace>) -> Self {
        Self {
            space,
            config: BridgeConfig::default(),
            resolver: ContainerResolver::new(),
            adapter: Arc::new(PropertiesEndpointAdapter),
            runtime: None,
        }
    }

    /// Use `config`.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a container finder strategy.
    pub fn finder(mut self, finder: Arc<dyn ContainerFinder>) -> Self {
        self.resolver.add_finder(finder);
        self
    }

    /// Resolve containers by connect namespace over `manager`.
    pub fn container_manager(mut self, manager: Arc<dyn ContainerManager>) -> Self {
        self.resolver.set_container_manager(manager);
        self
    }

    /// Replace the default [`PropertiesEndpointAdapter`].
    pub fn endpoint_adapter(mut self, adapter: Arc<dyn EndpointAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Run resolutions on `runtime` instead of the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the coordinator.
    ///
    /// Fails with [`Error::NoRuntime`] when no runtime was given and none is
    /// current.
    pub fn build(self) -> Result<BridgeCoordinator> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| Error::NoRuntime)?,
        };
        if self.resolver.strategy_count() == 0 {
            warn!("bridge coordinator built without container finders");
        }
        let permits = self.config.max_concurrent_resolutions.max(1);
        Ok(BridgeCoordinator {
            inner: Arc::new(Inner {
                limiter: Semaphore::new(permits),
                config: self.config,
                runtime,
                space: self.space,
                adapter: self.adapter,
                resolver: self.resolver,
                references: ReferenceResolver::new(),
                dedup: LocationDeduplicator::new(),
                ledger: RegistrationLedger::new(),
                tasks: Mutex::new(JoinSet::new()),
                finished: Mutex::new(Vec::new()),
                feeds: Mutex::new(Vec::new()),
                pending: Mutex::new(HashMap::new()),
                idle: Notify::new(),
            }),
        })
    }
}

impl fmt::Debug for BridgeCoordinatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeCoordinatorBuilder")
            .field("config", &self.config)
            .field("strategies", &self.resolver.strategy_count())
            .finish_non_exhaustive()
    }
}
