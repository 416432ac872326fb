//! Container resolution: pluggable finder strategies plus namespace matching.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::container::{ContainerManager, ResolvedContainer};
use crate::endpoint::EndpointDescription;

/// A pluggable strategy for finding containers able to reach an endpoint.
///
/// Finders are consulted in registration order; their results are
/// concatenated. A finder that does not apply returns an empty vec.
pub trait ContainerFinder: Send + Sync + 'static {
    /// Human-readable name for logging (e.g. "namespace", "static").
    fn name(&self) -> &'static str;

    /// Containers able to service `endpoint`.
    fn find(&self, endpoint: &EndpointDescription) -> Vec<ResolvedContainer>;
}

/// Finder that always returns a fixed list of containers.
#[derive(Clone, Debug, Default)]
pub struct StaticFinder {
    containers: Vec<ResolvedContainer>,
}

impl StaticFinder {
    /// Create a finder over `containers`.
    pub fn new<I>(containers: I) -> Self
    where
        I: IntoIterator<Item = ResolvedContainer>,
    {
        Self {
            containers: containers.into_iter().collect(),
        }
    }
}

impl ContainerFinder for StaticFinder {
    fn name(&self) -> &'static str {
        "static"
    }

    fn find(&self, _endpoint: &EndpointDescription) -> Vec<ResolvedContainer> {
        self.containers.clone()
    }
}

/// Finder matching a container's connect namespace against the endpoint's.
///
/// Containers without a remote-service adapter are never candidates.
#[derive(Clone)]
pub struct NamespaceFinder {
    manager: Arc<dyn ContainerManager>,
}

impl NamespaceFinder {
    /// Create a finder over every container known to `manager`.
    pub fn new(manager: Arc<dyn ContainerManager>) -> Self {
        Self { manager }
    }
}

impl ContainerFinder for NamespaceFinder {
    fn name(&self) -> &'static str {
        "namespace"
    }

    fn find(&self, endpoint: &EndpointDescription) -> Vec<ResolvedContainer> {
        let Some(wanted) = endpoint.connect_namespace() else {
            trace!(endpoint = %endpoint.id(), "endpoint has no connect namespace");
            return Vec::new();
        };
        let containers = self.manager.containers();
        if containers.is_empty() {
            warn!("no containers known to container manager");
            return Vec::new();
        }
        containers
            .into_iter()
            .filter(|c| c.connect_namespace() == Some(wanted))
            .filter_map(ResolvedContainer::from_container)
            .collect()
    }
}

/// Enumerates local transport containers able to service an endpoint.
#[derive(Clone, Default)]
pub struct ContainerResolver {
    finders: Vec<Arc<dyn ContainerFinder>>,
    namespace: Option<NamespaceFinder>,
}

impl ContainerResolver {
    /// Create a resolver with no strategies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a finder strategy.
    pub fn add_finder(&mut self, finder: Arc<dyn ContainerFinder>) {
        self.finders.push(finder);
    }

    /// Layer namespace matching over `manager` beneath the pluggable finders.
    pub fn set_container_manager(&mut self, manager: Arc<dyn ContainerManager>) {
        self.namespace = Some(NamespaceFinder::new(manager));
    }

    /// Number of strategies, including the namespace path.
    pub fn strategy_count(&self) -> usize {
        self.finders.len() + usize::from(self.namespace.is_some())
    }

    /// Containers able to service `endpoint`.
    ///
    /// Empty when no strategy applies; the caller treats that as nothing to
    /// do. More than one container is allowed but logged.
    pub fn resolve(&self, endpoint: &EndpointDescription) -> Vec<ResolvedContainer> {
        if self.strategy_count() == 0 {
            error!(endpoint = %endpoint.id(), "no container finders available");
            return Vec::new();
        }

        let mut result = Vec::new();
        for finder in &self.finders {
            collect_from(finder.as_ref(), endpoint, &mut result);
        }
        if let Some(namespace) = &self.namespace {
            collect_from(namespace, endpoint, &mut result);
        }

        if result.len() > 1 {
            warn!(
                endpoint = %endpoint.id(),
                count = result.len(),
                "multiple remote service containers found for endpoint"
            );
        }
        result
    }

    /// Only the namespace-matching path.
    pub fn resolve_by_namespace(&self, endpoint: &EndpointDescription) -> Vec<ResolvedContainer> {
        self.namespace
            .as_ref()
            .map(|n| n.find(endpoint))
            .unwrap_or_default()
    }
}

fn collect_from(
    finder: &dyn ContainerFinder,
    endpoint: &EndpointDescription,
    out: &mut Vec<ResolvedContainer>,
) {
    let found = finder.find(endpoint);
    if found.is_empty() {
        return;
    }
    debug!(
        finder = finder.name(),
        endpoint = %endpoint.id(),
        containers = ?found.iter().map(|c| c.id().to_string()).collect::<Vec<_>>(),
        "finder returned containers"
    );
    out.extend(found);
}
