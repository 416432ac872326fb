//! Per-interface remote reference lookup.

use futures_util::future::join_all;
use tracing::{debug, error, trace};

use crate::container::{RemoteServiceReference, ResolvedContainer};
use crate::endpoint::EndpointDescription;
use crate::Error;

/// References found for one provided interface.
#[derive(Debug, Clone)]
pub struct InterfaceReferences {
    /// The interface that was looked up.
    pub interface: String,
    /// References returned by the adapter; never empty.
    pub references: Vec<RemoteServiceReference>,
}

/// Looks up remote references for each interface an endpoint provides.
///
/// Interfaces are resolved concurrently and independently: a failure or an
/// empty result for one interface is logged and never affects the others.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceResolver;

impl ReferenceResolver {
    /// Create a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolve references for every provided interface of `endpoint` through
    /// `container`. Interfaces that fail or return nothing are omitted.
    pub async fn resolve(
        &self,
        container: &ResolvedContainer,
        endpoint: &EndpointDescription,
    ) -> Vec<InterfaceReferences> {
        let target = endpoint.connect_target();
        let filter = endpoint.remote_filter();

        let lookups = endpoint.interfaces().iter().map(|interface| async move {
            trace!(
                container = %container.id(),
                endpoint = %endpoint.id(),
                interface = %interface,
                filter,
                "looking up remote references"
            );
            let result = container.adapter().references(target, interface, filter).await;
            (interface, result)
        });

        let mut found = Vec::new();
        for (interface, result) in join_all(lookups).await {
            match result {
                Ok(references) if references.is_empty() => {
                    error!(
                        container = %container.id(),
                        endpoint = %endpoint.id(),
                        interface = %interface,
                        "remote reference lookup returned nothing"
                    );
                }
                Ok(references) => {
                    debug!(
                        container = %container.id(),
                        endpoint = %endpoint.id(),
                        interface = %interface,
                        count = references.len(),
                        "resolved remote references"
                    );
                    found.push(InterfaceReferences {
                        interface: interface.clone(),
                        references,
                    });
                }
                Err(e @ Error::Connect(_)) => {
                    error!(
                        container = %container.id(),
                        endpoint = %endpoint.id(),
                        interface = %interface,
                        error = %e,
                        "connect error looking up remote references"
                    );
                }
                Err(e @ Error::FilterSyntax { .. }) => {
                    error!(
                        container = %container.id(),
                        endpoint = %endpoint.id(),
                        interface = %interface,
                        error = %e,
                        "filter syntax error looking up remote references"
                    );
                }
                Err(e) => {
                    error!(
                        container = %container.id(),
                        endpoint = %endpoint.id(),
                        interface = %interface,
                        error = %e,
                        "remote reference lookup failed"
                    );
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::container::TransportContainer;
    use crate::endpoint::{ContainerId, ServiceLocation};
    use crate::memory::{LookupFailure, MemoryContainer};
    use crate::properties::Properties;

    fn setup() -> (Arc<MemoryContainer>, ResolvedContainer) {
        let container = Arc::new(MemoryContainer::new(ContainerId::new("mem", "c1")));
        let dyn_container: Arc<dyn TransportContainer> = container.clone();
        let resolved = ResolvedContainer::from_container(dyn_container).unwrap();
        (container, resolved)
    }

    fn endpoint(interfaces: &[&str], filter: Option<&str>) -> EndpointDescription {
        let mut b = EndpointDescription::builder("e1", ServiceLocation::parse("loc://svc1").unwrap())
            .interfaces(interfaces.iter().copied());
        if let Some(f) = filter {
            b = b.filter(f);
        }
        b.build()
    }

    #[tokio::test]
    async fn failure_on_one_interface_does_not_block_others() {
        let (container, resolved) = setup();
        let adapter = container.memory_adapter().unwrap();
        adapter.publish(["IFoo"], Properties::new());
        adapter.publish(["IBar"], Properties::new());
        adapter.fail_interface("IFoo", LookupFailure::Connect);

        let found = ReferenceResolver::new()
            .resolve(&resolved, &endpoint(&["IFoo", "IBar", "IBaz"], None))
            .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].interface, "IBar");
        assert_eq!(found[0].references.len(), 1);
        assert_eq!(adapter.lookup_count(), 3);
    }

    #[tokio::test]
    async fn malformed_filter_skips_every_interface() {
        let (container, resolved) = setup();
        container
            .memory_adapter()
            .unwrap()
            .publish(["IFoo"], Properties::new());

        let found = ReferenceResolver::new()
            .resolve(&resolved, &endpoint(&["IFoo"], Some("(broken")))
            .await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn filter_narrows_references() {
        let (container, resolved) = setup();
        let adapter = container.memory_adapter().unwrap();
        adapter.publish(["IFoo"], Properties::new().with("region", "eu"));
        adapter.publish(["IFoo"], Properties::new().with("region", "us"));

        let found = ReferenceResolver::new()
            .resolve(&resolved, &endpoint(&["IFoo"], Some("(region=us)")))
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].references[0].properties().get_str("region"),
            Some("us")
        );
    }
}
