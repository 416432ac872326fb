//! Turning a remote reference into a registered local proxy, and back.

use tracing::{error, trace, warn};

use crate::config::BridgeConfig;
use crate::container::{RemoteServiceReference, ResolvedContainer};
use crate::endpoint::{keys, EndpointDescription};
use crate::properties::{Properties, PropertyValue};
use crate::service_space::{LocalServiceSpace, ProxyRegistration, RegistrationHandle};
use crate::{Error, Result};

/// Properties published with a proxy for `reference`.
///
/// Reference properties are copied except reserved keys; the import markers
/// are added on top.
pub fn proxy_properties(
    config: &BridgeConfig,
    endpoint: &EndpointDescription,
    container: &ResolvedContainer,
    reference: &RemoteServiceReference,
) -> Properties {
    let mut props: Properties = reference
        .properties()
        .iter()
        .filter(|(k, _)| !config.is_reserved(k))
        .map(|(k, v)| (k, v.clone()))
        .collect();
    props.insert(keys::SERVICE_IMPORTED, PropertyValue::Bool(true));
    props.insert(keys::ENDPOINT_ID, endpoint.id().as_str());
    let configs = container
        .container()
        .connect_namespace()
        .unwrap_or_else(|| container.id().namespace());
    props.insert(keys::SERVICE_IMPORTED_CONFIGS, vec![configs.to_owned()]);
    props
}

/// Create a proxy for `reference` and register it in `space`.
pub fn register_proxy(
    space: &dyn LocalServiceSpace,
    config: &BridgeConfig,
    endpoint: &EndpointDescription,
    container: &ResolvedContainer,
    reference: &RemoteServiceReference,
) -> Result<RegistrationHandle> {
    let remote = container
        .adapter()
        .remote_service(reference)
        .ok_or_else(|| Error::proxy(format!("no remote service for {reference}")))?;

    let interfaces = reference.object_classes();
    if interfaces.is_empty() {
        return Err(Error::MissingProperty(keys::OBJECT_CLASS));
    }

    let properties = proxy_properties(config, endpoint, container, reference);
    let proxy = remote.proxy()?;
    trace!(
        endpoint = %endpoint.id(),
        container = %container.id(),
        reference = %reference,
        ?interfaces,
        "registering proxy"
    );
    let handle = space.register(ProxyRegistration {
        interfaces,
        proxy,
        properties,
        remote,
    })?;
    space.imported(&handle, reference);
    Ok(handle)
}

/// Unregister proxies, logging and swallowing failures.
pub fn teardown<'a, I>(space: &dyn LocalServiceSpace, handles: I)
where
    I: IntoIterator<Item = &'a RegistrationHandle>,
{
    for handle in handles {
        match space.unregister(handle) {
            Ok(()) => trace!(registration = %handle, "proxy unregistered"),
            Err(e @ Error::AlreadyUnregistered(_)) => {
                warn!(registration = %handle, error = %e, "proxy was already unregistered");
            }
            Err(e) => {
                error!(registration = %handle, error = %e, "failed to unregister proxy");
            }
        }
        space.withdrawn(handle);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::container::TransportContainer;
    use crate::endpoint::{ContainerId, ServiceLocation};
    use crate::memory::{MemoryContainer, MemoryProxy, MemoryServiceSpace};

    fn setup() -> (Arc<MemoryContainer>, ResolvedContainer, EndpointDescription) {
        let container =
            Arc::new(MemoryContainer::new(ContainerId::new("generic", "c1")).with_namespace("ecf.generic"));
        let dyn_container: Arc<dyn TransportContainer> = container.clone();
        let resolved = ResolvedContainer::from_container(dyn_container).unwrap();
        let endpoint = EndpointDescription::builder("e1", ServiceLocation::parse("loc://svc1").unwrap())
            .interface("IFoo")
            .build();
        (container, resolved, endpoint)
    }

    #[test]
    fn properties_drop_reserved_keys_and_mark_import() {
        let (container, resolved, endpoint) = setup();
        let reference = container.memory_adapter().unwrap().publish(
            ["IFoo"],
            Properties::new()
                .with("region", "eu")
                .with(keys::ENDPOINT_LOCATION, "loc://elsewhere"),
        );

        let props = proxy_properties(&BridgeConfig::default(), &endpoint, &resolved, &reference);
        assert_eq!(props.get_str("region"), Some("eu"));
        assert!(!props.contains_key(keys::OBJECT_CLASS));
        assert!(!props.contains_key(keys::SERVICE_ID));
        assert!(!props.contains_key(keys::ENDPOINT_LOCATION));
        assert_eq!(props.get(keys::SERVICE_IMPORTED).and_then(PropertyValue::as_bool), Some(true));
        assert_eq!(props.get_str(keys::ENDPOINT_ID), Some("e1"));
        assert_eq!(props.get_strings(keys::SERVICE_IMPORTED_CONFIGS), ["ecf.generic"]);
    }

    #[test]
    fn registers_under_object_classes() {
        let (container, resolved, endpoint) = setup();
        let reference = container
            .memory_adapter()
            .unwrap()
            .publish(["IFoo", "IBar"], Properties::new());
        let space = MemoryServiceSpace::new();

        let handle =
            register_proxy(&space, &BridgeConfig::default(), &endpoint, &resolved, &reference).unwrap();
        assert_eq!(handle.interfaces(), ["IFoo", "IBar"]);
        let proxy = space.proxy(&handle).unwrap();
        let proxy = proxy.downcast_ref::<MemoryProxy>().unwrap();
        assert_eq!(proxy.reference.id(), reference.id());
        assert_eq!(space.imported_services(), [reference]);
    }

    #[test]
    fn missing_remote_service_or_classes_fail() {
        let (container, resolved, endpoint) = setup();
        let adapter = container.memory_adapter().unwrap();
        let space = MemoryServiceSpace::new();
        let config = BridgeConfig::default();

        let withdrawn = adapter.publish(["IFoo"], Properties::new());
        adapter.withdraw(withdrawn.id());
        assert!(matches!(
            register_proxy(&space, &config, &endpoint, &resolved, &withdrawn),
            Err(Error::ProxyUnavailable(_))
        ));

        let classless = adapter.publish(Vec::<String>::new(), Properties::new());
        assert!(matches!(
            register_proxy(&space, &config, &endpoint, &resolved, &classless),
            Err(Error::MissingProperty(keys::OBJECT_CLASS))
        ));
        assert!(space.is_empty());
    }

    #[test]
    fn teardown_tolerates_double_unregister() {
        let (container, resolved, endpoint) = setup();
        let reference = container
            .memory_adapter()
            .unwrap()
            .publish(["IFoo"], Properties::new());
        let space = MemoryServiceSpace::new();
        let handle =
            register_proxy(&space, &BridgeConfig::default(), &endpoint, &resolved, &reference).unwrap();

        assert_eq!(space.imported_services().len(), 1);
        teardown(&space, [&handle]);
        teardown(&space, [&handle]);
        assert!(space.is_empty());
        assert!(space.imported_services().is_empty());
    }
}
