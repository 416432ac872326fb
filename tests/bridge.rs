use std::sync::Arc;
use std::time::Duration;

use discovery_bridge::container::ReferenceId;
use discovery_bridge::endpoint::keys;
use discovery_bridge::memory::{
    ContainerRegistry, LookupFailure, MemoryAdapter, MemoryContainer, MemoryProxy,
    MemoryServiceSpace,
};
use discovery_bridge::{
    BridgeConfig, BridgeCoordinator, ContainerId, EndpointDescription, EndpointState, Notification,
    NotificationHub, NotificationSink, Properties, PropertyValue, ResolutionOutcome,
    ServiceLocation,
};

struct Fixture {
    coordinator: BridgeCoordinator,
    registry: Arc<ContainerRegistry>,
    space: Arc<MemoryServiceSpace>,
}

impl Fixture {
    fn new(config: BridgeConfig) -> Self {
        let registry = Arc::new(ContainerRegistry::new());
        let space = Arc::new(MemoryServiceSpace::new());
        let coordinator = BridgeCoordinator::builder(space.clone())
            .config(config)
            .container_manager(registry.clone())
            .build()
            .unwrap();
        Self {
            coordinator,
            registry,
            space,
        }
    }

    fn container(&self, name: &str) -> Arc<MemoryAdapter> {
        let container = Arc::new(MemoryContainer::new(ContainerId::new("generic", name)));
        let adapter = Arc::clone(container.memory_adapter().unwrap());
        self.registry.add(container);
        adapter
    }
}

fn endpoint(id: &str, location: &str, interfaces: &[&str]) -> EndpointDescription {
    EndpointDescription::builder(id, ServiceLocation::parse(location).unwrap())
        .interfaces(interfaces.iter().copied())
        .connect_namespace("generic")
        .build()
}

async fn wait_for(coordinator: &BridgeCoordinator, endpoint: &EndpointDescription, state: EndpointState) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while coordinator.state(endpoint) != state {
            tokio::task::yield_now().await;
            coordinator.settle().await;
        }
    })
    .await
    .unwrap();
}

#[test_log::test(tokio::test)]
async fn test_single_endpoint_single_registration() {
    let fx = Fixture::new(BridgeConfig::default());
    let adapter = fx.container("c1");
    let reference = adapter.publish(["IFoo"], Properties::new().with("region", "eu"));
    let e1 = endpoint("e1", "loc://svc1", &["IFoo"]);

    fx.coordinator.notify(Notification::available(e1.clone()));
    let outcomes = fx.coordinator.settle().await;
    assert_eq!(outcomes, vec![(e1.id().clone(), ResolutionOutcome::Registered(1))]);

    let handles = fx.space.find("IFoo");
    assert_eq!(handles.len(), 1);
    let props = fx.space.properties(&handles[0]).unwrap();
    assert_eq!(props.get_str("region"), Some("eu"));
    assert_eq!(props.get_str(keys::ENDPOINT_ID), Some("e1"));
    assert_eq!(
        props.get(keys::SERVICE_IMPORTED),
        Some(&PropertyValue::Bool(true))
    );
    assert!(!props.contains_key(keys::OBJECT_CLASS));

    let proxy = fx.space.proxy(&handles[0]).unwrap();
    assert_eq!(
        proxy.downcast_ref::<MemoryProxy>().unwrap().reference.id(),
        reference.id()
    );

    let records = fx.coordinator.ledger().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].container, ContainerId::new("generic", "c1"));
    assert_eq!(records[0].registrations[0].1, handles[0]);
    assert_eq!(adapter.listener_count(), 1);
}

#[test_log::test(tokio::test)]
async fn test_repeated_available_registers_once() {
    let fx = Fixture::new(BridgeConfig::default());
    let adapter = fx.container("c1");
    adapter.publish(["IFoo"], Properties::new());
    let e1 = endpoint("e1", "loc://svc1", &["IFoo"]);

    fx.coordinator.available(e1.clone());
    fx.coordinator.available(e1.clone());
    // another id at the same location is deduplicated as well
    fx.coordinator.available(endpoint("e1-copy", "loc://svc1", &["IFoo"]));

    assert_eq!(fx.coordinator.settle().await.len(), 1);
    assert_eq!(fx.space.len(), 1);
    assert_eq!(adapter.lookup_count(), 1);
}

#[test_log::test(tokio::test)]
async fn test_unavailable_then_available_registers_again() {
    let fx = Fixture::new(BridgeConfig::default());
    let adapter = fx.container("c1");
    adapter.publish(["IFoo"], Properties::new());
    let e1 = endpoint("e1", "loc://svc1", &["IFoo"]);

    fx.coordinator.available(e1.clone());
    fx.coordinator.settle().await;
    let first = fx.space.find("IFoo");

    fx.coordinator.notify(Notification::unavailable(e1.clone()));
    assert!(fx.space.is_empty());
    assert!(fx.coordinator.ledger().is_empty());
    assert!(!fx.coordinator.deduplicator().contains(e1.location()));
    assert_eq!(adapter.listener_count(), 0);

    fx.coordinator.available(e1.clone());
    fx.coordinator.settle().await;
    let second = fx.space.find("IFoo");
    assert_eq!(second.len(), 1);
    assert_ne!(first, second);
    assert_eq!(fx.coordinator.state(&e1), EndpointState::Registered);
}

#[test_log::test(tokio::test)]
async fn test_connect_error_falls_through_to_surviving_container() {
    let fx = Fixture::new(BridgeConfig::default());
    let broken = fx.container("a");
    let healthy = fx.container("b");
    broken.publish(["IFoo"], Properties::new());
    broken.fail_interface("IFoo", LookupFailure::Connect);
    healthy.publish(["IFoo"], Properties::new());
    let e1 = endpoint("e1", "loc://svc1", &["IFoo"]);

    fx.coordinator.available(e1.clone());
    let outcomes = fx.coordinator.settle().await;
    assert_eq!(outcomes[0].1, ResolutionOutcome::Registered(1));

    let records = fx.coordinator.ledger().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].container, ContainerId::new("generic", "b"));
    assert_eq!(broken.listener_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_second_container_is_rejected_for_same_endpoint() {
    let fx = Fixture::new(BridgeConfig::default());
    let first = fx.container("a");
    let second = fx.container("b");
    first.publish(["IFoo"], Properties::new());
    second.publish(["IFoo"], Properties::new());
    let e1 = endpoint("e1", "loc://svc1", &["IFoo"]);

    fx.coordinator.available(e1.clone());
    let outcomes = fx.coordinator.settle().await;
    assert_eq!(outcomes[0].1, ResolutionOutcome::Registered(1));
    assert_eq!(fx.space.len(), 1);
    assert_eq!(
        fx.coordinator.ledger().records()[0].container,
        ContainerId::new("generic", "a")
    );
    // the rejected container's subscription was not kept
    assert_eq!(second.listener_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_interface_failure_does_not_block_other_interfaces() {
    let fx = Fixture::new(BridgeConfig::default());
    let adapter = fx.container("c1");
    adapter.publish(["IFoo"], Properties::new());
    adapter.publish(["IBar"], Properties::new());
    adapter.fail_interface("IFoo", LookupFailure::FilterSyntax);
    let e1 = endpoint("e1", "loc://svc1", &["IFoo", "IBar"]);

    fx.coordinator.available(e1.clone());
    fx.coordinator.settle().await;

    assert!(fx.space.find("IFoo").is_empty());
    assert_eq!(fx.space.find("IBar").len(), 1);
    assert_eq!(fx.coordinator.state(&e1), EndpointState::Registered);
}

#[test_log::test(tokio::test)]
async fn test_reference_with_several_interfaces_registers_once() {
    let fx = Fixture::new(BridgeConfig::default());
    let adapter = fx.container("c1");
    adapter.publish(["IFoo", "IBar"], Properties::new());
    let e1 = endpoint("e1", "loc://svc1", &["IFoo", "IBar"]);

    fx.coordinator.available(e1.clone());
    let outcomes = fx.coordinator.settle().await;
    assert_eq!(outcomes[0].1, ResolutionOutcome::Registered(1));
    assert_eq!(fx.space.find("IFoo"), fx.space.find("IBar"));
}

#[test_log::test(tokio::test)]
async fn test_transport_removal_keeps_location_deduplicated() {
    let fx = Fixture::new(BridgeConfig::default());
    let adapter = fx.container("c1");
    let r1 = adapter.publish(["IFoo"], Properties::new());
    let r2 = adapter.publish(["IFoo"], Properties::new());
    let e1 = endpoint("e1", "loc://svc1", &["IFoo"]);

    fx.coordinator.available(e1.clone());
    fx.coordinator.settle().await;
    assert_eq!(fx.space.len(), 2);

    assert!(adapter.withdraw(r1.id()));
    assert_eq!(fx.space.len(), 1);
    assert_eq!(fx.coordinator.state(&e1), EndpointState::Registered);
    let remaining: Vec<ReferenceId> = fx.coordinator.ledger().records()[0]
        .registrations
        .iter()
        .map(|(r, _)| *r)
        .collect();
    assert_eq!(remaining, vec![r2.id()]);

    assert!(adapter.withdraw(r2.id()));
    assert!(fx.space.is_empty());
    assert_eq!(fx.coordinator.state(&e1), EndpointState::Retained);
    assert_eq!(adapter.listener_count(), 0);

    // the location is only released by an explicit UNAVAILABLE
    adapter.publish(["IFoo"], Properties::new());
    fx.coordinator.available(e1.clone());
    assert!(fx.coordinator.settle().await.is_empty());

    fx.coordinator.unavailable(&e1);
    assert_eq!(fx.coordinator.state(&e1), EndpointState::Unseen);
    fx.coordinator.available(e1.clone());
    assert_eq!(
        fx.coordinator.settle().await[0].1,
        ResolutionOutcome::Registered(1)
    );
}

#[test_log::test(tokio::test)]
async fn test_transport_removal_can_release_location() {
    let fx = Fixture::new(BridgeConfig::default().release_on_transport_removal(true));
    let adapter = fx.container("c1");
    let reference = adapter.publish(["IFoo"], Properties::new());
    let e1 = endpoint("e1", "loc://svc1", &["IFoo"]);

    fx.coordinator.available(e1.clone());
    fx.coordinator.settle().await;
    adapter.withdraw(reference.id());
    assert_eq!(fx.coordinator.state(&e1), EndpointState::Unseen);

    adapter.publish(["IFoo"], Properties::new());
    fx.coordinator.available(e1.clone());
    assert_eq!(
        fx.coordinator.settle().await[0].1,
        ResolutionOutcome::Registered(1)
    );
}

#[test_log::test(tokio::test)]
async fn test_remote_filter_selects_references() {
    let fx = Fixture::new(BridgeConfig::default());
    let adapter = fx.container("c1");
    adapter.publish(["IFoo"], Properties::new().with("tier", 1i64));
    adapter.publish(["IFoo"], Properties::new().with("tier", 3i64));
    let e1 = EndpointDescription::builder("e1", ServiceLocation::parse("loc://svc1").unwrap())
        .interface("IFoo")
        .connect_namespace("generic")
        .filter("(tier>=2)")
        .build();

    fx.coordinator.available(e1);
    fx.coordinator.settle().await;
    let handles = fx.space.find("IFoo");
    assert_eq!(handles.len(), 1);
    assert_eq!(
        fx.space.properties(&handles[0]).unwrap().get("tier"),
        Some(&PropertyValue::Int(3))
    );
}

#[test_log::test(tokio::test)]
async fn test_deeply_nested_remote_filter_is_skipped() {
    let fx = Fixture::new(BridgeConfig::default());
    let adapter = fx.container("c1");
    adapter.publish(["IFoo"], Properties::new().with("tier", 1i64));
    let depth = 200_000;
    let e1 = EndpointDescription::builder("e1", ServiceLocation::parse("loc://svc1").unwrap())
        .interface("IFoo")
        .connect_namespace("generic")
        .filter(format!("{}(tier=1){}", "(!".repeat(depth), ")".repeat(depth)))
        .build();

    fx.coordinator.available(e1.clone());
    assert_eq!(
        fx.coordinator.settle().await,
        vec![(e1.id().clone(), ResolutionOutcome::NoReferences)]
    );
    assert!(fx.space.is_empty());
    assert_eq!(fx.coordinator.state(&e1), EndpointState::Retained);
}

#[test_log::test(tokio::test)]
async fn test_imported_services_follow_registrations() {
    let fx = Fixture::new(BridgeConfig::default());
    let adapter = fx.container("c1");
    let foo = adapter.publish(["IFoo"], Properties::new());
    let bar = adapter.publish(["IBar"], Properties::new());
    let e1 = endpoint("e1", "loc://svc1", &["IFoo", "IBar"]);

    fx.coordinator.available(e1.clone());
    fx.coordinator.settle().await;
    assert_eq!(fx.space.imported_services(), [foo.clone(), bar.clone()]);

    assert!(adapter.withdraw(bar.id()));
    assert_eq!(fx.space.imported_services(), [foo]);

    fx.coordinator.unavailable(&e1);
    assert!(fx.space.imported_services().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_property_notifications_are_adapted() -> anyhow::Result<()> {
    let fx = Fixture::new(BridgeConfig::default());
    fx.container("c1").publish(["IFoo"], Properties::new());
    let props = Properties::new()
        .with(keys::ENDPOINT_ID, "e1")
        .with(keys::ENDPOINT_LOCATION, "loc://svc1")
        .with(keys::SERVICE_INTERFACES, vec!["IFoo".to_owned()])
        .with(keys::CONTAINER_ID, "generic:remote");

    fx.coordinator.notify_raw(1, props.clone())?;
    fx.coordinator.settle().await;
    assert_eq!(fx.space.len(), 1);

    fx.coordinator.notify_raw(2, props)?;
    assert!(fx.space.is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_no_matching_container_retains_location() {
    let fx = Fixture::new(BridgeConfig::default());
    let e1 = endpoint("e1", "loc://svc1", &["IFoo"]);

    fx.coordinator.available(e1.clone());
    assert_eq!(
        fx.coordinator.settle().await[0].1,
        ResolutionOutcome::NoContainers
    );
    assert_eq!(fx.coordinator.state(&e1), EndpointState::Retained);

    // a container appearing later is not picked up until the endpoint is re-announced
    fx.container("c1").publish(["IFoo"], Properties::new());
    fx.coordinator.available(e1.clone());
    assert!(fx.coordinator.settle().await.is_empty());
    fx.coordinator.unavailable(&e1);
    fx.coordinator.available(e1);
    assert_eq!(
        fx.coordinator.settle().await[0].1,
        ResolutionOutcome::Registered(1)
    );
}

#[test_log::test(tokio::test)]
async fn test_attached_hub_feed_drives_coordinator() {
    let fx = Fixture::new(BridgeConfig::default());
    fx.container("c1").publish(["IFoo"], Properties::new());
    let hub = NotificationHub::from_config(fx.coordinator.config());
    fx.coordinator.attach(hub.subscribe());
    assert_eq!(hub.subscriber_count(), 1);

    let e1 = endpoint("e1", "loc://svc1", &["IFoo"]);
    hub.publish(Notification::available(e1.clone()));
    wait_for(&fx.coordinator, &e1, EndpointState::Registered).await;

    hub.publish(Notification::unavailable(e1.clone()));
    wait_for(&fx.coordinator, &e1, EndpointState::Unseen).await;
    assert!(fx.space.is_empty());

    fx.coordinator.shutdown();
    tokio::time::timeout(Duration::from_secs(2), async {
        while hub.subscriber_count() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}
