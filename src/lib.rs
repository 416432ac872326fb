//! Bridges service discovery notifications to locally registered remote
//! service proxies.
//!
//! A [`BridgeCoordinator`] receives AVAILABLE / UNAVAILABLE notifications,
//! finds transport containers able to reach each endpoint, looks up remote
//! references per interface, and registers one proxy per reference into a
//! [`LocalServiceSpace`]. Each endpoint is held by at most one container at a
//! time, and removals reported by transports are reconciled from any thread.
//!
//! ```ignore
//! let space = Arc::new(MemoryServiceSpace::new());
//! let coordinator = BridgeCoordinator::builder(space.clone())
//!     .container_manager(registry)
//!     .build()?;
//! coordinator.attach(hub.subscribe());
//! ```

#![deny(missing_docs)]

pub mod bridge;
pub mod config;
pub mod container;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod memory;
pub mod notification;
pub mod properties;
pub mod service_space;

// Re-export key types
pub use bridge::{
    BridgeCoordinator, BridgeCoordinatorBuilder, ContainerFinder, EndpointState, ResolutionOutcome,
};
pub use config::BridgeConfig;
pub use container::{
    ContainerAdapter, ContainerManager, RemoteService, RemoteServiceReference, ResolvedContainer,
    TransportContainer,
};
pub use endpoint::{ContainerId, EndpointDescription, EndpointId, ServiceLocation};
pub use error::{Error, Result};
pub use filter::Filter;
pub use notification::{
    DiscoveredEndpoint, EndpointAdapter, Notification, NotificationHub, NotificationKind,
    NotificationSink,
};
pub use properties::{Properties, PropertyValue};
pub use service_space::{LocalServiceSpace, RegistrationHandle};
