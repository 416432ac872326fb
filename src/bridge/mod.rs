//! The bridging engine: deduplication, container and reference resolution,
//! the registration ledger, and the coordinator driving them.

pub mod coordinator;
pub mod dedup;
pub mod ledger;
pub mod proxy;
pub mod references;
pub mod resolver;

pub use coordinator::{BridgeCoordinator, BridgeCoordinatorBuilder, EndpointState, ResolutionOutcome};
pub use dedup::LocationDeduplicator;
pub use ledger::{Admission, RecordSummary, RegistrationLedger, Rejection, Removal};
pub use references::{InterfaceReferences, ReferenceResolver};
pub use resolver::{ContainerFinder, ContainerResolver, NamespaceFinder, StaticFinder};
