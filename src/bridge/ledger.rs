//! The registration ledger: which proxies are live for which endpoint.
//!
//! The ledger's mutex is the single serialization point between the
//! resolution pipeline and transport removal events. It is held only while
//! the map is mutated. Records removed from the map are dropped, and their
//! removal subscriptions cancelled, after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::container::{ReferenceId, RemoteServiceReference, Subscription};
use crate::endpoint::{ContainerId, EndpointDescription, EndpointId, ServiceLocation};
use crate::service_space::RegistrationHandle;

/// Why the ledger refused a registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The endpoint already has a record under another container.
    #[error("endpoint {endpoint} is already registered through container {container}")]
    BoundElsewhere {
        /// The endpoint.
        endpoint: EndpointId,
        /// Container currently holding the endpoint's record.
        container: ContainerId,
    },
    /// The reference is already mapped for this endpoint.
    #[error("reference {reference} is already registered for endpoint {endpoint}")]
    DuplicateReference {
        /// The endpoint.
        endpoint: EndpointId,
        /// The duplicated reference.
        reference: ReferenceId,
    },
}

/// How a successful registration was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new record was created; it adopted the caller's subscription.
    Created,
    /// The mapping joined an existing record.
    Joined,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    container: ContainerId,
    endpoint: EndpointId,
}

/// One endpoint's live registrations through one container.
#[derive(Debug)]
struct RegistrationRecord {
    endpoint: EndpointDescription,
    mappings: Vec<(RemoteServiceReference, RegistrationHandle)>,
    // Dropping the record cancels it.
    _subscription: Option<Subscription>,
}

impl RegistrationRecord {
    fn maps(&self, reference: ReferenceId) -> bool {
        self.mappings.iter().any(|(r, _)| r.id() == reference)
    }
}

/// Snapshot of one record, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    /// Owning container.
    pub container: ContainerId,
    /// Endpoint the record belongs to.
    pub endpoint: EndpointId,
    /// The endpoint's location.
    pub location: ServiceLocation,
    /// Mapped references and their proxy handles.
    pub registrations: Vec<(ReferenceId, RegistrationHandle)>,
}

/// Result of removing a single reference.
#[derive(Debug, Default)]
pub struct Removal {
    /// Handles of proxies that must be torn down.
    pub handles: Vec<RegistrationHandle>,
    /// Endpoints whose records emptied and were disposed.
    pub emptied: Vec<EndpointDescription>,
}

impl Removal {
    /// Whether nothing was mapped to the reference.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Map of active proxy registrations keyed by (container, endpoint).
///
/// At most one container holds a record for a given endpoint at any time.
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct RegistrationLedger {
    records: Arc<Mutex<HashMap<RecordKey, RegistrationRecord>>>,
}

impl RegistrationLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `reference` was registered locally as `handle`.
    ///
    /// The duplicate check and the insert form a single critical section.
    /// When a new record is created it takes `subscription`; otherwise the
    /// subscription is left with the caller.
    pub fn try_register(
        &self,
        endpoint: &EndpointDescription,
        container: &ContainerId,
        reference: &RemoteServiceReference,
        handle: RegistrationHandle,
        subscription: &mut Option<Subscription>,
    ) -> Result<Admission, Rejection> {
        let mut records = self.records.lock();
        check(&records, endpoint, container, reference.id())?;

        let key = RecordKey {
            container: container.clone(),
            endpoint: endpoint.id().clone(),
        };
        let admission = match records.get_mut(&key) {
            Some(record) => {
                record.mappings.push((reference.clone(), handle));
                Admission::Joined
            }
            None => {
                records.insert(
                    key,
                    RegistrationRecord {
                        endpoint: endpoint.clone(),
                        mappings: vec![(reference.clone(), handle)],
                        _subscription: subscription.take(),
                    },
                );
                Admission::Created
            }
        };
        trace!(
            endpoint = %endpoint.id(),
            container = %container,
            reference = %reference.id(),
            ?admission,
            "ledger registration"
        );
        Ok(admission)
    }

    /// Whether [`try_register`](Self::try_register) would currently accept
    /// the reference. Does not mutate.
    pub fn accepts(
        &self,
        endpoint: &EndpointDescription,
        container: &ContainerId,
        reference: &RemoteServiceReference,
    ) -> Result<(), Rejection> {
        check(&self.records.lock(), endpoint, container, reference.id())
    }

    /// Remove every record for `endpoint`, returning the handles to tear down.
    pub fn unregister_all(&self, endpoint: &EndpointDescription) -> Vec<RegistrationHandle> {
        let removed: Vec<RegistrationRecord> = {
            let mut records = self.records.lock();
            let keys: Vec<RecordKey> = records
                .keys()
                .filter(|k| &k.endpoint == endpoint.id())
                .cloned()
                .collect();
            keys.iter().filter_map(|k| records.remove(k)).collect()
        };

        let handles: Vec<_> = removed
            .into_iter()
            .flat_map(|record| record.mappings.into_iter().map(|(_, h)| h))
            .collect();
        debug!(
            endpoint = %endpoint.id(),
            count = handles.len(),
            "removed endpoint from ledger"
        );
        handles
    }

    /// Remove the mapping for one reference returned by `container`.
    ///
    /// Records that empty as a result are disposed and reported in
    /// [`Removal::emptied`].
    pub fn unregister_one(&self, container: &ContainerId, reference: ReferenceId) -> Removal {
        let mut removal = Removal::default();
        let disposed: Vec<RegistrationRecord> = {
            let mut records = self.records.lock();
            let mut emptied_keys = Vec::new();
            for (key, record) in records.iter_mut() {
                if &key.container != container {
                    continue;
                }
                let before = record.mappings.len();
                record.mappings.retain(|(r, h)| {
                    if r.id() == reference {
                        removal.handles.push(h.clone());
                        false
                    } else {
                        true
                    }
                });
                if record.mappings.is_empty() && before > 0 {
                    emptied_keys.push(key.clone());
                }
            }
            emptied_keys
                .iter()
                .filter_map(|k| records.remove(k))
                .collect()
        };

        removal.emptied = disposed.into_iter().map(|r| r.endpoint).collect();
        if !removal.is_empty() {
            debug!(
                container = %container,
                reference = %reference,
                handles = removal.handles.len(),
                emptied = removal.emptied.len(),
                "removed reference from ledger"
            );
        }
        removal
    }

    /// Whether any record exists for `endpoint`.
    pub fn contains(&self, endpoint: &EndpointId) -> bool {
        self.records.lock().keys().any(|k| &k.endpoint == endpoint)
    }

    /// Snapshot of every record, ordered by container then endpoint.
    pub fn records(&self) -> Vec<RecordSummary> {
        let mut out: Vec<_> = self
            .records
            .lock()
            .iter()
            .map(|(key, record)| RecordSummary {
                container: key.container.clone(),
                endpoint: key.endpoint.clone(),
                location: record.endpoint.location().clone(),
                registrations: record
                    .mappings
                    .iter()
                    .map(|(r, h)| (r.id(), h.clone()))
                    .collect(),
            })
            .collect();
        out.sort_by(|a, b| (&a.container, &a.endpoint).cmp(&(&b.container, &b.endpoint)));
        out
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the ledger holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl std::fmt::Debug for RegistrationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationLedger")
            .field("records", &self.len())
            .finish()
    }
}

fn check(
    records: &HashMap<RecordKey, RegistrationRecord>,
    endpoint: &EndpointDescription,
    container: &ContainerId,
    reference: ReferenceId,
) -> Result<(), Rejection> {
    for (key, record) in records {
        if &key.endpoint != endpoint.id() {
            continue;
        }
        if &key.container != container {
            return Err(Rejection::BoundElsewhere {
                endpoint: key.endpoint.clone(),
                container: key.container.clone(),
            });
        }
        if record.maps(reference) {
            return Err(Rejection::DuplicateReference {
                endpoint: key.endpoint.clone(),
                reference,
            });
        }
    }
    Ok(())
}
