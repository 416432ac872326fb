//! The local service space that imported proxies are registered into.

use std::fmt;
use std::sync::Arc;

use crate::container::{Proxy, RemoteService, RemoteServiceReference};
use crate::properties::Properties;
use crate::Result;

/// Handle to one proxy registration in the local service space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationHandle {
    id: u64,
    interfaces: Arc<[String]>,
}

impl RegistrationHandle {
    /// Create a handle.
    pub fn new(id: u64, interfaces: impl Into<Arc<[String]>>) -> Self {
        Self {
            id,
            interfaces: interfaces.into(),
        }
    }

    /// Registration id, unique within the service space.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Interfaces the proxy was registered under.
    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }
}

impl fmt::Display for RegistrationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registration#{}", self.id)
    }
}

/// Everything needed to publish a proxy locally.
pub struct ProxyRegistration {
    /// Interfaces to register under.
    pub interfaces: Vec<String>,
    /// The proxy object.
    pub proxy: Proxy,
    /// Service properties.
    pub properties: Properties,
    /// Remote service backing the proxy.
    pub remote: Arc<dyn RemoteService>,
}

impl fmt::Debug for ProxyRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRegistration")
            .field("interfaces", &self.interfaces)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Local registry of services visible to in-process consumers.
pub trait LocalServiceSpace: Send + Sync + 'static {
    /// Publish a proxy.
    fn register(&self, registration: ProxyRegistration) -> Result<RegistrationHandle>;

    /// Withdraw a proxy. A second call for the same handle fails with
    /// [`Error::AlreadyUnregistered`](crate::Error::AlreadyUnregistered).
    fn unregister(&self, handle: &RegistrationHandle) -> Result<()>;

    /// Record that `handle` proxies the remote service behind `reference`,
    /// so imported services can be listed. Called right after a successful
    /// [`register`](Self::register).
    fn imported(&self, _handle: &RegistrationHandle, _reference: &RemoteServiceReference) {}

    /// Forget the import behind `handle`. Called after every
    /// [`unregister`](Self::unregister) attempt, whether or not it succeeded.
    fn withdrawn(&self, _handle: &RegistrationHandle) {}
}
