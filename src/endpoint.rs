//! Endpoint descriptions and the identities they carry.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use url::Url;

use crate::properties::Properties;
use crate::{Error, Result};

/// Well-known property keys.
pub mod keys {
    /// Unique endpoint identifier.
    pub const ENDPOINT_ID: &str = "endpoint.id";
    /// Transport-addressable location URI.
    pub const ENDPOINT_LOCATION: &str = "endpoint.location";
    /// Interface exposed by the endpoint itself.
    pub const ENDPOINT_INTERFACE: &str = "endpoint.interface";
    /// Provided service interface names.
    pub const SERVICE_INTERFACES: &str = "service.interfaces";
    /// Versions of the provided interfaces.
    pub const SERVICE_INTERFACES_VERSION: &str = "service.interfaces.version";
    /// Opaque published service properties.
    pub const SERVICE_PROPERTIES: &str = "service.properties";
    /// Connect-target container id, formatted `namespace:name`.
    pub const CONTAINER_ID: &str = "endpoint.container.id";
    /// Connect namespace used for namespace-based container resolution.
    pub const CONTAINER_NAMESPACE: &str = "endpoint.container.namespace";
    /// Optional remote-service filter expression.
    pub const REMOTE_FILTER: &str = "endpoint.remote.filter";
    /// Interfaces a service is registered under.
    pub const OBJECT_CLASS: &str = "objectClass";
    /// Service id assigned by the exporting side.
    pub const SERVICE_ID: &str = "service.id";
    /// Marks a proxy as imported from a remote endpoint.
    pub const SERVICE_IMPORTED: &str = "service.imported";
    /// Name of the configuration (container namespace) that imported a proxy.
    pub const SERVICE_IMPORTED_CONFIGS: &str = "service.imported.configs";
}

/// Unique identifier of a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(Arc<str>);

impl EndpointId {
    /// Create an endpoint id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

/// Connection-addressable locator of an endpoint, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceLocation(Url);

impl ServiceLocation {
    /// Parse a location URI.
    pub fn parse(location: &str) -> Result<Self> {
        Url::parse(location)
            .map(Self)
            .map_err(|source| Error::InvalidLocation {
                location: location.to_owned(),
                source,
            })
    }

    /// The normalized URI.
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// The normalized URI as a string.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ServiceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl From<Url> for ServiceLocation {
    fn from(url: Url) -> Self {
        Self(url)
    }
}

/// Identity of a transport container: a namespace and a name within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId {
    namespace: Arc<str>,
    name: Arc<str>,
}

impl ContainerId {
    /// Create a container id.
    pub fn new(namespace: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            namespace: Arc::from(namespace.as_ref()),
            name: Arc::from(name.as_ref()),
        }
    }

    /// Parse `namespace:name`. Returns `None` without a separator.
    pub fn parse(s: &str) -> Option<Self> {
        let (namespace, name) = s.split_once(':')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }

    /// The container's namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The container's name within its namespace.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

#[derive(Debug)]
struct Inner {
    id: EndpointId,
    location: ServiceLocation,
    interfaces: Vec<String>,
    filter: Option<String>,
    connect_target: Option<ContainerId>,
    properties: Properties,
}

/// Immutable description of one discoverable remote service.
///
/// Two descriptions are equal when their endpoint ids are equal, so a
/// re-delivered description compares equal to the original. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct EndpointDescription {
    inner: Arc<Inner>,
}

impl EndpointDescription {
    /// Start building a description.
    pub fn builder(id: impl Into<EndpointId>, location: ServiceLocation) -> EndpointBuilder {
        EndpointBuilder {
            id: id.into(),
            location,
            interfaces: Vec::new(),
            filter: None,
            connect_target: None,
            properties: Properties::new(),
        }
    }

    /// Build a description from well-known property keys (see [`keys`]).
    ///
    /// Interfaces come from [`keys::SERVICE_INTERFACES`], falling back to
    /// [`keys::OBJECT_CLASS`]. Every property is retained on the result.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let id = props
            .get_str(keys::ENDPOINT_ID)
            .ok_or(Error::MissingProperty(keys::ENDPOINT_ID))?;
        let location = props
            .get_str(keys::ENDPOINT_LOCATION)
            .ok_or(Error::MissingProperty(keys::ENDPOINT_LOCATION))?;
        let location = ServiceLocation::parse(location)?;

        let mut interfaces = props.get_strings(keys::SERVICE_INTERFACES);
        if interfaces.is_empty() {
            interfaces = props.get_strings(keys::OBJECT_CLASS);
        }

        let mut builder = Self::builder(id, location).interfaces(interfaces);
        if let Some(filter) = props.get_str(keys::REMOTE_FILTER) {
            builder = builder.filter(filter);
        }
        if let Some(raw) = props.get_str(keys::CONTAINER_ID) {
            let target = ContainerId::parse(raw).ok_or_else(|| {
                Error::adaptation(format!("malformed container id `{raw}`"))
            })?;
            builder = builder.connect_target(target);
        }
        builder.properties = props.clone();
        Ok(builder.build())
    }

    /// The endpoint identifier.
    pub fn id(&self) -> &EndpointId {
        &self.inner.id
    }

    /// The endpoint's service location.
    pub fn location(&self) -> &ServiceLocation {
        &self.inner.location
    }

    /// Provided interface names, in advertisement order, without duplicates.
    pub fn interfaces(&self) -> &[String] {
        &self.inner.interfaces
    }

    /// Optional remote-service filter expression.
    pub fn remote_filter(&self) -> Option<&str> {
        self.inner.filter.as_deref()
    }

    /// Container id the endpoint should be reached through, if advertised.
    pub fn connect_target(&self) -> Option<&ContainerId> {
        self.inner.connect_target.as_ref()
    }

    /// Connect namespace: the [`keys::CONTAINER_NAMESPACE`] property, or the
    /// connect target's namespace.
    pub fn connect_namespace(&self) -> Option<&str> {
        self.inner
            .properties
            .get_str(keys::CONTAINER_NAMESPACE)
            .or_else(|| self.inner.connect_target.as_ref().map(ContainerId::namespace))
    }

    /// All advertised properties.
    pub fn properties(&self) -> &Properties {
        &self.inner.properties
    }
}

impl PartialEq for EndpointDescription {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for EndpointDescription {}

impl Hash for EndpointDescription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for EndpointDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.inner.id, self.inner.location)
    }
}

/// Builder for [`EndpointDescription`].
#[derive(Debug)]
pub struct EndpointBuilder {
    id: EndpointId,
    location: ServiceLocation,
    interfaces: Vec<String>,
    filter: Option<String>,
    connect_target: Option<ContainerId>,
    properties: Properties,
}

impl EndpointBuilder {
    /// Add a provided interface.
    pub fn interface(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.interfaces.contains(&name) {
            self.interfaces.push(name);
        }
        self
    }

    /// Add several provided interfaces.
    pub fn interfaces<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |b, n| b.interface(n))
    }

    /// Set the remote-service filter.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set the connect-target container id.
    pub fn connect_target(mut self, target: ContainerId) -> Self {
        self.connect_target = Some(target);
        self
    }

    /// Set the connect namespace explicitly.
    pub fn connect_namespace(self, namespace: impl Into<String>) -> Self {
        self.property(keys::CONTAINER_NAMESPACE, namespace.into())
    }

    /// Add an advertised property.
    pub fn property(
        mut self,
        key: impl Into<String>,
        value: impl Into<crate::properties::PropertyValue>,
    ) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Finish the description.
    pub fn build(self) -> EndpointDescription {
        EndpointDescription {
            inner: Arc::new(Inner {
                id: self.id,
                location: self.location,
                interfaces: self.interfaces,
                filter: self.filter,
                connect_target: self.connect_target,
                properties: self.properties,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(s: &str) -> ServiceLocation {
        ServiceLocation::parse(s).unwrap()
    }

    #[test]
    fn equality_is_by_endpoint_id() {
        let a = EndpointDescription::builder("e1", loc("tcp://host:1/a"))
            .interface("IFoo")
            .build();
        let b = EndpointDescription::builder("e1", loc("tcp://other:2/b"))
            .interface("IBar")
            .build();
        let c = EndpointDescription::builder("e2", loc("tcp://host:1/a")).build();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn locations_compare_by_value() {
        assert_eq!(loc("loc://svc1"), loc("loc://svc1"));
        assert_ne!(loc("loc://svc1"), loc("loc://svc2"));
        assert!(matches!(
            ServiceLocation::parse("not a uri"),
            Err(Error::InvalidLocation { .. })
        ));
    }

    #[test]
    fn interfaces_are_deduplicated_in_order() {
        let e = EndpointDescription::builder("e1", loc("loc://svc1"))
            .interfaces(["IFoo", "IBar", "IFoo"])
            .build();
        assert_eq!(e.interfaces(), ["IFoo", "IBar"]);
    }

    #[test]
    fn connect_namespace_prefers_property() {
        let target = ContainerId::new("ecf.generic", "server");
        let e = EndpointDescription::builder("e1", loc("loc://svc1"))
            .connect_target(target.clone())
            .build();
        assert_eq!(e.connect_namespace(), Some("ecf.generic"));

        let e = EndpointDescription::builder("e1", loc("loc://svc1"))
            .connect_target(target)
            .connect_namespace("r-osgi")
            .build();
        assert_eq!(e.connect_namespace(), Some("r-osgi"));
    }

    #[test]
    fn container_id_parsing() {
        let id = ContainerId::parse("ecf.generic:tcp://host:3282/server").unwrap();
        assert_eq!(id.namespace(), "ecf.generic");
        assert_eq!(id.name(), "tcp://host:3282/server");
        assert!(ContainerId::parse("no-separator").is_none());
        assert!(ContainerId::parse(":name").is_none());
    }

    #[test]
    fn from_properties_reads_well_known_keys() {
        let props = Properties::new()
            .with(keys::ENDPOINT_ID, "e1")
            .with(keys::ENDPOINT_LOCATION, "loc://svc1")
            .with(keys::OBJECT_CLASS, &["IFoo"][..])
            .with(keys::REMOTE_FILTER, "(region=eu)")
            .with(keys::CONTAINER_ID, "ecf.generic:server");
        let e = EndpointDescription::from_properties(&props).unwrap();
        assert_eq!(e.id().as_str(), "e1");
        assert_eq!(e.location(), &loc("loc://svc1"));
        assert_eq!(e.interfaces(), ["IFoo"]);
        assert_eq!(e.remote_filter(), Some("(region=eu)"));
        assert_eq!(e.connect_namespace(), Some("ecf.generic"));

        let missing = Properties::new().with(keys::ENDPOINT_LOCATION, "loc://svc1");
        assert!(matches!(
            EndpointDescription::from_properties(&missing),
            Err(Error::MissingProperty(keys::ENDPOINT_ID))
        ));
    }
}
