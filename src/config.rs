//! Bridge configuration.

use crate::endpoint::keys;

/// Tuning knobs for a [`BridgeCoordinator`](crate::BridgeCoordinator).
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Maximum number of resolution pipelines running at once.
    pub max_concurrent_resolutions: usize,
    /// Remote reference property keys not copied onto local proxies.
    pub reserved_properties: Vec<String>,
    /// Release the deduplicated location when a transport removal event
    /// empties an endpoint's record. Off by default, so only an explicit
    /// UNAVAILABLE notification lets the location be accepted again.
    pub release_on_transport_removal: bool,
    /// Buffer size of a [`NotificationHub`](crate::NotificationHub).
    pub hub_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_resolutions: 8,
            reserved_properties: default_reserved_properties(),
            release_on_transport_removal: false,
            hub_capacity: 128,
        }
    }
}

impl BridgeConfig {
    /// Set the resolution concurrency limit. Zero is treated as one.
    pub fn max_concurrent_resolutions(mut self, n: usize) -> Self {
        self.max_concurrent_resolutions = n.max(1);
        self
    }

    /// Replace the reserved property keys.
    pub fn reserved_properties<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_properties = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Release locations when a transport removal empties a record.
    pub fn release_on_transport_removal(mut self, release: bool) -> Self {
        self.release_on_transport_removal = release;
        self
    }

    /// Set the notification hub buffer size. Zero is treated as one.
    pub fn hub_capacity(mut self, n: usize) -> Self {
        self.hub_capacity = n.max(1);
        self
    }

    /// Whether `key` is reserved.
    pub fn is_reserved(&self, key: &str) -> bool {
        self.reserved_properties.iter().any(|k| k == key)
    }
}

fn default_reserved_properties() -> Vec<String> {
    [
        keys::SERVICE_ID,
        keys::OBJECT_CLASS,
        keys::ENDPOINT_ID,
        keys::ENDPOINT_INTERFACE,
        keys::ENDPOINT_LOCATION,
        keys::SERVICE_INTERFACES,
        keys::SERVICE_INTERFACES_VERSION,
        keys::SERVICE_PROPERTIES,
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}
