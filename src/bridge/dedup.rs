//! Location deduplication for availability notifications.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::endpoint::{EndpointDescription, ServiceLocation};

/// Tracks service locations that have already been accepted for processing.
///
/// Discovery protocols re-deliver advertisements; only the first notification
/// for a location passes until it is released again.
#[derive(Debug, Default)]
pub struct LocationDeduplicator {
    seen: Mutex<HashSet<ServiceLocation>>,
}

impl LocationDeduplicator {
    /// Create an empty deduplicator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the endpoint's location. Returns `true` only for the first call
    /// with a given location since it was last released.
    pub fn accept(&self, endpoint: &EndpointDescription) -> bool {
        self.seen.lock().insert(endpoint.location().clone())
    }

    /// Forget a location. Returns `true` if it was recorded.
    pub fn release(&self, location: &ServiceLocation) -> bool {
        self.seen.lock().remove(location)
    }

    /// Whether a location is currently recorded.
    pub fn contains(&self, location: &ServiceLocation) -> bool {
        self.seen.lock().contains(location)
    }

    /// Number of recorded locations.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether no location is recorded.
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}
