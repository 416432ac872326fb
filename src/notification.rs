//! Discovery notifications and the contracts for delivering them.
//!
//! Discovery layers either call a [`NotificationSink`] directly or publish
//! into a [`NotificationHub`], whose subscriptions are plain streams that a
//! coordinator can [`attach`](crate::BridgeCoordinator::attach) to.

use std::fmt;

use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{trace, warn};

use crate::config::BridgeConfig;
use crate::endpoint::EndpointDescription;
use crate::properties::Properties;
use crate::{Error, Result};

/// What happened to a discovered endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// A matching endpoint appeared.
    Available,
    /// A previously available endpoint went away.
    Unavailable,
    /// An endpoint's properties changed and it still matches.
    Modified,
    /// An endpoint's properties changed and it no longer matches.
    ModifiedEndMatch,
}

impl NotificationKind {
    /// Raw numeric code as used by OSGi discovery.
    pub fn code(self) -> u32 {
        match self {
            Self::Available => 1,
            Self::Unavailable => 2,
            Self::Modified => 4,
            Self::ModifiedEndMatch => 8,
        }
    }
}

impl TryFrom<u32> for NotificationKind {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self> {
        match code {
            1 => Ok(Self::Available),
            2 => Ok(Self::Unavailable),
            4 => Ok(Self::Modified),
            8 => Ok(Self::ModifiedEndMatch),
            other => Err(Error::UnknownNotification(other)),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Available => "AVAILABLE",
            Self::Unavailable => "UNAVAILABLE",
            Self::Modified => "MODIFIED",
            Self::ModifiedEndMatch => "MODIFIED_ENDMATCH",
        };
        f.write_str(name)
    }
}

/// Endpoint as delivered by a discovery layer, before adaptation.
#[derive(Debug, Clone)]
pub enum DiscoveredEndpoint {
    /// Already in native form.
    Native(EndpointDescription),
    /// A bag of well-known endpoint properties.
    Properties(Properties),
    /// A representation this crate does not understand.
    Opaque {
        /// Name of the foreign format, for logging.
        format: String,
    },
}

impl From<EndpointDescription> for DiscoveredEndpoint {
    fn from(endpoint: EndpointDescription) -> Self {
        Self::Native(endpoint)
    }
}

impl From<Properties> for DiscoveredEndpoint {
    fn from(props: Properties) -> Self {
        Self::Properties(props)
    }
}

/// A single discovery event.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Event kind.
    pub kind: NotificationKind,
    /// The endpoint the event is about.
    pub endpoint: DiscoveredEndpoint,
}

impl Notification {
    /// Create a notification.
    pub fn new(kind: NotificationKind, endpoint: impl Into<DiscoveredEndpoint>) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
        }
    }

    /// An AVAILABLE notification.
    pub fn available(endpoint: impl Into<DiscoveredEndpoint>) -> Self {
        Self::new(NotificationKind::Available, endpoint)
    }

    /// An UNAVAILABLE notification.
    pub fn unavailable(endpoint: impl Into<DiscoveredEndpoint>) -> Self {
        Self::new(NotificationKind::Unavailable, endpoint)
    }

    /// Build from a raw OSGi notification code.
    pub fn from_code(code: u32, endpoint: impl Into<DiscoveredEndpoint>) -> Result<Self> {
        Ok(Self::new(NotificationKind::try_from(code)?, endpoint))
    }
}

/// Converts discovered endpoints into native descriptions.
pub trait EndpointAdapter: Send + Sync + 'static {
    /// `Ok(None)` means the representation does not apply to this adapter,
    /// which is distinct from a failed conversion.
    fn adapt(&self, endpoint: &DiscoveredEndpoint) -> Result<Option<EndpointDescription>>;
}

/// Default adapter: passes native descriptions through and builds them from
/// well-known property keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertiesEndpointAdapter;

impl EndpointAdapter for PropertiesEndpointAdapter {
    fn adapt(&self, endpoint: &DiscoveredEndpoint) -> Result<Option<EndpointDescription>> {
        match endpoint {
            DiscoveredEndpoint::Native(e) => Ok(Some(e.clone())),
            DiscoveredEndpoint::Properties(props) => EndpointDescription::from_properties(props)
                .map(Some)
                .map_err(|e| match e {
                    Error::Adaptation(_) => e,
                    other => Error::adaptation(other.to_string()),
                }),
            DiscoveredEndpoint::Opaque { .. } => Ok(None),
        }
    }
}

/// Receiver of discovery notifications. Must return quickly.
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification.
    fn notify(&self, notification: Notification);
}

/// Fan-out point between discovery layers and bridge coordinators.
#[derive(Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<Notification>,
}

impl NotificationHub {
    /// Create a hub buffering up to `capacity` undelivered notifications per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Create a hub sized from `config`.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.hub_capacity)
    }

    /// Publish a notification, returning how many subscribers will see it.
    pub fn publish(&self, notification: Notification) -> usize {
        match self.tx.send(notification) {
            Ok(n) => n,
            Err(_) => {
                trace!("notification published with no subscribers");
                0
            }
        }
    }

    /// Stream of notifications published after this call.
    ///
    /// A subscriber that falls behind skips the overwritten notifications;
    /// the gap is logged.
    pub fn subscribe(&self) -> impl Stream<Item = Notification> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|msg| async move {
            match msg {
                Ok(n) => Some(n),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification subscriber lagged");
                    None
                }
            }
        })
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl NotificationSink for NotificationHub {
    fn notify(&self, notification: Notification) {
        self.publish(notification);
    }
}

impl fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
