//! Error types for discovery-bridge.

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport could not reach the remote container.
    #[error("connect error: {0}")]
    Connect(String),

    /// A remote-service filter expression could not be parsed.
    #[error("invalid filter `{filter}`: {reason}")]
    FilterSyntax {
        /// The offending filter string.
        filter: String,
        /// What the parser rejected.
        reason: String,
    },

    /// A service location is not a valid URI.
    #[error("invalid service location `{location}`: {source}")]
    InvalidLocation {
        /// The raw location string.
        location: String,
        /// Parser error from `url`.
        #[source]
        source: url::ParseError,
    },

    /// A property required to build an endpoint description is missing.
    #[error("missing endpoint property `{0}`")]
    MissingProperty(&'static str),

    /// An endpoint-description adapter failed.
    #[error("endpoint adaptation failed: {0}")]
    Adaptation(String),

    /// A raw notification code does not name a known notification kind.
    #[error("unknown notification type {0}")]
    UnknownNotification(u32),

    /// The remote service could not produce a local proxy.
    #[error("proxy unavailable: {0}")]
    ProxyUnavailable(String),

    /// The local service space refused an operation.
    #[error("local service space error: {0}")]
    ServiceSpace(String),

    /// A registration handle was unregistered twice.
    #[error("registration {0} already unregistered")]
    AlreadyUnregistered(u64),

    /// No tokio runtime was available to run resolution tasks.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl Error {
    /// Create a connect error.
    pub fn connect<S: Into<String>>(msg: S) -> Self {
        Self::Connect(msg.into())
    }

    /// Create a filter syntax error.
    pub fn filter_syntax<F: Into<String>, R: Into<String>>(filter: F, reason: R) -> Self {
        Self::FilterSyntax {
            filter: filter.into(),
            reason: reason.into(),
        }
    }

    /// Create an adaptation error.
    pub fn adaptation<S: Into<String>>(msg: S) -> Self {
        Self::Adaptation(msg.into())
    }

    /// Create a local service space error.
    pub fn service_space<S: Into<String>>(msg: S) -> Self {
        Self::ServiceSpace(msg.into())
    }

    /// Create a proxy error.
    pub fn proxy<S: Into<String>>(msg: S) -> Self {
        Self::ProxyUnavailable(msg.into())
    }
}
