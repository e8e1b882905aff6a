//! Error types for the authentication cache.
//!
//! Verification operations report one of three broad outcomes so callers can
//! decide whether to retry:
//!
//! - no usable configuration ([`AuthError::Stale`])
//! - configuration available, request rejected ([`AuthError::AuthenticationFailure`],
//!   [`AuthError::UserNotFound`])
//! - the authority could not be reached or answered garbage
//!   ([`AuthError::Transport`], [`AuthError::UnexpectedStatus`], [`AuthError::Protocol`])

use std::fmt;

/// Reason reported while no configuration snapshot is available.
///
/// Recorded when the push channel breaks and returned to every caller until
/// the next snapshot arrives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("authentication database is stale: last reason: {reason}")]
pub struct StaleError {
    reason: String,
}

impl StaleError {
    /// Creates a stale error carrying the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Stale error used before the first snapshot was ever received.
    #[must_use]
    pub fn not_yet_received() -> Self {
        Self::new("no configuration received from the authority yet")
    }

    /// Stale error used when the push channel was closed without a reason.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::new("connection to the authority was closed")
    }

    /// The recorded reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Errors returned by the authentication cache.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No configuration snapshot is available.
    #[error(transparent)]
    Stale(#[from] StaleError),

    /// The authority rejected the supplied credentials.
    #[error("Authentication failure")]
    AuthenticationFailure,

    /// No user could be derived from the client certificate.
    #[error("Username not found")]
    UserNotFound,

    /// A TLS refresh callback is already registered.
    #[error("Certificate refresh callback is already registered")]
    CallbackAlreadyRegistered,

    /// The host:port pair does not belong to any known node.
    #[error("Unknown host:port: {host_port}")]
    UnknownHostPort {
        /// The queried host:port.
        host_port: String,
    },

    /// The host:port string could not be parsed.
    #[error("Invalid host:port: {host_port}")]
    InvalidHostPort {
        /// The rejected input.
        host_port: String,
    },

    /// The request to the authority failed before a response was received.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The authority answered with a status the protocol does not define.
    #[error("Unexpected status {status} from authority")]
    UnexpectedStatus {
        /// The HTTP status code.
        status: u16,
    },

    /// The authority's response body could not be decoded.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the decoding failure.
        message: String,
    },

    /// The current snapshot lacks something the operation needs.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `UnknownHostPort` error.
    #[must_use]
    pub fn unknown_host_port(host_port: impl Into<String>) -> Self {
        Self::UnknownHostPort {
            host_port: host_port.into(),
        }
    }

    /// Creates a new `InvalidHostPort` error.
    #[must_use]
    pub fn invalid_host_port(host_port: impl Into<String>) -> Self {
        Self::InvalidHostPort {
            host_port: host_port.into(),
        }
    }

    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a new `Protocol` error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if no configuration snapshot was available.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }

    /// Returns `true` if the authority rejected the request.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::AuthenticationFailure | Self::UserNotFound)
    }

    /// Returns `true` if retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Stale(_) | Self::Transport { .. } | Self::UnexpectedStatus { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Stale(_) => ErrorCategory::Stale,
            Self::AuthenticationFailure | Self::UserNotFound => ErrorCategory::Rejected,
            Self::CallbackAlreadyRegistered
            | Self::UnknownHostPort { .. }
            | Self::InvalidHostPort { .. } => ErrorCategory::Usage,
            Self::Transport { .. } | Self::UnexpectedStatus { .. } | Self::Protocol { .. } => {
                ErrorCategory::Transport
            }
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::protocol(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

/// Categories of cache errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No configuration available.
    Stale,
    /// The authority rejected the request.
    Rejected,
    /// The caller misused the API.
    Usage,
    /// Talking to the authority failed.
    Transport,
    /// The pushed configuration is incomplete.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale => write!(f, "stale"),
            Self::Rejected => write!(f, "rejected"),
            Self::Usage => write!(f, "usage"),
            Self::Transport => write!(f, "transport"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
