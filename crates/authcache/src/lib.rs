//! # authcache
//!
//! Client-side authentication and authorization cache for cluster services.
//!
//! Services embed an [`AuthCacheService`] to answer, with low latency and
//! without a round trip in the common case:
//! - is this user/password (or HTTP request, or client certificate) valid
//! - does this user hold this permission
//! - which admin credentials reach the service at some host:port
//! - what TLS policy should servers apply right now
//!
//! ## Overview
//!
//! The authority pushes configuration snapshots through an external
//! collaborator that calls [`AuthCacheService::update`] and
//! [`AuthCacheService::reset`]. Each snapshot carries version stamps that are
//! part of every cache key, so a version bump invalidates affected entries
//! without purging. Cache misses call the [`Authority`] under a shared
//! concurrency limit.
//!
//! ## Modules
//!
//! - [`config`] - Cache capacities, grace period, HTTP transport settings
//! - [`snapshot`] - Pushed configuration and TLS policy
//! - [`service`] - Snapshot freshness and the service handle
//! - [`verify`] - Password, request, permission and certificate checks
//! - [`authority`] - Authority seam and its HTTP implementation
//! - [`notifier`] - TLS change callback delivery
//! - [`cache`] - Bounded LRU caches and their keys
//! - [`hostport`] - Host/port matching for service credentials

pub mod authority;
pub mod cache;
pub mod config;
pub mod error;
pub mod hostport;
pub mod identity;
pub mod notifier;
pub mod service;
pub mod snapshot;
pub mod verify;

#[cfg(test)]
mod test_support;

pub use authority::{Authority, HttpAuthority};
pub use config::{AuthCacheConfig, CacheConfig, ConfigError, HttpConfig};
pub use error::{AuthError, ErrorCategory, StaleError};
pub use hostport::ServiceCredentials;
pub use identity::Identity;
pub use notifier::{NotifierStats, RefreshError, TlsRefreshHandler};
pub use service::{AuthCacheService, CacheStats, Freshness};
pub use snapshot::{
    CacheUpdate, ClientCertAuthMode, ConfigSnapshot, Node, TlsConfig, TlsVersion,
};
pub use verify::{PeerCertificates, is_auth_token_present};

/// Type alias for authentication cache results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use authcache::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::authority::{Authority, HttpAuthority};
    pub use crate::config::AuthCacheConfig;
    pub use crate::error::{AuthError, ErrorCategory, StaleError};
    pub use crate::identity::Identity;
    pub use crate::notifier::{RefreshError, TlsRefreshHandler};
    pub use crate::service::{AuthCacheService, Freshness};
    pub use crate::snapshot::{CacheUpdate, ClientCertAuthMode, ConfigSnapshot, TlsConfig};
    pub use crate::verify::PeerCertificates;
}
