//! Cache keys and cached values for the three verification caches.

use sha2::{Digest, Sha256};

use crate::identity::Identity;

/// Key of the permission decision cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionKey {
    pub version: String,
    pub user: String,
    pub domain: String,
    pub permission: String,
}

impl PermissionKey {
    pub fn new(version: &str, user: &str, domain: &str, permission: &str) -> Self {
        Self {
            version: version.to_string(),
            user: user.to_string(),
            domain: domain.to_string(),
            permission: permission.to_string(),
        }
    }
}

/// Key of the password identity cache.
///
/// The password itself is never stored, only its SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PasswordKey {
    pub version: String,
    pub user: String,
    pub password_digest: [u8; 32],
}

impl PasswordKey {
    pub fn new(version: &str, user: &str, password: &str) -> Self {
        Self {
            version: version.to_string(),
            user: user.to_string(),
            password_digest: Sha256::digest(password.as_bytes()).into(),
        }
    }
}

/// Key of the client certificate identity cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertKey {
    pub version: String,
    pub cert_digest: [u8; 32],
}

impl CertKey {
    /// Builds a key from the raw DER bytes of the leaf certificate.
    pub fn new(version: &str, cert_der: &[u8]) -> Self {
        Self {
            version: version.to_string(),
            cert_digest: Sha256::digest(cert_der).into(),
        }
    }
}

/// Identity stored in the password and certificate caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedIdentity {
    pub user: String,
    pub domain: String,
}

impl From<&Identity> for CachedIdentity {
    fn from(identity: &Identity) -> Self {
        Self {
            user: identity.user().to_string(),
            domain: identity.domain().to_string(),
        }
    }
}

impl From<CachedIdentity> for Identity {
    fn from(cached: CachedIdentity) -> Self {
        Identity::new(cached.user, cached.domain)
    }
}
