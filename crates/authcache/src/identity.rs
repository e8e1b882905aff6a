//! Verified user identity.

use serde::{Deserialize, Serialize};

/// Domain assigned to the built-in full administrator.
pub const ADMIN_DOMAIN: &str = "admin";

/// Domain assigned to the built-in read-only administrator.
pub const RO_ADMIN_DOMAIN: &str = "ro_admin";

/// Domain of locally defined users.
pub const LOCAL_DOMAIN: &str = "local";

/// Display domain reported for both administrator domains.
pub const BUILTIN_DISPLAY_DOMAIN: &str = "builtin";

/// A user identity resolved by the authority (or by the special credential
/// bypass).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    #[serde(alias = "User")]
    user: String,
    #[serde(alias = "Domain")]
    domain: String,
}

impl Identity {
    pub fn new(user: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            domain: domain.into(),
        }
    }

    /// User name, e.g. for auditing.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Raw domain tag as returned by the authority. Permission checks use
    /// this value.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Domain for display and auditing: administrator domains are reported
    /// as `builtin`.
    pub fn display_domain(&self) -> &str {
        match self.domain.as_str() {
            ADMIN_DOMAIN | RO_ADMIN_DOMAIN => BUILTIN_DISPLAY_DOMAIN,
            other => other,
        }
    }

    /// Whether verified identities in this domain may be cached.
    pub(crate) fn is_cacheable(&self) -> bool {
        matches!(self.domain.as_str(), ADMIN_DOMAIN | LOCAL_DOMAIN)
    }
}
