//! Configuration snapshots pushed by the authority.
//!
//! The push channel delivers a [`CacheUpdate`] document; converting it into a
//! [`ConfigSnapshot`] derives the special service password and normalizes the
//! client certificate and TLS settings. Snapshots are immutable and shared as
//! `Arc<ConfigSnapshot>`; every push replaces the previous one wholesale.
//!
//! # Example
//!
//! ```ignore
//! let update: CacheUpdate = serde_json::from_slice(&payload)?;
//! service.update(update.into());
//! ```

use serde::{Deserialize, Serialize};

// =============================================================================
// Nodes
// =============================================================================

/// A cluster node with the admin credentials of the services it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Node {
    /// Hostname or IP address of the node.
    pub host: String,
    /// Admin user of the node's services.
    pub user: String,
    /// Admin password of the node's services.
    pub password: String,
    /// Ports served by the node.
    pub ports: Vec<u16>,
    /// Whether this is the node the current process runs on.
    pub local: bool,
}

impl Node {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        ports: &[u16],
        local: bool,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
            ports: ports.to_vec(),
            local,
        }
    }
}

// =============================================================================
// TLS settings
// =============================================================================

/// Client certificate authentication mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ClientCertAuthMode {
    /// Client certificates are ignored.
    #[default]
    Disabled,
    /// Client certificates are used when presented.
    Optional,
    /// Client certificates are required.
    Mandatory,
}

impl ClientCertAuthMode {
    /// Maps the authority's state string.
    pub fn from_state(state: &str) -> Self {
        match state {
            "enable" => Self::Optional,
            "mandatory" => Self::Mandatory,
            _ => Self::Disabled,
        }
    }
}

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    #[default]
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    /// Parses the authority's version string; unknown values fall back to TLS 1.0.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "tlsv1.1" => Self::Tls11,
            "tlsv1.2" => Self::Tls12,
            "tlsv1.3" => Self::Tls13,
            _ => Self::Tls10,
        }
    }

    /// IANA protocol version number (e.g. `0x0303` for TLS 1.2).
    pub fn wire_version(self) -> u16 {
        match self {
            Self::Tls10 => 0x0301,
            Self::Tls11 => 0x0302,
            Self::Tls12 => 0x0303,
            Self::Tls13 => 0x0304,
        }
    }
}

/// TLS policy for servers in the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub min_version: TlsVersion,
    /// Allowed cipher suites by IANA number.
    pub cipher_suites: Vec<u16>,
    /// IANA cipher suite names.
    pub cipher_suite_names: Vec<String>,
    /// OpenSSL cipher suite names.
    pub cipher_suite_openssl_names: Vec<String>,
    /// Whether the server's cipher order takes precedence.
    pub prefer_server_cipher_suites: bool,
}

// =============================================================================
// Wire document
// =============================================================================

/// TLS settings as pushed by the authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfigUpdate {
    #[serde(rename = "MinTLSVersion")]
    pub min_tls_version: String,
    #[serde(rename = "Ciphers")]
    pub ciphers: Vec<u16>,
    #[serde(rename = "CipherNames")]
    pub cipher_names: Vec<String>,
    #[serde(rename = "CipherOpenSSLNames")]
    pub cipher_openssl_names: Vec<String>,
    #[serde(rename = "CipherOrder")]
    pub cipher_order: bool,
}

/// Configuration document pushed by the authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheUpdate {
    #[serde(rename = "Nodes")]
    pub nodes: Vec<Node>,
    #[serde(rename = "authCheckUrl")]
    pub auth_check_url: String,
    #[serde(rename = "permissionCheckUrl")]
    pub permission_check_url: String,
    #[serde(rename = "specialUser")]
    pub special_user: String,
    #[serde(rename = "PermissionsVersion")]
    pub permissions_version: String,
    #[serde(rename = "AuthVersion")]
    pub auth_version: String,
    #[serde(rename = "CertVersion")]
    pub cert_version: i64,
    #[serde(rename = "extractUserFromCertURL")]
    pub extract_user_from_cert_url: String,
    #[serde(rename = "clientCertAuthState")]
    pub client_cert_auth_state: String,
    #[serde(rename = "clientCertAuthVersion")]
    pub client_cert_auth_version: String,
    #[serde(rename = "tlsConfig")]
    pub tls_config: TlsConfigUpdate,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    nodes: Vec<Node>,
    auth_check_url: String,
    permission_check_url: String,
    extract_user_from_cert_url: String,
    special_user: String,
    special_password: String,
    permissions_version: String,
    auth_version: String,
    client_cert_auth_version: String,
    cert_version: i64,
    client_cert_auth: ClientCertAuthMode,
    tls: TlsConfig,
}

impl From<CacheUpdate> for ConfigSnapshot {
    fn from(update: CacheUpdate) -> Self {
        let special_password = update
            .nodes
            .iter()
            .find(|node| node.local)
            .map(|node| node.password.clone())
            .unwrap_or_default();

        let tls = TlsConfig {
            min_version: TlsVersion::parse(&update.tls_config.min_tls_version),
            cipher_suites: update.tls_config.ciphers,
            cipher_suite_names: update.tls_config.cipher_names,
            cipher_suite_openssl_names: update.tls_config.cipher_openssl_names,
            prefer_server_cipher_suites: update.tls_config.cipher_order,
        };

        Self {
            nodes: update.nodes,
            auth_check_url: update.auth_check_url,
            permission_check_url: update.permission_check_url,
            extract_user_from_cert_url: update.extract_user_from_cert_url,
            special_user: update.special_user,
            special_password,
            permissions_version: update.permissions_version,
            auth_version: update.auth_version,
            client_cert_auth_version: update.client_cert_auth_version,
            cert_version: update.cert_version,
            client_cert_auth: ClientCertAuthMode::from_state(&update.client_cert_auth_state),
            tls,
        }
    }
}

impl ConfigSnapshot {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn auth_check_url(&self) -> &str {
        &self.auth_check_url
    }

    pub fn permission_check_url(&self) -> &str {
        &self.permission_check_url
    }

    pub fn extract_user_from_cert_url(&self) -> &str {
        &self.extract_user_from_cert_url
    }

    pub fn special_user(&self) -> &str {
        &self.special_user
    }

    /// Password of the node flagged local, empty if there is none.
    pub fn special_password(&self) -> &str {
        &self.special_password
    }

    pub fn permissions_version(&self) -> &str {
        &self.permissions_version
    }

    pub fn auth_version(&self) -> &str {
        &self.auth_version
    }

    pub fn client_cert_auth_version(&self) -> &str {
        &self.client_cert_auth_version
    }

    pub fn cert_version(&self) -> i64 {
        self.cert_version
    }

    pub fn client_cert_auth(&self) -> ClientCertAuthMode {
        self.client_cert_auth
    }

    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }

    /// Whether `user`/`password` is the special service credential: any
    /// `@`-prefixed user presenting the local node's password.
    pub fn is_special_credential(&self, user: &str, password: &str) -> bool {
        user.starts_with('@') && password == self.special_password
    }

    /// Whether TLS-relevant settings differ from `previous`. A missing
    /// previous snapshot counts as a change.
    pub fn tls_changed_since(&self, previous: Option<&ConfigSnapshot>) -> bool {
        previous.is_none_or(|prev| {
            prev.cert_version != self.cert_version
                || prev.client_cert_auth != self.client_cert_auth
                || prev.tls != self.tls
        })
    }
}
