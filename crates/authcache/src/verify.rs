//! Verification operations served from the caches.
//!
//! Every operation first obtains the current snapshot (waiting while the
//! service is Initializing), consults the matching version-stamped cache, and
//! only on a miss calls the authority under an admission permit.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

use crate::AuthResult;
use crate::authority::UI_TOKEN_HEADER;
use crate::cache::{CachedIdentity, CertKey, PasswordKey, PermissionKey};
use crate::error::AuthError;
use crate::hostport::{ServiceCredentials, find_credentials, split_host_port};
use crate::identity::{ADMIN_DOMAIN, Identity};
use crate::service::AuthCacheService;
use crate::snapshot::ClientCertAuthMode;

/// Certificate chain presented by a TLS peer, leaf first, DER encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerCertificates {
    chain: Vec<Vec<u8>>,
}

impl PeerCertificates {
    pub fn new(chain: Vec<Vec<u8>>) -> Self {
        Self { chain }
    }

    /// The leaf certificate, which carries the user identity.
    pub fn leaf(&self) -> Option<&[u8]> {
        self.chain.first().map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

/// Whether the request carries a UI session token (`ns-server-ui: yes`).
pub fn is_auth_token_present(headers: &HeaderMap) -> bool {
    headers
        .get(UI_TOKEN_HEADER)
        .is_some_and(|value| value.as_bytes() == b"yes")
}

fn parse_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn basic_auth_headers(user: &str, password: &str) -> AuthResult<HeaderMap> {
    let encoded = BASE64.encode(format!("{}:{}", user, password));
    let value = HeaderValue::from_str(&format!("Basic {}", encoded))
        .map_err(|e| AuthError::internal(format!("invalid authorization header: {}", e)))?;

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

impl AuthCacheService {
    /// Verifies a user/password pair.
    ///
    /// The special service credential is accepted locally as an `admin`
    /// identity. Other results are cached per auth version when the domain
    /// is `admin` or `local`.
    ///
    /// # Errors
    ///
    /// - `AuthError::Stale` if no snapshot is available
    /// - `AuthError::AuthenticationFailure` if the authority rejects the pair
    /// - transport errors from the authority call
    pub async fn verify_password(&self, user: &str, password: &str) -> AuthResult<Identity> {
        let snapshot = self.fetch().await?;

        if snapshot.is_special_credential(user, password) {
            tracing::debug!(user = %user, "Special credential accepted");
            return Ok(Identity::new(user, ADMIN_DOMAIN));
        }

        let key = PasswordKey::new(snapshot.auth_version(), user, password);
        if let Some(cached) = self.auth_cache().get(&key) {
            tracing::debug!(user = %user, "Password cache hit");
            return Ok(cached.into());
        }

        tracing::debug!(user = %user, "Password cache miss");
        let headers = basic_auth_headers(user, password)?;
        let identity = {
            let _permit = self.admit().await?;
            self.authority.verify_identity(&snapshot, &headers).await?
        };

        if identity.is_cacheable() {
            self.auth_cache().put(key, CachedIdentity::from(&identity));
        }
        Ok(identity)
    }

    /// Verifies the credentials carried by an incoming HTTP request.
    ///
    /// Plain Basic credentials take the cached password path. Anything else
    /// (UI session tokens, auth tokens, cookies) is forwarded to the
    /// authority on every call.
    pub async fn verify_web_request(&self, headers: &HeaderMap) -> AuthResult<Identity> {
        if !is_auth_token_present(headers)
            && let Some((user, password)) = parse_basic_auth(headers)
        {
            return self.verify_password(&user, &password).await;
        }

        let snapshot = self.fetch().await?;
        let _permit = self.admit().await?;
        self.authority.verify_identity(&snapshot, headers).await
    }

    /// Checks whether `user` in `domain` holds `permission`.
    ///
    /// Both allow and deny verdicts are cached per permissions version.
    pub async fn check_permission(
        &self,
        user: &str,
        domain: &str,
        permission: &str,
    ) -> AuthResult<bool> {
        let snapshot = self.fetch().await?;

        let key = PermissionKey::new(snapshot.permissions_version(), user, domain, permission);
        if let Some(allowed) = self.permission_cache().get(&key) {
            tracing::debug!(user = %user, permission = %permission, allowed, "Permission cache hit");
            return Ok(allowed);
        }

        let allowed = {
            let _permit = self.admit().await?;
            self.authority
                .check_permission(&snapshot, user, domain, permission)
                .await?
        };

        tracing::debug!(user = %user, domain = %domain, permission = %permission, allowed, "Permission resolved");
        self.permission_cache().put(key, allowed);
        Ok(allowed)
    }

    /// Checks a permission for an already verified identity.
    pub async fn is_allowed(&self, identity: &Identity, permission: &str) -> AuthResult<bool> {
        self.check_permission(identity.user(), identity.domain(), permission)
            .await
    }

    /// Derives an identity from the TLS peer's client certificate.
    ///
    /// Returns `Ok(None)` when the connection is not TLS, when client
    /// certificate authentication is disabled, or when it is optional and no
    /// certificate was presented.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UserNotFound` when a certificate is required but
    /// missing, or no user can be derived from it. Failed derivations are
    /// not cached.
    pub async fn creds_from_cert(
        &self,
        peer: Option<&PeerCertificates>,
    ) -> AuthResult<Option<Identity>> {
        let snapshot = self.fetch().await?;

        let Some(peer) = peer else {
            return Ok(None);
        };

        let leaf = match (snapshot.client_cert_auth(), peer.leaf()) {
            (ClientCertAuthMode::Disabled, _) => return Ok(None),
            (ClientCertAuthMode::Optional, None) => return Ok(None),
            (ClientCertAuthMode::Mandatory, None) => return Err(AuthError::UserNotFound),
            (_, Some(leaf)) => leaf,
        };

        let key = CertKey::new(snapshot.client_cert_auth_version(), leaf);
        if let Some(cached) = self.cert_cache().get(&key) {
            tracing::debug!(user = %cached.user, "Client certificate cache hit");
            return Ok(Some(cached.into()));
        }

        let extracted = {
            let _permit = self.admit().await?;
            self.authority.extract_identity(&snapshot, leaf).await?
        };

        match extracted {
            Some(identity) => {
                tracing::debug!(user = %identity.user(), "Identity extracted from client certificate");
                self.cert_cache().put(key, CachedIdentity::from(&identity));
                Ok(Some(identity))
            }
            None => Err(AuthError::UserNotFound),
        }
    }

    /// Credentials giving admin access to the service at `host:port`.
    ///
    /// All fields are empty when no node serves that address.
    pub async fn service_credentials(&self, host: &str, port: u16) -> AuthResult<ServiceCredentials> {
        let snapshot = self.fetch().await?;

        Ok(find_credentials(snapshot.nodes(), host, port)
            .map(|(user, password)| ServiceCredentials {
                memcached_user: user.to_string(),
                http_user: snapshot.special_user().to_string(),
                password: password.to_string(),
            })
            .unwrap_or_default())
    }

    /// `(user, password)` for the memcached-protocol service at `host_port`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidHostPort` for malformed input and
    /// `AuthError::UnknownHostPort` if no node serves it.
    pub async fn memcached_service_auth(&self, host_port: &str) -> AuthResult<(String, String)> {
        let creds = self.lookup_host_port(host_port).await?;
        Ok((creds.memcached_user, creds.password))
    }

    /// `(user, password)` for the HTTP service at `host_port`.
    ///
    /// # Errors
    ///
    /// Same as [`memcached_service_auth`](Self::memcached_service_auth).
    pub async fn http_service_auth(&self, host_port: &str) -> AuthResult<(String, String)> {
        let creds = self.lookup_host_port(host_port).await?;
        Ok((creds.http_user, creds.password))
    }

    async fn lookup_host_port(&self, host_port: &str) -> AuthResult<ServiceCredentials> {
        let (host, port) = split_host_port(host_port)?;
        let creds = self.service_credentials(host, port).await?;
        if creds.is_empty() {
            return Err(AuthError::unknown_host_port(host_port));
        }
        Ok(creds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::AuthCacheConfig;
    use crate::error::StaleError;
    use crate::snapshot::{CacheUpdate, ConfigSnapshot, Node};
    use crate::test_support::MockAuthority;

    fn update() -> CacheUpdate {
        CacheUpdate {
            nodes: vec![
                Node::new("beta.local", "_admin", "foobar", &[9000, 12000], false),
                Node::new("chi.local", "_admin", "barfoo", &[9001, 12001], true),
                Node::new("fc00:0::10", "_admin", "barfoo", &[9000, 12000], false),
            ],
            special_user: "@component".to_string(),
            permissions_version: "1".to_string(),
            auth_version: "1".to_string(),
            client_cert_auth_state: "enable".to_string(),
            client_cert_auth_version: "1".to_string(),
            ..Default::default()
        }
    }

    fn setup(authority: MockAuthority, update: CacheUpdate) -> (AuthCacheService, Arc<MockAuthority>) {
        let authority = Arc::new(authority);
        let config = AuthCacheConfig::default().with_stale_grace_period(Duration::ZERO);
        let service = AuthCacheService::new(config, authority.clone(), StaleError::not_yet_received());
        service.update(ConfigSnapshot::from(update));
        (service, authority)
    }

    #[tokio::test]
    async fn test_special_credentials_bypass_authority() {
        let (service, authority) = setup(MockAuthority::default(), update());

        let identity = service.verify_password("@component", "barfoo").await.unwrap();
        assert_eq!(identity, Identity::new("@component", "admin"));
        assert_eq!(identity.display_domain(), "builtin");
        assert_eq!(authority.identity_calls(), 0);
    }

    #[tokio::test]
    async fn test_special_bypass_with_empty_local_password() {
        let mut update = update();
        update.nodes[1].password = String::new();
        let (service, authority) = setup(MockAuthority::default(), update);

        let identity = service.verify_password("@component", "").await.unwrap();
        assert_eq!(identity, Identity::new("@component", "admin"));
        assert_eq!(authority.identity_calls(), 0);
    }

    #[tokio::test]
    async fn test_special_user_with_wrong_password_goes_to_authority() {
        let (service, authority) = setup(MockAuthority::default(), update());

        let err = service.verify_password("@component", "foobar").await.unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailure));
        assert_eq!(authority.identity_calls(), 1);
    }

    #[tokio::test]
    async fn test_verify_password_caches_local_and_admin() {
        let authority = MockAuthority::default();
        authority.add_user("alice", "secret", "local");
        authority.add_user("Administrator", "password", "admin");
        let (service, authority) = setup(authority, update());

        for _ in 0..3 {
            let identity = service.verify_password("alice", "secret").await.unwrap();
            assert_eq!(identity, Identity::new("alice", "local"));
            service.verify_password("Administrator", "password").await.unwrap();
        }
        assert_eq!(authority.identity_calls(), 2);
    }

    #[tokio::test]
    async fn test_verify_password_skips_cache_for_other_domains() {
        let authority = MockAuthority::default();
        authority.add_user("bob", "pw", "external");
        authority.add_user("viewer", "pw", "ro_admin");
        let (service, authority) = setup(authority, update());

        for _ in 0..2 {
            service.verify_password("bob", "pw").await.unwrap();
            service.verify_password("viewer", "pw").await.unwrap();
        }
        assert_eq!(authority.identity_calls(), 4);
    }

    #[tokio::test]
    async fn test_rejected_password_not_cached() {
        let authority = MockAuthority::default();
        authority.add_user("alice", "secret", "local");
        let (service, authority) = setup(authority, update());

        for _ in 0..2 {
            let err = service.verify_password("alice", "wrong").await.unwrap_err();
            assert!(matches!(err, AuthError::AuthenticationFailure));
        }
        assert_eq!(authority.identity_calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_version_bump_misses_cache() {
        let authority = MockAuthority::default();
        authority.add_user("alice", "secret", "local");
        let (service, authority) = setup(authority, update());

        service.verify_password("alice", "secret").await.unwrap();
        let mut next = update();
        next.auth_version = "2".to_string();
        service.update(ConfigSnapshot::from(next));
        service.verify_password("alice", "secret").await.unwrap();

        assert_eq!(authority.identity_calls(), 2);
    }

    #[tokio::test]
    async fn test_operations_fail_when_stale() {
        let (service, authority) = setup(MockAuthority::default(), update());
        service.reset(StaleError::new("push channel closed"));

        let err = service.verify_password("alice", "secret").await.unwrap_err();
        assert!(err.is_stale());
        assert!(err.to_string().contains("push channel closed"));
        assert!(service.check_permission("a", "local", "p").await.unwrap_err().is_stale());
        assert!(service.creds_from_cert(None).await.unwrap_err().is_stale());
        assert!(service.service_credentials("beta.local", 9000).await.unwrap_err().is_stale());
        assert_eq!(authority.identity_calls(), 0);
    }

    #[tokio::test]
    async fn test_verify_web_request_basic_auth_uses_cache() {
        let authority = MockAuthority::default();
        authority.add_user("alice", "secret", "local");
        let (service, authority) = setup(authority, update());

        let headers = basic_auth_headers("alice", "secret").unwrap();
        for _ in 0..2 {
            let identity = service.verify_web_request(&headers).await.unwrap();
            assert_eq!(identity.user(), "alice");
        }
        assert_eq!(authority.identity_calls(), 1);
    }

    #[tokio::test]
    async fn test_verify_web_request_forwards_tokens() {
        let authority = MockAuthority::default();
        authority.add_token("tok-1", Identity::new("carol", "local"));
        let (service, authority) = setup(authority, update());

        let mut headers = HeaderMap::new();
        headers.insert("ns-server-ui", HeaderValue::from_static("yes"));
        headers.insert("ns-server-auth-token", HeaderValue::from_static("tok-1"));
        assert!(is_auth_token_present(&headers));

        for _ in 0..2 {
            let identity = service.verify_web_request(&headers).await.unwrap();
            assert_eq!(identity, Identity::new("carol", "local"));
        }
        assert_eq!(authority.identity_calls(), 2);
    }

    #[test]
    fn test_is_auth_token_present() {
        let mut headers = HeaderMap::new();
        assert!(!is_auth_token_present(&headers));
        headers.insert("ns-server-ui", HeaderValue::from_static("no"));
        assert!(!is_auth_token_present(&headers));
        headers.insert("ns-server-ui", HeaderValue::from_static("yes"));
        assert!(is_auth_token_present(&headers));
    }

    #[test]
    fn test_parse_basic_auth() {
        let headers = basic_auth_headers("alice", "pa:ss").unwrap();
        assert_eq!(
            parse_basic_auth(&headers),
            Some(("alice".to_string(), "pa:ss".to_string()))
        );

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(parse_basic_auth(&headers), None);
    }

    #[tokio::test]
    async fn test_permission_cache_and_version_bump() {
        let authority = MockAuthority::default();
        authority.set_permission("alice", "local", "cluster.bucket[b].data!read", true);
        let (service, authority) = setup(authority, update());

        assert!(service.check_permission("alice", "local", "cluster.bucket[b].data!read").await.unwrap());
        assert_eq!(authority.permission_calls(), 1);
        assert!(service.check_permission("alice", "local", "cluster.bucket[b].data!read").await.unwrap());
        assert_eq!(authority.permission_calls(), 1);

        let mut next = update();
        next.permissions_version = "2".to_string();
        service.update(ConfigSnapshot::from(next));
        assert!(service.check_permission("alice", "local", "cluster.bucket[b].data!read").await.unwrap());
        assert_eq!(authority.permission_calls(), 2);
    }

    #[tokio::test]
    async fn test_permission_deny_is_cached() {
        let (service, authority) = setup(MockAuthority::default(), update());
        let identity = Identity::new("bob", "local");

        assert!(!service.is_allowed(&identity, "cluster.admin!write").await.unwrap());
        assert!(!service.is_allowed(&identity, "cluster.admin!write").await.unwrap());
        assert_eq!(authority.permission_calls(), 1);
    }

    #[tokio::test]
    async fn test_permission_transport_error_not_cached() {
        let (service, authority) = setup(MockAuthority::default(), update());
        authority.unreachable.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = service.check_permission("a", "local", "p").await.unwrap_err();
        assert!(matches!(err, AuthError::Transport { .. }));

        authority.unreachable.store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(!service.check_permission("a", "local", "p").await.unwrap());
        assert_eq!(authority.permission_calls(), 2);
    }

    #[tokio::test]
    async fn test_creds_from_cert_modes() {
        let (service, authority) = setup(MockAuthority::default(), update());

        // Not TLS
        assert_eq!(service.creds_from_cert(None).await.unwrap(), None);
        // Optional, nothing presented
        let empty = PeerCertificates::default();
        assert_eq!(service.creds_from_cert(Some(&empty)).await.unwrap(), None);

        let mut disabled = update();
        disabled.client_cert_auth_state = "disable".to_string();
        service.update(ConfigSnapshot::from(disabled));
        let chain = PeerCertificates::new(vec![vec![1, 2, 3]]);
        assert_eq!(service.creds_from_cert(Some(&chain)).await.unwrap(), None);

        let mut mandatory = update();
        mandatory.client_cert_auth_state = "mandatory".to_string();
        service.update(ConfigSnapshot::from(mandatory));
        let err = service.creds_from_cert(Some(&empty)).await.unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));

        assert_eq!(authority.cert_calls(), 0);
    }

    #[tokio::test]
    async fn test_creds_from_cert_caches_resolved_only() {
        let authority = MockAuthority::default();
        authority.add_cert(&[0x30, 0x01], Identity::new("dave", "local"));
        let (service, authority) = setup(authority, update());

        let known = PeerCertificates::new(vec![vec![0x30, 0x01], vec![0x30, 0xff]]);
        let unknown = PeerCertificates::new(vec![vec![0x30, 0x02]]);

        for _ in 0..3 {
            let identity = service.creds_from_cert(Some(&known)).await.unwrap();
            assert_eq!(identity, Some(Identity::new("dave", "local")));

            let err = service.creds_from_cert(Some(&unknown)).await.unwrap_err();
            assert!(matches!(err, AuthError::UserNotFound));
        }

        // One call for the resolvable certificate, one per attempt for the other
        assert_eq!(authority.cert_calls(), 4);
    }

    #[tokio::test]
    async fn test_service_credentials() {
        let (service, _) = setup(MockAuthority::default(), update());

        let creds = service.service_credentials("beta.local", 9000).await.unwrap();
        assert_eq!(creds.memcached_user, "_admin");
        assert_eq!(creds.http_user, "@component");
        assert_eq!(creds.password, "foobar");

        let creds = service.service_credentials("beta.local", 7000).await.unwrap();
        assert!(creds.is_empty());
        assert_eq!(creds, ServiceCredentials::default());
    }

    #[tokio::test]
    async fn test_service_credentials_ignore_nodes_without_user() {
        let mut update = update();
        update.nodes[0].user = String::new();
        let (service, _) = setup(MockAuthority::default(), update);

        let creds = service.service_credentials("beta.local", 9000).await.unwrap();
        assert_eq!(creds, ServiceCredentials::default());

        let err = service.http_service_auth("beta.local:9000").await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownHostPort { .. }));
    }

    #[tokio::test]
    async fn test_host_port_service_auth() {
        let (service, _) = setup(MockAuthority::default(), update());

        assert_eq!(
            service.memcached_service_auth("chi.local:12001").await.unwrap(),
            ("_admin".to_string(), "barfoo".to_string())
        );
        assert_eq!(
            service.memcached_service_auth("[fc00::10]:9000").await.unwrap(),
            ("_admin".to_string(), "barfoo".to_string())
        );
        assert_eq!(
            service.http_service_auth("chi.local:9001").await.unwrap(),
            ("@component".to_string(), "barfoo".to_string())
        );

        let err = service.memcached_service_auth("beta.local:7000").await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownHostPort { .. }));
        let err = service.http_service_auth("beta.local").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidHostPort { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_control_bounds_concurrency() {
        let authority = MockAuthority::with_delay(Duration::from_millis(100));
        let authority = Arc::new(authority);
        let config = AuthCacheConfig::default()
            .with_stale_grace_period(Duration::ZERO)
            .with_max_concurrent_requests(3);
        let service = Arc::new(AuthCacheService::new(
            config,
            authority.clone(),
            StaleError::not_yet_received(),
        ));
        service.update(ConfigSnapshot::from(update()));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .check_permission(&format!("user{}", i), "local", "cluster.admin!read")
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert!(!handle.await.unwrap().unwrap());
        }

        assert_eq!(authority.permission_calls(), 20);
        assert!(authority.max_in_flight() <= 3);
        assert!(authority.max_in_flight() >= 1);
    }
}
