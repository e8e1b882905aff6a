//! Calls to the authority that owns the user database.
//!
//! [`Authority`] is the seam between the caches and the wire. The service only
//! ever talks to it while holding an admission permit, so implementations do
//! not need their own concurrency limit.
//!
//! [`HttpAuthority`] speaks the authority's HTTP protocol:
//!
//! | Call        | Request                                                     | Outcome                         |
//! |-------------|-------------------------------------------------------------|---------------------------------|
//! | identity    | `POST {authCheckUrl}` with forwarded credential headers     | 200 `{user, domain}` / 401      |
//! | permission  | `GET {permissionCheckUrl}?user=&domain=&permission=`        | 200 allow / 401 deny            |
//! | certificate | `POST {extractUserFromCertURL}` with the DER leaf as body   | 200 `{user, domain}` / 401      |
//!
//! Permission and certificate calls authenticate with the special credential
//! from the snapshot. Any other status is an [`AuthError::UnexpectedStatus`].

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName};
use url::Url;

use crate::AuthResult;
use crate::config::HttpConfig;
use crate::error::AuthError;
use crate::identity::Identity;
use crate::snapshot::ConfigSnapshot;

/// Header the UI sets to `yes` when the request carries a UI session token.
pub const UI_TOKEN_HEADER: &str = "ns-server-ui";

/// Header carrying an explicit auth token.
pub const AUTH_TOKEN_HEADER: &str = "ns-server-auth-token";

/// Headers copied from an incoming request into the identity call.
pub static FORWARDED_HEADERS: [HeaderName; 4] = [
    HeaderName::from_static(UI_TOKEN_HEADER),
    HeaderName::from_static(AUTH_TOKEN_HEADER),
    COOKIE,
    AUTHORIZATION,
];

/// Remote verification calls.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Resolves the identity behind the credentials carried in `headers`.
    ///
    /// Returns `AuthError::AuthenticationFailure` if the authority rejects
    /// them.
    async fn verify_identity(
        &self,
        snapshot: &ConfigSnapshot,
        headers: &HeaderMap,
    ) -> AuthResult<Identity>;

    /// Asks whether `user` in `domain` holds `permission`.
    async fn check_permission(
        &self,
        snapshot: &ConfigSnapshot,
        user: &str,
        domain: &str,
        permission: &str,
    ) -> AuthResult<bool>;

    /// Maps a DER-encoded client certificate to an identity. `Ok(None)` means
    /// no user could be derived.
    async fn extract_identity(
        &self,
        snapshot: &ConfigSnapshot,
        cert_der: &[u8],
    ) -> AuthResult<Option<Identity>>;
}

/// [`Authority`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    http_client: reqwest::Client,
}

impl HttpAuthority {
    /// Creates an authority client with the given transport settings.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> AuthResult<Self> {
        let mut builder =
            reqwest::Client::builder().pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| AuthError::internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// Wraps an existing client, e.g. one configured with custom TLS roots.
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    async fn send_for_identity(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> AuthResult<Option<Identity>> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Authority request failed");
            AuthError::from(e)
        })?;

        match response.status() {
            StatusCode::OK => {
                let identity = response.json::<Identity>().await.map_err(|e| {
                    tracing::warn!(url = %url, error = %e, "Failed to decode identity");
                    AuthError::protocol(e.to_string())
                })?;
                Ok(Some(identity))
            }
            StatusCode::UNAUTHORIZED => Ok(None),
            status => Err(AuthError::UnexpectedStatus {
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn verify_identity(
        &self,
        snapshot: &ConfigSnapshot,
        headers: &HeaderMap,
    ) -> AuthResult<Identity> {
        let url = snapshot.auth_check_url();
        if url.is_empty() {
            return Err(AuthError::AuthenticationFailure);
        }

        let mut forwarded = HeaderMap::new();
        for name in &FORWARDED_HEADERS {
            if let Some(value) = headers.get(name)
                && !value.is_empty()
            {
                forwarded.insert(name.clone(), value.clone());
            }
        }

        tracing::debug!(url = %url, "Verifying identity with authority");
        let request = self.http_client.post(url).headers(forwarded);

        self.send_for_identity(request, url)
            .await?
            .ok_or(AuthError::AuthenticationFailure)
    }

    async fn check_permission(
        &self,
        snapshot: &ConfigSnapshot,
        user: &str,
        domain: &str,
        permission: &str,
    ) -> AuthResult<bool> {
        if snapshot.permission_check_url().is_empty() {
            return Err(AuthError::configuration("permission check URL is not set"));
        }

        let mut url = Url::parse(snapshot.permission_check_url())
            .map_err(|e| AuthError::configuration(format!("invalid permission check URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("user", user)
            .append_pair("domain", domain)
            .append_pair("permission", permission);

        tracing::debug!(user = %user, domain = %domain, permission = %permission, "Checking permission with authority");

        let response = self
            .http_client
            .get(url)
            .basic_auth(snapshot.special_user(), Some(snapshot.special_password()))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Permission check request failed");
                AuthError::from(e)
            })?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::UNAUTHORIZED => Ok(false),
            status => Err(AuthError::UnexpectedStatus {
                status: status.as_u16(),
            }),
        }
    }

    async fn extract_identity(
        &self,
        snapshot: &ConfigSnapshot,
        cert_der: &[u8],
    ) -> AuthResult<Option<Identity>> {
        let url = snapshot.extract_user_from_cert_url();
        if url.is_empty() {
            return Err(AuthError::UserNotFound);
        }

        tracing::debug!(url = %url, cert_len = cert_der.len(), "Extracting identity from certificate");
        let request = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .basic_auth(snapshot.special_user(), Some(snapshot.special_password()))
            .body(cert_der.to_vec());

        self.send_for_identity(request, url).await
    }
}
