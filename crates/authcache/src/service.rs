//! The authentication cache service.
//!
//! [`AuthCacheService`] holds the latest configuration snapshot pushed by the
//! authority and tracks its freshness:
//!
//! - **Initializing**: no snapshot yet, callers wait up to the grace period
//! - **Fresh**: a snapshot is installed
//! - **Stale**: no snapshot, callers fail immediately with the recorded
//!   [`StaleError`]
//!
//! The push-channel collaborator drives transitions through
//! [`update`](AuthCacheService::update) and [`reset`](AuthCacheService::reset).
//! Verification operations live in [`crate::verify`].

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use crate::AuthResult;
use crate::authority::{Authority, HttpAuthority};
use crate::cache::{CacheStatsSnapshot, CachedIdentity, CertKey, LruCache, PasswordKey, PermissionKey};
use crate::config::AuthCacheConfig;
use crate::error::{AuthError, StaleError};
use crate::notifier::{NotifierStats, TlsChangeNotifier, TlsRefreshHandler};
use crate::snapshot::{ClientCertAuthMode, ConfigSnapshot, TlsConfig};

/// Freshness of the configuration held by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// No snapshot yet; callers wait for the first one.
    Initializing,
    /// A snapshot is installed.
    Fresh,
    /// No snapshot; callers fail with the recorded stale error.
    Stale,
}

struct FreshnessState {
    snapshot: Option<Arc<ConfigSnapshot>>,
    stale_error: StaleError,
    /// Present only while Initializing. Cancelled exactly once, by the first
    /// update, reset or grace timeout.
    fresh_wait: Option<CancellationToken>,
}

impl FreshnessState {
    fn release_waiters(&mut self) {
        if let Some(token) = self.fresh_wait.take() {
            token.cancel();
        }
    }
}

/// Statistics for the three verification caches.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub permissions: CacheStatsSnapshot,
    pub passwords: CacheStatsSnapshot,
    pub client_certs: CacheStatsSnapshot,
}

/// Client-side authentication and authorization cache.
///
/// Construct one per process and share it (`Arc<AuthCacheService>`) between
/// request handlers and the push-channel collaborator.
pub struct AuthCacheService {
    state: Arc<Mutex<FreshnessState>>,
    semaphore: Semaphore,
    notifier: TlsChangeNotifier,
    permission_cache: OnceLock<LruCache<PermissionKey, bool>>,
    auth_cache: OnceLock<LruCache<PasswordKey, CachedIdentity>>,
    cert_cache: OnceLock<LruCache<CertKey, CachedIdentity>>,
    pub(crate) authority: Arc<dyn Authority>,
    config: AuthCacheConfig,
}

impl AuthCacheService {
    /// Creates the service in the Initializing state.
    ///
    /// `initial_error` is reported once the grace period elapses without a
    /// snapshot. With a zero grace period the service starts Stale.
    ///
    /// A zero `max_concurrent_requests` is raised to one permit.
    ///
    /// Must be called inside a tokio runtime: the grace timer and the TLS
    /// change notifier run as background tasks.
    pub fn new(
        config: AuthCacheConfig,
        authority: Arc<dyn Authority>,
        initial_error: StaleError,
    ) -> Self {
        let grace = config.stale_grace_period;
        let fresh_wait = (!grace.is_zero()).then(CancellationToken::new);

        let state = Arc::new(Mutex::new(FreshnessState {
            snapshot: None,
            stale_error: initial_error,
            fresh_wait: fresh_wait.clone(),
        }));

        if let Some(token) = fresh_wait {
            tokio::spawn(grace_timer(state.clone(), token, grace));
        }

        let permits = config.max_concurrent_requests.max(1);
        if permits != config.max_concurrent_requests {
            tracing::warn!("max_concurrent_requests is 0, using a single permit");
        }

        tracing::debug!(
            grace_period = ?grace,
            max_concurrent_requests = permits,
            "Authentication cache created"
        );

        Self {
            state,
            semaphore: Semaphore::new(permits),
            notifier: TlsChangeNotifier::spawn(config.tls_refresh_retry_delay),
            permission_cache: OnceLock::new(),
            auth_cache: OnceLock::new(),
            cert_cache: OnceLock::new(),
            authority,
            config,
        }
    }

    /// Creates the service with an [`HttpAuthority`] built from `config.http`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if `config` fails validation and
    /// `AuthError::Internal` if the HTTP client cannot be built.
    pub fn with_http_authority(config: AuthCacheConfig) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let authority = HttpAuthority::new(&config.http)?;
        Ok(Self::new(
            config,
            Arc::new(authority),
            StaleError::not_yet_received(),
        ))
    }

    pub fn config(&self) -> &AuthCacheConfig {
        &self.config
    }

    /// Installs a new snapshot. Always transitions to Fresh.
    ///
    /// Releases callers waiting for the first snapshot and triggers a TLS
    /// refresh notification if TLS-relevant settings changed.
    pub fn update(&self, snapshot: ConfigSnapshot) {
        let snapshot = Arc::new(snapshot);

        let tls_changed = {
            let mut state = self.state.lock();
            let changed = snapshot.tls_changed_since(state.snapshot.as_deref());
            state.snapshot = Some(snapshot.clone());
            state.release_waiters();
            changed
        };

        tracing::info!(
            nodes = snapshot.nodes().len(),
            permissions_version = %snapshot.permissions_version(),
            auth_version = %snapshot.auth_version(),
            cert_version = snapshot.cert_version(),
            tls_changed,
            "Installed configuration snapshot"
        );

        if tls_changed {
            self.notifier.notify();
        }
    }

    /// Drops the current snapshot and records why. Transitions to Stale.
    pub fn reset(&self, error: StaleError) {
        tracing::info!(reason = %error.reason(), "Configuration reset, cache is stale");

        let mut state = self.state.lock();
        state.snapshot = None;
        state.stale_error = error;
        state.release_waiters();
    }

    /// Current freshness state.
    pub fn state(&self) -> Freshness {
        let state = self.state.lock();
        if state.snapshot.is_some() {
            Freshness::Fresh
        } else if state.fresh_wait.is_some() {
            Freshness::Initializing
        } else {
            Freshness::Stale
        }
    }

    /// Returns the current snapshot, waiting for the first one while
    /// Initializing.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Stale` with the recorded reason if no snapshot is
    /// available.
    pub async fn fetch(&self) -> AuthResult<Arc<ConfigSnapshot>> {
        let wait = {
            let state = self.state.lock();
            if let Some(snapshot) = &state.snapshot {
                return Ok(snapshot.clone());
            }
            match &state.fresh_wait {
                Some(token) => token.clone(),
                None => return Err(state.stale_error.clone().into()),
            }
        };

        tracing::debug!("Waiting for the first configuration snapshot");
        wait.cancelled().await;

        let state = self.state.lock();
        match &state.snapshot {
            Some(snapshot) => Ok(snapshot.clone()),
            None => Err(state.stale_error.clone().into()),
        }
    }

    /// TLS policy of the current snapshot.
    pub async fn tls_config(&self) -> AuthResult<TlsConfig> {
        Ok(self.fetch().await?.tls().clone())
    }

    /// Client certificate mode of the current snapshot.
    pub async fn client_cert_auth_mode(&self) -> AuthResult<ClientCertAuthMode> {
        Ok(self.fetch().await?.client_cert_auth())
    }

    /// Registers the callback invoked when TLS settings change. The callback
    /// is invoked once right after registration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::CallbackAlreadyRegistered` on a second call.
    pub fn register_tls_refresh_callback<H>(&self, handler: H) -> AuthResult<()>
    where
        H: TlsRefreshHandler + 'static,
    {
        self.notifier.register(handler)
    }

    pub fn notifier_stats(&self) -> NotifierStats {
        self.notifier.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            permissions: self.permission_cache().stats(),
            passwords: self.auth_cache().stats(),
            client_certs: self.cert_cache().stats(),
        }
    }

    /// Acquires an admission permit for one authority call.
    pub(crate) async fn admit(&self) -> AuthResult<SemaphorePermit<'_>> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| AuthError::internal("admission semaphore closed"))
    }

    pub(crate) fn permission_cache(&self) -> &LruCache<PermissionKey, bool> {
        self.permission_cache
            .get_or_init(|| LruCache::new(self.config.cache.permissions))
    }

    pub(crate) fn auth_cache(&self) -> &LruCache<PasswordKey, CachedIdentity> {
        self.auth_cache
            .get_or_init(|| LruCache::new(self.config.cache.passwords))
    }

    pub(crate) fn cert_cache(&self) -> &LruCache<CertKey, CachedIdentity> {
        self.cert_cache
            .get_or_init(|| LruCache::new(self.config.cache.client_certs))
    }
}

async fn grace_timer(state: Arc<Mutex<FreshnessState>>, token: CancellationToken, grace: Duration) {
    tokio::select! {
        () = tokio::time::sleep(grace) => {
            let mut state = state.lock();
            if state.fresh_wait.is_some() {
                tracing::warn!(
                    grace_period = ?grace,
                    reason = %state.stale_error.reason(),
                    "No configuration received within grace period"
                );
                state.release_waiters();
            }
        }
        () = token.cancelled() => {}
    }
}
