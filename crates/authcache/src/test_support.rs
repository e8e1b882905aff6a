//! In-memory authority used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, HeaderMap};

use crate::AuthResult;
use crate::authority::{AUTH_TOKEN_HEADER, Authority};
use crate::error::AuthError;
use crate::identity::Identity;
use crate::snapshot::ConfigSnapshot;

#[derive(Default)]
pub(crate) struct MockAuthority {
    identity_calls: AtomicUsize,
    permission_calls: AtomicUsize,
    cert_calls: AtomicUsize,
    max_in_flight: AtomicUsize,
    in_flight: AtomicUsize,
    delay: Duration,
    pub unreachable: AtomicBool,
    passwords: Mutex<HashMap<(String, String), Identity>>,
    tokens: Mutex<HashMap<String, Identity>>,
    permissions: Mutex<HashMap<(String, String, String), bool>>,
    certs: Mutex<HashMap<Vec<u8>, Identity>>,
}

impl MockAuthority {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn add_user(&self, user: &str, password: &str, domain: &str) {
        self.passwords.lock().insert(
            (user.to_string(), password.to_string()),
            Identity::new(user, domain),
        );
    }

    pub fn add_token(&self, token: &str, identity: Identity) {
        self.tokens.lock().insert(token.to_string(), identity);
    }

    pub fn set_permission(&self, user: &str, domain: &str, permission: &str, allowed: bool) {
        self.permissions.lock().insert(
            (user.to_string(), domain.to_string(), permission.to_string()),
            allowed,
        );
    }

    pub fn add_cert(&self, der: &[u8], identity: Identity) {
        self.certs.lock().insert(der.to_vec(), identity);
    }

    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }

    pub fn permission_calls(&self) -> usize {
        self.permission_calls.load(Ordering::SeqCst)
    }

    pub fn cert_calls(&self) -> usize {
        self.cert_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_call(&self, counter: &AtomicUsize) -> AuthResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AuthError::transport("connection refused"));
        }
        Ok(())
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(BASE64.decode(encoded).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

#[async_trait]
impl Authority for MockAuthority {
    async fn verify_identity(
        &self,
        _snapshot: &ConfigSnapshot,
        headers: &HeaderMap,
    ) -> AuthResult<Identity> {
        self.simulate_call(&self.identity_calls).await?;

        if let Some(token) = headers.get(AUTH_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
            return self
                .tokens
                .lock()
                .get(token)
                .cloned()
                .ok_or(AuthError::AuthenticationFailure);
        }

        let (user, password) = basic_credentials(headers).ok_or(AuthError::AuthenticationFailure)?;
        self.passwords
            .lock()
            .get(&(user, password))
            .cloned()
            .ok_or(AuthError::AuthenticationFailure)
    }

    async fn check_permission(
        &self,
        _snapshot: &ConfigSnapshot,
        user: &str,
        domain: &str,
        permission: &str,
    ) -> AuthResult<bool> {
        self.simulate_call(&self.permission_calls).await?;
        let key = (user.to_string(), domain.to_string(), permission.to_string());
        Ok(self.permissions.lock().get(&key).copied().unwrap_or(false))
    }

    async fn extract_identity(
        &self,
        _snapshot: &ConfigSnapshot,
        cert_der: &[u8],
    ) -> AuthResult<Option<Identity>> {
        self.simulate_call(&self.cert_calls).await?;
        Ok(self.certs.lock().get(cert_der).cloned())
    }
}
