//! TLS configuration change notifications.
//!
//! A single background task owns the refresh callback invocation. Requests
//! land in a one-slot channel, so any number of changes that arrive while the
//! callback is running collapse into one follow-up call. A failed callback is
//! retried after a fixed delay until it succeeds or a fresh notification
//! supersedes the retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

use crate::AuthResult;
use crate::error::AuthError;

/// Error returned by a refresh callback.
pub type RefreshError = Box<dyn std::error::Error + Send + Sync>;

/// Reacts to TLS-relevant configuration changes, typically by reloading
/// certificates and rebuilding server TLS settings.
#[async_trait]
pub trait TlsRefreshHandler: Send + Sync {
    async fn refresh(&self) -> Result<(), RefreshError>;
}

#[async_trait]
impl<F> TlsRefreshHandler for F
where
    F: Fn() -> Result<(), RefreshError> + Send + Sync,
{
    async fn refresh(&self) -> Result<(), RefreshError> {
        (self)()
    }
}

/// Notifier counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    /// Notifications requested.
    pub requested: u64,
    /// Requests folded into an already pending notification.
    pub coalesced: u64,
    /// Callback invocations that succeeded.
    pub successes: u64,
    /// Callback invocations that failed.
    pub failures: u64,
}

#[derive(Debug, Default)]
struct NotifierCounters {
    requested: AtomicU64,
    coalesced: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

type SharedHandler = Arc<Mutex<Option<Arc<dyn TlsRefreshHandler>>>>;

/// Delivers TLS change notifications to at most one registered callback.
///
/// Must be created inside a tokio runtime. The worker task stops once the
/// notifier is dropped.
pub struct TlsChangeNotifier {
    handler: SharedHandler,
    tx: mpsc::Sender<()>,
    counters: Arc<NotifierCounters>,
}

impl TlsChangeNotifier {
    /// Starts the notifier with the given retry delay for failed callbacks.
    pub fn spawn(retry_delay: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let handler: SharedHandler = Arc::new(Mutex::new(None));
        let counters = Arc::new(NotifierCounters::default());

        tokio::spawn(run(rx, handler.clone(), counters.clone(), retry_delay));

        Self {
            handler,
            tx,
            counters,
        }
    }

    /// Registers the refresh callback and schedules an initial call.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::CallbackAlreadyRegistered` if a callback is
    /// already registered; the existing one is kept.
    pub fn register<H>(&self, handler: H) -> AuthResult<()>
    where
        H: TlsRefreshHandler + 'static,
    {
        let handler: Arc<dyn TlsRefreshHandler> = Arc::new(handler);
        {
            let mut slot = self.handler.lock();
            if slot.is_some() {
                return Err(AuthError::CallbackAlreadyRegistered);
            }
            *slot = Some(handler);
        }

        tracing::debug!("TLS refresh callback registered");
        self.notify();
        Ok(())
    }

    /// Requests a callback invocation. Never blocks.
    pub fn notify(&self) {
        self.counters.requested.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Closed(())) => {
                tracing::warn!("TLS change notifier task is gone, dropping notification");
            }
        }
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            requested: self.counters.requested.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

async fn run(
    mut rx: mpsc::Receiver<()>,
    handler: SharedHandler,
    counters: Arc<NotifierCounters>,
    retry_delay: Duration,
) {
    let retry = tokio::time::sleep(retry_delay);
    tokio::pin!(retry);
    let mut retry_armed = false;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                if msg.is_none() {
                    break;
                }
            }
            () = &mut retry, if retry_armed => {
                retry_armed = false;
                tracing::debug!("Retrying TLS refresh callback");
            }
        }

        let registered = handler.lock().clone();
        let Some(callback) = registered else {
            continue;
        };

        match callback.refresh().await {
            Ok(()) => {
                counters.successes.fetch_add(1, Ordering::Relaxed);
                retry_armed = false;
            }
            Err(e) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                if retry_armed {
                    tracing::warn!(error = %e, "TLS refresh callback failed, retry already scheduled");
                } else {
                    tracing::warn!(
                        error = %e,
                        retry_in = ?retry_delay,
                        "TLS refresh callback failed, scheduling retry"
                    );
                    retry.as_mut().reset(Instant::now() + retry_delay);
                    retry_armed = true;
                }
            }
        }
    }

    tracing::debug!("TLS change notifier stopped");
}
