//! Transport selection with transparent fallback.
//!
//! The coordinator owns one transport of each kind. Every call re-checks
//! which one is usable: the persistent channel while it is connected, the
//! polling transport otherwise. Failures stop here; callers (scheduled
//! tasks, reconciliation) only ever see "delivered" or "nothing".
//!
//! Push delivery is a single forwarding task reading the persistent
//! transport's `broadcast` receiver. The receiver outlives reconnects, so
//! the listener never needs re-attaching after a drop.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::protocol::{PartialUpdate, Snapshot};
use crate::transport::{PersistentTransport, PollingTransport, Transport};

/// Counters for monitoring which path served traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub persistent_calls: u64,
    pub polling_calls: u64,
    pub failures: u64,
}

/// Atomic counters, lock-free on the call path.
#[derive(Default)]
struct AtomicCoordinatorStats {
    persistent_calls: AtomicU64,
    polling_calls: AtomicU64,
    failures: AtomicU64,
}

impl AtomicCoordinatorStats {
    fn record(&self, persistent: bool, ok: bool) {
        let counter = if persistent { &self.persistent_calls } else { &self.polling_calls };
        counter.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            persistent_calls: self.persistent_calls.load(Ordering::Relaxed),
            polling_calls: self.polling_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// The transport chosen for one call.
pub enum SelectedTransport<'a, P, H> {
    Persistent(&'a P),
    Polling(&'a H),
}

impl<P: Transport, H: Transport> SelectedTransport<'_, P, H> {
    pub fn name(&self) -> &'static str {
        match self {
            SelectedTransport::Persistent(t) => t.name(),
            SelectedTransport::Polling(t) => t.name(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, SelectedTransport::Persistent(_))
    }

    async fn ping(&self) -> Result<Snapshot, TransportError> {
        match self {
            SelectedTransport::Persistent(t) => t.ping().await,
            SelectedTransport::Polling(t) => t.ping().await,
        }
    }

    async fn broadcast(&self, update: &PartialUpdate) -> Result<(), TransportError> {
        match self {
            SelectedTransport::Persistent(t) => t.broadcast(update).await,
            SelectedTransport::Polling(t) => t.broadcast(update).await,
        }
    }
}

/// Single point of truth for how the group is reached right now.
pub struct BroadcastCoordinator<P = PersistentTransport, H = PollingTransport> {
    persistent: P,
    polling: H,
    listener: Mutex<Option<JoinHandle<()>>>,
    stats: AtomicCoordinatorStats,
}

impl<P: Transport, H: Transport> BroadcastCoordinator<P, H> {
    pub fn new(persistent: P, polling: H) -> Self {
        Self {
            persistent,
            polling,
            listener: Mutex::new(None),
            stats: AtomicCoordinatorStats::default(),
        }
    }

    /// Persistent if connected, polling otherwise. Never cached.
    pub fn select_transport(&self) -> SelectedTransport<'_, P, H> {
        if self.persistent.is_connected() {
            SelectedTransport::Persistent(&self.persistent)
        } else {
            SelectedTransport::Polling(&self.polling)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.persistent.is_connected()
    }

    pub fn persistent(&self) -> &P {
        &self.persistent
    }

    pub fn polling(&self) -> &H {
        &self.polling
    }

    /// Connect the persistent channel; failures are logged only.
    pub async fn connect(&self) {
        if let Err(e) = self.persistent.connect().await {
            log::warn!("Persistent connect failed, staying on {}: {e}", self.polling.name());
        }
    }

    pub async fn disconnect(&self) {
        self.persistent.disconnect().await;
    }

    /// Send `update` on the current transport. Returns whether it was delivered.
    pub async fn broadcast(&self, update: &PartialUpdate) -> bool {
        let selected = self.select_transport();
        let result = selected.broadcast(update).await;
        self.stats.record(selected.is_persistent(), result.is_ok());
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Broadcast via {} failed: {e}", selected.name());
                false
            }
        }
    }

    /// Pull the group snapshot; empty on failure.
    pub async fn ping(&self) -> Snapshot {
        let selected = self.select_transport();
        let result = selected.ping().await;
        self.stats.record(selected.is_persistent(), result.is_ok());
        result.unwrap_or_else(|e| {
            log::warn!("Ping via {} failed: {e}", selected.name());
            Snapshot::new()
        })
    }

    /// Forward pushed updates to `handler`.
    ///
    /// Replaces any previously attached handler, so calling this again never
    /// duplicates deliveries. Returns false when the persistent transport
    /// offers no push channel.
    pub async fn listen_for_push<F, Fut>(&self, handler: F) -> bool
    where
        F: Fn(PartialUpdate) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(mut pushes) = self.persistent.subscribe() else {
            log::debug!("{} transport has no push channel", self.persistent.name());
            return false;
        };

        let mut slot = self.listener.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(async move {
            loop {
                match pushes.recv().await {
                    Ok(update) => handler(update).await,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Push listener lagged, {skipped} updates skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        true
    }

    /// Detach the push handler. Idempotent.
    pub async fn stop_listening(&self) {
        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
        }
    }

    pub async fn is_listening(&self) -> bool {
        self.listener.lock().await.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats.snapshot()
    }
}

impl<P, H> Drop for BroadcastCoordinator<P, H> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}
