//! Transport capability and its two implementations.
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │  BroadcastCoordinator│
//!                 └─────┬──────────┬─────┘
//!          connected?   │          │   otherwise
//!                       ▼          ▼
//!        ┌─────────────────────┐  ┌──────────────────┐
//!        │ PersistentTransport │  │ PollingTransport │
//!        │ WebSocket, push     │  │ HTTP, pull only  │
//!        └─────────────────────┘  └──────────────────┘
//!                  └──── ServerAddress (shared) ───┘
//! ```

use std::future::Future;

use tokio::sync::broadcast;

use crate::error::TransportError;
use crate::protocol::{PartialUpdate, Snapshot};

pub mod persistent;
pub mod polling;

pub use persistent::PersistentTransport;
pub use polling::PollingTransport;

/// Lifecycle of the persistent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A way of reaching the group.
pub trait Transport: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Establish the channel. Idempotent.
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Tear the channel down. Idempotent, safe when never connected.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;

    /// Request the full server-side view of the group.
    fn ping(&self) -> impl Future<Output = Result<Snapshot, TransportError>> + Send;

    /// Send a sparse update.
    fn broadcast(
        &self,
        update: &PartialUpdate,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receiver for unsolicited pushes, if the transport supports them.
    fn subscribe(&self) -> Option<broadcast::Receiver<PartialUpdate>> {
        None
    }
}
