//! # tether-sync — Group presence synchronization
//!
//! Keeps a small, fixed group of peers informed of each other's position,
//! health, activity and notes, tolerating an unreliable network.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   WebSocket (push + ack)   ┌─────────────┐
//! │ Persistent  │ ◄────────────────────────► │             │
//! │ Transport   │                            │   Server    │
//! ├─────────────┤   HTTP GET/POST (pull)     │  (external) │
//! │ Polling     │ ─────────────────────────► │             │
//! │ Transport   │                            └─────────────┘
//! └──────┬──────┘
//!        │ selected per call
//! ┌──────┴──────────────┐      ┌──────────────┐
//! │ BroadcastCoordinator│ ───► │ GroupState   │ reconcile / local_update
//! └──────┬──────────────┘      └──────┬───────┘
//!        │                            ▼
//! ┌──────┴──────┐              ┌──────────────┐
//! │TaskScheduler│ ───────────► │ PresenceMap  │ bounded-step interpolation
//! └─────────────┘              └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire types and the persistent-channel envelope
//! - [`config`] — session configuration and server address handling
//! - [`transport`] — the `Transport` trait, WebSocket and HTTP transports
//! - [`broadcast`] — transport selection with transparent fallback
//! - [`scheduler`] — periodic tasks with dynamic delays and bulk reset
//! - [`group`] — canonical member table and merge rules
//! - [`presence`] — on-map interpolation and footsteps
//! - [`selection`] — staleness check for async lookups
//! - [`session`] — wires everything into one running session

pub mod broadcast;
pub mod config;
pub mod error;
pub mod group;
pub mod presence;
pub mod protocol;
pub mod scheduler;
pub mod selection;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use broadcast::{BroadcastCoordinator, CoordinatorStats, SelectedTransport};
pub use config::{ServerAddress, SyncConfig, TaskIntervals};
pub use error::{ConfigError, StateError, SyncError, TransportError};
pub use group::{
    ActivitySummary, GroupState, LocalStatus, Member, MemberColor, StatusSource, GROUP_PALETTE,
};
pub use presence::{DisplayPoint, Footsteps, Movement, PositionInterpolator, PresenceMap};
pub use protocol::{Frame, Location, PartialUpdate, Snapshot, IN_SESSION_ACTIVITY, OFFLINE_WORLD};
pub use scheduler::{ScheduledTask, TaskHandle, TaskScheduler, TaskState};
pub use selection::{Selection, SelectionTicket};
pub use session::Session;
pub use transport::{ConnectionState, PersistentTransport, PollingTransport, Transport};
