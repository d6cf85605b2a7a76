//! One running group session.
//!
//! The session owns everything a group connection needs and hands clones
//! of its shared pieces to the scheduled tasks; there is no global state.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────── TaskScheduler ────────────────┐
//!              │ status-broadcast  pull-fallback  reconnect    │
//!              │ position-tick                                 │
//!              └──────┬───────────────┬──────────────┬─────────┘
//!   StatusSource ──►  │ local_update  │ ping         │ connect
//!                     ▼               ▼              ▼
//!               ┌───────────┐  ┌──────────────────────────┐
//!               │GroupState │◄─│  BroadcastCoordinator    │◄── pushes
//!               └─────┬─────┘  └──────────────────────────┘
//!                     │ exposed locations
//!                     ▼
//!               ┌───────────┐
//!               │PresenceMap│
//!               └───────────┘
//! ```
//!
//! ## Task cadence
//!
//! | Task | Base | Adjustments | First run |
//! |------|------|-------------|-----------|
//! | status-broadcast | 5s | ½ when connected; location withheld in ghost mode | immediately |
//! | pull-fallback | 10s | ¼ with map open, ½ when connected; only acts while disconnected | ¼ period |
//! | reconnect | 10s | only acts while disconnected | one period |
//! | position-tick | 300ms | fixed | immediately |
//!
//! Every successful connect is followed by one snapshot pull, so members
//! that spoke before this client joined are known without waiting for
//! their next change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};

use crate::broadcast::BroadcastCoordinator;
use crate::config::SyncConfig;
use crate::group::{GroupState, Member, StatusSource};
use crate::presence::PresenceMap;
use crate::protocol::PartialUpdate;
use crate::scheduler::{ScheduledTask, TaskHandle, TaskScheduler};
use crate::selection::{Selection, SelectionTicket};
use crate::transport::{PersistentTransport, PollingTransport};

type Coordinator = BroadcastCoordinator<PersistentTransport, PollingTransport>;

/// Explicit session object replacing process-wide singletons.
pub struct Session {
    config: watch::Sender<SyncConfig>,
    group: Arc<RwLock<GroupState>>,
    presence: Arc<RwLock<PresenceMap>>,
    coordinator: Arc<Coordinator>,
    scheduler: TaskScheduler,
    status: Arc<dyn StatusSource>,
    map_open: Arc<AtomicBool>,
    /// Cleared by `stop`; a connect that completes afterwards is undone.
    active: Arc<AtomicBool>,
    selection: RwLock<Selection>,
    tasks: Mutex<Vec<TaskHandle>>,
}

impl Session {
    pub fn new(config: SyncConfig, mut group: GroupState, status: Arc<dyn StatusSource>) -> Self {
        group.set_show_self(config.show_self);
        let presence = PresenceMap::new(config.footstep_count);
        let namespace = group.name().to_string();
        let (config, config_rx) = watch::channel(config);
        let coordinator = BroadcastCoordinator::new(
            PersistentTransport::new(namespace.clone(), config_rx.clone()),
            PollingTransport::new(namespace, config_rx),
        );

        Self {
            config,
            group: Arc::new(RwLock::new(group)),
            presence: Arc::new(RwLock::new(presence)),
            coordinator: Arc::new(coordinator),
            scheduler: TaskScheduler::new(),
            status,
            map_open: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(false)),
            selection: RwLock::new(Selection::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Connect, start listening for pushes and schedule the periodic tasks.
    ///
    /// Calling `start` again restarts the task timeline.
    pub async fn start(&self) {
        self.scheduler.reset_tasks();
        let group_name = self.group.read().await.name().to_string();
        log::info!("Starting session for group {group_name}");
        self.active.store(true, Ordering::SeqCst);

        let group = self.group.clone();
        self.coordinator
            .listen_for_push(move |update| {
                let group = group.clone();
                async move { apply_remote(&group, &update).await }
            })
            .await;

        connect_and_sync(&self.coordinator, &self.group, &self.active).await;

        let intervals = self.config.borrow().intervals;
        let handles = vec![
            self.scheduler.schedule(self.status_broadcast_task(intervals.status_broadcast), Duration::ZERO),
            self.scheduler.schedule(self.pull_fallback_task(intervals.pull_fallback), intervals.pull_fallback / 4),
            self.scheduler.schedule(self.reconnect_task(intervals.reconnect), intervals.reconnect),
            self.scheduler.schedule(self.position_tick_task(intervals.position_tick), Duration::ZERO),
        ];
        *self.tasks.lock().await = handles;
    }

    /// Cancel all tasks and drop the connection.
    pub async fn stop(&self) {
        log::info!("Stopping session");
        self.active.store(false, Ordering::SeqCst);
        self.scheduler.reset_tasks();
        self.coordinator.stop_listening().await;
        self.coordinator.disconnect().await;
    }

    fn status_broadcast_task(&self, period: Duration) -> ScheduledTask {
        let group = self.group.clone();
        let coordinator = self.coordinator.clone();
        let status = self.status.clone();
        let config = self.config.subscribe();
        let connection = self.coordinator.clone();

        ScheduledTask::new("status-broadcast", period, move || {
            let group = group.clone();
            let coordinator = coordinator.clone();
            let status = status.clone();
            let ghost_mode = config.borrow().ghost_mode;
            async move {
                let update = {
                    let mut group = group.write().await;
                    let Some(mut update) = group.local_update(status.as_ref(), ghost_mode) else {
                        return;
                    };
                    let presence = group.local_presence(ghost_mode);
                    update.world = presence.world;
                    update.ghost_mode = presence.ghost_mode;
                    update.location = presence.location;
                    update
                };
                coordinator.broadcast(&update).await;
            }
        })
        .with_delay(move |period| if connection.is_connected() { period / 2 } else { period })
    }

    fn pull_fallback_task(&self, period: Duration) -> ScheduledTask {
        let group = self.group.clone();
        let coordinator = self.coordinator.clone();
        let connection = self.coordinator.clone();
        let map_open = self.map_open.clone();

        ScheduledTask::new("pull-fallback", period, move || {
            let group = group.clone();
            let coordinator = coordinator.clone();
            async move {
                if coordinator.is_connected() {
                    return;
                }
                let snapshot = coordinator.ping().await;
                if !snapshot.is_empty() {
                    let applied = group.write().await.reconcile_snapshot(&snapshot);
                    log::debug!("Pulled {applied} member updates");
                }
            }
        })
        .with_delay(move |period| {
            let mut delay = period;
            if map_open.load(Ordering::Relaxed) {
                delay /= 4;
            }
            if connection.is_connected() {
                delay /= 2;
            }
            delay
        })
    }

    fn reconnect_task(&self, period: Duration) -> ScheduledTask {
        let coordinator = self.coordinator.clone();
        let group = self.group.clone();
        let active = self.active.clone();
        ScheduledTask::new("reconnect", period, move || {
            let coordinator = coordinator.clone();
            let group = group.clone();
            let active = active.clone();
            async move {
                if !coordinator.is_connected() {
                    connect_and_sync(&coordinator, &group, &active).await;
                }
            }
        })
    }

    fn position_tick_task(&self, period: Duration) -> ScheduledTask {
        let group = self.group.clone();
        let presence = self.presence.clone();
        ScheduledTask::new("position-tick", period, move || {
            let group = group.clone();
            let presence = presence.clone();
            async move {
                let group = group.read().await;
                presence.write().await.tick(&group);
            }
        })
    }

    // ─── Host-facing controls ────────────────────────────────────────

    /// Whether a live map view is open; speeds up the pull fallback.
    pub fn set_map_open(&self, open: bool) {
        self.map_open.store(open, Ordering::Relaxed);
    }

    pub fn config(&self) -> SyncConfig {
        self.config.borrow().clone()
    }

    /// Publish a new configuration.
    ///
    /// A changed server address drops the persistent channel so the
    /// reconnect task re-establishes it against the new address.
    pub async fn update_config(&self, config: SyncConfig) {
        let previous = self.config.send_replace(config.clone());

        if previous.server_address != config.server_address && self.coordinator.is_connected() {
            log::info!("Server address changed, reconnecting");
            self.coordinator.disconnect().await;
        }
        if previous.footstep_count != config.footstep_count {
            self.presence.write().await.set_footstep_count(config.footstep_count);
        }
        self.group.write().await.set_show_self(config.show_self);
    }

    pub fn is_connected(&self) -> bool {
        self.coordinator.is_connected()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn group(&self) -> Arc<RwLock<GroupState>> {
        self.group.clone()
    }

    pub fn presence(&self) -> Arc<RwLock<PresenceMap>> {
        self.presence.clone()
    }

    /// Copy of every member record.
    pub async fn members(&self) -> Vec<Member> {
        self.group.read().await.members().cloned().collect()
    }

    pub async fn task_handles(&self) -> Vec<TaskHandle> {
        self.tasks.lock().await.clone()
    }

    // ─── Selection ───────────────────────────────────────────────────

    pub async fn select_member(&self, name: impl Into<String>) -> SelectionTicket {
        self.selection.write().await.select(name)
    }

    pub async fn clear_selection(&self) {
        self.selection.write().await.clear();
    }

    /// Pull fresh data and return the selected member, unless the
    /// selection changed while the pull was in flight.
    pub async fn refresh_selected(&self) -> Option<Member> {
        let ticket = self.selection.read().await.ticket();
        let name = ticket.name()?.to_string();

        let snapshot = self.coordinator.ping().await;
        self.group.write().await.reconcile_snapshot(&snapshot);

        if !self.selection.read().await.is_current(&ticket) {
            log::debug!("Selection changed during lookup of {name}, discarding");
            return None;
        }
        self.group.read().await.member(&name).cloned()
    }
}

/// Connect the persistent channel and pull one snapshot over it.
///
/// Pushes only carry what changed, so without the pull a peer whose world
/// was announced before this connection would stay offline here.
async fn connect_and_sync(coordinator: &Coordinator, group: &RwLock<GroupState>, active: &AtomicBool) {
    coordinator.connect().await;
    if !active.load(Ordering::SeqCst) {
        // Stopped while the handshake was in flight.
        coordinator.disconnect().await;
        return;
    }
    if !coordinator.is_connected() {
        return;
    }
    let snapshot = coordinator.ping().await;
    if !snapshot.is_empty() {
        let applied = group.write().await.reconcile_snapshot(&snapshot);
        log::debug!("Synced {applied} members after connecting");
    }
}

async fn apply_remote(group: &RwLock<GroupState>, update: &PartialUpdate) {
    if let Err(e) = group.write().await.reconcile(update) {
        log::warn!("Dropping pushed update: {e}");
    }
}
