//! WebSocket transport with room join, acknowledged requests and pushes.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, loss detection)
//! - Join handshake sent before the channel counts as connected
//! - Request/ack exchange for `ping` and `broadcast` with a bounded wait
//! - Unsolicited pushes fanned out through a `broadcast` channel
//!
//! Every connection attempt gets a new epoch. Background tasks only touch
//! the shared state while their epoch is still current, so a reader that
//! notices a stale socket closing cannot mark a newer connection as lost.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use super::{ConnectionState, Transport};
use crate::config::SyncConfig;
use crate::error::TransportError;
use crate::protocol::{snapshot_from_value, Frame, PartialUpdate, Snapshot};

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

/// Capacity of the push fan-out channel.
const PUSH_CAPACITY: usize = 256;

struct Connection {
    outgoing: mpsc::Sender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn abort(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// The persistent, room-scoped transport.
pub struct PersistentTransport {
    namespace: String,
    config: watch::Receiver<SyncConfig>,
    state: Arc<watch::Sender<ConnectionState>>,
    connection: Mutex<Option<Connection>>,
    pending: PendingAcks,
    next_ack: AtomicU64,
    epoch: Arc<AtomicU64>,
    pushes: broadcast::Sender<PartialUpdate>,
}

impl PersistentTransport {
    pub fn new(namespace: impl Into<String>, config: watch::Receiver<SyncConfig>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (pushes, _) = broadcast::channel(PUSH_CAPACITY);
        Self {
            namespace: namespace.into(),
            config,
            state: Arc::new(state),
            connection: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_ack: AtomicU64::new(1),
            epoch: Arc::new(AtomicU64::new(0)),
            pushes,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn fail_connect(&self, err: TransportError) -> TransportError {
        log::warn!("Failed to connect persistent channel: {err}, closing");
        self.state.send_replace(ConnectionState::Disconnected);
        err
    }

    /// Send a request frame and wait for the matching ack.
    async fn request<F>(&self, build: F) -> Result<serde_json::Value, TransportError>
    where
        F: FnOnce(u64) -> Frame,
    {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let outgoing = match self.connection.lock().await.as_ref() {
            Some(conn) => conn.outgoing.clone(),
            None => return Err(TransportError::NotConnected),
        };
        let wait = self.config.borrow().ack_timeout;

        let id = self.next_ack.fetch_add(1, Ordering::Relaxed);
        let text = build(id).encode()?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if outgoing.send(Message::Text(text.into())).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::ChannelClosed);
        }

        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(_)) => Err(TransportError::ChannelClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Timeout(wait))
            }
        }
    }
}

impl Transport for PersistentTransport {
    fn name(&self) -> &'static str {
        "persistent"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let mut slot = self.connection.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        if let Some(stale) = slot.take() {
            stale.abort();
        }

        let config = self.config.borrow().clone();
        let address = match config.address() {
            Ok(address) => address,
            Err(e) => {
                log::warn!("Not connecting persistent channel: {e}");
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };
        let join = Frame::ConnectionAck { room: self.namespace.clone() }.encode()?;
        let url = address.ws_url(&config.socket_path);

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(ConnectionState::Connecting);
        log::info!("Connecting persistent channel to {url}");

        let ws = match tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => return Err(self.fail_connect(TransportError::Connect(e.to_string()))),
            Err(_) => return Err(self.fail_connect(TransportError::Timeout(config.connect_timeout))),
        };
        let (mut sink, stream) = ws.split();

        if let Err(e) = sink.send(Message::Text(join.into())).await {
            let _ = sink.close().await;
            return Err(self.fail_connect(TransportError::Connect(e.to_string())));
        }

        // Connected must be visible before the reader can observe a close.
        self.state.send_replace(ConnectionState::Connected);

        let (outgoing, out_rx) = mpsc::channel(64);
        let writer = tokio::spawn(write_loop(sink, out_rx));
        let reader = tokio::spawn(read_loop(
            stream,
            ReaderContext {
                epoch,
                current_epoch: self.epoch.clone(),
                state: self.state.clone(),
                pending: self.pending.clone(),
                pushes: self.pushes.clone(),
            },
        ));
        *slot = Some(Connection { outgoing, reader, writer });

        log::info!("Persistent channel joined room {}", self.namespace);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut slot = self.connection.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(conn) = slot.take() {
            // The writer drains the close frame, then exits as the sender drops.
            let _ = conn.outgoing.try_send(Message::Close(None));
            conn.reader.abort();
            log::info!("Persistent channel disconnected");
        }
        self.state.send_replace(ConnectionState::Disconnected);
        self.pending.lock().await.clear();
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    async fn ping(&self) -> Result<Snapshot, TransportError> {
        let data = self.request(|ack| Frame::Ping { ack }).await?;
        Ok(snapshot_from_value(data)?)
    }

    async fn broadcast(&self, update: &PartialUpdate) -> Result<(), TransportError> {
        self.request(|ack| Frame::Broadcast { ack: Some(ack), data: update.clone() })
            .await
            .map(|_| ())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<PartialUpdate>> {
        Some(self.pushes.subscribe())
    }
}

impl Drop for PersistentTransport {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut().take() {
            conn.abort();
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Background tasks
// ───────────────────────────────────────────────────────────────────

async fn write_loop<S>(mut sink: S, mut outgoing: mpsc::Receiver<Message>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(msg) = outgoing.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            log::debug!("Persistent writer stopped: {e}");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

struct ReaderContext {
    epoch: u64,
    current_epoch: Arc<AtomicU64>,
    state: Arc<watch::Sender<ConnectionState>>,
    pending: PendingAcks,
    pushes: broadcast::Sender<PartialUpdate>,
}

impl ReaderContext {
    async fn dispatch(&self, text: &str) {
        match Frame::decode(text) {
            Ok(Frame::Ack { ack, data }) => match self.pending.lock().await.remove(&ack) {
                Some(waiter) => {
                    let _ = waiter.send(data);
                }
                None => log::debug!("Dropping late ack {ack}"),
            },
            Ok(Frame::Broadcast { data, .. }) => {
                if self.pushes.send(data).is_err() {
                    log::trace!("Push dropped, no listeners");
                }
            }
            Ok(other) => log::debug!("Ignoring unexpected frame {other:?}"),
            Err(e) => log::warn!("Dropping malformed frame: {e}"),
        }
    }
}

async fn read_loop<St>(mut stream: St, ctx: ReaderContext)
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => ctx.dispatch(text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                log::warn!("Persistent channel error: {e}");
                break;
            }
            Ok(_) => {}
        }
    }

    if ctx.current_epoch.load(Ordering::SeqCst) == ctx.epoch {
        ctx.state.send_replace(ConnectionState::Disconnected);
        ctx.pending.lock().await.clear();
        log::info!("Persistent channel closed by peer");
    }
}
