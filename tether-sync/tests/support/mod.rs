//! In-process stand-ins for the group server.
//!
//! `SocketStub` speaks the persistent-channel envelope over a raw
//! WebSocket; `HttpStub` serves the polling endpoints through axum.
//! A relaying `SocketStub` behaves like the real server: it merges every
//! broadcast into the snapshot it answers pings with and pushes it to all
//! connected clients.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Poll `check` every 10ms for up to two seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ─── Persistent channel stub ─────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Command {
    Push(Value),
    Close,
}

/// State shared by every connection of one `SocketStub`.
#[derive(Clone)]
struct Shared {
    snapshot: Arc<Mutex<Value>>,
    answer_acks: bool,
    relay: bool,
    first_frames: Arc<Mutex<Vec<Value>>>,
    broadcasts: Arc<Mutex<Vec<Value>>>,
    commands: broadcast::Sender<Command>,
}

pub struct SocketStub {
    pub port: u16,
    /// What pings are answered with.
    pub snapshot: Arc<Mutex<Value>>,
    /// First frame received on each connection.
    pub first_frames: Arc<Mutex<Vec<Value>>>,
    /// `data` of every broadcast frame.
    pub broadcasts: Arc<Mutex<Vec<Value>>>,
    commands: broadcast::Sender<Command>,
}

impl SocketStub {
    /// Start a stub answering pings with `snapshot`. With `answer_acks`
    /// false it swallows requests, for timeout tests.
    pub async fn start(snapshot: Value, answer_acks: bool) -> Self {
        Self::launch(snapshot, answer_acks, false).await
    }

    /// Start a stub that keeps group state and relays broadcasts.
    pub async fn relaying(snapshot: Value) -> Self {
        Self::launch(snapshot, true, true).await
    }

    async fn launch(snapshot: Value, answer_acks: bool, relay: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (commands, _) = broadcast::channel(64);
        let shared = Shared {
            snapshot: Arc::new(Mutex::new(snapshot)),
            answer_acks,
            relay,
            first_frames: Arc::new(Mutex::new(Vec::new())),
            broadcasts: Arc::new(Mutex::new(Vec::new())),
            commands: commands.clone(),
        };

        let accepted = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let shared = accepted.clone();
                let commands = shared.commands.subscribe();
                tokio::spawn(serve_socket(ws, shared, commands));
            }
        });

        Self {
            port,
            snapshot: shared.snapshot,
            first_frames: shared.first_frames,
            broadcasts: shared.broadcasts,
            commands,
        }
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn push(&self, data: Value) {
        let _ = self.commands.send(Command::Push(data));
    }

    pub fn close_all(&self) {
        let _ = self.commands.send(Command::Close);
    }

    pub async fn joins(&self) -> usize {
        self.first_frames.lock().await.len()
    }

    /// Wait until `count` connections have sent their first frame.
    pub async fn wait_for_joins(&self, count: usize) -> bool {
        eventually(|| async { self.joins().await >= count }).await
    }
}

/// Fold one broadcast into the per-member snapshot.
fn merge_member(snapshot: &mut Value, data: &Value) {
    let Some(name) = data["name"].as_str() else { return };
    if !snapshot.is_object() {
        *snapshot = json!({});
    }
    let entry = &mut snapshot[name];
    if !entry.is_object() {
        *entry = json!({});
    }
    for (key, value) in data.as_object().into_iter().flatten() {
        if key != "name" {
            entry[key.as_str()] = value.clone();
        }
    }
}

async fn serve_socket(
    ws: WebSocketStream<TcpStream>,
    shared: Shared,
    mut commands: broadcast::Receiver<Command>,
) {
    let (mut tx, mut rx) = ws.split();
    let mut first = true;
    loop {
        tokio::select! {
            msg = rx.next() => {
                let Some(Ok(Message::Text(text))) = msg else { break };
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                if first {
                    shared.first_frames.lock().await.push(frame.clone());
                    first = false;
                }
                let ack = frame.get("ack").cloned();
                let reply = match frame["event"].as_str() {
                    Some("ping") => {
                        let snapshot = shared.snapshot.lock().await.clone();
                        Some(json!({"event": "ack", "ack": ack, "data": snapshot}))
                    }
                    Some("broadcast") => {
                        let data = frame["data"].clone();
                        shared.broadcasts.lock().await.push(data.clone());
                        if shared.relay {
                            merge_member(&mut *shared.snapshot.lock().await, &data);
                            let _ = shared.commands.send(Command::Push(data));
                        }
                        Some(json!({"event": "ack", "ack": ack}))
                    }
                    _ => None,
                };
                if let (true, Some(reply)) = (shared.answer_acks, reply) {
                    if tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
            cmd = commands.recv() => match cmd {
                Ok(Command::Push(data)) => {
                    let frame = json!({"event": "broadcast", "data": data});
                    if tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Ok(Command::Close) | Err(_) => {
                    let _ = tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }
}

// ─── Polling stub ────────────────────────────────────────────────

#[derive(Default)]
pub struct Recorder {
    pub pings: AtomicUsize,
    pub namespaces: Mutex<Vec<String>>,
    /// (content-type, body) of every broadcast POST.
    pub posts: Mutex<Vec<(String, Value)>>,
    pub snapshot: Mutex<Value>,
}

impl Recorder {
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub async fn post_bodies(&self) -> Vec<Value> {
        self.posts.lock().await.iter().map(|(_, body)| body.clone()).collect()
    }
}

pub struct HttpStub {
    pub port: u16,
    pub recorder: Arc<Recorder>,
}

impl HttpStub {
    pub async fn start(snapshot: Value) -> Self {
        let recorder = Arc::new(Recorder {
            snapshot: Mutex::new(snapshot),
            ..Recorder::default()
        });
        let app = Router::new()
            .route("/ping/{namespace}", get(ping))
            .route("/broadcast/{namespace}", post(broadcast_update))
            .route("/ping/broken", get(broken))
            .route("/ping/slow", get(slow))
            .with_state(recorder.clone());
        let port = serve(app).await;
        Self { port, recorder }
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

async fn serve(app: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

async fn ping(Path(namespace): Path<String>, State(recorder): State<Arc<Recorder>>) -> Json<Value> {
    recorder.pings.fetch_add(1, Ordering::SeqCst);
    recorder.namespaces.lock().await.push(namespace);
    Json(recorder.snapshot.lock().await.clone())
}

async fn broadcast_update(
    Path(namespace): Path<String>,
    State(recorder): State<Arc<Recorder>>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let Ok(body) = serde_json::from_str::<Value>(&body) else {
        return StatusCode::BAD_REQUEST;
    };
    recorder.namespaces.lock().await.push(namespace);
    recorder.posts.lock().await.push((content_type, body));
    StatusCode::OK
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(3)).await;
    Json(json!({}))
}
