// SPDX-License-Identifier: Apache-2.0
//! Bounded-fanout WebSocket broadcaster: forwards brain commands and status
//! snapshots to every connected subscriber, dropping any that stop reading
//! rather than blocking the producer.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

struct BroadcasterState {
    host: String,
    port: RwLock<u16>,
    clients: RwLock<Vec<mpsc::Sender<String>>>,
    message_count: AtomicU64,
}

/// Starts (or is configured to start) a WebSocket server that fans brain
/// commands and system status snapshots out to subscribers. Binds its
/// configured port, then port+1, port+2, retrying each twice.
pub struct CommandBroadcaster {
    state: Arc<BroadcasterState>,
}

impl CommandBroadcaster {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            state: Arc::new(BroadcasterState {
                host: host.into(),
                port: RwLock::new(port),
                clients: RwLock::new(Vec::new()),
                message_count: AtomicU64::new(0),
            }),
        }
    }

    pub async fn client_count(&self) -> usize {
        self.state.clients.read().await.len()
    }

    pub async fn port(&self) -> u16 {
        *self.state.port.read().await
    }

    /// Attempts to bind on `configured_port`, then `configured_port + 1`,
    /// `configured_port + 2`, retrying each twice with a short backoff.
    /// Returns the bound address, or an error if every port was unavailable.
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        let base_port = *self.state.port.read().await;
        let app = Router::new().route("/", get(handle_upgrade)).with_state(self.state.clone());

        for port in [base_port, base_port + 1, base_port + 2] {
            for attempt in 0..2 {
                let addr: SocketAddr = format!("{}:{}", self.state.host, port).parse()?;
                match TcpListener::bind(addr).await {
                    Ok(listener) => {
                        let bound_addr = listener.local_addr()?;
                        *self.state.port.write().await = bound_addr.port();
                        tracing::info!(%bound_addr, "command broadcaster listening");
                        let app = app.clone();
                        tokio::spawn(async move {
                            if let Err(e) = axum::serve(listener, app).await {
                                tracing::error!(error = %e, "command broadcaster server exited");
                            }
                        });
                        return Ok(bound_addr);
                    }
                    Err(e) => {
                        tracing::warn!(port, attempt, error = %e, "command broadcaster failed to bind");
                        if attempt == 0 {
                            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                        }
                    }
                }
            }
        }

        anyhow::bail!("command broadcaster: no available port among {base_port}, {}, {}", base_port + 1, base_port + 2)
    }

    /// Sends one `brain_command` message with a strictly increasing `seq` to
    /// every connected client. Returns the number of clients it reached.
    pub async fn broadcast_command(&self, command: Value) -> usize {
        let seq = self.state.message_count.fetch_add(1, Ordering::SeqCst);
        let envelope = json!({
            "type": "brain_command",
            "command": command,
            "timestamp": Utc::now().to_rfc3339(),
            "seq": seq,
        });
        self.send_to_all(envelope).await
    }

    pub async fn broadcast_status(&self, status: Value) -> usize {
        let envelope = json!({
            "type": "system_status",
            "status": status,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.send_to_all(envelope).await
    }

    async fn send_to_all(&self, envelope: Value) -> usize {
        let text = envelope.to_string();
        let mut clients = self.state.clients.write().await;
        clients.retain(|tx| tx.try_send(text.clone()).is_ok());
        clients.len()
    }

    pub fn get_stats(&self) -> BroadcasterStats {
        BroadcasterStats { total_messages: self.state.message_count.load(Ordering::Relaxed) }
    }
}

pub struct BroadcasterStats {
    pub total_messages: u64,
}

async fn handle_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<BroadcasterState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<BroadcasterState>) {
    let welcome = json!({
        "type": "welcome",
        "message": "OpenRoboBrain Command Broadcaster",
        "timestamp": Utc::now().to_rfc3339(),
    });
    if socket.send(WsMessage::Text(welcome.to_string())).await.is_err() {
        return;
    }

    let (tx, mut rx) = mpsc::channel::<String>(SUBSCRIBER_CHANNEL_CAPACITY);
    state.clients.write().await.push(tx);

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if socket.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
        }
    }
}
