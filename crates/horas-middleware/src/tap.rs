//! Read-only WebSocket tap on the telemetry stream.
//!
//! [`TelemetryTap`] subscribes to registered topics through the bridge and
//! re-serves every decoded record as a JSON text frame:
//!
//! ```json
//! {"topic": "horas/gnss/state", "schema": "gnss", "record": {"latitude": 12.34, ...}}
//! ```
//!
//! Clients that disconnect or fall behind only lose frames; the bridge and
//! its other subscribers are unaffected.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use horas_types::{BridgeError, TelemetryRecord};
use serde_json::Value;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bridge::TelemetryBridge;
use crate::subscription::Subscription;

/// Default number of frames buffered for slow WebSocket clients.
pub const DEFAULT_TAP_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum TapError {
    #[error("cannot bind telemetry tap on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("websocket handshake with {peer} failed: {reason}")]
    Handshake { peer: SocketAddr, reason: String },

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Render one record as a tap frame.
pub fn tap_frame(topic: &str, record: &TelemetryRecord) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(map) = &mut value {
        map.insert("topic".to_string(), Value::String(topic.to_string()));
    }
    serde_json::to_string(&value)
}

/// Fans decoded records out to WebSocket clients.
#[derive(Clone)]
pub struct TelemetryTap {
    bridge: TelemetryBridge,
    frames: broadcast::Sender<String>,
}

impl TelemetryTap {
    pub fn new(bridge: TelemetryBridge, capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity.max(1));
        Self { bridge, frames }
    }

    /// Forward records arriving on `topic` to connected clients.
    pub fn attach(&self, topic: &str) -> Result<Subscription, BridgeError> {
        let frames = self.frames.clone();
        let owned_topic = topic.to_string();
        self.bridge
            .subscribe_records(topic, move |record: TelemetryRecord| {
                match tap_frame(&owned_topic, &record) {
                    // No clients connected is a normal condition.
                    Ok(json) => {
                        let _ = frames.send(json);
                    }
                    Err(e) => warn!(topic = %owned_topic, error = %e, "tap serialisation failed"),
                }
            })
    }

    /// [`attach`](Self::attach) every registered topic.
    pub fn attach_all(&self) -> Result<Vec<Subscription>, BridgeError> {
        let topics: Vec<String> = self
            .bridge
            .registry()
            .iter()
            .map(|(topic, _)| topic.to_string())
            .collect();
        topics.iter().map(|topic| self.attach(topic)).collect()
    }

    /// Raw frame stream, as sent to WebSocket clients.
    pub fn frames(&self) -> broadcast::Receiver<String> {
        self.frames.subscribe()
    }

    /// Bind `addr` and serve clients until the task is dropped.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), TapError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TapError::Bind { addr, source })?;
        self.serve(listener).await;
        Ok(())
    }

    /// Serve clients on an already bound listener.
    pub async fn serve(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "telemetry tap listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let tap = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = tap.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "tap client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "tap accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), TapError> {
        let ws_stream = accept_async(stream).await.map_err(|e| TapError::Handshake {
            peer,
            reason: e.to_string(),
        })?;
        debug!(peer = %peer, "tap client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut rx = self.frames.subscribe();

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(json) => {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "tap client lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                // The tap is read-only; inbound frames only matter for close.
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        _ => {}
                    }
                }
            }
        }

        debug!(peer = %peer, "tap client disconnected");
        Ok(())
    }
}
