//! # Push Update Channel
//!
//! Best-effort notifications that the project changed. Every notification
//! means "re-fetch"; missed ones are reconciled by the next pull.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Push Channel Status (watch)                        │
//! │                                                                         │
//! │   spawn()    ┌──────────────────────┐   handshake ok   ┌──────┐         │
//! │  ──────────► │ Connecting{attempt}  │ ───────────────► │ Live │         │
//! │              └──────────────────────┘                  └──┬───┘         │
//! │                 ▲            │ failed          closed/error │           │
//! │                 │            ▼                              │           │
//! │        timer    │   ┌──────────────────────┐                │           │
//! │        expired  └── │ Waiting{retry_in}    │ ◄──────────────┘           │
//! │                     └──────────────────────┘                            │
//! │                                                                         │
//! │   shutdown() from any state ──► Stopped                                 │
//! │                                                                         │
//! │  Incoming text ──► PushEvent ──► broadcast ──► engine session(s)        │
//! │  Backoff: 500ms, 1s, 2s, ... capped at 60s                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The status is published on a `watch` channel so embedders can show
//! whether live updates are flowing; see [`PushHandle::status_changes`].
//!
//! Embedders that already own a channel use [`PushHandle::new`] and call
//! [`PushHandle::publish`] themselves.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};

/// Capacity of the push event channel. Lagging receivers just refresh.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Events
// =============================================================================

/// A notification from the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// Some snippets changed.
    SnippetsUpdated { ids: Vec<String> },
    /// A message the SDK does not understand; still treated as a change.
    Unrecognized,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum WireMessage {
    SnippetsUpdated {
        #[serde(default)]
        ids: Vec<String>,
    },
}

impl PushEvent {
    /// Parses a text frame. Never fails: unknown payloads become `Unrecognized`.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<WireMessage>(text) {
            Ok(WireMessage::SnippetsUpdated { ids }) => PushEvent::SnippetsUpdated { ids },
            Err(e) => {
                debug!(error = %e, "Unrecognized push message");
                PushEvent::Unrecognized
            }
        }
    }
}

// =============================================================================
// Push Status
// =============================================================================

/// Where the push transport is in its reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// No transport running: a manual handle, or the channel was shut down.
    Stopped,
    /// Opening the WebSocket. `attempt` counts failures since the last live connection.
    Connecting { attempt: u32 },
    /// Connected; notifications are flowing.
    Live,
    /// Sleeping before the next attempt. Changes made meanwhile arrive with the
    /// refresh that follows the reconnect.
    Waiting { retry_in: Duration },
}

impl PushStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, PushStatus::Live)
    }
}

impl std::fmt::Display for PushStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushStatus::Stopped => write!(f, "stopped"),
            PushStatus::Connecting { attempt: 0 } => write!(f, "connecting"),
            PushStatus::Connecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            PushStatus::Live => write!(f, "live"),
            PushStatus::Waiting { retry_in } => write!(f, "retrying in {:?}", retry_in),
        }
    }
}

// =============================================================================
// Push Configuration
// =============================================================================

/// Configuration for the WebSocket push channel.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// WebSocket URL to connect to.
    pub url: String,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Initial backoff duration.
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    pub max_backoff: Duration,

    /// Ping interval for keepalive.
    pub ping_interval: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        PushConfig {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Push Handle
// =============================================================================

/// Handle shared by the engine and the embedder.
#[derive(Clone)]
pub struct PushHandle {
    events_tx: broadcast::Sender<PushEvent>,
    status_rx: watch::Receiver<PushStatus>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl Default for PushHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PushHandle {
    /// A handle with no transport behind it; events come from [`publish`](Self::publish).
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        // Nothing drives a manual handle, so its status stays `Stopped`.
        let (_, status_rx) = watch::channel(PushStatus::Stopped);
        PushHandle {
            events_tx,
            status_rx,
            shutdown_tx: None,
        }
    }

    /// Injects an event as if it arrived on the channel.
    pub fn publish(&self, event: PushEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.events_tx.subscribe()
    }

    /// Status of the transport right now.
    pub fn status(&self) -> PushStatus {
        *self.status_rx.borrow()
    }

    /// Follows status transitions. Intermediate states may be coalesced.
    pub fn status_changes(&self) -> watch::Receiver<PushStatus> {
        self.status_rx.clone()
    }

    /// Stops the transport, if there is one.
    pub async fn shutdown(&self) -> SyncResult<()> {
        match &self.shutdown_tx {
            Some(tx) => tx
                .send(())
                .await
                .map_err(|_| SyncError::ChannelError("Failed to send shutdown signal".into())),
            None => Ok(()),
        }
    }
}

// =============================================================================
// WebSocket Push Channel
// =============================================================================

/// WebSocket client with automatic reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let handle = PushChannel::spawn(PushConfig {
///     url: "wss://push.example.com/snippets".into(),
///     ..Default::default()
/// });
///
/// let mut events = handle.subscribe();
/// while let Ok(event) = events.recv().await {
///     println!("changed: {:?}", event);
/// }
/// ```
pub struct PushChannel {
    config: PushConfig,
    status_tx: watch::Sender<PushStatus>,
    events_tx: broadcast::Sender<PushEvent>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl PushChannel {
    /// Creates the channel and spawns its background task.
    pub fn spawn(config: PushConfig) -> PushHandle {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (status_tx, status_rx) = watch::channel(PushStatus::Connecting { attempt: 0 });

        let channel = PushChannel {
            config,
            status_tx,
            events_tx: events_tx.clone(),
            shutdown_rx,
        };

        tokio::spawn(channel.run());

        PushHandle {
            events_tx,
            status_rx,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Main reconnect loop.
    async fn run(mut self) {
        info!(url = %self.config.url, "Push channel starting");

        let mut backoff = self.create_backoff();
        let mut attempt = 0u32;
        let mut connected_before = false;

        loop {
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Push channel received shutdown signal");
                break;
            }

            self.set_status(PushStatus::Connecting { attempt });

            match self.connect_with_timeout().await {
                Ok(ws_stream) => {
                    info!("Push channel connected");
                    self.set_status(PushStatus::Live);

                    backoff.reset();
                    attempt = 0;

                    // Notifications sent while we were away are lost
                    if connected_before {
                        let _ = self.events_tx.send(PushEvent::Unrecognized);
                    }
                    connected_before = true;

                    match self.connection_loop(ws_stream).await {
                        Ok(true) => break,
                        Ok(false) => debug!("Push connection closed by server"),
                        Err(e) => warn!(error = %e, "Push connection ended"),
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect push channel");
                }
            }

            attempt += 1;

            if let Some(duration) = backoff.next_backoff() {
                debug!(?duration, attempt, "Waiting before reconnect");
                self.set_status(PushStatus::Waiting { retry_in: duration });

                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = self.shutdown_rx.recv() => {
                        info!("Shutdown during backoff");
                        break;
                    }
                }
            } else {
                error!("Backoff exhausted");
                break;
            }
        }

        self.set_status(PushStatus::Stopped);
        info!("Push channel stopped");
    }

    fn set_status(&self, status: PushStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            debug!(%previous, %status, "Push status changed");
        }
    }

    /// Connects with timeout.
    async fn connect_with_timeout(&self) -> SyncResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        match timeout(self.config.connect_timeout, connect_async(&self.config.url)).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(format!(
                "push connect after {:?}",
                self.config.connect_timeout
            ))),
        }
    }

    /// Reads until the connection ends. Returns `Ok(true)` on shutdown.
    async fn connection_loop(
        &mut self,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> SyncResult<bool> {
        let (mut write, mut read) = ws_stream.split();

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            let event = PushEvent::parse(text.as_str());
                            debug!(?event, "Push event received");
                            let _ = self.events_tx.send(event);
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            write.send(WsMessage::Pong(data)).await?;
                        }
                        Some(Ok(WsMessage::Pong(_))) => {
                            debug!("Received pong");
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(?frame, "Received close frame");
                            return Ok(false);
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            warn!("Received unexpected binary message");
                        }
                        Some(Ok(WsMessage::Frame(_))) => {}
                        Some(Err(e)) => return Err(SyncError::from(e)),
                        None => return Ok(false),
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(WsMessage::Ping(Vec::new().into())).await?;
                    debug!("Sent ping");
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing push connection");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(true);
                }
            }
        }
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}
