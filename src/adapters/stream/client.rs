//! Broker WebSocket session client.
//!
//! One task owns the socket for its whole life: it connects, sends the
//! login frame, echoes pings, replays subscriptions after authentication,
//! and reconnects with capped exponential backoff plus a cooldown cycle
//! that never gives up. Other tasks talk to the session only through the
//! command channel; inbound traffic is classified and forwarded to the
//! coordinator as typed events.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::ports::events::{ConnectionPhase, StreamCommand, StreamEvent, StreamStatus};

use super::protocol::{self, Backoff, BackoffStep, InboundMessage, ReconnectPolicy};

/// Production WebSocket endpoint.
pub const WS_URL_PROD: &str = "wss://api.kiwoom.com:10000/api/dostk/websocket";
/// Paper-trading WebSocket endpoint.
pub const WS_URL_MOCK: &str = "wss://mockapi.kiwoom.com:10000/api/dostk/websocket";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("websocket transport error: {0}")]
    Transport(String),

    #[error("event channel closed")]
    ChannelClosed,
}

/// Stream session configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    /// Session token obtained from the REST login.
    pub token: String,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
    /// Spacing between replayed subscription requests after login.
    pub resubscribe_spacing: Duration,
    pub event_buffer: usize,
}

impl StreamConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(10),
            resubscribe_spacing: Duration::from_millis(50),
            event_buffer: 1000,
        }
    }
}

/// Handle held by the coordinator: command sender plus observable status.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub commands: mpsc::Sender<StreamCommand>,
    pub status: watch::Receiver<StreamStatus>,
}

/// How one connection ended.
enum SessionEnd {
    /// Transport dropped; the run loop will reconnect.
    Disconnected,
    /// Server rejected the login frame. Terminal.
    LoginRejected,
    /// Disconnect command or closed command channel. Terminal.
    Shutdown,
}

pub struct StreamClient {
    config: StreamConfig,
    events: mpsc::Sender<StreamEvent>,
    commands: mpsc::Receiver<StreamCommand>,
    status_tx: watch::Sender<StreamStatus>,
    status_rx: watch::Receiver<StreamStatus>,
    subscriptions: HashSet<String>,
    authenticated: bool,
    last_message: Arc<Mutex<Option<Instant>>>,
}

impl StreamClient {
    /// Build a client plus the coordinator-facing handle and event stream.
    pub fn new(config: StreamConfig) -> (Self, StreamHandle, mpsc::Receiver<StreamEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (command_tx, command_rx) = mpsc::channel(100);
        let (status_tx, status_rx) = watch::channel(StreamStatus::default());

        let handle = StreamHandle {
            commands: command_tx,
            status: status_rx.clone(),
        };

        let client = Self {
            config,
            events: event_tx,
            commands: command_rx,
            status_tx,
            status_rx,
            subscriptions: HashSet::new(),
            authenticated: false,
            last_message: Arc::new(Mutex::new(None)),
        };

        (client, handle, event_rx)
    }

    /// Run the session until shutdown or terminal login rejection.
    pub async fn run(mut self) {
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.status_rx.clone(),
            Arc::clone(&self.last_message),
            self.config.heartbeat_interval,
        ));

        let mut backoff = Backoff::new(self.config.reconnect.clone());

        loop {
            self.set_phase(ConnectionPhase::Connecting);
            info!(url = %self.config.url, "connecting to broker stream");

            let end = match self.connect_and_listen(&mut backoff).await {
                Ok(end) => end,
                Err(e) => {
                    warn!(%e, "stream session error");
                    SessionEnd::Disconnected
                }
            };
            self.authenticated = false;

            match end {
                SessionEnd::Shutdown => {
                    info!("stream shutdown requested");
                    break;
                }
                SessionEnd::LoginRejected => {
                    error!("stream login rejected; not reconnecting");
                    break;
                }
                SessionEnd::Disconnected => {
                    self.set_phase(ConnectionPhase::Disconnected);
                    let shutdown = match backoff.next_step() {
                        BackoffStep::Retry(wait) => {
                            warn!(
                                attempt = backoff.attempt(),
                                "reconnecting in {wait:?}"
                            );
                            self.status_tx
                                .send_modify(|s| s.reconnect_attempts = backoff.attempt());
                            self.wait_handling_commands(wait).await
                        }
                        BackoffStep::Cooldown(wait) => {
                            warn!("reconnect attempts exhausted, cooling down for {wait:?}");
                            self.status_tx.send_modify(|s| s.reconnect_attempts = 0);
                            self.wait_handling_commands(wait).await
                        }
                    };
                    if shutdown {
                        break;
                    }
                }
            }
        }

        self.set_phase(ConnectionPhase::Stopped);
        heartbeat.abort();
        info!("stream client stopped");
    }

    async fn connect_and_listen(&mut self, backoff: &mut Backoff) -> Result<SessionEnd, StreamError> {
        let (socket, _) = connect_async(&self.config.url)
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;

        info!("stream connected");
        self.set_phase(ConnectionPhase::Connected);
        backoff.reset();
        self.status_tx.send_modify(|s| s.reconnect_attempts = 0);
        self.touch();

        let (mut write, mut read) = socket.split();
        self.send_frame(&mut write, protocol::login_frame(&self.config.token))
            .await?;
        debug!("login frame sent, awaiting ack");

        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(end) = self.handle_text(&mut write, &text).await? {
                                return Ok(end);
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            if let Ok(text) = String::from_utf8(bytes) {
                                if let Some(end) = self.handle_text(&mut write, &text).await? {
                                    return Ok(end);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            warn!(?frame, "stream closed by server");
                            return Ok(SessionEnd::Disconnected);
                        }
                        Some(Err(e)) => {
                            warn!(%e, "stream read error");
                            return Ok(SessionEnd::Disconnected);
                        }
                        None => {
                            warn!("stream ended");
                            return Ok(SessionEnd::Disconnected);
                        }
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(SessionEnd::Shutdown);
                        }
                        Some(StreamCommand::Disconnect) => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(SessionEnd::Shutdown);
                        }
                        Some(command) => self.handle_command(&mut write, command).await?,
                    }
                }
            }
        }
    }

    /// Process one inbound text frame. `Some(end)` terminates the session.
    async fn handle_text(
        &mut self,
        write: &mut WsSink,
        text: &str,
    ) -> Result<Option<SessionEnd>, StreamError> {
        self.touch();

        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                let preview: String = text.chars().take(120).collect();
                warn!(%e, preview, "unparseable stream message");
                return Ok(None);
            }
        };

        match protocol::classify(value) {
            InboundMessage::Ping(payload) => {
                // keep-alive echo only; never surfaced as an event
                self.send_frame(write, payload).await?;
            }
            InboundMessage::LoginAck { success, message } => {
                if success {
                    info!("stream login acknowledged");
                    self.authenticated = true;
                    self.set_phase(ConnectionPhase::Authenticated);
                    self.replay_subscriptions(write).await?;
                } else {
                    error!(message, "stream login rejected");
                }
                let delivered = self
                    .forward(StreamEvent::LoginResult {
                        success,
                        message,
                    })
                    .await;
                if !delivered {
                    return Ok(Some(SessionEnd::Shutdown));
                }
                if !self.authenticated {
                    return Ok(Some(SessionEnd::LoginRejected));
                }
            }
            InboundMessage::ConditionList(channels) => {
                if !self.forward(StreamEvent::ConditionList { channels }).await {
                    return Ok(Some(SessionEnd::Shutdown));
                }
            }
            InboundMessage::ConditionSnapshot(symbols) => {
                for symbol in symbols {
                    if !self.forward(StreamEvent::ConditionHit { symbol }).await {
                        return Ok(Some(SessionEnd::Shutdown));
                    }
                }
            }
            InboundMessage::ConditionRealtime { symbol, added } => {
                if added {
                    if !self.forward(StreamEvent::ConditionHit { symbol }).await {
                        return Ok(Some(SessionEnd::Shutdown));
                    }
                } else {
                    // removal events are not actionable today
                    debug!(symbol, "condition removal dropped");
                }
            }
            InboundMessage::UnsubscribeAck => debug!("unsubscribe acknowledged"),
            InboundMessage::Execution(fields) => {
                if !self.forward(StreamEvent::Execution { fields }).await {
                    return Ok(Some(SessionEnd::Shutdown));
                }
            }
            InboundMessage::Unclassified(raw) => {
                let preview: String = raw.to_string().chars().take(200).collect();
                warn!(preview, "unclassified stream message, forwarding");
                if !self.forward(StreamEvent::Unclassified { raw }).await {
                    return Ok(Some(SessionEnd::Shutdown));
                }
            }
        }

        Ok(None)
    }

    async fn handle_command(
        &mut self,
        write: &mut WsSink,
        command: StreamCommand,
    ) -> Result<(), StreamError> {
        match command {
            StreamCommand::Subscribe { seq } => {
                self.subscriptions.insert(seq.clone());
                self.publish_subscription_count();
                if self.authenticated {
                    info!(seq, "subscribing to condition channel");
                    self.send_frame(write, protocol::subscribe_frame(&seq)).await?;
                } else {
                    // recorded for replay once the login ack arrives
                    debug!(seq, "subscription deferred until login");
                }
            }
            StreamCommand::Unsubscribe { seq } => {
                self.subscriptions.remove(&seq);
                self.publish_subscription_count();
                if self.authenticated {
                    info!(seq, "unsubscribing from condition channel");
                    self.send_frame(write, protocol::unsubscribe_frame(&seq))
                        .await?;
                }
            }
            StreamCommand::RequestConditionList => {
                self.send_frame(write, protocol::condition_list_frame())
                    .await?;
            }
            StreamCommand::Disconnect => unreachable!("handled by the session loop"),
        }
        Ok(())
    }

    /// Re-subscribe every recorded channel after authentication, with a
    /// short gap between requests to avoid overloading the server.
    async fn replay_subscriptions(&mut self, write: &mut WsSink) -> Result<(), StreamError> {
        let seqs: Vec<String> = self.subscriptions.iter().cloned().collect();
        for seq in seqs {
            info!(seq, "replaying condition subscription");
            self.send_frame(write, protocol::subscribe_frame(&seq)).await?;
            tokio::time::sleep(self.config.resubscribe_spacing).await;
        }
        Ok(())
    }

    /// Handle commands that arrive while disconnected (during backoff).
    /// Returns true when the session should shut down.
    fn apply_command_offline(&mut self, command: StreamCommand) -> bool {
        match command {
            StreamCommand::Subscribe { seq } => {
                self.subscriptions.insert(seq);
                self.publish_subscription_count();
                false
            }
            StreamCommand::Unsubscribe { seq } => {
                self.subscriptions.remove(&seq);
                self.publish_subscription_count();
                false
            }
            StreamCommand::RequestConditionList => {
                debug!("condition list request dropped while disconnected");
                false
            }
            StreamCommand::Disconnect => true,
        }
    }

    /// Sleep out a backoff window while still servicing commands.
    /// Returns true when shutdown was requested.
    async fn wait_handling_commands(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                command = self.commands.recv() => {
                    match command {
                        None => return true,
                        Some(command) => {
                            if self.apply_command_offline(command) {
                                return true;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn send_frame(&self, write: &mut WsSink, frame: Value) -> Result<(), StreamError> {
        write
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))
    }

    /// Forward an event to the coordinator; false when it is gone.
    async fn forward(&self, event: StreamEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.status_tx.send_modify(|s| s.phase = phase);
    }

    fn publish_subscription_count(&self) {
        let count = self.subscriptions.len();
        self.status_tx.send_modify(|s| s.subscriptions = count);
    }

    fn touch(&self) {
        *self.last_message.lock().unwrap() = Some(Instant::now());
    }
}

/// Liveness heartbeat, independent of the connection state: reports
/// connection/auth/subscription-count/last-message-age on a fixed period.
/// A long silence here is the observable symptom of upstream silent
/// failure.
async fn heartbeat_loop(
    status: watch::Receiver<StreamStatus>,
    last_message: Arc<Mutex<Option<Instant>>>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // immediate first tick

    loop {
        ticker.tick().await;
        let snapshot = status.borrow().clone();
        if snapshot.phase == ConnectionPhase::Stopped {
            break;
        }
        let age = last_message
            .lock()
            .unwrap()
            .map(|t| format!("{:.1}s ago", t.elapsed().as_secs_f64()))
            .unwrap_or_else(|| "never".to_string());

        info!(
            phase = ?snapshot.phase,
            subscriptions = snapshot.subscriptions,
            last_message = %age,
            "stream heartbeat"
        );
        if !snapshot.is_connected() {
            warn!("stream heartbeat: websocket is not connected");
        }
    }
}
