//! Push-channel client.
//!
//! A supervised background task holds a long-lived inbound connection,
//! decodes server-pushed events and forwards them to the
//! [`SubscriptionRegistry`]. On disconnect it reconnects with exponential
//! backoff until `max_attempts` consecutive failures, then stops for good.
//!
//! ```text
//!  ┌────────────┐  connect()   ┌────────────┐  ok   ┌───────────┐
//!  │Disconnected│ ───────────► │ Connecting │ ────► │ Connected │
//!  └────────────┘              └─────┬──────┘       └─────┬─────┘
//!        ▲                    failure│       error/close  │
//!        │                           ▼                    │
//!        │   delay = base * 2^(attempt-1)                 │
//!        └──────────────── backoff ◄──────────────────────┘
//!                             │
//!                attempt >= max_attempts: stop
//! ```
//!
//! `attempt` resets to 0 on every successful connect. Malformed frames are
//! logged and dropped; they never close the connection or count as a failure.

use crate::error::{Error, Result};
use crate::subscription::SubscriptionRegistry;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

pub mod message;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use message::PushMessage;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

// =============================================================================
// Connection state
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionPhase::Disconnected => write!(f, "disconnected"),
            ConnectionPhase::Connecting => write!(f, "connecting"),
            ConnectionPhase::Connected => write!(f, "connected"),
        }
    }
}

/// Reconnect bookkeeping: consecutive failures so far and the limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionState {
    pub attempt: u32,
    pub max_attempts: u32,
}

impl ConnectionState {
    pub fn new(max_attempts: u32) -> Self {
        ConnectionState {
            attempt: 0,
            max_attempts,
        }
    }

    /// Called on a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Record a failure and return the delay before the next connect, or
    /// `None` once `max_attempts` is reached.
    ///
    /// The n-th consecutive failure waits `base * 2^(n-1)`.
    pub fn next_delay(&mut self, base: Duration) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        let factor = 2u32.saturating_pow(self.attempt - 1);
        Some(base.saturating_mul(factor))
    }
}

/// Snapshot published by the channel task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub phase: ConnectionPhase,
    pub attempt: u32,
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// First reconnect delay; doubles on every consecutive failure.
    pub base_delay: Duration,

    /// Consecutive failures after which reconnection stops.
    pub max_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

impl ChannelConfig {
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

// =============================================================================
// Transport
// =============================================================================

/// A way to open the inbound connection.
///
/// Each successful `connect` yields a stream of text frames. The stream ending
/// or yielding `Err` counts as a disconnect.
pub trait PushTransport: Send + Sync + 'static {
    type Stream: Stream<Item = Result<String>> + Send + Unpin + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream>> + Send;
}

// =============================================================================
// Client task
// =============================================================================

/// Handle to a running push channel.
///
/// Dropping the handle shuts the channel down.
pub struct ChannelHandle {
    status: watch::Receiver<ChannelStatus>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status().phase == ConnectionPhase::Connected
    }

    /// Whether the task has stopped (shut down or gave up reconnecting).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the channel reaches `phase`.
    ///
    /// # Errors
    /// Returns `Error::ChannelError` if the task stops first
    pub async fn wait_for_phase(&self, phase: ConnectionPhase) -> Result<ChannelStatus> {
        let mut status = self.status.clone();
        let reached = status
            .wait_for(|s| s.phase == phase)
            .await
            .map_err(|_| Error::ChannelError(format!("channel stopped before {}", phase)))?;
        Ok(*reached)
    }

    /// Wait for the task to stop on its own, without requesting shutdown.
    pub async fn join(self) {
        let ChannelHandle { task, shutdown, .. } = self;
        let _keep_running = shutdown;
        if let Err(e) = task.await {
            error!("Push channel task failed: {}", e);
        }
    }

    /// Stop the channel and wait for the task to finish.
    pub async fn shutdown(self) {
        let ChannelHandle { task, shutdown, .. } = self;
        // Err means the task already stopped.
        let _ = shutdown.send(());
        if let Err(e) = task.await {
            error!("Push channel task failed: {}", e);
        }
    }
}

/// The push-channel client.
pub struct PushChannel<T> {
    transport: T,
    registry: SubscriptionRegistry,
    config: ChannelConfig,
    status: watch::Sender<ChannelStatus>,
    state: ConnectionState,
}

enum Disconnect {
    Lost,
    Shutdown,
}

impl<T: PushTransport> PushChannel<T> {
    /// Start the client on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        transport: T,
        registry: SubscriptionRegistry,
        config: ChannelConfig,
    ) -> ChannelHandle {
        let initial = ChannelStatus {
            phase: ConnectionPhase::Disconnected,
            attempt: 0,
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let channel = PushChannel {
            transport,
            registry,
            state: ConnectionState::new(config.max_attempts),
            config,
            status: status_tx,
        };
        let task = tokio::spawn(channel.run(shutdown_rx));

        ChannelHandle {
            status: status_rx,
            shutdown: shutdown_tx,
            task,
        }
    }

    fn publish(&self, phase: ConnectionPhase) {
        self.status.send_replace(ChannelStatus {
            phase,
            attempt: self.state.attempt,
        });
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!("Push channel starting");

        loop {
            self.publish(ConnectionPhase::Connecting);
            let connected = tokio::select! {
                result = self.transport.connect() => result,
                _ = &mut shutdown => break,
            };

            match connected {
                Ok(stream) => {
                    self.state.reset();
                    self.publish(ConnectionPhase::Connected);
                    info!("✓ Push channel connected");

                    if let Disconnect::Shutdown = self.receive(stream, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Push channel connect failed: {}", e);
                }
            }

            match self.state.next_delay(self.config.base_delay) {
                Some(delay) => {
                    self.publish(ConnectionPhase::Disconnected);
                    debug!(
                        "Push channel reconnect {}/{} in {:?}",
                        self.state.attempt, self.state.max_attempts, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = &mut shutdown => break,
                    }
                }
                None => {
                    warn!(
                        "⚠ Push channel gave up after {} attempts; relying on polling triggers",
                        self.state.max_attempts
                    );
                    break;
                }
            }
        }

        self.publish(ConnectionPhase::Disconnected);
        info!("Push channel stopped");
    }

    async fn receive(
        &self,
        mut stream: T::Stream,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Disconnect {
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(e)) => {
                        warn!("Push channel dropped: {}", e);
                        return Disconnect::Lost;
                    }
                    None => {
                        info!("Push channel closed by remote");
                        return Disconnect::Lost;
                    }
                },
                _ = &mut *shutdown => return Disconnect::Shutdown,
            }
        }
    }

    fn handle_frame(&self, frame: &str) {
        match PushMessage::decode(frame) {
            Ok(PushMessage::Unknown) => {
                debug!("Ignoring push message of unknown type");
            }
            Ok(message) => {
                debug!("Push {} received", message.type_name());
                message.apply(&self.registry);
            }
            Err(e) => {
                warn!("Dropping malformed push frame: {}", e);
            }
        }
    }
}
