//! Duplex message channel
//!
//! A reliable-feeling, bidirectional, message-oriented connection to one
//! logical endpoint (sampling feed, task feed, request-rate feed, liveness
//! ping). The channel hides transport drops: an unexpected close schedules
//! exactly one reconnect attempt after a fixed delay, and the cycle repeats
//! indefinitely until the caller disconnects. While open, a keep-alive
//! message goes out on a fixed period.
//!
//! The underlying transport is pluggable through [`Connector`], which hands
//! over an established [`Connection`] as a pair of frame queues. The real
//! WebSocket connector lives in [`crate::ws`]; tests inject scripted
//! connections and drive the timers with a paused clock.
//!
//! Events are delivered on a single receiver returned from [`DuplexChannel::new`]:
//! exactly one subscriber, handed out once.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::ClientMessage;

/// Boxed future, the connector's suspension point.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Fixed keep-alive period while the channel is open.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

/// Fixed delay before a reconnect attempt after an unexpected close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Timing knobs of a channel; defaults are the wire contract's fixed values.
#[derive(Debug, Clone)]
pub struct ChannelTiming {
    pub heartbeat: Duration,
    pub reconnect_delay: Duration,
}

impl Default for ChannelTiming {
    fn default() -> Self {
        Self {
            heartbeat: HEARTBEAT_PERIOD,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// A frame arriving from an established connection.
#[derive(Debug)]
pub enum Incoming {
    /// One text frame off the wire.
    Text(String),
    /// Transport-level failure; the connection is considered closed after.
    Error(String),
}

/// An established connection, as two frame queues.
///
/// Outgoing frames go into `tx`; incoming frames arrive on `rx`. The
/// connection is closed by dropping `tx`, and reported closed when `rx`
/// yields `None`.
pub struct Connection {
    pub tx: mpsc::UnboundedSender<String>,
    pub rx: mpsc::UnboundedReceiver<Incoming>,
}

/// Opens connections to one logical endpoint.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<Result<Connection>>;
}

/// Event surfaced to the channel's single subscriber.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The connection is open; sends will be transmitted.
    Opened,
    /// One structured message off the wire.
    Message(Value),
    /// A failure signal. Not terminal: reconnection continues until
    /// [`DuplexChannel::disconnect`].
    Error(String),
    /// A caller-initiated disconnect has completed. Never emitted for
    /// transport drops, which reconnect instead.
    Closed,
}

enum Command {
    Connect,
    Send(String),
    Disconnect,
}

/// Handle to a running channel driver.
///
/// All operations are fire-and-forget: results and failures come back on the
/// event receiver. Dropping the handle tears the driver down.
pub struct DuplexChannel {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl DuplexChannel {
    /// Spawn a channel driver over `connector`. Returns the handle and the
    /// single event receiver.
    pub fn new(
        connector: impl Connector,
        timing: ChannelTiming,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(Box::new(connector), timing, cmd_rx, event_tx));
        (Self { cmd_tx }, event_rx)
    }

    /// Open the underlying connection. Cancels any pending scheduled
    /// reconnect first; a no-op while already connected.
    pub fn connect(&self) {
        let _ = self.cmd_tx.send(Command::Connect);
    }

    /// Serialize and transmit a structured message.
    ///
    /// Silently dropped when the channel is not currently open: no queueing,
    /// no error. Callers must not rely on delivery.
    pub fn send<T: Serialize>(&self, message: &T) {
        match serde_json::to_string(message) {
            Ok(text) => {
                let _ = self.cmd_tx.send(Command::Send(text));
            }
            Err(e) => tracing::debug!(error = %e, "Dropping unserializable message"),
        }
    }

    /// Close by caller intent: stops the heartbeat, cancels any pending
    /// reconnect, closes the connection. No automatic reconnect follows.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }
}

/// The driver task: owns the connection, the heartbeat and the reconnect
/// timer, so tearing the task down cancels every pending timer with it.
async fn drive(
    connector: Box<dyn Connector>,
    timing: ChannelTiming,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut reconnect_at: Option<tokio::time::Instant> = None;

    'disconnected: loop {
        // Wait for a connect request, or for the scheduled reconnect.
        if let Some(deadline) = reconnect_at {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Connect) => {}
                    Some(Command::Disconnect) => {
                        reconnect_at = None;
                        let _ = event_tx.send(ChannelEvent::Closed);
                        continue 'disconnected;
                    }
                    Some(Command::Send(_)) => {
                        tracing::debug!("Dropping send, channel not open");
                        continue 'disconnected;
                    }
                    None => return,
                },
            }
        } else {
            match cmd_rx.recv().await {
                Some(Command::Connect) => {}
                Some(Command::Disconnect) => {
                    let _ = event_tx.send(ChannelEvent::Closed);
                    continue 'disconnected;
                }
                Some(Command::Send(_)) => {
                    tracing::debug!("Dropping send, channel not open");
                    continue 'disconnected;
                }
                None => return,
            }
        }
        reconnect_at = None;

        let Connection {
            tx: conn_tx,
            rx: mut conn_rx,
        } = match connector.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(error = %e, "Connect failed, retrying after delay");
                let _ = event_tx.send(ChannelEvent::Error(e.to_string()));
                reconnect_at = Some(tokio::time::Instant::now() + timing.reconnect_delay);
                continue 'disconnected;
            }
        };

        let _ = event_tx.send(ChannelEvent::Opened);
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + timing.heartbeat,
            timing.heartbeat,
        );

        // Connected: pump frames, commands and the heartbeat until the
        // connection ends or the caller disconnects.
        loop {
            tokio::select! {
                frame = conn_rx.recv() => match frame {
                    Some(Incoming::Text(text)) => match serde_json::from_str(&text) {
                        Ok(msg) => {
                            let _ = event_tx.send(ChannelEvent::Message(msg));
                        }
                        Err(e) => tracing::debug!(error = %e, "Dropping non-JSON frame"),
                    },
                    Some(Incoming::Error(e)) => {
                        let _ = event_tx.send(ChannelEvent::Error(e));
                        reconnect_at = Some(tokio::time::Instant::now() + timing.reconnect_delay);
                        continue 'disconnected;
                    }
                    None => {
                        // Unexpected close: schedule exactly one reconnect.
                        tracing::debug!("Connection closed unexpectedly, scheduling reconnect");
                        reconnect_at = Some(tokio::time::Instant::now() + timing.reconnect_delay);
                        continue 'disconnected;
                    }
                },
                _ = heartbeat.tick() => {
                    if let Ok(text) = serde_json::to_string(&ClientMessage::KeepAlive) {
                        let _ = conn_tx.send(text);
                    }
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(text)) => {
                        let _ = conn_tx.send(text);
                    }
                    Some(Command::Connect) => {}
                    Some(Command::Disconnect) => {
                        // Dropping conn_tx closes the transport normally;
                        // no reconnect is scheduled.
                        let _ = event_tx.send(ChannelEvent::Closed);
                        continue 'disconnected;
                    }
                    None => return,
                },
            }
        }
    }
}

/// Scripted in-process transport for exercising channel behavior under a
/// paused clock. Shared by the channel and session tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::Error;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Far end of a scripted connection held by the test.
    pub(crate) struct FarEnd {
        /// Frames the driver sent out.
        pub(crate) sent: mpsc::UnboundedReceiver<String>,
        /// Feed for frames the driver will receive; dropping it simulates an
        /// unexpected close.
        pub(crate) feed: Option<mpsc::UnboundedSender<Incoming>>,
    }

    pub(crate) enum Script {
        Accept,
        Refuse,
    }

    /// Connector that follows a script and counts connect attempts.
    pub(crate) struct ScriptedConnector {
        script: Mutex<VecDeque<Script>>,
        attempts: Arc<AtomicUsize>,
        far_ends: Arc<Mutex<VecDeque<FarEnd>>>,
    }

    impl ScriptedConnector {
        pub(crate) fn new(
            script: Vec<Script>,
        ) -> (Self, Arc<AtomicUsize>, Arc<Mutex<VecDeque<FarEnd>>>) {
            let attempts = Arc::new(AtomicUsize::new(0));
            let far_ends = Arc::new(Mutex::new(VecDeque::new()));
            (
                Self {
                    script: Mutex::new(script.into_iter().collect()),
                    attempts: attempts.clone(),
                    far_ends: far_ends.clone(),
                },
                attempts,
                far_ends,
            )
        }
    }

    impl Connector for ScriptedConnector {
        fn connect(&self) -> BoxFuture<Result<Connection>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Script::Accept) | None => {
                    let (out_tx, out_rx) = mpsc::unbounded_channel();
                    let (in_tx, in_rx) = mpsc::unbounded_channel();
                    self.far_ends.lock().unwrap().push_back(FarEnd {
                        sent: out_rx,
                        feed: Some(in_tx),
                    });
                    Box::pin(async move {
                        Ok(Connection {
                            tx: out_tx,
                            rx: in_rx,
                        })
                    })
                }
                Some(Script::Refuse) => {
                    Box::pin(async { Err(Error::Transport("connection refused".to_string())) })
                }
            }
        }
    }

    /// Let the driver task run; the test runtime is single-threaded.
    pub(crate) async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }
}
