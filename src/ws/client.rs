//! Per-connection state: outbound queue, close signal, rate limiting

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::util::rate_limit::Limiter;

/// Deadline armed for each outbound frame
pub const WRITE_WAIT: Duration = Duration::from_secs(5);
/// Read deadline; reset by inbound traffic (pongs included)
pub const PONG_WAIT: Duration = Duration::from_secs(20);
/// Interval between protocol-level pings
pub const PING_PERIOD: Duration = Duration::from_secs(10);

/// Connection send errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("send queue full")]
    QueueFull,

    #[error("connection closed")]
    Closed,
}

/// Cloneable handle for pushing frames to a connection.
///
/// Sends never block: a full queue drops the frame and reports backpressure.
#[derive(Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<Vec<u8>>,
    shutdown: Arc<Notify>,
    metrics: Arc<Metrics>,
}

impl ClientHandle {
    pub fn new(tx: mpsc::Sender<Vec<u8>>, shutdown: Arc<Notify>, metrics: Arc<Metrics>) -> Self {
        Self {
            tx,
            shutdown,
            metrics,
        }
    }

    /// Enqueue one binary frame, dropping it if the queue is full
    pub fn send(&self, data: Vec<u8>) -> Result<(), ClientError> {
        let len = data.len() as u64;
        match self.tx.try_send(data) {
            Ok(()) => {
                self.metrics.send_bytes.fetch_add(len, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(ClientError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ClientError::Closed),
        }
    }

    /// Ask the connection's read loop to terminate
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Whether two handles refer to the same connection
    pub fn same_connection(&self, other: &ClientHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Connection-side state owned by the socket handler
pub struct Client {
    handle: ClientHandle,
    player_id: RwLock<Option<Uuid>>,
    limiter: Option<Arc<Limiter>>,
}

impl Client {
    pub fn new(handle: ClientHandle, limiter: Option<Arc<Limiter>>) -> Self {
        Self {
            handle,
            player_id: RwLock::new(None),
            limiter,
        }
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    pub fn player_id(&self) -> Option<Uuid> {
        *self.player_id.read()
    }

    pub fn set_player_id(&self, id: Uuid) {
        *self.player_id.write() = Some(id);
    }

    /// Check the inbound rate limit; a disabled limiter always allows
    pub fn allow_message(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }
}

/// Drain the outbound queue onto the socket, pinging periodically.
///
/// Exits when the queue closes (after a close frame) or on any write error;
/// deadlines only force the next I/O to fail, they cancel nothing in flight.
pub async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Vec<u8>>) {
    let start = tokio::time::Instant::now() + PING_PERIOD;
    let mut ping = tokio::time::interval_at(start, PING_PERIOD);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(data) => {
                    match timeout(WRITE_WAIT, sink.send(Message::Binary(data))).await {
                        Ok(Ok(())) => {}
                        _ => return,
                    }
                }
                None => {
                    let _ = timeout(WRITE_WAIT, sink.send(Message::Close(None))).await;
                    return;
                }
            },
            _ = ping.tick() => {
                match timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
        }
    }
}
