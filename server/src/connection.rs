//! One live player connection and the two pumps that drive it
//!
//! A [`Connection`] owns the sending half of a bounded outbound queue. The
//! connection manager is the main producer; the write pump is the only
//! consumer. After admission two tasks run per connection:
//!
//! - [`read_pump`] reads frames, decodes them and forwards chat and game
//!   updates to the manager for broadcast. Whatever ends it, its last act is
//!   to ask the manager to unregister the connection.
//! - [`write_pump`] drains the queue onto the socket and sends a ping on a
//!   fixed interval. It stops when the queue is closed or a write fails.
//!
//! The pumps only share the queue and a close signal. [`Connection::close`]
//! drops the queue sender and fires the signal exactly once, however many
//! times and from wherever it is called.

use crate::config::ConnectionTimeouts;
use crate::connection_manager::ConnectionManager;
use crate::error::TransportError;
use crate::player_registry::Player;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::{Message, MessageError};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue is at capacity. A designed backpressure signal.
    Full,
    /// The connection has been closed.
    Closed,
}

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    player: Player,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    closed: CancellationToken,
}

impl Connection {
    /// Creates a connection and the receiving end of its outbound queue.
    pub fn new(
        id: ConnectionId,
        player: Player,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let connection = Connection {
            id,
            player,
            outbound: Mutex::new(Some(tx)),
            closed: CancellationToken::new(),
        };
        (Arc::new(connection), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn player_name(&self) -> &str {
        &self.player.name
    }

    /// Queues a message without waiting.
    pub fn try_enqueue(&self, message: Message) -> Result<(), EnqueueError> {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Queues a system message, dropping it if the queue is full or closed.
    pub fn enqueue_or_drop(&self, message: Message) -> bool {
        let kind = message.kind();
        match self.try_enqueue(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("[{}] Dropped {} message: {:?}", self.id, kind, e);
                false
            }
        }
    }

    /// Closes the outbound queue and signals both pumps to stop.
    ///
    /// Returns `true` only for the call that actually closed the connection.
    pub fn close(&self) -> bool {
        let sender = self.outbound.lock().take();
        if sender.is_none() {
            return false;
        }
        drop(sender);
        self.closed.cancel();
        info!("[{}] Connection closed", self.id);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`Connection::close`] has run.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Reads frames until the peer goes away, a read fails, the connection stays
/// silent past `idle_timeout`, or the connection is closed. Always ends by
/// asking the manager to unregister the connection.
pub async fn read_pump<S, E>(
    mut stream: S,
    connection: Arc<Connection>,
    manager: ConnectionManager,
    idle_timeout: Duration,
) where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let id = connection.id();
    debug!("[{}] Starting read pump", id);

    loop {
        let next = tokio::select! {
            _ = connection.closed() => {
                debug!("[{}] Read pump stopping, connection closed", id);
                break;
            }
            next = timeout(idle_timeout, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                warn!("[{}] No activity for {:?}, dropping connection", id, idle_timeout);
                break;
            }
            Ok(None) => {
                info!("[{}] Connection closed by peer", id);
                break;
            }
            Ok(Some(Err(e))) => {
                error!("[{}] Error reading message: {}", id, e);
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Text(text) => handle_text(&connection, &manager, text.as_str()),
            Frame::Binary(_) => {
                warn!("[{}] Binary frames are not supported", id);
                connection.enqueue_or_drop(Message::error(None, "Invalid message format"));
            }
            Frame::Pong(_) => debug!("[{}] Received pong", id),
            Frame::Ping(_) => debug!("[{}] Received ping", id),
            Frame::Close(_) => {
                info!("[{}] Received close frame", id);
                break;
            }
            Frame::Frame(_) => {}
        }
    }

    debug!("[{}] Read pump exiting, unregistering", id);
    manager.unregister(connection);
}

fn handle_text(connection: &Connection, manager: &ConnectionManager, text: &str) {
    let id = connection.id();
    let mut message = match Message::decode(text) {
        Ok(message) => message,
        Err(MessageError::UnknownType(kind)) => {
            warn!("[{}] Unknown message type: {}", id, kind);
            return;
        }
        Err(e) => {
            warn!("[{}] Error parsing message: {}", id, e);
            connection.enqueue_or_drop(Message::error(None, "Invalid message format"));
            return;
        }
    };

    message.player_name = Some(connection.player_name().to_string());
    message.timestamp = chrono::Utc::now();

    let kind = message.kind();
    if kind.is_broadcastable() {
        debug!("[{}] Broadcasting {} message", id, kind);
        manager.broadcast(message);
    } else {
        warn!("[{}] Ignoring {} message from client", id, kind);
    }
}

/// Writes queued messages and periodic pings to `sink` until the queue is
/// closed or a write fails. Closes the connection on the way out.
pub async fn write_pump<K>(
    mut sink: K,
    mut outbound: mpsc::Receiver<Message>,
    connection: Arc<Connection>,
    timeouts: ConnectionTimeouts,
) where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let id = connection.id();
    debug!("[{}] Starting write pump", id);

    let mut ping = interval(timeouts.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately
    ping.tick().await;

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(message) = next else {
                    debug!("[{}] Outbound queue closed, sending close frame", id);
                    let _ = write_frame(&mut sink, Frame::Close(None), timeouts.write_timeout).await;
                    break;
                };

                let json = match message.encode() {
                    Ok(json) => json,
                    Err(e) => {
                        error!("[{}] Error encoding {} message: {}", id, message.kind(), e);
                        continue;
                    }
                };

                if let Err(e) = write_frame(&mut sink, Frame::text(json), timeouts.write_timeout).await {
                    error!("[{}] Error writing message: {}", id, e);
                    break;
                }
            }
            _ = ping.tick() => {
                debug!("[{}] Sending ping", id);
                if let Err(e) = write_frame(&mut sink, Frame::Ping(Default::default()), timeouts.write_timeout).await {
                    error!("[{}] Error sending ping: {}", id, e);
                    break;
                }
            }
        }
    }

    connection.close();
    let _ = timeout(timeouts.write_timeout, sink.close()).await;
    debug!("[{}] Write pump exiting", id);
}

async fn write_frame<K>(sink: &mut K, frame: Frame, deadline: Duration) -> Result<(), TransportError>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    match timeout(deadline, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
        Err(_) => Err(TransportError::WriteTimeout),
    }
}
