//! Live connection tracking and broadcast fan-out for the multiplayer lobby
//!
//! This module owns the set of registered connections and handles:
//! - Registration of admitted connections, announced with a `join` message
//! - Unregistration on disconnect or backpressure, announced with `leave`
//! - Broadcasting a message to every registered connection's outbound queue
//!
//! All changes to the connection set happen on one event loop task that
//! receives register, unregister and broadcast events over channels. Other
//! tasks hold a cloneable [`ConnectionManager`] handle and never touch the
//! set directly, apart from the read-only count and lookup accessors.

use crate::connection::{Connection, ConnectionId, EnqueueError};
use crate::error::ManagerError;
use crate::player_registry::PlayerRegistry;
use crate::utils::unique_id;
use log::{debug, info, warn};
use parking_lot::RwLock;
use shared::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

type ConnectionMap = Arc<RwLock<HashMap<ConnectionId, Arc<Connection>>>>;

/// Request to add a connection, answered once the event loop has decided
struct Registration {
    connection: Arc<Connection>,
    reply: oneshot::Sender<Result<(), ManagerError>>,
}

/// Cloneable handle to the connection manager's event loop
///
/// Every mutation is sent to the loop as an event; calls return without
/// waiting on any connection. Only [`ConnectionManager::register`] awaits the
/// loop's answer so a duplicate id can be reported to the caller.
#[derive(Clone)]
pub struct ConnectionManager {
    register_tx: mpsc::UnboundedSender<Registration>,
    unregister_tx: mpsc::UnboundedSender<Arc<Connection>>,
    broadcast_tx: mpsc::UnboundedSender<Message>,
    connections: ConnectionMap,
    players: Arc<PlayerRegistry>,
    shutdown: CancellationToken,
}

/// The event loop side of the manager
///
/// Sole writer of the connection map. Runs until [`ConnectionManager::shutdown`]
/// is called or every handle is dropped, then closes every connection still
/// registered and removes its player.
pub struct ManagerLoop {
    register_rx: mpsc::UnboundedReceiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<Arc<Connection>>,
    broadcast_rx: mpsc::UnboundedReceiver<Message>,
    unregister_tx: mpsc::UnboundedSender<Arc<Connection>>,
    broadcast_tx: mpsc::UnboundedSender<Message>,
    connections: ConnectionMap,
    players: Arc<PlayerRegistry>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Creates a handle and the loop that serves it. The loop does nothing
    /// until [`ManagerLoop::run`] is polled.
    pub fn new(players: Arc<PlayerRegistry>) -> (Self, ManagerLoop) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
        let connections: ConnectionMap = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let handle = ConnectionManager {
            register_tx,
            unregister_tx: unregister_tx.clone(),
            broadcast_tx: broadcast_tx.clone(),
            connections: Arc::clone(&connections),
            players: Arc::clone(&players),
            shutdown: shutdown.clone(),
        };
        let event_loop = ManagerLoop {
            register_rx,
            unregister_rx,
            broadcast_rx,
            unregister_tx,
            broadcast_tx,
            connections,
            players,
            shutdown,
        };
        (handle, event_loop)
    }

    /// Creates the manager and spawns its loop on the current runtime.
    pub fn spawn(players: Arc<PlayerRegistry>) -> Self {
        let (handle, event_loop) = Self::new(players);
        tokio::spawn(event_loop.run());
        handle
    }

    /// Adds a connection to the live set and announces the player.
    ///
    /// Fails if a connection with the same id is already registered or the
    /// loop has stopped.
    pub async fn register(&self, connection: Arc<Connection>) -> Result<(), ManagerError> {
        let (reply, answer) = oneshot::channel();
        self.register_tx
            .send(Registration { connection, reply })
            .map_err(|_| ManagerError::Stopped)?;
        answer.await.map_err(|_| ManagerError::Stopped)?
    }

    /// Schedules removal of a connection. Unknown connections are ignored.
    pub fn unregister(&self, connection: Arc<Connection>) {
        if self.unregister_tx.send(connection).is_err() {
            debug!("Unregister after manager shutdown ignored");
        }
    }

    /// Schedules a message for delivery to every registered connection.
    pub fn broadcast(&self, message: Message) {
        debug!("Queueing broadcast message of type {}", message.kind());
        if self.broadcast_tx.send(message).is_err() {
            warn!("Broadcast after manager shutdown dropped");
        }
    }

    /// Queues a message for one connection without waiting.
    ///
    /// Returns false if the connection is unknown or its queue cannot take it.
    pub fn send_to_client(&self, id: &ConnectionId, message: Message) -> bool {
        let connection = self.connections.read().get(id).cloned();
        match connection {
            Some(connection) => connection.try_enqueue(message).is_ok(),
            None => false,
        }
    }

    pub fn client_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn client_exists(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    /// An id not used by any registered connection.
    pub fn create_connection_id(&self) -> ConnectionId {
        let connections = self.connections.read();
        unique_id(|id| connections.contains_key(id))
    }

    pub fn players(&self) -> &Arc<PlayerRegistry> {
        &self.players
    }

    /// Current roster as a `player_list` message.
    pub fn player_list_message(&self) -> Message {
        Message::player_list(self.players.player_name_list())
    }

    /// Stops the event loop. Connections still registered are closed and
    /// their players removed.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl ManagerLoop {
    /// Processes events until shutdown or until every handle is dropped.
    /// Events from the three channels are handled one at a time with no
    /// priority between channels.
    pub async fn run(mut self) {
        info!("Connection manager started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                registration = self.register_rx.recv() => {
                    // Every handle dropped
                    let Some(registration) = registration else { break };
                    self.handle_register(registration);
                }
                Some(connection) = self.unregister_rx.recv() => {
                    self.handle_unregister(connection);
                }
                Some(message) = self.broadcast_rx.recv() => {
                    self.handle_broadcast(message);
                }
            }
        }

        let remaining: Vec<Arc<Connection>> =
            self.connections.write().drain().map(|(_, c)| c).collect();
        // Unregister requests from the pumps are no longer served, so the
        // roster is cleaned up here
        for connection in &remaining {
            connection.close();
            if let Err(e) = self.players.remove_player_by_name(connection.player_name()) {
                warn!("[{}] {}", connection.id(), e);
            }
        }
        info!(
            "Connection manager stopped, closed {} connections",
            remaining.len()
        );
    }

    fn handle_register(&mut self, registration: Registration) {
        let Registration { connection, reply } = registration;
        let id = connection.id();

        let result = {
            let mut connections = self.connections.write();
            if connections.contains_key(&id) {
                Err(ManagerError::DuplicateConnection(id))
            } else {
                connections.insert(id, Arc::clone(&connection));
                Ok(())
            }
        };

        match &result {
            Ok(()) => {
                info!("[{}] Client registered as {}", id, connection.player_name());
                // Processed by this loop on a later turn
                let _ = self.broadcast_tx.send(Message::join(connection.player_name()));
            }
            Err(e) => warn!("[{}] Registration rejected: {}", id, e),
        }

        if reply.send(result).is_err() {
            debug!("[{}] Registrant stopped waiting", id);
        }
    }

    fn handle_unregister(&mut self, connection: Arc<Connection>) {
        let id = connection.id();
        let removed = self.connections.write().remove(&id);
        let Some(connection) = removed else {
            debug!("[{}] Unregister ignored, not registered", id);
            return;
        };
        connection.close();
        info!("[{}] Client disconnected: {}", id, connection.player_name());

        let players = Arc::clone(&self.players);
        let broadcast_tx = self.broadcast_tx.clone();
        tokio::spawn(async move {
            let name = connection.player_name();
            if let Err(e) = players.remove_player_by_name(name) {
                warn!("[{}] {}", id, e);
            }
            debug!("Broadcasting leave message for {}", name);
            let _ = broadcast_tx.send(Message::leave(name));
        });
    }

    fn handle_broadcast(&mut self, message: Message) {
        // Copy out so the lock is not held while enqueueing
        let recipients: Vec<Arc<Connection>> =
            self.connections.read().values().cloned().collect();

        debug!(
            "Broadcasting {} message from {:?} to {} clients",
            message.kind(),
            message.player_name,
            recipients.len()
        );

        for connection in recipients {
            match connection.try_enqueue(message.clone()) {
                Ok(()) => {}
                Err(EnqueueError::Full) => {
                    warn!("[{}] Send buffer full, dropping client", connection.id());
                    let _ = self.unregister_tx.send(connection);
                }
                Err(EnqueueError::Closed) => {
                    debug!("[{}] Skipping closed connection", connection.id());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player_registry::Player;
    use shared::{MessageBody, MessageKind};
    use std::time::Duration;
    use tokio::time::timeout;

    const TEST_CAPACITY: usize = 10;

    fn spawn_manager() -> ConnectionManager {
        ConnectionManager::spawn(Arc::new(PlayerRegistry::new()))
    }

    fn admit(
        manager: &ConnectionManager,
        name: &str,
        capacity: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<Message>) {
        let id = manager.players().add_player(name).unwrap();
        Connection::new(
            manager.create_connection_id(),
            Player {
                id,
                name: name.to_string(),
            },
            capacity,
        )
    }

    async fn next_message(rx: &mut mpsc::Receiver<Message>) -> Message {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("queue closed")
    }

    /// Registers and waits for the connection's own join echo, so the join
    /// broadcast is fully delivered before the next event.
    async fn register_settled(
        manager: &ConnectionManager,
        connection: &Arc<Connection>,
        rx: &mut mpsc::Receiver<Message>,
    ) {
        manager.register(Arc::clone(connection)).await.unwrap();
        let join = next_message(rx).await;
        assert_eq!(join.kind(), MessageKind::Join);
        assert_eq!(join.player_name.as_deref(), Some(connection.player_name()));
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_new_manager_is_empty() {
        let manager = spawn_manager();

        assert_eq!(manager.client_count(), 0);
        assert!(manager.players().is_empty());
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_register_echoes_join_to_self() {
        let manager = spawn_manager();
        let (alex, mut alex_rx) = admit(&manager, "Alex", TEST_CAPACITY);

        manager.register(Arc::clone(&alex)).await.unwrap();

        assert_eq!(manager.client_count(), 1);
        assert!(manager.client_exists(&alex.id()));
        let join = next_message(&mut alex_rx).await;
        assert_eq!(join.kind(), MessageKind::Join);
        assert_eq!(join.player_name.as_deref(), Some("Alex"));
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_register_duplicate_id_rejected() {
        let manager = spawn_manager();
        let (first, _first_rx) = admit(&manager, "Alex", TEST_CAPACITY);
        let (second, _second_rx) = Connection::new(
            first.id(),
            Player {
                id: manager.players().add_player("Bob").unwrap(),
                name: "Bob".to_string(),
            },
            TEST_CAPACITY,
        );

        manager.register(first).await.unwrap();
        let result = manager.register(Arc::clone(&second)).await;

        assert_eq!(result, Err(ManagerError::DuplicateConnection(second.id())));
        assert_eq!(manager.client_count(), 1);
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_join_and_leave_scenario() {
        let manager = spawn_manager();
        let (alex, mut alex_rx) = admit(&manager, "Alex", TEST_CAPACITY);
        let (bob, mut bob_rx) = admit(&manager, "Bob", TEST_CAPACITY);

        register_settled(&manager, &alex, &mut alex_rx).await;
        register_settled(&manager, &bob, &mut bob_rx).await;
        let join = next_message(&mut alex_rx).await;
        assert_eq!(join.kind(), MessageKind::Join);
        assert_eq!(join.player_name.as_deref(), Some("Bob"));

        manager.unregister(Arc::clone(&alex));
        let leave = next_message(&mut bob_rx).await;
        assert_eq!(leave.kind(), MessageKind::Leave);
        assert_eq!(leave.player_name.as_deref(), Some("Alex"));
        assert_eq!(manager.client_count(), 1);
        assert!(!manager.players().player_exists_by_name("Alex"));
        assert!(alex.is_closed());
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_unregister_unknown_connection_is_noop() {
        let manager = spawn_manager();
        let (alex, mut alex_rx) = admit(&manager, "Alex", TEST_CAPACITY);
        register_settled(&manager, &alex, &mut alex_rx).await;

        let (stranger, _rx) = admit(&manager, "Stranger", TEST_CAPACITY);
        manager.unregister(Arc::clone(&stranger));
        manager.broadcast(Message::chat("Alex", "still here"));

        let chat = next_message(&mut alex_rx).await;
        assert_eq!(chat.kind(), MessageKind::Chat);
        assert_eq!(manager.client_count(), 1);
        assert!(!stranger.is_closed());
        assert!(manager.players().player_exists_by_name("Stranger"));
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_unregister_twice_announces_once() {
        let manager = spawn_manager();
        let (alex, mut alex_rx) = admit(&manager, "Alex", TEST_CAPACITY);
        let (bob, mut bob_rx) = admit(&manager, "Bob", TEST_CAPACITY);
        register_settled(&manager, &alex, &mut alex_rx).await;
        register_settled(&manager, &bob, &mut bob_rx).await;

        manager.unregister(Arc::clone(&alex));
        manager.unregister(Arc::clone(&alex));

        let leave = next_message(&mut bob_rx).await;
        assert_eq!(leave.kind(), MessageKind::Leave);
        manager.broadcast(Message::chat("Bob", "marker"));
        let marker = next_message(&mut bob_rx).await;
        assert_eq!(marker.kind(), MessageKind::Chat);
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_broadcast_preserves_order_for_every_recipient() {
        let manager = spawn_manager();
        let mut receivers = Vec::new();
        for name in ["Alex", "Bob", "Charlie"] {
            let (connection, mut rx) = admit(&manager, name, TEST_CAPACITY);
            register_settled(&manager, &connection, &mut rx).await;
            receivers.push(rx);
        }
        // Earlier registrants also see every later join
        for (i, rx) in receivers.iter_mut().enumerate() {
            for _ in i + 1..3 {
                assert_eq!(next_message(rx).await.kind(), MessageKind::Join);
            }
        }

        for n in 0..5 {
            manager.broadcast(Message::chat("Alex", format!("message {}", n)));
        }

        for rx in receivers.iter_mut() {
            for n in 0..5 {
                let message = next_message(rx).await;
                assert_eq!(
                    message.body,
                    MessageBody::Chat(shared::TextContent {
                        text: format!("message {}", n)
                    })
                );
            }
        }
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_full_queue_drops_slow_client() {
        let manager = spawn_manager();
        let (fast, mut fast_rx) = admit(&manager, "Fast", TEST_CAPACITY);
        let (slow, mut slow_rx) = admit(&manager, "Slow", 1);
        register_settled(&manager, &fast, &mut fast_rx).await;
        manager.register(Arc::clone(&slow)).await.unwrap();
        assert_eq!(next_message(&mut fast_rx).await.kind(), MessageKind::Join);

        // Slow's single slot holds its own join echo, so the next broadcast overflows it
        manager.broadcast(Message::chat("Fast", "hello"));

        eventually(|| !manager.client_exists(&slow.id())).await;
        assert!(slow.is_closed());
        assert!(manager.client_exists(&fast.id()));

        let chat = next_message(&mut fast_rx).await;
        assert_eq!(chat.kind(), MessageKind::Chat);
        let leave = next_message(&mut fast_rx).await;
        assert_eq!(leave.kind(), MessageKind::Leave);
        assert_eq!(leave.player_name.as_deref(), Some("Slow"));

        // The slow client never received the chat
        let only = slow_rx.recv().await.unwrap();
        assert_eq!(only.kind(), MessageKind::Join);
        assert!(slow_rx.recv().await.is_none());
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_send_to_client() {
        let manager = spawn_manager();
        let (alex, mut alex_rx) = admit(&manager, "Alex", TEST_CAPACITY);
        register_settled(&manager, &alex, &mut alex_rx).await;

        assert!(manager.send_to_client(&alex.id(), Message::chat("System", "direct")));
        let direct = next_message(&mut alex_rx).await;
        assert_eq!(direct.player_name.as_deref(), Some("System"));

        let unknown = manager.create_connection_id();
        assert!(!manager.send_to_client(&unknown, Message::chat("System", "lost")));
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_player_list_message() {
        let manager = spawn_manager();
        manager.players().add_player("Alex").unwrap();
        manager.players().add_player("Bob").unwrap();

        let message = manager.player_list_message();

        assert_eq!(
            message.body,
            MessageBody::PlayerList(shared::PlayerListContent {
                names: vec!["Alex".to_string(), "Bob".to_string()]
            })
        );
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_closes_remaining_connections() {
        let manager = spawn_manager();
        let (alex, _alex_rx) = admit(&manager, "Alex", TEST_CAPACITY);
        manager.register(Arc::clone(&alex)).await.unwrap();

        manager.shutdown();

        timeout(Duration::from_secs(1), alex.closed()).await.unwrap();
        assert_eq!(manager.client_count(), 0);
        eventually(|| manager.register_tx.is_closed()).await;
        // The read pump's final unregister is ignored once the loop is gone
        manager.unregister(Arc::clone(&alex));
        assert!(!manager.players().player_exists_by_name("Alex"));
        assert!(manager.players().is_empty());

        let (late, _late_rx) = admit(&manager, "Late", TEST_CAPACITY);
        assert_eq!(manager.register(late).await, Err(ManagerError::Stopped));
    }

    #[tokio::test]
    async fn test_loop_ends_when_all_handles_dropped() {
        let players = Arc::new(PlayerRegistry::new());
        let (manager, event_loop) = ConnectionManager::new(Arc::clone(&players));
        let task = tokio::spawn(event_loop.run());
        let (alex, _alex_rx) = admit(&manager, "Alex", TEST_CAPACITY);
        manager.register(Arc::clone(&alex)).await.unwrap();

        drop(manager);

        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(alex.is_closed());
        assert!(!players.player_exists_by_name("Alex"));
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique_against_live_set() {
        let manager = spawn_manager();
        let mut ids = Vec::new();
        for i in 0..20 {
            let (connection, _rx) = admit(&manager, &format!("player{}", i), TEST_CAPACITY);
            ids.push(connection.id());
            manager.register(connection).await.unwrap();
        }

        for _ in 0..20 {
            assert!(!ids.contains(&manager.create_connection_id()));
        }
        manager.shutdown();
    }
}
