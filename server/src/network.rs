//! WebSocket transport for the live game
//!
//! Accepts TCP connections, upgrades them on `/liveGame/player/{playerName}`
//! and admits the player: the name is validated, added to the player
//! registry and the connection registered with the manager. An admitted
//! connection gets a read pump and a write pump plus a welcome message and
//! the current roster. A refused one gets a single error frame and is closed.

use crate::config::{ConnectionTimeouts, ServerConfig};
use crate::connection::{read_pump, write_pump, Connection};
use crate::connection_manager::ConnectionManager;
use crate::error::{AdmissionError, RegistryError, ServerError};
use crate::player_registry::Player;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use percent_encoding::percent_decode_str;
use shared::{is_player_name_valid, Message, PLAYER_NAME_MAX_LENGTH, SYSTEM_SENDER};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

pub const LIVE_GAME_PATH_PREFIX: &str = "/liveGame/player/";

/// Extracts the percent-decoded player name from a request path.
///
/// `None` for any path outside the live game route, an empty name, a name
/// spanning more than one path segment, or one that is not valid UTF-8.
pub fn player_name_from_path(path: &str) -> Option<String> {
    let raw = path.strip_prefix(LIVE_GAME_PATH_PREFIX)?;
    if raw.is_empty() || raw.contains('/') {
        return None;
    }
    percent_decode_str(raw)
        .decode_utf8()
        .ok()
        .map(|name| name.into_owned())
}

/// Validates `name`, adds the player and registers a new connection for it.
///
/// Nothing is left behind on failure: a player added before a failed
/// registration is removed again.
pub async fn admit_player(
    manager: &ConnectionManager,
    name: &str,
    capacity: usize,
) -> Result<(Arc<Connection>, mpsc::Receiver<Message>), AdmissionError> {
    if !is_player_name_valid(name, PLAYER_NAME_MAX_LENGTH) {
        return Err(AdmissionError::InvalidName(name.to_string()));
    }

    let player_id = manager.players().add_player(name).map_err(|e| match e {
        RegistryError::DuplicateName(name) | RegistryError::PlayerNotFound(name) => {
            AdmissionError::DuplicateName(name)
        }
    })?;

    let player = Player {
        id: player_id,
        name: name.to_string(),
    };
    let (connection, outbound) = Connection::new(manager.create_connection_id(), player, capacity);

    if let Err(e) = manager.register(Arc::clone(&connection)).await {
        if let Err(e) = manager.players().remove_player_by_name(name) {
            warn!("[{}] {}", connection.id(), e);
        }
        return Err(e.into());
    }

    info!("[{}] Player {} admitted", connection.id(), name);
    Ok((connection, outbound))
}

/// Queues the greeting and current roster for a newly admitted player.
pub fn send_welcome(manager: &ConnectionManager, connection: &Connection) {
    connection.enqueue_or_drop(Message::chat(
        SYSTEM_SENDER,
        format!("Welcome, {}!", connection.player_name()),
    ));
    connection.enqueue_or_drop(manager.player_list_message());
}

/// TCP listener serving the live game route
pub struct Server {
    listener: TcpListener,
    manager: ConnectionManager,
    config: Arc<ServerConfig>,
}

impl Server {
    pub async fn bind(config: ServerConfig, manager: ConnectionManager) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            manager,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the task is dropped, one handler task each.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Accepted TCP connection from {}", peer);
                    let manager = self.manager.clone();
                    let config = Arc::clone(&self.config);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, manager, config).await {
                            error!("Connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Drives one socket from handshake to disconnect.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    manager: ConnectionManager,
    config: Arc<ServerConfig>,
) -> Result<(), ServerError> {
    let mut requested_name = None;
    let route = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match player_name_from_path(request.uri().path()) {
            Some(name) => {
                requested_name = Some(name);
                Ok(response)
            }
            None => {
                warn!("Rejecting {} for unknown path {}", peer, request.uri().path());
                let mut not_found = ErrorResponse::new(Some("Not Found".to_string()));
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Err(not_found)
            }
        }
    };
    let handshake = accept_hdr_async(stream, route).await;
    let (socket, name) = match (handshake, requested_name) {
        (Ok(socket), Some(name)) => (socket, name),
        (Err(e), None) => {
            debug!("Handshake with {} refused: {}", peer, e);
            return Ok(());
        }
        (Err(e), Some(_)) => return Err(e.into()),
        (Ok(_), None) => return Ok(()),
    };

    match admit_player(&manager, &name, config.outbound_capacity).await {
        Ok((connection, outbound)) => {
            let (sink, stream) = socket.split();
            tokio::spawn(write_pump(
                sink,
                outbound,
                Arc::clone(&connection),
                config.timeouts,
            ));
            send_welcome(&manager, &connection);
            read_pump(stream, connection, manager, config.timeouts.idle_timeout).await;
            Ok(())
        }
        Err(e) => {
            warn!("Refusing player {:?} from {}: {}", name, peer, e);
            refuse(socket, &e, config.timeouts).await
        }
    }
}

/// Sends one error frame and closes the socket.
async fn refuse(
    mut socket: WebSocketStream<TcpStream>,
    reason: &AdmissionError,
    timeouts: ConnectionTimeouts,
) -> Result<(), ServerError> {
    let json = Message::error(Some(SYSTEM_SENDER), reason.to_string()).encode()?;
    match timeout(timeouts.write_timeout, socket.send(Frame::text(json))).await {
        Ok(result) => result?,
        Err(_) => warn!("Timed out sending admission error"),
    }
    let _ = timeout(timeouts.write_timeout, socket.close(None)).await;
    Ok(())
}
