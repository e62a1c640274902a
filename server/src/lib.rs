//! # Quiz Game Server Library
//!
//! This library provides the live multiplayer side of the quiz game backend.
//! Players join a shared lobby over WebSocket, exchange chat and game update
//! messages, and take timed quizzes whose answers are scored on submission.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Handles the complete lifecycle of a player connection:
//! - Route matching and player name validation at the handshake
//! - Unique name enforcement through the player registry
//! - Registration, announced to everyone with a `join` message
//! - Unregistration on disconnect, idle timeout or backpressure, announced
//!   with a `leave` message
//!
//! ### Broadcast Fan-Out
//! Chat and game update messages from one player are delivered to every
//! registered connection, the sender included. Each connection has its own
//! bounded outbound queue, so one slow reader never delays the others: when a
//! queue is full the slow connection is dropped instead of the broadcast
//! waiting for it.
//!
//! ### Timed Quizzes
//! A quiz attempt is bounded by a short-lived session. Answers submitted
//! after the session expires are rejected, and every evaluation consumes the
//! session so an attempt can be graded at most once.
//!
//! ## Architecture Design
//!
//! ### Single Writer Event Loop
//! The set of live connections is owned by one event loop task. Registration,
//! unregistration and broadcast requests reach it over channels and are
//! handled one at a time, so membership changes never race with delivery.
//!
//! ### Two Pumps per Connection
//! Every admitted socket is split into a read pump, which decodes inbound
//! frames and forwards them for broadcast, and a write pump, which drains the
//! outbound queue and keeps the connection alive with periodic pings. Either
//! pump ending tears down the whole connection.
//!
//! ## Module Organization
//!
//! - `player_registry`: live player names and ids
//! - `session_store`: quiz sessions and their expiry
//! - `connection`: connection handle and the read and write pumps
//! - `connection_manager`: the event loop and its cloneable handle
//! - `quiz`: quiz start and evaluation over a problem store
//! - `network`: TCP accept loop, WebSocket handshake and admission
//! - `config`, `error`, `utils`: settings, error types and id generation
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::connection_manager::ConnectionManager;
//! use server::network::Server;
//! use server::player_registry::PlayerRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::spawn(Arc::new(PlayerRegistry::new()));
//!     let server = Server::bind(ServerConfig::default(), manager).await?;
//!
//!     // Players connect to ws://127.0.0.1:8080/liveGame/player/{name}
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod connection_manager;
pub mod error;
pub mod network;
pub mod player_registry;
pub mod quiz;
pub mod session_store;
pub mod utils;
