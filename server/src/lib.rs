//! # Lazy Cat Game Server Library
//!
//! This library provides the authoritative server for the Lazy Cat guessing
//! game. A cat hides in one cell of a square grid; every round each player
//! guesses a cell, the server reveals the cat and adjusts everyone's lives by
//! how close they got. Players whose lives run out are eliminated, and the
//! last one standing wins.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Rounds
//! The server rolls the grid size and the hidden cell, collects exactly one
//! guess per player, scores them and decides who is eliminated. Clients only
//! display what the server tells them.
//!
//! ### Client Management
//! Handles the complete lifecycle of player connections:
//! - Connection admission (refused while a round is in progress)
//! - Name registration and per-player state
//! - Disconnection handling and cleanup
//!
//! ### Broadcasting
//! Chat history, round starts, scores and end-of-game notices are fanned out
//! to every player. A player whose connection fails during a fan-out is
//! removed without disturbing delivery to the others.
//!
//! ## Architecture Design
//!
//! ### One Lock, Whole-Roster Decisions
//! Round transitions depend on the whole roster ("is everyone ready", "has
//! everyone guessed"), so all game and registry state lives in a single
//! [`game::GameState`] behind one mutex. The update that completes a
//! condition triggers the transition while still holding the lock.
//!
//! ### Task Per Connection
//! Every connection gets a reader task that feeds packets into the game and a
//! writer task that drains an outbound queue. Socket writes never happen
//! while the game lock is held.
//!
//! ### Framed TCP
//! Packets are JSON objects inside length-prefixed frames (see the `shared`
//! crate), so split or coalesced TCP reads cannot corrupt the stream.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! The registry of registered players and the fan-out primitive.
//!
//! ### Game Module (`game`)
//! The round state machine, scoring rule and elimination logic.
//!
//! ### Network Module (`network`)
//! Connection acceptance, per-connection sessions, timers and shutdown.
//!
//! ### Config and Error Modules (`config`, `error`)
//! Startup settings with validation, and the errors that stop the server.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 10002,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Runs until one player is left standing or everyone is eliminated
//!     Server::bind(config).await?.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod network;
