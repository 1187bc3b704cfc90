//! Authoritative round state for the hidden-cell game
//!
//! [`GameState`] owns the player registry together with everything a round
//! needs: grid size, hidden cell, chat history and the current [`Phase`]. The
//! server keeps exactly one instance behind a single lock, and every
//! transition is evaluated inside the same call that recorded the update
//! causing it.
//!
//! Work that needs the async runtime (timers, shutting the listener) is not
//! done here. Instead the state queues an [`Action`] that the network layer
//! collects with [`GameState::take_actions`] before releasing the lock.

use crate::client_manager::{Client, ClientId, ClientManager, OutboundSender};
use crate::config::ServerConfig;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{cell_of, ServerPacket, CHAT_HISTORY_LEN, MAX_CHAT_LEN, MAX_NAME_LEN};
use std::net::SocketAddr;
use thiserror::Error;

pub const EXACT_HIT_POINTS: i32 = 10;
pub const NEIGHBOR_POINTS: i32 = 2;
pub const MISS_PENALTY: i32 = -1;

pub const LOST_MESSAGE: &str = "You have lost all your lives!";
pub const WINNER_MESSAGE: &str = "Congratulations, you are the winner!";
pub const SHUTDOWN_MESSAGE: &str = "The server is shutting down.";
pub const GAME_IN_PROGRESS_MESSAGE: &str =
    "A game is already in progress. Please try again later.";
pub const REGISTER_FIRST_MESSAGE: &str = "Please register a name first.";

/// Where the game currently is in its round cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for every player to be ready
    Lobby,
    /// Grid revealed, collecting one guess per player
    RoundActive,
    /// Scores sent, waiting out the result delay
    Scoring,
    /// Applying eliminations
    EndCheck,
    /// The game is over and the server is shutting down
    Terminated,
}

impl Phase {
    /// True while the roster must stay fixed
    pub fn in_progress(&self) -> bool {
        matches!(self, Phase::RoundActive | Phase::Scoring | Phase::EndCheck)
    }
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run [`GameState::end_check`] for `round` after the result delay
    ScheduleEndCheck { round: u32 },
    /// Run [`GameState::guess_deadline`] for `round` after the guess timeout
    ScheduleGuessDeadline { round: u32 },
    /// Stop accepting connections and end every session
    Shutdown,
}

/// Reasons a name registration is refused. The text is shown to the player.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("Your name cannot be empty.")]
    EmptyName,
    #[error("Names are limited to {} characters.", MAX_NAME_LEN)]
    NameTooLong,
    #[error("The name '{0}' is already taken.")]
    NameTaken(String),
    #[error("You are already registered.")]
    AlreadyRegistered,
    #[error("A round is in progress. Please register again once it is over.")]
    GameInProgress,
}

/// Points awarded for `guess` when the hidden cell is `target`.
///
/// Both positions are linear indices on a `grid_size` x `grid_size` grid.
pub fn score_guess(grid_size: u32, target: u32, guess: u32) -> i32 {
    let (target_row, target_col) = cell_of(target, grid_size);
    let (guess_row, guess_col) = cell_of(guess, grid_size);
    let distance = target_row.abs_diff(guess_row) + target_col.abs_diff(guess_col);

    match distance {
        0 => EXACT_HIT_POINTS,
        1 => NEIGHBOR_POINTS,
        _ => MISS_PENALTY,
    }
}

pub struct GameState {
    pub config: ServerConfig,
    pub clients: ClientManager,
    pub phase: Phase,
    /// Number of the latest round, 0 before the first one
    pub round: u32,
    pub grid_size: u32,
    /// Linear index of the hidden cell
    pub target: u32,
    pub chat_history: Vec<String>,
    /// Set once a round has been scored; lifts the minimum player count
    pub first_round_done: bool,
    next_client_id: ClientId,
    actions: Vec<Action>,
    rng: StdRng,
}

impl GameState {
    /// Creates an empty lobby with an entropy-seeded grid generator.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Like [`GameState::new`] but with a fixed seed, so grid sizes and hidden
    /// cells are reproducible.
    pub fn with_seed(config: ServerConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: ServerConfig, rng: StdRng) -> Self {
        let grid_size = config.min_grid_size;
        Self {
            config,
            clients: ClientManager::new(),
            phase: Phase::Lobby,
            round: 0,
            grid_size,
            target: 0,
            chat_history: Vec::new(),
            first_round_done: false,
            next_client_id: 1,
            actions: Vec::new(),
            rng,
        }
    }

    /// Hands out an id for a new connection, or None while joining is closed.
    pub fn admit_connection(&mut self) -> Option<ClientId> {
        if self.phase.in_progress() || self.phase == Phase::Terminated {
            return None;
        }
        let client_id = self.next_client_id;
        self.next_client_id += 1;
        Some(client_id)
    }

    /// Registers the player behind `client_id` with the starting score.
    pub fn register_player(
        &mut self,
        client_id: ClientId,
        name: &str,
        addr: SocketAddr,
        sender: OutboundSender,
    ) -> Result<(), RegisterError> {
        let name = name.trim();
        if self.clients.contains(&client_id) {
            return Err(RegisterError::AlreadyRegistered);
        }
        if name.is_empty() {
            return Err(RegisterError::EmptyName);
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(RegisterError::NameTooLong);
        }
        if self.phase != Phase::Lobby {
            return Err(RegisterError::GameInProgress);
        }
        if self.clients.is_name_taken(name) {
            return Err(RegisterError::NameTaken(name.to_string()));
        }

        let client = Client::new(
            client_id,
            name.to_string(),
            addr,
            self.config.starting_score,
            sender,
        );
        self.clients.add_client(client);

        let welcome = if self.first_round_done {
            format!(
                "Welcome {}! The next round starts once every player is ready.",
                name
            )
        } else {
            format!(
                "Welcome {}! At least {} players are needed to start the game. \
                 Press ready and wait for the grid to activate.",
                name, self.config.min_players
            )
        };
        self.clients.send_to(&client_id, ServerPacket::info(welcome));
        if !self.chat_history.is_empty() {
            self.clients.send_to(
                &client_id,
                ServerPacket::Chat {
                    history: self.chat_tail(),
                },
            );
        }
        Ok(())
    }

    /// Marks a player ready and starts a round if everyone is.
    ///
    /// Readiness is ignored while guesses are being collected.
    pub fn set_ready(&mut self, client_id: ClientId) {
        if matches!(self.phase, Phase::RoundActive | Phase::Terminated) {
            debug!("Ignoring ready from client {} in {:?}", client_id, self.phase);
            return;
        }
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };
        client.ready = true;

        if !self.try_start_round() && !self.first_round_done {
            info!(
                "Waiting for players: {}/{} ready",
                self.clients.ready_count(),
                self.clients.len()
            );
        }
    }

    /// Records a guess and scores the round once everyone has guessed.
    pub fn submit_guess(&mut self, client_id: ClientId, position: u32) {
        if self.phase != Phase::RoundActive {
            debug!("Ignoring guess from client {} in {:?}", client_id, self.phase);
            return;
        }
        let cells = self.grid_size * self.grid_size;
        if position >= cells {
            let message = format!(
                "Cell {} is outside the {}x{} grid.",
                position, self.grid_size, self.grid_size
            );
            self.clients.send_to(&client_id, ServerPacket::info(message));
            return;
        }
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };
        client.guess = Some(position);
        debug!("Client {} guessed cell {}", client_id, position);

        if self.clients.all_guessed() {
            self.score_round();
        }
    }

    /// Appends a chat line and sends the recent history to everyone.
    ///
    /// Messages longer than [`MAX_CHAT_LEN`] are refused with an info reply.
    pub fn post_chat(&mut self, client_id: ClientId, text: &str) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        if text.chars().count() > MAX_CHAT_LEN {
            let message = format!("Chat messages are limited to {} characters.", MAX_CHAT_LEN);
            self.clients.send_to(&client_id, ServerPacket::info(message));
            return;
        }
        let line = format!("{}: {}", client.name, text);
        debug!("Chat {}", line);
        self.chat_history.push(line);

        let packet = ServerPacket::Chat {
            history: self.chat_tail(),
        };
        self.broadcast(packet);
    }

    /// The last chat lines, oldest first
    pub fn chat_tail(&self) -> Vec<String> {
        let start = self.chat_history.len().saturating_sub(CHAT_HISTORY_LEN);
        self.chat_history[start..].to_vec()
    }

    /// Removes a player and re-evaluates the round.
    ///
    /// Safe to call for connections that never registered or were already
    /// removed.
    pub fn remove_player(&mut self, client_id: ClientId) {
        if self.clients.remove_client(&client_id).is_some() {
            self.after_roster_change();
        }
    }

    /// Scores stragglers as a miss if `round` is still collecting guesses.
    pub fn guess_deadline(&mut self, round: u32) {
        if self.phase != Phase::RoundActive || self.round != round {
            return;
        }
        info!("Guess deadline reached for round {}", round);
        self.score_round();
    }

    /// Applies eliminations once the result delay of `round` is over.
    pub fn end_check(&mut self, round: u32) {
        if self.phase != Phase::Scoring || self.round != round {
            return;
        }
        self.phase = Phase::EndCheck;

        for client_id in self.clients.eliminated() {
            self.clients.send_to(&client_id, ServerPacket::game_ended(LOST_MESSAGE));
            if let Some(client) = self.clients.remove_client(&client_id) {
                info!("{} has been eliminated", client.name);
            }
        }

        match self.clients.ids().as_slice() {
            [] => {
                info!("All players lost. Game over.");
                self.shutdown();
            }
            [winner] => {
                let winner = *winner;
                if let Some(client) = self.clients.get(&winner) {
                    info!("{} is the winner!", client.name);
                }
                self.clients.send_to(&winner, ServerPacket::game_ended(WINNER_MESSAGE));
                self.shutdown();
            }
            _ => {
                self.phase = Phase::Lobby;
                self.try_start_round();
            }
        }
    }

    /// Notifies everyone, closes every session and terminates the game.
    pub fn shutdown(&mut self) {
        if self.phase == Phase::Terminated {
            return;
        }
        info!("Shutting down game");
        self.clients.broadcast(&ServerPacket::info(SHUTDOWN_MESSAGE));
        self.clients.drain();
        self.phase = Phase::Terminated;
        self.actions.push(Action::Shutdown);
    }

    /// Side effects queued since the last call
    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    fn try_start_round(&mut self) -> bool {
        let enough_players =
            self.clients.len() >= self.config.min_players || self.first_round_done;
        if self.phase == Phase::Lobby && self.clients.all_ready() && enough_players {
            self.start_round();
            true
        } else {
            false
        }
    }

    fn start_round(&mut self) {
        self.round += 1;
        self.grid_size = self
            .rng
            .gen_range(self.config.min_grid_size..=self.config.max_grid_size);
        self.target = self.rng.gen_range(0..self.grid_size * self.grid_size);
        self.clients.reset_round();
        self.phase = Phase::RoundActive;

        info!(
            "Round {} started with {} players on a {}x{} grid",
            self.round,
            self.clients.len(),
            self.grid_size,
            self.grid_size
        );

        if self.config.guess_timeout.is_some() {
            self.actions.push(Action::ScheduleGuessDeadline { round: self.round });
        }

        let packet = ServerPacket::RoundStarted {
            round: self.round,
            grid_size: self.grid_size,
            target_position: self.target,
        };
        self.broadcast(packet);
    }

    fn score_round(&mut self) {
        let grid_size = self.grid_size;
        let target = self.target;

        for client in self.clients.clients_mut() {
            let points = match client.guess.take() {
                Some(guess) => score_guess(grid_size, target, guess),
                None => MISS_PENALTY,
            };
            client.score += points;
            debug!("{} scored {} (now {})", client.name, points, client.score);
        }

        self.first_round_done = true;
        self.phase = Phase::Scoring;
        info!("Round {} scored", self.round);

        self.actions.push(Action::ScheduleEndCheck { round: self.round });

        let packet = ServerPacket::Scores {
            scores: self.clients.scores(),
            target_position: target,
        };
        self.broadcast(packet);
    }

    fn after_roster_change(&mut self) {
        match self.phase {
            Phase::Lobby => {
                self.try_start_round();
            }
            Phase::RoundActive => {
                if self.clients.is_empty() {
                    info!("Every player left, round {} abandoned", self.round);
                    self.phase = Phase::Lobby;
                } else if self.clients.all_guessed() {
                    self.score_round();
                }
            }
            Phase::Scoring | Phase::EndCheck | Phase::Terminated => {}
        }
    }

    /// Sends to every player, removing those whose connection is gone.
    fn broadcast(&mut self, packet: ServerPacket) {
        let failed = self.clients.broadcast(&packet);
        if failed.is_empty() {
            return;
        }
        for client_id in failed {
            warn!("Lost connection to client {} during broadcast", client_id);
            self.clients.remove_client(&client_id);
        }
        self.after_roster_change();
    }
}
