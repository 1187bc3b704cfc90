//! Registry of players connected to the game server
//!
//! This module holds the server-side record of every registered player:
//! - Connection identity and outbound packet queue
//! - Display name, remaining lives and readiness
//! - The guess submitted for the round currently being played
//!
//! All fields of a player live in a single [`Client`] record, so adding or
//! removing a player can never leave half of its state behind. The registry
//! itself is not synchronized; it is owned by the game state, which lives
//! behind the server's single lock.

use log::{debug, info};
use shared::ServerPacket;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Server-assigned identity of one connection
pub type ClientId = u32;

/// Work queued for a connection's writer task
#[derive(Debug)]
pub enum Outbound {
    /// Serialize and send a packet
    Packet(ServerPacket),
    /// Flush what is queued, then close the connection
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// A registered player and their per-round state
#[derive(Debug)]
pub struct Client {
    /// Identity of the connection this player arrived on
    pub id: ClientId,
    /// Display name chosen at registration
    pub name: String,
    /// Remote address, kept for logging
    pub addr: SocketAddr,
    /// Remaining lives
    pub score: i32,
    /// Linear cell index guessed this round, if any
    pub guess: Option<u32>,
    /// Whether the player asked for the next round to start
    pub ready: bool,
    sender: OutboundSender,
}

impl Client {
    pub fn new(
        id: ClientId,
        name: String,
        addr: SocketAddr,
        score: i32,
        sender: OutboundSender,
    ) -> Self {
        Self {
            id,
            name,
            addr,
            score,
            guess: None,
            ready: false,
            sender,
        }
    }

    /// Queues a packet for this player.
    ///
    /// Returns false once the connection's writer task has stopped.
    pub fn send(&self, packet: ServerPacket) -> bool {
        self.sender.send(Outbound::Packet(packet)).is_ok()
    }

    /// Asks the writer task to close the connection after flushing.
    pub fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }
}

/// All registered players, keyed by connection
#[derive(Debug, Default)]
pub struct ClientManager {
    clients: HashMap<ClientId, Client>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Registers a player. Returns false if the connection already has one.
    pub fn add_client(&mut self, client: Client) -> bool {
        if self.clients.contains_key(&client.id) {
            return false;
        }
        info!(
            "Client {} registered as '{}' from {}",
            client.id, client.name, client.addr
        );
        self.clients.insert(client.id, client);
        true
    }

    /// Removes a player and closes their connection.
    ///
    /// Removing an unknown connection is a no-op and returns None.
    pub fn remove_client(&mut self, client_id: &ClientId) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        client.close();
        info!("Client {} ('{}') removed", client.id, client.name);
        Some(client)
    }

    /// Removes every player, closing all connections.
    pub fn drain(&mut self) -> Vec<Client> {
        let drained: Vec<Client> = self.clients.drain().map(|(_, client)| client).collect();
        for client in &drained {
            client.close();
        }
        drained
    }

    /// Looks up a registered player by connection id
    pub fn get(&self, client_id: &ClientId) -> Option<&Client> {
        self.clients.get(client_id)
    }

    /// Mutable lookup of a registered player
    pub fn get_mut(&mut self, client_id: &ClientId) -> Option<&mut Client> {
        self.clients.get_mut(client_id)
    }

    /// Returns true if the connection has registered a name
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Checks whether another player already uses `name`.
    ///
    /// Names are compared exactly, after the caller has trimmed them.
    pub fn is_name_taken(&self, name: &str) -> bool {
        self.clients.values().any(|client| client.name == name)
    }

    /// Queues a packet for one player. Returns false if it could not be queued.
    pub fn send_to(&self, client_id: &ClientId, packet: ServerPacket) -> bool {
        match self.clients.get(client_id) {
            Some(client) => client.send(packet),
            None => false,
        }
    }

    /// Queues a packet for every player.
    ///
    /// A failing recipient does not stop the fan-out; the ids of players whose
    /// connection is gone are returned so the caller can remove them.
    pub fn broadcast(&self, packet: &ServerPacket) -> Vec<ClientId> {
        let mut failed = Vec::new();
        for (id, client) in &self.clients {
            if !client.send(packet.clone()) {
                debug!("Broadcast to client {} failed", id);
                failed.push(*id);
            }
        }
        failed
    }

    /// True when at least one player is registered and all of them are ready
    pub fn all_ready(&self) -> bool {
        !self.clients.is_empty() && self.clients.values().all(|client| client.ready)
    }

    /// True when at least one player is registered and all of them guessed
    pub fn all_guessed(&self) -> bool {
        !self.clients.is_empty() && self.clients.values().all(|client| client.guess.is_some())
    }

    /// Number of players that signalled ready
    pub fn ready_count(&self) -> usize {
        self.clients.values().filter(|client| client.ready).count()
    }

    /// Clears every guess and ready flag ahead of a new round.
    pub fn reset_round(&mut self) {
        for client in self.clients.values_mut() {
            client.guess = None;
            client.ready = false;
        }
    }

    /// Iterates over every player for in-place updates such as scoring
    pub fn clients_mut(&mut self) -> impl Iterator<Item = &mut Client> {
        self.clients.values_mut()
    }

    /// Current lives of every player, by name
    pub fn scores(&self) -> BTreeMap<String, i32> {
        self.clients
            .values()
            .map(|client| (client.name.clone(), client.score))
            .collect()
    }

    /// Ids of players whose lives have run out
    pub fn eliminated(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self
            .clients
            .values()
            .filter(|client| client.score <= 0)
            .map(|client| client.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of all registered players in ascending order
    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the number of registered players
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no player is registered
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
