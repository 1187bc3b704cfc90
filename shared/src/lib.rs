//! Wire protocol shared by the game server and its clients.
//!
//! Every packet is a flat JSON object whose `type` field names the packet
//! kind. Packets travel over TCP inside length-prefixed frames, see
//! [`framing`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod framing;

pub use framing::{read_packet, write_packet, MAX_FRAME_SIZE};

/// Number of chat lines sent to clients with every chat update.
pub const CHAT_HISTORY_LEN: usize = 10;

/// Longest accepted player name, in characters.
pub const MAX_NAME_LEN: usize = 32;

/// Longest accepted chat message, in characters.
///
/// Together with [`MAX_NAME_LEN`] this keeps a full chat update inside one
/// frame even when every character needs a six-byte JSON escape.
pub const MAX_CHAT_LEN: usize = 1000;

/// Packets sent by a client to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum ClientPacket {
    RegisterName { name: String },
    Ready,
    Guess { position: u32 },
    Chat { text: String },
    Disconnect,
}

/// Packets sent by the server to a client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum ServerPacket {
    /// Most recent chat lines, oldest first.
    Chat { history: Vec<String> },
    /// A new round has started on a `grid_size` x `grid_size` grid.
    ///
    /// `target_position` is the linear index of the hidden cell. Clients use
    /// it to animate the reveal once the scores arrive.
    RoundStarted {
        round: u32,
        grid_size: u32,
        target_position: u32,
    },
    /// Lives of every player after a round has been scored.
    Scores {
        scores: BTreeMap<String, i32>,
        target_position: u32,
    },
    /// The game is over for the receiving player.
    GameEnded { message: String },
    Info { message: String },
}

impl ServerPacket {
    pub fn info(message: impl Into<String>) -> Self {
        ServerPacket::Info {
            message: message.into(),
        }
    }

    pub fn game_ended(message: impl Into<String>) -> Self {
        ServerPacket::GameEnded {
            message: message.into(),
        }
    }
}

/// Errors raised while moving packets over a byte stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: u32 },
    #[error("malformed packet: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes a packet to its JSON payload.
pub fn encode<T: Serialize>(packet: &T) -> Result<Vec<u8>, FrameError> {
    Ok(serde_json::to_vec(packet)?)
}

/// Parses a JSON payload into a packet.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, FrameError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Converts a linear cell index to `(row, col)` on an `n` x `n` grid.
pub fn cell_of(position: u32, grid_size: u32) -> (u32, u32) {
    (position / grid_size, position % grid_size)
}

/// Converts `(row, col)` to a linear cell index on an `n` x `n` grid.
pub fn position_of(row: u32, col: u32, grid_size: u32) -> u32 {
    row * grid_size + col
}
