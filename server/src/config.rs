//! Runtime configuration for the game server.

use crate::error::ServerError;
use std::time::Duration;

/// Settings fixed for the lifetime of a server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub host: String,
    /// Port the listener binds to, 0 picks an ephemeral port
    pub port: u16,
    /// Smallest grid side length a round may roll
    pub min_grid_size: u32,
    /// Largest grid side length a round may roll
    pub max_grid_size: u32,
    /// Lives every player starts with
    pub starting_score: i32,
    /// Players required before the very first round may start
    pub min_players: usize,
    /// How long scores stay on screen before eliminations are applied
    pub result_delay: Duration,
    /// Optional deadline for guesses; stragglers count as a miss
    pub guess_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 10002,
            min_grid_size: 3,
            max_grid_size: 10,
            starting_score: 10,
            min_players: 3,
            result_delay: Duration::from_secs(3),
            guess_timeout: None,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Rejects settings the round controller cannot play with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.min_grid_size == 0 {
            return Err(ServerError::InvalidConfig(
                "minimum grid size must be at least 1".to_string(),
            ));
        }
        if self.min_grid_size > self.max_grid_size {
            return Err(ServerError::InvalidConfig(format!(
                "minimum grid size {} exceeds maximum grid size {}",
                self.min_grid_size, self.max_grid_size
            )));
        }
        // Keeps every cell index representable as a u32
        if self.max_grid_size > u16::MAX as u32 {
            return Err(ServerError::InvalidConfig(format!(
                "maximum grid size {} is too large",
                self.max_grid_size
            )));
        }
        if self.starting_score <= 0 {
            return Err(ServerError::InvalidConfig(
                "starting score must be positive".to_string(),
            ));
        }
        if self.min_players == 0 {
            return Err(ServerError::InvalidConfig(
                "minimum player count must be at least 1".to_string(),
            ));
        }
        if self.guess_timeout == Some(Duration::ZERO) {
            return Err(ServerError::InvalidConfig(
                "guess timeout must be longer than zero".to_string(),
            ));
        }
        Ok(())
    }
}
