//! Integration tests for the game server
//!
//! These tests run a real server on an ephemeral port and drive it with
//! framed TCP clients, covering whole rounds from ready-gating to shutdown.

use server::config::ServerConfig;
use server::game::{
    Phase, GAME_IN_PROGRESS_MESSAGE, LOST_MESSAGE, SHUTDOWN_MESSAGE, WINNER_MESSAGE,
};
use server::network::{Server, ServerHandle};
use shared::{cell_of, position_of, read_packet, write_packet, ClientPacket, ServerPacket};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        min_grid_size: 4,
        max_grid_size: 4,
        result_delay: Duration::from_millis(50),
        ..ServerConfig::default()
    }
}

async fn start_server(
    config: ServerConfig,
) -> (SocketAddr, ServerHandle, JoinHandle<Result<(), server::error::ServerError>>) {
    let server = Server::bind(config).await.expect("server should bind");
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    let task = tokio::spawn(server.run());
    (addr, handle, task)
}

/// A cell two rows away from the target on a 4x4 grid
fn far_from(target: u32) -> u32 {
    let (row, col) = cell_of(target, 4);
    position_of((row + 2) % 4, col, 4)
}

struct TestPlayer {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl TestPlayer {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let (reader, writer) = stream.into_split();
        TestPlayer { reader, writer }
    }

    /// Connects and registers, waiting for the welcome message
    async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut player = Self::connect(addr).await;
        player
            .send(ClientPacket::RegisterName {
                name: name.to_string(),
            })
            .await;
        match player.recv().await {
            Some(ServerPacket::Info { message }) => assert!(message.contains(name)),
            other => panic!("Expected welcome, got {:?}", other),
        }
        player
    }

    async fn send(&mut self, packet: ClientPacket) {
        write_packet(&mut self.writer, &packet)
            .await
            .expect("send failed");
    }

    async fn recv(&mut self) -> Option<ServerPacket> {
        timeout(WAIT, read_packet(&mut self.reader))
            .await
            .expect("timed out waiting for packet")
            .expect("read failed")
    }

    /// Skips packets until `pick` accepts one
    async fn recv_until<T>(&mut self, mut pick: impl FnMut(ServerPacket) -> Option<T>) -> T {
        loop {
            match self.recv().await {
                Some(packet) => {
                    if let Some(value) = pick(packet) {
                        return value;
                    }
                }
                None => panic!("connection closed before the expected packet"),
            }
        }
    }

    async fn round_started(&mut self) -> (u32, u32) {
        self.recv_until(|packet| match packet {
            ServerPacket::RoundStarted {
                round,
                target_position,
                ..
            } => Some((round, target_position)),
            _ => None,
        })
        .await
    }

    async fn scores(&mut self) -> BTreeMap<String, i32> {
        self.recv_until(|packet| match packet {
            ServerPacket::Scores { scores, .. } => Some(scores),
            _ => None,
        })
        .await
    }

    /// Drains packets until the server closes the connection
    async fn remaining(&mut self) -> Vec<ServerPacket> {
        let mut received = Vec::new();
        while let Some(packet) = self.recv().await {
            received.push(packet);
        }
        received
    }
}

/// Joins three players and starts the first round, returning the target
async fn start_round(addr: SocketAddr) -> (Vec<TestPlayer>, u32) {
    let mut players = Vec::new();
    for name in ["alice", "bob", "carol"] {
        players.push(TestPlayer::join(addr, name).await);
    }
    for player in players.iter_mut() {
        player.send(ClientPacket::Ready).await;
    }

    let mut target = None;
    for player in players.iter_mut() {
        let (round, position) = player.round_started().await;
        assert_eq!(round, 1);
        target = Some(position);
    }
    (players, target.unwrap())
}

/// ROUND FLOW TESTS
mod round_tests {
    use super::*;

    /// Plays a single round where two players run out of lives
    #[tokio::test]
    async fn full_game_until_winner() {
        let config = ServerConfig {
            starting_score: 1,
            ..test_config()
        };
        let (addr, handle, task) = start_server(config).await;
        let (mut players, target) = start_round(addr).await;

        players[0].send(ClientPacket::Guess { position: target }).await;
        players[1]
            .send(ClientPacket::Guess {
                position: far_from(target),
            })
            .await;
        players[2]
            .send(ClientPacket::Guess {
                position: far_from(target),
            })
            .await;

        for player in players.iter_mut() {
            let scores = player.scores().await;
            assert_eq!(scores.get("alice"), Some(&11));
            assert_eq!(scores.get("bob"), Some(&0));
            assert_eq!(scores.get("carol"), Some(&0));
        }

        assert_eq!(
            players[0].remaining().await,
            vec![
                ServerPacket::game_ended(WINNER_MESSAGE),
                ServerPacket::info(SHUTDOWN_MESSAGE)
            ]
        );
        for player in players.iter_mut().skip(1) {
            assert_eq!(
                player.remaining().await,
                vec![ServerPacket::game_ended(LOST_MESSAGE)]
            );
        }

        timeout(WAIT, task)
            .await
            .expect("server should stop")
            .unwrap()
            .unwrap();
        assert!(handle.is_shut_down());
        assert_eq!(handle.state().lock().await.phase, Phase::Terminated);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    /// Survivors go back to the lobby and can start another round
    #[tokio::test]
    async fn second_round_after_scores() {
        let (addr, _handle, _task) = start_server(test_config()).await;
        let (mut players, target) = start_round(addr).await;

        for player in players.iter_mut() {
            player
                .send(ClientPacket::Guess {
                    position: far_from(target),
                })
                .await;
        }
        for player in players.iter_mut() {
            let scores = player.scores().await;
            assert!(scores.values().all(|lives| *lives == 9));
            player.send(ClientPacket::Ready).await;
        }

        for player in players.iter_mut() {
            let (round, _) = player.round_started().await;
            assert_eq!(round, 2);
        }
    }

    /// A player leaving mid-round does not block scoring
    #[tokio::test]
    async fn disconnect_mid_round_completes_guessing() {
        let (addr, handle, _task) = start_server(test_config()).await;
        let (mut players, target) = start_round(addr).await;

        let carol = players.pop().unwrap();
        players[0].send(ClientPacket::Guess { position: target }).await;
        players[1].send(ClientPacket::Guess { position: target }).await;
        drop(carol);

        let scores = players[0].scores().await;
        assert_eq!(scores.len(), 2);
        assert_eq!(scores.get("alice"), Some(&20));
        assert!(!scores.contains_key("carol"));
        assert_eq!(handle.state().lock().await.clients.len(), 2);
    }

    /// Stragglers are scored as a miss once the guess timeout expires
    #[tokio::test]
    async fn guess_timeout_scores_stragglers() {
        let config = ServerConfig {
            guess_timeout: Some(Duration::from_millis(100)),
            ..test_config()
        };
        let (addr, _handle, _task) = start_server(config).await;
        let (mut players, target) = start_round(addr).await;

        players[0].send(ClientPacket::Guess { position: target }).await;

        let scores = players[1].scores().await;
        assert_eq!(scores.get("alice"), Some(&20));
        assert_eq!(scores.get("bob"), Some(&9));
        assert_eq!(scores.get("carol"), Some(&9));
    }
}

/// CONNECTION AND CHAT TESTS
mod session_tests {
    use super::*;

    /// Connections made while a round is running are turned away
    #[tokio::test]
    async fn connection_refused_during_round() {
        let (addr, handle, _task) = start_server(test_config()).await;
        let (_players, _target) = start_round(addr).await;

        let mut late = TestPlayer::connect(addr).await;
        assert_eq!(
            late.remaining().await,
            vec![ServerPacket::info(GAME_IN_PROGRESS_MESSAGE)]
        );
        assert_eq!(handle.state().lock().await.clients.len(), 3);
    }

    /// A fourth player who is not ready keeps the lobby waiting
    #[tokio::test]
    async fn unready_player_blocks_first_round() {
        let (addr, handle, _task) = start_server(test_config()).await;

        let mut players = Vec::new();
        for name in ["alice", "bob", "carol", "dave"] {
            players.push(TestPlayer::join(addr, name).await);
        }
        for player in players.iter_mut().take(3) {
            player.send(ClientPacket::Ready).await;
        }
        // Round trip a chat line so the ready packets are processed
        players[0]
            .send(ClientPacket::Chat {
                text: "waiting on dave".to_string(),
            })
            .await;
        players[0]
            .recv_until(|packet| match packet {
                ServerPacket::Chat { .. } => Some(()),
                _ => None,
            })
            .await;
        assert_eq!(handle.state().lock().await.phase, Phase::Lobby);

        players[3].send(ClientPacket::Ready).await;
        let (round, _) = players[3].round_started().await;
        assert_eq!(round, 1);
    }

    /// Chat updates carry only the ten most recent lines
    #[tokio::test]
    async fn chat_history_is_capped() {
        let (addr, _handle, _task) = start_server(test_config()).await;
        let mut alice = TestPlayer::join(addr, "alice").await;
        let mut bob = TestPlayer::join(addr, "bob").await;

        for i in 0..15 {
            alice
                .send(ClientPacket::Chat {
                    text: format!("message {}", i),
                })
                .await;
        }

        for player in [&mut alice, &mut bob] {
            let history = player
                .recv_until(|packet| match packet {
                    ServerPacket::Chat { history }
                        if history.last().map(String::as_str) == Some("alice: message 14") =>
                    {
                        Some(history)
                    }
                    _ => None,
                })
                .await;
            assert_eq!(history.len(), 10);
            assert_eq!(history[0], "alice: message 5");
        }
    }

    /// Oversized chat lines are refused without disturbing anyone's session
    #[tokio::test]
    async fn long_chat_messages_keep_everyone_connected() {
        let (addr, handle, _task) = start_server(test_config()).await;
        let mut alice = TestPlayer::join(addr, "alice").await;
        let mut bob = TestPlayer::join(addr, "bob").await;

        for _ in 0..10 {
            alice
                .send(ClientPacket::Chat {
                    text: "a".repeat(8000),
                })
                .await;
        }
        for _ in 0..10 {
            match alice.recv().await {
                Some(ServerPacket::Info { message }) => assert!(message.contains("limited")),
                other => panic!("Expected refusal, got {:?}", other),
            }
        }

        alice
            .send(ClientPacket::Chat {
                text: "hi".to_string(),
            })
            .await;
        let expected = ServerPacket::Chat {
            history: vec!["alice: hi".to_string()],
        };
        assert_eq!(alice.recv().await, Some(expected.clone()));
        assert_eq!(bob.recv().await, Some(expected));
        assert_eq!(handle.state().lock().await.clients.len(), 2);
    }

    /// Duplicate names are refused but the session stays usable
    #[tokio::test]
    async fn duplicate_name_is_refused() {
        let (addr, handle, _task) = start_server(test_config()).await;
        let _alice = TestPlayer::join(addr, "alice").await;

        let mut impostor = TestPlayer::connect(addr).await;
        impostor
            .send(ClientPacket::RegisterName {
                name: "alice".to_string(),
            })
            .await;
        match impostor.recv().await {
            Some(ServerPacket::Info { message }) => assert!(message.contains("taken")),
            other => panic!("Expected refusal, got {:?}", other),
        }
        assert_eq!(handle.state().lock().await.clients.len(), 1);

        impostor
            .send(ClientPacket::RegisterName {
                name: "alice2".to_string(),
            })
            .await;
        assert!(matches!(
            impostor.recv().await,
            Some(ServerPacket::Info { .. })
        ));
        assert_eq!(handle.state().lock().await.clients.len(), 2);
    }
}
