//! Server network layer: accepting connections and running player sessions

use crate::client_manager::{ClientId, Outbound, OutboundSender};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::game::{Action, GameState, GAME_IN_PROGRESS_MESSAGE, REGISTER_FIRST_MESSAGE};
use log::{debug, error, info, warn};
use shared::{read_packet, write_packet, ClientPacket, FrameError, ServerPacket};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

/// How long sessions get to flush their last packets after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Shared access to the game for sessions, timers and the acceptor
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<Mutex<GameState>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    fn new(state: GameState) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(state)),
            shutdown: Arc::new(shutdown),
        }
    }

    /// The game behind its lock. Hold the guard only for short, non-blocking work.
    pub fn state(&self) -> Arc<Mutex<GameState>> {
        Arc::clone(&self.state)
    }

    /// True once the game has ended and the acceptor was told to stop.
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Ends the game: notifies every player and stops the acceptor.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shutdown();
        self.apply_actions(&mut state);
    }

    /// Runs the side effects the game queued. Called with the lock held.
    fn apply_actions(&self, state: &mut GameState) {
        for action in state.take_actions() {
            match action {
                Action::ScheduleEndCheck { round } => {
                    let delay = state.config.result_delay;
                    self.schedule(delay, move |state| state.end_check(round));
                }
                Action::ScheduleGuessDeadline { round } => {
                    if let Some(delay) = state.config.guess_timeout {
                        self.schedule(delay, move |state| state.guess_deadline(round));
                    }
                }
                Action::Shutdown => {
                    self.shutdown.send_replace(true);
                }
            }
        }
    }

    /// Runs `task` against the game after `delay` unless the server stops first.
    fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce(&mut GameState) + Send + 'static,
    {
        let handle = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {
                    let mut state = handle.state.lock().await;
                    task(&mut *state);
                    handle.apply_actions(&mut state);
                }
                _ = shutdown_rx.changed() => {
                    debug!("Scheduled task cancelled by shutdown");
                }
            }
        });
    }
}

/// TCP game server: one acceptor loop plus a reader and writer task per player
pub struct Server {
    listener: TcpListener,
    handle: ServerHandle,
}

impl Server {
    /// Validates the configuration and binds the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            handle: ServerHandle::new(GameState::new(config)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Accepts connections until the game ends, then waits briefly for
    /// sessions to deliver their final packets.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut shutdown_rx = self.handle.shutdown.subscribe();
        let mut sessions = JoinSet::new();

        info!("Server started successfully");

        while !*shutdown_rx.borrow() {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => Some(accepted),
                Some(_) = sessions.join_next(), if !sessions.is_empty() => None,
                _ = shutdown_rx.changed() => None,
            };

            match accepted {
                Some(Ok((stream, addr))) => self.admit(stream, addr, &mut sessions).await,
                Some(Err(e)) => {
                    error!("Error accepting connection: {}", e);
                    sleep(Duration::from_millis(10)).await;
                }
                None => {}
            }
        }

        drop(self.listener);
        info!("Listener closed, waiting for sessions to finish");

        let drained = timeout(SHUTDOWN_GRACE, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Some sessions did not finish in time");
        }

        info!("Server stopped");
        Ok(())
    }

    async fn admit(&self, stream: TcpStream, addr: SocketAddr, sessions: &mut JoinSet<()>) {
        let client_id = self.handle.state.lock().await.admit_connection();

        match client_id {
            Some(client_id) => {
                info!("Client {} connected from {}", client_id, addr);
                sessions.spawn(handle_connection(
                    self.handle.clone(),
                    stream,
                    addr,
                    client_id,
                ));
            }
            None => {
                info!("Refusing connection from {}: game in progress", addr);
                sessions.spawn(reject_connection(stream));
            }
        }
    }
}

async fn reject_connection(mut stream: TcpStream) {
    let packet = ServerPacket::info(GAME_IN_PROGRESS_MESSAGE);
    if let Err(e) = write_packet(&mut stream, &packet).await {
        debug!("Failed to send rejection: {}", e);
    }
    let _ = stream.shutdown().await;
}

/// Reads packets from one connection until it ends, then removes the player.
async fn handle_connection(
    handle: ServerHandle,
    stream: TcpStream,
    addr: SocketAddr,
    client_id: ClientId,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for client {}: {}", client_id, e);
    }
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let (closed_tx, mut closed_rx) = oneshot::channel();
    let writer_task = tokio::spawn(write_loop(writer, rx, closed_tx, client_id));
    let mut shutdown_rx = handle.shutdown.subscribe();

    while !*shutdown_rx.borrow() {
        let result = tokio::select! {
            result = read_packet::<_, ClientPacket>(&mut reader) => result,
            _ = &mut closed_rx => {
                debug!("Writer for client {} stopped", client_id);
                break;
            }
            _ = shutdown_rx.changed() => break,
        };

        match result {
            Ok(None) | Ok(Some(ClientPacket::Disconnect)) => {
                info!("Client {} disconnected", client_id);
                break;
            }
            Ok(Some(packet)) => {
                debug!("Client {} sent {:?}", client_id, packet);
                let mut state = handle.state.lock().await;
                dispatch(&mut state, client_id, addr, &tx, packet);
                handle.apply_actions(&mut state);
            }
            Err(FrameError::Json(e)) => {
                warn!("Malformed packet from client {}: {}", client_id, e);
                break;
            }
            Err(e) => {
                debug!("Connection to client {} failed: {}", client_id, e);
                break;
            }
        }
    }

    {
        let mut state = handle.state.lock().await;
        state.remove_player(client_id);
        handle.apply_actions(&mut state);
    }

    let _ = tx.send(Outbound::Close);
    if let Err(e) = writer_task.await {
        error!("Writer task for client {} panicked: {}", client_id, e);
    }
}

/// Routes one packet from `client_id` to the game.
fn dispatch(
    state: &mut GameState,
    client_id: ClientId,
    addr: SocketAddr,
    tx: &OutboundSender,
    packet: ClientPacket,
) {
    let reply = |message: String| {
        let _ = tx.send(Outbound::Packet(ServerPacket::info(message)));
    };

    match packet {
        ClientPacket::RegisterName { name } => {
            if let Err(e) = state.register_player(client_id, &name, addr, tx.clone()) {
                info!("Registration refused for client {}: {}", client_id, e);
                reply(e.to_string());
            }
        }
        _ if !state.clients.contains(&client_id) => {
            reply(REGISTER_FIRST_MESSAGE.to_string());
        }
        ClientPacket::Ready => state.set_ready(client_id),
        ClientPacket::Guess { position } => state.submit_guess(client_id, position),
        ClientPacket::Chat { text } => state.post_chat(client_id, &text),
        ClientPacket::Disconnect => state.remove_player(client_id),
    }
}

/// Writes queued packets until asked to close or the connection fails.
async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    closed_tx: oneshot::Sender<()>,
    client_id: ClientId,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Packet(packet) => {
                if let Err(e) = write_packet(&mut writer, &packet).await {
                    warn!("Failed to send to client {}: {}", client_id, e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    let _ = writer.shutdown().await;
    let _ = closed_tx.send(());
}
