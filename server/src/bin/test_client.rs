//! Headless bot that plays the game over the real wire protocol.
//!
//! Registers a name, signals ready, guesses a random cell every round and
//! signals ready again once the scores are in. Useful for filling a lobby
//! while testing a graphical client.

use clap::Parser;
use log::{info, warn};
use rand::Rng;
use shared::{read_packet, write_packet, ClientPacket, ServerPacket};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:10002")]
    server: String,

    /// Display name to register with
    #[arg(short, long, default_value = "bot")]
    name: String,

    /// Milliseconds to "think" before each guess
    #[arg(short, long, default_value = "500")]
    think_ms: u64,

    /// Chat line to send once registered
    #[arg(short, long)]
    greeting: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    info!("Connected to {}", args.server);
    let (mut reader, mut writer) = stream.into_split();

    let register = ClientPacket::RegisterName {
        name: args.name.clone(),
    };
    write_packet(&mut writer, &register).await?;
    if let Some(text) = &args.greeting {
        let chat = ClientPacket::Chat { text: text.clone() };
        write_packet(&mut writer, &chat).await?;
    }
    write_packet(&mut writer, &ClientPacket::Ready).await?;

    while let Some(packet) = read_packet::<_, ServerPacket>(&mut reader).await? {
        match packet {
            ServerPacket::Info { message } => info!("[info] {}", message),
            ServerPacket::Chat { history } => {
                if let Some(line) = history.last() {
                    info!("[chat] {}", line);
                }
            }
            ServerPacket::RoundStarted {
                round, grid_size, ..
            } => {
                sleep(Duration::from_millis(args.think_ms)).await;
                let position = rand::thread_rng().gen_range(0..grid_size * grid_size);
                info!(
                    "Round {} on a {}x{} grid, guessing cell {}",
                    round, grid_size, grid_size, position
                );
                write_packet(&mut writer, &ClientPacket::Guess { position }).await?;
            }
            ServerPacket::Scores {
                scores,
                target_position,
            } => {
                info!("The cat was in cell {}", target_position);
                for (name, lives) in &scores {
                    info!("  {}: {}", name, lives);
                }
                write_packet(&mut writer, &ClientPacket::Ready).await?;
            }
            ServerPacket::GameEnded { message } => {
                warn!("[game over] {}", message);
            }
        }
    }

    info!("Server closed the connection");
    Ok(())
}
