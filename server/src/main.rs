use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "10002")]
    port: u16,

    /// Smallest grid side length a round may use
    #[arg(long, default_value = "3")]
    min_grid: u32,

    /// Largest grid side length a round may use
    #[arg(long, default_value = "10")]
    max_grid: u32,

    /// Lives every player starts with
    #[arg(short, long, default_value = "10")]
    starting_score: i32,

    /// Players needed before the first round can start
    #[arg(long, default_value = "3")]
    min_players: usize,

    /// Milliseconds the scores stay on screen before eliminations
    #[arg(long, default_value = "3000")]
    result_delay_ms: u64,

    /// Seconds players get to guess; unset waits forever
    #[arg(long)]
    guess_timeout_secs: Option<u64>,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            min_grid_size: args.min_grid,
            max_grid_size: args.max_grid,
            starting_score: args.starting_score,
            min_players: args.min_players,
            result_delay: Duration::from_millis(args.result_delay_ms),
            guess_timeout: args.guess_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Parses command-line arguments, then runs the server until the game ends.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig::from(args);

    info!(
        "Grid size {}..={}, {} lives per player",
        config.min_grid_size, config.max_grid_size, config.starting_score
    );

    let server = Server::bind(config).await?;
    let handle = server.handle();
    let run = server.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown().await;
            run.await?;
        }
    }

    Ok(())
}
