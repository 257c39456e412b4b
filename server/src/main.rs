use clap::Parser;
use log::{error, info};
use server::game::ArenaWorld;
use server::network::{Server, ServerConfig};
use shared::{MAX_CLIENTS, SERVER_PORT, TARGET_FPS, TICK_RATE};

/// Parses command-line arguments, binds the socket, and runs the session
/// loop until interrupted.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value_t = SERVER_PORT)]
        port: u16,
        /// Maximum simultaneous clients
        #[clap(short, long, default_value_t = MAX_CLIENTS)]
        max_clients: usize,
        /// Simulation rate (ticks per second)
        #[clap(long, default_value_t = TARGET_FPS)]
        sim_rate: f64,
        /// State broadcast rate (ticks per second)
        #[clap(long, default_value_t = TICK_RATE)]
        net_rate: f64,
    }

    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        max_clients: args.max_clients,
        sim_rate: args.sim_rate,
        net_rate: args.net_rate,
        ..ServerConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let world = ArenaWorld::new(args.max_clients);
    let mut server = match Server::bind(&address, config, world).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}: {}", address, e);
            return Err(e);
        }
    };

    // Handle shutdown gracefully
    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
