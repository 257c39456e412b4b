use clap::Parser;
use client::network::Client;
use log::info;
use shared::SERVER_PORT;

/// Headless client driver: connects, then feeds idle inputs through the
/// session loop until interrupted.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to connect to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port
        #[clap(short, long, default_value_t = SERVER_PORT)]
        port: u16,
        /// Player name sent in the connect request
        #[clap(short, long, default_value = "player")]
        name: String,
    }

    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let mut client = Client::new(&address, &args.name).await?;

    let interrupted = tokio::select! {
        result = client.run() => {
            result?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        info!("Received Ctrl+C, disconnecting...");
        client.disconnect().await;
    }

    Ok(())
}
