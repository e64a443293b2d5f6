use clap::Parser;
use log::{error, info};
use server::config::{Mode, ServerConfig};
use server::network::Server;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Directory holding the state file
    #[arg(short, long, env = "SYNC_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Name of the state file inside the data directory
    #[arg(long, default_value = shared::DEFAULT_STATE_FILE)]
    state_file: String,

    /// Maximum number of concurrent connections
    #[arg(short, long, default_value = "256")]
    max_clients: usize,

    /// Protocol to serve
    #[arg(long, value_enum, default_value_t = Mode::Sync)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        data_dir: args.data_dir,
        state_file: args.state_file,
        max_clients: args.max_clients,
        mode: args.mode,
    };

    info!("Starting server on {} in {:?} mode", config.address(), config.mode);
    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
