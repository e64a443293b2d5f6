//! Runtime configuration for the server

use clap::ValueEnum;
use shared::{DEFAULT_PORT, DEFAULT_STATE_FILE};
use std::path::PathBuf;

/// Which protocol the server speaks on its connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Mode {
    /// Authoritative shared state with persistence and relay of mutations
    #[default]
    Sync,
    /// Peer-to-peer signaling relay, no state
    Signaling,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the durable state file
    pub data_dir: PathBuf,
    pub state_file: String,
    pub max_clients: usize,
    pub mode: Mode,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("."),
            state_file: DEFAULT_STATE_FILE.to_string(),
            max_clients: 256,
            mode: Mode::Sync,
        }
    }
}
