// src/main.rs
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod congestion;
pub mod connection;
pub mod error;
pub mod files;
pub mod handshake;
pub mod packet;
pub mod peer;
pub mod receiver;
pub mod rtt;
pub mod sender;
pub mod store;
pub mod transport;
pub mod utils;

pub use utils::binary::{BinaryReader, BinaryWritter};

use config::Config;
use peer::Peer;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::parse(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!(
                "usage: chunkpeer -p <roster-file> -c <fragment-file> -m <max-send> -i <identity> [-t <timeout-secs>] [-v <0-3>]"
            );
            return std::process::ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.tracing_level().to_string())),
        )
        .init();

    let mut peer = match Peer::bind(&config).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to start peer");
            return std::process::ExitCode::FAILURE;
        }
    };

    tracing::info!(addr = %peer.local_addr(), "peer started");

    if let Err(e) = peer.run().await {
        tracing::error!(error = %e, "peer terminated on unrecoverable I/O error");
        return std::process::ExitCode::FAILURE;
    }

    std::process::ExitCode::SUCCESS
}
