use crate::utils::binary::BinaryError;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by the peer's top-level orchestration (event loop, handshake,
/// connection table). Per-layer errors (`BinaryError`, `ConfigError`) compose in
/// via `#[from]` rather than being re-stringified.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("network I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("packet codec error: {0}")]
    Codec(#[from] BinaryError),

    #[error("no peer in the roster holds any of the requested hashes")]
    NoSourceFound,

    #[error("unknown peer id {0} in roster")]
    UnknownPeer(u32),

    #[error("peer {0} is not in the roster")]
    UnknownAddress(SocketAddr),

    #[error("download of {0} hashes failed after exhausting handshake retries")]
    HandshakeExhausted(usize),

    #[error("chunkhash file or fragment file error: {0}")]
    File(#[from] crate::files::FileError),
}

pub type Result<T> = std::result::Result<T, PeerError>;
