//! Per-download reassembly and cumulative-ACK generation (§4.5).
//!
//! Grounded on `nickspiker-photon`'s
//! `network::pt::buffer::ReceiveBuffer` (pre-allocated `Vec<u8>` sized from
//! the expected total, `insert`/`is_complete`/`verify` shape), adapted from
//! its selective/bitmap reassembly model to strict Go-Back-N: a packet is
//! only accepted if its sequence equals the expected next sequence, and out-
//! of-order arrivals are discarded rather than buffered out of band (matching
//! `sauoro-amethyst`'s `reliability::receive_window`'s
//! `while received.contains(expected) { expected += 1 }` advancement, but
//! without its selective-ACK bookkeeping since this protocol only ever ACKs
//! cumulatively).

use crate::packet::{Hash, MSS};
use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use std::time::Instant;

pub const CHUNK_SIZE: usize = 524_288;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Transferring,
    Complete,
    Failed,
}

/// Outcome of feeding a DATA packet into a `DownloadState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    /// In-order: buffered, ACK the new sequence.
    Accepted { ack: u32 },
    /// Out-of-order (early or a replay): discarded, ACK the last good sequence.
    Duplicate { ack: u32 },
    /// This was the final packet and the assembled bytes hashed correctly.
    CompleteVerified { ack: u32 },
    /// This was the final packet but the hash did not match.
    CompleteCorrupt { ack: u32 },
}

pub struct DownloadState {
    pub target_hash: Hash,
    pub source: SocketAddr,
    total_packets: u32,
    expected_seq: u32,
    buffer: Vec<u8>,
    pub status: DownloadStatus,
    pub start_time: Instant,
    last_activity: Instant,
}

impl DownloadState {
    pub fn new(target_hash: Hash, source: SocketAddr, now: Instant) -> Self {
        Self {
            target_hash,
            source,
            total_packets: CHUNK_SIZE.div_ceil(MSS).max(1) as u32,
            expected_seq: 1,
            buffer: Vec::with_capacity(CHUNK_SIZE),
            status: DownloadStatus::Transferring,
            start_time: now,
            last_activity: now,
        }
    }

    /// Last good cumulative ACK value: `expected_seq - 1`.
    pub fn last_ack(&self) -> u32 {
        self.expected_seq - 1
    }

    /// Feeds one DATA(seq, payload) packet in (§4.5).
    pub fn on_data(&mut self, seq: u32, payload: &[u8]) -> DataOutcome {
        if seq != self.expected_seq {
            return DataOutcome::Duplicate {
                ack: self.last_ack(),
            };
        }

        self.buffer.extend_from_slice(payload);
        self.expected_seq += 1;

        if self.expected_seq > self.total_packets {
            self.status = if self.verify() {
                DownloadStatus::Complete
            } else {
                DownloadStatus::Failed
            };
            return match self.status {
                DownloadStatus::Complete => DataOutcome::CompleteVerified { ack: seq },
                _ => DataOutcome::CompleteCorrupt { ack: seq },
            };
        }

        DataOutcome::Accepted { ack: seq }
    }

    fn verify(&self) -> bool {
        if self.buffer.len() != CHUNK_SIZE {
            return false;
        }
        let mut hasher = Sha1::new();
        hasher.update(&self.buffer);
        let digest: [u8; 20] = hasher.finalize().into();
        digest == self.target_hash
    }

    pub fn is_complete(&self) -> bool {
        self.status == DownloadStatus::Complete
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// No DATA has advanced this download in at least `timeout` — candidate
    /// for the "retransmission-timeout storm" abandonment path (§5/§7),
    /// mirrored on the receive side since this protocol has no receiver-
    /// initiated retransmission timer of its own.
    pub fn is_stale(&self, now: Instant, timeout: std::time::Duration) -> bool {
        now.duration_since(self.last_activity) >= timeout
    }
}
