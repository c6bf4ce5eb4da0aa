//! WHOHAS/IHAVE/GET/DENIED discovery and source selection (§4.6).
//!
//! Grounded structurally on `sauoro-amethyst`'s
//! `raknet::protocol::mod` multi-step offline handshake (each step a free
//! function taking the shared state and replying based on request contents);
//! no RakNet opcodes survive, only the "one function per inbound packet
//! type, called from the event loop's dispatch" shape.

use crate::packet::{chunk_hashes, Hash, Packet};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub const RETRY_WINDOW: Duration = Duration::from_secs(2);
pub const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPlanStatus {
    InProgress,
    Failed,
}

/// Tracks one user `DOWNLOAD` request from WHOHAS broadcast through to every
/// hash being assigned a source (or the plan giving up after `MAX_RETRIES`).
pub struct DownloadPlan {
    pub output_path: std::path::PathBuf,
    pub ordered_hashes: Vec<Hash>,
    unassigned: HashSet<Hash>,
    assigned: HashMap<Hash, SocketAddr>,
    retries: u32,
    last_broadcast: Instant,
    pub status: DownloadPlanStatus,
}

impl DownloadPlan {
    pub fn new(output_path: std::path::PathBuf, missing: Vec<Hash>, now: Instant) -> Self {
        Self {
            output_path,
            unassigned: missing.iter().copied().collect(),
            ordered_hashes: missing,
            assigned: HashMap::new(),
            retries: 0,
            last_broadcast: now,
            status: DownloadPlanStatus::InProgress,
        }
    }

    pub fn is_done(&self) -> bool {
        self.unassigned.is_empty()
    }

    pub fn unassigned(&self) -> &HashSet<Hash> {
        &self.unassigned
    }

    /// Builds the WHOHAS packets to broadcast for the currently-unassigned
    /// subset, split across multiple packets if it overflows one datagram
    /// (§4.6 step 2/6).
    pub fn who_has_packets(&self) -> Vec<Packet> {
        let hashes: Vec<Hash> = self.unassigned.iter().copied().collect();
        chunk_hashes(&hashes)
            .map(|chunk| Packet::who_has(chunk.to_vec()))
            .collect()
    }

    /// §4.6 step 4: the first announcer for a hash wins; later IHAVEs for an
    /// already-assigned hash are ignored.
    pub fn record_ihave(&mut self, from: SocketAddr, hashes: &[Hash]) {
        for hash in hashes {
            if self.unassigned.remove(hash) {
                self.assigned.insert(*hash, from);
            }
        }
    }

    /// A DENIED retracts a provisional assignment if it came from the peer
    /// that currently holds it (§4.6 step 4 / §7).
    pub fn record_denied(&mut self, from: SocketAddr, hashes: &[Hash]) {
        for hash in hashes {
            if self.assigned.get(hash) == Some(&from) {
                self.assigned.remove(hash);
                self.unassigned.insert(*hash);
            }
        }
    }

    /// Re-enters handshake for a hash whose download turned out corrupt or
    /// timed out after it had already left this plan's assignment tracking
    /// (§7: "Hash mismatch on completed chunk" / "Retransmission-timeout
    /// storm"). No-op if this plan doesn't own the hash.
    pub fn reopen(&mut self, hash: Hash) {
        if self.ordered_hashes.contains(&hash) {
            self.assigned.remove(&hash);
            self.unassigned.insert(hash);
            if self.status == DownloadPlanStatus::Failed {
                self.status = DownloadPlanStatus::InProgress;
                self.retries = 0;
            }
        }
    }

    /// Hashes newly assigned a source since the last call — drains the
    /// assignment map of entries the caller hasn't issued a GET for yet.
    pub fn take_new_assignments(&mut self) -> Vec<(Hash, SocketAddr)> {
        std::mem::take(&mut self.assigned).into_iter().collect()
    }

    /// Should the still-unassigned subset be re-broadcast (§4.6 step 6)?
    /// Returns `false` once `MAX_RETRIES` is exhausted, setting the plan to
    /// `Failed`.
    pub fn retry_due(&mut self, now: Instant) -> bool {
        if self.unassigned.is_empty() {
            return false;
        }
        if now.duration_since(self.last_broadcast) < RETRY_WINDOW {
            return false;
        }
        if self.retries >= MAX_RETRIES {
            self.status = DownloadPlanStatus::Failed;
            return false;
        }
        self.retries += 1;
        self.last_broadcast = now;
        true
    }
}

/// Responder-side: how to reply to an inbound WHOHAS (§4.6 step 3).
pub enum WhoHasReply {
    /// Reply IHAVE listing these locally-held hashes from the request.
    IHave(Vec<Hash>),
    /// Reply DENIED for these locally-held-but-at-capacity hashes.
    Denied(Vec<Hash>),
    /// No overlap with the local store: stay silent.
    NoOverlap,
}

/// Decides how to answer a WHOHAS given the local store's intersection with
/// the request and whether this peer currently has upload capacity.
pub fn answer_who_has(held: Vec<Hash>, has_capacity: bool) -> WhoHasReply {
    if held.is_empty() {
        WhoHasReply::NoOverlap
    } else if has_capacity {
        WhoHasReply::IHave(held)
    } else {
        WhoHasReply::Denied(held)
    }
}

/// Responder-side: how to reply to an inbound GET (§4.6, responder half).
pub enum GetReply {
    /// Begin streaming: this peer holds the hash and has capacity.
    Admit,
    /// This peer does not hold the requested hash.
    UnknownHash,
    /// This peer holds it but is at capacity, or already serving a
    /// different chunk to this same remote (§4.7).
    AtCapacity,
}

pub fn answer_get(holds_hash: bool, can_admit: bool) -> GetReply {
    if !holds_hash {
        GetReply::UnknownHash
    } else if can_admit {
        GetReply::Admit
    } else {
        GetReply::AtCapacity
    }
}
