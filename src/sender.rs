//! Per-upload sliding-window sender (§4.4): splits a chunk into MSS-sized
//! DATA packets, drives them under the Reno congestion controller, and
//! handles ACK/duplicate-ACK/timeout transitions.
//!
//! Grounded on `sauoro-amethyst`'s
//! `reliability::send_window::SendWindow` — specifically its
//! `pending_datagrams: BTreeMap<u32, (Datagram, Instant, bool)>` shape,
//! reused here as `inflight: BTreeMap<u32, InFlight>` (seq -> send time +
//! "was this seq retransmitted" flag feeding Karn's rule).

use crate::congestion::{AckAction, CongestionController};
use crate::packet::{Packet, MSS};
use crate::rtt::RttEstimator;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Transferring,
    Complete,
}

#[derive(Debug, Clone)]
struct InFlight {
    sent_at: Instant,
    retransmitted: bool,
}

/// State for one in-progress outbound chunk transfer to one remote peer.
pub struct UploadState {
    pub chunk_hash: [u8; 20],
    pub remote: SocketAddr,
    chunk: Bytes,
    total_packets: u32,
    base: u32,
    next_seq: u32,
    inflight: BTreeMap<u32, InFlight>,
    congestion: CongestionController,
    rtt: RttEstimator,
    deadline: Option<Instant>,
    status: UploadStatus,
}

impl UploadState {
    pub fn new(chunk_hash: [u8; 20], remote: SocketAddr, chunk: Bytes) -> Self {
        let total_packets = chunk.len().div_ceil(MSS).max(1) as u32;
        Self {
            chunk_hash,
            remote,
            chunk,
            total_packets,
            base: 1,
            next_seq: 1,
            inflight: BTreeMap::new(),
            congestion: CongestionController::new(),
            rtt: RttEstimator::new(),
            deadline: None,
            status: UploadStatus::Transferring,
        }
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn packet_bytes(&self, seq: u32) -> Bytes {
        let start = (seq as usize - 1) * MSS;
        let end = (start + MSS).min(self.chunk.len());
        self.chunk.slice(start..end)
    }

    /// Step 1 of §4.4: while in-flight < window and data remains, emit DATA
    /// packets. Returns the packets to send on the wire, in order.
    pub fn fill_window(&mut self, now: Instant) -> Vec<Packet> {
        let mut out = Vec::new();
        let window = self.congestion.window();
        while self.next_seq - self.base < window && self.next_seq <= self.total_packets {
            let seq = self.next_seq;
            out.push(Packet::data(seq, self.packet_bytes(seq)));
            self.inflight.insert(
                seq,
                InFlight {
                    sent_at: now,
                    retransmitted: false,
                },
            );
            if self.deadline.is_none() {
                self.deadline = Some(now + self.rtt.timeout());
            }
            self.next_seq += 1;
        }
        out
    }

    /// Step 2 of §4.4: fold in an ACK. Returns a retransmission if fast
    /// retransmit fires.
    pub fn on_ack(&mut self, ack_num: u32, now: Instant) -> Option<Packet> {
        if ack_num >= self.base {
            if let Some(entry) = self.inflight.get(&ack_num) {
                if !entry.retransmitted {
                    self.rtt.sample(now.duration_since(entry.sent_at));
                }
            }
            self.inflight.retain(|&seq, _| seq > ack_num);
            self.base = ack_num + 1;
            self.deadline = if self.base <= self.next_seq - 1 {
                Some(now + self.rtt.timeout())
            } else {
                None
            };
            self.congestion.on_new_ack();

            if self.base > self.total_packets {
                self.status = UploadStatus::Complete;
            }
            None
        } else if ack_num == self.base.wrapping_sub(1) {
            match self.congestion.on_duplicate_ack() {
                AckAction::FastRetransmit => Some(self.retransmit_base(now)),
                AckAction::None => None,
            }
        } else {
            None
        }
    }

    /// Step 3 of §4.4: the retransmission timer expired.
    pub fn on_timeout(&mut self, now: Instant) -> Packet {
        self.congestion.on_timeout();
        self.retransmit_base(now)
    }

    fn retransmit_base(&mut self, now: Instant) -> Packet {
        let seq = self.base;
        self.inflight.insert(
            seq,
            InFlight {
                sent_at: now,
                retransmitted: true,
            },
        );
        self.deadline = Some(now + self.rtt.timeout());
        Packet::data(seq, self.packet_bytes(seq))
    }

    pub fn is_complete(&self) -> bool {
        self.status == UploadStatus::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn chunk_of(len: usize) -> Bytes {
        Bytes::from(vec![0xAB; len])
    }

    #[test]
    fn fill_window_respects_slow_start_cwnd_of_one() {
        let mut up = UploadState::new([0; 20], addr(), chunk_of(MSS * 5));
        let now = Instant::now();
        let sent = up.fill_window(now);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sequence, 1);
    }

    #[test]
    fn cumulative_ack_advances_base_and_grows_window() {
        let mut up = UploadState::new([0; 20], addr(), chunk_of(MSS * 10));
        let now = Instant::now();
        up.fill_window(now);
        up.on_ack(1, now + Duration::from_millis(10));
        let sent = up.fill_window(now + Duration::from_millis(10));
        // window grew to 2 after the first ack (slow start).
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn three_duplicate_acks_trigger_retransmit_of_base() {
        let mut up = UploadState::new([0; 20], addr(), chunk_of(MSS * 10));
        let now = Instant::now();
        for _ in 0..10 {
            up.fill_window(now);
            up.on_ack(up.next_seq - 1, now);
        }
        let base_before = up.base;
        assert!(up.on_ack(base_before.wrapping_sub(1), now).is_none());
        assert!(up.on_ack(base_before.wrapping_sub(1), now).is_none());
        let retransmit = up.on_ack(base_before.wrapping_sub(1), now);
        assert!(retransmit.is_some());
        assert_eq!(retransmit.unwrap().sequence, base_before);
    }

    #[test]
    fn completes_when_base_exceeds_total_packets() {
        let mut up = UploadState::new([0; 20], addr(), chunk_of(MSS));
        let now = Instant::now();
        up.fill_window(now);
        up.on_ack(1, now);
        assert!(up.is_complete());
    }

    #[test]
    fn timeout_retransmits_base_and_marks_retransmitted_for_karns_rule() {
        let mut up = UploadState::new([0; 20], addr(), chunk_of(MSS * 3));
        let now = Instant::now();
        up.fill_window(now);
        let retransmit = up.on_timeout(now + Duration::from_secs(2));
        assert_eq!(retransmit.sequence, 1);
        // acking the retransmitted seq should not panic or take an RTT sample
        // from a stale send time (Karn's rule) — just advances base.
        up.on_ack(1, now + Duration::from_secs(3));
    }
}
