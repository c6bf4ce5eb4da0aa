//! Top-level peer struct and single-threaded cooperative event loop (§4.8).
//!
//! Grounded on `sauoro-amethyst`'s
//! `raknet::mod::RakNetServer::run` (`tokio::select! { recv_from => ...,
//! sleep => tick }`), replacing the fixed 10ms tick with a computed
//! next-deadline `sleep_until` and adding a stdin branch for the
//! `DOWNLOAD` command, per §4.8.

use crate::config::Config;
use crate::connection::ConnectionTable;
use crate::error::{PeerError, Result};
use crate::files::{self, ChunkHashes, Fragment, Roster};
use crate::handshake::{self, answer_get, answer_who_has, DownloadPlan, GetReply, WhoHasReply};
use crate::packet::{Packet, PacketType, Payload, MAX_DATAGRAM};
use crate::receiver::{DataOutcome, DownloadState};
use crate::rtt::RttEstimator;
use crate::sender::UploadState;
use crate::store::LocalStore;
use crate::transport::Endpoint;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, trace, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 5;

/// Per-upload fixed or estimated timeout source, shared across uploads so a
/// `-t` override applies uniformly (§4.2).
enum TimeoutPolicy {
    Fixed(Duration),
    Estimated,
}

pub struct Peer {
    identity: u32,
    local_addr: SocketAddrV4,
    roster: Roster,
    store: LocalStore,
    connections: ConnectionTable,
    endpoint: Endpoint,
    timeout_policy: TimeoutPolicy,
    download_plans: Vec<DownloadPlan>,
    upload_timeout_counts: std::collections::HashMap<SocketAddr, u32>,
}

impl Peer {
    pub async fn bind(config: &Config) -> Result<Self> {
        let roster = Roster::load(&config.roster_path)?;
        let fragments = files::read_fragments(&config.fragment_path)?;
        let store = LocalStore::from_fragments(fragments);

        let local_addr = crate::config::resolve_local_address(config.identity, &roster)
            .map_err(|_| PeerError::UnknownPeer(config.identity))?;
        let local_addr_v4 = match local_addr {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => {
                return Err(PeerError::UnknownAddress(local_addr));
            }
        };

        let simulator = std::env::var("SIMULATOR")
            .ok()
            .and_then(|s| s.parse::<SocketAddr>().ok());

        let endpoint = Endpoint::bind(config.identity, local_addr_v4, simulator).await?;
        let timeout_policy = match config.fixed_timeout {
            Some(d) => TimeoutPolicy::Fixed(d),
            None => TimeoutPolicy::Estimated,
        };

        info!(identity = config.identity, addr = %local_addr_v4, "peer bound");

        Ok(Self {
            identity: config.identity,
            local_addr: local_addr_v4,
            roster,
            store,
            connections: ConnectionTable::new(config.max_send),
            endpoint,
            timeout_policy,
            download_plans: Vec::new(),
            upload_timeout_counts: std::collections::HashMap::new(),
        })
    }

    fn initial_timeout(&self) -> Duration {
        match self.timeout_policy {
            TimeoutPolicy::Fixed(d) => d,
            TimeoutPolicy::Estimated => RttEstimator::new().timeout(),
        }
    }

    /// Runs the event loop forever (§4.8). Returns only on unrecoverable I/O,
    /// on either the receive path or the send path (§7) — the two are
    /// symmetric since they share the same socket.
    pub async fn run(&mut self) -> Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                recv = self.endpoint.recv_from(&mut buf) => {
                    match recv {
                        Ok((len, from)) if len > 0 => {
                            self.handle_datagram(&buf[..len], from).await?;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "unrecoverable endpoint I/O error");
                            return Err(e);
                        }
                    }
                }
                line = stdin.next_line() => {
                    match line {
                        Ok(Some(line)) => self.handle_stdin_line(&line).await?,
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "error reading stdin"),
                    }
                }
                _ = tokio::time::sleep_until(deadline.into()) => {}
            }

            self.fire_expired_timers(Instant::now()).await?;
        }
    }

    fn next_deadline(&self) -> Instant {
        let now = Instant::now();
        let mut deadline = now + DEFAULT_POLL_INTERVAL;

        for (_, upload) in self.connections.uploads.iter() {
            if let Some(d) = upload.deadline() {
                deadline = deadline.min(d);
            }
        }
        deadline.max(now)
    }

    /// Sends a packet, logging and swallowing a local encode error (our own
    /// bug, not worth tearing the loop down for) but propagating an
    /// unrecoverable I/O error exactly like the receive path does (§7).
    async fn send_or_log(&self, to: SocketAddr, packet: Packet) -> Result<()> {
        match self.send(to, packet).await {
            Ok(()) => Ok(()),
            Err(PeerError::Io(e)) => {
                warn!(error = %e, %to, "send failed with unrecoverable I/O error");
                Err(PeerError::Io(e))
            }
            Err(e) => {
                warn!(error = %e, %to, "dropping outbound packet after encode error");
                Ok(())
            }
        }
    }

    async fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> Result<()> {
        let packet = match Packet::decode(datagram) {
            Ok(p) => p,
            Err(e) => {
                debug!(%from, error = %e, "dropping malformed packet");
                return Ok(());
            }
        };

        trace!(?packet.packet_type, %from, "dispatching packet");
        match packet.packet_type {
            PacketType::WhoHas => self.handle_who_has(&packet, from).await,
            PacketType::IHave => self.handle_i_have(&packet, from).await,
            PacketType::Denied => self.handle_denied(&packet, from).await,
            PacketType::Get => self.handle_get(&packet, from).await,
            PacketType::Data => self.handle_data(&packet, from).await,
            PacketType::Ack => self.handle_ack(&packet, from).await,
        }
    }

    async fn handle_who_has(&mut self, packet: &Packet, from: SocketAddr) -> Result<()> {
        let Payload::Hashes(requested) = &packet.payload else {
            return Ok(());
        };
        let held = self.store.intersection_of(requested);
        let has_capacity = self.connections.active_upload_count() < self.connections.max_send();
        match answer_who_has(held, has_capacity) {
            WhoHasReply::IHave(hashes) => self.send_or_log(from, Packet::i_have(hashes)).await,
            WhoHasReply::Denied(hashes) => self.send_or_log(from, Packet::denied(hashes)).await,
            WhoHasReply::NoOverlap => Ok(()),
        }
    }

    async fn handle_i_have(&mut self, packet: &Packet, from: SocketAddr) -> Result<()> {
        let Payload::Hashes(hashes) = &packet.payload else {
            return Ok(());
        };
        for plan in &mut self.download_plans {
            plan.record_ihave(from, hashes);
        }
        self.issue_gets_for_new_assignments().await
    }

    async fn handle_denied(&mut self, packet: &Packet, from: SocketAddr) -> Result<()> {
        let Payload::Hashes(hashes) = &packet.payload else {
            return Ok(());
        };
        for plan in &mut self.download_plans {
            plan.record_denied(from, hashes);
        }
        Ok(())
    }

    async fn issue_gets_for_new_assignments(&mut self) -> Result<()> {
        let mut to_send = Vec::new();
        for plan in &mut self.download_plans {
            for (hash, source) in plan.take_new_assignments() {
                to_send.push((hash, source));
            }
        }
        for (hash, source) in to_send {
            self.connections.insert_download(
                (source, hash),
                DownloadState::new(hash, source, Instant::now()),
            );
            self.send_or_log(source, Packet::get(hash)).await?;
        }
        Ok(())
    }

    async fn handle_get(&mut self, packet: &Packet, from: SocketAddr) -> Result<()> {
        let Payload::Hash(hash) = packet.payload else {
            return Ok(());
        };
        let holds_hash = self.store.has(&hash);
        let can_admit = self.connections.can_admit_upload(from, hash);
        match answer_get(holds_hash, can_admit) {
            GetReply::Admit => {
                let Some(bytes) = self.store.get(&hash) else {
                    return Ok(());
                };
                self.connections
                    .insert_upload(UploadState::new(hash, from, bytes));
                self.drive_upload(from).await
            }
            GetReply::UnknownHash | GetReply::AtCapacity => {
                self.send_or_log(from, Packet::denied(vec![hash])).await
            }
        }
    }

    async fn drive_upload(&mut self, remote: SocketAddr) -> Result<()> {
        let now = Instant::now();
        let packets = match self.connections.upload_mut(&remote) {
            Some(upload) => upload.fill_window(now),
            None => return Ok(()),
        };
        for packet in packets {
            self.send_or_log(remote, packet).await?;
        }
        Ok(())
    }

    async fn handle_ack(&mut self, packet: &Packet, from: SocketAddr) -> Result<()> {
        let retransmit = match self.connections.upload_mut(&from) {
            Some(upload) => upload.on_ack(packet.ack, Instant::now()),
            None => return Ok(()),
        };
        if let Some(retransmit) = retransmit {
            self.send_or_log(from, retransmit).await?;
        }

        let complete = self
            .connections
            .upload_mut(&from)
            .map(|u| u.is_complete())
            .unwrap_or(false);
        if complete {
            self.connections.remove_upload(&from);
            self.upload_timeout_counts.remove(&from);
            Ok(())
        } else {
            self.upload_timeout_counts.remove(&from);
            self.drive_upload(from).await
        }
    }

    async fn handle_data(&mut self, packet: &Packet, from: SocketAddr) -> Result<()> {
        let Payload::Data(bytes) = &packet.payload else {
            return Ok(());
        };

        let key = self
            .connections
            .downloads
            .keys()
            .find(|(addr, _)| *addr == from)
            .copied();
        let Some(key) = key else {
            return Ok(());
        };

        let outcome = match self.connections.download_mut(&key) {
            Some(download) => {
                download.touch(Instant::now());
                download.on_data(packet.sequence, bytes)
            }
            None => return Ok(()),
        };

        match outcome {
            DataOutcome::Accepted { ack } | DataOutcome::Duplicate { ack } => {
                self.send_or_log(from, Packet::ack(ack)).await
            }
            DataOutcome::CompleteVerified { ack } => {
                self.send_or_log(from, Packet::ack(ack)).await?;
                if let Some(download) = self.connections.remove_download(&key) {
                    self.store
                        .insert(key.1, bytes::Bytes::from(download.into_bytes()));
                }
                self.maybe_finish_plans().await;
                Ok(())
            }
            DataOutcome::CompleteCorrupt { ack } => {
                self.send_or_log(from, Packet::ack(ack)).await?;
                self.connections.remove_download(&key);
                self.reopen_handshake_for(key.1);
                Ok(())
            }
        }
    }

    fn reopen_handshake_for(&mut self, hash: [u8; 20]) {
        for plan in &mut self.download_plans {
            plan.reopen(hash);
        }
    }

    async fn maybe_finish_plans(&mut self) {
        let mut finished = Vec::new();
        for (idx, plan) in self.download_plans.iter().enumerate() {
            let all_present = plan.ordered_hashes.iter().all(|h| self.store.has(h));
            if all_present {
                finished.push(idx);
            }
        }
        for idx in finished.into_iter().rev() {
            let plan = self.download_plans.remove(idx);
            let fragments: Vec<Fragment> = plan
                .ordered_hashes
                .iter()
                .filter_map(|h| self.store.get(h).map(|bytes| Fragment { hash: *h, bytes }))
                .collect();
            match files::write_fragments(&plan.output_path, &fragments) {
                Ok(()) => println!("GOT {}", plan.output_path.display()),
                Err(e) => warn!(error = %e, "failed writing output fragment file"),
            }
        }
    }

    async fn handle_stdin_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("DOWNLOAD") => {
                let (Some(chunkhash_file), Some(output_file)) = (parts.next(), parts.next())
                else {
                    warn!("malformed DOWNLOAD command: {line}");
                    return Ok(());
                };
                self.start_download(PathBuf::from(chunkhash_file), PathBuf::from(output_file))
                    .await
            }
            Some(other) => {
                warn!("unrecognized stdin command: {other}");
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn start_download(&mut self, chunkhash_file: PathBuf, output_file: PathBuf) -> Result<()> {
        let hashes = match ChunkHashes::load(&chunkhash_file) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "failed to load chunkhash file");
                return Ok(());
            }
        };
        let missing = self.store.missing_of(hashes.as_slice());
        let ordered = hashes.as_slice().to_vec();

        if missing.is_empty() {
            let fragments: Vec<Fragment> = ordered
                .iter()
                .filter_map(|h| self.store.get(h).map(|bytes| Fragment { hash: *h, bytes }))
                .collect();
            if files::write_fragments(&output_file, &fragments).is_ok() {
                println!("GOT {}", output_file.display());
            }
            return Ok(());
        }

        let plan = DownloadPlan::new(output_file, ordered, Instant::now());
        self.download_plans.push(plan);
        let idx = self.download_plans.len() - 1;
        self.broadcast_who_has(idx).await
    }

    async fn broadcast_who_has(&mut self, plan_idx: usize) -> Result<()> {
        let packets = self.download_plans[plan_idx].who_has_packets();
        let peers: Vec<SocketAddr> = self
            .roster
            .iter()
            .filter(|(id, _)| *id != self.identity)
            .map(|(_, addr)| addr)
            .collect();
        for peer in peers {
            for packet in &packets {
                self.send_or_log(peer, packet.clone()).await?;
            }
        }
        Ok(())
    }

    async fn fire_expired_timers(&mut self, now: Instant) -> Result<()> {
        let expired: Vec<SocketAddr> = self
            .connections
            .uploads
            .iter()
            .filter(|(_, u)| u.deadline().is_some_and(|d| d <= now))
            .map(|(addr, _)| *addr)
            .collect();

        for remote in expired {
            let retransmit = self
                .connections
                .upload_mut(&remote)
                .map(|u| u.on_timeout(now));
            if let Some(packet) = retransmit {
                let count = self.upload_timeout_counts.entry(remote).or_insert(0);
                *count += 1;
                if *count >= MAX_CONSECUTIVE_TIMEOUTS {
                    warn!(%remote, "abandoning upload after repeated timeouts");
                    self.connections.remove_upload(&remote);
                    self.upload_timeout_counts.remove(&remote);
                } else {
                    self.send_or_log(remote, packet).await?;
                }
            }
        }

        let stale_timeout = self.initial_timeout() * MAX_CONSECUTIVE_TIMEOUTS;
        let stale_downloads: Vec<(SocketAddr, [u8; 20])> = self
            .connections
            .downloads
            .iter()
            .filter(|(_, d)| d.is_stale(now, stale_timeout))
            .map(|(key, _)| *key)
            .collect();
        for key in stale_downloads {
            warn!(remote = %key.0, "abandoning download after no progress");
            self.connections.remove_download(&key);
            self.reopen_handshake_for(key.1);
        }

        let plan_indices: Vec<usize> = (0..self.download_plans.len()).collect();
        for idx in plan_indices {
            if self.download_plans[idx].retry_due(now) {
                self.broadcast_who_has(idx).await?;
            }
        }

        // A plan that just exhausted MAX_RETRIES is reported here, before
        // it's dropped from tracking, per §7's "emit DOWNLOAD FAILED with
        // the unmet hashes" requirement.
        for plan in self
            .download_plans
            .iter()
            .filter(|p| p.status == handshake::DownloadPlanStatus::Failed)
        {
            let unmet: Vec<String> = plan.unassigned().iter().map(hex::encode).collect();
            let err = PeerError::HandshakeExhausted(unmet.len());
            tracing::error!(
                output = %plan.output_path.display(),
                unmet = ?unmet,
                error = %err,
                "handshake exhausted"
            );
            println!(
                "DOWNLOAD FAILED {} unmet={}",
                plan.output_path.display(),
                unmet.join(",")
            );
        }
        self.download_plans
            .retain(|plan| plan.status != handshake::DownloadPlanStatus::Failed);

        Ok(())
    }

    async fn send(&self, to: SocketAddr, packet: Packet) -> Result<()> {
        let bytes = packet.encode()?;
        self.endpoint.send_to(to, &bytes).await?;
        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }
}
