//! Datagram endpoint wrapper and the optional `SIMULATOR` routing header
//! (§6e).
//!
//! Grounded on `sauoro-amethyst`'s `raknet::mod::RakNetServer`, which owns a
//! single `Arc<UdpSocket>` and hands it down to lower layers rather than
//! rebinding per connection, and on `raknet::protocol::mod::write_address`/
//! `read_address` for the general shape of a fixed-layout, hand-encoded,
//! big-endian address header.

use crate::error::PeerError;
use crate::utils::binary::{BinaryReader, BinaryWritter};
use bytes::{Bytes, BytesMut};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::trace;

const ROUTING_HEADER_LEN: usize = 16;

/// Wraps a bound UDP socket, transparently adding/stripping the simulator's
/// 16-byte routing header when `SIMULATOR` is configured.
pub struct Endpoint {
    socket: Arc<UdpSocket>,
    local_id: u32,
    local_addr: SocketAddrV4,
    simulator: Option<SocketAddr>,
}

impl Endpoint {
    pub async fn bind(
        local_id: u32,
        local_addr: SocketAddrV4,
        simulator: Option<SocketAddr>,
    ) -> Result<Self, PeerError> {
        let socket = UdpSocket::bind(SocketAddr::V4(local_addr)).await?;
        Ok(Self {
            socket: Arc::new(socket),
            local_id,
            local_addr,
            simulator,
        })
    }

    /// Sends `payload` to `dest`, prepending the routing header first if a
    /// simulator is configured (§6e).
    pub async fn send_to(&self, dest: SocketAddr, payload: &[u8]) -> Result<(), PeerError> {
        match self.simulator {
            None => {
                self.socket.send_to(payload, dest).await?;
            }
            Some(sim_addr) => {
                let dest_v4 = match dest {
                    SocketAddr::V4(v4) => v4,
                    SocketAddr::V6(_) => {
                        return Err(PeerError::UnknownAddress(dest));
                    }
                };
                let mut framed = BytesMut::with_capacity(ROUTING_HEADER_LEN + payload.len());
                framed.write_u32_be(self.local_id);
                framed.write_bytes(&self.local_addr.ip().octets());
                framed.write_bytes(&dest_v4.ip().octets());
                framed.write_u16_be(self.local_addr.port());
                framed.write_u16_be(dest_v4.port());
                framed.write_bytes(payload);
                self.socket.send_to(&framed, sim_addr).await?;
            }
        }
        Ok(())
    }

    /// Receives one datagram, stripping the simulator routing header if one
    /// is configured and recovering the real sender address from it; without
    /// a simulator, the sender address is the UDP source address directly.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), PeerError> {
        let (len, from) = self.socket.recv_from(buf).await?;
        if self.simulator.is_none() {
            return Ok((len, from));
        }

        if len < ROUTING_HEADER_LEN {
            trace!(len, "datagram shorter than the simulator routing header");
            return Ok((0, from));
        }
        let mut header = Bytes::copy_from_slice(&buf[..ROUTING_HEADER_LEN]);
        let _src_id = header.read_u32_be()?;
        let src_ip: [u8; 4] = header.read_vec(4)?.try_into().unwrap();
        let _dst_ip = header.read_vec(4)?;
        let src_port = header.read_u16_be()?;
        let _dst_port = header.read_u16_be()?;
        let original_source =
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(src_ip), src_port));

        buf.copy_within(ROUTING_HEADER_LEN..len, 0);
        Ok((len - ROUTING_HEADER_LEN, original_source))
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }
}
