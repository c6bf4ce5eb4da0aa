//! Wire packet codec: the 12-byte header from §3 plus the six typed payloads
//! from §4.1 (WHOHAS/IHAVE/GET/DATA/ACK/DENIED).
//!
//! Grounded on `src/raknet/protocol/ack.rs`'s free-function `encode`/`decode`
//! pattern (returning `Result<_, BinaryError>`) and `src/utils/binary.rs`'s
//! `BinaryReader`/`BinaryWritter` traits, generalized from RakNet's ACK/NACK
//! record framing to this protocol's fixed 12-byte header.

use crate::utils::binary::{BinaryError, BinaryReader, BinaryWritter};
use bytes::{Buf, Bytes, BytesMut};

pub const HEADER_LEN: u8 = 12;
pub const MAX_DATAGRAM: usize = 1400;
pub const MSS: usize = 1388;
pub const HASH_LEN: usize = 20;
pub type Hash = [u8; HASH_LEN];

/// The six protocol packet types (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    WhoHas = 0,
    IHave = 1,
    Get = 2,
    Data = 3,
    Ack = 4,
    Denied = 5,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::WhoHas),
            1 => Some(Self::IHave),
            2 => Some(Self::Get),
            3 => Some(Self::Data),
            4 => Some(Self::Ack),
            5 => Some(Self::Denied),
            _ => None,
        }
    }
}

/// A decoded packet: header fields plus the type-specific payload.
#[derive(Debug, Clone)]
pub struct Packet {
    pub packet_type: PacketType,
    pub sequence: u32,
    pub ack: u32,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Hashes(Vec<Hash>),
    Hash(Hash),
    Data(Bytes),
    Empty,
}

impl Packet {
    pub fn who_has(hashes: Vec<Hash>) -> Self {
        Self {
            packet_type: PacketType::WhoHas,
            sequence: 0,
            ack: 0,
            payload: Payload::Hashes(hashes),
        }
    }

    pub fn i_have(hashes: Vec<Hash>) -> Self {
        Self {
            packet_type: PacketType::IHave,
            sequence: 0,
            ack: 0,
            payload: Payload::Hashes(hashes),
        }
    }

    pub fn denied(hashes: Vec<Hash>) -> Self {
        Self {
            packet_type: PacketType::Denied,
            sequence: 0,
            ack: 0,
            payload: Payload::Hashes(hashes),
        }
    }

    pub fn get(hash: Hash) -> Self {
        Self {
            packet_type: PacketType::Get,
            sequence: 0,
            ack: 0,
            payload: Payload::Hash(hash),
        }
    }

    pub fn data(sequence: u32, bytes: Bytes) -> Self {
        Self {
            packet_type: PacketType::Data,
            sequence,
            ack: 0,
            payload: Payload::Data(bytes),
        }
    }

    pub fn ack(ack: u32) -> Self {
        Self {
            packet_type: PacketType::Ack,
            sequence: 0,
            ack,
            payload: Payload::Empty,
        }
    }

    /// Encodes the 12-byte header followed by the type-specific payload.
    pub fn encode(&self) -> Result<Bytes, BinaryError> {
        let mut body = BytesMut::new();
        match &self.payload {
            Payload::Hashes(hashes) => {
                body.write_u32_be(hashes.len() as u32);
                for h in hashes {
                    body.write_bytes(h);
                }
            }
            Payload::Hash(h) => body.write_bytes(h),
            Payload::Data(bytes) => body.write_bytes(bytes),
            Payload::Empty => {}
        }

        let total_len = HEADER_LEN as usize + body.len();
        if total_len > MAX_DATAGRAM {
            return Err(BinaryError::InvalidData(format!(
                "encoded packet of {total_len} bytes exceeds the {MAX_DATAGRAM}-byte datagram limit"
            )));
        }

        let mut out = BytesMut::with_capacity(total_len);
        out.write_u8(self.packet_type as u8);
        out.write_u8(HEADER_LEN);
        out.write_u16_be(total_len as u16);
        out.write_u32_be(self.sequence);
        out.write_u32_be(self.ack);
        out.write_bytes(&body);
        Ok(out.freeze())
    }

    /// Decodes a datagram into a `Packet`, validating type, header length, and
    /// declared-vs-actual total length per §4.1. Malformed packets are the
    /// caller's responsibility to log and drop (§7) — this just reports why.
    pub fn decode(datagram: &[u8]) -> Result<Self, BinaryError> {
        let mut r = Bytes::copy_from_slice(datagram);
        if r.len() < HEADER_LEN as usize {
            return Err(BinaryError::UnexpectedEof {
                needed: HEADER_LEN as usize,
                remaining: r.len(),
            });
        }

        let raw_type = r.read_u8()?;
        let header_len = r.read_u8()?;
        let total_len = r.read_u16_be()?;
        let sequence = r.read_u32_be()?;
        let ack = r.read_u32_be()?;

        if header_len != HEADER_LEN {
            return Err(BinaryError::InvalidData(format!(
                "header length {header_len} != {HEADER_LEN}"
            )));
        }
        if total_len as usize != datagram.len() {
            return Err(BinaryError::InvalidData(format!(
                "declared total length {total_len} != datagram length {}",
                datagram.len()
            )));
        }
        let packet_type = PacketType::from_u8(raw_type)
            .ok_or_else(|| BinaryError::InvalidData(format!("unknown packet type {raw_type}")))?;

        let payload = match packet_type {
            PacketType::WhoHas | PacketType::IHave | PacketType::Denied => {
                let count = r.read_u32_be()? as usize;
                let mut hashes = Vec::with_capacity(count);
                for _ in 0..count {
                    hashes.push(r.read_hash20()?);
                }
                Payload::Hashes(hashes)
            }
            PacketType::Get => Payload::Hash(r.read_hash20()?),
            PacketType::Data => Payload::Data(r.copy_to_bytes(r.remaining())),
            PacketType::Ack => Payload::Empty,
        };

        Ok(Self {
            packet_type,
            sequence,
            ack,
            payload,
        })
    }
}

/// Maximum number of hashes a single WHOHAS/IHAVE/DENIED datagram can carry
/// before the 1400-byte limit is exceeded: (1400 - 12 - 4) / 20 = 69 (§4.6).
pub const MAX_HASHES_PER_PACKET: usize = (MAX_DATAGRAM - HEADER_LEN as usize - 4) / HASH_LEN;

/// Splits a hash set into WHOHAS-sized chunks per §4.6 ("if |M| hashes overflow
/// a single packet, split into multiple WHOHAS packets").
pub fn chunk_hashes(hashes: &[Hash]) -> impl Iterator<Item = &[Hash]> {
    hashes.chunks(MAX_HASHES_PER_PACKET)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> Hash {
        [byte; HASH_LEN]
    }

    #[test]
    fn encodes_and_decodes_get() {
        let pkt = Packet::get(hash(0xAB));
        let bytes = pkt.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN as usize + HASH_LEN);
        assert_eq!(bytes[0], PacketType::Get as u8);
        assert_eq!(bytes[1], HEADER_LEN);

        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.packet_type, PacketType::Get);
        match decoded.payload {
            Payload::Hash(h) => assert_eq!(h, hash(0xAB)),
            _ => panic!("expected Hash payload"),
        }
    }

    #[test]
    fn encodes_and_decodes_who_has_with_multiple_hashes() {
        let hashes = vec![hash(1), hash(2), hash(3)];
        let pkt = Packet::who_has(hashes.clone());
        let bytes = pkt.encode().unwrap();
        let decoded = Packet::decode(&bytes).unwrap();
        match decoded.payload {
            Payload::Hashes(h) => assert_eq!(h, hashes),
            _ => panic!("expected Hashes payload"),
        }
    }

    #[test]
    fn encodes_and_decodes_data_with_sequence() {
        let payload = Bytes::from_static(b"some chunk bytes");
        let pkt = Packet::data(42, payload.clone());
        let bytes = pkt.encode().unwrap();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.sequence, 42);
        match decoded.payload {
            Payload::Data(d) => assert_eq!(d, payload),
            _ => panic!("expected Data payload"),
        }
    }

    #[test]
    fn encodes_and_decodes_ack() {
        let pkt = Packet::ack(7);
        let bytes = pkt.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN as usize);
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.ack, 7);
        assert!(matches!(decoded.payload, Payload::Empty));
    }

    #[test]
    fn rejects_wrong_header_length() {
        let mut bytes = Packet::ack(1).encode().unwrap().to_vec();
        bytes[1] = 11; // corrupt header length
        let err = Packet::decode(&bytes).unwrap_err();
        assert!(matches!(err, BinaryError::InvalidData(_)));
    }

    #[test]
    fn rejects_mismatched_total_length() {
        let mut bytes = Packet::ack(1).encode().unwrap().to_vec();
        bytes.push(0); // datagram is now longer than declared total_len
        let err = Packet::decode(&bytes).unwrap_err();
        assert!(matches!(err, BinaryError::InvalidData(_)));
    }

    #[test]
    fn rejects_unknown_type() {
        let mut bytes = Packet::ack(1).encode().unwrap().to_vec();
        bytes[0] = 99;
        let err = Packet::decode(&bytes).unwrap_err();
        assert!(matches!(err, BinaryError::InvalidData(_)));
    }

    #[test]
    fn rejects_truncated_header() {
        let err = Packet::decode(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, BinaryError::UnexpectedEof { .. }));
    }

    #[test]
    fn chunk_hashes_splits_at_limit() {
        let hashes: Vec<Hash> = (0..150u32).map(|i| hash((i % 256) as u8)).collect();
        let chunks: Vec<&[Hash]> = chunk_hashes(&hashes).collect();
        assert!(chunks.iter().all(|c| c.len() <= MAX_HASHES_PER_PACKET));
        assert_eq!(
            chunks.iter().map(|c| c.len()).sum::<usize>(),
            hashes.len()
        );
    }
}
