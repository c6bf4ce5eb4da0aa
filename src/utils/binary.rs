//! Small binary read/write helpers used by the wire codec and file parsers.
//!
//! Uses the `bytes` crate for buffer manipulation, tailored to this protocol's
//! all-big-endian wire format (the header fields in §3 are explicitly BE).

use bytes::{Buf, BufMut};
use std::io;
use thiserror::Error;

/// Errors that can occur during binary decode operations.
#[derive(Error, Debug)]
pub enum BinaryError {
    /// Not enough bytes remaining in the buffer for the requested operation.
    #[error("not enough bytes in buffer: needed {needed}, remaining {remaining}")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An invalid value was encountered (unknown packet type, bad header length, ...).
    #[error("invalid data encountered: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, BinaryError>;

macro_rules! check_remaining {
    ($buf:expr, $len:expr) => {
        let needed = $len;
        let remaining = $buf.remaining();
        if remaining < needed {
            return Err(BinaryError::UnexpectedEof { needed, remaining });
        }
    };
}

/// Extension trait for `bytes::Buf` providing the big-endian reads this protocol needs.
pub trait BinaryReader: Buf {
    #[inline]
    fn read_u8(&mut self) -> Result<u8> {
        check_remaining!(self, 1);
        Ok(self.get_u8())
    }

    #[inline]
    fn read_u16_be(&mut self) -> Result<u16> {
        check_remaining!(self, 2);
        Ok(self.get_u16())
    }

    #[inline]
    fn read_u32_be(&mut self) -> Result<u32> {
        check_remaining!(self, 4);
        Ok(self.get_u32())
    }

    /// Reads exactly `len` bytes into a freshly allocated `Vec<u8>`.
    fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        check_remaining!(self, len);
        let mut buf = vec![0u8; len];
        self.copy_to_slice(&mut buf);
        Ok(buf)
    }

    /// Reads exactly 20 bytes (a SHA-1 digest).
    fn read_hash20(&mut self) -> Result<[u8; 20]> {
        check_remaining!(self, 20);
        let mut hash = [0u8; 20];
        self.copy_to_slice(&mut hash);
        Ok(hash)
    }
}

impl<T: Buf + ?Sized> BinaryReader for T {}

/// Extension trait for `bytes::BufMut` providing the big-endian writes this protocol needs.
pub trait BinaryWritter: BufMut {
    #[inline]
    fn write_u8(&mut self, v: u8) {
        self.put_u8(v);
    }

    #[inline]
    fn write_u16_be(&mut self, v: u16) {
        self.put_u16(v);
    }

    #[inline]
    fn write_u32_be(&mut self, v: u32) {
        self.put_u32(v);
    }

    #[inline]
    fn write_bytes(&mut self, v: &[u8]) {
        self.put_slice(v);
    }
}

impl<T: BufMut + ?Sized> BinaryWritter for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    #[test]
    fn round_trips_u16_and_u32_be() {
        let mut w = BytesMut::new();
        w.write_u16_be(0x1234);
        w.write_u32_be(0xdead_beef);
        let mut r = w.freeze();
        assert_eq!(r.read_u16_be().unwrap(), 0x1234);
        assert_eq!(r.read_u32_be().unwrap(), 0xdead_beef);
        assert!(!r.has_remaining());
    }

    #[test]
    fn read_hash20_reports_eof() {
        let mut r: Bytes = Bytes::from_static(&[0u8; 10]);
        let err = r.read_hash20().unwrap_err();
        assert!(matches!(
            err,
            BinaryError::UnexpectedEof {
                needed: 20,
                remaining: 10
            }
        ));
    }
}
