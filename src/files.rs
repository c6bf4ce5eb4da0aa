//! Peer-roster, chunkhash, and fragment file formats (§6c/§6d).
//!
//! The roster and chunkhash files are line-oriented text, matching the style
//! of config-adjacent parsing elsewhere in this crate rather than pulling in
//! a text-format crate for a handful of whitespace-separated fields. The
//! fragment file is a small length-prefixed binary format built on the same
//! `BinaryReader`/`BinaryWritter` traits the wire codec uses.

use crate::packet::{Hash, HASH_LEN};
use crate::utils::binary::{BinaryError, BinaryReader, BinaryWritter};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: malformed entry: {reason}")]
    Malformed {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("fragment file codec error: {0}")]
    Codec(#[from] BinaryError),
}

fn io_err(path: &Path, source: std::io::Error) -> FileError {
    FileError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn malformed(path: &Path, line: usize, reason: impl Into<String>) -> FileError {
    FileError::Malformed {
        path: path.display().to_string(),
        line,
        reason: reason.into(),
    }
}

/// Peer roster: id -> socket address, loaded from `<id> <host> <port>` lines.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    peers: HashMap<u32, SocketAddr>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self, FileError> {
        let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let mut peers = HashMap::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let id: u32 = fields
                .next()
                .ok_or_else(|| malformed(path, idx + 1, "missing peer id"))?
                .parse()
                .map_err(|_| malformed(path, idx + 1, "peer id is not a valid u32"))?;
            let host = fields
                .next()
                .ok_or_else(|| malformed(path, idx + 1, "missing host"))?;
            let port: u16 = fields
                .next()
                .ok_or_else(|| malformed(path, idx + 1, "missing port"))?
                .parse()
                .map_err(|_| malformed(path, idx + 1, "port is not a valid u16"))?;
            if fields.next().is_some() {
                return Err(malformed(path, idx + 1, "too many fields"));
            }

            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .map_err(|_| malformed(path, idx + 1, "host:port does not parse as an address"))?;
            peers.insert(id, addr);
        }

        Ok(Self { peers })
    }

    pub fn get(&self, id: u32) -> Option<SocketAddr> {
        self.peers.get(&id).copied()
    }

    pub fn id_of(&self, addr: SocketAddr) -> Option<u32> {
        self.peers
            .iter()
            .find(|(_, a)| **a == addr)
            .map(|(id, _)| *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, SocketAddr)> + '_ {
        self.peers.iter().map(|(id, addr)| (*id, *addr))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Chunkhash file: the ordered list of `(index, hash)` pairs that make up a file,
/// loaded from `<index> <hex-sha1>` lines.
#[derive(Debug, Clone, Default)]
pub struct ChunkHashes {
    hashes: Vec<Hash>,
}

impl ChunkHashes {
    pub fn load(path: &Path) -> Result<Self, FileError> {
        let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let mut entries: Vec<(usize, Hash)> = Vec::new();

        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let index: usize = fields
                .next()
                .ok_or_else(|| malformed(path, line_no + 1, "missing chunk index"))?
                .parse()
                .map_err(|_| malformed(path, line_no + 1, "chunk index is not a valid integer"))?;
            let hex_hash = fields
                .next()
                .ok_or_else(|| malformed(path, line_no + 1, "missing hash"))?;
            if fields.next().is_some() {
                return Err(malformed(path, line_no + 1, "too many fields"));
            }

            let bytes = hex::decode(hex_hash)
                .map_err(|_| malformed(path, line_no + 1, "hash is not valid hex"))?;
            if bytes.len() != HASH_LEN {
                return Err(malformed(
                    path,
                    line_no + 1,
                    format!("hash must be {HASH_LEN} bytes, got {}", bytes.len()),
                ));
            }
            let mut hash = [0u8; HASH_LEN];
            hash.copy_from_slice(&bytes);
            entries.push((index, hash));
        }

        entries.sort_by_key(|(idx, _)| *idx);
        for (expected, (idx, _)) in entries.iter().enumerate() {
            if *idx != expected {
                return Err(malformed(
                    path,
                    0,
                    format!("chunk indices must be a 0-based contiguous range, found gap at {idx}"),
                ));
            }
        }

        Ok(Self {
            hashes: entries.into_iter().map(|(_, h)| h).collect(),
        })
    }

    pub fn get(&self, index: usize) -> Option<Hash> {
        self.hashes.get(index).copied()
    }

    pub fn as_slice(&self) -> &[Hash] {
        &self.hashes
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// A single completed chunk: its hash and payload, as stored in a fragment file.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub hash: Hash,
    pub bytes: Bytes,
}

/// Fragment file on disk: `count:u32 BE` followed by `count` records of
/// `hash:[u8;20]`, `len:u32 BE`, `bytes:[u8;len]` (§6d).
pub fn write_fragments(path: &Path, fragments: &[Fragment]) -> Result<(), FileError> {
    let mut out = BytesMut::new();
    out.write_u32_be(fragments.len() as u32);
    for frag in fragments {
        out.write_bytes(&frag.hash);
        out.write_u32_be(frag.bytes.len() as u32);
        out.write_bytes(&frag.bytes);
    }
    std::fs::write(path, &out).map_err(|e| io_err(path, e))
}

pub fn read_fragments(path: &Path) -> Result<Vec<Fragment>, FileError> {
    let raw = std::fs::read(path).map_err(|e| io_err(path, e))?;
    let mut r = Bytes::from(raw);

    let count = r.read_u32_be()? as usize;
    let mut fragments = Vec::with_capacity(count);
    for _ in 0..count {
        let hash = r.read_hash20()?;
        let len = r.read_u32_be()? as usize;
        let bytes = r.read_vec(len)?;
        fragments.push(Fragment {
            hash,
            bytes: Bytes::from(bytes),
        });
    }
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(contents: &str) -> tempfile_path::TempPath {
        tempfile_path::TempPath::with_contents(contents)
    }

    // Minimal std-only temp file helper; avoids pulling in the `tempfile` crate
    // for what these tests need.
    mod tempfile_path {
        use std::io::Write;
        use std::path::{Path, PathBuf};

        pub struct TempPath(PathBuf);

        impl TempPath {
            pub fn with_contents(contents: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("chunkpeer-test-{}-{}", std::process::id(), unique()));
                let mut f = std::fs::File::create(&path).unwrap();
                f.write_all(contents.as_bytes()).unwrap();
                Self(path)
            }

            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempPath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }

        fn unique() -> u64 {
            use std::sync::atomic::{AtomicU64, Ordering};
            static COUNTER: AtomicU64 = AtomicU64::new(0);
            COUNTER.fetch_add(1, Ordering::Relaxed)
        }
    }

    #[test]
    fn parses_roster_with_comments_and_blank_lines() {
        let f = temp_file("# roster\n1 127.0.0.1 9001\n\n2 127.0.0.1 9002\n");
        let roster = Roster::load(f.path()).unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.get(1), Some("127.0.0.1:9001".parse().unwrap()));
        assert_eq!(roster.id_of("127.0.0.1:9002".parse().unwrap()), Some(2));
    }

    #[test]
    fn rejects_malformed_roster_line() {
        let f = temp_file("1 127.0.0.1\n");
        let err = Roster::load(f.path()).unwrap_err();
        assert!(matches!(err, FileError::Malformed { .. }));
    }

    #[test]
    fn parses_chunkhash_file_sorted_by_index() {
        let f = temp_file("1 0202020202020202020202020202020202020202\n0 0101010101010101010101010101010101010101\n");
        let hashes = ChunkHashes::load(f.path()).unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes.get(0), Some([0x01; HASH_LEN]));
        assert_eq!(hashes.get(1), Some([0x02; HASH_LEN]));
    }

    #[test]
    fn rejects_chunkhash_gap() {
        let f = temp_file("0 0101010101010101010101010101010101010101\n2 0202020202020202020202020202020202020202\n");
        let err = ChunkHashes::load(f.path()).unwrap_err();
        assert!(matches!(err, FileError::Malformed { .. }));
    }

    #[test]
    fn fragment_round_trip() {
        let fragments = vec![
            Fragment {
                hash: [1u8; HASH_LEN],
                bytes: Bytes::from_static(b"hello"),
            },
            Fragment {
                hash: [2u8; HASH_LEN],
                bytes: Bytes::from_static(b"world!"),
            },
        ];

        let mut path = std::env::temp_dir();
        path.push(format!("chunkpeer-frag-test-{}", std::process::id()));
        write_fragments(&path, &fragments).unwrap();
        let read_back = read_fragments(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0].hash, fragments[0].hash);
        assert_eq!(read_back[0].bytes, fragments[0].bytes);
        assert_eq!(read_back[1].bytes, fragments[1].bytes);
    }
}
