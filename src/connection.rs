//! Connection table and admission control (§4.7).
//!
//! Grounded on `sauoro-amethyst`'s
//! `raknet::mod::RakNetServer`'s `sessions: Arc<Mutex<HashMap<SocketAddr, _>>>`
//! keyed-by-remote-address pattern, collapsed to a plain owned `HashMap`
//! since this peer never spawns a task per connection (§5) — there is
//! exactly one event-loop task, so no `Arc<Mutex<_>>` is needed.

use crate::packet::Hash;
use crate::receiver::DownloadState;
use crate::sender::UploadState;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Tracks active inbound uploads (bounded by `max_send`) and active outbound
/// downloads (unbounded) per remote peer.
pub struct ConnectionTable {
    max_send: usize,
    pub(crate) uploads: HashMap<SocketAddr, UploadState>,
    pub(crate) downloads: HashMap<(SocketAddr, Hash), DownloadState>,
}

impl ConnectionTable {
    pub fn new(max_send: usize) -> Self {
        Self {
            max_send,
            uploads: HashMap::new(),
            downloads: HashMap::new(),
        }
    }

    pub fn max_send(&self) -> usize {
        self.max_send
    }

    /// Number of distinct remotes currently receiving DATA from this peer —
    /// the admission metric (§4.7).
    pub fn active_upload_count(&self) -> usize {
        self.uploads.len()
    }

    /// Whether a new GET from `remote` for `hash` can be admitted: it must
    /// not already be receiving a different chunk, and must not exceed
    /// `max_send` distinct remotes (§4.7).
    pub fn can_admit_upload(&self, remote: SocketAddr, hash: Hash) -> bool {
        match self.uploads.get(&remote) {
            Some(existing) => existing.chunk_hash == hash,
            None => self.uploads.len() < self.max_send,
        }
    }

    pub fn insert_upload(&mut self, upload: UploadState) {
        self.uploads.insert(upload.remote, upload);
    }

    pub fn upload_mut(&mut self, remote: &SocketAddr) -> Option<&mut UploadState> {
        self.uploads.get_mut(remote)
    }

    pub fn remove_upload(&mut self, remote: &SocketAddr) -> Option<UploadState> {
        self.uploads.remove(remote)
    }

    pub fn uploads_iter_mut(&mut self) -> impl Iterator<Item = (&SocketAddr, &mut UploadState)> {
        self.uploads.iter_mut()
    }

    pub fn insert_download(&mut self, key: (SocketAddr, Hash), download: DownloadState) {
        self.downloads.insert(key, download);
    }

    pub fn download_mut(&mut self, key: &(SocketAddr, Hash)) -> Option<&mut DownloadState> {
        self.downloads.get_mut(key)
    }

    pub fn remove_download(&mut self, key: &(SocketAddr, Hash)) -> Option<DownloadState> {
        self.downloads.remove(key)
    }

    pub fn downloads_iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (&(SocketAddr, Hash), &mut DownloadState)> {
        self.downloads.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn admits_up_to_max_send_distinct_remotes() {
        let mut table = ConnectionTable::new(2);
        assert!(table.can_admit_upload(addr(1), [1; 20]));
        table.insert_upload(UploadState::new([1; 20], addr(1), Bytes::from_static(b"x")));
        assert!(table.can_admit_upload(addr(2), [2; 20]));
        table.insert_upload(UploadState::new([2; 20], addr(2), Bytes::from_static(b"x")));
        assert!(!table.can_admit_upload(addr(3), [3; 20]));
    }

    #[test]
    fn rejects_second_chunk_from_already_active_remote() {
        let mut table = ConnectionTable::new(5);
        table.insert_upload(UploadState::new([1; 20], addr(1), Bytes::from_static(b"x")));
        assert!(!table.can_admit_upload(addr(1), [2; 20]));
        assert!(table.can_admit_upload(addr(1), [1; 20]));
    }

    #[test]
    fn freeing_a_slot_allows_new_admission() {
        let mut table = ConnectionTable::new(1);
        table.insert_upload(UploadState::new([1; 20], addr(1), Bytes::from_static(b"x")));
        assert!(!table.can_admit_upload(addr(2), [2; 20]));
        table.remove_upload(&addr(1));
        assert!(table.can_admit_upload(addr(2), [2; 20]));
    }
}
