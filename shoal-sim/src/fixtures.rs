//! Deterministic torrent content and metainfo

use std::path::{Path, PathBuf};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha1::{Digest, Sha1};
use shoal_core::torrent::{PieceIndex, TorrentError, TorrentMetadata, parse_torrent_data};

/// Content of a single-file torrent together with its encoded metainfo.
#[derive(Debug, Clone)]
pub struct TorrentFixture {
    pub content: Vec<u8>,
    pub torrent_bytes: Vec<u8>,
    pub metadata: TorrentMetadata,
}

impl TorrentFixture {
    /// Generates `total_length` pseudo-random bytes from `seed` and the
    /// matching metainfo. Same seed, same bytes.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - Zero length or piece length
    pub fn generate(
        seed: u64,
        total_length: usize,
        piece_length: u32,
        name: &str,
        announce_url: &str,
    ) -> Result<Self, TorrentError> {
        let mut content = vec![0u8; total_length];
        ChaCha8Rng::seed_from_u64(seed).fill_bytes(&mut content);

        let torrent_bytes = encode_torrent(announce_url, name, piece_length, &content);
        let metadata = parse_torrent_data(&torrent_bytes)?;
        Ok(Self {
            content,
            torrent_bytes,
            metadata,
        })
    }

    /// Bytes of one piece, truncated for the last piece.
    pub fn piece(&self, index: PieceIndex) -> &[u8] {
        let (begin, end) = self.metadata.piece_bounds(index);
        &self.content[begin as usize..end as usize]
    }

    /// Writes the metainfo to `<dir>/<name>.torrent`.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - If the file could not be written
    pub fn write_torrent_file(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(format!("{}.torrent", self.metadata.name));
        std::fs::write(&path, &self.torrent_bytes)?;
        Ok(path)
    }
}

/// Encodes single-file metainfo for `content` with sorted dictionary keys.
pub fn encode_torrent(announce_url: &str, name: &str, piece_length: u32, content: &[u8]) -> Vec<u8> {
    let pieces: Vec<u8> = content
        .chunks(piece_length.max(1) as usize)
        .flat_map(|chunk| Sha1::digest(chunk).to_vec())
        .collect();

    let mut info = b"d".to_vec();
    put_bytes(&mut info, b"length");
    put_integer(&mut info, content.len() as i64);
    put_bytes(&mut info, b"name");
    put_bytes(&mut info, name.as_bytes());
    put_bytes(&mut info, b"piece length");
    put_integer(&mut info, i64::from(piece_length));
    put_bytes(&mut info, b"pieces");
    put_bytes(&mut info, &pieces);
    info.push(b'e');

    let mut torrent = b"d".to_vec();
    put_bytes(&mut torrent, b"announce");
    put_bytes(&mut torrent, announce_url.as_bytes());
    put_bytes(&mut torrent, b"info");
    torrent.extend_from_slice(&info);
    torrent.push(b'e');
    torrent
}

pub(crate) fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

pub(crate) fn put_integer(out: &mut Vec<u8>, value: i64) {
    out.push(b'i');
    out.extend_from_slice(value.to_string().as_bytes());
    out.push(b'e');
}
