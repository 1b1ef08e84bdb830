//! Metainfo (.torrent) decoding for single-file torrents

use std::collections::HashMap;
use std::path::Path;

use sha1::{Digest, Sha1};

use super::piece_download::PieceWork;
use super::{InfoHash, PieceIndex, TorrentError};

type BencodeDict<'a> = HashMap<&'a [u8], bencode_rs::Value<'a>>;

/// Decoded description of a single-file torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentMetadata {
    pub announce_url: String,
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_length: u64,
}

impl TorrentMetadata {
    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Byte range `[begin, end)` of a piece; the last piece is truncated at
    /// the total length.
    pub fn piece_bounds(&self, index: PieceIndex) -> (u64, u64) {
        let begin = u64::from(index.as_u32()) * u64::from(self.piece_length);
        let end = (begin + u64::from(self.piece_length)).min(self.total_length);
        (begin.min(self.total_length), end)
    }

    pub fn piece_size(&self, index: PieceIndex) -> u32 {
        let (begin, end) = self.piece_bounds(index);
        (end - begin) as u32
    }

    /// One work item per piece, in index order.
    pub fn piece_work(&self) -> Vec<PieceWork> {
        self.piece_hashes
            .iter()
            .enumerate()
            .map(|(i, hash)| {
                let index = PieceIndex::new(i as u32);
                PieceWork {
                    index,
                    hash: *hash,
                    length: self.piece_size(index),
                }
            })
            .collect()
    }
}

/// Reads and decodes a torrent file.
///
/// # Errors
/// - `TorrentError::Io` - File could not be read
/// - `TorrentError::InvalidTorrentFile` - See [`parse_torrent_data`]
pub async fn parse_torrent_file(path: impl AsRef<Path>) -> Result<TorrentMetadata, TorrentError> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    parse_torrent_data(&bytes)
}

/// Decodes bencoded metainfo.
///
/// The info hash is the SHA-1 of the raw `info` value exactly as it appears
/// in the input.
///
/// # Errors
/// - `TorrentError::InvalidTorrentFile` - Malformed bencode, missing or
///   mistyped fields, multi-file layout, or piece hashes that do not cover
///   the total length
pub fn parse_torrent_data(torrent_bytes: &[u8]) -> Result<TorrentMetadata, TorrentError> {
    let parsed = bencode_rs::Value::parse(torrent_bytes)
        .map_err(|e| invalid(format!("Bencode parsing failed: {e:?}")))?;

    let Some(bencode_rs::Value::Dictionary(root)) = parsed.first() else {
        return Err(invalid("Root element must be dictionary"));
    };

    let announce_url = string_field(root, b"announce")?;

    let Some(bencode_rs::Value::Dictionary(info)) = root.get(b"info".as_slice()) else {
        return Err(invalid("Missing or invalid 'info' dictionary"));
    };

    if info.contains_key(b"files".as_slice()) {
        return Err(invalid("Multi-file torrents are not supported"));
    }

    let name = string_field(info, b"name")?;
    let piece_length = integer_field(info, b"piece length")?;
    let total_length = integer_field(info, b"length")?;
    if piece_length == 0 || piece_length > u64::from(u32::MAX) {
        return Err(invalid(format!("Invalid piece length {piece_length}")));
    }
    if total_length == 0 {
        return Err(invalid("Torrent has zero length"));
    }

    let pieces = bytes_field(info, b"pieces")?;
    if !pieces.len().is_multiple_of(20) {
        return Err(invalid(format!(
            "Pieces field length {} is not a multiple of 20",
            pieces.len()
        )));
    }
    let piece_hashes: Vec<[u8; 20]> = pieces
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect();

    let expected_pieces = total_length.div_ceil(piece_length);
    if piece_hashes.len() as u64 != expected_pieces {
        return Err(invalid(format!(
            "Expected {expected_pieces} piece hashes for {total_length} bytes, found {}",
            piece_hashes.len()
        )));
    }

    Ok(TorrentMetadata {
        announce_url,
        info_hash: info_hash(torrent_bytes)?,
        name,
        piece_length: piece_length as u32,
        piece_hashes,
        total_length,
    })
}

/// Hashes the raw bytes of the top-level `info` value.
fn info_hash(torrent_bytes: &[u8]) -> Result<InfoHash, TorrentError> {
    let info = raw_dict_value(torrent_bytes, b"info")?;
    Ok(InfoHash::new(Sha1::digest(info).into()))
}

/// Finds the raw encoding of `key`'s value in a top-level dictionary.
fn raw_dict_value<'a>(data: &'a [u8], key: &[u8]) -> Result<&'a [u8], TorrentError> {
    if data.first() != Some(&b'd') {
        return Err(invalid("Expected dictionary start"));
    }

    let mut pos = 1;
    while pos < data.len() && data[pos] != b'e' {
        let key_end = pos + value_end(&data[pos..])?;
        let (_, current_key) = split_string(&data[pos..key_end])?;
        let entry_end = key_end + value_end(&data[key_end..])?;
        if current_key == key {
            return Ok(&data[key_end..entry_end]);
        }
        pos = entry_end;
    }

    Err(invalid(format!(
        "Missing '{}' field",
        String::from_utf8_lossy(key)
    )))
}

/// Length of the single bencoded value at the start of `data`.
fn value_end(data: &[u8]) -> Result<usize, TorrentError> {
    match data.first() {
        Some(b'i') => data
            .iter()
            .position(|&b| b == b'e')
            .map(|end| end + 1)
            .ok_or_else(|| invalid("Unterminated integer")),
        Some(b'l' | b'd') => {
            let mut pos = 1;
            while pos < data.len() && data[pos] != b'e' {
                pos += value_end(&data[pos..])?;
            }
            if pos >= data.len() {
                return Err(invalid("Unterminated list or dictionary"));
            }
            Ok(pos + 1)
        }
        Some(b'0'..=b'9') => {
            let (consumed, _) = split_string(data)?;
            Ok(consumed)
        }
        _ => Err(invalid("Invalid bencode value")),
    }
}

/// Splits a bencoded byte string into (encoded length, contents).
fn split_string(data: &[u8]) -> Result<(usize, &[u8]), TorrentError> {
    let colon = data
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| invalid("Invalid string format"))?;
    let length: usize = std::str::from_utf8(&data[..colon])
        .ok()
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| invalid("Invalid string length"))?;

    let start = colon + 1;
    let end = start
        .checked_add(length)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| invalid("String extends past end of data"))?;
    Ok((end, &data[start..end]))
}

fn bytes_field<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> Result<&'a [u8], TorrentError> {
    match dict.get(key) {
        Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
        _ => Err(invalid(format!(
            "Missing or invalid field: {:?}",
            String::from_utf8_lossy(key)
        ))),
    }
}

fn string_field(dict: &BencodeDict<'_>, key: &[u8]) -> Result<String, TorrentError> {
    let bytes = bytes_field(dict, key)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        invalid(format!(
            "Invalid UTF-8 in field: {:?}",
            String::from_utf8_lossy(key)
        ))
    })
}

fn integer_field(dict: &BencodeDict<'_>, key: &[u8]) -> Result<u64, TorrentError> {
    match dict.get(key) {
        Some(bencode_rs::Value::Integer(value)) if *value >= 0 => Ok(*value as u64),
        _ => Err(invalid(format!(
            "Missing or invalid integer field: {:?}",
            String::from_utf8_lossy(key)
        ))),
    }
}

fn invalid(reason: impl Into<String>) -> TorrentError {
    TorrentError::InvalidTorrentFile {
        reason: reason.into(),
    }
}
