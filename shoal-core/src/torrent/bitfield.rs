//! Piece availability bitfield received from a remote peer

use bytes::Bytes;

/// One bit per piece, high bit of the first byte is piece 0.
///
/// Lengths are taken from the peer as-is: queries past the end report the
/// piece as missing and `set_piece` grows the field when needed. Callers
/// bound indices by the torrent's piece count before setting them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
}

impl Bitfield {
    /// Creates an empty bitfield large enough for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
        }
    }

    /// Creates a bitfield from the payload of a `bitfield` message.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            bits: bytes.to_vec(),
        }
    }

    /// Creates a bitfield with exactly the given pieces set.
    pub fn from_pieces(piece_count: usize, pieces: impl IntoIterator<Item = u32>) -> Self {
        let mut bitfield = Self::new(piece_count);
        for index in pieces {
            bitfield.set_piece(index);
        }
        bitfield
    }

    /// Returns true if the peer reported the piece.
    pub fn has_piece(&self, index: u32) -> bool {
        let byte_index = index as usize / 8;
        let offset = index % 8;
        self.bits
            .get(byte_index)
            .is_some_and(|&byte| (byte >> (7 - offset)) & 1 != 0)
    }

    /// Marks a piece as available.
    pub fn set_piece(&mut self, index: u32) {
        let byte_index = index as usize / 8;
        let offset = index % 8;
        if byte_index >= self.bits.len() {
            self.bits.resize(byte_index + 1, 0);
        }
        self.bits[byte_index] |= 1 << (7 - offset);
    }

    /// Raw bytes in wire order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Number of pieces marked available.
    pub fn count(&self) -> u32 {
        self.bits.iter().map(|byte| byte.count_ones()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_piece_reads_high_bit_first() {
        let bitfield = Bitfield::from_bytes(Bytes::from_static(&[0b1010_0000, 0b0000_0001]));
        assert!(bitfield.has_piece(0));
        assert!(!bitfield.has_piece(1));
        assert!(bitfield.has_piece(2));
        assert!(bitfield.has_piece(15));
        assert!(!bitfield.has_piece(14));
        assert_eq!(bitfield.count(), 3);
    }

    #[test]
    fn test_out_of_range_is_missing() {
        let bitfield = Bitfield::from_bytes(Bytes::from_static(&[0xff]));
        assert!(bitfield.has_piece(7));
        assert!(!bitfield.has_piece(8));
        assert!(!bitfield.has_piece(u32::MAX));
    }

    #[test]
    fn test_set_piece_grows_field() {
        let mut bitfield = Bitfield::default();
        bitfield.set_piece(9);
        assert_eq!(bitfield.as_bytes(), &[0, 0b0100_0000]);
        assert!(bitfield.has_piece(9));
    }

    #[test]
    fn test_from_pieces() {
        let bitfield = Bitfield::from_pieces(3, [1, 2]);
        assert_eq!(bitfield.as_bytes(), &[0b0110_0000]);
        assert!(!bitfield.has_piece(0));
    }
}
