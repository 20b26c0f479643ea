use crate::error::{Result, TorrentError};
use crate::peer::{PSTR, PSTR_LEN};
use crate::torrent::HashValue;

pub const HANDSHAKE_LEN: usize = 68;

/// Reserved byte and mask advertising BEP 10 extension protocol support.
const EXTENSION_BYTE: usize = 5;
const EXTENSION_MASK: u8 = 0x10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub infohash: HashValue,
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Our outbound handshake: only the extension protocol bit is set.
    pub fn new(infohash: HashValue, peer_id: [u8; 20]) -> Self {
        let mut reserved = [0u8; 8];
        reserved[EXTENSION_BYTE] |= EXTENSION_MASK;
        Self {
            reserved,
            infohash,
            peer_id,
        }
    }

    pub fn supports_extensions(&self) -> bool {
        self.reserved[EXTENSION_BYTE] & EXTENSION_MASK != 0
    }

    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PSTR_LEN;
        buf[1..20].copy_from_slice(PSTR.as_bytes());
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.infohash);
        buf[48..68].copy_from_slice(&self.peer_id);

        buf
    }

    /// # Errors
    /// `HandshakeMismatch` if `buf` is not 68 bytes or names another protocol.
    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        if buf.len() != HANDSHAKE_LEN {
            return Err(TorrentError::handshake(format!(
                "expected {HANDSHAKE_LEN} bytes, got {}",
                buf.len()
            )));
        }
        if buf[0] != PSTR_LEN || &buf[1..20] != PSTR.as_bytes() {
            return Err(TorrentError::handshake("unknown protocol string"));
        }

        let mut handshake = Self {
            reserved: [0u8; 8],
            infohash: [0u8; 20],
            peer_id: [0u8; 20],
        };
        handshake.reserved.copy_from_slice(&buf[20..28]);
        handshake.infohash.copy_from_slice(&buf[28..48]);
        handshake.peer_id.copy_from_slice(&buf[48..68]);

        Ok(handshake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_handshake_serialize() {
        let infohash = [1u8; 20];
        let peer_id = [2u8; 20];
        let handshake = Handshake::new(infohash, peer_id);

        let serialized = handshake.serialize();

        assert_eq!(serialized.len(), 68);
        assert_eq!(serialized[0], PSTR_LEN);
        assert_eq!(&serialized[1..20], PSTR.as_bytes());
        assert_eq!(&serialized[20..28], &[0, 0, 0, 0, 0, 0x10, 0, 0]);
        assert_eq!(&serialized[28..48], &infohash);
        assert_eq!(&serialized[48..68], &peer_id);
    }

    #[test]
    fn test_handshake_deserialize_valid() {
        let mut buf = [0u8; 68];
        buf[0] = PSTR_LEN;
        buf[1..20].copy_from_slice(PSTR.as_bytes());
        let infohash = [3u8; 20];
        let peer_id = [4u8; 20];
        buf[28..48].copy_from_slice(&infohash);
        buf[48..68].copy_from_slice(&peer_id);

        let handshake = Handshake::deserialize(&buf).unwrap();

        assert_eq!(handshake.infohash, infohash);
        assert_eq!(handshake.peer_id, peer_id);
        assert!(!handshake.supports_extensions());
    }

    #[test]
    fn test_handshake_deserialize_invalid_length() {
        let buf = [0u8; 67];
        assert_matches!(
            Handshake::deserialize(&buf),
            Err(TorrentError::HandshakeMismatch { .. })
        );
    }

    #[test]
    fn test_handshake_deserialize_invalid_pstr_len() {
        let mut buf = [0u8; 68];
        buf[0] = PSTR_LEN + 1;
        buf[1..20].copy_from_slice(PSTR.as_bytes());

        assert_matches!(
            Handshake::deserialize(&buf),
            Err(TorrentError::HandshakeMismatch { .. })
        );
    }

    #[test]
    fn test_handshake_deserialize_invalid_pstr() {
        let mut buf = [0u8; 68];
        buf[0] = PSTR_LEN;
        buf[1..20].copy_from_slice(b"Invalid protocol!!X");

        assert_matches!(
            Handshake::deserialize(&buf),
            Err(TorrentError::HandshakeMismatch { .. })
        );
    }

    #[test]
    fn test_handshake_keeps_remote_reserved_bits() {
        let mut outbound = Handshake::new([5u8; 20], [6u8; 20]);
        outbound.reserved[7] = 0x05; // DHT + fast extension

        let inbound = Handshake::deserialize(&outbound.serialize()).unwrap();
        assert_eq!(inbound.reserved, [0, 0, 0, 0, 0, 0x10, 0, 0x05]);
        assert!(inbound.supports_extensions());
    }
}
