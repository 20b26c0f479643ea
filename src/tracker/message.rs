//! BEP 15 UDP tracker datagrams. All integers are big-endian.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, TorrentError};
use crate::peer::Peer;
use crate::torrent::HashValue;

/// Initial connection id that identifies the protocol in a connect request.
pub const PROTOCOL_ID: u64 = 0x41727101980;

pub const CONNECT_REQUEST_LEN: usize = 16;
pub const CONNECT_RESPONSE_LEN: usize = 16;
/// Fixed BEP 15 announce fields, followed on the wire by the extensions field
pub const ANNOUNCE_REQUEST_LEN: usize = 98;
pub const ANNOUNCE_EXTENSIONS_LEN: usize = 2;
pub const RESPONSE_HEADER_LEN: usize = 8;
/// interval + leechers + seeders
pub const ANNOUNCE_BODY_HEADER_LEN: usize = 12;
pub const PEER_RECORD_LEN: usize = 6;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Connect = 0,
    Announce = 1,
    Scrape = 2,
    Error = 3,
}

impl TryFrom<u32> for Action {
    type Error = u32;

    fn try_from(value: u32) -> std::result::Result<Action, u32> {
        match value {
            0 => Ok(Action::Connect),
            1 => Ok(Action::Announce),
            2 => Ok(Action::Scrape),
            3 => Ok(Action::Error),
            other => Err(other),
        }
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    None = 0,
    Completed = 1,
    Started = 2,
    Stopped = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequest {
    pub transaction_id: u32,
}

impl ConnectRequest {
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(CONNECT_REQUEST_LEN);
        buf.put_u64(PROTOCOL_ID);
        buf.put_u32(Action::Connect as u32);
        buf.put_u32(self.transaction_id);
        buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResponse {
    pub transaction_id: u32,
    pub connection_id: u64,
}

impl ConnectResponse {
    /// Decode a connect response and check it answers `transaction_id`.
    pub fn deserialize(buf: &[u8], transaction_id: u32) -> Result<Self> {
        let mut body = check_header(buf, Action::Connect, transaction_id)?;
        if body.len() < CONNECT_RESPONSE_LEN - RESPONSE_HEADER_LEN {
            return Err(TorrentError::mismatch(format!(
                "connect response of {} bytes is too short",
                buf.len()
            )));
        }

        Ok(Self {
            transaction_id,
            connection_id: body.get_u64(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceRequest {
    pub connection_id: u64,
    pub transaction_id: u32,
    pub info_hash: HashValue,
    pub peer_id: [u8; 20],
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: AnnounceEvent,
    /// 0 lets the tracker use the source address
    pub ip: u32,
    pub key: u32,
    pub num_want: i32,
    pub port: u16,
    pub extensions: u16,
}

impl AnnounceRequest {
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(ANNOUNCE_REQUEST_LEN + ANNOUNCE_EXTENSIONS_LEN);
        buf.put_u64(self.connection_id);
        buf.put_u32(Action::Announce as u32);
        buf.put_u32(self.transaction_id);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.put_u64(self.downloaded);
        buf.put_u64(self.left);
        buf.put_u64(self.uploaded);
        buf.put_u32(self.event as u32);
        buf.put_u32(self.ip);
        buf.put_u32(self.key);
        buf.put_i32(self.num_want);
        buf.put_u16(self.port);
        buf.put_u16(self.extensions);
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {
    pub transaction_id: u32,
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<Peer>,
}

impl AnnounceResponse {
    /// Decode an announce response and check it answers `transaction_id`.
    ///
    /// The body after the 12-byte interval/leechers/seeders block must be a
    /// whole number of 6-byte peer records.
    pub fn deserialize(buf: &[u8], transaction_id: u32) -> Result<Self> {
        let mut body = check_header(buf, Action::Announce, transaction_id)?;
        if body.len() < ANNOUNCE_BODY_HEADER_LEN
            || (body.len() - ANNOUNCE_BODY_HEADER_LEN) % PEER_RECORD_LEN != 0
        {
            return Err(TorrentError::MalformedAnnounceResponse {
                body_len: body.len(),
            });
        }

        let interval = body.get_u32();
        let leechers = body.get_u32();
        let seeders = body.get_u32();
        let peers = body
            .chunks_exact(PEER_RECORD_LEN)
            .map(|chunk| Peer {
                ip_addr: Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
                port: u16::from_be_bytes([chunk[4], chunk[5]]),
            })
            .collect();

        Ok(Self {
            transaction_id,
            interval,
            leechers,
            seeders,
            peers,
        })
    }
}

/// Validate the action/transaction header and return the body after it.
///
/// The transaction id is checked first so a stray datagram never passes as
/// an error report for our request.
fn check_header(buf: &[u8], expected: Action, transaction_id: u32) -> Result<&[u8]> {
    if buf.len() < RESPONSE_HEADER_LEN {
        return Err(TorrentError::mismatch(format!(
            "response of {} bytes has no header",
            buf.len()
        )));
    }

    let mut header = &buf[..RESPONSE_HEADER_LEN];
    let action = header.get_u32();
    let received = header.get_u32();
    let body = &buf[RESPONSE_HEADER_LEN..];

    if received != transaction_id {
        return Err(TorrentError::mismatch(format!(
            "transaction id: sent {transaction_id} received {received}"
        )));
    }

    match Action::try_from(action) {
        Ok(Action::Error) => Err(TorrentError::TrackerRejected {
            message: String::from_utf8_lossy(body).into_owned(),
        }),
        Ok(action) if action == expected => Ok(body),
        _ => Err(TorrentError::mismatch(format!(
            "expected action {} received {action}",
            expected as u32
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn header(action: u32, transaction_id: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&action.to_be_bytes());
        buf.extend_from_slice(&transaction_id.to_be_bytes());
        buf
    }

    #[test]
    fn test_connect_request_layout() {
        let buf = ConnectRequest {
            transaction_id: 0xDEADBEEF,
        }
        .serialize();

        assert_eq!(buf.len(), CONNECT_REQUEST_LEN);
        assert_eq!(buf[0..8], [0x00, 0x00, 0x04, 0x17, 0x27, 0x10, 0x19, 0x80]);
        assert_eq!(buf[8..12], [0, 0, 0, 0]);
        assert_eq!(buf[12..16], [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_announce_request_layout() {
        let request = AnnounceRequest {
            connection_id: 0x0102030405060708,
            transaction_id: 7,
            info_hash: [0xAA; 20],
            peer_id: [0xBB; 20],
            downloaded: 1,
            left: 2,
            uploaded: 3,
            event: AnnounceEvent::Started,
            ip: 0,
            key: 0x11223344,
            num_want: -1,
            port: 6881,
            extensions: 0,
        };
        let buf = request.serialize();

        assert_eq!(buf.len(), ANNOUNCE_REQUEST_LEN + ANNOUNCE_EXTENSIONS_LEN);
        assert_eq!(buf[0..8], [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf[8..12], [0, 0, 0, 1]);
        assert_eq!(buf[12..16], [0, 0, 0, 7]);
        assert_eq!(buf[16..36], [0xAA; 20]);
        assert_eq!(buf[36..56], [0xBB; 20]);
        assert_eq!(buf[56..64], 1u64.to_be_bytes());
        assert_eq!(buf[64..72], 2u64.to_be_bytes());
        assert_eq!(buf[72..80], 3u64.to_be_bytes());
        assert_eq!(buf[80..84], [0, 0, 0, 2]);
        assert_eq!(buf[84..88], [0, 0, 0, 0]);
        assert_eq!(buf[88..92], [0x11, 0x22, 0x33, 0x44]);
        assert_eq!(buf[92..96], [0xFF; 4]);
        assert_eq!(buf[96..98], 6881u16.to_be_bytes());
        assert_eq!(buf[98..100], [0, 0]);
    }

    #[test]
    fn test_connect_response_valid() {
        let mut buf = header(0, 42);
        buf.extend_from_slice(&0x1122334455667788u64.to_be_bytes());

        let response = ConnectResponse::deserialize(&buf, 42).unwrap();
        assert_eq!(response.connection_id, 0x1122334455667788);
    }

    #[test]
    fn test_connect_response_transaction_mismatch() {
        let mut buf = header(0, 43);
        buf.extend_from_slice(&1u64.to_be_bytes());

        assert_matches!(
            ConnectResponse::deserialize(&buf, 42),
            Err(TorrentError::ProtocolMismatch { .. })
        );
    }

    #[test]
    fn test_error_response_is_rejection() {
        let mut buf = header(3, 42);
        buf.extend_from_slice(b"torrent not registered");

        assert_matches!(
            ConnectResponse::deserialize(&buf, 42),
            Err(TorrentError::TrackerRejected { message }) if message == "torrent not registered"
        );
    }

    #[test]
    fn test_short_connect_response() {
        let buf = header(0, 42);
        assert_matches!(
            ConnectResponse::deserialize(&buf, 42),
            Err(TorrentError::ProtocolMismatch { .. })
        );
    }

    #[test]
    fn test_announce_response_peers() {
        let mut buf = header(1, 9);
        buf.extend_from_slice(&1800u32.to_be_bytes());
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(&[192, 168, 1, 1, 0x1A, 0xE1]);
        buf.extend_from_slice(&[10, 0, 0, 1, 0x1F, 0x90]);

        let response = AnnounceResponse::deserialize(&buf, 9).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.leechers, 5);
        assert_eq!(response.seeders, 10);
        assert_eq!(
            response.peers,
            vec![
                Peer {
                    ip_addr: Ipv4Addr::new(192, 168, 1, 1),
                    port: 6881
                },
                Peer {
                    ip_addr: Ipv4Addr::new(10, 0, 0, 1),
                    port: 8080
                },
            ]
        );
    }

    #[test]
    fn test_announce_response_without_peers() {
        let mut buf = header(1, 9);
        buf.extend_from_slice(&[0u8; 12]);

        let response = AnnounceResponse::deserialize(&buf, 9).unwrap();
        assert!(response.peers.is_empty());
    }

    #[test]
    fn test_announce_response_partial_record() {
        let mut buf = header(1, 9);
        buf.extend_from_slice(&[0u8; 12]);
        buf.extend_from_slice(&[127, 0, 0, 1, 0x1A]);

        assert_matches!(
            AnnounceResponse::deserialize(&buf, 9),
            Err(TorrentError::MalformedAnnounceResponse { body_len: 17 })
        );
    }

    #[test]
    fn test_announce_response_short_body() {
        let mut buf = header(1, 9);
        buf.extend_from_slice(&[0u8; 6]);

        assert_matches!(
            AnnounceResponse::deserialize(&buf, 9),
            Err(TorrentError::MalformedAnnounceResponse { body_len: 6 })
        );
    }

    #[test]
    fn test_unexpected_action() {
        let mut buf = header(0, 9);
        buf.extend_from_slice(&[0u8; 12]);

        assert_matches!(
            AnnounceResponse::deserialize(&buf, 9),
            Err(TorrentError::ProtocolMismatch { .. })
        );
    }
}
