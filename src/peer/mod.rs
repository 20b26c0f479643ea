use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

pub mod framing;
pub mod handshake;
pub mod message;
pub mod session;
pub mod state;

pub use session::PeerSession;

const PSTR: &str = "BitTorrent protocol";
const PSTR_LEN: u8 = PSTR.len() as u8; // always 19

/// A peer candidate as reported by a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub ip_addr: Ipv4Addr,
    pub port: u16,
}

impl Peer {
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip_addr, self.port)
    }

    /// Registry key, `ip:port`.
    pub fn key(&self) -> String {
        self.socket_addr().to_string()
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_addr, self.port)
    }
}
