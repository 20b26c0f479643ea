use std::fmt;

/// Lifecycle of a peer connection. Transitions only move forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Handshaking,
    Connected,
    Closed,
    Failed(String),
}

impl PeerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Closed | PeerState::Failed(_))
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Disconnected => f.write_str("disconnected"),
            PeerState::Handshaking => f.write_str("handshaking"),
            PeerState::Connected => f.write_str("connected"),
            PeerState::Closed => f.write_str("closed"),
            PeerState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Choke/interest flags for both directions of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChokeState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl Default for ChokeState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}
