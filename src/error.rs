use thiserror::Error;

/// Errors produced by the tracker engine, the peer engine and descriptor construction.
#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("giving up on tracker {host}")]
    TrackerUnreachable { host: String },

    #[error("tracker rejected request: {message}")]
    TrackerRejected { message: String },

    #[error("protocol mismatch: {reason}")]
    ProtocolMismatch { reason: String },

    #[error("announce response body of {body_len} bytes is not a whole number of peer records")]
    MalformedAnnounceResponse { body_len: usize },

    #[error("handshake mismatch: {reason}")]
    HandshakeMismatch { reason: String },

    #[error("socket failure: {0}")]
    SocketFailure(#[from] std::io::Error),

    #[error("invalid descriptor: {reason}")]
    DescriptorInvalid { reason: String },

    #[error("unsupported tracker url {url}")]
    UnsupportedTracker { url: String },

    #[error("frame length {length} exceeds the allowed maximum")]
    MalformedFrame { length: u32 },

    #[error("message id {id} cannot carry a {length} byte payload")]
    MalformedMessage { id: u8, length: usize },

    #[error("connection closed by peer")]
    ConnectionClosed,
}

impl TorrentError {
    pub(crate) fn mismatch(reason: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            reason: reason.into(),
        }
    }

    pub(crate) fn descriptor(reason: impl Into<String>) -> Self {
        Self::DescriptorInvalid {
            reason: reason.into(),
        }
    }

    pub(crate) fn handshake(reason: impl Into<String>) -> Self {
        Self::HandshakeMismatch {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TorrentError>;
