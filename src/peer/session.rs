use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::PeerConfig;
use crate::error::{Result, TorrentError};
use crate::peer::Peer;
use crate::peer::framing::FrameBuffer;
use crate::peer::handshake::{HANDSHAKE_LEN, Handshake};
use crate::peer::message::Message;
use crate::peer::state::{ChokeState, PeerState};
use crate::torrent::HashValue;

/// One outbound connection to a remote peer.
///
/// The session owns its socket; dropping it closes the connection.
#[derive(Debug)]
pub struct PeerSession {
    peer: Peer,
    stream: Option<TcpStream>,
    info_hash: HashValue,
    local_peer_id: [u8; 20],
    remote: Option<Handshake>,
    flags: ChokeState,
    frames: FrameBuffer,
    state: PeerState,
    config: PeerConfig,
}

impl PeerSession {
    pub fn new(peer: Peer, info_hash: HashValue, local_peer_id: [u8; 20], config: PeerConfig) -> Self {
        Self {
            peer,
            stream: None,
            info_hash,
            local_peer_id,
            remote: None,
            flags: ChokeState::default(),
            frames: FrameBuffer::new(config.max_frame_length),
            state: PeerState::Disconnected,
            config,
        }
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    pub fn flags(&self) -> ChokeState {
        self.flags
    }

    pub fn remote_peer_id(&self) -> Option<[u8; 20]> {
        self.remote.as_ref().map(|h| h.peer_id)
    }

    /// Whether the remote handshake advertised the extension protocol.
    pub fn remote_supports_extensions(&self) -> bool {
        self.remote
            .as_ref()
            .is_some_and(Handshake::supports_extensions)
    }

    /// Dial the peer and exchange handshakes.
    ///
    /// # Errors
    /// `HandshakeMismatch` if the peer answers for another torrent or
    /// another protocol; `SocketFailure` for dial and I/O errors.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != PeerState::Disconnected {
            return Err(TorrentError::mismatch(format!(
                "connect called on a {} session",
                self.state
            )));
        }
        self.state = PeerState::Handshaking;

        match self.handshake().await {
            Ok(()) => {
                self.state = PeerState::Connected;
                debug!(peer = %self.peer, extensions = self.remote_supports_extensions(), "handshake complete");
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let addr = self.peer.socket_addr();
        let mut stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, format!("dial {addr} timed out"))
            })??;

        let outbound = Handshake::new(self.info_hash, self.local_peer_id);
        stream.write_all(&outbound.serialize()).await?;

        let mut response = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut response).await?;
        let inbound = Handshake::deserialize(&response)?;

        if inbound.infohash != self.info_hash {
            return Err(TorrentError::handshake(format!(
                "peer answered for info hash {}",
                hex::encode(inbound.infohash)
            )));
        }

        self.remote = Some(inbound);
        self.stream = Some(stream);
        Ok(())
    }

    /// One incremental receive step.
    ///
    /// Returns a buffered frame if one is complete; otherwise performs a
    /// single socket read and returns the frame it completed, or `None`.
    /// Choke and interest messages update the session flags before being
    /// returned.
    ///
    /// # Errors
    /// `ConnectionClosed` once the peer closes the stream (state `Closed`);
    /// any other error leaves the session `Failed`.
    pub async fn receive_once(&mut self) -> Result<Option<Message>> {
        match self.try_receive().await {
            Ok(message) => {
                if let Some(message) = &message {
                    self.apply(message);
                }
                Ok(message)
            }
            Err(TorrentError::ConnectionClosed) => {
                self.state = PeerState::Closed;
                self.stream = None;
                Err(TorrentError::ConnectionClosed)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn try_receive(&mut self) -> Result<Option<Message>> {
        if self.state != PeerState::Connected {
            return Err(TorrentError::mismatch(format!(
                "receive on a {} session",
                self.state
            )));
        }
        if let Some(message) = self.frames.next_frame()? {
            return Ok(Some(message));
        }

        let stream = self.stream.as_mut().ok_or(TorrentError::ConnectionClosed)?;
        let n = stream
            .read_buf(self.frames.read_target(self.config.read_chunk))
            .await?;
        if n == 0 {
            return Err(TorrentError::ConnectionClosed);
        }
        trace!(peer = %self.peer, bytes = n, buffered = self.frames.buffered(), "read");

        self.frames.next_frame()
    }

    fn apply(&mut self, message: &Message) {
        match message {
            Message::Choke => self.flags.peer_choking = true,
            Message::Unchoke => self.flags.peer_choking = false,
            Message::Interested => self.flags.peer_interested = true,
            Message::NotInterested => self.flags.peer_interested = false,
            _ => return,
        }
        debug!(peer = %self.peer, ?message, flags = ?self.flags, "flags updated");
    }

    /// Write one message. Sending choke/unchoke/interested/not-interested
    /// updates our side of the flags.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        if self.state != PeerState::Connected {
            return Err(TorrentError::mismatch(format!(
                "send on a {} session",
                self.state
            )));
        }
        let stream = self.stream.as_mut().ok_or(TorrentError::ConnectionClosed)?;
        if let Err(e) = stream.write_all(&message.serialize()).await {
            return Err(self.fail(e.into()));
        }

        match message {
            Message::Choke => self.flags.am_choking = true,
            Message::Unchoke => self.flags.am_choking = false,
            Message::Interested => self.flags.am_interested = true,
            Message::NotInterested => self.flags.am_interested = false,
            _ => {}
        }
        Ok(())
    }

    /// Drop the socket. A session that has not already terminated ends `Closed`.
    pub fn close(&mut self) {
        self.stream = None;
        if !self.state.is_terminal() {
            self.state = PeerState::Closed;
        }
    }

    fn fail(&mut self, error: TorrentError) -> TorrentError {
        self.stream = None;
        self.state = PeerState::Failed(error.to_string());
        error
    }
}
