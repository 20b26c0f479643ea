//! UDP tracker client (BEP 15).

pub mod message;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{UdpSocket, lookup_host};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{SwarmConfig, TrackerConfig};
use crate::error::{Result, TorrentError};
use crate::peer::Peer;
use crate::torrent::HashValue;
use message::{AnnounceEvent, AnnounceRequest, AnnounceResponse, ConnectRequest, ConnectResponse};

/// A connection id may be used for one minute after it was received.
pub const CONNECTION_ID_TTL: Duration = Duration::from_secs(60);

const MAX_DATAGRAM: usize = 65_536;

const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// Figures reported by the most recent announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnounceStats {
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
}

#[derive(Debug, Clone, Copy)]
struct Connection {
    id: u64,
    received_at: Instant,
}

/// State for one tracker endpoint. Owns its UDP socket exclusively.
#[derive(Debug)]
pub struct TrackerSession {
    url: Url,
    host: String,
    port: u16,
    socket: Option<UdpSocket>,
    connection: Option<Connection>,
    info_hash: HashValue,
    peer_id: [u8; 20],
    listen_port: u16,
    key: u32,
    downloaded: u64,
    uploaded: u64,
    left: u64,
    announced: bool,
    interval: Duration,
    last_wait: Duration,
    stats: Option<AnnounceStats>,
    peers: Vec<Peer>,
    config: TrackerConfig,
}

impl TrackerSession {
    /// # Errors
    /// `UnsupportedTracker` unless `url` has the form `udp://host:port[/...]`.
    pub fn new(
        url: &Url,
        info_hash: HashValue,
        peer_id: [u8; 20],
        config: &SwarmConfig,
    ) -> Result<Self> {
        let unsupported = || TorrentError::UnsupportedTracker {
            url: url.to_string(),
        };
        if url.scheme() != "udp" {
            return Err(unsupported());
        }
        let host = url.host_str().ok_or_else(unsupported)?;
        let port = url.port().ok_or_else(unsupported)?;

        Ok(Self {
            url: url.clone(),
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            socket: None,
            connection: None,
            info_hash,
            peer_id,
            listen_port: config.client.listen_port,
            key: rand::random(),
            downloaded: 0,
            uploaded: 0,
            left: 0,
            announced: false,
            interval: config.tracker.default_announce_interval,
            last_wait: Duration::ZERO,
            stats: None,
            peers: Vec::new(),
            config: config.tracker.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Candidates returned by the most recent announce.
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn stats(&self) -> Option<AnnounceStats> {
        self.stats
    }

    /// Time spent waiting on unanswered requests during the last exchange.
    pub fn last_wait(&self) -> Duration {
        self.last_wait
    }

    pub fn connection_id(&self) -> Option<u64> {
        self.connection.map(|c| c.id)
    }

    /// Whether an announce has succeeded on this session.
    pub fn announced(&self) -> bool {
        self.announced
    }

    /// Forget the connection id so the next announce is preceded by a connect.
    pub fn reset_connection(&mut self) {
        self.connection = None;
    }

    /// Delay before retrying after `failures` consecutive failed exchanges.
    ///
    /// Starts at the announce floor plus the time the last exchange spent
    /// waiting, doubles per failure and is capped by the default interval.
    pub fn retry_backoff(&self, failures: u32) -> Duration {
        let base = self.config.min_announce_interval + self.last_wait;
        let factor = 1u32 << failures.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
        base.saturating_mul(factor).min(self.config.default_announce_interval.max(base))
    }

    /// True before the first connect and once the connection id is too old to announce with.
    pub fn connection_expired(&self) -> bool {
        self.connection
            .is_none_or(|c| c.received_at.elapsed() >= CONNECTION_ID_TTL)
    }

    /// Delay before the next announce: the tracker interval, never below the configured floor.
    pub fn next_announce_in(&self) -> Duration {
        self.interval.max(self.config.min_announce_interval)
    }

    pub fn update_counters(&mut self, downloaded: u64, uploaded: u64, left: u64) {
        self.downloaded = downloaded;
        self.uploaded = uploaded;
        self.left = left;
    }

    /// Obtain a connection id from the tracker, opening the socket on first use.
    ///
    /// # Errors
    /// `TrackerUnreachable` once every attempt timed out, `TrackerRejected`
    /// for an error action, `ProtocolMismatch` for a foreign transaction id,
    /// `SocketFailure` for resolution and socket errors.
    pub async fn connect(&mut self) -> Result<u64> {
        if self.socket.is_none() {
            self.socket = Some(self.open_socket().await?);
        }

        let transaction_id = rand::random();
        let request = ConnectRequest { transaction_id }.serialize();
        let response = self.exchange(&request).await?;
        let response = ConnectResponse::deserialize(&response, transaction_id)?;

        self.connection = Some(Connection {
            id: response.connection_id,
            received_at: Instant::now(),
        });
        debug!(tracker = %self.url, connection_id = response.connection_id, "connected");
        Ok(response.connection_id)
    }

    async fn open_socket(&self) -> Result<UdpSocket> {
        let remote = lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} resolved to no address", self.host),
                )
            })?;
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        debug!(tracker = %self.url, %remote, "socket open");
        Ok(socket)
    }

    /// Register with the tracker and collect peer candidates.
    ///
    /// The first announce carries event `started`, later ones `none`.
    /// The returned list replaces the one from the previous announce.
    ///
    /// # Errors
    /// `ProtocolMismatch` without a prior connect; otherwise as
    /// [`connect`](Self::connect), plus `MalformedAnnounceResponse`.
    pub async fn announce(&mut self) -> Result<&[Peer]> {
        let Some(connection) = self.connection else {
            return Err(TorrentError::mismatch("announce before connect"));
        };

        let event = if self.announced {
            AnnounceEvent::None
        } else {
            AnnounceEvent::Started
        };
        let transaction_id = rand::random();
        let request = AnnounceRequest {
            connection_id: connection.id,
            transaction_id,
            info_hash: self.info_hash,
            peer_id: self.peer_id,
            downloaded: self.downloaded,
            left: self.left,
            uploaded: self.uploaded,
            event,
            ip: 0,
            key: self.key,
            num_want: self.config.num_want,
            port: self.listen_port,
            extensions: self.config.extensions,
        }
        .serialize();

        let response = self.exchange(&request).await?;
        let response = AnnounceResponse::deserialize(&response, transaction_id)?;

        self.announced = true;
        self.interval = Duration::from_secs(u64::from(response.interval));
        self.stats = Some(AnnounceStats {
            interval: response.interval,
            leechers: response.leechers,
            seeders: response.seeders,
        });
        self.peers = response.peers;

        info!(
            tracker = %self.url,
            ?event,
            peers = self.peers.len(),
            seeders = response.seeders,
            leechers = response.leechers,
            "announced"
        );
        Ok(&self.peers)
    }

    /// Send `request` and wait for one datagram, resending on every timeout.
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| TorrentError::mismatch("tracker socket is not open"))?;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        self.last_wait = Duration::ZERO;

        for attempt in 1..=self.config.max_attempts {
            socket.send(request).await?;
            match timeout(self.config.attempt_timeout, socket.recv(&mut buf)).await {
                Ok(received) => {
                    let len = received?;
                    buf.truncate(len);
                    return Ok(buf);
                }
                Err(_) => {
                    self.last_wait += self.config.attempt_timeout;
                    warn!(tracker = %self.url, attempt, waited = ?self.last_wait, "no response");
                }
            }
        }

        Err(TorrentError::TrackerUnreachable {
            host: self.host.clone(),
        })
    }
}
