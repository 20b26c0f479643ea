//! Tunable parameters for a swarm run.
//!
//! Everything the engines need is passed in through [`SwarmConfig`]; nothing
//! is read from globals or the environment.

use std::time::Duration;

/// Top-level configuration handed to [`crate::swarm::Swarm::new`].
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub client: ClientConfig,
    pub tracker: TrackerConfig,
    pub peer: PeerConfig,
    /// Capacity of the broadcast channel carrying swarm events
    pub event_capacity: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            tracker: TrackerConfig::default(),
            peer: PeerConfig::default(),
            event_capacity: 1024,
        }
    }
}

/// Identity of the local client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Fixed peer id; a random `-RS0001-` id is generated per run when unset
    pub peer_id: Option<[u8; 20]>,
    /// Port announced to trackers
    pub listen_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            listen_port: 6881,
        }
    }
}

/// UDP tracker exchange parameters.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Read deadline for a single request attempt
    pub attempt_timeout: Duration,
    /// Total number of sends before a tracker is declared unreachable
    pub max_attempts: u32,
    /// Requested peer count, -1 lets the tracker decide
    pub num_want: i32,
    /// Value of the trailing extensions field of the announce request
    pub extensions: u16,
    /// Keep announcing on the tracker interval instead of stopping after the first announce
    pub reannounce: bool,
    /// Interval used until a tracker reports its own
    pub default_announce_interval: Duration,
    /// Lower bound applied to tracker-provided intervals
    pub min_announce_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(15),
            max_attempts: 4,
            num_want: -1,
            extensions: 0,
            reannounce: true,
            default_announce_interval: Duration::from_secs(1800),
            min_announce_interval: Duration::from_secs(15),
        }
    }
}

/// TCP peer connection parameters.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Deadline for the TCP dial
    pub connect_timeout: Duration,
    /// Bytes reserved in the receive buffer before each socket read
    pub read_chunk: usize,
    /// Largest accepted frame length; longer frames fail the connection
    pub max_frame_length: u32,
    /// Upper bound on concurrently connected peers
    pub max_connections: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_chunk: 4096,
            max_frame_length: 1 << 21, // 2 MiB
            max_connections: 200,
        }
    }
}
