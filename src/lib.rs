pub mod config;
pub mod error;
pub mod logging;
pub mod magnet;
pub mod peer;
pub mod swarm;
pub mod torrent;
pub mod tracker;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for easier access
pub use config::SwarmConfig;
pub use error::{Result, TorrentError};
pub use magnet::MagnetUri;
pub use peer::{Peer, PeerSession};
pub use swarm::{Swarm, SwarmEvent};
pub use torrent::{Descriptor, HashValue};
pub use tracker::TrackerSession;
