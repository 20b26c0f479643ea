use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use rs_swarm::logging::init_tracing;
use rs_swarm::{Descriptor, Swarm, SwarmConfig, SwarmEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{Level, debug, error, info, warn};

/// Join the swarm of a magnet link and talk to its peers
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Magnet URI with one btih topic, a display name and UDP trackers
    magnet: String,

    /// Listening port announced to trackers
    #[arg(short, long, default_value_t = 6881)]
    port: u16,

    /// Fixed 20-byte peer id (random -RS0001- id when omitted)
    #[arg(long, value_parser = parse_peer_id)]
    peer_id: Option<[u8; 20]>,

    /// Maximum number of concurrent peer connections
    #[arg(long, default_value_t = 200)]
    max_peers: usize,

    /// Announce once per tracker instead of following the tracker interval
    #[arg(long)]
    no_reannounce: bool,

    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,
}

fn parse_peer_id(value: &str) -> Result<[u8; 20], String> {
    value
        .as_bytes()
        .try_into()
        .map_err(|_| format!("peer id must be 20 bytes, got {}", value.len()))
}

impl Args {
    fn config(&self) -> SwarmConfig {
        let mut config = SwarmConfig::default();
        config.client.listen_port = self.port;
        config.client.peer_id = self.peer_id;
        config.peer.max_connections = self.max_peers;
        config.tracker.reannounce = !self.no_reannounce;
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();
    init_tracing(args.log_level)?;

    let descriptor = Descriptor::from_magnet_str(&args.magnet)?;
    info!(%descriptor, "loaded magnet");

    let swarm = Arc::new(Swarm::new(args.config()));
    let mut events = swarm.subscribe();

    let cancel = swarm.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, shutting down");
        }
        cancel.cancel();
    });

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = swarm.start(descriptor).await;
    // closes the event channel
    drop(swarm);
    let _ = printer.await;
    result?;
    Ok(())
}

fn log_event(event: &SwarmEvent) {
    match event {
        SwarmEvent::TrackerConnected { tracker } => info!(%tracker, "tracker connected"),
        SwarmEvent::TrackerAnnounced { tracker, peers } => info!(%tracker, peers, "tracker announced"),
        SwarmEvent::TrackerFailed { tracker, error } => warn!(%tracker, error, "tracker failed"),
        SwarmEvent::PeerAdmitted { peer } => debug!(%peer, "peer admitted"),
        SwarmEvent::PeerDuplicate { peer } => debug!(%peer, "duplicate peer"),
        SwarmEvent::PeerConnected {
            peer,
            remote_peer_id,
            extensions,
        } => info!(
            %peer,
            remote_peer_id = %String::from_utf8_lossy(remote_peer_id),
            extensions,
            "peer connected"
        ),
        SwarmEvent::PeerMessage { peer, message } => info!(%peer, ?message, "message"),
        SwarmEvent::PeerClosed { peer } => info!(%peer, "peer closed"),
        SwarmEvent::PeerFailed { peer, error: reason } => error!(%peer, reason, "peer failed"),
    }
}
