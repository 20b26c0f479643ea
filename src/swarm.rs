//! Fans tracker discoveries into one channel and runs a session per unique peer.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{PeerConfig, SwarmConfig};
use crate::error::{Result, TorrentError};
use crate::peer::message::Message;
use crate::peer::{Peer, PeerSession};
use crate::torrent::{Descriptor, HashValue};
use crate::tracker::TrackerSession;

pub const PEER_ID_PREFIX: &[u8; 8] = b"-RS0001-";

/// Progress notifications published while a swarm runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmEvent {
    TrackerConnected {
        tracker: Url,
    },
    TrackerAnnounced {
        tracker: Url,
        peers: usize,
    },
    /// The tracker contributes no (further) peers; the swarm carries on
    TrackerFailed {
        tracker: Url,
        error: String,
    },
    PeerAdmitted {
        peer: Peer,
    },
    /// Candidate already in the registry, dropped
    PeerDuplicate {
        peer: Peer,
    },
    PeerConnected {
        peer: Peer,
        remote_peer_id: [u8; 20],
        extensions: bool,
    },
    PeerMessage {
        peer: Peer,
        message: Message,
    },
    PeerClosed {
        peer: Peer,
    },
    PeerFailed {
        peer: Peer,
        error: String,
    },
}

/// Where an admitted peer's task stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Running,
    Closed,
    Failed,
}

/// Every peer address admitted during a run, keyed `ip:port`.
///
/// The peer session itself is owned by its task; the registry records the
/// address and how that task ended. Only the consuming loop touches it, so
/// admission needs no locking.
#[derive(Debug, Default)]
pub struct Registry {
    peers: HashMap<String, PeerStatus>,
}

impl Registry {
    /// Returns false when a peer with the same address was already admitted.
    pub fn admit(&mut self, peer: Peer) -> bool {
        match self.peers.entry(peer.key()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(PeerStatus::Running);
                true
            }
        }
    }

    /// Record the outcome of an admitted peer's task.
    pub fn finish(&mut self, peer: Peer, status: PeerStatus) {
        if let Some(entry) = self.peers.get_mut(&peer.key()) {
            *entry = status;
        }
    }

    pub fn status(&self, peer: &Peer) -> Option<PeerStatus> {
        self.peers.get(&peer.key()).copied()
    }

    pub fn admitted(&self) -> usize {
        self.peers.len()
    }

    pub fn running(&self) -> usize {
        self.peers
            .values()
            .filter(|status| **status == PeerStatus::Running)
            .count()
    }
}

/// What a finished swarm task reports back to the consuming loop.
#[derive(Debug)]
enum TaskOutcome {
    Tracker,
    Peer { peer: Peer, status: PeerStatus },
}

/// Permits for concurrent peer connections: at least one, at most what a
/// semaphore can hold.
fn connection_permits(config: &PeerConfig) -> usize {
    config.max_connections.clamp(1, Semaphore::MAX_PERMITS)
}

/// `-RS0001-` followed by 12 random alphanumeric bytes.
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
    let mut rng = rand::rng();
    for byte in &mut peer_id[8..] {
        *byte = rng.sample(Alphanumeric);
    }
    peer_id
}

pub struct Swarm {
    config: SwarmConfig,
    events: broadcast::Sender<SwarmEvent>,
    cancel: CancellationToken,
}

impl Swarm {
    pub fn new(config: SwarmConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run the swarm for `descriptor` until cancelled.
    ///
    /// Tracker and peer failures are reported as events and never end the
    /// run. Returns once cancellation was requested and every spawned task
    /// has exited, which closes all sockets.
    pub async fn start(&self, descriptor: Descriptor) -> Result<()> {
        let info_hash = *descriptor.hash_value();
        let peer_id = self.config.client.peer_id.unwrap_or_else(generate_peer_id);
        info!(
            name = descriptor.display_name(),
            info_hash = %hex::encode(info_hash),
            peer_id = %String::from_utf8_lossy(&peer_id),
            trackers = descriptor.trackers().len(),
            "starting swarm"
        );

        let (candidates, mut discovered) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        for url in descriptor.trackers() {
            match TrackerSession::new(url, info_hash, peer_id, &self.config) {
                Ok(session) => {
                    tasks.spawn(run_tracker(
                        session,
                        candidates.clone(),
                        self.cancel.clone(),
                        self.events.clone(),
                        self.config.tracker.reannounce,
                    ));
                }
                Err(e) => {
                    warn!(tracker = %url, error = %e, "skipping tracker");
                    emit(
                        &self.events,
                        SwarmEvent::TrackerFailed {
                            tracker: url.clone(),
                            error: e.to_string(),
                        },
                    );
                }
            }
        }
        // the channel closes once the last tracker task is done
        drop(candidates);

        let permits = Arc::new(Semaphore::new(connection_permits(&self.config.peer)));
        let mut registry = Registry::default();
        let mut discovering = true;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                candidate = discovered.recv(), if discovering => match candidate {
                    Some(peer) => self.consider(
                        peer,
                        &mut registry,
                        &mut tasks,
                        &permits,
                        info_hash,
                        peer_id,
                    ),
                    None => {
                        debug!("all trackers finished");
                        discovering = false;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    reap(&mut registry, joined);
                }
            }
        }

        info!(
            admitted = registry.admitted(),
            running = registry.running(),
            tasks = tasks.len(),
            "stopping swarm"
        );
        while let Some(joined) = tasks.join_next().await {
            reap(&mut registry, joined);
        }
        Ok(())
    }

    fn consider(
        &self,
        peer: Peer,
        registry: &mut Registry,
        tasks: &mut JoinSet<TaskOutcome>,
        permits: &Arc<Semaphore>,
        info_hash: HashValue,
        peer_id: [u8; 20],
    ) {
        if !registry.admit(peer) {
            debug!(%peer, "duplicate candidate");
            emit(&self.events, SwarmEvent::PeerDuplicate { peer });
            return;
        }

        debug!(%peer, admitted = registry.admitted(), "new peer");
        emit(&self.events, SwarmEvent::PeerAdmitted { peer });
        let session = PeerSession::new(peer, info_hash, peer_id, self.config.peer.clone());
        tasks.spawn(run_peer(
            session,
            Arc::clone(permits),
            self.cancel.clone(),
            self.events.clone(),
        ));
    }
}

fn emit(events: &broadcast::Sender<SwarmEvent>, event: SwarmEvent) {
    // no subscribers is fine
    let _ = events.send(event);
}

fn reap(
    registry: &mut Registry,
    joined: std::result::Result<TaskOutcome, tokio::task::JoinError>,
) {
    match joined {
        Ok(TaskOutcome::Peer { peer, status }) => {
            registry.finish(peer, status);
            debug!(%peer, ?status, running = registry.running(), "peer task done");
        }
        Ok(TaskOutcome::Tracker) => {}
        Err(e) if e.is_panic() => warn!(error = %e, "swarm task panicked"),
        Err(_) => {}
    }
}

async fn run_tracker(
    mut session: TrackerSession,
    candidates: mpsc::UnboundedSender<Peer>,
    cancel: CancellationToken,
    events: broadcast::Sender<SwarmEvent>,
    reannounce: bool,
) -> TaskOutcome {
    let tracker = session.url().clone();
    tokio::select! {
        _ = cancel.cancelled() => debug!(%tracker, "tracker task cancelled"),
        result = discover(&mut session, &candidates, &events, reannounce) => {
            if let Err(e) = result {
                warn!(%tracker, error = %e, "tracker failed");
                emit(&events, SwarmEvent::TrackerFailed {
                    tracker,
                    error: e.to_string(),
                });
            }
        }
    }
    TaskOutcome::Tracker
}

/// Announce until the swarm loop goes away.
///
/// A failure before the first successful announce ends discovery for this
/// tracker. Later failures are reported, backed off and retried with a
/// fresh connection id.
async fn discover(
    session: &mut TrackerSession,
    candidates: &mpsc::UnboundedSender<Peer>,
    events: &broadcast::Sender<SwarmEvent>,
    reannounce: bool,
) -> Result<()> {
    let tracker = session.url().clone();
    let mut failures = 0;
    loop {
        let wait = match announce_round(session, candidates, events).await {
            Ok(false) => return Ok(()),
            Ok(true) if !reannounce => return Ok(()),
            Ok(true) => {
                failures = 0;
                session.next_announce_in()
            }
            Err(e) if !session.announced() => return Err(e),
            Err(e) => {
                failures += 1;
                warn!(%tracker, error = %e, failures, "re-announce failed");
                emit(
                    events,
                    SwarmEvent::TrackerFailed {
                        tracker: tracker.clone(),
                        error: e.to_string(),
                    },
                );
                session.reset_connection();
                session.retry_backoff(failures)
            }
        };
        debug!(%tracker, ?wait, "next announce");
        tokio::time::sleep(wait).await;
    }
}

/// Connect if needed, announce and forward the candidates.
/// Returns false once the swarm loop stopped listening.
async fn announce_round(
    session: &mut TrackerSession,
    candidates: &mpsc::UnboundedSender<Peer>,
    events: &broadcast::Sender<SwarmEvent>,
) -> Result<bool> {
    let tracker = session.url().clone();
    if session.connection_expired() {
        session.connect().await?;
        emit(
            events,
            SwarmEvent::TrackerConnected {
                tracker: tracker.clone(),
            },
        );
    }

    let peers = session.announce().await?;
    emit(
        events,
        SwarmEvent::TrackerAnnounced {
            tracker,
            peers: peers.len(),
        },
    );
    Ok(peers.iter().all(|peer| candidates.send(*peer).is_ok()))
}

async fn run_peer(
    mut session: PeerSession,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    events: broadcast::Sender<SwarmEvent>,
) -> TaskOutcome {
    let peer = session.peer();
    let result = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        result = drive_peer(&mut session, &permits, &events) => result,
    };
    session.close();

    let status = match result {
        Ok(()) | Err(TorrentError::ConnectionClosed) => {
            debug!(%peer, "peer closed");
            emit(&events, SwarmEvent::PeerClosed { peer });
            PeerStatus::Closed
        }
        Err(e) => {
            warn!(%peer, error = %e, "peer failed");
            emit(
                &events,
                SwarmEvent::PeerFailed {
                    peer,
                    error: e.to_string(),
                },
            );
            PeerStatus::Failed
        }
    };
    TaskOutcome::Peer { peer, status }
}

/// Connect, then receive until the connection ends.
async fn drive_peer(
    session: &mut PeerSession,
    permits: &Semaphore,
    events: &broadcast::Sender<SwarmEvent>,
) -> Result<()> {
    let Ok(_permit) = permits.acquire().await else {
        return Ok(());
    };
    let peer = session.peer();

    session.connect().await?;
    info!(%peer, "peer connected");
    emit(
        events,
        SwarmEvent::PeerConnected {
            peer,
            remote_peer_id: session.remote_peer_id().unwrap_or_default(),
            extensions: session.remote_supports_extensions(),
        },
    );

    loop {
        if let Some(message) = session.receive_once().await? {
            if let Message::Bitfield(bitfield) = &message {
                debug!(%peer, pieces = bitfield.count(), "peer bitfield");
            }
            debug!(%peer, ?message, "message");
            emit(events, SwarmEvent::PeerMessage { peer, message });
        }
    }
}
