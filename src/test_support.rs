//! Loopback mock tracker and mock peer used by the async tests.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use url::Url;

use crate::peer::Peer;
use crate::peer::handshake::{HANDSHAKE_LEN, Handshake};
use crate::torrent::HashValue;

pub const CONNECTION_ID: u64 = 0x0A0B0C0D0E0F1011;

/// How the mock tracker answers.
#[derive(Debug, Clone)]
pub enum TrackerScript {
    /// Well-formed connect and announce responses carrying these peers
    Respond(Vec<Peer>),
    /// Never answer
    Silent,
    /// Answer connect with a transaction id off by one
    WrongTransaction,
    /// Answer everything with an error action
    Reject(String),
    /// Answer announce with this raw body after the 8-byte header
    AnnounceBody(Vec<u8>),
    /// Answer connect, never answer announce
    SilentAnnounce,
    /// Answer everything with interval 0 and no peers, except that the
    /// `dropped` announces after the first one go unanswered
    AnnounceOutage { dropped: usize },
}

pub struct MockTracker {
    pub addr: SocketAddr,
    datagrams: Arc<Mutex<Vec<Vec<u8>>>>,
    task: JoinHandle<()>,
}

impl MockTracker {
    pub async fn spawn(script: TrackerScript) -> Self {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let datagrams = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&datagrams);

        let task = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let mut announces = 0;
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let request = buf[..len].to_vec();
                log.lock().unwrap().push(request.clone());
                if len < 16 {
                    continue;
                }
                let action = u32::from_be_bytes(request[8..12].try_into().unwrap());
                let transaction_id = u32::from_be_bytes(request[12..16].try_into().unwrap());
                if action == 1 {
                    announces += 1;
                }
                if let Some(reply) = reply(&script, action, transaction_id, announces) {
                    let _ = socket.send_to(&reply, from).await;
                }
            }
        });

        Self {
            addr,
            datagrams,
            task,
        }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("udp://{}/announce", self.addr)).unwrap()
    }

    pub fn datagrams(&self) -> Vec<Vec<u8>> {
        self.datagrams.lock().unwrap().clone()
    }
}

impl Drop for MockTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// `announces` counts announce requests received so far, this one included.
fn reply(
    script: &TrackerScript,
    action: u32,
    transaction_id: u32,
    announces: usize,
) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    match (script, action) {
        (TrackerScript::Silent, _) => return None,
        (TrackerScript::Reject(message), _) => {
            out.extend_from_slice(&3u32.to_be_bytes());
            out.extend_from_slice(&transaction_id.to_be_bytes());
            out.extend_from_slice(message.as_bytes());
        }
        (TrackerScript::WrongTransaction, _) => {
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&transaction_id.wrapping_add(1).to_be_bytes());
            out.extend_from_slice(&CONNECTION_ID.to_be_bytes());
        }
        (TrackerScript::SilentAnnounce, 1) => return None,
        (TrackerScript::AnnounceOutage { dropped }, 1) if (2..=1 + dropped).contains(&announces) => {
            return None;
        }
        (_, 0) => {
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&transaction_id.to_be_bytes());
            out.extend_from_slice(&CONNECTION_ID.to_be_bytes());
        }
        (TrackerScript::AnnounceBody(body), 1) => {
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(&transaction_id.to_be_bytes());
            out.extend_from_slice(body);
        }
        (TrackerScript::Respond(peers), 1) => {
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(&transaction_id.to_be_bytes());
            out.extend_from_slice(&1800u32.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&(peers.len() as u32).to_be_bytes());
            for peer in peers {
                out.extend_from_slice(&peer.ip_addr.octets());
                out.extend_from_slice(&peer.port.to_be_bytes());
            }
        }
        (TrackerScript::AnnounceOutage { .. }, 1) => {
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(&transaction_id.to_be_bytes());
            out.extend_from_slice(&[0u8; 12]);
        }
        _ => return None,
    }
    Some(out)
}

/// Accepts connections, answers the handshake with `reply_hash`, writes
/// `frames`, then either closes or holds the connection until the client
/// goes away.
pub struct MockPeer {
    pub peer: Peer,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockPeer {
    pub async fn spawn(reply_hash: HashValue, frames: Vec<u8>, close_after: bool) -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let frames = frames.clone();
                tokio::spawn(async move {
                    let mut inbound = [0u8; HANDSHAKE_LEN];
                    if stream.read_exact(&mut inbound).await.is_err() {
                        return;
                    }
                    let reply = Handshake::new(reply_hash, *b"-MO0001-mockpeer0001");
                    if stream.write_all(&reply.serialize()).await.is_err() {
                        return;
                    }
                    if stream.write_all(&frames).await.is_err() || close_after {
                        return;
                    }
                    let mut sink = [0u8; 256];
                    while let Ok(n) = stream.read(&mut sink).await {
                        if n == 0 {
                            return;
                        }
                    }
                });
            }
        });

        Self {
            peer: Peer {
                ip_addr: Ipv4Addr::LOCALHOST,
                port,
            },
            accepted,
            task,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
