//! Peer registry for the authoritative server
//!
//! This module tracks every remote participant the server has heard from:
//! - Peer lifecycle (first datagram, stale, eviction)
//! - One reliability channel per peer for sequence/ack bookkeeping
//! - The newest avatar-input sample waiting for the next tick
//!
//! A peer that goes quiet is first marked `ignore`, so its controllers stop
//! interacting but keep their slot; only after a much longer silence is it
//! removed from the registry altogether.

use crate::world::PeerInput;
use log::{debug, info, warn};
use rand::Rng;
use shared::{sequence_greater_than, AvatarInput, Color, Frame, Pose, ReliableChannel, Vec3};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A remote participant and its connection state
///
/// Each peer keeps:
/// - Identity (server-assigned id, address, display color)
/// - Liveness (last datagram time, `ignore` once stale)
/// - Its own reliability channel
/// - The latest avatar sample not yet consumed by a tick
#[derive(Debug)]
pub struct Peer {
    /// Server-assigned id, also the upper bits of its controller ids
    pub id: u32,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub channel: ReliableChannel,
    /// Color used for this peer's avatar
    pub color: Color,
    pub headset: Pose,
    /// Headset velocity estimated from consecutive samples
    pub velocity: Vec3,
    pub ignore: bool,
    pending: Option<AvatarInput>,
    last_input_seq: Option<i32>,
    last_input_at: Option<Instant>,
}

impl Peer {
    /// Creates a peer with a random avatar color, marked as just seen
    pub fn new(id: u32, addr: SocketAddr, now: Instant) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            id,
            addr,
            last_seen: now,
            channel: ReliableChannel::new(),
            color: [
                rng.gen_range(64..=255),
                rng.gen_range(64..=255),
                rng.gen_range(64..=255),
                255,
            ],
            headset: Pose::IDENTITY,
            velocity: Vec3::ZERO,
            ignore: false,
            pending: None,
            last_input_seq: None,
            last_input_at: None,
        }
    }

    /// Accepts an avatar sample unless a newer one was already taken
    ///
    /// Input frames may arrive reordered; a sample older than the last one
    /// applied would move the controllers backwards in time, so it is dropped.
    pub fn offer_input(&mut self, seq: i32, input: AvatarInput, now: Instant) -> bool {
        if self.last_input_seq.map_or(false, |last| !sequence_greater_than(seq, last)) {
            debug!("Peer {} dropped stale input seq {}", self.id, seq);
            return false;
        }

        if let Some(at) = self.last_input_at {
            let dt = now.duration_since(at).as_secs_f32();
            if dt > 0.0 {
                self.velocity = (input.headset.position - self.headset.position) * (1.0 / dt);
            }
        }
        self.headset = input.headset;
        self.last_input_seq = Some(seq);
        self.last_input_at = Some(now);
        self.pending = Some(input);
        true
    }

    /// Checks if the peer has been silent for longer than `timeout`
    pub fn is_silent(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Why an incoming datagram did not reach a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Registry is at `max_peers`
    Full,
    /// Payload is not an avatar-input record
    Malformed,
}

/// Manages every known peer keyed by its address
///
/// The registry enforces the peer limit, turns incoming frames into pending
/// avatar samples and applies the stale/evict policy. The tick loop drains it
/// once per tick with [`ClientManager::take_inputs`].
pub struct ClientManager {
    peers: HashMap<SocketAddr, Peer>,
    next_peer_id: u32,
    max_peers: usize,
    stale_after: Duration,
    evict_after: Duration,
}

impl ClientManager {
    /// Creates an empty registry
    ///
    /// Peer ids start from 1 and are never handed out twice.
    pub fn new(max_peers: usize, stale_after: Duration, evict_after: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            next_peer_id: 1,
            max_peers,
            stale_after,
            evict_after,
        }
    }

    /// Records a decoded frame from `addr`
    ///
    /// Unknown addresses become new peers if the payload is a valid avatar
    /// record and there is room. The frame always goes through the peer's
    /// channel so it is acknowledged, even if its input turns out stale.
    pub fn receive(&mut self, addr: SocketAddr, frame: Frame, now: Instant) -> Result<u32, Rejection> {
        let input = AvatarInput::decode(&frame.payload);

        if !self.peers.contains_key(&addr) {
            if input.is_err() {
                return Err(Rejection::Malformed);
            }
            if self.peers.len() >= self.max_peers {
                return Err(Rejection::Full);
            }
            let id = self.next_peer_id;
            self.next_peer_id += 1;
            info!("Peer {} joined from {}", id, addr);
            self.peers.insert(addr, Peer::new(id, addr, now));
        }

        let peer = self.peers.get_mut(&addr).ok_or(Rejection::Full)?;
        peer.last_seen = now;
        if peer.ignore {
            info!("Peer {} is back", peer.id);
            peer.ignore = false;
        }

        let seq = frame.header.seq;
        peer.channel.receive_packet(frame);
        peer.channel.drain_inbox().for_each(drop);

        match input {
            Ok(input) => {
                peer.offer_input(seq, input, now);
                Ok(peer.id)
            }
            Err(e) => {
                debug!("Peer {} sent a bad avatar record: {}", peer.id, e);
                Err(Rejection::Malformed)
            }
        }
    }

    /// Hands every peer's state to the tick: its newest unconsumed sample
    /// (if any) and whether it is being ignored.
    pub fn take_inputs(&mut self) -> Vec<PeerInput> {
        let mut inputs: Vec<PeerInput> = self
            .peers
            .values_mut()
            .map(|peer| PeerInput {
                peer: peer.id,
                avatar: peer.pending.take(),
                ignore: peer.ignore,
            })
            .collect();
        inputs.sort_by_key(|i| i.peer);
        inputs
    }

    /// Applies the stale/evict policy
    ///
    /// Peers silent for `stale_after` are marked ignored; peers silent for
    /// `evict_after` are removed. Returns the ids of removed peers so the
    /// world can drop their controllers.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<u32> {
        let mut evicted = Vec::new();
        for peer in self.peers.values_mut() {
            if !peer.ignore && peer.is_silent(self.stale_after, now) {
                warn!("Peer {} went stale; ignoring its controllers", peer.id);
                peer.ignore = true;
            }
            if peer.is_silent(self.evict_after, now) {
                evicted.push(peer.id);
            }
        }

        self.peers.retain(|_, peer| {
            let keep = !evicted.contains(&peer.id);
            if !keep {
                info!("Peer {} evicted", peer.id);
            }
            keep
        });
        evicted
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.peers.get(&addr).map(|p| p.id)
    }

    pub fn peer(&self, addr: SocketAddr) -> Option<&Peer> {
        self.peers.get(&addr)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn peers_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    /// Returns the number of known peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if no peers are known
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
