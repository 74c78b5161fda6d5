//! Liveness probing of idle peers.
//!
//! The server records every datagram it receives. Once per interval the
//! prober pings peers that have been silent for at least one interval with
//! an empty Confirmable message. A peer that stays silent for `probes`
//! consecutive pings is reported inactive and forgotten.
//!
//! Inactivity is only logged. Observers of an inactive peer stay
//! registered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use coap_lite::{MessageClass, MessageType, Packet};
use tokio::time::Instant;

/// Probe schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// Unanswered probes before a peer is reported inactive.
    pub probes: u32,
    /// Idle time before the first probe and between probes.
    pub interval: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            probes: 8,
            interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PeerState {
    last_seen: Instant,
    missed: u32,
}

/// What the prober should do for one peer on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeAction {
    /// Send a ping to the peer.
    Ping(SocketAddr),
    /// The peer exhausted its probes.
    Inactive(SocketAddr),
}

/// Per-peer activity bookkeeping.
#[derive(Debug)]
pub struct LivenessTracker {
    config: KeepAliveConfig,
    peers: HashMap<SocketAddr, PeerState>,
}

impl LivenessTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(config: KeepAliveConfig) -> Self {
        Self {
            config,
            peers: HashMap::new(),
        }
    }

    /// Records traffic from `addr`, resetting its missed-probe count.
    pub fn touch(&mut self, addr: SocketAddr, now: Instant) {
        self.peers.insert(
            addr,
            PeerState {
                last_seen: now,
                missed: 0,
            },
        );
    }

    /// Advances the schedule to `now`.
    ///
    /// Peers idle for at least one interval either get another probe or,
    /// once `probes` probes went unanswered, are dropped and reported.
    pub fn tick(&mut self, now: Instant) -> Vec<ProbeAction> {
        let mut actions = Vec::new();
        let interval = self.config.interval;
        let probes = self.config.probes;

        self.peers.retain(|addr, state| {
            if now.saturating_duration_since(state.last_seen) < interval {
                return true;
            }
            if state.missed >= probes {
                actions.push(ProbeAction::Inactive(*addr));
                return false;
            }
            state.missed += 1;
            state.last_seen = now;
            actions.push(ProbeAction::Ping(*addr));
            true
        });

        actions
    }

    /// Number of tracked peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns `true` if no peer is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Builds an empty Confirmable message (CoAP ping).
#[must_use]
pub fn ping_packet(message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Confirmable);
    packet.header.code = MessageClass::Empty;
    packet.header.message_id = message_id;
    packet
}
