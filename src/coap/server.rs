//! UDP CoAP server: receive loop, per-peer request queues, ping handling.
//!
//! Requests from one source address are handled one at a time, in arrival
//! order, by a worker task owned by that peer. Different peers proceed
//! concurrently. The worker also deduplicates retransmissions (see
//! [`super::exchange`]).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use coap_lite::{
    CoapOption, ContentFormat, MessageClass, MessageType, Packet, RequestType, ResponseType,
};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::exchange::{EXCHANGE_LIFETIME, ExchangeCache, MAX_EXCHANGES};
use super::keepalive::{KeepAliveConfig, LivenessTracker, ProbeAction, ping_packet};
use super::{CoapPeer, MessageIds, Reply, Request, Router};
use crate::domain::ObserveToken;
use crate::error::BridgeError;

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 65_535;

/// Requests queued per peer; further datagrams are dropped until the
/// worker catches up.
const PEER_QUEUE: usize = 128;

/// CoAP server bound to one UDP socket.
///
/// Every reply is framed uniformly (token echo, piggybacked ACK for
/// Confirmable requests, `text/plain` for non-empty bodies).
#[derive(Debug)]
pub struct CoapServer {
    socket: Arc<UdpSocket>,
    router: Arc<Router>,
    ids: MessageIds,
    keepalive: Option<KeepAliveConfig>,
    exchange_lifetime: Duration,
}

/// Queue feeding one peer's worker.
#[derive(Debug)]
struct PeerQueue {
    requests: mpsc::Sender<(RequestType, Packet)>,
    last_seen: Instant,
}

impl CoapServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        router: Router,
        keepalive: Option<KeepAliveConfig>,
    ) -> Result<Self, BridgeError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            router: Arc::new(router),
            ids: MessageIds::new(initial_message_id()),
            keepalive,
            exchange_lifetime: EXCHANGE_LIFETIME,
        })
    }

    /// Address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, BridgeError> {
        Ok(self.socket.local_addr()?)
    }

    /// Runs the receive loop until the future is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] on a socket error other than the
    /// ICMP-induced resets UDP sockets report for unreachable peers.
    /// Per-datagram failures are logged and skipped.
    pub async fn serve(self) -> Result<(), BridgeError> {
        let tracker = self
            .keepalive
            .map(|config| Arc::new(Mutex::new(LivenessTracker::new(config))));
        let _prober = tracker.as_ref().zip(self.keepalive).map(|(tracker, config)| {
            AbortOnDrop(tokio::spawn(probe_loop(
                Arc::clone(&self.socket),
                Arc::clone(tracker),
                self.ids.clone(),
                config,
            )))
        });

        tracing::info!(addr = ?self.socket.local_addr().ok(), "coap server listening");

        let mut queues: HashMap<SocketAddr, PeerQueue> = HashMap::new();
        let mut last_sweep = Instant::now();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) if is_transient(&err) => {
                    tracing::debug!(error = %err, "coap receive failed");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let now = Instant::now();
            if let Some(tracker) = &tracker {
                tracker.lock().await.touch(src, now);
            }
            if now.saturating_duration_since(last_sweep) >= self.exchange_lifetime / 4 {
                self.sweep_idle(&mut queues, now);
                last_sweep = now;
            }

            let Some(datagram) = buf.get(..len) else {
                continue;
            };
            match Packet::from_bytes(datagram) {
                Ok(packet) => self.dispatch(&mut queues, packet, src, now).await,
                Err(err) => tracing::debug!(peer = %src, error = ?err, "dropping undecodable datagram"),
            }
        }
    }

    async fn dispatch(
        &self,
        queues: &mut HashMap<SocketAddr, PeerQueue>,
        packet: Packet,
        src: SocketAddr,
        now: Instant,
    ) {
        match packet.header.code {
            MessageClass::Request(method) => self.enqueue(queues, method, packet, src, now),
            MessageClass::Empty => {
                if packet.header.get_type() == MessageType::Confirmable {
                    let peer = CoapPeer::new(Arc::clone(&self.socket), src, self.ids.clone());
                    let reset = reset_packet(packet.header.message_id);
                    if let Err(err) = peer.send(&reset).await {
                        tracing::warn!(peer = %src, error = %err, "failed answering coap ping");
                    }
                } else {
                    tracing::trace!(peer = %src, mid = packet.header.message_id, "empty message");
                }
            }
            other => tracing::debug!(peer = %src, code = ?other, "ignoring coap message"),
        }
    }

    /// Hands a request to the peer's worker, starting one if needed.
    fn enqueue(
        &self,
        queues: &mut HashMap<SocketAddr, PeerQueue>,
        method: RequestType,
        packet: Packet,
        src: SocketAddr,
        now: Instant,
    ) {
        let request = match queues.get_mut(&src) {
            Some(queue) => match queue.requests.try_send((method, packet)) {
                Ok(()) => {
                    queue.last_seen = now;
                    return;
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(peer = %src, "peer request queue full, dropping request");
                    return;
                }
                Err(TrySendError::Closed(request)) => request,
            },
            None => (method, packet),
        };

        let (requests, rx) = mpsc::channel(PEER_QUEUE);
        if requests.try_send(request).is_err() {
            return;
        }
        let worker = PeerWorker {
            router: Arc::clone(&self.router),
            peer: CoapPeer::new(Arc::clone(&self.socket), src, self.ids.clone()),
            exchanges: ExchangeCache::new(self.exchange_lifetime, MAX_EXCHANGES),
        };
        tokio::spawn(worker.run(rx));
        queues.insert(src, PeerQueue { requests, last_seen: now });
    }

    /// Drops queues of peers silent for a whole exchange lifetime; their
    /// workers finish what is queued and exit.
    fn sweep_idle(&self, queues: &mut HashMap<SocketAddr, PeerQueue>, now: Instant) {
        let lifetime = self.exchange_lifetime;
        queues.retain(|_, queue| {
            !queue.requests.is_closed() && now.saturating_duration_since(queue.last_seen) < lifetime
        });
    }
}

/// Serial request processor for one peer.
#[derive(Debug)]
struct PeerWorker {
    router: Arc<Router>,
    peer: CoapPeer,
    exchanges: ExchangeCache,
}

impl PeerWorker {
    async fn run(mut self, mut requests: mpsc::Receiver<(RequestType, Packet)>) {
        while let Some((method, packet)) = requests.recv().await {
            self.process(method, packet).await;
        }
        tracing::trace!(peer = %self.peer.addr(), "peer worker stopped");
    }

    async fn process(&mut self, method: RequestType, packet: Packet) {
        let mid = packet.header.message_id;

        if let Some(cached) = self.exchanges.duplicate(mid, Instant::now()) {
            tracing::debug!(peer = %self.peer.addr(), mid, "duplicate coap request");
            if let Some(response) = cached
                && let Err(err) = self.peer.send(response).await
            {
                tracing::error!(peer = %self.peer.addr(), error = %err, "failed replaying coap response");
            }
            return;
        }

        let response = handle_request(&self.router, &packet, method, &self.peer).await;
        if let Err(err) = self.peer.send(&response).await {
            tracing::error!(peer = %self.peer.addr(), error = %err, "failed sending coap message");
        }

        let replay = (packet.header.get_type() == MessageType::Confirmable).then_some(response);
        self.exchanges.complete(mid, replay, Instant::now());
    }
}

async fn handle_request(
    router: &Router,
    packet: &Packet,
    method: RequestType,
    peer: &CoapPeer,
) -> Packet {
    let path = uri_path(packet);
    tracing::debug!(
        peer = %peer.addr(),
        method = ?method,
        path = %path.join("/"),
        "coap request"
    );

    let reply = match router.resolve(&path) {
        Some((handler, params)) => {
            let request = Request {
                method,
                token: ObserveToken::new(packet.get_token().to_vec()),
                observe: packet.get_observe_value().and_then(Result::ok),
                params,
                payload: packet.payload.clone(),
                peer: peer.clone(),
            };
            handler.handle(request).await
        }
        None => Reply::empty(ResponseType::NotFound),
    };

    response_packet(packet, &reply, peer.ids())
}

/// Uri-Path option segments of a request, decoded lossily as UTF-8.
#[must_use]
pub fn uri_path(packet: &Packet) -> Vec<String> {
    packet
        .get_option(CoapOption::UriPath)
        .map(|segments| {
            segments
                .iter()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect()
        })
        .unwrap_or_default()
}

/// Frames `reply` as the response to `request`.
///
/// A Confirmable request gets a piggybacked Acknowledgement with its own
/// message ID; anything else gets a Non-confirmable response with a fresh
/// one.
#[must_use]
pub fn response_packet(request: &Packet, reply: &Reply, ids: &MessageIds) -> Packet {
    let mut packet = Packet::new();
    if request.header.get_type() == MessageType::Confirmable {
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.message_id = request.header.message_id;
    } else {
        packet.header.set_type(MessageType::NonConfirmable);
        packet.header.message_id = ids.next_id();
    }
    packet.header.code = MessageClass::Response(reply.code);
    packet.set_token(request.get_token().to_vec());
    if !reply.body.is_empty() {
        packet.set_content_format(ContentFormat::TextPlain);
        packet.payload = reply.body.as_bytes().to_vec();
    }
    packet
}

fn reset_packet(message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Reset);
    packet.header.code = MessageClass::Empty;
    packet.header.message_id = message_id;
    packet
}

async fn probe_loop(
    socket: Arc<UdpSocket>,
    tracker: Arc<Mutex<LivenessTracker>>,
    ids: MessageIds,
    config: KeepAliveConfig,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let actions = tracker.lock().await.tick(Instant::now());
        for action in actions {
            match action {
                ProbeAction::Ping(addr) => {
                    let peer = CoapPeer::new(Arc::clone(&socket), addr, ids.clone());
                    if let Err(err) = peer.send(&ping_packet(ids.next_id())).await {
                        tracing::debug!(peer = %addr, error = %err, "keep-alive probe failed");
                    }
                }
                ProbeAction::Inactive(addr) => {
                    tracing::debug!(peer = %addr, "client became inactive");
                }
            }
        }
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::Interrupted
    )
}

/// Seeds the message-ID sequence so restarts don't reuse recent IDs.
fn initial_message_id() -> u16 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    message_id_seed(nanos)
}

/// Low 16 bits of `nanos`.
fn message_id_seed(nanos: u32) -> u16 {
    u16::try_from(nanos & 0xFFFF).unwrap_or_default()
}

#[derive(Debug)]
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn request(kind: MessageType, mid: u16, token: &[u8]) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(kind);
        packet.header.code = MessageClass::Request(RequestType::Get);
        packet.header.message_id = mid;
        packet.set_token(token.to_vec());
        packet
    }

    #[test]
    fn confirmable_gets_piggybacked_ack() {
        let req = request(MessageType::Confirmable, 77, &[1, 2]);
        let reply = Reply::new(ResponseType::BadRequest, "invalid observe request");
        let packet = response_packet(&req, &reply, &MessageIds::new(1000));

        assert_eq!(packet.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(packet.header.message_id, 77);
        assert_eq!(packet.get_token(), &[1, 2]);
        assert_eq!(
            packet.header.code,
            MessageClass::Response(ResponseType::BadRequest)
        );
        assert_eq!(packet.get_content_format(), Some(ContentFormat::TextPlain));
        assert_eq!(packet.payload, b"invalid observe request".to_vec());
    }

    #[test]
    fn non_confirmable_gets_fresh_message_id() {
        let req = request(MessageType::NonConfirmable, 77, &[9]);
        let packet = response_packet(
            &req,
            &Reply::empty(ResponseType::Valid),
            &MessageIds::new(1000),
        );

        assert_eq!(packet.header.get_type(), MessageType::NonConfirmable);
        assert_eq!(packet.header.message_id, 1000);
        assert!(packet.payload.is_empty());
        assert_eq!(packet.get_content_format(), None);
    }

    #[test]
    fn uri_path_reads_segments() {
        let mut packet = request(MessageType::Confirmable, 1, &[]);
        packet.add_option(CoapOption::UriPath, b"sub".to_vec());
        packet.add_option(CoapOption::UriPath, b"a".to_vec());
        packet.add_option(CoapOption::UriPath, b"b".to_vec());

        assert_eq!(uri_path(&packet), vec!["sub", "a", "b"]);
        assert!(uri_path(&Packet::new()).is_empty());
    }

    #[test]
    fn message_id_seed_keeps_low_bits() {
        assert_eq!(message_id_seed(0x1234_5678), 0x5678);
        assert_eq!(message_id_seed(0xFFFF), 0xFFFF);
        assert_eq!(message_id_seed(0x1_0000), 0);
    }

    #[test]
    fn reset_answers_ping() {
        let packet = reset_packet(5);
        assert_eq!(packet.header.get_type(), MessageType::Reset);
        assert_eq!(packet.header.code, MessageClass::Empty);
        assert_eq!(packet.header.message_id, 5);
    }
}
