//! Per-peer message deduplication.
//!
//! A retransmitted request carries the message ID of the original. Within
//! the exchange lifetime a duplicate Confirmable request is answered with
//! the response already sent, and a duplicate Non-confirmable request is
//! dropped. Neither reaches a handler a second time.

use std::collections::HashMap;
use std::time::Duration;

use coap_lite::Packet;
use tokio::time::Instant;

/// `EXCHANGE_LIFETIME` with the default transmission parameters.
pub const EXCHANGE_LIFETIME: Duration = Duration::from_secs(247);

/// Exchanges remembered per peer before the oldest is forgotten.
pub const MAX_EXCHANGES: usize = 256;

#[derive(Debug)]
struct Exchange {
    seen_at: Instant,
    response: Option<Packet>,
}

/// Recently completed exchanges of one peer, keyed by message ID.
#[derive(Debug)]
pub struct ExchangeCache {
    lifetime: Duration,
    capacity: usize,
    exchanges: HashMap<u16, Exchange>,
}

impl ExchangeCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(lifetime: Duration, capacity: usize) -> Self {
        Self {
            lifetime,
            capacity: capacity.max(1),
            exchanges: HashMap::new(),
        }
    }

    /// Looks up `message_id`.
    ///
    /// Returns `None` for a new exchange and `Some(response)` for a
    /// duplicate; the response is `None` when nothing is to be replayed.
    pub fn duplicate(&mut self, message_id: u16, now: Instant) -> Option<Option<&Packet>> {
        self.clean_expired(now);
        self.exchanges
            .get(&message_id)
            .map(|exchange| exchange.response.as_ref())
    }

    /// Records a completed exchange.
    pub fn complete(&mut self, message_id: u16, response: Option<Packet>, now: Instant) {
        self.clean_expired(now);
        if self.exchanges.len() >= self.capacity && !self.exchanges.contains_key(&message_id) {
            let oldest = self
                .exchanges
                .iter()
                .min_by_key(|(_, exchange)| exchange.seen_at)
                .map(|(id, _)| *id);
            if let Some(id) = oldest {
                self.exchanges.remove(&id);
            }
        }
        self.exchanges.insert(
            message_id,
            Exchange {
                seen_at: now,
                response,
            },
        );
    }

    /// Number of remembered exchanges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// Returns `true` if nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    fn clean_expired(&mut self, now: Instant) {
        let lifetime = self.lifetime;
        self.exchanges
            .retain(|_, exchange| now.saturating_duration_since(exchange.seen_at) < lifetime);
    }
}

impl Default for ExchangeCache {
    fn default() -> Self {
        Self::new(EXCHANGE_LIFETIME, MAX_EXCHANGES)
    }
}

#[cfg(test)]
mod tests {
    use coap_lite::MessageType;

    use super::*;

    fn ack(mid: u16) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.message_id = mid;
        packet
    }

    #[test]
    fn unknown_message_id_is_new() {
        let mut cache = ExchangeCache::default();
        assert!(cache.duplicate(7, Instant::now()).is_none());
    }

    #[test]
    fn confirmable_duplicate_replays_response() {
        let now = Instant::now();
        let mut cache = ExchangeCache::default();
        cache.complete(7, Some(ack(7)), now);

        let replay = cache.duplicate(7, now + Duration::from_secs(5));
        assert!(matches!(replay, Some(Some(packet)) if packet.header.message_id == 7));
    }

    #[test]
    fn non_confirmable_duplicate_has_nothing_to_replay() {
        let now = Instant::now();
        let mut cache = ExchangeCache::default();
        cache.complete(8, None, now);

        assert!(matches!(cache.duplicate(8, now), Some(None)));
    }

    #[test]
    fn exchanges_expire_after_lifetime() {
        let now = Instant::now();
        let mut cache = ExchangeCache::new(Duration::from_secs(10), 4);
        cache.complete(1, None, now);

        assert!(cache.duplicate(1, now + Duration::from_secs(9)).is_some());
        assert!(cache.duplicate(1, now + Duration::from_secs(10)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn oldest_exchange_is_evicted_at_capacity() {
        let now = Instant::now();
        let mut cache = ExchangeCache::new(EXCHANGE_LIFETIME, 2);
        cache.complete(1, None, now);
        cache.complete(2, None, now + Duration::from_millis(1));
        cache.complete(3, None, now + Duration::from_millis(2));

        assert_eq!(cache.len(), 2);
        assert!(cache.duplicate(1, now + Duration::from_millis(3)).is_none());
        assert!(cache.duplicate(2, now + Duration::from_millis(3)).is_some());
        assert!(cache.duplicate(3, now + Duration::from_millis(3)).is_some());
    }
}
