//! Observer records and the registry that holds them.
//!
//! [`ObserverRegistry`] is plain single-owner state: it is only ever
//! touched from inside the dispatch loop, so it needs no locking.

use std::collections::HashMap;

use super::ObserveToken;

/// Observe sequence number carried by the first notification.
///
/// Values 0 and 1 are the register/deregister option values of the
/// request, so notifications start above them.
pub const INITIAL_SEQUENCE: u32 = 2;

/// One peer's observation of one topic.
#[derive(Debug, Clone)]
pub struct Observer<C> {
    /// Token chosen by the peer; unique key in the registry.
    pub token: ObserveToken,
    /// Exact-match topic filter.
    pub topic: String,
    /// Transport handle used for delivery. Not owned by the registry.
    pub connection: C,
    sequence: u32,
}

impl<C> Observer<C> {
    /// Creates an observer whose next notification carries
    /// [`INITIAL_SEQUENCE`].
    #[must_use]
    pub fn new(token: ObserveToken, topic: String, connection: C) -> Self {
        Self {
            token,
            topic,
            connection,
            sequence: INITIAL_SEQUENCE,
        }
    }

    /// Sequence number the next notification will carry.
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Returns the current sequence number and advances the counter.
    pub fn next_sequence(&mut self) -> u32 {
        let current = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        current
    }

    /// Returns `true` if this observer's topic equals `topic` exactly.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        self.topic == topic
    }
}

/// Token-keyed set of active observers.
///
/// Holds at most one [`Observer`] per [`ObserveToken`]; registering a token
/// again replaces the previous record.
#[derive(Debug)]
pub struct ObserverRegistry<C> {
    observers: HashMap<ObserveToken, Observer<C>>,
}

impl<C> ObserverRegistry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: HashMap::new(),
        }
    }

    /// Inserts a fresh observer for `token`, returning the one it replaced.
    pub fn register(
        &mut self,
        token: ObserveToken,
        topic: String,
        connection: C,
    ) -> Option<Observer<C>> {
        let observer = Observer::new(token.clone(), topic, connection);
        self.observers.insert(token, observer)
    }

    /// Removes the observer for `token`, if any.
    pub fn deregister(&mut self, token: &ObserveToken) -> Option<Observer<C>> {
        self.observers.remove(token)
    }

    /// Returns the observer registered under `token`.
    #[must_use]
    pub fn get(&self, token: &ObserveToken) -> Option<&Observer<C>> {
        self.observers.get(token)
    }

    /// Iterates mutably over the observers of exactly `topic`.
    pub fn matching_mut<'a>(
        &'a mut self,
        topic: &'a str,
    ) -> impl Iterator<Item = &'a mut Observer<C>> + 'a {
        self.observers.values_mut().filter(move |o| o.matches(topic))
    }

    /// Number of active observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Returns `true` if no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl<C> Default for ObserverRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
