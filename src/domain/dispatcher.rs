//! Observer dispatch loop.
//!
//! [`Dispatcher`] is the single owner of the [`ObserverRegistry`]. It runs
//! as one task and consumes two bounded channels:
//!
//! - inbound bus messages, fanned out to every observer of the same topic;
//! - registration signals, applied to the registry.
//!
//! Everything else talks to it through a cloneable [`DispatcherHandle`].
//! Because events are processed one at a time, a fan-out pass is never
//! interleaved with a registration.

use std::time::Duration;

use tokio::sync::mpsc;

use super::connection::{Notification, ObserverConnection};
use super::{BusMessage, ObserveToken, ObserverRegistry, RegistrationSignal};
use crate::error::BridgeError;

/// Creates a connected handle/loop pair.
///
/// `capacity` bounds both channels (minimum 1). With a capacity of 1 a
/// sender waits until the loop has taken the previous event, which is the
/// closest tokio equivalent of a rendezvous channel.
#[must_use]
pub fn channel<C: ObserverConnection>(
    capacity: usize,
) -> (DispatcherHandle<C>, Dispatcher<C>) {
    let capacity = capacity.max(1);
    let (message_tx, message_rx) = mpsc::channel(capacity);
    let (signal_tx, signal_rx) = mpsc::channel(capacity);
    let handle = DispatcherHandle {
        messages: message_tx,
        signals: signal_tx,
    };
    let dispatcher = Dispatcher {
        registry: ObserverRegistry::new(),
        messages: message_rx,
        signals: signal_rx,
        delivery_timeout: None,
    };
    (handle, dispatcher)
}

/// Sending side of the dispatch loop.
#[derive(Debug)]
pub struct DispatcherHandle<C> {
    messages: mpsc::Sender<BusMessage>,
    signals: mpsc::Sender<RegistrationSignal<C>>,
}

impl<C> Clone for DispatcherHandle<C> {
    fn clone(&self) -> Self {
        Self {
            messages: self.messages.clone(),
            signals: self.signals.clone(),
        }
    }
}

impl<C: ObserverConnection> DispatcherHandle<C> {
    /// Queues an inbound bus message for fan-out.
    ///
    /// Waits while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DispatcherClosed`] if the loop has stopped.
    pub async fn deliver(&self, message: BusMessage) -> Result<(), BridgeError> {
        self.messages
            .send(message)
            .await
            .map_err(|_| BridgeError::DispatcherClosed)
    }

    /// Queues a registration of `topic` under `token`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DispatcherClosed`] if the loop has stopped.
    pub async fn register(
        &self,
        token: ObserveToken,
        topic: String,
        connection: C,
    ) -> Result<(), BridgeError> {
        self.signal(RegistrationSignal::Register {
            token,
            topic,
            connection,
        })
        .await
    }

    /// Queues removal of the observation identified by `token`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DispatcherClosed`] if the loop has stopped.
    pub async fn deregister(&self, token: ObserveToken) -> Result<(), BridgeError> {
        self.signal(RegistrationSignal::Deregister { token }).await
    }

    async fn signal(&self, signal: RegistrationSignal<C>) -> Result<(), BridgeError> {
        self.signals
            .send(signal)
            .await
            .map_err(|_| BridgeError::DispatcherClosed)
    }

    /// Returns `true` once the loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.messages.is_closed() || self.signals.is_closed()
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Observers whose topic matched.
    pub matched: usize,
    /// Deliveries the transport accepted.
    pub delivered: usize,
    /// Deliveries that failed or timed out.
    pub failed: usize,
}

/// The dispatch loop. Owns the observer set.
#[derive(Debug)]
pub struct Dispatcher<C> {
    registry: ObserverRegistry<C>,
    messages: mpsc::Receiver<BusMessage>,
    signals: mpsc::Receiver<RegistrationSignal<C>>,
    delivery_timeout: Option<Duration>,
}

impl<C: ObserverConnection> Dispatcher<C> {
    /// Bounds every single delivery attempt. `None` waits indefinitely.
    #[must_use]
    pub fn with_delivery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.delivery_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Read access to the observer set.
    #[must_use]
    pub const fn registry(&self) -> &ObserverRegistry<C> {
        &self.registry
    }

    /// Processes events until every [`DispatcherHandle`] has been dropped.
    ///
    /// Pending registration signals are taken before pending messages.
    pub async fn run(mut self) {
        tracing::info!("dispatcher started");
        loop {
            tokio::select! {
                biased;
                Some(signal) = self.signals.recv() => self.apply(signal),
                Some(message) = self.messages.recv() => {
                    self.fan_out(&message).await;
                }
                else => break,
            }
        }
        tracing::info!(observers = self.registry.len(), "dispatcher stopped");
    }

    /// Applies one registration signal to the registry.
    pub fn apply(&mut self, signal: RegistrationSignal<C>) {
        match signal {
            RegistrationSignal::Register {
                token,
                topic,
                connection,
            } => {
                tracing::debug!(
                    token = %token,
                    topic = %topic,
                    peer = %connection.peer(),
                    "observer registered"
                );
                if let Some(replaced) = self.registry.register(token, topic, connection) {
                    tracing::debug!(
                        token = %replaced.token,
                        topic = %replaced.topic,
                        "observer replaced"
                    );
                }
            }
            RegistrationSignal::Deregister { token } => {
                match self.registry.deregister(&token) {
                    Some(removed) => tracing::debug!(
                        token = %token,
                        topic = %removed.topic,
                        "observer deregistered"
                    ),
                    None => tracing::debug!(token = %token, "deregister for unknown token"),
                }
            }
        }
    }

    /// Notifies every observer of `message.topic`.
    ///
    /// Each matching observer's sequence counter advances once per attempt,
    /// whether or not the transport reports success. Failed observers stay
    /// registered.
    pub async fn fan_out(&mut self, message: &BusMessage) -> FanOutReport {
        let mut report = FanOutReport::default();

        let body = match message.to_json() {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(topic = %message.topic, error = %err, "skipping message");
                return report;
            }
        };

        let timeout = self.delivery_timeout;
        for observer in self.registry.matching_mut(&message.topic) {
            report.matched += 1;
            let notification = Notification {
                token: observer.token.clone(),
                sequence: observer.next_sequence(),
                body: body.clone(),
            };
            let sequence = notification.sequence;
            match deliver(&observer.connection, notification, timeout).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        peer = %observer.connection.peer(),
                        token = %observer.token,
                        sequence,
                        error = %err,
                        "failed sending coap notification"
                    );
                }
            }
        }

        tracing::trace!(
            topic = %message.topic,
            matched = report.matched,
            failed = report.failed,
            "fan-out complete"
        );
        report
    }
}

async fn deliver<C: ObserverConnection>(
    connection: &C,
    notification: Notification,
    timeout: Option<Duration>,
) -> Result<(), BridgeError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, connection.notify(notification))
            .await
            .map_err(|_| BridgeError::DeliveryTimeout(limit))?,
        None => connection.notify(notification).await,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::fmt;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::domain::INITIAL_SEQUENCE;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Behaviour {
        Accept,
        Fail,
        Hang,
    }

    /// Connection that records what it was asked to send.
    #[derive(Debug, Clone)]
    struct Recorder {
        name: String,
        behaviour: Behaviour,
        sent: Arc<Mutex<Vec<Notification>>>,
    }

    impl Recorder {
        fn new(name: &str, behaviour: Behaviour) -> Self {
            Self {
                name: name.to_string(),
                behaviour,
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn record(&self, notification: Notification) {
            match self.sent.lock() {
                Ok(mut sent) => sent.push(notification),
                Err(_) => panic!("recorder poisoned"),
            }
        }

        fn sequences(&self) -> Vec<u32> {
            match self.sent.lock() {
                Ok(sent) => sent.iter().map(|n| n.sequence).collect(),
                Err(_) => panic!("recorder poisoned"),
            }
        }

        fn bodies(&self) -> Vec<Vec<u8>> {
            match self.sent.lock() {
                Ok(sent) => sent.iter().map(|n| n.body.clone()).collect(),
                Err(_) => panic!("recorder poisoned"),
            }
        }
    }

    impl ObserverConnection for Recorder {
        fn peer(&self) -> &dyn fmt::Display {
            &self.name
        }

        async fn notify(&self, notification: Notification) -> Result<(), BridgeError> {
            self.record(notification);
            match self.behaviour {
                Behaviour::Accept => Ok(()),
                Behaviour::Fail => Err(BridgeError::Transport(std::io::Error::other("gone"))),
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        }
    }

    fn token(b: u8) -> ObserveToken {
        ObserveToken::new(vec![b])
    }

    fn register(token: ObserveToken, topic: &str, conn: &Recorder) -> RegistrationSignal<Recorder> {
        RegistrationSignal::Register {
            token,
            topic: topic.to_string(),
            connection: conn.clone(),
        }
    }

    #[tokio::test]
    async fn fan_out_sequences_start_at_two() {
        let (_handle, mut dispatcher) = channel::<Recorder>(1);
        let peer = Recorder::new("o", Behaviour::Accept);
        dispatcher.apply(register(token(1), "a/b", &peer));

        let msg = BusMessage::new("a/b", "x");
        let first = dispatcher.fan_out(&msg).await;
        dispatcher.fan_out(&msg).await;

        assert_eq!(
            first,
            FanOutReport {
                matched: 1,
                delivered: 1,
                failed: 0
            }
        );
        assert_eq!(peer.sequences(), vec![INITIAL_SEQUENCE, 3]);
        assert_eq!(
            peer.bodies().first().cloned(),
            Some(br#"{"topic":"a/b","payload":"x"}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn fan_out_without_observers_sends_nothing() {
        let (_handle, mut dispatcher) = channel::<Recorder>(1);
        let report = dispatcher.fan_out(&BusMessage::new("a/b", "x")).await;
        assert_eq!(report, FanOutReport::default());
    }

    #[tokio::test]
    async fn fan_out_only_reaches_exact_topic() {
        let (_handle, mut dispatcher) = channel::<Recorder>(1);
        let exact = Recorder::new("exact", Behaviour::Accept);
        let parent = Recorder::new("parent", Behaviour::Accept);
        let wildcard = Recorder::new("wildcard", Behaviour::Accept);
        dispatcher.apply(register(token(1), "a/b", &exact));
        dispatcher.apply(register(token(2), "a", &parent));
        dispatcher.apply(register(token(3), "a/#", &wildcard));

        let report = dispatcher.fan_out(&BusMessage::new("a/b", "x")).await;

        assert_eq!(report.matched, 1);
        assert_eq!(exact.sequences(), vec![2]);
        assert!(parent.sequences().is_empty());
        assert!(wildcard.sequences().is_empty());
    }

    #[tokio::test]
    async fn deregistered_observer_receives_nothing() {
        let (_handle, mut dispatcher) = channel::<Recorder>(1);
        let peer = Recorder::new("o", Behaviour::Accept);
        dispatcher.apply(register(token(1), "a/b", &peer));
        dispatcher.apply(RegistrationSignal::Deregister { token: token(1) });

        dispatcher.fan_out(&BusMessage::new("a/b", "x")).await;

        assert!(peer.sequences().is_empty());
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn reregister_resets_sequence() {
        let (_handle, mut dispatcher) = channel::<Recorder>(1);
        let first = Recorder::new("first", Behaviour::Accept);
        let second = Recorder::new("second", Behaviour::Accept);
        dispatcher.apply(register(token(1), "a", &first));
        dispatcher.fan_out(&BusMessage::new("a", "1")).await;
        dispatcher.fan_out(&BusMessage::new("a", "2")).await;

        dispatcher.apply(register(token(1), "b", &second));
        dispatcher.fan_out(&BusMessage::new("a", "3")).await;
        dispatcher.fan_out(&BusMessage::new("b", "4")).await;

        assert_eq!(first.sequences(), vec![2, 3]);
        assert_eq!(second.sequences(), vec![2]);
    }

    #[tokio::test]
    async fn failed_delivery_still_advances_sequence() {
        let (_handle, mut dispatcher) = channel::<Recorder>(1);
        let flaky = Recorder::new("flaky", Behaviour::Fail);
        let healthy = Recorder::new("healthy", Behaviour::Accept);
        dispatcher.apply(register(token(1), "t", &flaky));
        dispatcher.apply(register(token(2), "t", &healthy));

        let report = dispatcher.fan_out(&BusMessage::new("t", "x")).await;
        dispatcher.fan_out(&BusMessage::new("t", "y")).await;

        assert_eq!(report.matched, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(flaky.sequences(), vec![2, 3]);
        assert_eq!(healthy.sequences(), vec![2, 3]);
        assert_eq!(dispatcher.registry().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_delivery_is_bounded_by_timeout() {
        let (_handle, dispatcher) = channel::<Recorder>(1);
        let mut dispatcher = dispatcher.with_delivery_timeout(Some(Duration::from_millis(50)));
        let stuck = Recorder::new("stuck", Behaviour::Hang);
        dispatcher.apply(register(token(1), "t", &stuck));

        let report = dispatcher.fan_out(&BusMessage::new("t", "x")).await;

        assert_eq!(report.failed, 1);
        let Some(observer) = dispatcher.registry().get(&token(1)) else {
            panic!("observer evicted");
        };
        assert_eq!(observer.sequence(), 3);
    }

    #[tokio::test]
    async fn run_processes_events_through_handle() {
        let (handle, dispatcher) = channel::<Recorder>(1);
        let task = tokio::spawn(dispatcher.run());
        let peer = Recorder::new("o", Behaviour::Accept);

        let results = [
            handle
                .register(token(1), "a/b".to_string(), peer.clone())
                .await,
            handle.deliver(BusMessage::new("a/b", "x")).await,
            handle.deliver(BusMessage::new("a/b", "y")).await,
            handle.deliver(BusMessage::new("other", "z")).await,
        ];
        assert!(results.iter().all(Result::is_ok));

        drop(handle);
        let Ok(()) = task.await else {
            panic!("dispatcher panicked");
        };
        assert_eq!(peer.sequences(), vec![2, 3]);
    }

    #[tokio::test]
    async fn handle_reports_closed_dispatcher() {
        let (handle, dispatcher) = channel::<Recorder>(1);
        drop(dispatcher);

        assert!(handle.is_closed());
        let result = handle.deliver(BusMessage::new("a", "b")).await;
        assert!(matches!(result, Err(BridgeError::DispatcherClosed)));
        let result = handle.deregister(token(1)).await;
        assert!(matches!(result, Err(BridgeError::DispatcherClosed)));
    }
}
