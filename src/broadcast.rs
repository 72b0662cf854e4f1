//! In-process fan-out of new observations to live subscribers
//!
//! Subscribers are invoked synchronously, in subscription order, for every
//! published observation. There is no buffering or replay: a subscriber only
//! sees observations published while it is registered.

use crate::events::Observation;
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

type Callback = Arc<dyn Fn(&Observation) + Send + Sync>;

/// How a subscriber receives observations
#[derive(Clone)]
enum Delivery {
    Callback(Callback),
    Channel(mpsc::UnboundedSender<Observation>),
}

struct Subscriber {
    id: u64,
    delivery: Delivery,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Registry {
    fn remove(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }
}

/// Publish/subscribe bus for the "new observation" event
#[derive(Clone, Default)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

/// Handle returned by [`Broadcaster::subscribe`]
///
/// Dropping the handle unsubscribes, so a subscriber tied to a connection
/// goes away with the connection.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Stop receiving observations
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
            debug!("Subscriber {} unsubscribed", self.id);
        }
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every future observation
    ///
    /// Callbacks run on the publishing task and should return quickly. A
    /// panicking callback is logged and does not affect other subscribers.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Observation) + Send + Sync + 'static,
    {
        self.register(Delivery::Callback(Arc::new(callback)))
    }

    /// Register a channel that receives a copy of every future observation
    ///
    /// Once the receiver is dropped the subscriber is pruned on the next
    /// publish, even if the subscription handle is still alive.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<Observation>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (self.register(Delivery::Channel(sender)), receiver)
    }

    fn register(&self, delivery: Delivery) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .subscribers
            .lock()
            .unwrap()
            .push(Subscriber { id, delivery });
        debug!("Subscriber {} registered", id);

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver an observation to every current subscriber
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, observation: &Observation) -> usize {
        // Deliver from a snapshot so callbacks may (un)subscribe without deadlocking
        let snapshot: Vec<(u64, Delivery)> = self
            .registry
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|s| (s.id, s.delivery.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, delivery) in snapshot {
            match delivery {
                Delivery::Callback(callback) => {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| callback(observation)));
                    match result {
                        Ok(()) => delivered += 1,
                        Err(_) => error!(
                            "Subscriber {} panicked while handling observation {}",
                            id, observation.id
                        ),
                    }
                }
                Delivery::Channel(sender) => {
                    if sender.send(observation.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        closed.push(id);
                    }
                }
            }
        }

        for id in closed {
            debug!("Pruning subscriber {} with a closed channel", id);
            self.registry.remove(id);
        }

        delivered
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProbeOrigin;
    use serde_json::Value;

    fn observation(status: u16) -> Observation {
        Observation::new(status, 10.0, Value::Null, Value::Null, "POST", ProbeOrigin::Manual)
    }

    #[test]
    fn test_delivery_in_subscription_order_despite_panic() {
        let broadcaster = Broadcaster::new();
        let log: Arc<Mutex<Vec<(&'static str, u16)>>> = Arc::new(Mutex::new(Vec::new()));

        let first_log = Arc::clone(&log);
        let _first = broadcaster.subscribe(move |o| first_log.lock().unwrap().push(("first", o.status)));

        let second_log = Arc::clone(&log);
        let _second = broadcaster.subscribe(move |o| {
            second_log.lock().unwrap().push(("second", o.status));
            panic!("subscriber failure");
        });

        let third_log = Arc::clone(&log);
        let _third = broadcaster.subscribe(move |o| third_log.lock().unwrap().push(("third", o.status)));

        assert_eq!(broadcaster.publish(&observation(200)), 2);
        assert_eq!(broadcaster.publish(&observation(500)), 2);

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                ("first", 200),
                ("second", 200),
                ("third", 200),
                ("first", 500),
                ("second", 500),
                ("third", 500),
            ]
        );
        assert_eq!(broadcaster.subscriber_count(), 3);
    }

    #[test]
    fn test_no_replay_for_late_subscribers() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish(&observation(200));

        let (_subscription, mut receiver) = broadcaster.subscribe_channel();
        assert!(receiver.try_recv().is_err());

        let published = observation(201);
        broadcaster.publish(&published);
        assert_eq!(receiver.try_recv().unwrap(), published);
    }

    #[test]
    fn test_unsubscribe_and_drop_deregister() {
        let broadcaster = Broadcaster::new();
        let first = broadcaster.subscribe(|_| {});
        let second = broadcaster.subscribe(|_| {});
        assert_eq!(broadcaster.subscriber_count(), 2);

        first.unsubscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(second);
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(broadcaster.publish(&observation(200)), 0);
    }

    #[test]
    fn test_closed_channel_is_pruned() {
        let broadcaster = Broadcaster::new();
        let (_subscription, receiver) = broadcaster.subscribe_channel();
        drop(receiver);

        assert_eq!(broadcaster.publish(&observation(200)), 0);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_subscription_outliving_broadcaster() {
        let broadcaster = Broadcaster::new();
        let subscription = broadcaster.subscribe(|_| {});
        drop(broadcaster);
        drop(subscription);
    }
}
