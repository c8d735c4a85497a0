//! A typed publish/subscribe bus (§4.1). Services communicate exclusively
//! through it: a handful of named topics, one payload shape per topic, and
//! two delivery modes for subscribers.
//!
//! Delivery is synchronous per topic, in subscription order, unless a
//! subscriber registered asynchronously — in that case the event is handed
//! to that subscriber's own single-consumer channel instead of being run
//! inline on the publisher's thread. This mirrors the job/worker split in
//! [`crate::shared::thread_pool::ThreadPool`]: `publish` never does more than
//! an enqueue for async subscribers, so it can never block the publisher for
//! longer than that.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use crate::model::*;

/// Named topics carried on the bus. Each variant corresponds to one shape
/// of [`Event`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NewName,
    ResolveName,
    NameResolved,
    NewAddr,
    IPRequest,
    IPToASN,
    IPInfo,
    NewASN,
    ReverseSweep,
    ActiveCert,
    NewSubdomain,
    Output,
}

/// The payload carried for a given [`Topic`]. `NewName` and `ResolveName`
/// share a shape (a name awaiting classification/resolution); so do
/// `NewAddr` and the address leg of `IPRequest`/`IPInfo`.
#[derive(Debug, Clone)]
pub enum Event {
    NewName(DnsRequest),
    ResolveName(DnsRequest),
    NameResolved(DnsRequest),
    NewAddr(AddrRequest),
    IPRequest(AddrRequest),
    IPToASN(AddrRequest),
    IPInfo(AsnRequest),
    NewASN(AsnRequest),
    ReverseSweep { address: std::net::IpAddr, cidr: ipnet::IpNet },
    ActiveCert { address: std::net::IpAddr },
    NewSubdomain { name: String, count: usize },
    Output(Output),
}

pub type SubscriptionId = u64;

#[derive(Clone)]
enum Subscriber {
    Sync(Arc<dyn Fn(Event) + Send + Sync>),
    Async(mpsc::Sender<Event>),
}

/// Pub/sub bus. Cloning is cheap (`Arc`-wrap it at the call site); every
/// method takes `&self` so it can be shared across service threads without
/// an outer lock.
pub struct EventBus {
    subscribers: Mutex<HashMap<Topic, Vec<(SubscriptionId, Subscriber)>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a synchronous handler: it runs inline, on the publisher's
    /// thread, in the order it was registered relative to other subscribers
    /// of the same topic. Handlers should be short; expensive work belongs
    /// behind an async subscription or a `ThreadPool`.
    pub fn subscribe_sync<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.insert(topic, Subscriber::Sync(Arc::new(handler)))
    }

    /// Subscribe asynchronously: returns a receiver the caller drains on its
    /// own consumer thread/loop. Publishing to this subscriber is just a
    /// channel `send`.
    pub fn subscribe_async(&self, topic: Topic) -> (SubscriptionId, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (self.insert(topic, Subscriber::Async(tx)), rx)
    }

    fn insert(&self, topic: Topic, sub: Subscriber) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut subs = self.subscribers.lock().unwrap();
        subs.entry(topic).or_insert_with(Vec::new).push((id, sub));
        id
    }

    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) {
        let mut subs = self.subscribers.lock().unwrap();
        if let Some(list) = subs.get_mut(&topic) {
            list.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Deliver `event` on `topic` to every current subscriber, in
    /// subscription order. The subscriber list is cloned out from under the
    /// lock before any handler runs, so a `Sync` handler that itself
    /// publishes back onto the bus (publish -> subscribe loops are explicitly
    /// possible per §4.1) can't deadlock against `publish`'s own lock.
    pub fn publish(&self, topic: Topic, event: Event) {
        let targets: Vec<Subscriber> = {
            let subs = self.subscribers.lock().unwrap();
            match subs.get(&topic) {
                Some(list) => list.iter().map(|(_, sub)| sub.clone()).collect(),
                None => return,
            }
        };
        for sub in targets {
            match sub {
                Subscriber::Sync(f) => f(event.clone()),
                Subscriber::Async(tx) => {
                    let _ = tx.send(event.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn sync_subscribers_run_in_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe_sync(Topic::NewName, move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.subscribe_sync(Topic::NewName, move |_| o2.lock().unwrap().push(2));

        bus.publish(
            Topic::NewName,
            Event::NewName(DnsRequest { name: "a.com.".into(), domain: "a.com.".into(), tag: Tag::External, source: "test".into(), records: None }),
        );

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn async_subscriber_receives_on_its_own_channel() {
        let bus = EventBus::new();
        let (_, rx) = bus.subscribe_async(Topic::Output);
        bus.publish(
            Topic::Output,
            Event::Output(Output {
                name: "a.com.".into(),
                domain: "a.com.".into(),
                addresses: vec![],
                tag: Tag::Dns,
                source: "test".into(),
                classification: Classification::Normal,
            }),
        );
        let received = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        matches!(received, Event::Output(_));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hit = Arc::new(Mutex::new(false));
        let h = hit.clone();
        let id = bus.subscribe_sync(Topic::NewName, move |_| *h.lock().unwrap() = true);
        bus.unsubscribe(Topic::NewName, id);
        bus.publish(
            Topic::NewName,
            Event::NewName(DnsRequest { name: "a.com.".into(), domain: "a.com.".into(), tag: Tag::External, source: "test".into(), records: None }),
        );
        assert!(!*hit.lock().unwrap());
    }
}
