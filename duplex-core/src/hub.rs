//! Typed synchronous publish/subscribe.
//!
//! Every stateful component exposes its transitions through an
//! `EventHub<E>`, where `E` is a closed enum of that component's events and
//! `E::Name` is the matching fieldless enum used as the subscription key.
//!
//! Dispatch is a plain synchronous multicast: no buffering, no backpressure.
//! The registry lock is released before handlers run, so a handler may
//! subscribe, unsubscribe or publish again without deadlocking. Handler
//! panics are not caught and unwind into the publisher.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A closed set of events with a name per variant.
pub trait EventSet: Clone + Send + Sync + 'static {
    /// Fieldless discriminant used to subscribe to one kind of event.
    type Name: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    fn name(&self) -> Self::Name;
}

/// Opaque token returned by `subscribe`, needed to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Entry<E: EventSet> {
    id: SubscriptionId,
    name: E::Name,
    handler: Handler<E>,
}

pub struct EventHub<E: EventSet> {
    entries: Mutex<Vec<Entry<E>>>,
    next_id: AtomicU64,
}

impl<E: EventSet> EventHub<E> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for events named `name`.
    ///
    /// Registering the same closure twice yields two independent entries.
    pub fn subscribe<F>(&self, name: E::Name, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push(Entry {
            id,
            name,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove one registration. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, name: E::Name, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| e.id == id && e.name == name) {
            Some(idx) => {
                entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Invoke every handler registered for `event.name()`, in registration order.
    pub fn publish(&self, event: &E) {
        let name = event.name();
        let handlers: Vec<Handler<E>> = self
            .entries
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .map(|e| Arc::clone(&e.handler))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn handler_count(&self, name: E::Name) -> usize {
        self.entries.lock().iter().filter(|e| e.name == name).count()
    }
}

impl<E: EventSet> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EventSet> fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("handlers", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        Hello(u32),
        Bye,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum PingName {
        Hello,
        Bye,
    }

    impl EventSet for Ping {
        type Name = PingName;

        fn name(&self) -> PingName {
            match self {
                Ping::Hello(_) => PingName::Hello,
                Ping::Bye => PingName::Bye,
            }
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&Ping) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_factory = Arc::clone(&log);
        let factory = move |tag: &str| -> Box<dyn Fn(&Ping) + Send + Sync> {
            let log = Arc::clone(&log_for_factory);
            let tag = tag.to_string();
            Box::new(move |event: &Ping| log.lock().push(format!("{tag}:{event:?}")))
        };
        (log, factory)
    }

    #[test]
    fn publishes_in_registration_order_to_matching_name_only() {
        let hub = EventHub::<Ping>::new();
        let (log, handler) = recorder();
        hub.subscribe(PingName::Hello, handler("a"));
        hub.subscribe(PingName::Bye, handler("b"));
        hub.subscribe(PingName::Hello, handler("c"));

        hub.publish(&Ping::Hello(7));

        assert_eq!(*log.lock(), vec!["a:Hello(7)", "c:Hello(7)"]);
    }

    #[test]
    fn duplicate_registrations_are_independent() {
        let hub = EventHub::<Ping>::new();
        let count = Arc::new(AtomicU64::new(0));
        let shared = {
            let count = Arc::clone(&count);
            Arc::new(move |_: &Ping| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        let first = {
            let f = Arc::clone(&shared);
            hub.subscribe(PingName::Bye, move |e| f(e))
        };
        let _second = {
            let f = Arc::clone(&shared);
            hub.subscribe(PingName::Bye, move |e| f(e))
        };

        hub.publish(&Ping::Bye);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(hub.unsubscribe(PingName::Bye, first));
        hub.publish(&Ping::Bye);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsubscribe_requires_matching_name() {
        let hub = EventHub::<Ping>::new();
        let id = hub.subscribe(PingName::Hello, |_| {});
        assert!(!hub.unsubscribe(PingName::Bye, id));
        assert!(hub.unsubscribe(PingName::Hello, id));
        assert!(!hub.unsubscribe(PingName::Hello, id));
    }

    #[test]
    fn clear_removes_everything() {
        let hub = EventHub::<Ping>::new();
        let (log, handler) = recorder();
        hub.subscribe(PingName::Hello, handler("a"));
        hub.subscribe(PingName::Bye, handler("b"));
        hub.clear();

        hub.publish(&Ping::Hello(1));
        hub.publish(&Ping::Bye);

        assert!(log.lock().is_empty());
        assert_eq!(hub.handler_count(PingName::Hello), 0);
    }

    #[test]
    fn handlers_may_reenter_the_hub() {
        let hub = Arc::new(EventHub::<Ping>::new());
        let (log, handler) = recorder();
        hub.subscribe(PingName::Bye, handler("bye"));
        {
            let inner = Arc::clone(&hub);
            hub.subscribe(PingName::Hello, move |_| inner.publish(&Ping::Bye));
        }

        hub.publish(&Ping::Hello(0));

        assert_eq!(*log.lock(), vec!["bye:Bye"]);
    }
}
