use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, trace, warn};

/// An event whose delivery can be vetoed by subscribers.
///
/// Cancellation is one-way: implementors must not offer a way to clear the flag,
/// and the dispatcher re-seals any event that comes back uncancelled.
pub trait Cancellable {
    fn is_cancelled(&self) -> bool;

    fn cancel(&mut self);
}

pub type Filter<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
pub type Effect<E> = Box<dyn Fn(&mut E) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventDispatcher::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A registered subscriber: all filters must pass before the effect runs.
pub struct Subscriber<E> {
    id: SubscriberId,
    owner: String,
    filters: Vec<Filter<E>>,
    effect: Effect<E>,
}

impl<E> Subscriber<E> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn accepts(&self, event: &E) -> bool {
        self.filters.iter().all(|filter| filter(event))
    }
}

impl<E> std::fmt::Debug for Subscriber<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("filters", &self.filters.len())
            .finish()
    }
}

type Snapshot<E> = Arc<Vec<Arc<Subscriber<E>>>>;

/// Synchronous publish point. Subscribers run on the publishing thread, in
/// registration order, before `publish` returns.
///
/// The subscriber list is copy-on-write: `publish` iterates the snapshot that was
/// current when it started, so subscribing or unsubscribing from another thread
/// (or from inside an effect) only affects later publishes.
pub struct EventDispatcher<E> {
    subscribers: RwLock<Snapshot<E>>,
    next_subscriber_id: AtomicU64,
}

impl<E> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventDispatcher<E> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Arc::new(Vec::new())),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber with a single filter. Returns its id.
    pub fn subscribe<F, G>(&self, owner: &str, filter: F, effect: G) -> SubscriberId
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
        G: Fn(&mut E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(owner, vec![Box::new(filter)], Box::new(effect))
    }

    /// Register a subscriber that sees every event.
    pub fn subscribe_all<G>(&self, owner: &str, effect: G) -> SubscriberId
    where
        G: Fn(&mut E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(owner, Vec::new(), Box::new(effect))
    }

    /// Start building a subscriber with chained filters.
    pub fn listen(&self, owner: &str) -> ListenerBuilder<'_, E> {
        ListenerBuilder {
            dispatcher: self,
            owner: owner.to_string(),
            filters: Vec::new(),
        }
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|s| s.id == id) {
            return false;
        }
        let remaining: Vec<_> = guard.iter().filter(|s| s.id != id).cloned().collect();
        *guard = Arc::new(remaining);
        true
    }

    /// Remove every subscriber.
    pub fn clear(&self) {
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(Vec::new());
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Ids of the current subscribers, in delivery order.
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.snapshot().iter().map(|s| s.id).collect()
    }

    fn snapshot(&self) -> Snapshot<E> {
        let guard = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn insert(&self, owner: &str, filters: Vec<Filter<E>>, effect: Effect<E>) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber_id.fetch_add(1, Ordering::Relaxed));
        let subscriber = Arc::new(Subscriber {
            id,
            owner: owner.to_string(),
            filters,
            effect,
        });

        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(subscriber);
        *guard = Arc::new(next);

        trace!("Subscriber #{} registered by '{}'", id.0, owner);
        id
    }
}

impl<E: Cancellable> EventDispatcher<E> {
    /// Deliver an event to every subscriber. Returns true if the event ended up cancelled.
    ///
    /// A filter or effect that returns an error or panics is logged and skipped;
    /// delivery continues with the next subscriber and the subscriber stays registered.
    pub fn publish(&self, event: &mut E) -> bool {
        let subscribers = self.snapshot();

        for subscriber in subscribers.iter() {
            let sealed = event.is_cancelled();

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if subscriber.accepts(event) {
                    (subscriber.effect)(event)
                } else {
                    Ok(())
                }
            }));

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        "Subscriber #{} from '{}' failed: {:#}",
                        subscriber.id.0, subscriber.owner, e
                    );
                }
                Err(panic) => {
                    error!(
                        "Subscriber #{} from '{}' panicked: {}",
                        subscriber.id.0,
                        subscriber.owner,
                        panic_message(panic.as_ref())
                    );
                }
            }

            if sealed && !event.is_cancelled() {
                warn!(
                    "Subscriber #{} from '{}' tried to uncancel an event",
                    subscriber.id.0, subscriber.owner
                );
                event.cancel();
            }
        }

        event.is_cancelled()
    }
}

/// Chained subscriber construction: `listen(owner).filter(..).consume(..)`.
pub struct ListenerBuilder<'a, E> {
    dispatcher: &'a EventDispatcher<E>,
    owner: String,
    filters: Vec<Filter<E>>,
}

impl<'a, E> ListenerBuilder<'a, E> {
    /// Add a filter. Every filter must pass for the effect to run.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Box::new(filter));
        self
    }

    /// Finish with an infallible effect.
    pub fn consume<G>(self, effect: G) -> SubscriberId
    where
        G: Fn(&mut E) + Send + Sync + 'static,
    {
        self.try_consume(move |event| {
            effect(event);
            Ok(())
        })
    }

    /// Finish with a fallible effect.
    pub fn try_consume<G>(self, effect: G) -> SubscriberId
    where
        G: Fn(&mut E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher
            .insert(&self.owner, self.filters, Box::new(effect))
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestEvent {
        kind: &'static str,
        cancelled: bool,
        seen: Vec<(&'static str, bool)>,
    }

    impl TestEvent {
        fn new(kind: &'static str) -> Self {
            Self {
                kind,
                ..Default::default()
            }
        }
    }

    impl Cancellable for TestEvent {
        fn is_cancelled(&self) -> bool {
            self.cancelled
        }

        fn cancel(&mut self) {
            self.cancelled = true;
        }
    }

    fn record(name: &'static str) -> impl Fn(&mut TestEvent) -> anyhow::Result<()> {
        move |e: &mut TestEvent| {
            e.seen.push((name, e.cancelled));
            Ok(())
        }
    }

    #[test]
    fn test_subscribers_run_in_registration_order() {
        let bus = EventDispatcher::new();
        bus.subscribe_all("a", record("first"));
        bus.subscribe_all("b", record("second"));
        bus.subscribe_all("c", record("third"));

        let mut event = TestEvent::new("x");
        assert!(!bus.publish(&mut event));
        let names: Vec<_> = event.seen.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_later_subscribers_see_cancellation() {
        let bus = EventDispatcher::new();
        bus.subscribe_all("a", record("before"));
        bus.subscribe_all("canceller", |e: &mut TestEvent| {
            e.cancel();
            Ok(())
        });
        bus.subscribe_all("b", record("after"));
        bus.subscribe_all("c", record("last"));

        let mut event = TestEvent::new("x");
        assert!(bus.publish(&mut event));
        assert_eq!(
            event.seen,
            vec![("before", false), ("after", true), ("last", true)]
        );
    }

    #[test]
    fn test_cancellation_cannot_be_undone() {
        let bus = EventDispatcher::new();
        bus.subscribe_all("canceller", |e: &mut TestEvent| {
            e.cancel();
            Ok(())
        });
        bus.subscribe_all("rogue", |e: &mut TestEvent| {
            e.cancelled = false;
            Ok(())
        });
        bus.subscribe_all("observer", record("observer"));

        let mut event = TestEvent::new("x");
        assert!(bus.publish(&mut event));
        assert!(event.is_cancelled());
        assert_eq!(event.seen, vec![("observer", true)]);
    }

    #[test]
    fn test_failing_subscribers_do_not_stop_delivery() {
        let bus = EventDispatcher::new();
        bus.subscribe_all("errors", |_e: &mut TestEvent| anyhow::bail!("boom"));
        bus.subscribe_all("panics", |_e: &mut TestEvent| -> anyhow::Result<()> {
            panic!("subscriber bug")
        });
        bus.subscribe("filter-panics", |_e: &TestEvent| panic!("filter bug"), record("never"));
        bus.subscribe_all("survivor", record("survivor"));

        let mut event = TestEvent::new("x");
        assert!(!bus.publish(&mut event));
        assert_eq!(event.seen, vec![("survivor", false)]);
        // Faulty subscribers stay registered.
        assert_eq!(bus.subscriber_count(), 4);
    }

    #[test]
    fn test_panic_after_cancel_keeps_cancellation() {
        let bus = EventDispatcher::new();
        bus.subscribe_all("cancel-then-panic", |e: &mut TestEvent| -> anyhow::Result<()> {
            e.cancel();
            panic!("late failure")
        });

        let mut event = TestEvent::new("x");
        assert!(bus.publish(&mut event));
    }

    #[test]
    fn test_filters_gate_effects() {
        let bus = EventDispatcher::new();
        bus.listen("only-chat")
            .filter(|e: &TestEvent| e.kind == "chat")
            .consume(|e| e.cancel());
        bus.listen("never")
            .filter(|e: &TestEvent| e.kind == "chat")
            .filter(|_| false)
            .consume(|e| e.seen.push(("never", false)));

        let mut chat = TestEvent::new("chat");
        let mut other = TestEvent::new("move");
        assert!(bus.publish(&mut chat));
        assert!(!bus.publish(&mut other));
        assert!(chat.seen.is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventDispatcher::new();
        let first = bus.subscribe_all("a", record("a"));
        let second = bus.subscribe_all("b", record("b"));
        assert_ne!(first, second);

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        assert_eq!(bus.subscriber_ids(), vec![second]);

        let mut event = TestEvent::new("x");
        bus.publish(&mut event);
        assert_eq!(event.seen, vec![("b", false)]);
    }

    #[test]
    fn test_subscribe_during_publish_applies_to_next_publish() {
        let bus = Arc::new(EventDispatcher::new());
        let added = Arc::new(Mutex::new(false));

        let inner_bus = Arc::downgrade(&bus);
        let inner_added = added.clone();
        bus.subscribe_all("adder", move |_e: &mut TestEvent| {
            let mut done = inner_added.lock().unwrap();
            if !*done {
                if let Some(bus) = inner_bus.upgrade() {
                    bus.subscribe_all("late", record("late"));
                }
                *done = true;
            }
            Ok(())
        });

        let mut first = TestEvent::new("x");
        bus.publish(&mut first);
        assert!(first.seen.is_empty());

        let mut second = TestEvent::new("x");
        bus.publish(&mut second);
        assert_eq!(second.seen, vec![("late", false)]);
    }

    #[test]
    fn test_concurrent_subscribe_and_publish() {
        let bus = Arc::new(EventDispatcher::<TestEvent>::new());
        let mut handles = Vec::new();

        for _ in 0..4 {
            let bus = bus.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let id = bus.subscribe_all("churn", record("churn"));
                    let mut event = TestEvent::new("x");
                    bus.publish(&mut event);
                    assert!(!event.seen.is_empty());
                    assert!(bus.unsubscribe(id));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bus.subscriber_count(), 0);
    }
}
