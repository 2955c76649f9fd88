use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use qx_types::errors::EventError;
use qx_types::event::{Event, EventKind};

type Handler = dyn Fn(&Event) + Send + Sync;

struct Subscription {
    id: u64,
    handler: Arc<Handler>,
}

/// Running totals exposed by [`EventBus::stats`], grounded in the Python
/// original's `EventBus.get_stats`.
#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    pub events_published: u64,
    pub events_processed: u64,
    pub events_errored: u64,
    pub queue_depth: usize,
    pub subscriber_counts: HashMap<EventKind, usize>,
}

/// The Event Bus (C1): a bounded priority queue drained by a single dedicated
/// dispatcher thread, so handlers never race each other and publishers never
/// block on dispatch. Directly modeled on `core/events.py`'s `EventBus`.
pub struct EventBus {
    subscribers: DashMap<EventKind, Vec<Subscription>>,
    next_subscription_id: AtomicU64,
    queue: Mutex<BinaryHeap<Reverse<Event>>>,
    queue_not_empty: Condvar,
    max_queue_size: usize,
    running: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    events_published: AtomicU64,
    events_processed: AtomicU64,
    events_errored: AtomicU64,
}

impl EventBus {
    pub fn new(max_queue_size: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: DashMap::new(),
            next_subscription_id: AtomicU64::new(0),
            queue: Mutex::new(BinaryHeap::new()),
            queue_not_empty: Condvar::new(),
            max_queue_size,
            running: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
            events_published: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_errored: AtomicU64::new(0),
        })
    }

    /// Register a handler for `kind`. Returns a subscription id usable with
    /// [`EventBus::unsubscribe`].
    pub fn subscribe(&self, kind: EventKind, handler: impl Fn(&Event) + Send + Sync + 'static) -> u64 {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.entry(kind).or_default().push(Subscription {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    pub fn unsubscribe(&self, kind: EventKind, id: u64) {
        if let Some(mut subs) = self.subscribers.get_mut(&kind) {
            subs.retain(|s| s.id != id);
        }
    }

    /// Enqueue an event. Fails with [`EventError::QueueFull`] rather than
    /// blocking the publisher, matching the Python original's behavior.
    pub fn publish(&self, event: Event) -> Result<(), EventError> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.max_queue_size {
            return Err(EventError::QueueFull {
                capacity: self.max_queue_size,
            });
        }
        queue.push(Reverse(event));
        self.events_published.fetch_add(1, Ordering::Relaxed);
        self.queue_not_empty.notify_one();
        Ok(())
    }

    pub fn clear_queue(&self) {
        self.queue.lock().clear();
    }

    pub fn stats(&self) -> EventBusStats {
        let subscriber_counts = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().len()))
            .collect();
        EventBusStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_errored: self.events_errored.load(Ordering::Relaxed),
            queue_depth: self.queue.lock().len(),
            subscriber_counts,
        }
    }

    /// Spawn the dispatcher thread. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let bus = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("qx-event-bus".into())
            .spawn(move || bus.run_dispatcher())
            .expect("failed to spawn event bus dispatcher thread");
        *self.dispatcher.lock() = Some(handle);
        info!("event bus dispatcher started");
    }

    /// Signal the dispatcher to stop and join it, waiting up to `timeout`.
    pub fn stop(self: &Arc<Self>, timeout: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.queue_not_empty.notify_all();
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            let start = std::time::Instant::now();
            while !handle.is_finished() && start.elapsed() < timeout {
                std::thread::sleep(Duration::from_millis(10));
            }
            if let Err(err) = handle.join() {
                warn!(?err, "event bus dispatcher thread panicked");
            }
        }
        info!("event bus dispatcher stopped");
    }

    fn run_dispatcher(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let event = {
                let mut queue = self.queue.lock();
                if queue.is_empty() {
                    self.queue_not_empty
                        .wait_for(&mut queue, Duration::from_millis(100));
                }
                queue.pop().map(|Reverse(e)| e)
            };
            let Some(event) = event else { continue };
            self.dispatch(&event);
        }
    }

    fn dispatch(&self, event: &Event) {
        let handlers: Vec<Arc<Handler>> = self
            .subscribers
            .get(&event.kind)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(kind = ?event.kind, "event dispatched with no subscribers");
        }

        for handler in handlers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event)));
            match result {
                Ok(()) => {
                    self.events_processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    self.events_errored.fetch_add(1, Ordering::Relaxed);
                    error!(kind = ?event.kind, "event handler panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    #[test]
    fn higher_priority_events_dispatch_first_within_one_batch() {
        let bus = EventBus::new(100);
        let order: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));

        let order_clone = Arc::clone(&order);
        bus.subscribe(EventKind::RiskViolation, move |e| {
            order_clone.lock().push(e.priority);
        });
        let order_clone = Arc::clone(&order);
        bus.subscribe(EventKind::Heartbeat, move |e| {
            order_clone.lock().push(e.priority);
        });

        bus.publish(Event::new(50, EventKind::Heartbeat, "engine", serde_json::Value::Null))
            .unwrap();
        bus.publish(Event::new(10, EventKind::RiskViolation, "risk", serde_json::Value::Null))
            .unwrap();

        bus.start();
        std::thread::sleep(StdDuration::from_millis(200));
        bus.stop(StdDuration::from_secs(1));

        assert_eq!(*order.lock(), vec![10, 50]);
    }

    #[test]
    fn publish_errors_when_queue_full() {
        let bus = EventBus::new(1);
        bus.publish(Event::new(0, EventKind::Heartbeat, "engine", serde_json::Value::Null))
            .unwrap();
        let err = bus
            .publish(Event::new(0, EventKind::Heartbeat, "engine", serde_json::Value::Null))
            .unwrap_err();
        assert!(matches!(err, EventError::QueueFull { capacity: 1 }));
    }

    #[test]
    fn handler_panic_is_contained_and_counted() {
        let bus = EventBus::new(100);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        bus.subscribe(EventKind::SystemError, move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            panic!("boom");
        });
        bus.publish(Event::new(0, EventKind::SystemError, "engine", serde_json::Value::Null))
            .unwrap();
        bus.start();
        std::thread::sleep(StdDuration::from_millis(200));
        bus.stop(StdDuration::from_secs(1));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().events_errored, 1);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let bus = EventBus::new(100);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let id = bus.subscribe(EventKind::Heartbeat, move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe(EventKind::Heartbeat, id);
        bus.publish(Event::new(0, EventKind::Heartbeat, "engine", serde_json::Value::Null))
            .unwrap();
        bus.start();
        std::thread::sleep(StdDuration::from_millis(200));
        bus.stop(StdDuration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
