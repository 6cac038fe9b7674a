use crate::types::StreamView;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::warn;

type Listener = Arc<dyn Fn(&StreamView) + Send + Sync>;

struct Registry {
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
    current: StreamView,
}

/// Fan-out of `{status, history}` views to any number of listeners.
///
/// Listeners are called synchronously, in attach order, once per publish.
/// They run outside the registry lock, so a listener may read the snapshot
/// or drop its own subscription. A listener that panics is detached; the
/// others keep receiving views.
#[derive(Clone)]
pub struct StatePublisher {
    registry: Arc<Mutex<Registry>>,
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new(StreamView::default())
    }
}

impl StatePublisher {
    pub fn new(initial: StreamView) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: BTreeMap::new(),
                current: initial,
            })),
        }
    }

    /// Register `listener` for every future publish.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StreamView) + Send + Sync + 'static,
    {
        self.attach(listener).1
    }

    /// Like [`subscribe`](Self::subscribe), also returning the view current
    /// at registration. No publish can fall between the two.
    pub fn attach<F>(&self, listener: F) -> (StreamView, Subscription)
    where
        F: Fn(&StreamView) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, Arc::new(listener));
        let current = registry.current.clone();
        drop(registry);
        let subscription = Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        };
        (current, subscription)
    }

    /// Latest published view.
    pub fn get_snapshot(&self) -> StreamView {
        self.lock().current.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub(crate) fn publish(&self, view: StreamView) {
        let listeners: Vec<(u64, Listener)> = {
            let mut registry = self.lock();
            registry.current = view.clone();
            registry
                .listeners
                .iter()
                .map(|(id, listener)| (*id, listener.clone()))
                .collect()
        };
        for (id, listener) in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&view))).is_err() {
                warn!(
                    listener = id,
                    status = %view.status,
                    "stream listener panicked, detaching it"
                );
                self.lock().listeners.remove(&id);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by [`StatePublisher::subscribe`]. The listener is
/// detached when this is dropped.
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .listeners
                .remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn view(status: StreamStatus) -> StreamView {
        StreamView::new(status, Arc::from(Vec::new()))
    }

    #[test]
    fn every_listener_sees_each_publish_once() {
        let publisher = StatePublisher::default();
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(AtomicUsize::new(0));

        let seen = a.clone();
        let _sub_a = publisher.subscribe(move |v| seen.lock().unwrap().push(v.status));
        let count = b.clone();
        let _sub_b = publisher.subscribe(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        publisher.publish(view(StreamStatus::Connecting));
        publisher.publish(view(StreamStatus::Open));

        assert_eq!(
            *a.lock().unwrap(),
            vec![StreamStatus::Connecting, StreamStatus::Open]
        );
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn late_attach_sees_latest_view_only() {
        let publisher = StatePublisher::default();
        assert_eq!(publisher.get_snapshot().status, StreamStatus::Uninstantiated);
        publisher.publish(view(StreamStatus::Connecting));
        publisher.publish(view(StreamStatus::Open));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (current, _sub) = publisher.attach(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(current.status, StreamStatus::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(publisher.get_snapshot().status, StreamStatus::Open);
    }

    #[test]
    fn dropping_subscription_detaches() {
        let publisher = StatePublisher::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = publisher.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        publisher.publish(view(StreamStatus::Connecting));
        assert_eq!(publisher.listener_count(), 1);

        sub.unsubscribe();
        assert_eq!(publisher.listener_count(), 0);
        publisher.publish(view(StreamStatus::Open));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_read_snapshot_during_publish() {
        let publisher = StatePublisher::default();
        let inner = publisher.clone();
        let observed = Arc::new(Mutex::new(None));
        let slot = observed.clone();
        let _sub = publisher.subscribe(move |_| {
            *slot.lock().unwrap() = Some(inner.get_snapshot().status);
        });
        publisher.publish(view(StreamStatus::Closed));
        assert_eq!(*observed.lock().unwrap(), Some(StreamStatus::Closed));
    }

    #[test]
    fn panicking_listener_is_detached_without_starving_others() {
        let publisher = StatePublisher::default();
        let _bad = publisher.subscribe(|v| {
            if v.status == StreamStatus::Connecting {
                panic!("listener bug");
            }
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _good = publisher.subscribe(move |v| sink.lock().unwrap().push(v.status));

        publisher.publish(view(StreamStatus::Connecting));
        assert_eq!(publisher.listener_count(), 1);
        publisher.publish(view(StreamStatus::Open));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![StreamStatus::Connecting, StreamStatus::Open]
        );
        assert_eq!(publisher.get_snapshot().status, StreamStatus::Open);
    }

    #[test]
    fn subscription_outliving_publisher_is_harmless() {
        let publisher = StatePublisher::default();
        let sub = publisher.subscribe(|_| {});
        drop(publisher);
        drop(sub);
    }
}
