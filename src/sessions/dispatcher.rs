use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// What an observer callback returns. An `Err` is recorded as a fault for
/// the emitter but never stops delivery to the remaining observers.
pub type ObserverResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A synchronous event observer.
///
/// Callbacks run on the emitting thread while no dispatcher lock is held, so
/// an observer may subscribe or unsubscribe (itself included) on the same
/// dispatcher from inside `on_event`.
pub trait Observer<E>: Send + Sync {
    fn on_event(&self, event: &E) -> ObserverResult;
}

impl<E, F> Observer<E> for F
where
    F: Fn(&E) -> ObserverResult + Send + Sync,
{
    fn on_event(&self, event: &E) -> ObserverResult {
        self(event)
    }
}

/// Handle identifying one subscription on one dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub{}", self.0)
    }
}

/// One observer failure recorded during an emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverFault {
    pub subscription: SubscriptionId,
    pub error: String,
}

impl fmt::Display for ObserverFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer {}: {}", self.subscription, self.error)
    }
}

/// Outcome of one [`Dispatcher::emit`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Observers whose callback ran and returned `Ok`
    pub delivered: usize,
    /// Observers whose callback returned `Err`, in delivery order
    pub faults: Vec<ObserverFault>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

struct Registrations<E> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Arc<dyn Observer<E>>)>,
}

/// Observer list with synchronous, ordered delivery.
///
/// Observers are invoked in subscription order. `emit` snapshots the list up
/// front, then re-checks each entry's membership right before its callback:
/// an observer unsubscribed earlier in the same delivery is skipped, and an
/// observer subscribed during a delivery does not see the in-flight event.
pub struct Dispatcher<E> {
    inner: Arc<Mutex<Registrations<E>>>,
}

impl<E> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for Dispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Dispatcher<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registrations {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registrations<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an observer; it sees every event emitted after this call.
    pub fn subscribe(&self, observer: Arc<dyn Observer<E>>) -> SubscriptionId {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.entries.push((id, observer));
        id
    }

    /// Register an infallible closure as an observer.
    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(move |event: &E| -> ObserverResult {
            callback(event);
            Ok(())
        }))
    }

    /// Remove a subscription. Returns false if the id was already gone;
    /// unsubscribing twice is harmless.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|(sid, _)| *sid != id);
        inner.entries.len() != before
    }

    /// Deliver `event` to every currently-subscribed observer, in order.
    ///
    /// The lock is dropped before each callback runs, so callbacks may freely
    /// mutate the subscription list.
    pub fn emit(&self, event: &E) -> DispatchReport {
        let snapshot: Vec<(SubscriptionId, Arc<dyn Observer<E>>)> =
            self.lock().entries.clone();

        let mut report = DispatchReport::default();
        for (id, observer) in snapshot {
            let still_subscribed = self.lock().entries.iter().any(|(sid, _)| *sid == id);
            if !still_subscribed {
                continue;
            }
            match observer.on_event(event) {
                Ok(()) => report.delivered += 1,
                Err(error) => report.faults.push(ObserverFault {
                    subscription: id,
                    error: error.to_string(),
                }),
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_in_subscription_order() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            dispatcher.subscribe_fn(move |event: &u32| {
                seen.lock().unwrap().push(format!("{tag}{event}"));
            });
        }

        let report = dispatcher.emit(&7);
        assert_eq!(report.delivered, 3);
        assert!(report.is_clean());
        assert_eq!(*seen.lock().unwrap(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let id = dispatcher.subscribe_fn(|_| {});
        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn observer_removed_mid_delivery_is_skipped() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let second_id = Arc::new(Mutex::new(None));
        let second_calls = Arc::new(AtomicUsize::new(0));

        // First observer unsubscribes the second before it runs.
        {
            let handle = dispatcher.clone();
            let second_id = Arc::clone(&second_id);
            dispatcher.subscribe_fn(move |_: &u32| {
                if let Some(id) = *second_id.lock().unwrap() {
                    handle.unsubscribe(id);
                }
            });
        }
        {
            let second_calls = Arc::clone(&second_calls);
            let id = dispatcher.subscribe_fn(move |_: &u32| {
                second_calls.fetch_add(1, Ordering::SeqCst);
            });
            *second_id.lock().unwrap() = Some(id);
        }

        let report = dispatcher.emit(&1);
        assert_eq!(report.delivered, 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn self_unsubscribe_during_delivery() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let own_id = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let id = {
            let handle = dispatcher.clone();
            let own_id = Arc::clone(&own_id);
            let calls = Arc::clone(&calls);
            dispatcher.subscribe_fn(move |_: &u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *own_id.lock().unwrap() {
                    handle.unsubscribe(id);
                }
            })
        };
        *own_id.lock().unwrap() = Some(id);

        dispatcher.emit(&1);
        dispatcher.emit(&2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn observer_subscribed_during_delivery_misses_event() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let late_calls = Arc::new(AtomicUsize::new(0));

        {
            let handle = dispatcher.clone();
            let late_calls = Arc::clone(&late_calls);
            dispatcher.subscribe_fn(move |_: &u32| {
                let late_calls = Arc::clone(&late_calls);
                handle.subscribe_fn(move |_: &u32| {
                    late_calls.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        dispatcher.emit(&1);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        // The late observer does see the next event.
        dispatcher.emit(&2);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fault_does_not_stop_delivery() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let tail_calls = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(Arc::new(|_: &u32| -> ObserverResult {
            Err("boom".into())
        }));
        {
            let tail_calls = Arc::clone(&tail_calls);
            dispatcher.subscribe_fn(move |_: &u32| {
                tail_calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        let report = dispatcher.emit(&1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].error, "boom");
        assert_eq!(tail_calls.load(Ordering::SeqCst), 1);
    }
}
