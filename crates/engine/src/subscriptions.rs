//! Subscription registry and property broadcast topics
//!
//! A subscription is a standing registration on one (instance, path) pair.
//! The worker consults the registry after every property mutation and emits
//! a `PropertyChanged` message only when a matching subscription exists;
//! unsubscribed mutations are silently dropped. The client's poll then fans
//! the message out to every listener on the pair's topic.
//!
//! Topics are bounded `tokio::sync::broadcast` channels: a slow listener
//! loses the oldest buffered values (surfaced as `PropertyEvent::Lagged`)
//! instead of ever stalling the worker or the poller.

use dashmap::DashMap;
use tokio::sync::broadcast;

use motiv_protocol::{BindableInstanceHandle, PropertyKind, PropertyValue};

/// One value observed on a subscribed property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyEvent {
    /// The property changed to this value
    Changed(PropertyValue),
    /// The listener fell behind and `missed` older values were dropped
    /// (drop-oldest overflow policy)
    Lagged { missed: u64 },
}

struct Topic {
    kind: PropertyKind,
    sender: broadcast::Sender<PropertyValue>,
}

/// Registry of (instance, path) subscriptions shared between client threads
/// and the worker
///
/// The worker only ever reads (`is_subscribed`); clients subscribe,
/// unsubscribe and publish during poll. Each entry is independent - there
/// is no global lock across unrelated pairs.
pub struct SubscriptionRegistry {
    topics: DashMap<(BindableInstanceHandle, String), Topic>,
    capacity: usize,
}

impl SubscriptionRegistry {
    /// `capacity` bounds each topic's buffer; overflow drops the oldest
    /// value
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register interest in one (instance, path) pair
    ///
    /// Multiple independent listeners per pair are supported; each call
    /// returns its own receiver. The property kind is fixed by the first
    /// subscription; values of a different kind observed on the pair are
    /// dropped at fan-out.
    pub fn subscribe(
        &self,
        instance: BindableInstanceHandle,
        path: &str,
        kind: PropertyKind,
    ) -> broadcast::Receiver<PropertyValue> {
        let entry = self
            .topics
            .entry((instance, path.to_string()))
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(self.capacity);
                Topic { kind, sender }
            });
        if entry.kind != kind {
            tracing::warn!(
                instance = %instance,
                path,
                subscribed = %entry.kind,
                requested = %kind,
                "subscription kind mismatch; keeping the first-registered kind"
            );
        }
        entry.sender.subscribe()
    }

    /// Drop the pair's topic entirely; all listeners see the stream end
    pub fn unsubscribe(&self, instance: BindableInstanceHandle, path: &str) -> bool {
        self.topics
            .remove(&(instance, path.to_string()))
            .is_some()
    }

    /// Worker-side check deciding whether a mutation becomes a message
    pub fn is_subscribed(&self, instance: BindableInstanceHandle, path: &str) -> bool {
        self.topics.contains_key(&(instance, path.to_string()))
    }

    /// Fan a changed value out to the pair's listeners (called from the
    /// client's poll, never from the worker)
    ///
    /// Returns the number of listeners that will observe the value.
    pub fn publish(
        &self,
        instance: BindableInstanceHandle,
        path: &str,
        value: PropertyValue,
    ) -> usize {
        match self.topics.get(&(instance, path.to_string())) {
            Some(topic) => {
                if value.kind() != topic.kind {
                    tracing::debug!(
                        instance = %instance,
                        path,
                        expected = %topic.kind,
                        got = %value.kind(),
                        "dropping property update of unsubscribed kind"
                    );
                    return 0;
                }
                // send only fails when no receiver is alive; that is not
                // an error for a broadcast
                topic.sender.send(value).unwrap_or(0)
            }
            None => 0,
        }
    }

    /// Drop every topic (session teardown); listeners observe end-of-stream
    pub fn clear(&self) {
        self.topics.clear();
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn instance(id: u64) -> BindableInstanceHandle {
        BindableInstanceHandle::from_raw(id)
    }

    #[test]
    fn unsubscribed_pairs_are_invisible_to_the_worker() {
        let registry = SubscriptionRegistry::new(8);
        assert!(!registry.is_subscribed(instance(1), "score"));

        let _rx = registry.subscribe(instance(1), "score", PropertyKind::Number);
        assert!(registry.is_subscribed(instance(1), "score"));
        assert!(!registry.is_subscribed(instance(1), "other"));
    }

    #[test]
    fn every_listener_observes_the_published_value() {
        let registry = SubscriptionRegistry::new(8);
        let mut first = registry.subscribe(instance(1), "score", PropertyKind::Number);
        let mut second = registry.subscribe(instance(1), "score", PropertyKind::Number);

        let delivered = registry.publish(instance(1), "score", PropertyValue::Number(3.0));
        assert_eq!(delivered, 2);
        assert_eq!(first.try_recv(), Ok(PropertyValue::Number(3.0)));
        assert_eq!(second.try_recv(), Ok(PropertyValue::Number(3.0)));
    }

    #[test]
    fn overflow_drops_oldest() {
        let registry = SubscriptionRegistry::new(2);
        let mut rx = registry.subscribe(instance(1), "score", PropertyKind::Number);

        for n in 0..5 {
            registry.publish(instance(1), "score", PropertyValue::Number(f64::from(n)));
        }

        // Three oldest values were dropped; the receiver reports the lag
        // first, then the two newest values.
        match rx.try_recv() {
            Err(TryRecvError::Lagged(missed)) => assert_eq!(missed, 3),
            other => panic!("expected lag, got {other:?}"),
        }
        assert_eq!(rx.try_recv(), Ok(PropertyValue::Number(3.0)));
        assert_eq!(rx.try_recv(), Ok(PropertyValue::Number(4.0)));
    }

    #[test]
    fn unsubscribe_removes_the_topic() {
        let registry = SubscriptionRegistry::new(8);
        let _rx = registry.subscribe(instance(1), "score", PropertyKind::Number);
        assert!(registry.unsubscribe(instance(1), "score"));
        assert!(!registry.is_subscribed(instance(1), "score"));
        assert!(!registry.unsubscribe(instance(1), "score"));
    }

    #[test]
    fn mismatched_kind_is_dropped_at_fan_out() {
        let registry = SubscriptionRegistry::new(8);
        let mut rx = registry.subscribe(instance(1), "score", PropertyKind::Number);
        let delivered = registry.publish(instance(1), "score", PropertyValue::Boolean(true));
        assert_eq!(delivered, 0);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }
}
