//! Subscriber registry and fallback queue
//!
//! Maps event kinds to ordered handler lists and holds the bounded queue of
//! generic messages that arrived before any consumer subscribed.
//!
//! Dispatch snapshots the handler list and invokes the callbacks with no
//! registry lock held, so a handler may freely register or remove handlers
//! (including itself) from inside a callback. Mutations made during a
//! dispatch take effect from the next event onward.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::error;
use parking_lot::Mutex;

use crate::errors::LiveResult;
use crate::events::{Envelope, EventKind, LiveEvent};

/// Subscriber callback
///
/// Invoked synchronously, in registration order, for every event of the kind
/// it was registered under. A returned error is logged and does not stop
/// dispatch to the remaining handlers.
pub type Handler = Box<dyn FnMut(&LiveEvent) -> LiveResult<()> + Send>;

/// Token identifying a registered handler, for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Each handler sits behind its own lock so dispatch can run it without
/// holding the registry lock.
type StoredHandler = Arc<Mutex<Handler>>;

/// Capacity of the fallback queue; the oldest entry is evicted beyond this.
const FALLBACK_CAPACITY: usize = 100;

struct RegistryInner {
    handlers: HashMap<EventKind, Vec<(HandlerId, StoredHandler)>>,
    next_id: u64,
    fallback: VecDeque<Envelope>,
}

/// Handler bookkeeping shared by the connection manager
///
/// Messages dispatched under the generic `Message` kind with no handler
/// registered are not dropped; they land in a FIFO fallback queue (capacity
/// 100, oldest-out) and are replayed in arrival order once a handler shows up
/// or the connection reopens.
#[derive(Clone)]
pub(crate) struct SubscriberRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                handlers: HashMap::new(),
                next_id: 0,
                fallback: VecDeque::new(),
            })),
        }
    }

    /// Register a handler for the given kind; duplicates are allowed and each
    /// registration is invoked once per event.
    pub(crate) fn on(&self, kind: EventKind, handler: Handler) -> HandlerId {
        let mut inner = self.inner.lock();
        let id = HandlerId(inner.next_id);
        inner.next_id += 1;
        inner
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(Mutex::new(handler))));
        id
    }

    /// Remove a previously registered handler; unknown ids are a no-op.
    pub(crate) fn off(&self, kind: &EventKind, id: HandlerId) {
        if let Some(list) = self.inner.lock().handlers.get_mut(kind) {
            list.retain(|(entry_id, _)| *entry_id != id);
        }
    }

    /// Invoke every handler registered for `kind`, in registration order.
    ///
    /// The list is snapshotted up front: a handler removed mid-dispatch is
    /// still invoked for the current event, one added mid-dispatch starts
    /// with the next. A generic `Message` payload with no handler goes to the
    /// fallback queue instead.
    pub(crate) fn dispatch(&self, kind: &EventKind, event: &LiveEvent) {
        let targets: Vec<(HandlerId, StoredHandler)> = self
            .inner
            .lock()
            .handlers
            .get(kind)
            .cloned()
            .unwrap_or_default();

        if targets.is_empty() {
            if *kind == EventKind::Message {
                if let LiveEvent::Payload(envelope) = event {
                    let mut inner = self.inner.lock();
                    if inner.fallback.len() == FALLBACK_CAPACITY {
                        inner.fallback.pop_front();
                    }
                    inner.fallback.push_back(envelope.clone());
                }
            }
            return;
        }

        for (id, handler) in targets {
            let mut callback = handler.lock();
            if let Err(err) = (*callback)(event) {
                error!("handler {:?} for '{}' failed: {}", id, kind, err);
            }
        }
    }

    /// Drain the fallback queue and re-dispatch each message in order.
    ///
    /// Messages that still find no handler simply re-queue.
    pub(crate) fn replay_fallback(&self) {
        let queued: Vec<Envelope> = {
            let mut inner = self.inner.lock();
            inner.fallback.drain(..).collect()
        };
        for envelope in queued {
            self.dispatch(&EventKind::Message, &LiveEvent::Payload(envelope));
        }
    }

    /// Drop every handler and queued message; used on manager shutdown.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.handlers.clear();
        inner.fallback.clear();
    }

    #[cfg(test)]
    pub(crate) fn fallback_len(&self) -> usize {
        self.inner.lock().fallback.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value};

    use super::*;
    use crate::errors::LiveError;

    fn event_numbered(n: u64) -> LiveEvent {
        let mut fields = Map::new();
        fields.insert("seq".to_string(), Value::from(n));
        LiveEvent::Payload(Envelope::new(None, None, fields))
    }

    fn seq_of(envelope: &Envelope) -> u64 {
        envelope.field("seq").and_then(Value::as_u64).unwrap()
    }

    fn recording_handler(seen: Arc<Mutex<Vec<u64>>>, tag: u64) -> Handler {
        Box::new(move |event| {
            if let Some(envelope) = event.payload() {
                seen.lock().push(tag * 1000 + seq_of(envelope));
            }
            Ok(())
        })
    }

    #[test]
    fn test_handlers_invoked_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.on(EventKind::Message, recording_handler(seen.clone(), 1));
        registry.on(EventKind::Message, recording_handler(seen.clone(), 2));

        registry.dispatch(&EventKind::Message, &event_numbered(7));
        assert_eq!(*seen.lock(), vec![1007, 2007]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_dispatch() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.on(
            EventKind::Message,
            Box::new(|_| Err(LiveError::Handler("boom".to_string()))),
        );
        registry.on(EventKind::Message, recording_handler(seen.clone(), 1));

        registry.dispatch(&EventKind::Message, &event_numbered(1));
        assert_eq!(*seen.lock(), vec![1001]);
    }

    #[test]
    fn test_off_removes_handler_and_ignores_unknown_id() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = registry.on(EventKind::Message, recording_handler(seen.clone(), 1));
        registry.off(&EventKind::Message, id);
        // Removing twice (or for the wrong kind) is a no-op
        registry.off(&EventKind::Message, id);
        registry.off(&EventKind::Snapshot, id);

        registry.dispatch(&EventKind::Message, &event_numbered(1));
        assert!(seen.lock().is_empty());
        // With no handler left the message goes to the fallback queue
        assert_eq!(registry.fallback_len(), 1);
    }

    #[test]
    fn test_handler_may_remove_itself_during_dispatch() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(Mutex::new(0u32));
        let id_slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));

        let count = calls.clone();
        let my_id = id_slot.clone();
        let reg = registry.clone();
        let id = registry.on(
            EventKind::Message,
            Box::new(move |_| {
                *count.lock() += 1;
                if let Some(id) = my_id.lock().take() {
                    reg.off(&EventKind::Message, id);
                }
                Ok(())
            }),
        );
        *id_slot.lock() = Some(id);

        registry.dispatch(&EventKind::Message, &event_numbered(1));
        registry.dispatch(&EventKind::Message, &event_numbered(2));

        // One-shot: invoked once, then gone; the second message had no
        // handler and was queued instead
        assert_eq!(*calls.lock(), 1);
        assert_eq!(registry.fallback_len(), 1);
    }

    #[test]
    fn test_handler_added_during_dispatch_starts_with_next_event() {
        let registry = SubscriberRegistry::new();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let added = Arc::new(Mutex::new(false));

        let reg = registry.clone();
        let first_seen = seen.clone();
        let second_seen = seen.clone();
        registry.on(
            EventKind::Message,
            Box::new(move |event| {
                if let Some(envelope) = event.payload() {
                    first_seen.lock().push(1000 + seq_of(envelope));
                }
                let mut added = added.lock();
                if !*added {
                    *added = true;
                    reg.on(
                        EventKind::Message,
                        recording_handler(second_seen.clone(), 2),
                    );
                }
                Ok(())
            }),
        );

        registry.dispatch(&EventKind::Message, &event_numbered(1));
        registry.dispatch(&EventKind::Message, &event_numbered(2));

        // The handler registered while event 1 was dispatching only sees
        // event 2
        assert_eq!(*seen.lock(), vec![1001, 1002, 2002]);
    }

    #[test]
    fn test_unhandled_messages_queue_and_replay_in_order() {
        let registry = SubscriberRegistry::new();
        for n in 0..3 {
            registry.dispatch(&EventKind::Message, &event_numbered(n));
        }
        assert_eq!(registry.fallback_len(), 3);

        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.on(EventKind::Message, recording_handler(seen.clone(), 1));
        registry.replay_fallback();

        assert_eq!(*seen.lock(), vec![1000, 1001, 1002]);
        assert_eq!(registry.fallback_len(), 0);
    }

    #[test]
    fn test_fallback_queue_evicts_oldest_beyond_capacity() {
        let registry = SubscriberRegistry::new();
        for n in 0..101 {
            registry.dispatch(&EventKind::Message, &event_numbered(n));
        }
        assert_eq!(registry.fallback_len(), 100);

        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.on(EventKind::Message, recording_handler(seen.clone(), 0));
        registry.replay_fallback();

        let seen = seen.lock();
        assert_eq!(seen.len(), 100);
        // Message 0 was evicted when 100 arrived
        assert_eq!(seen[0], 1);
        assert_eq!(seen[99], 100);
    }

    #[test]
    fn test_replay_without_handler_requeues() {
        let registry = SubscriberRegistry::new();
        registry.dispatch(&EventKind::Message, &event_numbered(9));
        registry.replay_fallback();
        assert_eq!(registry.fallback_len(), 1);
    }

    #[test]
    fn test_non_message_kinds_are_never_queued() {
        let registry = SubscriberRegistry::new();
        registry.dispatch(&EventKind::Snapshot, &event_numbered(1));
        registry.dispatch(&EventKind::ConnectionChange, &LiveEvent::ConnectionChange(true));
        assert_eq!(registry.fallback_len(), 0);
    }

    #[test]
    fn test_clear_drops_handlers_and_queue() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.on(EventKind::Message, recording_handler(seen.clone(), 1));
        registry.clear();

        registry.dispatch(&EventKind::Message, &event_numbered(1));
        assert!(seen.lock().is_empty());
        // The cleared registry queues again from scratch
        assert_eq!(registry.fallback_len(), 1);
    }
}
