use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{ReleaseCause, SubjectId};

/// Identity of an external consumer, used to tear down all of its
/// subscriptions at once when the host adapter detects the consumer going
/// away.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConsumerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to one registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Domain events published by the engine.
#[derive(Debug, Clone)]
pub enum Event {
    JailCreated {
        name: String,
    },
    JailDeleted {
        name: String,
    },
    PrisonerConfined {
        subject: SubjectId,
        jail: String,
    },
    PrisonerReleased {
        subject: SubjectId,
        jail: String,
        cause: ReleaseCause,
    },
    /// A bulk save finished queueing; `records` counts the confinement
    /// snapshots included.
    DataSaved {
        records: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    JailCreated,
    JailDeleted,
    PrisonerConfined,
    PrisonerReleased,
    DataSaved,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::JailCreated { .. } => EventKind::JailCreated,
            Event::JailDeleted { .. } => EventKind::JailDeleted,
            Event::PrisonerConfined { .. } => EventKind::PrisonerConfined,
            Event::PrisonerReleased { .. } => EventKind::PrisonerReleased,
            Event::DataSaved { .. } => EventKind::DataSaved,
        }
    }
}

/// Type alias for a subscriber callback.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    consumer: ConsumerId,
    handler: EventHandler,
}

/// Typed synchronous publish/subscribe.
///
/// Dispatch runs on the publishing context in registration order; a slow
/// subscriber delays the publisher.
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    subscriptions: HashMap<EventKind, Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        consumer: &ConsumerId,
        kind: EventKind,
        handler: EventHandler,
    ) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscriptions.entry(kind).or_default().push(Subscription {
            id,
            consumer: consumer.clone(),
            handler,
        });
        id
    }

    /// Convenience over [`EventBus::subscribe`] for plain closures.
    pub fn subscribe_fn<F>(
        &mut self,
        consumer: &ConsumerId,
        kind: EventKind,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(consumer, kind, Arc::new(handler))
    }

    /// Removes one subscription. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for subs in self.subscriptions.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return true;
            }
        }
        false
    }

    /// Removes every subscription held by one consumer, atomically from the
    /// caller's point of view. Returns how many were removed.
    pub fn unsubscribe_all(&mut self, consumer: &ConsumerId) -> usize {
        let mut removed = 0;
        for subs in self.subscriptions.values_mut() {
            let before = subs.len();
            subs.retain(|s| s.consumer != *consumer);
            removed += before - subs.len();
        }
        removed
    }

    /// Dispatches to every subscriber of the event's kind.
    pub fn publish(&self, event: &Event) {
        if let Some(subs) = self.subscriptions.get(&event.kind()) {
            for sub in subs {
                (sub.handler)(event);
            }
        }
    }

    /// Shutdown path: drops every subscription.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.values().map(Vec::len).sum()
    }
}
