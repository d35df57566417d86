//! Typed publish/subscribe register shared by the match components

use std::any::{type_name, Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use super::BusEvent;

/// A named topic with a fixed payload type.
///
/// Two topics sharing a name must share a payload type; the bus panics on the
/// first publish or subscribe that disagrees.
pub trait Topic: 'static {
    const NAME: &'static str;
    type Payload: 'static;
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<P> = Rc<RefCell<dyn FnMut(&P)>>;

struct TopicEntry {
    payload_type: TypeId,
    payload_name: &'static str,
    handlers: Vec<(SubscriptionId, Box<dyn Any>)>,
}

impl TopicEntry {
    fn new<P: 'static>() -> Self {
        Self {
            payload_type: TypeId::of::<P>(),
            payload_name: type_name::<P>(),
            handlers: Vec::new(),
        }
    }

    fn assert_payload<P: 'static>(&self, topic: &'static str) {
        assert!(
            self.payload_type == TypeId::of::<P>(),
            "topic `{}` carries `{}`, got `{}`",
            topic,
            self.payload_name,
            type_name::<P>()
        );
    }
}

/// Synchronous event bus. Handlers run on the publisher's call stack, in
/// registration order. The bus never owns subscriber state.
#[derive(Default)]
pub struct EventBus {
    next_id: Cell<u64>,
    topics: RefCell<HashMap<&'static str, TopicEntry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `T`
    pub fn subscribe<T: Topic>(&self, handler: impl FnMut(&T::Payload) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let handler: Handler<T::Payload> = Rc::new(RefCell::new(handler));
        let mut topics = self.topics.borrow_mut();
        let entry = topics
            .entry(T::NAME)
            .or_insert_with(TopicEntry::new::<T::Payload>);
        entry.assert_payload::<T::Payload>(T::NAME);
        entry.handlers.push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Unknown ids are a no-op; returns whether anything was removed.
    pub fn unsubscribe<T: Topic>(&self, id: SubscriptionId) -> bool {
        self.remove(T::NAME, id)
    }

    /// Invoke every handler currently registered for `T`
    pub fn publish<T: Topic>(&self, payload: T::Payload) {
        let handlers: Vec<(SubscriptionId, Handler<T::Payload>)> = {
            let mut topics = self.topics.borrow_mut();
            let entry = topics
                .entry(T::NAME)
                .or_insert_with(TopicEntry::new::<T::Payload>);
            entry.assert_payload::<T::Payload>(T::NAME);
            entry
                .handlers
                .iter()
                .filter_map(|(id, handler)| {
                    handler
                        .downcast_ref::<Handler<T::Payload>>()
                        .map(|h| (*id, h.clone()))
                })
                .collect()
        };

        for (id, handler) in handlers {
            // A handler earlier in this round may have unsubscribed this one
            if !self.is_registered(T::NAME, id) {
                continue;
            }
            match handler.try_borrow_mut() {
                Ok(mut handle) => (&mut *handle)(&payload),
                Err(_) => warn!(topic = T::NAME, "Skipping re-entrant handler"),
            }
        }
    }

    /// Number of handlers registered for `T`
    pub fn subscriber_count<T: Topic>(&self) -> usize {
        self.topics
            .borrow()
            .get(T::NAME)
            .map(|entry| entry.handlers.len())
            .unwrap_or(0)
    }

    fn is_registered(&self, topic: &'static str, id: SubscriptionId) -> bool {
        self.topics
            .borrow()
            .get(topic)
            .map(|entry| entry.handlers.iter().any(|(h, _)| *h == id))
            .unwrap_or(false)
    }

    fn remove(&self, topic: &'static str, id: SubscriptionId) -> bool {
        let mut topics = self.topics.borrow_mut();
        match topics.get_mut(topic) {
            Some(entry) => {
                let before = entry.handlers.len();
                entry.handlers.retain(|(h, _)| *h != id);
                entry.handlers.len() != before
            }
            None => false,
        }
    }
}

/// Subscriptions owned by one component, released when it is dropped
pub struct Subscriptions {
    bus: Weak<EventBus>,
    held: Vec<(&'static str, SubscriptionId)>,
}

impl Subscriptions {
    pub fn new(bus: &Rc<EventBus>) -> Self {
        Self {
            bus: Rc::downgrade(bus),
            held: Vec::new(),
        }
    }

    pub fn add<T: Topic>(&mut self, handler: impl FnMut(&T::Payload) + 'static) {
        if let Some(bus) = self.bus.upgrade() {
            let id = bus.subscribe::<T>(handler);
            self.held.push((T::NAME, id));
        }
    }

    /// Route `T` into a method on `target`, then publish whatever it emits.
    ///
    /// The target is held weakly and its borrow is released before the
    /// emitted events go out, so a chain of handlers may lead back to it.
    pub fn forward<T, C, F>(&mut self, target: &Rc<RefCell<C>>, mut handle: F)
    where
        T: Topic,
        C: 'static,
        F: FnMut(&mut C, &T::Payload) -> Vec<BusEvent> + 'static,
    {
        let target = Rc::downgrade(target);
        let bus = self.bus.clone();
        self.add::<T>(move |payload| {
            let Some(target) = target.upgrade() else {
                debug!(topic = T::NAME, "Subscriber dropped, ignoring event");
                return;
            };
            let emitted = match target.try_borrow_mut() {
                Ok(mut component) => handle(&mut *component, payload),
                Err(_) => {
                    warn!(topic = T::NAME, "Subscriber busy, event dropped");
                    return;
                }
            };
            if let Some(bus) = bus.upgrade() {
                for event in emitted {
                    event.publish(&bus);
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn release(&mut self) {
        let held = std::mem::take(&mut self.held);
        if let Some(bus) = self.bus.upgrade() {
            for (topic, id) in held {
                bus.remove(topic, id);
            }
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        self.release();
    }
}
