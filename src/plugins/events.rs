//! Type-keyed publish/subscribe bus
//!
//! Handlers run synchronously on the publishing thread, in the order they
//! subscribed. A handler that returns an error is logged and skipped; the
//! remaining handlers still see the event.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::core::error::Result;
use crate::events::GameEvent;

type Handler = Arc<dyn Fn(&dyn Any) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<TypeId, Vec<Subscriber>>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<E, F>(&self, handler: F) -> SubscriptionId
    where
        E: Any + Send + Sync,
        F: Fn(&E) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let erased: Handler = Arc::new(move |event: &dyn Any| match event.downcast_ref::<E>() {
            Some(e) => handler(e),
            None => Ok(()),
        });
        self.subscribers
            .write()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Subscriber { id, handler: erased });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        for list in subscribers.values_mut() {
            if let Some(index) = list.iter().position(|s| s.id == id) {
                list.remove(index);
                return true;
            }
        }
        false
    }

    /// Deliver to every subscriber of `E`; returns how many succeeded
    pub fn publish<E: Any + Send + Sync>(&self, event: &E) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);

        // Snapshot so handlers may subscribe or publish re-entrantly
        let handlers: Vec<Handler> = match self.subscribers.read().get(&TypeId::of::<E>()) {
            Some(list) if !list.is_empty() => list.iter().map(|s| s.handler.clone()).collect(),
            _ => {
                debug!(event = std::any::type_name::<E>(), "No subscribers for event");
                return 0;
            }
        };

        let mut delivered = 0;
        for handler in handlers {
            match handler(event) {
                Ok(()) => delivered += 1,
                Err(e) => error!(
                    event = std::any::type_name::<E>(),
                    error = %e,
                    "Event handler failed"
                ),
            }
        }
        delivered
    }

    /// Republish the typed payload carried by a game event
    pub fn publish_game_event(&self, event: &GameEvent) -> usize {
        match event {
            GameEvent::Spawned(e) => self.publish(e),
            GameEvent::Moved(e) => self.publish(e),
            GameEvent::Died(e) => self.publish(e),
            GameEvent::Combat(e) => self.publish(e),
            GameEvent::PickedUp(e) => self.publish(e),
            GameEvent::Used(e) => self.publish(e),
            GameEvent::Level(e) => self.publish(e),
            GameEvent::LeveledUp(e) => self.publish(e),
            GameEvent::Reached(e) => self.publish(e),
            GameEvent::Quest(e) => self.publish(e),
            GameEvent::State(e) => self.publish(e),
            GameEvent::Message { .. } => 0,
        }
    }

    pub fn subscriber_count<E: Any>(&self) -> usize {
        self.subscribers
            .read()
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::LablabError;
    use crate::events::{ItemUsed, PlayerLeveledUp};
    use parking_lot::Mutex;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(&ItemUsed { item_name: "Torch".into() }), 0);
        assert_eq!(bus.published_count(), 1);
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe::<ItemUsed, _>(move |e| {
                seen.lock().push(format!("{}:{}", tag, e.item_name));
                Ok(())
            });
        }

        assert_eq!(bus.publish(&ItemUsed { item_name: "Potion".into() }), 3);
        assert_eq!(
            *seen.lock(),
            vec!["first:Potion", "second:Potion", "third:Potion"]
        );
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));
        bus.subscribe::<PlayerLeveledUp, _>(|_| Err(LablabError::Plugin("boom".into())));
        let counter = hits.clone();
        bus.subscribe::<PlayerLeveledUp, _>(move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        assert_eq!(bus.publish(&PlayerLeveledUp { new_level: 2 }), 1);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_events_are_routed_by_type() {
        let bus = EventBus::new();
        bus.subscribe::<ItemUsed, _>(|_| Ok(()));
        assert_eq!(bus.subscriber_count::<ItemUsed>(), 1);
        assert_eq!(bus.subscriber_count::<PlayerLeveledUp>(), 0);
        assert_eq!(bus.publish(&PlayerLeveledUp { new_level: 3 }), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe::<ItemUsed, _>(|_| Ok(()));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count::<ItemUsed>(), 0);
    }

    #[test]
    fn test_game_event_payload_is_republished() {
        let bus = EventBus::new();
        let levels = Arc::new(Mutex::new(Vec::new()));
        let sink = levels.clone();
        bus.subscribe::<PlayerLeveledUp, _>(move |e| {
            sink.lock().push(e.new_level);
            Ok(())
        });

        bus.publish_game_event(&GameEvent::LeveledUp(PlayerLeveledUp { new_level: 4 }));
        bus.publish_game_event(&GameEvent::message("ignored", crate::game::log::LogSeverity::Info));
        assert_eq!(*levels.lock(), vec![4]);
    }
}
