//! # Cache Invalidation Bus
//!
//! Catalog changes arrive as `{topic, key}` events on an in-process
//! broadcast channel. A bridge from the message broker (or the
//! `POST /invalidations` endpoint) publishes; one listener task per
//! catalog applies them.
//!
//! A lagged receiver has lost events it cannot name, so it flushes every
//! family it serves. A closed channel does the same before the listener
//! exits.

use crate::cache::Family;
use crate::catalog::Catalog;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Buffered events per subscriber before it lags.
const BUS_CAPACITY: usize = 1024;

/// One change notification from the catalog owners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub topic: String,
    /// The changed entity. `None` invalidates the whole topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl InvalidationEvent {
    pub fn new(topic: impl Into<String>, key: Option<String>) -> Self {
        Self {
            topic: topic.into(),
            key,
        }
    }

    /// Cache families touched by this event. Unknown topics touch nothing.
    #[must_use]
    pub fn families(&self) -> Vec<Family> {
        families_for_topic(&self.topic)
    }
}

/// Map a bus topic to the cache families it invalidates.
#[must_use]
pub fn families_for_topic(topic: &str) -> Vec<Family> {
    match topic {
        "device-types" => vec![Family::DeviceTypes],
        "aspects" => vec![Family::Aspects],
        "functions" | "concepts" | "characteristics" => vec![Family::Functions, Family::Concepts],
        "devices" => vec![Family::Devices],
        "device-groups" => vec![Family::DeviceGroups],
        "import-types" => vec![Family::ImportTypes, Family::Imports],
        "permissions" => vec![Family::Permissions],
        _ => Vec::new(),
    }
}

// =============================================================================
// BUS
// =============================================================================

/// Publisher side of the invalidation stream.
#[derive(Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<InvalidationEvent>,
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Returns the number of listeners reached.
    pub fn publish(&self, event: InvalidationEvent) -> usize {
        tracing::debug!(
            event = "invalidation_published",
            topic = %event.topic,
            key = event.key.as_deref().unwrap_or("*"),
            "Invalidation published"
        );
        self.sender.send(event).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.sender.subscribe()
    }
}

// =============================================================================
// LISTENER
// =============================================================================

/// Apply events from `rx` to `catalog` until the channel closes.
pub fn spawn_listener(
    catalog: Arc<Catalog>,
    mut rx: broadcast::Receiver<InvalidationEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => catalog.apply_invalidation(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        event = "invalidation_lagged",
                        missed = n,
                        "Invalidation stream lagged, flushing all families"
                    );
                    catalog.flush_all();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::warn!(
                        event = "invalidation_closed",
                        "Invalidation stream closed, flushing all families"
                    );
                    catalog.flush_all();
                    break;
                }
            }
        }
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_map_to_families() {
        assert_eq!(families_for_topic("device-types"), vec![Family::DeviceTypes]);
        assert_eq!(
            families_for_topic("characteristics"),
            vec![Family::Functions, Family::Concepts]
        );
        assert_eq!(
            families_for_topic("import-types"),
            vec![Family::ImportTypes, Family::Imports]
        );
        assert!(families_for_topic("hubs").is_empty());
    }

    #[test]
    fn event_key_is_optional_on_the_wire() {
        let event: InvalidationEvent =
            serde_json::from_str(r#"{"topic":"aspects"}"#).expect("decode");
        assert_eq!(event, InvalidationEvent::new("aspects", None));
        assert_eq!(
            serde_json::to_string(&event).expect("encode"),
            r#"{"topic":"aspects"}"#
        );
    }

    #[test]
    fn publish_without_listeners_reaches_nobody() {
        let bus = InvalidationBus::new();
        assert_eq!(bus.publish(InvalidationEvent::new("devices", None)), 0);
        let _rx = bus.subscribe();
        assert_eq!(bus.publish(InvalidationEvent::new("devices", None)), 1);
    }
}
