//! Lifecycle events
//!
//! Events go out on a process-owned broadcast channel. Delivery is
//! at-most-once with no acknowledgement: a subscriber that lags behind loses
//! the oldest events, and publishing with no subscriber drops the event.
//! Events of a single operation are sent from a single task, so a subscriber
//! sees them in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Property carrying the app name
pub const PROPERTY_APP_NAME: &str = "app:name";
/// Property carrying the main service icon
pub const PROPERTY_APP_ICON: &str = "app:icon";
/// Property carrying the main service image
pub const PROPERTY_IMAGE_NAME: &str = "docker:image:name";
/// Property carrying an error message
pub const PROPERTY_MESSAGE: &str = "message";

/// Event properties
pub type EventProperties = BTreeMap<String, String>;

/// Lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "app:install-begin")]
    InstallBegin,
    #[serde(rename = "app:install-end")]
    InstallEnd,
    #[serde(rename = "app:install-error")]
    InstallError,
    #[serde(rename = "app:uninstall-begin")]
    UninstallBegin,
    #[serde(rename = "app:uninstall-end")]
    UninstallEnd,
    #[serde(rename = "app:uninstall-error")]
    UninstallError,
}

impl EventType {
    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::InstallBegin => "app:install-begin",
            EventType::InstallEnd => "app:install-end",
            EventType::InstallError => "app:install-error",
            EventType::UninstallBegin => "app:uninstall-begin",
            EventType::UninstallEnd => "app:uninstall-end",
            EventType::UninstallError => "app:uninstall-error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id
    pub id: Uuid,
    /// Operation this event belongs to
    pub operation_id: Uuid,
    /// Event type
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Event properties
    pub properties: EventProperties,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// App name property, if present
    pub fn app_name(&self) -> Option<&str> {
        self.properties.get(PROPERTY_APP_NAME).map(String::as_str)
    }
}

/// Handle for publishing lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<Event>,
}

impl EventPublisher {
    /// Create a publisher whose channel buffers `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event without waiting for delivery
    pub fn publish(
        &self,
        operation_id: Uuid,
        event_type: EventType,
        properties: EventProperties,
    ) -> Event {
        let event = Event {
            id: Uuid::new_v4(),
            operation_id,
            event_type,
            properties,
            timestamp: Utc::now(),
        };

        if self.sender.send(event.clone()).is_err() {
            tracing::trace!(event = %event_type, "No subscribers, event dropped");
        }

        event
    }
}
