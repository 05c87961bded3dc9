//! Session event system.
//!
//! Lifecycle changes, captured waypoints, and absorbed failures are published
//! on a broadcast channel so UI layers can react without polling.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use drivelog_types::{AuthorizationState, Waypoint};

/// Events emitted while recording drives.
///
/// All events are serializable for logging, persistence, and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// A new drive started.
    Started {
        route_id: Uuid,
        start_location: Option<String>,
    },
    /// An active drive from a previous process was re-adopted.
    Recovered { route_id: Uuid, waypoint_count: usize },
    /// A waypoint was appended to the active drive.
    WaypointAdded {
        route_id: Uuid,
        waypoint: Waypoint,
        total: usize,
        forced: bool,
    },
    /// An incremental flush failed; the next flush rewrites the full list.
    PersistenceFailed { route_id: Uuid, error: String },
    /// The drive ended normally.
    Ended {
        route_id: Uuid,
        distance: f64,
        duration: f64,
    },
    /// The drive was cancelled.
    Cancelled { route_id: Uuid },
    /// No end location could be determined; the user has to type one.
    ManualInputRequired { route_id: Uuid, attempts: u32 },
    /// The background execution extension could not be renewed.
    BackgroundExtensionLost { error: String },
    /// Location permission changed.
    AuthorizationChanged { state: AuthorizationState },
}

impl SessionEvent {
    /// The route the event refers to, if any.
    pub fn route_id(&self) -> Option<Uuid> {
        match self {
            Self::Started { route_id, .. }
            | Self::Recovered { route_id, .. }
            | Self::WaypointAdded { route_id, .. }
            | Self::PersistenceFailed { route_id, .. }
            | Self::Ended { route_id, .. }
            | Self::Cancelled { route_id }
            | Self::ManualInputRequired { route_id, .. } => Some(*route_id),
            Self::BackgroundExtensionLost { .. } | Self::AuthorizationChanged { .. } => None,
        }
    }
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = SessionEvent::Cancelled {
            route_id: Uuid::nil(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"cancelled""#));

        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_route_id_accessor() {
        let id = Uuid::new_v4();
        assert_eq!(
            SessionEvent::ManualInputRequired {
                route_id: id,
                attempts: 3
            }
            .route_id(),
            Some(id)
        );
        assert_eq!(
            SessionEvent::AuthorizationChanged {
                state: AuthorizationState::Denied
            }
            .route_id(),
            None
        );
    }

    #[tokio::test]
    async fn test_dispatcher_fans_out() {
        let dispatcher = EventDispatcher::new(8);
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.send(SessionEvent::BackgroundExtensionLost {
            error: "expired".to_string(),
        });

        assert!(matches!(
            a.recv().await.unwrap(),
            SessionEvent::BackgroundExtensionLost { .. }
        ));
        assert!(matches!(
            b.recv().await.unwrap(),
            SessionEvent::BackgroundExtensionLost { .. }
        ));
    }

    #[test]
    fn test_send_without_receivers_is_silent() {
        let dispatcher = EventDispatcher::default();
        dispatcher.send(SessionEvent::Cancelled {
            route_id: Uuid::nil(),
        });
        assert_eq!(dispatcher.receiver_count(), 0);
    }
}
