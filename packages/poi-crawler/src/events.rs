use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use crate::types::{SessionId, SessionStatus};

/// Observable progress of a session, one event per fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

impl ProgressEvent {
    pub fn new(session_id: SessionId, event: SessionEvent) -> Self {
        Self {
            session_id,
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    // ============================================================================
    // Lifecycle
    // ============================================================================
    SessionStarted {
        seed_url: String,
    },

    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
        reason: Option<String>,
    },

    // ============================================================================
    // Pages
    // ============================================================================
    PageProcessed {
        url: String,
        depth: u32,
        pois_found: usize,
        links_enqueued: usize,
        pages_visited: usize,
    },

    PageFailed {
        url: String,
        error_kind: String,
        error: String,
        will_retry: bool,
    },

    // ============================================================================
    // Ledger
    // ============================================================================
    PoiCreated {
        key: String,
        name: String,
    },

    PoiUpdated {
        key: String,
        name: String,
    },

    // ============================================================================
    // Persistence
    // ============================================================================
    CheckpointSaved {
        pages_visited: usize,
    },

    CheckpointFailed {
        error: String,
        consecutive_failures: u32,
    },

    DegradedMode {
        reason: String,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionStarted { .. } => "session_started",
            SessionEvent::StatusChanged { .. } => "status_changed",
            SessionEvent::PageProcessed { .. } => "page_processed",
            SessionEvent::PageFailed { .. } => "page_failed",
            SessionEvent::PoiCreated { .. } => "poi_created",
            SessionEvent::PoiUpdated { .. } => "poi_updated",
            SessionEvent::CheckpointSaved { .. } => "checkpoint_saved",
            SessionEvent::CheckpointFailed { .. } => "checkpoint_failed",
            SessionEvent::DegradedMode { .. } => "degraded_mode",
        }
    }
}

/// Receives progress events. Emitting never fails the session.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Mirrors events to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ProgressEvent) {
        let session_id = event.session_id;
        match &event.event {
            SessionEvent::PageFailed { url, error, will_retry, .. } => {
                tracing::warn!(%session_id, %url, %error, will_retry, "Page failed");
            }
            SessionEvent::CheckpointFailed { error, consecutive_failures } => {
                tracing::warn!(%session_id, %error, consecutive_failures, "Checkpoint failed");
            }
            SessionEvent::DegradedMode { reason } => {
                tracing::error!(%session_id, %reason, "Session running in degraded mode");
            }
            SessionEvent::PoiCreated { .. } | SessionEvent::PoiUpdated { .. } => {
                tracing::debug!(%session_id, event = ?event.event, "Ledger changed");
            }
            other => {
                tracing::info!(%session_id, event_type = other.event_type(), event = ?other, "Session progress");
            }
        }
    }
}

/// Forwards events to a tokio channel. Events are dropped once the receiver
/// is gone.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

/// Collects events in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryEventSink {
    events: Arc<RwLock<Vec<ProgressEvent>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .read()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.event.event_type()).collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.event_types()
            .into_iter()
            .filter(|t| *t == event_type)
            .count()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.write() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_and_payload() {
        let event = ProgressEvent::new(
            SessionId::new(),
            SessionEvent::PageProcessed {
                url: "https://example.com".into(),
                depth: 0,
                pois_found: 2,
                links_enqueued: 3,
                pages_visited: 1,
            },
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event_type"], "page_processed");
        assert_eq!(json["payload"]["pois_found"], 2);
        assert!(json["session_id"].is_string());

        let back: ProgressEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_events() {
        let (sink, mut rx) = ChannelEventSink::new();
        let id = SessionId::new();
        sink.emit(ProgressEvent::new(
            id,
            SessionEvent::SessionStarted {
                seed_url: "https://example.com".into(),
            },
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id, id);
        assert_eq!(event.event.event_type(), "session_started");
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelEventSink::new();
        drop(rx);
        sink.emit(ProgressEvent::new(
            SessionId::new(),
            SessionEvent::DegradedMode { reason: "disk full".into() },
        ));
    }
}
