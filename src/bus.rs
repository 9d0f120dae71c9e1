// Vault Desktop - Event Bus
// Fire-and-forget publish/subscribe between windows, keyed by topic

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::negotiator::{CloseInitiator, CloseOutcome};
use crate::prompt::PendingAction;
use crate::window::WindowLabel;

pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

pub mod topics {
    pub const ENTRY_UPDATED: &str = "entry-updated";
    pub const ENTRY_DELETED: &str = "entry-deleted";
    pub const BACKEND_OPTION_CHANGED: &str = "backend-option-changed";
    pub const WINDOW_CLOSE_REQUESTED: &str = "window-close-requested";
    pub const WINDOW_CLOSE_ACK: &str = "window-close-ack";
    pub const UNSAVED_CHANGES_PROMPT: &str = "unsaved-changes-prompt";
    pub const DIRTY_CHANGED: &str = "dirty-changed";
    pub const VAULT_REFRESH: &str = "vault-refresh";
    pub const DATABASE_CONFLICT: &str = "database-conflict";
    pub const SESSION_ENDED: &str = "session-ended";
    pub const NOTIFY: &str = "notify";
}

/// Wire form of every event: a topic and a JSON payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub topic: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing)]
    pub sequence: u64,
}

impl EventEnvelope {
    /// The window this envelope is addressed to, if it names one
    pub fn target(&self) -> Option<&str> {
        self.payload
            .get("target")
            .or_else(|| {
                if self.topic == topics::WINDOW_CLOSE_REQUESTED {
                    self.payload.get("label")
                } else {
                    None
                }
            })
            .and_then(|target| target.as_str())
    }
}

/// Preferences whose change the main window must react to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendOption {
    AutoLockSeconds,
    CloseToTray,
    LiveUpdates,
    BreachCheck,
}

impl BackendOption {
    /// The open session has to be reloaded before the option takes effect
    pub fn requires_reload(self) -> bool {
        matches!(self, BackendOption::BreachCheck)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// A transient, user-visible notification (toast) for one window
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub target: WindowLabel,
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn success(target: WindowLabel, title: &str, message: impl Into<String>) -> Self {
        Self::new(target, NoticeLevel::Success, title, message)
    }

    pub fn info(target: WindowLabel, title: &str, message: impl Into<String>) -> Self {
        Self::new(target, NoticeLevel::Info, title, message)
    }

    pub fn error(target: WindowLabel, title: &str, message: impl Into<String>) -> Self {
        Self::new(target, NoticeLevel::Error, title, message)
    }

    fn new(target: WindowLabel, level: NoticeLevel, title: &str, message: impl Into<String>) -> Self {
        Self {
            target,
            level,
            title: title.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "topic",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SessionEvent {
    EntryUpdated {
        entry_id: String,
    },
    EntryDeleted {
        entry_id: String,
    },
    BackendOptionChanged {
        option: BackendOption,
        value: serde_json::Value,
    },
    #[serde(rename = "window-close-requested")]
    CloseRequested {
        label: WindowLabel,
        initiator: Option<CloseInitiator>,
        force: bool,
    },
    #[serde(rename = "window-close-ack")]
    CloseAck {
        label: WindowLabel,
        outcome: CloseOutcome,
    },
    #[serde(rename = "unsaved-changes-prompt")]
    UnsavedPrompt {
        target: WindowLabel,
        visible: bool,
        action: Option<PendingAction>,
    },
    DirtyChanged {
        target: WindowLabel,
        dirty: bool,
    },
    VaultRefresh {
        target: WindowLabel,
        generation: u64,
    },
    DatabaseConflict {
        target: WindowLabel,
    },
    SessionEnded {
        target: WindowLabel,
        initiator: CloseInitiator,
        manual_logout: bool,
    },
    Notify(Notice),
}

impl SessionEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            SessionEvent::EntryUpdated { .. } => topics::ENTRY_UPDATED,
            SessionEvent::EntryDeleted { .. } => topics::ENTRY_DELETED,
            SessionEvent::BackendOptionChanged { .. } => topics::BACKEND_OPTION_CHANGED,
            SessionEvent::CloseRequested { .. } => topics::WINDOW_CLOSE_REQUESTED,
            SessionEvent::CloseAck { .. } => topics::WINDOW_CLOSE_ACK,
            SessionEvent::UnsavedPrompt { .. } => topics::UNSAVED_CHANGES_PROMPT,
            SessionEvent::DirtyChanged { .. } => topics::DIRTY_CHANGED,
            SessionEvent::VaultRefresh { .. } => topics::VAULT_REFRESH,
            SessionEvent::DatabaseConflict { .. } => topics::DATABASE_CONFLICT,
            SessionEvent::SessionEnded { .. } => topics::SESSION_ENDED,
            SessionEvent::Notify(_) => topics::NOTIFY,
        }
    }

    pub fn to_envelope(&self) -> Result<EventEnvelope, serde_json::Error> {
        serde_json::to_value(self).and_then(serde_json::from_value)
    }

    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, serde_json::Error> {
        serde_json::to_value(envelope).and_then(serde_json::from_value)
    }
}

/// Process-wide bus. Delivery is best effort: no acknowledgment, no retry,
/// and a lagging subscriber silently loses the oldest events.
#[derive(Clone, Debug)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Debug)]
struct BusInner {
    sender: broadcast::Sender<EventEnvelope>,
    next_sequence: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                sender,
                next_sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn publish(&self, event: SessionEvent) {
        match event.to_envelope() {
            Ok(envelope) => {
                self.publish_envelope(envelope);
            }
            Err(e) => log::error!("[Bus] Failed to encode {} event: {}", event.topic(), e),
        }
    }

    /// Publish raw topic/payload pairs; returns the sequence number assigned
    pub fn publish_envelope(&self, mut envelope: EventEnvelope) -> u64 {
        envelope.sequence = self.inner.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let sequence = envelope.sequence;
        log::debug!("[Bus] #{} {}", sequence, envelope.topic);
        // No subscribers is not an error for fire-and-forget delivery.
        let _ = self.inner.sender.send(envelope);
        sequence
    }

    pub fn notify(&self, notice: Notice) {
        self.publish(SessionEvent::Notify(notice));
    }

    /// Subscribe to the listed topics; dropping the subscription deregisters it
    pub fn subscribe(&self, topics: &[&'static str]) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
            topics: topics.to_vec(),
        }
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&[])
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<EventEnvelope>,
    topics: Vec<&'static str>,
}

impl Subscription {
    /// Next envelope on a subscribed topic; `None` once the bus is gone
    pub async fn recv_envelope(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => {
                    if self.topics.is_empty() || self.topics.contains(&envelope.topic.as_str()) {
                        return Some(envelope);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("[Bus] Subscriber lagged, {} event(s) dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next decodable event; envelopes that do not decode are skipped
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            let envelope = self.recv_envelope().await?;
            match SessionEvent::from_envelope(&envelope) {
                Ok(event) => return Some(event),
                Err(e) => log::warn!("[Bus] Dropping undecodable {} event: {}", envelope.topic, e),
            }
        }
    }

    /// Next event already buffered for this subscriber, without waiting
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            let envelope = match self.receiver.try_recv() {
                Ok(envelope) => envelope,
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("[Bus] Subscriber lagged, {} event(s) dropped", skipped);
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            };
            if !self.topics.is_empty() && !self.topics.contains(&envelope.topic.as_str()) {
                continue;
            }
            match SessionEvent::from_envelope(&envelope) {
                Ok(event) => return Some(event),
                Err(e) => log::warn!("[Bus] Dropping undecodable {} event: {}", envelope.topic, e),
            }
        }
    }
}
