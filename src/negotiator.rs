// Vault Desktop - Close Negotiator
// Cooperative shutdown of every child window before the session is torn down

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};

use crate::bus::{topics, EventBus, SessionEvent, Subscription};
use crate::window::{Lifecycle, WindowLabel, WindowRegistry, WindowRuntime};

/// Why a shutdown is being attempted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseInitiator {
    ManualLogout,
    WindowClose,
    AutoLock,
    BackendOptionReload,
}

impl CloseInitiator {
    pub fn is_manual_logout(self) -> bool {
        matches!(self, CloseInitiator::ManualLogout)
    }
}

/// A child's definitive answer to a close request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseOutcome {
    Closed,
    Cancelled,
}

/// Exists only while one shutdown attempt is running
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseNegotiation {
    pub initiator: CloseInitiator,
    pub pending_children: BTreeSet<WindowLabel>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    Requesting,
    Settling,
    Completed,
    Incomplete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NegotiationOutcome {
    Completed,
    Incomplete {
        remaining: Vec<WindowLabel>,
        cancelled_by: Vec<WindowLabel>,
    },
}

impl NegotiationOutcome {
    pub fn all_closed(&self) -> bool {
        matches!(self, NegotiationOutcome::Completed)
    }
}

/// Owned by the main window. Every negotiation takes `&mut self`, so two can
/// never be in flight at once.
pub struct CloseNegotiator {
    registry: Arc<WindowRegistry>,
    runtime: Arc<dyn WindowRuntime>,
    bus: EventBus,
    ack_timeout: Duration,
    settle_interval: Duration,
    state: NegotiationState,
}

impl CloseNegotiator {
    pub fn new(
        registry: Arc<WindowRegistry>,
        runtime: Arc<dyn WindowRuntime>,
        bus: EventBus,
        ack_timeout: Duration,
        settle_interval: Duration,
    ) -> Self {
        Self {
            registry,
            runtime,
            bus,
            ack_timeout,
            settle_interval,
            state: NegotiationState::Idle,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Ask every child to close, letting each one prompt and possibly refuse.
    /// `Completed` only when no child is left alive afterwards.
    pub async fn request_close_all(&mut self, initiator: CloseInitiator) -> NegotiationOutcome {
        self.state = NegotiationState::Requesting;
        let children = self.registry.live_children().await;
        if children.is_empty() {
            self.state = NegotiationState::Completed;
            return NegotiationOutcome::Completed;
        }

        log::info!(
            "[Negotiator] {:?}: requesting close of {} window(s)",
            initiator,
            children.len()
        );
        let mut negotiation = CloseNegotiation {
            initiator,
            pending_children: children.iter().cloned().collect(),
        };
        let mut acks = self.bus.subscribe(&[topics::WINDOW_CLOSE_ACK]);
        self.publish_requests(&children, initiator, false).await;

        let cancelled_by = self.await_acks(&mut negotiation, &mut acks).await;

        self.state = NegotiationState::Settling;
        tokio::time::sleep(self.settle_interval).await;
        let remaining = self.registry.live_children().await;
        for label in &remaining {
            self.registry.set_lifecycle(label, Lifecycle::Open).await;
        }

        if remaining.is_empty() {
            log::info!("[Negotiator] All child windows closed");
            self.state = NegotiationState::Completed;
            NegotiationOutcome::Completed
        } else {
            log::info!(
                "[Negotiator] Close aborted, still open: {:?}, cancelled by: {:?}",
                remaining,
                cancelled_by
            );
            self.state = NegotiationState::Incomplete;
            NegotiationOutcome::Incomplete {
                remaining,
                cancelled_by,
            }
        }
    }

    /// Close every child without prompting. Only for callers that already
    /// hold consent; survivors are destroyed through the runtime.
    pub async fn force_close_all(&mut self, initiator: CloseInitiator) -> NegotiationOutcome {
        self.state = NegotiationState::Requesting;
        let children = self.registry.live_children().await;
        if children.is_empty() {
            self.state = NegotiationState::Completed;
            return NegotiationOutcome::Completed;
        }

        log::info!(
            "[Negotiator] {:?}: force-closing {} window(s)",
            initiator,
            children.len()
        );
        let mut negotiation = CloseNegotiation {
            initiator,
            pending_children: children.iter().cloned().collect(),
        };
        let mut acks = self.bus.subscribe(&[topics::WINDOW_CLOSE_ACK]);
        self.publish_requests(&children, initiator, true).await;
        self.await_acks(&mut negotiation, &mut acks).await;

        self.state = NegotiationState::Settling;
        tokio::time::sleep(self.settle_interval).await;
        for label in self.registry.live_children().await {
            log::warn!("[Negotiator] {} did not close, destroying it", label);
            if let Err(e) = self.runtime.destroy(&label).await {
                log::error!("[Negotiator] Failed to destroy {}: {}", label, e);
            }
            self.registry.forget(&label).await;
        }

        let remaining = self.registry.live_children().await;
        if remaining.is_empty() {
            self.state = NegotiationState::Completed;
            NegotiationOutcome::Completed
        } else {
            self.state = NegotiationState::Incomplete;
            NegotiationOutcome::Incomplete {
                remaining,
                cancelled_by: Vec::new(),
            }
        }
    }

    async fn publish_requests(&self, children: &[WindowLabel], initiator: CloseInitiator, force: bool) {
        for label in children {
            self.registry
                .set_lifecycle(label, Lifecycle::CloseRequested)
                .await;
            self.bus.publish(SessionEvent::CloseRequested {
                label: label.clone(),
                initiator: Some(initiator),
                force,
            });
        }
    }

    /// Collect acknowledgments until every child answered, one refused, or
    /// the timeout ran out. Returns the children that refused.
    async fn await_acks(
        &self,
        negotiation: &mut CloseNegotiation,
        acks: &mut Subscription,
    ) -> Vec<WindowLabel> {
        let deadline = Instant::now() + self.ack_timeout;
        let mut cancelled_by = Vec::new();

        while !negotiation.pending_children.is_empty() {
            match timeout_at(deadline, acks.recv()).await {
                Ok(Some(SessionEvent::CloseAck { label, outcome })) => {
                    if !negotiation.pending_children.remove(&label) {
                        continue;
                    }
                    match outcome {
                        CloseOutcome::Closed => {
                            log::debug!("[Negotiator] {} closed", label);
                            self.registry.forget(&label).await;
                        }
                        CloseOutcome::Cancelled => {
                            log::info!("[Negotiator] {} cancelled the close", label);
                            cancelled_by.push(label);
                            break;
                        }
                    }
                }
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "[Negotiator] Timed out after {:?} waiting for {:?}",
                        self.ack_timeout,
                        negotiation.pending_children
                    );
                    break;
                }
            }
        }
        cancelled_by
    }
}
