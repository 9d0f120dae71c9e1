// Vault Desktop - Unsaved-Changes Prompt
// Three-way gate (Cancel / Discard / Save) in front of destructive actions

use serde::{Deserialize, Serialize};

use crate::bus::SessionEvent;
use crate::error::CoordinatorError;
use crate::window::WindowLabel;

/// The destructive action waiting behind the prompt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PendingAction {
    Logout,
    CloseWindow,
    BackendOptionReload,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptDecision {
    Cancel,
    Discard,
    Save,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptState {
    Hidden,
    Shown(PendingAction),
    /// Save chosen, waiting for the backend to confirm
    Saving(PendingAction),
}

/// What the owner of the prompt must do next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Abort the triggering action entirely
    Abort(PendingAction),
    /// Drop unsaved state without persisting, then resume
    Discard(PendingAction),
    /// Persist first; resume only if the save is confirmed
    SaveThenProceed(PendingAction),
}

#[derive(Debug)]
pub struct UnsavedPrompt {
    state: PromptState,
}

impl Default for UnsavedPrompt {
    fn default() -> Self {
        Self {
            state: PromptState::Hidden,
        }
    }
}

impl UnsavedPrompt {
    pub fn state(&self) -> PromptState {
        self.state
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self.state, PromptState::Hidden)
    }

    pub fn show(&mut self, action: PendingAction) -> Result<(), CoordinatorError> {
        match self.state {
            PromptState::Hidden => {
                self.state = PromptState::Shown(action);
                Ok(())
            }
            _ => Err(CoordinatorError::PromptAlreadyOpen),
        }
    }

    /// Apply the user's answer. Returns `None` when no prompt is waiting for one.
    pub fn resolve(&mut self, decision: PromptDecision) -> Option<Resolution> {
        let PromptState::Shown(action) = self.state else {
            return None;
        };
        let resolution = match decision {
            PromptDecision::Cancel => {
                self.state = PromptState::Hidden;
                Resolution::Abort(action)
            }
            PromptDecision::Discard => {
                self.state = PromptState::Hidden;
                Resolution::Discard(action)
            }
            PromptDecision::Save => {
                self.state = PromptState::Saving(action);
                Resolution::SaveThenProceed(action)
            }
        };
        Some(resolution)
    }

    /// Backend confirmed the save: the prompt goes away
    pub fn save_succeeded(&mut self) {
        if let PromptState::Saving(_) = self.state {
            self.state = PromptState::Hidden;
        }
    }

    /// Save failed: the prompt stays up with the same pending action
    pub fn save_failed(&mut self) {
        if let PromptState::Saving(action) = self.state {
            self.state = PromptState::Shown(action);
        }
    }

    /// Hide without an answer (session terminated underneath the prompt)
    pub fn dismiss(&mut self) -> Option<PendingAction> {
        let action = match self.state {
            PromptState::Hidden => None,
            PromptState::Shown(action) | PromptState::Saving(action) => Some(action),
        };
        self.state = PromptState::Hidden;
        action
    }

    pub fn event(&self, target: WindowLabel) -> SessionEvent {
        let action = match self.state {
            PromptState::Shown(action) | PromptState::Saving(action) => Some(action),
            PromptState::Hidden => None,
        };
        SessionEvent::UnsavedPrompt {
            target,
            visible: action.is_some(),
            action,
        }
    }
}
