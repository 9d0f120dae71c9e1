// Vault Desktop - Error Taxonomy
// Every failure the coordination core can surface to the user

use thiserror::Error;

use crate::window::WindowLabel;

/// A rejected request/response call to the backend engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct BackendError {
    pub operation: &'static str,
    pub message: String,
}

impl BackendError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Failures reported by the native windowing runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("window `{0}` does not exist")]
    NotFound(WindowLabel),
    #[error("window runtime rejected the request: {0}")]
    Rejected(String),
}

/// Failures of the persisted local settings store.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error(transparent)]
    BackendCallFailed(#[from] BackendError),

    #[error("failed to create window `{label}`: {reason}")]
    WindowCreationFailed { label: WindowLabel, reason: String },

    #[error("close negotiation incomplete, still open: {}", format_labels(.remaining))]
    CloseNegotiationIncomplete { remaining: Vec<WindowLabel> },

    #[error("save failed, changes are still unsaved: {0}")]
    SaveFailedDuringPrompt(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("settings store failed: {0}")]
    Settings(String),

    #[error("{0}")]
    Validation(String),

    #[error("an unsaved-changes prompt is already open")]
    PromptAlreadyOpen,

    #[error("no database session is unlocked")]
    NotUnlocked,

    #[error("window `{0}` is no longer running")]
    WindowGone(WindowLabel),
}

impl From<SettingsError> for CoordinatorError {
    fn from(err: SettingsError) -> Self {
        CoordinatorError::Settings(err.to_string())
    }
}

fn format_labels(labels: &[WindowLabel]) -> String {
    labels
        .iter()
        .map(|label| label.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
