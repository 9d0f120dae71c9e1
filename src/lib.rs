// Vault Desktop - Library Root
// Multi-window session coordination for the desktop vault

pub mod backend;
pub mod bus;
pub mod child_window;
pub mod config;
pub mod coordinator;
pub mod dirty;
pub mod editor;
pub mod error;
pub mod inactivity;
pub mod main_window;
pub mod negotiator;
pub mod prompt;
pub mod window;

#[cfg(feature = "desktop")]
mod desktop;

#[cfg(test)]
mod test_support;

pub use bus::{EventBus, EventEnvelope, SessionEvent};
pub use coordinator::{Coordinator, WindowContext};
pub use error::CoordinatorError;
pub use main_window::{ActionStatus, MainWindowHandle};
pub use window::{WindowKind, WindowLabel};

#[cfg(feature = "desktop")]
pub use desktop::run;
