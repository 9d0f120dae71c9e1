// Vault Desktop - Window Registry
// Deterministic window labels, per-kind window chrome, and create-or-focus

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::bus::Notice;
use crate::child_window::{ChildWindow, ChildWindowHandle};
use crate::coordinator::WindowContext;
use crate::error::{CoordinatorError, RuntimeError};

pub const MAIN_LABEL: &str = "main";
pub const SETTINGS_LABEL: &str = "settings";
pub const ABOUT_LABEL: &str = "about";
const ENTRY_LABEL_PREFIX: &str = "entry-";

/// Unique identity of a window, derived from its kind
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowLabel(String);

impl WindowLabel {
    pub fn main() -> Self {
        Self(MAIN_LABEL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_main(&self) -> bool {
        self.0 == MAIN_LABEL
    }
}

impl fmt::Display for WindowLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WindowLabel {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

impl From<String> for WindowLabel {
    fn from(label: String) -> Self {
        Self(label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WindowKind {
    Main,
    EntryEditor {
        #[serde(rename = "entryId")]
        entry_id: String,
    },
    Settings,
    About,
}

impl WindowKind {
    pub fn entry_editor(entry_id: impl Into<String>) -> Self {
        WindowKind::EntryEditor {
            entry_id: entry_id.into(),
        }
    }

    /// Pure function of kind (and entry id). Alphanumerics and hyphens are
    /// kept; every other byte is written as `_` plus two hex digits, so
    /// distinct ids never share a label.
    pub fn label(&self) -> WindowLabel {
        match self {
            WindowKind::Main => WindowLabel::main(),
            WindowKind::EntryEditor { entry_id } => {
                let mut label = String::from(ENTRY_LABEL_PREFIX);
                for byte in entry_id.bytes() {
                    if byte.is_ascii_alphanumeric() || byte == b'-' {
                        label.push(char::from(byte));
                    } else {
                        label.push_str(&format!("_{:02x}", byte));
                    }
                }
                WindowLabel(label)
            }
            WindowKind::Settings => WindowLabel(SETTINGS_LABEL.to_string()),
            WindowKind::About => WindowLabel(ABOUT_LABEL.to_string()),
        }
    }

    /// Fixed construction parameters for each kind
    pub fn chrome(&self) -> WindowChrome {
        match self {
            WindowKind::Main => WindowChrome {
                width: 1200.0,
                height: 800.0,
                resizable: true,
                decorated: false,
                modal: false,
            },
            WindowKind::EntryEditor { .. } => WindowChrome {
                width: 800.0,
                height: 600.0,
                resizable: true,
                decorated: true,
                modal: false,
            },
            WindowKind::Settings => WindowChrome {
                width: 640.0,
                height: 560.0,
                resizable: false,
                decorated: true,
                modal: false,
            },
            WindowKind::About => WindowChrome {
                width: 420.0,
                height: 360.0,
                resizable: false,
                decorated: true,
                modal: true,
            },
        }
    }

    fn default_title(&self) -> &'static str {
        match self {
            WindowKind::Main => "Vault",
            WindowKind::EntryEditor { .. } => "Entry Editor",
            WindowKind::Settings => "Settings",
            WindowKind::About => "About Vault",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct WindowChrome {
    pub width: f64,
    pub height: f64,
    pub resizable: bool,
    pub decorated: bool,
    pub modal: bool,
}

/// Caller-supplied parameters that travel to the new window through its target
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenParams {
    pub group_id: Option<String>,
    pub title: Option<String>,
}

/// Where a window loads from. Windows share no memory, so everything a window
/// needs to fetch its own data is encoded here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowTarget {
    pub kind: WindowKind,
    pub group_id: Option<String>,
}

impl WindowTarget {
    pub fn to_location(&self) -> String {
        match &self.kind {
            WindowKind::Main => "/".to_string(),
            WindowKind::EntryEditor { entry_id } => {
                let mut query = url::form_urlencoded::Serializer::new(String::new());
                query.append_pair("uuid", entry_id);
                if let Some(group_id) = &self.group_id {
                    query.append_pair("groupUuid", group_id);
                }
                format!("/entry?{}", query.finish())
            }
            WindowKind::Settings => "/settings".to_string(),
            WindowKind::About => "/about".to_string(),
        }
    }

    pub fn parse(location: &str) -> Option<Self> {
        let (path, query) = location.split_once('?').unwrap_or((location, ""));
        let mut entry_id = None;
        let mut group_id = None;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "uuid" => entry_id = Some(value.into_owned()),
                "groupUuid" => group_id = Some(value.into_owned()),
                _ => {}
            }
        }

        let kind = match path.trim_end_matches('/') {
            "" => WindowKind::Main,
            "/entry" => WindowKind::EntryEditor {
                entry_id: entry_id.filter(|id| !id.is_empty())?,
            },
            "/settings" => WindowKind::Settings,
            "/about" => WindowKind::About,
            _ => return None,
        };
        Some(Self { kind, group_id })
    }
}

/// Everything the runtime needs to construct a window
#[derive(Clone, Debug, PartialEq)]
pub struct WindowSpec {
    pub label: WindowLabel,
    pub title: String,
    pub location: String,
    pub chrome: WindowChrome,
}

impl WindowSpec {
    pub fn new(kind: &WindowKind, params: &OpenParams) -> Self {
        let target = WindowTarget {
            kind: kind.clone(),
            group_id: params.group_id.clone(),
        };
        let title = params
            .title
            .as_deref()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(kind.default_title())
            .to_string();
        Self {
            label: kind.label(),
            title,
            location: target.to_location(),
            chrome: kind.chrome(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    Creating,
    Open,
    CloseRequested,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WindowHandle {
    pub label: WindowLabel,
    pub kind: WindowKind,
    pub lifecycle: Lifecycle,
}

/// The native windowing runtime
#[async_trait]
pub trait WindowRuntime: Send + Sync {
    /// Labels of every live window, main included
    async fn live_labels(&self) -> Vec<WindowLabel>;
    async fn exists(&self, label: &WindowLabel) -> bool;
    /// Resolves once the runtime reports creation success or failure
    async fn create(&self, spec: &WindowSpec) -> Result<(), RuntimeError>;
    async fn focus(&self, label: &WindowLabel) -> Result<(), RuntimeError>;
    /// Forced close: the target window gets no chance to intervene
    async fn destroy(&self, label: &WindowLabel) -> Result<(), RuntimeError>;
    async fn hide(&self, label: &WindowLabel) -> Result<(), RuntimeError>;
    async fn set_title(&self, label: &WindowLabel, title: &str) -> Result<(), RuntimeError>;
}

#[derive(Debug)]
pub enum Opened {
    Created(WindowHandle),
    Focused(WindowHandle),
}

impl Opened {
    pub fn handle(&self) -> &WindowHandle {
        match self {
            Opened::Created(handle) | Opened::Focused(handle) => handle,
        }
    }
}

struct WindowEntry {
    handle: WindowHandle,
    child: Option<ChildWindowHandle>,
}

/// Sole owner of label uniqueness. Create-or-focus decisions are serialized
/// per label, so concurrent opens of one label yield a single window.
pub struct WindowRegistry {
    ctx: WindowContext,
    open_locks: Mutex<HashMap<WindowLabel, Arc<Mutex<()>>>>,
    windows: RwLock<HashMap<WindowLabel, WindowEntry>>,
}

impl WindowRegistry {
    pub fn new(ctx: WindowContext) -> Self {
        Self {
            ctx,
            open_locks: Mutex::new(HashMap::new()),
            windows: RwLock::new(HashMap::new()),
        }
    }

    pub async fn open_window(
        &self,
        kind: WindowKind,
        params: OpenParams,
    ) -> Result<Opened, CoordinatorError> {
        let label = kind.label();
        let lock = self.open_lock(&label).await;
        let _guard = lock.lock().await;

        if self.ctx.runtime.exists(&label).await {
            log::info!("[Registry] Window {} already open, focusing", label);
            if let Err(e) = self.ctx.runtime.focus(&label).await {
                log::warn!("[Registry] Failed to focus {}: {}", label, e);
            }
            let handle = self.known_handle(&label, &kind).await;
            return Ok(Opened::Focused(handle));
        }

        let spec = WindowSpec::new(&kind, &params);
        self.windows.write().await.insert(
            label.clone(),
            WindowEntry {
                handle: WindowHandle {
                    label: label.clone(),
                    kind: kind.clone(),
                    lifecycle: Lifecycle::Creating,
                },
                child: None,
            },
        );

        log::info!("[Registry] Creating window {} at {}", label, spec.location);
        if let Err(e) = self.ctx.runtime.create(&spec).await {
            self.windows.write().await.remove(&label);
            log::error!("[Registry] Failed to create window {}: {}", label, e);
            let err = CoordinatorError::WindowCreationFailed {
                label: label.clone(),
                reason: e.to_string(),
            };
            self.ctx
                .bus
                .notify(Notice::error(WindowLabel::main(), "Window Error", err.to_string()));
            return Err(err);
        }

        let child = ChildWindow::spawn(self.ctx.clone(), &spec);
        let handle = WindowHandle {
            label: label.clone(),
            kind,
            lifecycle: Lifecycle::Open,
        };
        self.windows.write().await.insert(
            label,
            WindowEntry {
                handle: handle.clone(),
                child,
            },
        );
        Ok(Opened::Created(handle))
    }

    /// Command channel of a running child window
    pub async fn child(&self, label: &WindowLabel) -> Option<ChildWindowHandle> {
        let windows = self.windows.read().await;
        windows
            .get(label)
            .and_then(|entry| entry.child.clone())
            .filter(|child| !child.is_finished())
    }

    pub async fn handle(&self, label: &WindowLabel) -> Option<WindowHandle> {
        self.prune().await;
        let windows = self.windows.read().await;
        windows.get(label).map(|entry| entry.handle.clone())
    }

    pub async fn set_lifecycle(&self, label: &WindowLabel, lifecycle: Lifecycle) {
        if let Some(entry) = self.windows.write().await.get_mut(label) {
            entry.handle.lifecycle = lifecycle;
        }
    }

    /// Every live window except main, as the runtime reports them
    pub async fn live_children(&self) -> Vec<WindowLabel> {
        let mut labels: Vec<WindowLabel> = self
            .ctx
            .runtime
            .live_labels()
            .await
            .into_iter()
            .filter(|label| !label.is_main())
            .collect();
        labels.sort();
        labels
    }

    /// Drop a window the runtime destroyed; its actor stops once its channel closes
    pub async fn forget(&self, label: &WindowLabel) {
        if self.windows.write().await.remove(label).is_some() {
            log::debug!("[Registry] Forgot window {}", label);
        }
        // An open in flight still holds its clone and keeps the entry
        let mut locks = self.open_locks.lock().await;
        if locks.get(label).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(label);
        }
    }

    async fn prune(&self) {
        let mut windows = self.windows.write().await;
        windows.retain(|_, entry| {
            entry.handle.lifecycle == Lifecycle::Creating
                || entry.child.as_ref().is_some_and(|child| !child.is_finished())
        });
    }

    async fn known_handle(&self, label: &WindowLabel, kind: &WindowKind) -> WindowHandle {
        let windows = self.windows.read().await;
        match windows.get(label) {
            Some(entry) => entry.handle.clone(),
            None => WindowHandle {
                label: label.clone(),
                kind: kind.clone(),
                lifecycle: Lifecycle::Open,
            },
        }
    }

    async fn open_lock(&self, label: &WindowLabel) -> Arc<Mutex<()>> {
        let mut locks = self.open_locks.lock().await;
        locks.entry(label.clone()).or_default().clone()
    }
}
