// Vault Desktop - Child Windows
// Actor per editor/settings/about window: owns its state, answers close requests

use std::ops::ControlFlow;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::backend::{EntryData, PasswordOptions, VaultBackend};
use crate::bus::{topics, BackendOption, Notice, SessionEvent, Subscription};
use crate::config::{keys, sanitize_seconds};
use crate::coordinator::WindowContext;
use crate::dirty::{persist_entry, DirtyFlag};
use crate::editor::{DraftField, EntryDraft};
use crate::error::{BackendError, CoordinatorError};
use crate::negotiator::CloseOutcome;
use crate::prompt::{PendingAction, PromptDecision, Resolution, UnsavedPrompt};
use crate::window::{WindowKind, WindowLabel, WindowSpec, WindowTarget};

const COMMAND_BUFFER: usize = 32;

/// Requests a child window's webview can make
#[derive(Clone, Debug, PartialEq)]
pub enum ChildCommand {
    Edit { field: DraftField, value: String },
    GeneratePassword { strength: String },
    Save,
    Delete,
    ResolvePrompt(PromptDecision),
    SetOption { option: BackendOption, value: Value },
}

impl ChildCommand {
    pub fn edit(field: DraftField, value: impl Into<String>) -> Self {
        ChildCommand::Edit {
            field,
            value: value.into(),
        }
    }
}

/// Read-only view of a child window's state
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildSnapshot {
    pub label: WindowLabel,
    pub dirty: bool,
    pub prompt_visible: bool,
    pub entry: Option<EntryData>,
    pub draft: Option<EntryDraft>,
}

enum Message {
    Command {
        command: ChildCommand,
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Snapshot(oneshot::Sender<ChildSnapshot>),
}

/// Sending side of a child window's command channel
#[derive(Clone, Debug)]
pub struct ChildWindowHandle {
    label: WindowLabel,
    sender: mpsc::Sender<Message>,
}

impl ChildWindowHandle {
    pub fn label(&self) -> &WindowLabel {
        &self.label
    }

    /// The actor has stopped (its window closed)
    pub fn is_finished(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn send(&self, command: ChildCommand) -> Result<(), CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Message::Command { command, reply })
            .await
            .map_err(|_| CoordinatorError::WindowGone(self.label.clone()))?;
        response
            .await
            .map_err(|_| CoordinatorError::WindowGone(self.label.clone()))?
    }

    pub async fn snapshot(&self) -> Result<ChildSnapshot, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Message::Snapshot(reply))
            .await
            .map_err(|_| CoordinatorError::WindowGone(self.label.clone()))?;
        response
            .await
            .map_err(|_| CoordinatorError::WindowGone(self.label.clone()))
    }

    /// Resolves once the window finished loading its own data
    pub async fn wait_loaded(&self) -> Result<(), CoordinatorError> {
        self.snapshot().await.map(|_| ())
    }
}

struct EditorState {
    entry_id: String,
    group_id: Option<String>,
    loaded: Option<EntryData>,
    draft: EntryDraft,
}

enum Role {
    Editor(EditorState),
    Settings,
    About,
}

pub struct ChildWindow {
    ctx: WindowContext,
    label: WindowLabel,
    role: Role,
    flag: DirtyFlag,
    prompt: UnsavedPrompt,
}

impl ChildWindow {
    /// Start the actor for a freshly created window. The window learns what
    /// it shows only from its location. Returns `None` for the main window or
    /// a location no child understands.
    pub fn spawn(ctx: WindowContext, spec: &WindowSpec) -> Option<ChildWindowHandle> {
        let target = WindowTarget::parse(&spec.location)?;
        let role = match target.kind {
            WindowKind::Main => return None,
            WindowKind::EntryEditor { entry_id } => Role::Editor(EditorState {
                entry_id,
                group_id: target.group_id,
                loaded: None,
                draft: EntryDraft::default(),
            }),
            WindowKind::Settings => Role::Settings,
            WindowKind::About => Role::About,
        };

        // Subscribe before returning so no request published after the open
        // can be missed.
        let events = ctx.bus.subscribe(&[topics::WINDOW_CLOSE_REQUESTED]);
        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let window = ChildWindow {
            ctx,
            label: spec.label.clone(),
            role,
            flag: DirtyFlag::default(),
            prompt: UnsavedPrompt::default(),
        };
        tokio::spawn(window.run(commands, events));

        Some(ChildWindowHandle {
            label: spec.label.clone(),
            sender,
        })
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Message>, mut events: Subscription) {
        self.load().await;
        loop {
            let flow = tokio::select! {
                message = commands.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => ControlFlow::Break(()),
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => ControlFlow::Break(()),
                },
            };
            if flow.is_break() {
                break;
            }
        }
        log::debug!("[Window] {} stopped", self.label);
    }

    async fn load(&mut self) {
        let Role::Editor(editor) = &mut self.role else {
            return;
        };
        match load_entry(self.ctx.backend.as_ref(), &editor.entry_id, editor.group_id.as_deref()).await {
            Ok(Some(entry)) => {
                log::info!("[Editor] Loaded entry {}", editor.entry_id);
                editor.draft = EntryDraft::from_entry(&entry);
                editor.loaded = Some(entry);
            }
            Ok(None) => {
                log::warn!("[Editor] Entry {} not found", editor.entry_id);
                self.ctx.bus.notify(Notice::error(
                    self.label.clone(),
                    "Error",
                    "Entry not found",
                ));
            }
            Err(e) => {
                log::error!("[Editor] Failed to load entry {}: {}", editor.entry_id, e);
                self.ctx
                    .bus
                    .notify(Notice::error(self.label.clone(), "Error", e.to_string()));
            }
        }
    }

    async fn handle_message(&mut self, message: Message) -> ControlFlow<()> {
        match message {
            Message::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                ControlFlow::Continue(())
            }
            Message::Command { command, reply } => {
                let (result, flow) = self.handle_command(command).await;
                if let Err(e) = &result {
                    log::warn!("[Window] {}: {}", self.label, e);
                }
                let _ = reply.send(result);
                flow
            }
        }
    }

    async fn handle_command(
        &mut self,
        command: ChildCommand,
    ) -> (Result<(), CoordinatorError>, ControlFlow<()>) {
        let keep_going = ControlFlow::Continue(());
        match command {
            ChildCommand::Edit { field, value } => (self.edit(field, &value), keep_going),
            ChildCommand::GeneratePassword { strength } => {
                (self.generate_password(&strength).await, keep_going)
            }
            ChildCommand::Save => (self.save_entry().await, keep_going),
            ChildCommand::Delete => self.delete_entry().await,
            ChildCommand::ResolvePrompt(decision) => self.resolve_prompt(decision).await,
            ChildCommand::SetOption { option, value } => self.set_option(option, value).await,
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) -> ControlFlow<()> {
        match event {
            SessionEvent::CloseRequested { label, force, .. } if label == self.label => {
                self.close_requested(force).await
            }
            _ => ControlFlow::Continue(()),
        }
    }

    // ========================================================================
    // Close handling
    // ========================================================================

    async fn close_requested(&mut self, force: bool) -> ControlFlow<()> {
        if force {
            if self.flag.discard() {
                log::warn!("[Window] {} force-closed with unsaved changes", self.label);
            }
            self.prompt.dismiss();
            return self.close_self().await;
        }
        if !self.flag.is_dirty() {
            return self.close_self().await;
        }
        // Already asking: the pending answer settles this request too.
        if self.prompt.show(PendingAction::CloseWindow).is_ok() {
            log::info!("[Window] {} has unsaved changes, asking", self.label);
            self.publish_prompt();
        }
        ControlFlow::Continue(())
    }

    async fn resolve_prompt(
        &mut self,
        decision: PromptDecision,
    ) -> (Result<(), CoordinatorError>, ControlFlow<()>) {
        let Some(resolution) = self.prompt.resolve(decision) else {
            return (Ok(()), ControlFlow::Continue(()));
        };
        match resolution {
            Resolution::Abort(_) => {
                self.publish_prompt();
                self.ack(CloseOutcome::Cancelled);
                (Ok(()), ControlFlow::Continue(()))
            }
            Resolution::Discard(_) => {
                self.flag.discard();
                self.publish_prompt();
                (Ok(()), self.close_self().await)
            }
            Resolution::SaveThenProceed(_) => match self.save_entry().await {
                Ok(()) => {
                    self.prompt.save_succeeded();
                    self.publish_prompt();
                    (Ok(()), self.close_self().await)
                }
                Err(e) => {
                    self.prompt.save_failed();
                    self.publish_prompt();
                    (
                        Err(CoordinatorError::SaveFailedDuringPrompt(e.to_string())),
                        ControlFlow::Continue(()),
                    )
                }
            },
        }
    }

    /// Destroy this window and report it closed. A runtime refusal leaves the
    /// window running and answers `Cancelled`.
    async fn close_self(&mut self) -> ControlFlow<()> {
        if let Err(e) = self.ctx.runtime.destroy(&self.label).await {
            log::error!("[Window] Failed to close {}: {}", self.label, e);
            self.ack(CloseOutcome::Cancelled);
            return ControlFlow::Continue(());
        }
        log::info!("[Window] {} closed", self.label);
        self.ack(CloseOutcome::Closed);
        ControlFlow::Break(())
    }

    fn ack(&self, outcome: CloseOutcome) {
        self.ctx.bus.publish(SessionEvent::CloseAck {
            label: self.label.clone(),
            outcome,
        });
    }

    fn publish_prompt(&self) {
        self.ctx.bus.publish(self.prompt.event(self.label.clone()));
    }

    fn publish_dirty(&self) {
        self.ctx.bus.publish(SessionEvent::DirtyChanged {
            target: self.label.clone(),
            dirty: self.flag.is_dirty(),
        });
    }

    // ========================================================================
    // Entry editor
    // ========================================================================

    fn editor(&mut self) -> Result<(&mut EditorState, &mut DirtyFlag), CoordinatorError> {
        match &mut self.role {
            Role::Editor(editor) => Ok((editor, &mut self.flag)),
            _ => Err(CoordinatorError::Validation(format!(
                "{} is not an entry editor",
                self.label
            ))),
        }
    }

    fn edit(&mut self, field: DraftField, value: &str) -> Result<(), CoordinatorError> {
        let (editor, flag) = self.editor()?;
        let loaded = editor
            .loaded
            .as_ref()
            .ok_or_else(|| CoordinatorError::Validation("entry is not loaded".to_string()))?;
        editor.draft.set(field, value)?;
        if editor.draft.differs_from(loaded) && flag.mark_dirty() {
            self.publish_dirty();
        }
        Ok(())
    }

    async fn generate_password(&mut self, strength: &str) -> Result<(), CoordinatorError> {
        let options = PasswordOptions::preset(strength).ok_or_else(|| {
            CoordinatorError::Validation(format!("unknown password strength: {}", strength))
        })?;
        let length = options.length;
        let backend = self.ctx.backend.clone();
        self.editor()?;

        let password = match backend.generate_password(options).await {
            Ok(password) => password,
            Err(e) => return Err(self.surface(e, "Failed to generate password")),
        };
        let (editor, flag) = self.editor()?;
        editor.draft.set_generated_password(password);
        if flag.mark_dirty() {
            self.publish_dirty();
        }
        self.ctx.bus.notify(Notice::success(
            self.label.clone(),
            "Password generated",
            format!("Generated {} password ({} characters)", strength, length),
        ));
        Ok(())
    }

    /// Persist the draft. The flag clears only on the backend's confirmation.
    async fn save_entry(&mut self) -> Result<(), CoordinatorError> {
        let backend = self.ctx.backend.clone();
        let (editor, _) = self.editor()?;
        let loaded = editor
            .loaded
            .as_ref()
            .ok_or_else(|| CoordinatorError::Validation("entry is not loaded".to_string()))?;
        let validated = editor.draft.validate().map(|()| editor.draft.apply_to(loaded));
        let entry = match validated {
            Ok(entry) => entry,
            Err(e) => {
                self.ctx
                    .bus
                    .notify(Notice::error(self.label.clone(), "Invalid entry", e.to_string()));
                return Err(e);
            }
        };

        let receipt = match persist_entry(backend.as_ref(), &entry).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.surface(e, "Failed to update entry")),
        };

        let (editor, flag) = self.editor()?;
        flag.clear_dirty(receipt);
        editor.draft = EntryDraft::from_entry(&entry);
        editor.loaded = Some(entry);
        let entry_id = editor.entry_id.clone();
        log::info!("[Editor] Saved entry {}", entry_id);

        self.ctx.bus.publish(SessionEvent::EntryUpdated { entry_id });
        self.publish_dirty();
        self.ctx.bus.notify(Notice::success(
            self.label.clone(),
            "Success",
            "Entry updated successfully",
        ));
        Ok(())
    }

    async fn delete_entry(&mut self) -> (Result<(), CoordinatorError>, ControlFlow<()>) {
        let backend = self.ctx.backend.clone();
        let entry_id = match self.editor() {
            Ok((editor, _)) => editor.entry_id.clone(),
            Err(e) => return (Err(e), ControlFlow::Continue(())),
        };
        if let Err(e) = backend.delete_entry(&entry_id).await {
            return (
                Err(self.surface(e, "Failed to delete entry")),
                ControlFlow::Continue(()),
            );
        }
        log::info!("[Editor] Deleted entry {}", entry_id);
        self.ctx.bus.publish(SessionEvent::EntryDeleted { entry_id });
        // The entry is gone; there is nothing left to save.
        self.flag.discard();
        self.prompt.dismiss();
        (Ok(()), self.close_self().await)
    }

    fn surface(&self, err: BackendError, title: &str) -> CoordinatorError {
        log::error!("[Editor] {}: {}", title, err);
        self.ctx
            .bus
            .notify(Notice::error(self.label.clone(), title, err.message.clone()));
        CoordinatorError::BackendCallFailed(err)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    async fn set_option(
        &mut self,
        option: BackendOption,
        value: Value,
    ) -> (Result<(), CoordinatorError>, ControlFlow<()>) {
        if !matches!(self.role, Role::Settings) {
            return (
                Err(CoordinatorError::Validation(format!(
                    "{} cannot change settings",
                    self.label
                ))),
                ControlFlow::Continue(()),
            );
        }
        let (key, stored, value) = match normalize_option(option, &value) {
            Ok(normalized) => normalized,
            Err(e) => return (Err(e), ControlFlow::Continue(())),
        };
        if let Err(e) = self.ctx.settings.set(key, &stored) {
            log::error!("[Settings] Failed to store {}: {}", key, e);
            self.ctx.bus.notify(Notice::error(
                self.label.clone(),
                "Error",
                "Failed to save settings",
            ));
            return (Err(e.into()), ControlFlow::Continue(()));
        }
        log::info!("[Settings] {} = {}", key, stored);

        // A reload shuts the session down; this window goes first so the
        // shutdown does not have to wait on it.
        let flow = if option.requires_reload() {
            self.close_self().await
        } else {
            ControlFlow::Continue(())
        };
        self.ctx
            .bus
            .publish(SessionEvent::BackendOptionChanged { option, value });
        (Ok(()), flow)
    }

    fn snapshot(&self) -> ChildSnapshot {
        let (entry, draft) = match &self.role {
            Role::Editor(editor) => (editor.loaded.clone(), Some(editor.draft.clone())),
            Role::Settings | Role::About => (None, None),
        };
        ChildSnapshot {
            label: self.label.clone(),
            dirty: self.flag.is_dirty(),
            prompt_visible: self.prompt.is_visible(),
            entry,
            draft,
        }
    }
}

/// With a group the entry is picked from that group's listing, otherwise it
/// is fetched by id
async fn load_entry(
    backend: &dyn VaultBackend,
    entry_id: &str,
    group_id: Option<&str>,
) -> Result<Option<EntryData>, BackendError> {
    match group_id {
        Some(group_id) => Ok(backend
            .list_entries(group_id)
            .await?
            .into_iter()
            .find(|entry| entry.uuid == entry_id)),
        None => backend.get_entry(entry_id).await.map(Some),
    }
}

/// Store key, stored string and the normalized value to broadcast
fn normalize_option(
    option: BackendOption,
    value: &Value,
) -> Result<(&'static str, String, Value), CoordinatorError> {
    let flag = |key: &'static str| match value {
        Value::Bool(enabled) => Ok((key, enabled.to_string(), Value::Bool(*enabled))),
        other => Err(CoordinatorError::Validation(format!(
            "{} expects true or false, got {}",
            key, other
        ))),
    };
    match option {
        BackendOption::AutoLockSeconds => {
            let raw = match value {
                Value::String(raw) => raw.clone(),
                Value::Number(number) => number.to_string(),
                other => {
                    return Err(CoordinatorError::Validation(format!(
                        "{} expects seconds, got {}",
                        keys::AUTO_LOCK_SECONDS,
                        other
                    )))
                }
            };
            let digits = sanitize_seconds(&raw);
            let stored = if digits.is_empty() { "0".to_string() } else { digits };
            Ok((keys::AUTO_LOCK_SECONDS, stored.clone(), Value::String(stored)))
        }
        BackendOption::CloseToTray => flag(keys::CLOSE_TO_TRAY),
        BackendOption::LiveUpdates => flag(keys::LIVE_UPDATES),
        BackendOption::BreachCheck => flag(keys::BREACH_CHECK),
    }
}
