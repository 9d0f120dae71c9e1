// Vault Desktop - Main Window
// Sole owner of the session, the aggregate dirty flag and the activity clock

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

use crate::backend::GroupData;
use crate::bus::{topics, Notice, SessionEvent, Subscription};
use crate::config::{keys, AppSettings};
use crate::coordinator::WindowContext;
use crate::dirty::{DirtyFlag, SaveCoordinator, SaveError};
use crate::error::CoordinatorError;
use crate::inactivity::{ActivitySignal, InactivityMonitor};
use crate::negotiator::{CloseInitiator, CloseNegotiator, NegotiationOutcome};
use crate::prompt::{PendingAction, PromptDecision, PromptState, Resolution, UnsavedPrompt};
use crate::window::{
    Lifecycle, OpenParams, Opened, WindowHandle, WindowKind, WindowLabel, WindowRegistry,
};

const COMMAND_BUFFER: usize = 64;
const APP_TITLE: &str = "Vault";

/// How a destructive action ended up
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    /// The action ran to completion
    Completed,
    /// Unsaved changes: the prompt is up and the action waits for an answer
    AwaitingDecision,
    /// The user cancelled at the prompt
    Aborted,
    /// The main window went to the tray; the session is still open
    HiddenToTray,
    /// The session ended and the main window was destroyed
    MainClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Merge the on-disk changes, then save the merged database
    Synchronize,
    /// Save over the on-disk changes
    Overwrite,
    Cancel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MainSnapshot {
    pub unlocked: bool,
    pub database_path: Option<String>,
    pub dirty: bool,
    pub title: String,
    pub prompt: Option<PendingAction>,
    pub conflict_pending: bool,
    pub refresh_generation: u64,
    pub settings: AppSettings,
}

type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

enum MainMessage {
    Unlock {
        path: String,
        password: String,
        reply: Reply<GroupData>,
    },
    Save(Reply<()>),
    ResolveConflict(ConflictResolution, Reply<()>),
    MarkDirty(Reply<()>),
    DeleteEntries(Vec<String>, Reply<()>),
    Logout(Reply<ActionStatus>),
    RequestClose(Reply<ActionStatus>),
    Quit(Reply<ActionStatus>),
    ResolvePrompt(PromptDecision, Reply<ActionStatus>),
    OpenWindow {
        kind: WindowKind,
        params: OpenParams,
        reply: Reply<Opened>,
    },
    RecordActivity(ActivitySignal),
    Snapshot(oneshot::Sender<MainSnapshot>),
}

/// Typed front door to the main window actor
#[derive(Clone, Debug)]
pub struct MainWindowHandle {
    sender: mpsc::Sender<MainMessage>,
}

impl MainWindowHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> MainMessage,
    ) -> Result<T, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| CoordinatorError::WindowGone(WindowLabel::main()))?;
        response
            .await
            .map_err(|_| CoordinatorError::WindowGone(WindowLabel::main()))?
    }

    pub async fn unlock(&self, path: &str, password: &str) -> Result<GroupData, CoordinatorError> {
        self.request(|reply| MainMessage::Unlock {
            path: path.to_string(),
            password: password.to_string(),
            reply,
        })
        .await
    }

    pub async fn save(&self) -> Result<(), CoordinatorError> {
        self.request(MainMessage::Save).await
    }

    pub async fn resolve_conflict(&self, choice: ConflictResolution) -> Result<(), CoordinatorError> {
        self.request(|reply| MainMessage::ResolveConflict(choice, reply)).await
    }

    /// A mutation made directly in the main window (move, undo, ...)
    pub async fn mark_dirty(&self) -> Result<(), CoordinatorError> {
        self.request(MainMessage::MarkDirty).await
    }

    /// Delete from the entry list. Stops at the first failure; whatever was
    /// already deleted still marks the database dirty.
    pub async fn delete_entries(&self, entry_ids: Vec<String>) -> Result<(), CoordinatorError> {
        self.request(|reply| MainMessage::DeleteEntries(entry_ids, reply))
            .await
    }

    pub async fn logout(&self) -> Result<ActionStatus, CoordinatorError> {
        self.request(MainMessage::Logout).await
    }

    /// OS-level close of the main window
    pub async fn request_close(&self) -> Result<ActionStatus, CoordinatorError> {
        self.request(MainMessage::RequestClose).await
    }

    /// Close for good, even with close-to-tray on
    pub async fn quit(&self) -> Result<ActionStatus, CoordinatorError> {
        self.request(MainMessage::Quit).await
    }

    pub async fn resolve_prompt(&self, decision: PromptDecision) -> Result<ActionStatus, CoordinatorError> {
        self.request(|reply| MainMessage::ResolvePrompt(decision, reply)).await
    }

    pub async fn open_window(&self, kind: WindowKind, params: OpenParams) -> Result<Opened, CoordinatorError> {
        self.request(|reply| MainMessage::OpenWindow { kind, params, reply })
            .await
    }

    pub fn record_activity(&self, signal: ActivitySignal) {
        // Activity is sampled, so a full queue can drop a signal.
        let _ = self.sender.try_send(MainMessage::RecordActivity(signal));
    }

    pub async fn snapshot(&self) -> Result<MainSnapshot, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(MainMessage::Snapshot(reply))
            .await
            .map_err(|_| CoordinatorError::WindowGone(WindowLabel::main()))?;
        response
            .await
            .map_err(|_| CoordinatorError::WindowGone(WindowLabel::main()))
    }
}

enum Session {
    Locked,
    Unlocked { path: String },
}

/// How a shutdown went once every child window agreed to close
enum Shutdown {
    Ended,
    /// A child saved or deleted entries on its way out; the prompt is up again
    Regated,
}

pub struct MainWindow {
    ctx: WindowContext,
    registry: Arc<WindowRegistry>,
    negotiator: CloseNegotiator,
    saver: SaveCoordinator,
    flag: DirtyFlag,
    prompt: UnsavedPrompt,
    inactivity: InactivityMonitor,
    settings: AppSettings,
    session: Session,
    quitting: bool,
    conflict_pending: bool,
    generation: u64,
}

impl MainWindow {
    pub fn spawn(
        ctx: WindowContext,
        registry: Arc<WindowRegistry>,
        settings: AppSettings,
    ) -> MainWindowHandle {
        let events = ctx.bus.subscribe(&[
            topics::ENTRY_UPDATED,
            topics::ENTRY_DELETED,
            topics::BACKEND_OPTION_CHANGED,
        ]);
        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let negotiator = CloseNegotiator::new(
            registry.clone(),
            ctx.runtime.clone(),
            ctx.bus.clone(),
            ctx.config.close_ack_timeout,
            ctx.config.settle_interval,
        );
        let window = MainWindow {
            saver: SaveCoordinator::new(ctx.backend.clone()),
            inactivity: InactivityMonitor::new(settings.auto_lock_seconds, Instant::now()),
            ctx,
            registry,
            negotiator,
            flag: DirtyFlag::default(),
            prompt: UnsavedPrompt::default(),
            settings,
            session: Session::Locked,
            quitting: false,
            conflict_pending: false,
            generation: 0,
        };
        tokio::spawn(window.run(commands, events));
        MainWindowHandle { sender }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<MainMessage>, mut events: Subscription) {
        let mut activity_tick = interval(self.ctx.config.activity_poll_interval);
        activity_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sync_tick = interval(self.ctx.config.live_sync_interval);
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.sync_title().await;

        loop {
            tokio::select! {
                message = commands.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = activity_tick.tick() => {
                    if self.inactivity.poll(Instant::now()) {
                        self.auto_lock().await;
                    }
                }
                _ = sync_tick.tick() => self.live_sync().await,
            }
        }
        log::debug!("[Main] Stopped");
    }

    async fn handle_message(&mut self, message: MainMessage) {
        match message {
            MainMessage::Unlock {
                path,
                password,
                reply,
            } => {
                let _ = reply.send(self.unlock(path, &password).await);
            }
            MainMessage::Save(reply) => {
                let _ = reply.send(self.save().await);
            }
            MainMessage::ResolveConflict(choice, reply) => {
                let _ = reply.send(self.resolve_conflict(choice).await);
            }
            MainMessage::MarkDirty(reply) => {
                let result = self.require_unlocked();
                if result.is_ok() {
                    self.mark_dirty_and_refresh().await;
                }
                let _ = reply.send(result);
            }
            MainMessage::DeleteEntries(entry_ids, reply) => {
                let _ = reply.send(self.delete_entries(entry_ids).await);
            }
            MainMessage::Logout(reply) => {
                let _ = reply.send(self.begin(PendingAction::Logout).await);
            }
            MainMessage::RequestClose(reply) => {
                self.quitting = false;
                let _ = reply.send(self.begin(PendingAction::CloseWindow).await);
            }
            MainMessage::Quit(reply) => {
                self.quitting = true;
                let _ = reply.send(self.begin(PendingAction::CloseWindow).await);
            }
            MainMessage::ResolvePrompt(decision, reply) => {
                let _ = reply.send(self.resolve_prompt(decision).await);
            }
            MainMessage::OpenWindow {
                kind,
                params,
                reply,
            } => {
                let _ = reply.send(self.open_window(kind, params).await);
            }
            MainMessage::RecordActivity(signal) => {
                self.inactivity.record(signal, Instant::now());
            }
            MainMessage::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::EntryUpdated { entry_id } | SessionEvent::EntryDeleted { entry_id } => {
                if !self.is_unlocked() {
                    log::debug!("[Main] Ignoring change to {} while locked", entry_id);
                    return;
                }
                log::info!("[Main] Entry {} changed in another window", entry_id);
                self.mark_dirty_and_refresh().await;
            }
            SessionEvent::BackendOptionChanged { option, .. } => {
                self.reload_settings();
                if option.requires_reload() && self.is_unlocked() {
                    log::info!("[Main] {:?} changed, reloading the session", option);
                    if let Err(e) = self.begin(PendingAction::BackendOptionReload).await {
                        log::warn!("[Main] Session reload did not complete: {}", e);
                    }
                }
            }
            _ => {}
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    fn is_unlocked(&self) -> bool {
        matches!(self.session, Session::Unlocked { .. })
    }

    fn require_unlocked(&self) -> Result<(), CoordinatorError> {
        if self.is_unlocked() {
            Ok(())
        } else {
            Err(CoordinatorError::NotUnlocked)
        }
    }

    async fn unlock(&mut self, path: String, password: &str) -> Result<GroupData, CoordinatorError> {
        if self.is_unlocked() {
            return Err(CoordinatorError::Validation(
                "a database is already open".to_string(),
            ));
        }
        let groups = match self.ctx.backend.open_session(&path, password).await {
            Ok(groups) => groups,
            Err(e) => {
                log::error!("[Main] Failed to open {}: {}", path, e);
                self.ctx
                    .bus
                    .notify(Notice::error(WindowLabel::main(), "Unlock failed", e.message.clone()));
                return Err(e.into());
            }
        };

        log::info!("[Main] Unlocked {}", path);
        if let Err(e) = self.ctx.settings.set(keys::LAST_DATABASE_PATH, &path) {
            log::warn!("[Settings] Failed to remember {}: {}", path, e);
        }
        self.settings.last_database_path = Some(path.clone());
        self.session = Session::Unlocked { path };
        self.conflict_pending = false;
        self.inactivity.arm(Instant::now());
        self.sync_title().await;
        self.publish_refresh();
        Ok(groups)
    }

    /// Gate a destructive action behind the prompt when there is unsaved work
    async fn begin(&mut self, action: PendingAction) -> Result<ActionStatus, CoordinatorError> {
        if self.flag.is_dirty() {
            self.prompt.show(action)?;
            log::info!("[Main] Unsaved changes, asking before {:?}", action);
            self.publish_prompt();
            return Ok(ActionStatus::AwaitingDecision);
        }
        self.proceed(action).await
    }

    async fn resolve_prompt(&mut self, decision: PromptDecision) -> Result<ActionStatus, CoordinatorError> {
        let Some(resolution) = self.prompt.resolve(decision) else {
            return Err(CoordinatorError::Validation(
                "no unsaved-changes prompt is open".to_string(),
            ));
        };
        self.publish_prompt();
        match resolution {
            Resolution::Abort(action) => {
                log::info!("[Main] {:?} cancelled", action);
                self.quitting = false;
                Ok(ActionStatus::Aborted)
            }
            Resolution::Discard(action) => {
                // The flag drops with the session, so a refused close leaves it set
                log::info!("[Main] Discarding unsaved changes for {:?}", action);
                let status = self.proceed(action).await?;
                if status == ActionStatus::HiddenToTray {
                    self.flag.discard();
                    self.sync_title().await;
                }
                Ok(status)
            }
            Resolution::SaveThenProceed(action) => match self.saver.save(&mut self.flag).await {
                Ok(()) => {
                    self.prompt.save_succeeded();
                    self.publish_prompt();
                    self.sync_title().await;
                    self.proceed(action).await
                }
                Err(e) => {
                    self.prompt.save_failed();
                    self.publish_prompt();
                    self.surface_save_error(&e);
                    Err(CoordinatorError::SaveFailedDuringPrompt(e.to_string()))
                }
            },
        }
    }

    async fn proceed(&mut self, action: PendingAction) -> Result<ActionStatus, CoordinatorError> {
        let initiator = match action {
            PendingAction::Logout => CloseInitiator::ManualLogout,
            PendingAction::BackendOptionReload => CloseInitiator::BackendOptionReload,
            PendingAction::CloseWindow if self.settings.close_to_tray && !self.quitting => {
                self.ctx.runtime.hide(&WindowLabel::main()).await?;
                log::info!("[Main] Hidden to tray");
                return Ok(ActionStatus::HiddenToTray);
            }
            PendingAction::CloseWindow => CloseInitiator::WindowClose,
        };
        match self.terminate(action, initiator).await? {
            Shutdown::Regated => Ok(ActionStatus::AwaitingDecision),
            Shutdown::Ended if action == PendingAction::CloseWindow => {
                self.ctx.runtime.destroy(&WindowLabel::main()).await?;
                log::info!("[Main] Closed");
                Ok(ActionStatus::MainClosed)
            }
            Shutdown::Ended => Ok(ActionStatus::Completed),
        }
    }

    /// Close every child, then the backend session. Nothing is torn down
    /// unless every child actually closed and left the database as it was.
    async fn terminate(
        &mut self,
        action: PendingAction,
        initiator: CloseInitiator,
    ) -> Result<Shutdown, CoordinatorError> {
        if self.close_children(initiator).await? {
            log::info!("[Main] Entries changed while closing, asking again before {:?}", action);
            self.mark_dirty_and_refresh().await;
            self.prompt.show(action)?;
            self.publish_prompt();
            return Ok(Shutdown::Regated);
        }

        if self.is_unlocked() {
            if let Err(e) = self.ctx.backend.close_session().await {
                log::error!("[Main] Failed to close the database: {}", e);
                self.ctx
                    .bus
                    .notify(Notice::error(WindowLabel::main(), "Error", e.message.clone()));
                return Err(e.into());
            }
        }
        self.end_session(initiator).await;
        Ok(Shutdown::Ended)
    }

    /// Negotiate every child closed. `Ok(true)` when a child saved or deleted
    /// entries of the open session while closing.
    async fn close_children(&mut self, initiator: CloseInitiator) -> Result<bool, CoordinatorError> {
        let mut changes = self
            .ctx
            .bus
            .subscribe(&[topics::ENTRY_UPDATED, topics::ENTRY_DELETED]);
        let outcome = self.negotiator.request_close_all(initiator).await;
        if let NegotiationOutcome::Incomplete { remaining, .. } = outcome {
            let title = if initiator == CloseInitiator::AutoLock {
                "Auto-lock cancelled"
            } else {
                self.quitting = false;
                "Close cancelled"
            };
            self.ctx.bus.notify(Notice::info(
                WindowLabel::main(),
                title,
                "Some windows are still open",
            ));
            return Err(CoordinatorError::CloseNegotiationIncomplete { remaining });
        }

        // Children publish their changes before acking, so they are buffered by now
        let mut changed = false;
        while let Some(event) = changes.try_recv() {
            log::debug!("[Main] {} during close", event.topic());
            changed = true;
        }
        Ok(changed && self.is_unlocked())
    }

    /// Inactivity lock. Children are asked like any other close and the lock
    /// is abandoned if one of them stays open. The aggregate flag is dropped
    /// without asking.
    async fn auto_lock(&mut self) {
        if !self.is_unlocked() {
            return;
        }
        match self.close_children(CloseInitiator::AutoLock).await {
            Ok(false) => {}
            Ok(true) => {
                log::info!("[Main] Entries saved while auto-locking, staying unlocked");
                self.mark_dirty_and_refresh().await;
                self.inactivity.arm(Instant::now());
                return;
            }
            Err(e) => {
                log::warn!("[Main] Auto-lock abandoned: {}", e);
                self.inactivity.arm(Instant::now());
                return;
            }
        }
        if self.flag.is_dirty() {
            log::warn!("[Main] Auto-lock is discarding unsaved changes");
        }
        if self.prompt.dismiss().is_some() {
            self.publish_prompt();
        }
        if let Err(e) = self.ctx.backend.close_session().await {
            // The session is locked locally regardless.
            log::error!("[Main] Failed to close the database on auto-lock: {}", e);
            self.ctx
                .bus
                .notify(Notice::error(WindowLabel::main(), "Error", e.message.clone()));
        }
        self.end_session(CloseInitiator::AutoLock).await;
    }

    async fn end_session(&mut self, initiator: CloseInitiator) {
        let manual_logout = initiator.is_manual_logout();
        self.flag.discard();
        self.prompt.dismiss();
        self.inactivity.disarm();
        self.conflict_pending = false;
        self.session = Session::Locked;

        // Quick unlock survives everything but an explicit logout.
        if manual_logout {
            if let Err(e) = self.ctx.settings.remove(keys::LAST_DATABASE_PATH) {
                log::warn!("[Settings] Failed to forget the last database: {}", e);
            }
            self.settings.last_database_path = None;
        }

        log::info!("[Main] Session ended ({:?})", initiator);
        self.ctx.bus.publish(SessionEvent::SessionEnded {
            target: WindowLabel::main(),
            initiator,
            manual_logout,
        });
        self.sync_title().await;
    }

    // ========================================================================
    // Saving
    // ========================================================================

    async fn save(&mut self) -> Result<(), CoordinatorError> {
        self.require_unlocked()?;
        match self.saver.save(&mut self.flag).await {
            Ok(()) => {
                self.conflict_pending = false;
                self.sync_title().await;
                self.ctx.bus.notify(Notice::success(
                    WindowLabel::main(),
                    "Saved",
                    "Database saved",
                ));
                Ok(())
            }
            Err(e) => {
                self.surface_save_error(&e);
                Err(e.into())
            }
        }
    }

    async fn resolve_conflict(&mut self, choice: ConflictResolution) -> Result<(), CoordinatorError> {
        self.require_unlocked()?;
        if !std::mem::replace(&mut self.conflict_pending, false) {
            return Ok(());
        }
        let result = match choice {
            ConflictResolution::Cancel => return Ok(()),
            ConflictResolution::Synchronize => {
                let result = self.saver.synchronize(&mut self.flag).await;
                self.publish_refresh();
                result
            }
            ConflictResolution::Overwrite => self.saver.overwrite(&mut self.flag).await,
        };
        self.sync_title().await;
        match result {
            Ok(()) => {
                self.ctx.bus.notify(Notice::success(
                    WindowLabel::main(),
                    "Saved",
                    "Database saved",
                ));
                Ok(())
            }
            Err(e) => {
                self.surface_save_error(&e);
                Err(e.into())
            }
        }
    }

    fn surface_save_error(&mut self, err: &SaveError) {
        match err {
            SaveError::Conflict => {
                self.conflict_pending = true;
                self.ctx.bus.publish(SessionEvent::DatabaseConflict {
                    target: WindowLabel::main(),
                });
            }
            SaveError::Backend(e) => {
                log::error!("[Main] Save failed: {}", e);
                self.ctx.bus.notify(Notice::error(
                    WindowLabel::main(),
                    "Save failed",
                    e.message.clone(),
                ));
            }
        }
    }

    /// Pull in changes made by another program while nothing here is unsaved
    async fn live_sync(&mut self) {
        if !self.settings.live_updates
            || !self.is_unlocked()
            || self.flag.is_dirty()
            || self.prompt.is_visible()
        {
            return;
        }
        let check = timeout(
            self.ctx.config.backend_timeout,
            self.ctx.backend.check_database_changes(),
        );
        let Ok(changed) = check.await else {
            log::warn!(
                "[Main] Live update check gave no answer within {:?}",
                self.ctx.config.backend_timeout
            );
            return;
        };
        match changed {
            Ok(false) => {}
            Ok(true) => {
                log::info!("[Main] Database changed on disk, synchronizing");
                let result = self.saver.synchronize(&mut self.flag).await;
                self.publish_refresh();
                self.sync_title().await;
                if let Err(e) = result {
                    self.surface_save_error(&e);
                }
            }
            Err(e) => log::warn!("[Main] Live update check failed: {}", e),
        }
    }

    async fn delete_entries(&mut self, entry_ids: Vec<String>) -> Result<(), CoordinatorError> {
        self.require_unlocked()?;
        let mut deleted = 0;
        let mut failure = None;
        for entry_id in &entry_ids {
            match self.ctx.backend.delete_entry(entry_id).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    log::error!("[Main] Failed to delete {}: {}", entry_id, e);
                    failure = Some(e);
                    break;
                }
            }
        }
        if deleted > 0 {
            log::info!("[Main] Deleted {} of {} entries", deleted, entry_ids.len());
            self.mark_dirty_and_refresh().await;
        }
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Windows, settings and view state
    // ========================================================================

    async fn open_window(&mut self, kind: WindowKind, params: OpenParams) -> Result<Opened, CoordinatorError> {
        match kind {
            WindowKind::Main => {
                self.ctx.runtime.focus(&WindowLabel::main()).await?;
                Ok(Opened::Focused(WindowHandle {
                    label: WindowLabel::main(),
                    kind: WindowKind::Main,
                    lifecycle: Lifecycle::Open,
                }))
            }
            WindowKind::EntryEditor { .. } => {
                self.require_unlocked()?;
                self.registry.open_window(kind, params).await
            }
            WindowKind::Settings | WindowKind::About => self.registry.open_window(kind, params).await,
        }
    }

    /// The store is authoritative; event payloads only say what to re-read
    fn reload_settings(&mut self) {
        match AppSettings::load(self.ctx.settings.as_ref()) {
            Ok(settings) => {
                if settings.auto_lock_seconds != self.settings.auto_lock_seconds {
                    self.inactivity
                        .configure(settings.auto_lock_seconds, Instant::now());
                }
                self.settings = settings;
            }
            Err(e) => log::error!("[Settings] Failed to reload settings: {}", e),
        }
    }

    async fn mark_dirty_and_refresh(&mut self) {
        self.publish_refresh();
        if self.flag.mark_dirty() {
            self.sync_title().await;
        }
    }

    fn publish_refresh(&mut self) {
        self.generation += 1;
        self.ctx.bus.publish(SessionEvent::VaultRefresh {
            target: WindowLabel::main(),
            generation: self.generation,
        });
    }

    fn publish_prompt(&self) {
        self.ctx.bus.publish(self.prompt.event(WindowLabel::main()));
    }

    fn title(&self) -> String {
        match &self.session {
            Session::Locked => APP_TITLE.to_string(),
            Session::Unlocked { path } => format!(
                "{}{} - {}",
                path,
                if self.flag.is_dirty() { "*" } else { "" },
                APP_TITLE
            ),
        }
    }

    /// Push dirty state to the webview and the native title bar
    async fn sync_title(&self) {
        self.ctx.bus.publish(SessionEvent::DirtyChanged {
            target: WindowLabel::main(),
            dirty: self.flag.is_dirty(),
        });
        if let Err(e) = self
            .ctx
            .runtime
            .set_title(&WindowLabel::main(), &self.title())
            .await
        {
            log::warn!("[Main] Failed to set title: {}", e);
        }
    }

    fn snapshot(&self) -> MainSnapshot {
        MainSnapshot {
            unlocked: self.is_unlocked(),
            database_path: match &self.session {
                Session::Unlocked { path } => Some(path.clone()),
                Session::Locked => None,
            },
            dirty: self.flag.is_dirty(),
            title: self.title(),
            prompt: match self.prompt.state() {
                PromptState::Shown(action) | PromptState::Saving(action) => Some(action),
                PromptState::Hidden => None,
            },
            conflict_pending: self.conflict_pending,
            refresh_generation: self.generation,
            settings: self.settings.clone(),
        }
    }
}
