// Vault Desktop - Session Coordinator
// Wires the runtime, backend and settings seams to the window actors

use std::sync::Arc;

use crate::backend::VaultBackend;
use crate::bus::{EventBus, SessionEvent};
use crate::child_window::ChildWindowHandle;
use crate::config::{AppSettings, CoordinatorConfig, SettingsStore};
use crate::error::CoordinatorError;
use crate::main_window::{ActionStatus, MainWindow, MainWindowHandle};
use crate::window::{WindowLabel, WindowRegistry, WindowRuntime};

/// Everything a window actor may reach. Cheap to clone.
#[derive(Clone)]
pub struct WindowContext {
    pub runtime: Arc<dyn WindowRuntime>,
    pub backend: Arc<dyn VaultBackend>,
    pub settings: Arc<dyn SettingsStore>,
    pub bus: EventBus,
    pub config: CoordinatorConfig,
}

pub struct Coordinator {
    ctx: WindowContext,
    registry: Arc<WindowRegistry>,
    main: MainWindowHandle,
}

impl Coordinator {
    /// Spawn the main window actor. Must run inside a tokio runtime.
    pub fn start(ctx: WindowContext) -> Self {
        let settings = match AppSettings::load(ctx.settings.as_ref()) {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("[Settings] Failed to load settings, using defaults: {}", e);
                AppSettings::default()
            }
        };
        log::info!(
            "[Main] Starting (auto-lock {}s, close to tray {})",
            settings.auto_lock_seconds,
            settings.close_to_tray
        );
        let registry = Arc::new(WindowRegistry::new(ctx.clone()));
        let main = MainWindow::spawn(ctx.clone(), registry.clone(), settings);
        Self {
            ctx,
            registry,
            main,
        }
    }

    pub fn context(&self) -> &WindowContext {
        &self.ctx
    }

    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    pub fn main(&self) -> &MainWindowHandle {
        &self.main
    }

    pub fn registry(&self) -> &Arc<WindowRegistry> {
        &self.registry
    }

    pub async fn child(&self, label: &WindowLabel) -> Result<ChildWindowHandle, CoordinatorError> {
        self.registry
            .child(label)
            .await
            .ok_or_else(|| CoordinatorError::WindowGone(label.clone()))
    }

    /// The OS asked to close a window. Main runs its own gate; a child gets
    /// the same cooperative request the negotiator sends.
    pub async fn close_requested(&self, label: &WindowLabel) -> Result<ActionStatus, CoordinatorError> {
        if label.is_main() {
            return self.main.request_close().await;
        }
        if self.registry.child(label).await.is_none() {
            log::warn!("[Main] Close requested for untracked window {}", label);
            self.ctx.runtime.destroy(label).await?;
            return Ok(ActionStatus::Completed);
        }
        self.ctx.bus.publish(SessionEvent::CloseRequested {
            label: label.clone(),
            initiator: None,
            force: false,
        });
        Ok(ActionStatus::AwaitingDecision)
    }

    /// The runtime reports a window gone
    pub async fn window_destroyed(&self, label: &WindowLabel) {
        if !label.is_main() {
            self.registry.forget(label).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bus::{topics, BackendOption};
    use crate::child_window::ChildCommand;
    use crate::config::keys;
    use crate::editor::DraftField;
    use crate::error::BackendError;
    use crate::inactivity::ActivitySignal;
    use crate::main_window::ConflictResolution;
    use crate::negotiator::CloseInitiator;
    use crate::prompt::{PendingAction, PromptDecision};
    use crate::test_support::Harness;
    use crate::window::{OpenParams, WindowKind};

    const DB: &str = "/home/alice/vault.kdbx";

    async fn unlocked(harness: &Harness) -> Coordinator {
        let coordinator = harness.coordinator();
        coordinator.main().unlock(DB, "secret").await.unwrap();
        coordinator
    }

    async fn open_editor(coordinator: &Coordinator, entry_id: &str) -> ChildWindowHandle {
        coordinator
            .main()
            .open_window(
                WindowKind::entry_editor(entry_id),
                OpenParams {
                    group_id: Some("g1".into()),
                    title: None,
                },
            )
            .await
            .unwrap();
        let child = coordinator
            .child(&WindowKind::entry_editor(entry_id).label())
            .await
            .unwrap();
        child.wait_loaded().await.unwrap();
        child
    }

    #[tokio::test(start_paused = true)]
    async fn saved_entry_marks_the_database_dirty_and_refreshes_once() {
        let harness = Harness::new();
        harness.backend.insert_entry("g1", "E1", "Mail");
        let coordinator = unlocked(&harness).await;
        let editor = open_editor(&coordinator, "E1").await;
        let before = coordinator.main().snapshot().await.unwrap();
        assert!(!before.dirty);
        let mut refreshes = harness.bus.subscribe(&[topics::VAULT_REFRESH]);

        editor
            .send(ChildCommand::edit(DraftField::Password, "n3w"))
            .await
            .unwrap();
        editor.send(ChildCommand::Save).await.unwrap();
        harness.next_event(&mut refreshes).await;
        harness.settle().await;

        let after = coordinator.main().snapshot().await.unwrap();
        assert!(after.dirty);
        assert_eq!(after.refresh_generation, before.refresh_generation + 1);
        assert!(harness.try_next_event(&mut refreshes).await.is_none());
        assert_eq!(after.title, format!("{}* - Vault", DB));
        assert_eq!(
            harness.runtime.title(&WindowLabel::main()).as_deref(),
            Some(format!("{}* - Vault", DB).as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn logout_discard_skips_save_and_proceeds() {
        let harness = Harness::new();
        let coordinator = unlocked(&harness).await;
        coordinator.main().mark_dirty().await.unwrap();

        let status = coordinator.main().logout().await.unwrap();
        assert_eq!(status, ActionStatus::AwaitingDecision);
        assert_eq!(
            coordinator.main().snapshot().await.unwrap().prompt,
            Some(PendingAction::Logout)
        );

        let status = coordinator
            .main()
            .resolve_prompt(PromptDecision::Discard)
            .await
            .unwrap();

        assert_eq!(status, ActionStatus::Completed);
        let snapshot = coordinator.main().snapshot().await.unwrap();
        assert!(!snapshot.dirty);
        assert!(!snapshot.unlocked);
        assert_eq!(harness.backend.save_calls(), 0);
        assert_eq!(harness.backend.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_save_failure_keeps_the_session_and_the_prompt() {
        let harness = Harness::new();
        let coordinator = unlocked(&harness).await;
        coordinator.main().mark_dirty().await.unwrap();
        harness.backend.fail_saves_with("disk full");
        let mut notices = harness.bus.subscribe(&[topics::NOTIFY]);

        coordinator.main().logout().await.unwrap();
        let err = coordinator
            .main()
            .resolve_prompt(PromptDecision::Save)
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinatorError::SaveFailedDuringPrompt(_)));
        let snapshot = coordinator.main().snapshot().await.unwrap();
        assert!(snapshot.unlocked);
        assert!(snapshot.dirty);
        assert_eq!(snapshot.prompt, Some(PendingAction::Logout));
        assert_eq!(harness.backend.close_calls(), 0);
        assert!(matches!(
            harness.next_event(&mut notices).await,
            SessionEvent::Notify(notice) if notice.message == "disk full"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn logout_save_then_proceed_on_success() {
        let harness = Harness::new();
        let coordinator = unlocked(&harness).await;
        coordinator.main().mark_dirty().await.unwrap();

        coordinator.main().logout().await.unwrap();
        let status = coordinator
            .main()
            .resolve_prompt(PromptDecision::Save)
            .await
            .unwrap();

        assert_eq!(status, ActionStatus::Completed);
        assert_eq!(harness.backend.save_calls(), 1);
        assert!(!coordinator.main().snapshot().await.unwrap().unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_leaves_everything_as_it_was() {
        let harness = Harness::new();
        let coordinator = unlocked(&harness).await;
        coordinator.main().mark_dirty().await.unwrap();

        coordinator.main().logout().await.unwrap();
        let status = coordinator
            .main()
            .resolve_prompt(PromptDecision::Cancel)
            .await
            .unwrap();

        assert_eq!(status, ActionStatus::Aborted);
        let snapshot = coordinator.main().snapshot().await.unwrap();
        assert!(snapshot.unlocked && snapshot.dirty);
        assert_eq!(snapshot.prompt, None);
    }

    #[tokio::test(start_paused = true)]
    async fn incomplete_negotiation_blocks_teardown() {
        let harness = Harness::new();
        harness.backend.insert_entry("g1", "E1", "Mail");
        let coordinator = unlocked(&harness).await;
        let editor = open_editor(&coordinator, "E1").await;
        editor
            .send(ChildCommand::edit(DraftField::Title, "draft"))
            .await
            .unwrap();

        let mut prompts = harness.bus.subscribe(&[topics::UNSAVED_CHANGES_PROMPT]);
        let answering = editor.clone();
        tokio::spawn(async move {
            while let Some(event) = prompts.recv().await {
                if let SessionEvent::UnsavedPrompt { visible: true, .. } = event {
                    let _ = answering
                        .send(ChildCommand::ResolvePrompt(PromptDecision::Cancel))
                        .await;
                }
            }
        });

        let err = coordinator.main().logout().await.unwrap_err();

        assert!(matches!(
            err,
            CoordinatorError::CloseNegotiationIncomplete { ref remaining } if remaining == &vec![editor.label().clone()]
        ));
        assert_eq!(harness.backend.close_calls(), 0);
        assert!(coordinator.main().snapshot().await.unwrap().unlocked);
        // Still fully usable afterwards.
        editor.send(ChildCommand::Save).await.unwrap();
    }

    /// Answer every prompt `window` raises with `decision`
    fn answer_prompts(harness: &Harness, window: &ChildWindowHandle, decision: PromptDecision) {
        let mut prompts = harness.bus.subscribe(&[topics::UNSAVED_CHANGES_PROMPT]);
        let window = window.clone();
        tokio::spawn(async move {
            while let Some(event) = prompts.recv().await {
                if let SessionEvent::UnsavedPrompt {
                    target,
                    visible: true,
                    ..
                } = event
                {
                    if &target == window.label() {
                        let _ = window.send(ChildCommand::ResolvePrompt(decision)).await;
                    }
                }
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn discarding_keeps_the_flag_when_a_child_refuses_to_close() {
        let harness = Harness::new();
        harness.backend.insert_entry("g1", "E1", "Mail");
        let coordinator = unlocked(&harness).await;
        coordinator.main().mark_dirty().await.unwrap();
        let editor = open_editor(&coordinator, "E1").await;
        editor
            .send(ChildCommand::edit(DraftField::Title, "draft"))
            .await
            .unwrap();
        answer_prompts(&harness, &editor, PromptDecision::Cancel);

        assert_eq!(
            coordinator.main().logout().await.unwrap(),
            ActionStatus::AwaitingDecision
        );
        let err = coordinator
            .main()
            .resolve_prompt(PromptDecision::Discard)
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinatorError::CloseNegotiationIncomplete { .. }));
        let snapshot = coordinator.main().snapshot().await.unwrap();
        assert!(snapshot.unlocked);
        assert!(snapshot.dirty);
        assert_eq!(snapshot.title, format!("{}* - Vault", DB));
        assert_eq!(snapshot.prompt, None);
        assert_eq!(harness.backend.close_calls(), 0);

        // The next attempt asks again instead of dropping the changes
        assert_eq!(
            coordinator.main().logout().await.unwrap(),
            ActionStatus::AwaitingDecision
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entry_saved_while_logging_out_asks_again() {
        let harness = Harness::new();
        harness.backend.insert_entry("g1", "E1", "Mail");
        let coordinator = unlocked(&harness).await;
        let editor = open_editor(&coordinator, "E1").await;
        editor
            .send(ChildCommand::edit(DraftField::Title, "Webmail"))
            .await
            .unwrap();
        answer_prompts(&harness, &editor, PromptDecision::Save);

        let status = coordinator.main().logout().await.unwrap();

        assert_eq!(status, ActionStatus::AwaitingDecision);
        assert!(editor.is_finished());
        assert_eq!(harness.backend.entry("E1").unwrap().title, "Webmail");
        let snapshot = coordinator.main().snapshot().await.unwrap();
        assert!(snapshot.unlocked);
        assert!(snapshot.dirty);
        assert_eq!(snapshot.prompt, Some(PendingAction::Logout));
        assert_eq!(harness.backend.close_calls(), 0);

        let status = coordinator
            .main()
            .resolve_prompt(PromptDecision::Save)
            .await
            .unwrap();

        assert_eq!(status, ActionStatus::Completed);
        assert_eq!(harness.backend.save_calls(), 1);
        assert_eq!(harness.backend.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_delete_still_marks_the_database_dirty() {
        let harness = Harness::new();
        for id in ["E1", "E2", "E3"] {
            harness.backend.insert_entry("g1", id, id);
        }
        harness.backend.fail_deletes_of("E2");
        let coordinator = unlocked(&harness).await;

        let err = coordinator
            .main()
            .delete_entries(vec!["E1".into(), "E2".into(), "E3".into()])
            .await
            .unwrap_err();

        assert_eq!(
            err,
            CoordinatorError::BackendCallFailed(BackendError::new("delete_entry", "entry is locked"))
        );
        assert!(harness.backend.entry("E1").is_none());
        assert!(harness.backend.entry("E3").is_some());
        assert!(coordinator.main().snapshot().await.unwrap().dirty);
        assert_eq!(
            coordinator.main().logout().await.unwrap(),
            ActionStatus::AwaitingDecision
        );
    }

    #[tokio::test(start_paused = true)]
    async fn logout_closes_clean_children_first() {
        let harness = Harness::new();
        harness.backend.insert_entry("g1", "E1", "Mail");
        let coordinator = unlocked(&harness).await;
        let editor = open_editor(&coordinator, "E1").await;
        coordinator
            .main()
            .open_window(WindowKind::About, OpenParams::default())
            .await
            .unwrap();

        assert_eq!(coordinator.main().logout().await.unwrap(), ActionStatus::Completed);

        assert!(editor.is_finished());
        assert_eq!(harness.runtime.live_labels_now(), vec![WindowLabel::main()]);
        assert_eq!(harness.backend.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_logout_forgets_the_quick_unlock_path() {
        let harness = Harness::new();
        let coordinator = unlocked(&harness).await;
        assert_eq!(
            harness.settings.get(keys::LAST_DATABASE_PATH).unwrap().as_deref(),
            Some(DB)
        );
        let mut ended = harness.bus.subscribe(&[topics::SESSION_ENDED]);

        coordinator.main().logout().await.unwrap();

        assert_eq!(
            harness.next_event(&mut ended).await,
            SessionEvent::SessionEnded {
                target: WindowLabel::main(),
                initiator: CloseInitiator::ManualLogout,
                manual_logout: true,
            }
        );
        assert_eq!(harness.settings.get(keys::LAST_DATABASE_PATH).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_locks_once_without_manual_logout() {
        let harness = Harness::new();
        harness.settings.set(keys::AUTO_LOCK_SECONDS, "5").unwrap();
        let coordinator = unlocked(&harness).await;
        coordinator.main().mark_dirty().await.unwrap();
        let mut ended = harness.bus.subscribe(&[topics::SESSION_ENDED]);

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(
            harness.next_event(&mut ended).await,
            SessionEvent::SessionEnded {
                target: WindowLabel::main(),
                initiator: CloseInitiator::AutoLock,
                manual_logout: false,
            }
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(harness.try_next_event(&mut ended).await.is_none());

        let snapshot = coordinator.main().snapshot().await.unwrap();
        assert!(!snapshot.unlocked);
        assert!(!snapshot.dirty);
        assert_eq!(harness.backend.save_calls(), 0);
        assert_eq!(harness.backend.close_calls(), 1);
        assert_eq!(
            harness.settings.get(keys::LAST_DATABASE_PATH).unwrap().as_deref(),
            Some(DB)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_the_lock() {
        let harness = Harness::new();
        harness.settings.set(keys::AUTO_LOCK_SECONDS, "5").unwrap();
        let coordinator = unlocked(&harness).await;

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            coordinator.main().record_activity(ActivitySignal::PointerMove);
        }

        assert!(coordinator.main().snapshot().await.unwrap().unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_threshold_never_locks() {
        let harness = Harness::new();
        harness.settings.set(keys::AUTO_LOCK_SECONDS, "0").unwrap();
        let coordinator = unlocked(&harness).await;

        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert!(coordinator.main().snapshot().await.unwrap().unlocked);
        assert_eq!(harness.backend.close_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_lock_gives_way_to_an_unanswered_editor_prompt() {
        let harness = Harness::new();
        harness.settings.set(keys::AUTO_LOCK_SECONDS, "5").unwrap();
        harness.backend.insert_entry("g1", "E1", "Mail");
        let coordinator = unlocked(&harness).await;
        let editor = open_editor(&coordinator, "E1").await;
        editor
            .send(ChildCommand::edit(DraftField::Title, "draft"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!editor.is_finished());
        assert!(editor.snapshot().await.unwrap().dirty);
        assert!(coordinator.main().snapshot().await.unwrap().unlocked);
        assert_eq!(harness.backend.close_calls(), 0);

        // Once the draft is let go, the next idle period locks as usual
        editor
            .send(ChildCommand::ResolvePrompt(PromptDecision::Discard))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(editor.is_finished());
        assert!(!coordinator.main().snapshot().await.unwrap().unlocked);
        assert_eq!(harness.backend.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_lock_closes_clean_editors() {
        let harness = Harness::new();
        harness.settings.set(keys::AUTO_LOCK_SECONDS, "5").unwrap();
        harness.backend.insert_entry("g1", "E1", "Mail");
        let coordinator = unlocked(&harness).await;
        let editor = open_editor(&coordinator, "E1").await;

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(editor.is_finished());
        assert!(!coordinator.main().snapshot().await.unwrap().unlocked);
        assert_eq!(harness.runtime.live_labels_now(), vec![WindowLabel::main()]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_change_check_does_not_hold_off_auto_lock() {
        let mut harness = Harness::new();
        harness.config.backend_timeout = Duration::from_secs(1);
        harness.settings.set(keys::LIVE_UPDATES, "true").unwrap();
        harness.settings.set(keys::AUTO_LOCK_SECONDS, "7").unwrap();
        harness.backend.stall_change_checks();
        let coordinator = unlocked(&harness).await;

        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(!coordinator.main().snapshot().await.unwrap().unlocked);
        assert_eq!(harness.backend.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_to_tray_hides_and_keeps_the_session() {
        let harness = Harness::new();
        harness.settings.set(keys::CLOSE_TO_TRAY, "true").unwrap();
        let coordinator = unlocked(&harness).await;

        let status = coordinator.close_requested(&WindowLabel::main()).await.unwrap();

        assert_eq!(status, ActionStatus::HiddenToTray);
        assert!(harness.runtime.is_hidden(&WindowLabel::main()));
        assert!(coordinator.main().snapshot().await.unwrap().unlocked);

        assert_eq!(coordinator.main().quit().await.unwrap(), ActionStatus::MainClosed);
        assert!(!harness.runtime.is_live(&WindowLabel::main()));
    }

    #[tokio::test(start_paused = true)]
    async fn main_close_without_tray_ends_the_session() {
        let harness = Harness::new();
        let coordinator = unlocked(&harness).await;

        let status = coordinator.close_requested(&WindowLabel::main()).await.unwrap();

        assert_eq!(status, ActionStatus::MainClosed);
        assert_eq!(harness.backend.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn child_close_button_goes_through_its_prompt() {
        let harness = Harness::new();
        harness.backend.insert_entry("g1", "E1", "Mail");
        let coordinator = unlocked(&harness).await;
        let editor = open_editor(&coordinator, "E1").await;
        editor
            .send(ChildCommand::edit(DraftField::Title, "draft"))
            .await
            .unwrap();

        let status = coordinator.close_requested(editor.label()).await.unwrap();
        assert_eq!(status, ActionStatus::AwaitingDecision);
        harness.settle().await;
        assert!(editor.snapshot().await.unwrap().prompt_visible);

        editor
            .send(ChildCommand::ResolvePrompt(PromptDecision::Discard))
            .await
            .unwrap();
        harness.settle().await;
        coordinator.window_destroyed(editor.label()).await;

        assert!(editor.is_finished());
        assert!(coordinator.registry().handle(editor.label()).await.is_none());
        // Discarding an editor draft never touches the database flag.
        assert!(!coordinator.main().snapshot().await.unwrap().dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn breach_check_change_reloads_the_session() {
        let harness = Harness::new();
        let coordinator = unlocked(&harness).await;
        coordinator
            .main()
            .open_window(WindowKind::Settings, OpenParams::default())
            .await
            .unwrap();
        let settings = coordinator.child(&WindowLabel::from("settings")).await.unwrap();
        let mut ended = harness.bus.subscribe(&[topics::SESSION_ENDED]);

        settings
            .send(ChildCommand::SetOption {
                option: BackendOption::BreachCheck,
                value: serde_json::json!(true),
            })
            .await
            .unwrap();

        assert_eq!(
            harness.next_event(&mut ended).await,
            SessionEvent::SessionEnded {
                target: WindowLabel::main(),
                initiator: CloseInitiator::BackendOptionReload,
                manual_logout: false,
            }
        );
        assert!(coordinator.main().snapshot().await.unwrap().settings.breach_check);
    }

    #[tokio::test(start_paused = true)]
    async fn breach_check_change_with_unsaved_work_asks_first() {
        let harness = Harness::new();
        let coordinator = unlocked(&harness).await;
        coordinator.main().mark_dirty().await.unwrap();
        let mut prompts = harness.bus.subscribe(&[topics::UNSAVED_CHANGES_PROMPT]);

        harness.settings.set(keys::BREACH_CHECK, "true").unwrap();
        harness.bus.publish(SessionEvent::BackendOptionChanged {
            option: BackendOption::BreachCheck,
            value: serde_json::json!(true),
        });

        assert_eq!(
            harness.next_event(&mut prompts).await,
            SessionEvent::UnsavedPrompt {
                target: WindowLabel::main(),
                visible: true,
                action: Some(PendingAction::BackendOptionReload),
            }
        );
        assert!(coordinator.main().snapshot().await.unwrap().unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_lock_setting_applies_without_restart() {
        let harness = Harness::new();
        let coordinator = unlocked(&harness).await;

        harness.settings.set(keys::AUTO_LOCK_SECONDS, "2").unwrap();
        harness.bus.publish(SessionEvent::BackendOptionChanged {
            option: BackendOption::AutoLockSeconds,
            value: serde_json::json!("2"),
        });
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!coordinator.main().snapshot().await.unwrap().unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn save_conflict_is_raised_and_resolved() {
        let harness = Harness::new();
        let coordinator = unlocked(&harness).await;
        coordinator.main().mark_dirty().await.unwrap();
        harness.backend.set_external_changes(true);
        let mut conflicts = harness.bus.subscribe(&[topics::DATABASE_CONFLICT]);

        assert!(coordinator.main().save().await.is_err());
        harness.next_event(&mut conflicts).await;
        assert!(coordinator.main().snapshot().await.unwrap().conflict_pending);

        coordinator
            .main()
            .resolve_conflict(ConflictResolution::Synchronize)
            .await
            .unwrap();

        let snapshot = coordinator.main().snapshot().await.unwrap();
        assert!(!snapshot.dirty);
        assert!(!snapshot.conflict_pending);
        assert_eq!(harness.backend.merge_calls(), 1);
        assert_eq!(harness.backend.save_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn live_updates_merge_external_changes_when_clean() {
        let harness = Harness::new();
        harness.settings.set(keys::LIVE_UPDATES, "true").unwrap();
        let coordinator = unlocked(&harness).await;
        harness.backend.set_external_changes(true);

        tokio::time::sleep(harness.config.live_sync_interval * 2).await;

        assert_eq!(harness.backend.merge_calls(), 1);
        assert_eq!(harness.backend.save_calls(), 1);
        assert!(!coordinator.main().snapshot().await.unwrap().dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn events_while_locked_are_ignored() {
        let harness = Harness::new();
        let coordinator = harness.coordinator();

        harness.bus.publish(SessionEvent::EntryUpdated {
            entry_id: "E1".into(),
        });
        harness.settle().await;

        let snapshot = coordinator.main().snapshot().await.unwrap();
        assert!(!snapshot.dirty);
        assert_eq!(snapshot.title, "Vault");
    }

    #[tokio::test(start_paused = true)]
    async fn editors_need_an_unlocked_session() {
        let harness = Harness::new();
        let coordinator = harness.coordinator();

        let err = coordinator
            .main()
            .open_window(WindowKind::entry_editor("E1"), OpenParams::default())
            .await
            .unwrap_err();

        assert_eq!(err, CoordinatorError::NotUnlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_unlock_is_surfaced() {
        let harness = Harness::new();
        harness.backend.fail_opens_with("wrong password");
        let coordinator = harness.coordinator();

        let err = coordinator.main().unlock(DB, "nope").await.unwrap_err();

        assert_eq!(
            err,
            CoordinatorError::BackendCallFailed(BackendError::new("open_session", "wrong password"))
        );
        assert!(!coordinator.main().snapshot().await.unwrap().unlocked);
    }
}
