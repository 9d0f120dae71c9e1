// Vault Desktop - Tauri v2
// Binds the coordinator to real webview windows, the tray and the frontend

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tauri::menu::{Menu, MenuItem};
use tauri::tray::TrayIconBuilder;
use tauri::{
    AppHandle, Emitter, Manager, State, WebviewUrl, WebviewWindow, WebviewWindowBuilder,
    WindowEvent,
};

use crate::backend::{
    BreachedEntry, EntryData, GroupData, HealthResponse, HttpBackend, KdfInfo,
};
use crate::bus::{BackendOption, EventBus};
use crate::child_window::{ChildCommand, ChildSnapshot};
use crate::config::{CoordinatorConfig, JsonFileStore};
use crate::coordinator::{Coordinator, WindowContext};
use crate::editor::DraftField;
use crate::error::RuntimeError;
use crate::inactivity::ActivitySignal;
use crate::main_window::{ActionStatus, ConflictResolution, MainSnapshot};
use crate::prompt::PromptDecision;
use crate::window::{
    OpenParams, WindowHandle, WindowKind, WindowLabel, WindowRuntime, WindowSpec, MAIN_LABEL,
};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Window Runtime
// ============================================================================

/// `WindowRuntime` over Tauri webview windows
struct TauriRuntime {
    app: AppHandle,
}

impl TauriRuntime {
    fn window(&self, label: &WindowLabel) -> Result<WebviewWindow, RuntimeError> {
        self.app
            .get_webview_window(label.as_str())
            .ok_or_else(|| RuntimeError::NotFound(label.clone()))
    }
}

fn rejected(e: tauri::Error) -> RuntimeError {
    RuntimeError::Rejected(e.to_string())
}

#[async_trait]
impl WindowRuntime for TauriRuntime {
    async fn live_labels(&self) -> Vec<WindowLabel> {
        self.app
            .webview_windows()
            .into_keys()
            .map(WindowLabel::from)
            .collect()
    }

    async fn exists(&self, label: &WindowLabel) -> bool {
        self.app.get_webview_window(label.as_str()).is_some()
    }

    async fn create(&self, spec: &WindowSpec) -> Result<(), RuntimeError> {
        let location = spec.location.trim_start_matches('/').to_string();
        WebviewWindowBuilder::new(&self.app, spec.label.as_str(), WebviewUrl::App(location.into()))
            .title(&spec.title)
            .inner_size(spec.chrome.width, spec.chrome.height)
            .resizable(spec.chrome.resizable)
            .decorations(spec.chrome.decorated)
            .always_on_top(spec.chrome.modal)
            .build()
            .map_err(rejected)?;
        Ok(())
    }

    async fn focus(&self, label: &WindowLabel) -> Result<(), RuntimeError> {
        let window = self.window(label)?;
        window.show().map_err(rejected)?;
        window.set_focus().map_err(rejected)
    }

    async fn destroy(&self, label: &WindowLabel) -> Result<(), RuntimeError> {
        self.window(label)?.destroy().map_err(rejected)
    }

    async fn hide(&self, label: &WindowLabel) -> Result<(), RuntimeError> {
        self.window(label)?.hide().map_err(rejected)
    }

    async fn set_title(&self, label: &WindowLabel, title: &str) -> Result<(), RuntimeError> {
        self.window(label)?.set_title(title).map_err(rejected)
    }
}

/// Forward every bus envelope to the frontend, addressed when it names a window
async fn bridge_bus(app: AppHandle, bus: EventBus) {
    let mut subscription = bus.subscribe_all();
    while let Some(envelope) = subscription.recv_envelope().await {
        let sent = match envelope.target() {
            Some(label) => app.emit_to(label, &envelope.topic, envelope.payload.clone()),
            None => app.emit(&envelope.topic, envelope.payload.clone()),
        };
        if let Err(e) = sent {
            log::warn!("[Bus] Failed to forward {}: {}", envelope.topic, e);
        }
    }
    log::info!("[Bus] Frontend bridge stopped");
}

fn managed_coordinator(app: &AppHandle) -> Option<Arc<Coordinator>> {
    let coordinator = app.try_state::<Arc<Coordinator>>().map(|state| state.inner().clone());
    if coordinator.is_none() {
        log::warn!("[Window] Coordinator not started yet");
    }
    coordinator
}

fn exit_if_closed(app: &AppHandle, status: ActionStatus) {
    if status == ActionStatus::MainClosed {
        log::info!("[Window] Main window closed, exiting");
        app.exit(0);
    }
}

// ============================================================================
// Session Commands
// ============================================================================

#[tauri::command]
async fn unlock_database(
    coordinator: State<'_, Arc<Coordinator>>,
    path: String,
    password: String,
) -> Result<GroupData, String> {
    coordinator
        .main()
        .unlock(&path, &password)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn save_database(coordinator: State<'_, Arc<Coordinator>>) -> Result<(), String> {
    coordinator.main().save().await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn resolve_conflict(
    coordinator: State<'_, Arc<Coordinator>>,
    choice: ConflictResolution,
) -> Result<(), String> {
    coordinator
        .main()
        .resolve_conflict(choice)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn mark_dirty(coordinator: State<'_, Arc<Coordinator>>) -> Result<(), String> {
    coordinator.main().mark_dirty().await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn logout(coordinator: State<'_, Arc<Coordinator>>) -> Result<ActionStatus, String> {
    coordinator.main().logout().await.map_err(|e| e.to_string())
}

/// Answer the unsaved-changes prompt of whichever window is asking
#[tauri::command]
async fn resolve_unsaved_prompt(
    app: AppHandle,
    window: WebviewWindow,
    coordinator: State<'_, Arc<Coordinator>>,
    decision: PromptDecision,
) -> Result<ActionStatus, String> {
    let label = WindowLabel::from(window.label());
    if label.is_main() {
        let status = coordinator
            .main()
            .resolve_prompt(decision)
            .await
            .map_err(|e| e.to_string())?;
        exit_if_closed(&app, status);
        return Ok(status);
    }

    let child = coordinator.child(&label).await.map_err(|e| e.to_string())?;
    child
        .send(ChildCommand::ResolvePrompt(decision))
        .await
        .map_err(|e| e.to_string())?;
    Ok(ActionStatus::Completed)
}

#[tauri::command]
fn record_activity(coordinator: State<'_, Arc<Coordinator>>, signal: ActivitySignal) {
    coordinator.main().record_activity(signal);
}

#[tauri::command]
async fn get_session_state(
    coordinator: State<'_, Arc<Coordinator>>,
) -> Result<MainSnapshot, String> {
    coordinator.main().snapshot().await.map_err(|e| e.to_string())
}

// ============================================================================
// Window Commands
// ============================================================================

async fn open_kind(
    coordinator: &Coordinator,
    kind: WindowKind,
    params: OpenParams,
) -> Result<WindowHandle, String> {
    coordinator
        .main()
        .open_window(kind, params)
        .await
        .map(|opened| opened.handle().clone())
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn open_entry_window(
    coordinator: State<'_, Arc<Coordinator>>,
    entry_id: String,
    group_id: Option<String>,
    title: Option<String>,
) -> Result<WindowHandle, String> {
    let params = OpenParams { group_id, title };
    open_kind(&coordinator, WindowKind::entry_editor(entry_id), params).await
}

#[tauri::command]
async fn open_settings_window(
    coordinator: State<'_, Arc<Coordinator>>,
) -> Result<WindowHandle, String> {
    open_kind(&coordinator, WindowKind::Settings, OpenParams::default()).await
}

#[tauri::command]
async fn open_about_window(coordinator: State<'_, Arc<Coordinator>>) -> Result<WindowHandle, String> {
    open_kind(&coordinator, WindowKind::About, OpenParams::default()).await
}

// ============================================================================
// Editor and Settings Commands
// ============================================================================

/// Send a command to the child actor behind the calling window
async fn child_command(
    coordinator: &Coordinator,
    window: &WebviewWindow,
    command: ChildCommand,
) -> Result<(), String> {
    let label = WindowLabel::from(window.label());
    let child = coordinator.child(&label).await.map_err(|e| e.to_string())?;
    child.send(command).await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn editor_edit(
    window: WebviewWindow,
    coordinator: State<'_, Arc<Coordinator>>,
    field: DraftField,
    value: String,
) -> Result<(), String> {
    child_command(&coordinator, &window, ChildCommand::edit(field, value)).await
}

#[tauri::command]
async fn editor_generate_password(
    window: WebviewWindow,
    coordinator: State<'_, Arc<Coordinator>>,
    strength: String,
) -> Result<(), String> {
    child_command(&coordinator, &window, ChildCommand::GeneratePassword { strength }).await
}

#[tauri::command]
async fn editor_save(
    window: WebviewWindow,
    coordinator: State<'_, Arc<Coordinator>>,
) -> Result<(), String> {
    child_command(&coordinator, &window, ChildCommand::Save).await
}

#[tauri::command]
async fn editor_delete(
    window: WebviewWindow,
    coordinator: State<'_, Arc<Coordinator>>,
) -> Result<(), String> {
    child_command(&coordinator, &window, ChildCommand::Delete).await
}

#[tauri::command]
async fn editor_state(
    window: WebviewWindow,
    coordinator: State<'_, Arc<Coordinator>>,
) -> Result<ChildSnapshot, String> {
    let label = WindowLabel::from(window.label());
    let child = coordinator.child(&label).await.map_err(|e| e.to_string())?;
    child.snapshot().await.map_err(|e| e.to_string())
}

/// Loaded entry of the calling editor, once its load has finished
#[tauri::command]
async fn editor_entry(
    window: WebviewWindow,
    coordinator: State<'_, Arc<Coordinator>>,
) -> Result<Option<EntryData>, String> {
    let label = WindowLabel::from(window.label());
    let child = coordinator.child(&label).await.map_err(|e| e.to_string())?;
    child.wait_loaded().await.map_err(|e| e.to_string())?;
    Ok(child.snapshot().await.map_err(|e| e.to_string())?.entry)
}

#[tauri::command]
async fn set_option(
    window: WebviewWindow,
    coordinator: State<'_, Arc<Coordinator>>,
    option: BackendOption,
    value: Value,
) -> Result<(), String> {
    child_command(&coordinator, &window, ChildCommand::SetOption { option, value }).await
}

// ============================================================================
// Vault Data Commands
// ============================================================================

#[tauri::command]
async fn list_groups(coordinator: State<'_, Arc<Coordinator>>) -> Result<GroupData, String> {
    coordinator
        .context()
        .backend
        .list_groups()
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn list_entries(
    coordinator: State<'_, Arc<Coordinator>>,
    group_id: String,
) -> Result<Vec<EntryData>, String> {
    coordinator
        .context()
        .backend
        .list_entries(&group_id)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn list_favorites(coordinator: State<'_, Arc<Coordinator>>) -> Result<Vec<EntryData>, String> {
    coordinator
        .context()
        .backend
        .list_favorites()
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn search_entries(
    coordinator: State<'_, Arc<Coordinator>>,
    query: String,
) -> Result<Vec<EntryData>, String> {
    coordinator
        .context()
        .backend
        .search(&query)
        .await
        .map_err(|e| e.to_string())
}

/// Create from the main window; the database is unsaved afterwards
#[tauri::command]
async fn create_entry(
    coordinator: State<'_, Arc<Coordinator>>,
    entry: EntryData,
) -> Result<(), String> {
    coordinator
        .context()
        .backend
        .create_entry(&entry)
        .await
        .map_err(|e| e.to_string())?;
    coordinator.main().mark_dirty().await.map_err(|e| e.to_string())
}

/// Delete from the entry list (not an editor window)
#[tauri::command]
async fn delete_entries(
    coordinator: State<'_, Arc<Coordinator>>,
    entry_ids: Vec<String>,
) -> Result<(), String> {
    coordinator
        .main()
        .delete_entries(entry_ids)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn get_kdf_info(coordinator: State<'_, Arc<Coordinator>>) -> Result<KdfInfo, String> {
    coordinator
        .context()
        .backend
        .kdf_info()
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn upgrade_kdf(coordinator: State<'_, Arc<Coordinator>>) -> Result<(), String> {
    coordinator
        .context()
        .backend
        .upgrade_kdf()
        .await
        .map_err(|e| e.to_string())?;
    log::info!("[Main] KDF parameters upgraded");
    coordinator.main().mark_dirty().await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn check_breached_passwords(
    coordinator: State<'_, Arc<Coordinator>>,
) -> Result<Vec<BreachedEntry>, String> {
    coordinator
        .context()
        .backend
        .check_breached_passwords()
        .await
        .map_err(|e| e.to_string())
}

// ============================================================================
// Engine Commands
// ============================================================================

#[tauri::command]
async fn check_backend_health(engine: State<'_, Arc<HttpBackend>>) -> Result<HealthResponse, String> {
    engine
        .check_health_once()
        .await
        .ok_or_else(|| "Engine not available".to_string())
}

/// Tauri command to get app data directory path
#[tauri::command]
async fn get_data_dir(app: AppHandle) -> Result<String, String> {
    app.path()
        .app_data_dir()
        .map(|p| p.to_string_lossy().to_string())
        .map_err(|e| e.to_string())
}

/// Wait for the engine and tell the frontend how it went
async fn announce_engine(app: AppHandle, engine: Arc<HttpBackend>) {
    match engine.wait_for_health(HEALTH_TIMEOUT).await {
        Ok(health) => {
            app.emit("backend-ready", &health).ok();
        }
        Err(e) => {
            log::error!("[Backend] Engine failed to come up: {}", e);
            app.emit("backend-error", e.to_string()).ok();
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

fn show_main(app: &AppHandle) {
    if let Some(window) = app.get_webview_window(MAIN_LABEL) {
        let _ = window.show();
        let _ = window.set_focus();
    }
}

fn build_tray(app: &AppHandle) -> tauri::Result<()> {
    let show = MenuItem::with_id(app, "show", "Show Vault", true, None::<&str>)?;
    let quit = MenuItem::with_id(app, "quit", "Quit", true, None::<&str>)?;
    let menu = Menu::with_items(app, &[&show, &quit])?;

    let mut tray = TrayIconBuilder::with_id("main")
        .menu(&menu)
        .tooltip("Vault")
        .on_menu_event(|app, event| match event.id().as_ref() {
            "show" => show_main(app),
            "quit" => {
                // A dirty session prompts in the main window, so it must be visible
                show_main(app);
                let app = app.clone();
                tauri::async_runtime::spawn(async move {
                    let Some(coordinator) = managed_coordinator(&app) else {
                        return;
                    };
                    match coordinator.main().quit().await {
                        Ok(status) => exit_if_closed(&app, status),
                        Err(e) => log::warn!("[Main] Quit did not complete: {}", e),
                    }
                });
            }
            _ => {}
        });

    if let Some(icon) = app.default_window_icon().cloned() {
        tray = tray.icon(icon);
    }

    tray.build(app)?;
    Ok(())
}

fn setup(app: &AppHandle) -> anyhow::Result<()> {
    let data_dir = app.path().app_data_dir()?;
    let settings = Arc::new(JsonFileStore::open(&data_dir)?);
    log::info!("[Settings] Using {}", settings.path().display());

    let config = CoordinatorConfig::from_env();
    let engine = Arc::new(HttpBackend::new(
        config.backend_url.clone(),
        config.backend_timeout,
    )?);
    let bus = EventBus::default();
    let ctx = WindowContext {
        runtime: Arc::new(TauriRuntime { app: app.clone() }),
        backend: engine.clone(),
        settings,
        bus: bus.clone(),
        config,
    };

    // Actors need the tokio runtime Tauri drives
    let coordinator = Arc::new(tauri::async_runtime::block_on(async move {
        Coordinator::start(ctx)
    }));
    app.manage(coordinator);
    app.manage(engine.clone());

    tauri::async_runtime::spawn(bridge_bus(app.clone(), bus));
    tauri::async_runtime::spawn(announce_engine(app.clone(), engine));

    build_tray(app)?;
    Ok(())
}

fn on_close_requested(app: AppHandle, label: WindowLabel) {
    tauri::async_runtime::spawn(async move {
        let Some(coordinator) = managed_coordinator(&app) else {
            return;
        };
        match coordinator.close_requested(&label).await {
            Ok(status) => exit_if_closed(&app, status),
            Err(e) => log::warn!("[Window] Close of {} did not complete: {}", label, e),
        }
    });
}

fn on_destroyed(app: AppHandle, label: WindowLabel) {
    tauri::async_runtime::spawn(async move {
        let Some(coordinator) = managed_coordinator(&app) else {
            return;
        };
        coordinator.window_destroyed(&label).await;
    });
}

pub fn run() {
    tauri::Builder::default()
        .plugin(
            tauri_plugin_log::Builder::new()
                .targets([
                    tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::Stdout),
                    tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::LogDir {
                        file_name: Some("vault".into()),
                    }),
                ])
                .level(if cfg!(debug_assertions) {
                    log::LevelFilter::Debug
                } else {
                    log::LevelFilter::Info
                })
                .build(),
        )
        .setup(|app| {
            setup(app.handle())?;
            Ok(())
        })
        .on_window_event(|window, event| {
            let label = WindowLabel::from(window.label());
            match event {
                WindowEvent::CloseRequested { api, .. } => {
                    // The coordinator decides; it destroys the window itself
                    api.prevent_close();
                    on_close_requested(window.app_handle().clone(), label);
                }
                WindowEvent::Destroyed => {
                    on_destroyed(window.app_handle().clone(), label);
                }
                _ => {}
            }
        })
        .invoke_handler(tauri::generate_handler![
            // Session commands
            unlock_database,
            save_database,
            resolve_conflict,
            mark_dirty,
            logout,
            resolve_unsaved_prompt,
            record_activity,
            get_session_state,
            // Window commands
            open_entry_window,
            open_settings_window,
            open_about_window,
            // Editor and settings commands
            editor_edit,
            editor_generate_password,
            editor_save,
            editor_delete,
            editor_state,
            editor_entry,
            set_option,
            // Vault data commands
            list_groups,
            list_entries,
            list_favorites,
            search_entries,
            create_entry,
            delete_entries,
            get_kdf_info,
            upgrade_kdf,
            check_breached_passwords,
            // Engine commands
            check_backend_health,
            get_data_dir,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
