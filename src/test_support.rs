// Vault Desktop - Test Support
// In-memory window runtime and backend engine for exercising the coordination core

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::backend::{BreachedEntry, EntryData, GroupData, KdfInfo, PasswordOptions, VaultBackend};
use crate::bus::{EventBus, SessionEvent, Subscription};
use crate::config::{CoordinatorConfig, MemoryStore};
use crate::coordinator::{Coordinator, WindowContext};
use crate::error::{BackendError, RuntimeError};
use crate::negotiator::CloseNegotiator;
use crate::window::{WindowLabel, WindowRegistry, WindowRuntime, WindowSpec};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Window runtime
// ============================================================================

#[derive(Default)]
struct RuntimeState {
    live: BTreeSet<WindowLabel>,
    hidden: HashSet<WindowLabel>,
    titles: HashMap<WindowLabel, String>,
    creates: HashMap<WindowLabel, usize>,
    focuses: HashMap<WindowLabel, usize>,
    destroys: HashMap<WindowLabel, usize>,
    failing: HashSet<WindowLabel>,
    undying: HashSet<WindowLabel>,
    create_delay: Option<Duration>,
}

/// Starts with only the main window live
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let mut state = RuntimeState::default();
        state.live.insert(WindowLabel::main());
        Self {
            state: Mutex::new(state),
        }
    }

    /// A window that exists without the registry having opened it
    pub fn add_window(&self, label: &str) {
        lock(&self.state).live.insert(WindowLabel::from(label));
    }

    pub fn set_create_delay(&self, delay: Duration) {
        lock(&self.state).create_delay = Some(delay);
    }

    pub fn fail_creation_of(&self, label: &str) {
        lock(&self.state).failing.insert(WindowLabel::from(label));
    }

    /// `destroy` reports success but the window stays live
    pub fn survive_destroy_of(&self, label: &str) {
        lock(&self.state).undying.insert(WindowLabel::from(label));
    }

    pub fn create_count(&self, label: &WindowLabel) -> usize {
        lock(&self.state).creates.get(label).copied().unwrap_or(0)
    }

    pub fn focus_count(&self, label: &WindowLabel) -> usize {
        lock(&self.state).focuses.get(label).copied().unwrap_or(0)
    }

    pub fn destroy_count(&self, label: &WindowLabel) -> usize {
        lock(&self.state).destroys.get(label).copied().unwrap_or(0)
    }

    pub fn is_live(&self, label: &WindowLabel) -> bool {
        lock(&self.state).live.contains(label)
    }

    pub fn is_hidden(&self, label: &WindowLabel) -> bool {
        lock(&self.state).hidden.contains(label)
    }

    pub fn title(&self, label: &WindowLabel) -> Option<String> {
        lock(&self.state).titles.get(label).cloned()
    }

    pub fn live_labels_now(&self) -> Vec<WindowLabel> {
        lock(&self.state).live.iter().cloned().collect()
    }

    fn require_live(&self, label: &WindowLabel) -> Result<(), RuntimeError> {
        if self.is_live(label) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(label.clone()))
        }
    }
}

#[async_trait]
impl WindowRuntime for FakeRuntime {
    async fn live_labels(&self) -> Vec<WindowLabel> {
        self.live_labels_now()
    }

    async fn exists(&self, label: &WindowLabel) -> bool {
        self.is_live(label)
    }

    async fn create(&self, spec: &WindowSpec) -> Result<(), RuntimeError> {
        let delay = lock(&self.state).create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = lock(&self.state);
        if state.failing.contains(&spec.label) {
            return Err(RuntimeError::Rejected("webview creation failed".to_string()));
        }
        *state.creates.entry(spec.label.clone()).or_default() += 1;
        state.titles.insert(spec.label.clone(), spec.title.clone());
        state.live.insert(spec.label.clone());
        Ok(())
    }

    async fn focus(&self, label: &WindowLabel) -> Result<(), RuntimeError> {
        self.require_live(label)?;
        let mut state = lock(&self.state);
        state.hidden.remove(label);
        *state.focuses.entry(label.clone()).or_default() += 1;
        Ok(())
    }

    async fn destroy(&self, label: &WindowLabel) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        *state.destroys.entry(label.clone()).or_default() += 1;
        if state.undying.contains(label) && state.live.contains(label) {
            return Ok(());
        }
        if state.live.remove(label) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(label.clone()))
        }
    }

    async fn hide(&self, label: &WindowLabel) -> Result<(), RuntimeError> {
        self.require_live(label)?;
        lock(&self.state).hidden.insert(label.clone());
        Ok(())
    }

    async fn set_title(&self, label: &WindowLabel, title: &str) -> Result<(), RuntimeError> {
        self.require_live(label)?;
        lock(&self.state)
            .titles
            .insert(label.clone(), title.to_string());
        Ok(())
    }
}

// ============================================================================
// Backend engine
// ============================================================================

#[derive(Default)]
struct BackendState {
    entries: BTreeMap<String, EntryData>,
    external_changes: bool,
    fail_opens: Option<String>,
    fail_saves: Option<String>,
    fail_updates: Option<String>,
    fail_deletes: HashSet<String>,
    stall_change_checks: bool,
    saves: usize,
    merges: usize,
    closes: usize,
    updates: usize,
}

pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn unlocked() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
        }
    }

    pub fn insert_entry(&self, group_uuid: &str, uuid: &str, title: &str) {
        lock(&self.state).entries.insert(
            uuid.to_string(),
            EntryData {
                uuid: uuid.to_string(),
                title: title.to_string(),
                username: "alice".to_string(),
                password: "hunter2".to_string(),
                group_uuid: group_uuid.to_string(),
                ..Default::default()
            },
        );
    }

    pub fn entry(&self, uuid: &str) -> Option<EntryData> {
        lock(&self.state).entries.get(uuid).cloned()
    }

    pub fn fail_opens_with(&self, message: &str) {
        lock(&self.state).fail_opens = Some(message.to_string());
    }

    pub fn fail_saves_with(&self, message: &str) {
        lock(&self.state).fail_saves = Some(message.to_string());
    }

    pub fn fail_updates_with(&self, message: &str) {
        lock(&self.state).fail_updates = Some(message.to_string());
    }

    pub fn fail_deletes_of(&self, uuid: &str) {
        lock(&self.state).fail_deletes.insert(uuid.to_string());
    }

    /// `check_database_changes` never answers, like a hung engine
    pub fn stall_change_checks(&self) {
        lock(&self.state).stall_change_checks = true;
    }

    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.fail_opens = None;
        state.fail_saves = None;
        state.fail_updates = None;
        state.fail_deletes.clear();
        state.stall_change_checks = false;
    }

    /// Pretend another program modified the database file
    pub fn set_external_changes(&self, changed: bool) {
        lock(&self.state).external_changes = changed;
    }

    pub fn save_calls(&self) -> usize {
        lock(&self.state).saves
    }

    pub fn merge_calls(&self) -> usize {
        lock(&self.state).merges
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.state).closes
    }

    pub fn update_calls(&self) -> usize {
        lock(&self.state).updates
    }

    fn root_group() -> GroupData {
        GroupData {
            uuid: "root".to_string(),
            name: "Root".to_string(),
            parent_uuid: None,
            children: vec![GroupData {
                uuid: "g1".to_string(),
                name: "General".to_string(),
                parent_uuid: Some("root".to_string()),
                ..Default::default()
            }],
            icon_id: None,
        }
    }
}

#[async_trait]
impl VaultBackend for FakeBackend {
    async fn open_session(&self, _path: &str, _password: &str) -> Result<GroupData, BackendError> {
        if let Some(message) = lock(&self.state).fail_opens.clone() {
            return Err(BackendError::new("open_session", message));
        }
        Ok(Self::root_group())
    }

    async fn close_session(&self) -> Result<(), BackendError> {
        lock(&self.state).closes += 1;
        Ok(())
    }

    async fn save_session(&self) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if let Some(message) = state.fail_saves.clone() {
            return Err(BackendError::new("save_session", message));
        }
        state.saves += 1;
        Ok(())
    }

    async fn check_database_changes(&self) -> Result<bool, BackendError> {
        let (stalled, changed) = {
            let state = lock(&self.state);
            (state.stall_change_checks, state.external_changes)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(changed)
    }

    async fn merge_database(&self) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        state.merges += 1;
        state.external_changes = false;
        Ok(())
    }

    async fn list_groups(&self) -> Result<GroupData, BackendError> {
        Ok(Self::root_group())
    }

    async fn list_entries(&self, group_uuid: &str) -> Result<Vec<EntryData>, BackendError> {
        Ok(lock(&self.state)
            .entries
            .values()
            .filter(|entry| entry.group_uuid == group_uuid)
            .cloned()
            .collect())
    }

    async fn get_entry(&self, entry_uuid: &str) -> Result<EntryData, BackendError> {
        self.entry(entry_uuid)
            .ok_or_else(|| BackendError::new("get_entry", "entry not found"))
    }

    async fn create_entry(&self, entry: &EntryData) -> Result<(), BackendError> {
        lock(&self.state)
            .entries
            .insert(entry.uuid.clone(), entry.clone());
        Ok(())
    }

    async fn update_entry(&self, entry: &EntryData) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if let Some(message) = state.fail_updates.clone() {
            return Err(BackendError::new("update_entry", message));
        }
        state.updates += 1;
        state.entries.insert(entry.uuid.clone(), entry.clone());
        Ok(())
    }

    async fn delete_entry(&self, entry_uuid: &str) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if state.fail_deletes.contains(entry_uuid) {
            return Err(BackendError::new("delete_entry", "entry is locked"));
        }
        state
            .entries
            .remove(entry_uuid)
            .map(|_| ())
            .ok_or_else(|| BackendError::new("delete_entry", "entry not found"))
    }

    async fn list_favorites(&self) -> Result<Vec<EntryData>, BackendError> {
        Ok(lock(&self.state)
            .entries
            .values()
            .filter(|entry| entry.is_favorite)
            .cloned()
            .collect())
    }

    async fn search(&self, query: &str) -> Result<Vec<EntryData>, BackendError> {
        let query = query.to_lowercase();
        Ok(lock(&self.state)
            .entries
            .values()
            .filter(|entry| entry.title.to_lowercase().contains(&query))
            .cloned()
            .collect())
    }

    async fn generate_password(&self, options: PasswordOptions) -> Result<String, BackendError> {
        let alphabet = if options.use_symbols { "Aa1!" } else { "Aa1" };
        Ok(alphabet.chars().cycle().take(options.length).collect())
    }

    async fn kdf_info(&self) -> Result<KdfInfo, BackendError> {
        Ok(KdfInfo {
            kdf_type: "Argon2id".to_string(),
            is_weak: false,
            iterations: Some(3),
            memory: Some(64 * 1024 * 1024),
            parallelism: Some(4),
        })
    }

    async fn upgrade_kdf(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn check_breached_passwords(&self) -> Result<Vec<BreachedEntry>, BackendError> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub backend: Arc<FakeBackend>,
    pub settings: Arc<MemoryStore>,
    pub bus: EventBus,
    pub config: CoordinatorConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            runtime: Arc::new(FakeRuntime::new()),
            backend: Arc::new(FakeBackend::unlocked()),
            settings: Arc::new(MemoryStore::new()),
            bus: EventBus::default(),
            config: CoordinatorConfig {
                close_ack_timeout: Duration::from_secs(2),
                settle_interval: Duration::from_millis(50),
                ..CoordinatorConfig::default()
            },
        }
    }

    pub fn context(&self) -> WindowContext {
        WindowContext {
            runtime: self.runtime.clone(),
            backend: self.backend.clone(),
            settings: self.settings.clone(),
            bus: self.bus.clone(),
            config: self.config.clone(),
        }
    }

    pub fn registry(&self) -> WindowRegistry {
        WindowRegistry::new(self.context())
    }

    pub fn negotiator(&self, registry: Arc<WindowRegistry>) -> CloseNegotiator {
        CloseNegotiator::new(
            registry,
            self.runtime.clone(),
            self.bus.clone(),
            self.config.close_ack_timeout,
            self.config.settle_interval,
        )
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::start(self.context())
    }

    pub async fn next_event(&self, subscription: &mut Subscription) -> SessionEvent {
        timeout(EVENT_TIMEOUT, subscription.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event bus closed")
    }

    /// `None` when nothing arrives within a short quiet period
    pub async fn try_next_event(&self, subscription: &mut Subscription) -> Option<SessionEvent> {
        timeout(QUIET_PERIOD, subscription.recv()).await.ok().flatten()
    }

    /// Let spawned actors drain their queues
    pub async fn settle(&self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
