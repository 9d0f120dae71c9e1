// Vault Desktop - Backend Engine Interface
// Request/response calls to the encrypted-database engine, plus its HTTP transport

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::BackendError;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomField {
    pub name: String,
    pub value: String,
    pub protected: bool,
}

/// One credential record, as the engine returns it
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryData {
    pub uuid: String,
    pub title: String,
    pub username: String,
    pub password: String,
    pub url: String,
    pub notes: String,
    pub tags: String,
    pub group_uuid: String,
    #[serde(default)]
    pub icon_id: Option<usize>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub expiry_time: Option<String>,
    #[serde(default)]
    pub expires: bool,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupData {
    pub uuid: String,
    pub name: String,
    pub parent_uuid: Option<String>,
    #[serde(default)]
    pub children: Vec<GroupData>,
    #[serde(default)]
    pub icon_id: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfInfo {
    pub kdf_type: String,
    pub is_weak: bool,
    pub iterations: Option<u64>,
    pub memory: Option<u64>,
    pub parallelism: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreachedEntry {
    pub uuid: String,
    pub title: String,
    pub username: String,
    pub breach_count: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasswordOptions {
    pub length: usize,
    pub use_uppercase: bool,
    pub use_lowercase: bool,
    pub use_numbers: bool,
    pub use_symbols: bool,
}

impl PasswordOptions {
    /// Named strength presets offered by the entry editor
    pub fn preset(strength: &str) -> Option<Self> {
        let (length, use_symbols) = match strength {
            "weak" => (8, false),
            "medium" => (12, true),
            "strong" => (16, true),
            "very-strong" => (20, true),
            "maximum" => (32, true),
            _ => return None,
        };
        Some(Self {
            length,
            use_uppercase: true,
            use_lowercase: true,
            use_numbers: true,
            use_symbols,
        })
    }
}

/// The encrypted-database engine. Every call may fail with a human-readable error.
#[async_trait]
pub trait VaultBackend: Send + Sync {
    async fn open_session(&self, path: &str, password: &str) -> Result<GroupData, BackendError>;
    async fn close_session(&self) -> Result<(), BackendError>;
    async fn save_session(&self) -> Result<(), BackendError>;
    /// True when the file on disk changed since it was loaded
    async fn check_database_changes(&self) -> Result<bool, BackendError>;
    async fn merge_database(&self) -> Result<(), BackendError>;

    async fn list_groups(&self) -> Result<GroupData, BackendError>;
    async fn list_entries(&self, group_uuid: &str) -> Result<Vec<EntryData>, BackendError>;
    async fn get_entry(&self, entry_uuid: &str) -> Result<EntryData, BackendError>;
    async fn create_entry(&self, entry: &EntryData) -> Result<(), BackendError>;
    async fn update_entry(&self, entry: &EntryData) -> Result<(), BackendError>;
    async fn delete_entry(&self, entry_uuid: &str) -> Result<(), BackendError>;
    async fn list_favorites(&self) -> Result<Vec<EntryData>, BackendError>;
    async fn search(&self, query: &str) -> Result<Vec<EntryData>, BackendError>;

    async fn generate_password(&self, options: PasswordOptions) -> Result<String, BackendError>;
    async fn kdf_info(&self) -> Result<KdfInfo, BackendError>;
    async fn upgrade_kdf(&self) -> Result<(), BackendError>;
    async fn check_breached_passwords(&self) -> Result<Vec<BreachedEntry>, BackendError>;
}

// ============================================================================
// HTTP transport
// ============================================================================

/// Health check response from the engine
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// `VaultBackend` over JSON-RPC style HTTP calls to a local engine
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpBackend {
    /// Every request, body included, is bounded by `request_timeout`
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::new("connect", format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn rpc_url(&self, operation: &str) -> String {
        format!("{}/rpc/{}", self.base_url, operation)
    }

    fn transport_error(&self, operation: &'static str, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            log::warn!("[Backend] {} timed out", operation);
            BackendError::new(
                operation,
                format!("engine did not answer within {:?}", self.request_timeout),
            )
        } else {
            BackendError::new(operation, format!("engine not reachable: {}", err))
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        args: serde_json::Value,
    ) -> Result<T, BackendError> {
        log::debug!("[Backend] -> {}", operation);
        let resp = self
            .client
            .post(self.rpc_url(operation))
            .json(&args)
            .send()
            .await
            .map_err(|e| self.transport_error(operation, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or_else(|_| format!("engine returned {}", status));
            log::warn!("[Backend] {} rejected: {}", operation, message);
            return Err(BackendError::new(operation, message));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| self.transport_error(operation, e))?;
        // Operations without a result may answer with an empty body
        let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &body
        };
        serde_json::from_slice(body)
            .map_err(|e| BackendError::new(operation, format!("invalid engine response: {}", e)))
    }

    /// Check health once (non-blocking)
    pub async fn check_health_once(&self) -> Option<HealthResponse> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .ok()?;

        match client.get(format!("{}/health", self.base_url)).send().await {
            Ok(resp) if resp.status().is_success() => resp.json::<HealthResponse>().await.ok(),
            _ => None,
        }
    }

    /// Wait for the engine to become healthy
    pub async fn wait_for_health(&self, timeout: Duration) -> anyhow::Result<HealthResponse> {
        let deadline = tokio::time::Instant::now() + timeout;
        log::info!("[Backend] Waiting for engine health at {}...", self.base_url);

        while tokio::time::Instant::now() < deadline {
            if let Some(health) = self.check_health_once().await {
                log::info!(
                    "[Backend] Engine is healthy! Status: {}, Version: {}",
                    health.status,
                    health.version
                );
                return Ok(health);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        anyhow::bail!("Engine health check timed out after {:?}", timeout)
    }
}

#[async_trait]
impl VaultBackend for HttpBackend {
    async fn open_session(&self, path: &str, password: &str) -> Result<GroupData, BackendError> {
        self.call("open_database", json!({ "path": path, "password": password }))
            .await
    }

    async fn close_session(&self) -> Result<(), BackendError> {
        self.call("close_database", json!({})).await
    }

    async fn save_session(&self) -> Result<(), BackendError> {
        self.call("save_database", json!({})).await
    }

    async fn check_database_changes(&self) -> Result<bool, BackendError> {
        self.call("check_database_changes", json!({})).await
    }

    async fn merge_database(&self) -> Result<(), BackendError> {
        self.call("merge_database", json!({})).await
    }

    async fn list_groups(&self) -> Result<GroupData, BackendError> {
        self.call("get_groups", json!({})).await
    }

    async fn list_entries(&self, group_uuid: &str) -> Result<Vec<EntryData>, BackendError> {
        self.call("get_entries", json!({ "groupUuid": group_uuid }))
            .await
    }

    async fn get_entry(&self, entry_uuid: &str) -> Result<EntryData, BackendError> {
        self.call("get_entry", json!({ "entryUuid": entry_uuid }))
            .await
    }

    async fn create_entry(&self, entry: &EntryData) -> Result<(), BackendError> {
        self.call("create_entry", json!({ "entry": entry })).await
    }

    async fn update_entry(&self, entry: &EntryData) -> Result<(), BackendError> {
        self.call("update_entry", json!({ "entry": entry })).await
    }

    async fn delete_entry(&self, entry_uuid: &str) -> Result<(), BackendError> {
        self.call("delete_entry", json!({ "entryUuid": entry_uuid }))
            .await
    }

    async fn list_favorites(&self) -> Result<Vec<EntryData>, BackendError> {
        self.call("get_favorite_entries", json!({})).await
    }

    async fn search(&self, query: &str) -> Result<Vec<EntryData>, BackendError> {
        self.call("search_entries", json!({ "query": query })).await
    }

    async fn generate_password(&self, options: PasswordOptions) -> Result<String, BackendError> {
        self.call("generate_password", json!(options)).await
    }

    async fn kdf_info(&self) -> Result<KdfInfo, BackendError> {
        self.call("get_kdf_info", json!({})).await
    }

    async fn upgrade_kdf(&self) -> Result<(), BackendError> {
        self.call("upgrade_kdf_parameters", json!({})).await
    }

    async fn check_breached_passwords(&self) -> Result<Vec<BreachedEntry>, BackendError> {
        self.call("check_breached_passwords", json!({})).await
    }
}
