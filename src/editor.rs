// Vault Desktop - Entry Draft
// Field-level editing of one entry and the checks a draft must pass before saving

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::backend::EntryData;
use crate::error::CoordinatorError;

/// Editable fields of an entry, as the editor webview names them
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DraftField {
    Title,
    Username,
    Password,
    RepeatPassword,
    Url,
    Notes,
    Tags,
    IconId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDraft {
    pub title: String,
    pub username: String,
    pub password: String,
    pub repeat_password: String,
    pub url: String,
    pub notes: String,
    pub tags: String,
    pub icon_id: Option<usize>,
}

impl EntryDraft {
    pub fn from_entry(entry: &EntryData) -> Self {
        Self {
            title: entry.title.clone(),
            username: entry.username.clone(),
            password: entry.password.clone(),
            repeat_password: String::new(),
            url: entry.url.clone(),
            notes: entry.notes.clone(),
            tags: entry.tags.clone(),
            icon_id: entry.icon_id,
        }
    }

    pub fn set(&mut self, field: DraftField, value: &str) -> Result<(), CoordinatorError> {
        match field {
            DraftField::Title => self.title = value.to_string(),
            DraftField::Username => self.username = value.to_string(),
            DraftField::Password => self.password = value.to_string(),
            DraftField::RepeatPassword => self.repeat_password = value.to_string(),
            DraftField::Url => self.url = value.to_string(),
            DraftField::Notes => self.notes = value.to_string(),
            DraftField::Tags => self.tags = value.to_string(),
            DraftField::IconId => {
                let icon = value
                    .trim()
                    .parse()
                    .map_err(|_| CoordinatorError::Validation(format!("invalid icon id: {}", value)))?;
                self.icon_id = Some(icon);
            }
        }
        Ok(())
    }

    /// Fill both password fields, as a generated password does
    pub fn set_generated_password(&mut self, password: String) {
        self.repeat_password = password.clone();
        self.password = password;
    }

    /// Whether the draft differs from the persisted entry. The repeat field
    /// is not part of the entry and never counts on its own.
    pub fn differs_from(&self, entry: &EntryData) -> bool {
        self.title != entry.title
            || self.username != entry.username
            || self.password != entry.password
            || self.url != entry.url
            || self.notes != entry.notes
            || self.tags != entry.tags
            || self.icon_id != entry.icon_id
    }

    pub fn validate(&self) -> Result<(), CoordinatorError> {
        validate_url(&self.url)?;
        if !self.password.is_empty()
            && !self.repeat_password.is_empty()
            && self.password != self.repeat_password
        {
            return Err(CoordinatorError::Validation(
                "passwords don't match".to_string(),
            ));
        }
        Ok(())
    }

    /// The entry to persist: the loaded one with the draft's fields applied.
    /// Identity (uuid, group) always comes from the loaded entry.
    pub fn apply_to(&self, entry: &EntryData) -> EntryData {
        EntryData {
            title: self.title.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            url: self.url.clone(),
            notes: self.notes.clone(),
            tags: self.tags.clone(),
            icon_id: self.icon_id,
            ..entry.clone()
        }
    }
}

/// An empty URL is valid. Anything else must name a host: localhost, an IP
/// address, or a dotted domain with at least one letter. A missing scheme is
/// read as https.
pub fn validate_url(raw: &str) -> Result<(), CoordinatorError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }
    let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };
    let invalid = |reason: &str| CoordinatorError::Validation(reason.to_string());

    let parsed = Url::parse(&candidate).map_err(|_| invalid("invalid URL format"))?;
    let domain = match parsed.host() {
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => return Ok(()),
        Some(Host::Domain(domain)) => domain.to_string(),
        None => return Err(invalid("invalid URL format")),
    };
    if domain == "localhost" {
        return Ok(());
    }
    if !domain.contains('.') {
        return Err(invalid("URL must be a valid domain (e.g., example.com)"));
    }
    if !domain.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(invalid("domain must contain at least one letter"));
    }
    let well_formed = domain.split('.').all(|part| {
        !part.is_empty()
            && !part.starts_with('-')
            && !part.ends_with('-')
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if !well_formed {
        return Err(invalid("invalid domain format"));
    }
    Ok(())
}
