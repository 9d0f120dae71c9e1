// Vault Desktop - Dirty-State Tracking
// Unsaved-change flags and the only code paths allowed to clear them

use std::sync::Arc;

use thiserror::Error;

use crate::backend::{EntryData, VaultBackend};
use crate::error::{BackendError, CoordinatorError};

/// Receipt for a persist the backend confirmed. Only this module can mint
/// one, so a flag can never be cleared ahead of (or without) the backend.
#[derive(Debug)]
pub struct Persisted {
    _confirmed: (),
}

impl Persisted {
    fn confirmed() -> Self {
        Self { _confirmed: () }
    }
}

/// "Has unsaved changes", owned by exactly one window
#[derive(Debug, Default)]
pub struct DirtyFlag {
    dirty: bool,
}

impl DirtyFlag {
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true when the flag flipped from clean to dirty
    pub fn mark_dirty(&mut self) -> bool {
        !std::mem::replace(&mut self.dirty, true)
    }

    /// Returns true when the flag flipped from dirty to clean
    pub fn clear_dirty(&mut self, _receipt: Persisted) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Drop unsaved state without persisting. Callers must already hold the
    /// user's consent (a Discard answer) or an explicit policy for it.
    pub fn discard(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SaveError {
    #[error("the database file was changed outside this session")]
    Conflict,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<SaveError> for CoordinatorError {
    fn from(err: SaveError) -> Self {
        match err {
            SaveError::Backend(err) => CoordinatorError::BackendCallFailed(err),
            SaveError::Conflict => CoordinatorError::Validation(SaveError::Conflict.to_string()),
        }
    }
}

/// Whole-database persistence for the main window
#[derive(Clone)]
pub struct SaveCoordinator {
    backend: Arc<dyn VaultBackend>,
}

impl SaveCoordinator {
    pub fn new(backend: Arc<dyn VaultBackend>) -> Self {
        Self { backend }
    }

    /// Persist and clear the aggregate flag. A failed save leaves the flag
    /// exactly as it was.
    pub async fn save(&self, flag: &mut DirtyFlag) -> Result<(), SaveError> {
        let receipt = self.persist(true).await?;
        flag.clear_dirty(receipt);
        Ok(())
    }

    /// Persist without conflict detection (user chose to overwrite)
    pub async fn overwrite(&self, flag: &mut DirtyFlag) -> Result<(), SaveError> {
        let receipt = self.persist(false).await?;
        flag.clear_dirty(receipt);
        Ok(())
    }

    /// Merge external changes first, then persist the merged result
    pub async fn synchronize(&self, flag: &mut DirtyFlag) -> Result<(), SaveError> {
        self.backend.merge_database().await?;
        flag.mark_dirty();
        self.overwrite(flag).await
    }

    async fn persist(&self, check_conflicts: bool) -> Result<Persisted, SaveError> {
        if check_conflicts && self.backend.check_database_changes().await? {
            log::warn!("[Save] Database changed on disk, not overwriting");
            return Err(SaveError::Conflict);
        }
        self.backend.save_session().await?;
        log::info!("[Save] Database saved");
        Ok(Persisted::confirmed())
    }
}

/// Per-entry persistence for an editor window
pub async fn persist_entry(
    backend: &dyn VaultBackend,
    entry: &EntryData,
) -> Result<Persisted, BackendError> {
    backend.update_entry(entry).await?;
    Ok(Persisted::confirmed())
}
