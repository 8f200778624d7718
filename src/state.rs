use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::campaign::Campaign;
use crate::domain::{CachedFile, FileId, ProcessingState, ProcessingStatus};
use crate::error::KiraError;

pub type FileRegistry = BTreeMap<FileId, CachedFile>;

/// One independently guarded value. Readers get a snapshot `Arc`; writers
/// swap the whole value, so a reader sees either the old or the new one.
#[derive(Debug)]
struct Slot<T> {
    value: RwLock<Arc<T>>,
}

impl<T> Slot<T> {
    fn new(value: T) -> Self {
        Self {
            value: RwLock::new(Arc::new(value)),
        }
    }

    fn get(&self) -> Arc<T> {
        Arc::clone(&*self.value.read())
    }

    fn set(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        *self.value.write() = Arc::clone(&value);
        value
    }

    /// Read-modify-write under the write lock. `f` returns the replacement
    /// (if any) and a result for the caller.
    fn modify<R>(&self, f: impl FnOnce(&T) -> (Option<T>, R)) -> R {
        let mut guard = self.value.write();
        let (next, result) = f(&guard);
        if let Some(next) = next {
            *guard = Arc::new(next);
        }
        result
    }
}

/// Process-wide session state: one campaign, one file registry, one
/// processing status. Each key is atomic on its own; there are no
/// transactions spanning keys.
#[derive(Debug)]
pub struct StateStore {
    campaign: Slot<Campaign>,
    files: Slot<FileRegistry>,
    current_blank: Slot<Option<FileId>>,
    processing_status: Slot<ProcessingStatus>,
    displayed_chromatogram: Slot<Option<usize>>,
}

impl StateStore {
    /// Populates the defaults: empty campaign and registry, no blank, idle.
    pub fn new() -> Self {
        debug!("initialising session state");
        Self {
            campaign: Slot::new(Campaign::new()),
            files: Slot::new(FileRegistry::new()),
            current_blank: Slot::new(None),
            processing_status: Slot::new(ProcessingStatus::idle()),
            displayed_chromatogram: Slot::new(None),
        }
    }

    pub fn campaign(&self) -> Arc<Campaign> {
        self.campaign.get()
    }

    /// Replaces the campaign and returns the committed snapshot.
    pub fn set_campaign(&self, campaign: Campaign) -> Arc<Campaign> {
        debug!(chromatograms = campaign.len(), "replacing campaign");
        self.campaign.set(campaign)
    }

    /// Replaces the campaign unless a background run owns it. The status
    /// slot stays locked for the whole swap, so no run can start in between.
    pub fn set_campaign_unless_processing(
        &self,
        campaign: Campaign,
    ) -> Result<Arc<Campaign>, KiraError> {
        self.processing_status.modify(|status| {
            if status.state == ProcessingState::Processing {
                return (None, Err(KiraError::Busy));
            }
            (None, Ok(self.set_campaign(campaign)))
        })
    }

    pub fn cached_files(&self) -> Arc<FileRegistry> {
        self.files.get()
    }

    pub fn set_cached_files(&self, files: FileRegistry) {
        self.files.set(files);
    }

    pub(crate) fn modify_cached_files<R>(
        &self,
        f: impl FnOnce(&FileRegistry) -> (Option<FileRegistry>, R),
    ) -> R {
        self.files.modify(f)
    }

    pub fn current_blank(&self) -> Option<FileId> {
        *self.current_blank.get()
    }

    pub fn set_current_blank(&self, id: Option<FileId>) {
        self.current_blank.set(id);
    }

    pub fn processing_status(&self) -> Arc<ProcessingStatus> {
        self.processing_status.get()
    }

    pub fn set_processing_status(&self, status: ProcessingStatus) {
        debug!(state = %status.state, "processing status changed");
        self.processing_status.set(status);
    }

    /// Replaces the status only when `f` returns a new one; returns the status
    /// that was replaced.
    pub fn transition_processing_status(
        &self,
        f: impl FnOnce(&ProcessingStatus) -> Option<ProcessingStatus>,
    ) -> Option<ProcessingStatus> {
        self.processing_status.modify(|current| {
            let next = f(current);
            let previous = next.as_ref().map(|next| {
                debug!(from = %current.state, to = %next.state, "processing status transition");
                current.clone()
            });
            (next, previous)
        })
    }

    pub fn displayed_chromatogram(&self) -> Option<usize> {
        *self.displayed_chromatogram.get()
    }

    pub fn set_displayed_chromatogram(&self, idx: Option<usize>) {
        self.displayed_chromatogram.set(idx);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
