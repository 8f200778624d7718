use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::Serialize;
use tracing::{debug, info};

use crate::builder::{BuildOutcome, CampaignBuilder};
use crate::cache::{FileCache, decode_upload};
use crate::campaign::Campaign;
use crate::codec::PersistenceCodec;
use crate::config::SessionConfig;
use crate::domain::{
    CachedFile, CompletionNotice, FileId, ProcessingState, ProcessingStatus, Severity, TableRow,
    UploadTable,
};
use crate::engine::AnalysisEngine;
use crate::error::KiraError;
use crate::orchestrator::ProcessingOrchestrator;
use crate::settings::ProcessingSettings;
use crate::state::StateStore;

/// A user-facing message with its severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub message: String,
    pub severity: Severity,
}

impl Notice {
    fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfirmResult {
    pub outcome: BuildOutcome,
    pub notice: Notice,
}

/// All request-level operations of the data, process and results pages,
/// wired to one shared state store.
pub struct Session<E: AnalysisEngine> {
    state: Arc<StateStore>,
    cache: FileCache,
    builder: CampaignBuilder,
    codec: PersistenceCodec,
    orchestrator: ProcessingOrchestrator<E>,
}

impl<E: AnalysisEngine> Session<E> {
    /// Initialises the state defaults and the cache directory.
    pub fn init(config: &SessionConfig, engine: E) -> Result<Self, KiraError> {
        let state = Arc::new(StateStore::new());
        let cache =
            FileCache::with_id_ceiling(config.cache_dir.clone(), Arc::clone(&state), config.id_ceiling);
        cache.init()?;
        info!(cache_dir = %config.cache_dir, "session initialised");
        Ok(Self {
            builder: CampaignBuilder::new(Arc::clone(&state), cache.clone()),
            codec: PersistenceCodec::with_float_digits(
                Arc::clone(&state),
                cache.clone(),
                config.float_digits,
            ),
            orchestrator: ProcessingOrchestrator::new(Arc::clone(&state), engine),
            state,
            cache,
        })
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    pub fn campaign(&self) -> Arc<Campaign> {
        self.state.campaign()
    }

    // Data page

    /// Caches an uploaded blank and makes it the blank for further samples.
    pub fn upload_blank(&self, name: &str, payload: &str) -> Result<CachedFile, KiraError> {
        let id = self.cache.save(name, payload)?;
        self.state.set_current_blank(Some(id));
        self.cache.get(id)
    }

    pub fn current_blank(&self) -> Result<Option<CachedFile>, KiraError> {
        self.state
            .current_blank()
            .map(|id| self.cache.get(id))
            .transpose()
    }

    /// Caches uploaded samples (in name order) and appends one pending row per
    /// file to `rows`, each named `Sample N` with the first unused `N`.
    pub fn upload_samples(
        &self,
        files: &[(String, String)],
        rows: &mut Vec<TableRow>,
    ) -> Result<Notice, KiraError> {
        let mut files: Vec<&(String, String)> = files.iter().collect();
        files.sort();
        for (name, payload) in files {
            let blank = self.current_blank()?;
            let sample_id = self.cache.save(name, payload)?;
            let row = TableRow {
                chromatogram_id: None,
                sample_file_id: Some(sample_id),
                blank_file_id: blank.as_ref().map(|blank| blank.id),
                name: next_sample_name(rows),
                sample: name.clone(),
                blank: blank.map(|blank| blank.original_name),
                compound_name: None,
                compound_conc: None,
                istd_conc: None,
            };
            debug!(sample = %name, row = %row.name, "added sample row");
            rows.push(row);
        }
        Ok(Notice::new("Don't forget to confirm the changes!", Severity::Warn))
    }

    /// Replaces the campaign with the edited table. Refused while a
    /// background run owns the campaign.
    pub fn confirm(&self, table: &UploadTable) -> Result<ConfirmResult, KiraError> {
        if self.state.processing_status().state == ProcessingState::Processing {
            return Err(KiraError::Busy);
        }
        let outcome = self.builder.build(&table.rows, table.istd.as_deref())?;
        let notice = if outcome.campaign.is_empty() {
            Notice::new(
                "Campaign updated successfully, but there aren't any HPLC data!",
                Severity::Warn,
            )
        } else if !outcome.warnings.is_empty() {
            Notice::new(outcome.warnings.join(" "), Severity::Warn)
        } else {
            Notice::new(
                "Campaign updated successfully! You can now process your data",
                Severity::Info,
            )
        };
        Ok(ConfirmResult { outcome, notice })
    }

    /// The table describing the confirmed campaign, dropping unconfirmed edits.
    pub fn upload_table(&self) -> UploadTable {
        self.state.campaign().upload_table()
    }

    pub fn export_campaign(&self) -> Result<CachedFile, KiraError> {
        self.codec.export()
    }

    /// Caches and imports an uploaded campaign export.
    pub fn upload_campaign(&self, name: &str, payload: &str) -> Result<UploadTable, KiraError> {
        let id = self.cache.save(name, payload)?;
        self.codec.import(id)?;
        Ok(self.upload_table())
    }

    pub fn import_campaign(&self, id: FileId) -> Result<UploadTable, KiraError> {
        self.codec.import(id)?;
        Ok(self.upload_table())
    }

    // Process page

    /// Settings for the form: stored ones (or defaults) clipped to the data.
    pub fn settings(&self) -> ProcessingSettings {
        let campaign = self.state.campaign();
        campaign
            .settings
            .unwrap_or_default()
            .clamped_to(&campaign)
    }

    pub fn export_settings(&self, settings: &ProcessingSettings) -> Result<String, KiraError> {
        settings.to_text()
    }

    pub fn import_settings(&self, payload: &str) -> Result<ProcessingSettings, KiraError> {
        let text = if payload.contains(";base64,") {
            let bytes = decode_upload(payload)?;
            String::from_utf8(bytes).map_err(|err| KiraError::Decode(err.to_string()))?
        } else {
            payload.to_string()
        };
        ProcessingSettings::from_text(&text)
    }

    pub fn start_processing(
        &self,
        settings: ProcessingSettings,
    ) -> Result<JoinHandle<()>, KiraError> {
        settings.validate()?;
        self.orchestrator.start(settings)
    }

    pub fn poll_processing(&self) -> Option<CompletionNotice> {
        self.orchestrator.poll()
    }

    pub fn processing_status(&self) -> Arc<ProcessingStatus> {
        self.orchestrator.status()
    }

    pub fn preview(
        &self,
        settings: &ProcessingSettings,
        idx: Option<usize>,
    ) -> Result<Campaign, KiraError> {
        let idx = idx.ok_or_else(|| {
            KiraError::Validation("Please select which sample should be analysed!".to_string())
        })?;
        self.orchestrator.process_preview(settings, idx)
    }

    // Results page

    pub fn select_chromatogram(&self, idx: Option<usize>) -> Result<(), KiraError> {
        if let Some(idx) = idx {
            if !self.state.campaign().chromatograms.contains_key(&idx) {
                return Err(KiraError::ChromatogramNotFound(idx));
            }
        }
        self.state.set_displayed_chromatogram(idx);
        Ok(())
    }

    pub fn displayed_chromatogram(&self) -> Option<usize> {
        self.state.displayed_chromatogram()
    }
}

fn next_sample_name(rows: &[TableRow]) -> String {
    let taken: HashSet<&str> = rows.iter().map(|row| row.name.as_str()).collect();
    (1..)
        .map(|n| format!("Sample {n}"))
        .find(|name| !taken.contains(name.as_str()))
        .unwrap_or_default()
}
