use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::campaign::Campaign;
use crate::domain::{CompletionNotice, ProcessingState, ProcessingStatus, Severity};
use crate::engine::AnalysisEngine;
use crate::error::KiraError;
use crate::settings::ProcessingSettings;
use crate::state::StateStore;

pub const SUCCESS_MESSAGE: &str =
    "Data has been processed successfully! You can now go to results";

/// Runs the analysis engine on a background thread.
///
/// `IDLE -> PROCESSING -> DATA_READY -> IDLE`. Callers learn about completion
/// only by calling [`ProcessingOrchestrator::poll`]; there is no blocking
/// wait. A started worker cannot be cancelled, and an engine call that never
/// returns leaves the status in `PROCESSING`.
pub struct ProcessingOrchestrator<E: AnalysisEngine> {
    state: Arc<StateStore>,
    engine: Arc<E>,
}

impl<E: AnalysisEngine> Clone for ProcessingOrchestrator<E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E: AnalysisEngine> ProcessingOrchestrator<E> {
    pub fn new(state: Arc<StateStore>, engine: E) -> Self {
        Self {
            state,
            engine: Arc::new(engine),
        }
    }

    pub fn status(&self) -> Arc<ProcessingStatus> {
        self.state.processing_status()
    }

    /// Starts processing the whole campaign. Returns [`KiraError::Busy`] and
    /// changes nothing unless the status is `IDLE`. The handle may be dropped.
    pub fn start(&self, settings: ProcessingSettings) -> Result<JoinHandle<()>, KiraError> {
        let claimed = self.state.transition_processing_status(|status| {
            (status.state == ProcessingState::Idle).then(ProcessingStatus::processing)
        });
        if claimed.is_none() {
            debug!("processing already running; start ignored");
            return Err(KiraError::Busy);
        }

        let state = Arc::clone(&self.state);
        let engine = Arc::clone(&self.engine);
        let spawned = thread::Builder::new()
            .name("campaign-worker".to_string())
            .spawn(move || run_worker(&state, engine.as_ref(), settings));

        spawned.map_err(|err| {
            error!("failed to spawn campaign worker: {err}");
            let message = format!("Could not start processing: {err}");
            self.state
                .set_processing_status(ProcessingStatus::data_ready(message, Severity::Error));
            KiraError::Worker(err.to_string())
        })
    }

    /// Hands out the completion notice once: `DATA_READY` becomes `IDLE`.
    /// Never blocks.
    pub fn poll(&self) -> Option<CompletionNotice> {
        self.state
            .transition_processing_status(|status| {
                (status.state == ProcessingState::DataReady).then(|| status.acknowledged())
            })
            .map(|finished| CompletionNotice {
                message: finished.message,
                severity: finished.severity,
            })
    }

    /// Processes one chromatogram on the calling thread against an isolated
    /// copy. The shared campaign and the status are not touched.
    pub fn process_preview(
        &self,
        settings: &ProcessingSettings,
        idx: usize,
    ) -> Result<Campaign, KiraError> {
        let preview = self.state.campaign().isolated(idx)?;
        debug!(chromatogram = idx, "processing preview");
        self.engine.process_single(preview, settings)
    }
}

fn run_worker<E: AnalysisEngine>(state: &StateStore, engine: &E, settings: ProcessingSettings) {
    let snapshot = state.campaign();
    info!(chromatograms = snapshot.len(), "campaign processing started");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        engine.process_all(Campaign::clone(&snapshot), &settings)
    }));

    let status = match outcome {
        Ok(Ok(processed)) => {
            state.set_campaign(processed);
            info!("campaign processing finished");
            ProcessingStatus::data_ready(SUCCESS_MESSAGE, Severity::Info)
        }
        Ok(Err(err)) => {
            warn!("campaign processing failed: {err}");
            ProcessingStatus::data_ready(err.to_string(), Severity::Error)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("analysis engine panicked: {message}");
            ProcessingStatus::data_ready(
                format!("analysis failed unexpectedly: {message}"),
                Severity::Error,
            )
        }
    };
    state.set_processing_status(status);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
