//! High-level pipeline: orchestrates discover → dispatch → emit for one input directory.
//!
//! # Major Types
//! - [`BatchOrchestrator`]: built once from a provider, a dispatcher, an emitter and
//!   [`BatchSettings`]; nothing is global, so tests substitute any [`InferenceProvider`].
//! - [`BatchRun`]: the append-only record of one run, returned when every task resolved.
//!
//! # Responsibilities
//! - Fatal preconditions (credentials, empty batch when tasks are required, output
//!   directories) are checked before anything is dispatched.
//! - Every task is submitted at once; the dispatcher's semaphore bounds both file
//!   reads and provider calls.
//! - Outcomes are consumed in completion order by a single loop, which emits
//!   artifacts for successes and records every task exactly once.
//! - A failing file never aborts the batch.

use futures::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::contract::{Credentials, FileTask, InferenceProvider};
use crate::discovery::{self, DiscoveryError};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::emit::{EmitError, EmitReport, OutputEmitter};
use crate::prompts;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("missing provider credentials")]
    MissingCredentials,

    #[error("no files to process in {0}")]
    NoTasks(String),

    #[error("output directory unavailable: {0}")]
    OutputUnavailable(#[source] EmitError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Per-run settings the orchestrator needs to build requests.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub model_id: String,
    pub credentials: Credentials,
    /// Treat an empty task list as fatal instead of a no-op.
    pub require_tasks: bool,
}

/// Everything recorded about one task.
#[derive(Debug)]
pub struct FileRecord {
    pub task: FileTask,
    pub outcome: DispatchOutcome,
    /// Present only for successful tasks.
    pub artifacts: Option<EmitReport>,
}

#[derive(Debug)]
pub struct BatchRun {
    pub run_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One record per task, in completion order.
    pub records: Vec<FileRecord>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub wall_time_ms: u64,
}

impl BatchRun {
    fn new(total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            total,
            succeeded: 0,
            failed: 0,
            records: Vec::with_capacity(total),
            input_tokens: 0,
            output_tokens: 0,
            wall_time_ms: 0,
        }
    }

    fn record(&mut self, record: FileRecord) {
        match &record.outcome {
            DispatchOutcome::Success { response, .. } => {
                self.succeeded += 1;
                self.input_tokens += response.input_tokens;
                self.output_tokens += response.output_tokens;
            }
            DispatchOutcome::Failure { .. } => self.failed += 1,
        }
        self.records.push(record);
    }

    pub fn outcome_for(&self, path: &Path) -> Option<&DispatchOutcome> {
        self.records
            .iter()
            .find(|r| r.task.path == path)
            .map(|r| &r.outcome)
    }

    /// Successful tasks whose artifacts were not both written.
    pub fn incomplete_artifacts(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.artifacts.as_ref().is_some_and(|a| !a.is_complete()))
            .count()
    }

    pub fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            total = self.total,
            succeeded = self.succeeded,
            failed = self.failed,
            input_tokens = self.input_tokens,
            output_tokens = self.output_tokens,
            wall_time_ms = self.wall_time_ms,
            incomplete_artifacts = self.incomplete_artifacts(),
            "Batch complete"
        );
        for record in &self.records {
            if let DispatchOutcome::Failure {
                kind,
                message,
                attempts,
                ..
            } = &record.outcome
            {
                warn!(
                    file = %record.task.file_name(),
                    ?kind,
                    attempts,
                    error = %message,
                    "File failed"
                );
            }
        }
    }
}

pub struct BatchOrchestrator<P> {
    provider: P,
    dispatcher: Dispatcher,
    emitter: OutputEmitter,
    settings: BatchSettings,
}

impl<P> BatchOrchestrator<P>
where
    P: InferenceProvider,
{
    pub fn new(
        provider: P,
        dispatcher: Dispatcher,
        emitter: OutputEmitter,
        settings: BatchSettings,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            emitter,
            settings,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Discovers the files in `dir` and runs them as one batch.
    pub async fn run_directory<D: AsRef<Path>>(&self, dir: D) -> Result<BatchRun, BatchError> {
        let dir = dir.as_ref();
        let tasks = discovery::list_tasks(dir)?;
        if tasks.is_empty() {
            if self.settings.require_tasks {
                error!(dir = %dir.display(), "No supported files found");
                return Err(BatchError::NoTasks(dir.display().to_string()));
            }
            warn!(dir = %dir.display(), "No supported files found; nothing to do");
        }
        self.run(tasks).await
    }

    pub async fn run(&self, tasks: Vec<FileTask>) -> Result<BatchRun, BatchError> {
        self.check_preconditions(&tasks)?;

        let mut run = BatchRun::new(tasks.len());
        let span = info_span!("batch", run_id = %run.run_id, total = run.total);
        async {
            info!(
                max_concurrent = self.dispatcher.policy().max_concurrent,
                max_retries = self.dispatcher.policy().max_retries,
                "Starting batch"
            );
            let started = Instant::now();

            let mut pending: FuturesUnordered<_> =
                tasks.into_iter().map(|task| self.process(task)).collect();

            while let Some((task, outcome)) = pending.next().await {
                let artifacts = match &outcome {
                    DispatchOutcome::Success {
                        response,
                        elapsed_ms,
                        ..
                    } => Some(self.emitter.emit(&task, response, *elapsed_ms)),
                    DispatchOutcome::Failure { message, .. } => {
                        error!(
                            file = %task.file_name(),
                            error = %message,
                            "File failed; continuing with batch"
                        );
                        None
                    }
                };
                run.record(FileRecord {
                    task,
                    outcome,
                    artifacts,
                });
            }

            run.wall_time_ms = started.elapsed().as_millis() as u64;
            debug_assert_eq!(run.succeeded + run.failed, run.total);
            run.log_summary();
        }
        .instrument(span)
        .await;

        Ok(run)
    }

    fn check_preconditions(&self, tasks: &[FileTask]) -> Result<(), BatchError> {
        if self.settings.credentials.is_empty() {
            error!("Provider credentials are missing; aborting before dispatch");
            return Err(BatchError::MissingCredentials);
        }
        if tasks.is_empty() && self.settings.require_tasks {
            error!("Batch requires at least one task but none were given");
            return Err(BatchError::NoTasks("task list".to_string()));
        }
        self.emitter.prepare().map_err(|e| {
            error!(error = %e, "Cannot prepare output directories");
            BatchError::OutputUnavailable(e)
        })
    }

    /// Dispatches one task. The file is read inside each attempt, while the
    /// attempt holds its permit, so at most `max_concurrent` files are in memory.
    async fn process(&self, task: FileTask) -> (FileTask, DispatchOutcome) {
        let label = task.file_name();
        let provider = &self.provider;
        let settings = &self.settings;
        let task_ref = &task;
        let outcome = self
            .dispatcher
            .dispatch(&label, || async move {
                let request =
                    prompts::ocr_request(task_ref, &settings.model_id, &settings.credentials)
                        .await?;
                provider.invoke(&request).await
            })
            .await;
        (task, outcome)
    }
}
