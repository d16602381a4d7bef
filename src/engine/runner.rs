// src/engine/runner.rs

//! Sequential execution of one task chain against one transfer.
//!
//! Progress is persisted after every step as a single [`ProgressUpdate`], so
//! a chain interrupted at any point re-enters at the first step that did not
//! complete. The resume point is `(transfer.step, transfer.task_number)`.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::interpolate::interpolate_args;
use crate::fs::FileSystem;
use crate::model::{TaskDef, TransferContext, TransferError};
use crate::store::{ProgressUpdate, Store, StoreError};
use crate::tasks::{Mailer, RemoteDeleter, RunContext, SmtpMailer, TaskError, TaskRegistry};
use crate::types::{Chain, ErrorCode};

/// Non-error end states of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    Completed,
    /// Every step ran; at least one ended in a warning (the last one is kept).
    CompletedWithWarning(String),
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("transfer interrupted")]
    Interrupted,

    #[error("Task {kind} @ {rule} {chain}[{rank}]: {source}")]
    Task {
        kind: String,
        rule: String,
        chain: Chain,
        rank: u32,
        #[source]
        source: TaskError,
    },

    #[error("rule tasks changed while transfer was paused: {0}")]
    ResumeMismatch(String),

    #[error("failed to record transfer progress: {0}")]
    Store(#[from] StoreError),

    #[error("step trace failed: {0}")]
    Trace(anyhow::Error),
}

/// Reported to the trace callback after every step that advanced the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTrace {
    pub transfer_id: i64,
    pub rule: String,
    pub chain: Chain,
    pub rank: u32,
    pub kind: String,
    /// Index of the next step to run.
    pub task_number: u32,
    pub warning: Option<String>,
}

pub type TraceFn = Arc<dyn Fn(&StepTrace) -> anyhow::Result<()> + Send + Sync>;

pub struct ChainRunner {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn Store>,
    fs: Arc<dyn FileSystem>,
    mailer: Arc<dyn Mailer>,
    trace: Option<TraceFn>,
}

impl fmt::Debug for ChainRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainRunner")
            .field("registry", &self.registry)
            .field("store", &self.store)
            .field("fs", &self.fs)
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

impl ChainRunner {
    pub fn new(registry: Arc<TaskRegistry>, store: Arc<dyn Store>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            registry,
            store,
            fs,
            mailer: Arc::new(SmtpMailer),
            trace: None,
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_trace<F>(mut self, trace: F) -> Self
    where
        F: Fn(&StepTrace) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.trace = Some(Arc::new(trace));
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Persist `update`. Failures halt PRE/POST chains; ERROR chains only
    /// log them.
    fn persist(&self, chain: Chain, id: i64, update: &ProgressUpdate) -> Result<(), ChainError> {
        match self.store.update_progress(id, update) {
            Ok(()) => Ok(()),
            Err(e) if chain == Chain::Error => {
                error!(transfer = id, %chain, error = %e, "failed to record progress");
                Ok(())
            }
            Err(e) => Err(ChainError::Store(e)),
        }
    }

    /// Record a fatal condition on the transfer.
    ///
    /// In an ERROR chain the error that triggered the chain is kept.
    fn record_failure(&self, chain: Chain, ctx: &mut TransferContext, code: ErrorCode, details: String) {
        if chain == Chain::Error && !ctx.transfer.error.is_ok() {
            return;
        }
        let failure = TransferError::new(code, details);
        ctx.transfer.error = failure.clone();
        let update = ProgressUpdate {
            error: Some(failure),
            ..ProgressUpdate::default()
        };
        if let Err(e) = self.store.update_progress(ctx.transfer.id, &update) {
            error!(transfer = ctx.transfer.id, %chain, error = %e, "failed to record transfer error");
        }
    }

    fn fail(&self, chain: Chain, ctx: &mut TransferContext, err: ChainError) -> ChainError {
        let code = match err {
            ChainError::Interrupted => ErrorCode::Stopped,
            _ => ErrorCode::ExternalOperation,
        };
        self.record_failure(chain, ctx, code, err.to_string());
        err
    }

    /// Check the resume point against the current task list.
    ///
    /// `fingerprint` identifies the step completed just before `start`. When
    /// it is recorded, the task now at that position must still match it.
    fn check_resume(&self, tasks: &[TaskDef], start: usize, fingerprint: &str) -> Result<(), ChainError> {
        if start == 0 {
            return Ok(());
        }
        if start > tasks.len() {
            return Err(ChainError::ResumeMismatch(format!(
                "resume index {} is past the last task ({} tasks)",
                start,
                tasks.len()
            )));
        }
        let done = &tasks[start - 1];
        if !fingerprint.is_empty() && done.fingerprint() != fingerprint {
            return Err(ChainError::ResumeMismatch(format!(
                "task {} at index {} is not the one completed before the pause",
                done.kind,
                start - 1
            )));
        }
        Ok(())
    }

    async fn run_step(
        &self,
        cancel: &CancellationToken,
        def: &TaskDef,
        ctx: &mut TransferContext,
        remote: Option<&dyn RemoteDeleter>,
    ) -> Result<(), TaskError> {
        let mut task = self.registry.create(&def.kind)?;
        let args = interpolate_args(&def.args, ctx, self.store.as_ref())?;
        task.validate_db(self.store.as_ref(), &args)?;

        task.run(RunContext {
            cancel: cancel.clone(),
            args: &args,
            store: Arc::clone(&self.store),
            fs: Arc::clone(&self.fs),
            mailer: Arc::clone(&self.mailer),
            transfer: ctx,
            remote,
        })
        .await
    }

    /// Run `chain` of the context's rule against the context's transfer,
    /// starting at `transfer.task_number`.
    ///
    /// PRE and POST chains stop before the next step once `cancel` fires.
    /// ERROR chains ignore `cancel` and always run to completion or failure.
    pub async fn run_chain(
        &self,
        cancel: &CancellationToken,
        chain: Chain,
        ctx: &mut TransferContext,
        remote: Option<&dyn RemoteDeleter>,
    ) -> Result<ChainOutcome, ChainError> {
        let tasks: Vec<TaskDef> = ctx.rule.tasks(chain).to_vec();
        let token = match chain {
            Chain::Error => CancellationToken::new(),
            Chain::Pre | Chain::Post => cancel.clone(),
        };
        let id = ctx.transfer.id;

        if ctx.transfer.step != chain.step() {
            ctx.transfer.step = chain.step();
            ctx.transfer.task_number = 0;
            ctx.transfer.task_fingerprint.clear();
            let update = ProgressUpdate {
                step: Some(chain.step()),
                task_number: Some(0),
                task_fingerprint: Some(String::new()),
                ..ProgressUpdate::default()
            };
            self.persist(chain, id, &update)?;
        }

        let start = ctx.transfer.task_number as usize;
        if let Err(e) = self.check_resume(&tasks, start, &ctx.transfer.task_fingerprint) {
            error!(transfer = id, rule = %ctx.rule.name, %chain, error = %e, "cannot resume chain");
            return Err(self.fail(chain, ctx, e));
        }
        if start > 0 {
            info!(transfer = id, rule = %ctx.rule.name, %chain, start, "resuming chain");
        }

        let mut last_warning = None;

        for (idx, def) in tasks.iter().enumerate().skip(start) {
            if chain != Chain::Error && token.is_cancelled() {
                warn!(transfer = id, rule = %ctx.rule.name, %chain, rank = def.rank, "chain interrupted");
                return Err(self.fail(chain, ctx, ChainError::Interrupted));
            }

            info!(
                transfer = id,
                rule = %ctx.rule.name,
                %chain,
                rank = def.rank,
                task = %def.kind,
                "running task"
            );

            let size_before = ctx.transfer.filesize;
            let path_before = ctx.transfer.local_path.clone();

            let result = self.run_step(&token, def, ctx, remote).await;
            let warning = match result {
                Ok(()) => None,
                Err(TaskError::Warning(msg)) => {
                    warn!(
                        transfer = id,
                        rule = %ctx.rule.name,
                        %chain,
                        rank = def.rank,
                        task = %def.kind,
                        warning = %msg,
                        "task finished with a warning"
                    );
                    Some(msg)
                }
                Err(source) => {
                    let err = ChainError::Task {
                        kind: def.kind.clone(),
                        rule: ctx.rule.name.clone(),
                        chain,
                        rank: def.rank,
                        source,
                    };
                    error!(
                        transfer = id,
                        rule = %ctx.rule.name,
                        %chain,
                        rank = def.rank,
                        task = %def.kind,
                        error = %err,
                        "task failed"
                    );
                    return Err(self.fail(chain, ctx, err));
                }
            };

            let next = idx as u32 + 1;
            ctx.transfer.task_number = next;
            ctx.transfer.task_fingerprint = def.fingerprint();

            let mut update = ProgressUpdate {
                task_number: Some(next),
                task_fingerprint: Some(ctx.transfer.task_fingerprint.clone()),
                ..ProgressUpdate::default()
            };
            if ctx.transfer.filesize != size_before {
                update.filesize = Some(ctx.transfer.filesize);
            }
            if ctx.transfer.local_path != path_before {
                update.local_path = Some(ctx.transfer.local_path.clone());
            }
            if let Some(ref msg) = warning {
                let keeps_fatal = chain == Chain::Error && !ctx.transfer.error.is_ok();
                if !keeps_fatal {
                    let recorded = TransferError::new(ErrorCode::Warning, msg.clone());
                    ctx.transfer.error = recorded.clone();
                    update.error = Some(recorded);
                }
            }
            self.persist(chain, id, &update)?;

            info!(
                transfer = id,
                rule = %ctx.rule.name,
                %chain,
                rank = def.rank,
                task = %def.kind,
                "task done"
            );

            if let Some(ref trace) = self.trace {
                let step = StepTrace {
                    transfer_id: id,
                    rule: ctx.rule.name.clone(),
                    chain,
                    rank: def.rank,
                    kind: def.kind.clone(),
                    task_number: next,
                    warning: warning.clone(),
                };
                if let Err(e) = trace(&step) {
                    if chain == Chain::Error {
                        error!(transfer = id, %chain, error = %e, "step trace failed");
                    } else {
                        return Err(self.fail(chain, ctx, ChainError::Trace(e)));
                    }
                }
            }

            if warning.is_some() {
                last_warning = warning;
            }
        }

        ctx.transfer.task_number = 0;
        ctx.transfer.task_fingerprint.clear();
        let reset = ProgressUpdate {
            task_number: Some(0),
            task_fingerprint: Some(String::new()),
            ..ProgressUpdate::default()
        };
        self.persist(chain, id, &reset)?;

        Ok(match last_warning {
            Some(msg) => ChainOutcome::CompletedWithWarning(msg),
            None => ChainOutcome::Completed,
        })
    }
}
