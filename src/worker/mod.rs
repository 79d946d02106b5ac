//! The Pipeline Orchestrator process: a pool of in-process
//! tasks, each consuming one message at a time from the Job Queue
//! Transport (prefetch = 1) and driving it through the stage pipeline.

mod context;

pub use context::WorkerContext;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::model::JobStatus;
use crate::observability::Metrics;
use crate::pipeline::{self, ProgressSink};
use crate::queue::{Dequeued, Envelope, FjallQueue, MAX_RETRIES};
use crate::registry::FjallRegistry;
use crate::storage::ArtifactStore;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How long an idle worker waits before polling the queue again.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Reconnect policy for attaching to the queue keyspace at startup
/// Fixed 10s interval, 90 attempts, about 15 minutes of
/// startup tolerance before giving up. Fjall has no network handshake, so
/// in practice this only matters when the path is on unready storage
/// (e.g. a not-yet-mounted volume).
const QUEUE_CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(10);
const QUEUE_CONNECT_MAX_ATTEMPTS: u32 = 90;

/// Opens the queue keyspace, retrying on failure.
pub async fn connect_queue(
    fjall_path: &std::path::Path,
    name: &str,
    dlq_name: &str,
) -> Result<FjallQueue, AnyError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match FjallQueue::open(fjall_path, name, dlq_name) {
            Ok(queue) => return Ok(queue),
            Err(err) if attempt < QUEUE_CONNECT_MAX_ATTEMPTS => {
                warn!(attempt, error = %err, "failed to open job queue, retrying");
                tokio::time::sleep(QUEUE_CONNECT_RETRY_INTERVAL).await;
            }
            Err(err) => return Err(Box::new(err)),
        }
    }
}

/// Starts `worker_count` consumer tasks and blocks until a shutdown
/// signal arrives, then waits for in-flight jobs to finish their current
/// stage before returning.
pub async fn run(
    config: Arc<Config>,
    registry: Arc<FjallRegistry>,
    storage: Arc<ArtifactStore>,
    queue: Arc<FjallQueue>,
    metrics: Arc<Metrics>,
) -> Result<(), AnyError> {
    let stages = Arc::new(pipeline::default_stages(&config.pipeline));
    let worker_count = config.server.workers.max(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(worker_count);
    for id in 0..worker_count {
        let ctx = WorkerContext {
            registry: registry.clone(),
            storage: storage.clone(),
            queue: queue.clone(),
            metrics: metrics.clone(),
            config: config.clone(),
            stages: stages.clone(),
        };
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(worker_loop(id, ctx, rx)));
    }

    info!(worker_count, "worker pool started");
    shutdown_signal().await;
    info!("shutdown signal received, draining workers");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn worker_loop(id: usize, ctx: WorkerContext, mut shutdown_rx: watch::Receiver<bool>) {
    info!(worker_id = id, "worker task started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match ctx.queue.dequeue() {
            Ok(Some(Dequeued::Envelope(envelope))) => {
                process_envelope(&ctx, envelope).await;
            }
            Ok(Some(Dequeued::Poison(seq))) => {
                warn!(worker_id = id, seq, "discarding poison queue entry to DLQ");
                if let Err(err) =
                    ctx.queue
                        .move_to_dlq(seq, None, 0, "POISON", "message body was not valid JSON")
                {
                    error!(worker_id = id, seq, error = %err, "failed to move poison entry to DLQ");
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {},
                    _ = shutdown_rx.changed() => {},
                }
            }
            Err(err) => {
                error!(worker_id = id, error = %err, "failed to dequeue, backing off");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
    info!(worker_id = id, "worker task stopped");
}

/// A registry-backed [`ProgressSink`]: writes `current_stage`/`stages_done`
/// to the job row immediately before each stage runs.
struct RegistryProgress<'a> {
    registry: &'a FjallRegistry,
    job_id: Uuid,
}

#[async_trait]
impl ProgressSink for RegistryProgress<'_> {
    async fn stage_started(&self, stage_name: &str, stages_done: u32) {
        if let Err(err) = self.registry.update_stage(&self.job_id, stage_name, stages_done) {
            warn!(job_id = %self.job_id, stage = stage_name, error = %err, "failed to record stage progress");
        }
    }
}

async fn process_envelope(ctx: &WorkerContext, envelope: Envelope) {
    let seq = envelope.seq;
    let message = envelope.message.clone();
    let job_id = message.job_id;

    info!(job_id = %job_id, file_id = %message.file_id, seq, "job received");
    ctx.metrics.worker_active_jobs.inc();

    let outcome = run_job(ctx, &envelope).await;

    ctx.metrics.worker_active_jobs.dec();

    match outcome {
        Ok(()) => {
            ctx.metrics.job_done();
            if let Err(err) = ctx.queue.ack(seq) {
                error!(job_id = %job_id, seq, error = %err, "failed to ack completed job");
            }
        }
        Err(JobFailure::Terminal { stages_done, stage, error }) => {
            let message_text = format!("Max retries exceeded: {error}");
            if let Err(err) = ctx.registry.update_status(
                &job_id,
                JobStatus::Failed,
                Some(message_text.clone()),
                stage,
                Some(stages_done),
            ) {
                error!(job_id = %job_id, error = %err, "failed to persist terminal failure");
            }
            ctx.metrics.job_failed();
            if let Err(err) = ctx.queue.move_to_dlq(
                seq,
                Some(message),
                envelope.attempts + 1,
                "MAX_RETRIES",
                &message_text,
            ) {
                error!(job_id = %job_id, seq, error = %err, "failed to move exhausted job to DLQ");
            }
        }
        Err(JobFailure::Retryable { stage, error }) => {
            warn!(job_id = %job_id, stage = %stage, error = %error, attempts = envelope.attempts, "stage failed, retrying");
            if let Err(err) = ctx.queue.nack_requeue(seq) {
                error!(job_id = %job_id, seq, error = %err, "failed to requeue job");
            }
        }
    }
}

enum JobFailure {
    /// Retries remain: the message goes back to the head of the queue.
    /// The registry is left as-is (still `scanning`) — not terminal.
    Retryable { stage: String, error: String },
    /// Retry budget exhausted, or the job failed somewhere before stages
    /// even ran (download failure): persists `status=failed` and DLQs.
    Terminal {
        stages_done: u32,
        stage: Option<String>,
        error: String,
    },
}

async fn run_job(ctx: &WorkerContext, envelope: &Envelope) -> Result<(), JobFailure> {
    let message = &envelope.message;
    let job_id = message.job_id;

    if let Err(err) = ctx
        .registry
        .update_status(&job_id, JobStatus::Scanning, None, None, None)
    {
        return Err(terminal_or_retry(envelope, None, 0, format!("failed to mark job scanning: {err}")));
    }

    let work_dir = std::path::PathBuf::from("work").join(job_id.to_string());
    let _guard = WorkDirGuard::create(&work_dir)
        .await
        .map_err(|err| terminal_or_retry(envelope, None, 0, format!("failed to create work directory: {err}")))?;

    let local_path = work_dir.join(&message.original_filename);
    if let Err(err) = ctx.storage.get_to_path(&message.storage_key, &local_path).await {
        return Err(terminal_or_retry(
            envelope,
            None,
            0,
            format!("failed to download artifact: {err}"),
        ));
    }

    let mut stage_ctx = pipeline::StageContext {
        job_id,
        file_id: message.file_id,
        storage_key: message.storage_key.clone(),
        sha256: message.sha256.clone(),
        original_filename: message.original_filename.clone(),
        local_path,
        prior_results: Vec::new(),
    };

    let timeout = Duration::from_secs(ctx.config.pipeline.stage_timeout_seconds);
    let progress = RegistryProgress { registry: &ctx.registry, job_id };
    let started = Instant::now();

    match pipeline::run_pipeline(&mut stage_ctx, &ctx.stages, timeout, &progress, &ctx.metrics).await {
        pipeline::PipelineOutcome::Completed(results) => {
            let report = pipeline::build_report(&results, started.elapsed());
            if let Err(err) = ctx.registry.update_result(&job_id, report) {
                return Err(terminal_or_retry(
                    envelope,
                    None,
                    results.len() as u32,
                    format!("failed to persist report: {err}"),
                ));
            }
            Ok(())
        }
        pipeline::PipelineOutcome::Failed { results, failed_stage, error } => {
            let stages_done = results.len().saturating_sub(1) as u32;
            Err(terminal_or_retry(envelope, Some(failed_stage), stages_done, error))
        }
    }
}

fn terminal_or_retry(envelope: &Envelope, stage: Option<String>, stages_done: u32, error: String) -> JobFailure {
    if envelope.attempts + 1 >= MAX_RETRIES {
        JobFailure::Terminal { stages_done, stage, error }
    } else {
        JobFailure::Retryable {
            stage: stage.unwrap_or_default(),
            error,
        }
    }
}

/// Ensures the ephemeral per-job working directory is created before use
/// and removed afterward, regardless of how the job ends.
struct WorkDirGuard {
    path: std::path::PathBuf,
}

impl WorkDirGuard {
    async fn create(path: &std::path::Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(path).await?;
        Ok(Self { path: path.to_path_buf() })
    }
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        let path = self.path.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::fs::remove_dir_all(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to clean up work directory");
                }
            }
        });
    }
}
