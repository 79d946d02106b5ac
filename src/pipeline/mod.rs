//! Stage pipeline orchestrator.
//!
//! Each analysis capability is a [`Stage`] implementation; the pipeline
//! holds them in a fixed, declared order and runs them against a shared
//! [`StageContext`]. Dispatch is static: there is no stage registry or
//! reflection, just a `Vec<Box<dyn Stage>>` built once at startup.

pub mod stages;
mod verdict;

pub use verdict::build_report;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::model::{StageResult, StageStatus};

/// State threaded through a single job's stage run. Each stage reads the
/// prior stages' results and writes nothing back except its own
/// [`StageResult`], which the orchestrator appends.
pub struct StageContext {
    pub job_id: Uuid,
    pub file_id: Uuid,
    pub storage_key: String,
    pub sha256: String,
    pub original_filename: String,
    pub local_path: PathBuf,
    pub prior_results: Vec<StageResult>,
}

/// A single pipeline capability: a name and an execution contract.
///
/// Implementations never propagate errors through `Result` — every fault
/// a stage can encounter (missing binary, malformed input, timeout) is
/// itself a finding, represented as a failed [`StageResult`]. This keeps
/// the orchestrator's control flow uniform regardless of which stage is
/// running.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &StageContext) -> StageResult;
}

/// The declared stage order. Built once per process; workers
/// clone the `Arc` rather than rebuild it per job.
pub fn default_stages(config: &crate::config::PipelineConfig) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(stages::file_type::FileTypeStage),
        Box::new(stages::clamav::ClamavStage::new(config.clamscan_path.clone())),
        Box::new(stages::yara::YaraStage::new(config.yara_rules_dir.clone())),
        Box::new(stages::ioc_extract::IocExtractStage),
        Box::new(stages::sandbox::SandboxStage::new(
            config.sandbox_enabled,
            config.sandbox_mock,
        )),
    ]
}

/// Runs a single declared stage under a hard timeout, converting an
/// elapsed deadline into a failed result rather than letting it hang a
/// worker task forever.
pub async fn run_stage(stage: &dyn Stage, ctx: &StageContext, timeout: Duration) -> StageResult {
    let started_at = Utc::now();
    match tokio::time::timeout(timeout, stage.execute(ctx)).await {
        Ok(result) => result,
        Err(_) => {
            let ended_at = Utc::now();
            StageResult {
                stage_name: stage.name().to_string(),
                status: StageStatus::Failed,
                started_at,
                ended_at,
                duration_ms: timeout.as_millis() as u64,
                findings: json!({}),
                artifacts: vec![],
                error: Some(format!("Stage timeout after {}s", timeout.as_secs())),
            }
        }
    }
}

/// Outcome of a full pipeline run: either every declared stage produced an
/// `ok`/`skipped` result, or the run stopped at the first `failed` one.
pub enum PipelineOutcome {
    Completed(Vec<StageResult>),
    Failed {
        results: Vec<StageResult>,
        failed_stage: String,
        error: String,
    },
}

/// Callbacks the orchestrator fires around each stage so the caller can
/// persist progress without the pipeline knowing anything about a
/// registry. Mirrors the `JobHandler`-style capability-interface pattern
/// used elsewhere in this crate: the orchestrator depends on a trait, not
/// a concrete store.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn stage_started(&self, stage_name: &str, stages_done: u32);
}

/// Runs every declared stage in order against `ctx`, stopping at the
/// first failure (fail-fast). `on_progress` is invoked immediately before
/// each stage executes, before the stage's own timeout starts ticking.
pub async fn run_pipeline(
    ctx: &mut StageContext,
    stages: &[Box<dyn Stage>],
    stage_timeout: Duration,
    on_progress: &dyn ProgressSink,
    metrics: &crate::observability::Metrics,
) -> PipelineOutcome {
    let mut results = Vec::with_capacity(stages.len());

    for (i, stage) in stages.iter().enumerate() {
        let stages_done = i as u32;
        on_progress.stage_started(stage.name(), stages_done).await;

        let result = run_stage(stage.as_ref(), ctx, stage_timeout).await;

        metrics.stage_observed(
            stage.name(),
            result.status.as_str(),
            result.duration_ms as f64 / 1000.0,
        );

        let failed = matches!(result.status, StageStatus::Failed);
        results.push(result);
        ctx.prior_results.push(results.last().unwrap().clone());

        if failed {
            let failed_result = results.last().unwrap();
            return PipelineOutcome::Failed {
                failed_stage: failed_result.stage_name.clone(),
                error: failed_result
                    .error
                    .clone()
                    .unwrap_or_else(|| "stage failed with no error detail".to_string()),
                results,
            };
        }
    }

    PipelineOutcome::Completed(results)
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Ok => "ok",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}
