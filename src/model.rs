//! Core data model: File, Job, and the report document written into
//! `Job.result` on successful completion.
//!
//! These types are the single source of truth held by the [`crate::registry`]
//! store; the HTTP response shapes in [`crate::api::models`] are built from
//! them rather than duplicating their fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An uploaded artifact, identified by content digest.
///
/// Created once per distinct `sha256`; never mutated, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: Uuid,
    pub sha256: String,
    pub size: u64,
    pub filename: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

/// One analysis run against a [`File`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub file_id: Uuid,
    pub status: JobStatus,
    pub current_stage: Option<String>,
    pub stages_done: u32,
    pub stages_total: u32,
    pub error_message: Option<String>,
    pub result: Option<Report>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(file_id: Uuid, stages_total: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            file_id,
            status: JobStatus::Queued,
            current_stage: None,
            stages_done: 0,
            stages_total,
            error_message: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn percent(&self) -> u32 {
        if self.stages_total == 0 {
            return 0;
        }
        (100 * self.stages_done) / self.stages_total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Scanning,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Scanning => "scanning",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

/// The per-stage execution record produced by the pipeline orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_name: String,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub findings: serde_json::Value,
    pub artifacts: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Failed,
    Skipped,
}

/// The structured report written into `Job.result` on success; also the body
/// of `GET /reports/{id}` once `file`/`created_at` are attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub verdict: Verdict,
    pub score: u32,
    pub results: AnalysisResults,
    pub timings: Timings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Clean,
    Suspicious,
    Malicious,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub av_result: AvResult,
    pub yara_hits: Vec<YaraHit>,
    pub iocs: Iocs,
    pub sandbox: SandboxResult,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvResult {
    pub engine: String,
    pub infected: bool,
    pub threat_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YaraHit {
    pub rule: String,
    pub namespace: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub strings: Vec<String>,
}

fn default_severity() -> String {
    "medium".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Iocs {
    pub urls: Vec<String>,
    pub domains: Vec<String>,
    pub ips: Vec<String>,
    pub hashes: Hashes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hashes {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxResult {
    pub executed: bool,
    pub behaviors: Vec<serde_json::Value>,
    pub network_connections: Vec<serde_json::Value>,
    pub is_mock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub name: String,
    pub status: StageStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timings {
    pub total_ms: u64,
    pub stages: Vec<StageTiming>,
}

/// The message that flows through the Job Queue Transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: Uuid,
    pub file_id: Uuid,
    pub storage_key: String,
    pub sha256: String,
    pub original_filename: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_guards_zero_total() {
        let mut job = Job::new(Uuid::new_v4(), 0);
        job.stages_done = 0;
        assert_eq!(job.percent(), 0);
    }

    #[test]
    fn percent_floors() {
        let mut job = Job::new(Uuid::new_v4(), 5);
        job.stages_done = 2;
        assert_eq!(job.percent(), 40);
        job.stages_done = 1;
        assert_eq!(job.percent(), 20);
    }

    #[test]
    fn new_job_is_queued_with_null_result() {
        let job = Job::new(Uuid::new_v4(), 5);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.result.is_none());
        assert_eq!(job.updated_at, job.created_at);
    }
}
