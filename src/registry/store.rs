use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{File, Job, JobStatus, Report};

use super::error::Result;
use super::keys::{encode_file_key, encode_job_key, encode_sha256_key};

/// Fjall-backed persistent storage for [`File`]s and [`Job`]s.
///
/// Three partitions: `files`, `files_by_sha256` (secondary index for
/// dedup lookups), and `jobs`. Cheap to clone — `Keyspace`/`PartitionHandle`
/// are themselves `Arc`-backed handles.
#[derive(Clone)]
pub struct FjallRegistry {
    keyspace: Arc<Keyspace>,
    files: PartitionHandle,
    files_by_sha256: PartitionHandle,
    jobs: PartitionHandle,
}

impl FjallRegistry {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening job registry");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let files = keyspace.open_partition("files", PartitionCreateOptions::default())?;
        let files_by_sha256 =
            keyspace.open_partition("files_by_sha256", PartitionCreateOptions::default())?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace: Arc::new(keyspace),
            files,
            files_by_sha256,
            jobs,
        })
    }

    /// `lookup_file_by_sha256`.
    pub fn lookup_file_by_sha256(&self, sha256: &str) -> Result<Option<File>> {
        let Some(id_bytes) = self.files_by_sha256.get(encode_sha256_key(sha256))? else {
            return Ok(None);
        };
        let file_id: Uuid = String::from_utf8_lossy(&id_bytes)
            .parse()
            .map_err(|_| fjall::Error::from(std::io::Error::other("corrupt file id index")))?;
        self.get_file(&file_id)
    }

    pub fn get_file(&self, file_id: &Uuid) -> Result<Option<File>> {
        match self.files.get(encode_file_key(file_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// `insert_file`. Idempotent: re-inserting the same digest
    /// returns the existing File rather than overwriting `created_at`.
    pub fn insert_file(&self, file: File) -> Result<File> {
        if let Some(existing) = self.lookup_file_by_sha256(&file.sha256)? {
            return Ok(existing);
        }

        let value = serde_json::to_vec(&file)?;
        self.files.insert(encode_file_key(&file.id), value)?;
        self.files_by_sha256
            .insert(encode_sha256_key(&file.sha256), file.id.to_string().as_bytes())?;

        debug!(file_id = %file.id, sha256 = %file.sha256, "file inserted");
        Ok(file)
    }

    /// `insert_job` — the caller constructs the `queued` Job
    /// via [`Job::new`] and this just persists it.
    pub fn insert_job(&self, job: Job) -> Result<Job> {
        let value = serde_json::to_vec(&job)?;
        self.jobs.insert(encode_job_key(&job.id), value)?;
        debug!(job_id = %job.id, "job inserted");
        Ok(job)
    }

    /// `read_job`.
    pub fn read_job(&self, job_id: &Uuid) -> Result<Option<Job>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_job(&self, job: &Job) -> Result<()> {
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(encode_job_key(&job.id), value)?;
        Ok(())
    }

    /// `update_status`. Terminal transitions (`done`/`failed`)
    /// are immutable once written — invariant 6 (`updated_at` monotonic) and
    /// the "terminal states are immutable" lifecycle rule are enforced here
    /// by simply refusing to touch a job already in a terminal status.
    pub fn update_status(
        &self,
        job_id: &Uuid,
        status: JobStatus,
        error_message: Option<String>,
        current_stage: Option<String>,
        stages_done: Option<u32>,
    ) -> Result<()> {
        let mut job = self.read_job(job_id)?.ok_or(super::error::RegistryError::JobNotFound(*job_id))?;
        if matches!(job.status, JobStatus::Done | JobStatus::Failed) {
            return Ok(());
        }

        job.status = status;
        job.error_message = error_message;
        job.current_stage = current_stage;
        if let Some(done) = stages_done {
            job.stages_done = job.stages_done.max(done);
        }
        job.updated_at = Utc::now();
        self.write_job(&job)
    }

    /// `update_stage` — called on stage entry.
    pub fn update_stage(&self, job_id: &Uuid, stage_name: &str, stages_done: u32) -> Result<()> {
        let mut job = self.read_job(job_id)?.ok_or(super::error::RegistryError::JobNotFound(*job_id))?;
        if matches!(job.status, JobStatus::Done | JobStatus::Failed) {
            return Ok(());
        }
        job.current_stage = Some(stage_name.to_string());
        job.stages_done = job.stages_done.max(stages_done);
        job.updated_at = Utc::now();
        self.write_job(&job)
    }

    /// `update_result` — atomic with transition to `done`.
    pub fn update_result(&self, job_id: &Uuid, report: Report) -> Result<()> {
        let mut job = self.read_job(job_id)?.ok_or(super::error::RegistryError::JobNotFound(*job_id))?;
        job.status = JobStatus::Done;
        job.current_stage = None;
        job.stages_done = job.stages_total;
        job.error_message = None;
        job.result = Some(report);
        job.updated_at = Utc::now();
        self.write_job(&job)
    }

    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}
