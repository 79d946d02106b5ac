//! ClamAV scanning via the `clamscan` CLI.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::io;
use std::path::PathBuf;
use tokio::process::Command;

use crate::model::{StageResult, StageStatus};
use crate::pipeline::{Stage, StageContext};

pub struct ClamavStage {
    clamscan_path: PathBuf,
}

impl ClamavStage {
    pub fn new(clamscan_path: PathBuf) -> Self {
        Self { clamscan_path }
    }
}

#[async_trait]
impl Stage for ClamavStage {
    fn name(&self) -> &'static str {
        "clamav"
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        let started_at = Utc::now();

        if !ctx.local_path.exists() {
            let ended_at = Utc::now();
            return StageResult {
                stage_name: self.name().to_string(),
                status: StageStatus::Failed,
                started_at,
                ended_at,
                duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
                findings: json!({}),
                artifacts: vec![],
                error: Some(format!("File not found: {}", ctx.local_path.display())),
            };
        }

        let output = Command::new(&self.clamscan_path)
            .arg("--no-summary")
            .arg(&ctx.local_path)
            .output()
            .await;

        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                match output.status.code() {
                    Some(0) => StageResult {
                        stage_name: self.name().to_string(),
                        status: StageStatus::Ok,
                        started_at,
                        ended_at,
                        duration_ms,
                        findings: json!({"engine": "clamav", "infected": false, "threat_name": null}),
                        artifacts: vec![],
                        error: None,
                    },
                    Some(1) => StageResult {
                        stage_name: self.name().to_string(),
                        status: StageStatus::Ok,
                        started_at,
                        ended_at,
                        duration_ms,
                        findings: json!({
                            "engine": "clamav",
                            "infected": true,
                            "threat_name": parse_threat_name(&stdout),
                        }),
                        artifacts: vec![],
                        error: None,
                    },
                    _ => {
                        let stderr = String::from_utf8_lossy(&output.stderr);
                        StageResult {
                            stage_name: self.name().to_string(),
                            status: StageStatus::Failed,
                            started_at,
                            ended_at,
                            duration_ms,
                            findings: json!({}),
                            artifacts: vec![],
                            error: Some(if stderr.trim().is_empty() {
                                "ClamAV error".to_string()
                            } else {
                                stderr.trim().to_string()
                            }),
                        }
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => StageResult {
                stage_name: self.name().to_string(),
                status: StageStatus::Failed,
                started_at,
                ended_at,
                duration_ms,
                findings: json!({}),
                artifacts: vec![],
                error: Some("clamscan not found. Install ClamAV.".to_string()),
            },
            Err(err) => StageResult {
                stage_name: self.name().to_string(),
                status: StageStatus::Failed,
                started_at,
                ended_at,
                duration_ms,
                findings: json!({}),
                artifacts: vec![],
                error: Some(err.to_string()),
            },
        }
    }
}

/// Parses clamscan's `--no-summary` output: `"<path>: <ThreatName> FOUND"`.
fn parse_threat_name(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        let line = line.trim();
        if !line.ends_with("FOUND") {
            continue;
        }
        if let Some((_, rest)) = line.rsplit_once(':') {
            let threat = rest.trim().trim_end_matches("FOUND").trim();
            if !threat.is_empty() {
                return Some(threat.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_threat_name_from_found_line() {
        let stdout = "/tmp/sample: Eicar-Test-Signature FOUND\n";
        assert_eq!(parse_threat_name(stdout).as_deref(), Some("Eicar-Test-Signature"));
    }

    #[test]
    fn no_threat_name_when_no_found_line() {
        let stdout = "/tmp/sample: OK\n";
        assert_eq!(parse_threat_name(stdout), None);
    }

    #[tokio::test]
    async fn missing_file_is_failed_without_spawning() {
        use uuid::Uuid;
        let ctx = StageContext {
            job_id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            storage_key: "k".to_string(),
            sha256: "abc".to_string(),
            original_filename: "sample.bin".to_string(),
            local_path: PathBuf::from("/nonexistent/path"),
            prior_results: vec![],
        };
        let stage = ClamavStage::new(PathBuf::from("/usr/bin/clamscan"));
        let result = stage.execute(&ctx).await;
        assert_eq!(result.status, StageStatus::Failed);
    }
}
