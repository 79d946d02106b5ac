//! Dynamic analysis stage. MVP: a mock sandbox that returns canned
//! behavior data after a short delay, standing in for a real adapter
//! (Cuckoo, CAPE, etc.) until one is wired in.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;

use crate::model::{StageResult, StageStatus};
use crate::pipeline::{Stage, StageContext};

pub struct SandboxStage {
    enabled: bool,
    mock: bool,
}

impl SandboxStage {
    pub fn new(enabled: bool, mock: bool) -> Self {
        Self { enabled, mock }
    }
}

#[async_trait]
impl Stage for SandboxStage {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn execute(&self, _ctx: &StageContext) -> StageResult {
        let started_at = Utc::now();

        if !self.enabled {
            let ended_at = Utc::now();
            return StageResult {
                stage_name: self.name().to_string(),
                status: StageStatus::Skipped,
                started_at,
                ended_at,
                duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
                findings: json!({"executed": false, "reason": "Sandbox disabled"}),
                artifacts: vec![],
                error: None,
            };
        }

        if self.mock {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let ended_at = Utc::now();

            return StageResult {
                stage_name: self.name().to_string(),
                status: StageStatus::Ok,
                started_at,
                ended_at,
                duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
                findings: json!({
                    "executed": true,
                    "behaviors": [
                        {"type": "file_write", "path": "C:\\Windows\\Temp\\sample.dll"},
                        {"type": "registry_read", "key": "HKLM\\Software\\Microsoft\\Windows\\CurrentVersion"},
                    ],
                    "network_connections": [
                        {"dst_ip": "93.184.216.34", "dst_port": 443, "protocol": "tcp"},
                    ],
                    "is_mock": true,
                }),
                artifacts: vec![],
                error: None,
            };
        }

        let ended_at = Utc::now();
        StageResult {
            stage_name: self.name().to_string(),
            status: StageStatus::Failed,
            started_at,
            ended_at,
            duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
            findings: json!({}),
            artifacts: vec![],
            error: Some("Real sandbox execution is not implemented".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn ctx() -> StageContext {
        StageContext {
            job_id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            storage_key: "k".to_string(),
            sha256: "abc".to_string(),
            original_filename: "sample.bin".to_string(),
            local_path: PathBuf::from("/nonexistent"),
            prior_results: vec![],
        }
    }

    #[tokio::test]
    async fn disabled_is_skipped() {
        let stage = SandboxStage::new(false, true);
        let result = stage.execute(&ctx()).await;
        assert_eq!(result.status, StageStatus::Skipped);
    }

    #[tokio::test]
    async fn mock_returns_canned_behavior() {
        let stage = SandboxStage::new(true, true);
        let result = stage.execute(&ctx()).await;
        assert_eq!(result.status, StageStatus::Ok);
        assert_eq!(result.findings["is_mock"], true);
        assert!(result.findings["behaviors"].as_array().unwrap().len() > 0);
    }

    #[tokio::test]
    async fn real_sandbox_not_implemented() {
        let stage = SandboxStage::new(true, false);
        let result = stage.execute(&ctx()).await;
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("Real sandbox execution is not implemented")
        );
    }
}
