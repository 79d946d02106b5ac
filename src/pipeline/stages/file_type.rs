//! File type detection via magic-byte sniffing.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::model::{StageResult, StageStatus};
use crate::pipeline::{Stage, StageContext};

pub struct FileTypeStage;

#[async_trait]
impl Stage for FileTypeStage {
    fn name(&self) -> &'static str {
        "file-type"
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        let started_at = Utc::now();
        let read = tokio::fs::read(&ctx.local_path).await;
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

        let bytes = match read {
            Ok(bytes) => bytes,
            Err(err) => {
                return StageResult {
                    stage_name: self.name().to_string(),
                    status: StageStatus::Failed,
                    started_at,
                    ended_at,
                    duration_ms,
                    findings: json!({}),
                    artifacts: vec![],
                    error: Some(format!("File not found: {}", err)),
                };
            }
        };

        let file_size = bytes.len() as u64;
        let (mime_type, magic_desc) = match infer::get(&bytes) {
            Some(kind) => (kind.mime_type().to_string(), magic_desc(kind.mime_type())),
            None => ("application/octet-stream".to_string(), "data".to_string()),
        };

        StageResult {
            stage_name: self.name().to_string(),
            status: StageStatus::Ok,
            started_at,
            ended_at,
            duration_ms,
            findings: json!({
                "mime_type": mime_type,
                "magic_desc": magic_desc,
                "file_size": file_size,
            }),
            artifacts: vec![],
            error: None,
        }
    }
}

/// A short human description, the way `file(1)` would phrase it, since
/// `infer` only gives us a MIME type and extension.
fn magic_desc(mime_type: &str) -> String {
    match mime_type {
        "application/x-msdownload" => "PE32 executable (console) Intel 80386, for MS Windows".to_string(),
        "application/x-elf" | "application/x-executable" => "ELF executable".to_string(),
        "application/zip" => "Zip archive data".to_string(),
        "application/pdf" => "PDF document".to_string(),
        "application/x-dosexec" => "MS-DOS executable".to_string(),
        "text/plain" => "ASCII text".to_string(),
        other => format!("{other} data"),
    }
}
