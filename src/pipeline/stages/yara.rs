//! YARA rule scanning via the `yara` CLI.
//!
//! One rule file is run per subprocess invocation (`yara -s -m <rule> <target>`)
//! rather than compiling a combined ruleset, so a single bad rule file
//! can't take down the whole stage.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::model::{StageResult, StageStatus, YaraHit};
use crate::pipeline::{Stage, StageContext};

pub struct YaraStage {
    rules_dir: PathBuf,
}

impl YaraStage {
    pub fn new(rules_dir: PathBuf) -> Self {
        Self { rules_dir }
    }
}

#[async_trait]
impl Stage for YaraStage {
    fn name(&self) -> &'static str {
        "yara"
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        let started_at = Utc::now();

        let rule_files = collect_rule_files(&self.rules_dir);
        if rule_files.is_empty() {
            let ended_at = Utc::now();
            return StageResult {
                stage_name: self.name().to_string(),
                status: StageStatus::Ok,
                started_at,
                ended_at,
                duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
                findings: json!({"matches": []}),
                artifacts: vec![],
                error: None,
            };
        }

        let mut matches: Vec<YaraHit> = Vec::new();
        for rule_file in &rule_files {
            let namespace = rule_file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "default".to_string());

            let output = Command::new("yara")
                .arg("-s")
                .arg("-m")
                .arg(rule_file)
                .arg(&ctx.local_path)
                .output()
                .await;

            if let Ok(output) = output {
                if output.status.code() == Some(0) && !output.stdout.is_empty() {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    parse_yara_output(&stdout, &namespace, &mut matches);
                }
            }
        }

        let ended_at = Utc::now();
        StageResult {
            stage_name: self.name().to_string(),
            status: StageStatus::Ok,
            started_at,
            ended_at,
            duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
            findings: json!({"matches": matches}),
            artifacts: vec![],
            error: None,
        }
    }
}

fn collect_rule_files(rules_dir: &Path) -> Vec<PathBuf> {
    if !rules_dir.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(rules_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            matches!(
                entry.path().extension().and_then(|e| e.to_str()),
                Some("yar") | Some("yara")
            )
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// Parses `yara -s -m` output:
/// `rule_name [key=value,key2=value2] /path/to/file` header lines, each
/// optionally followed by `0xoffset:$string_name: matched_data` lines.
fn parse_yara_output(stdout: &str, namespace: &str, matches: &mut Vec<YaraHit>) {
    let mut current: Option<usize> = None;

    for line in stdout.lines() {
        if line.starts_with("0x") {
            if let Some(idx) = current {
                let mut parts = line.splitn(3, ':');
                let _offset = parts.next();
                if let Some(string_name) = parts.next() {
                    let string_name = string_name.trim().to_string();
                    let hit = &mut matches[idx];
                    if !string_name.is_empty() && !hit.strings.contains(&string_name) {
                        hit.strings.push(string_name);
                    }
                }
            }
            continue;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (rule_name, meta) = parse_rule_header(line);
        if rule_name.is_empty() {
            current = None;
            continue;
        }

        let mut hit = YaraHit {
            rule: rule_name,
            namespace: namespace.to_string(),
            description: String::new(),
            severity: "medium".to_string(),
            author: String::new(),
            tags: Vec::new(),
            strings: Vec::new(),
        };

        for (key, value) in meta {
            match key.as_str() {
                "description" => hit.description = value,
                "severity" => hit.severity = value,
                "author" => hit.author = value,
                "tags" => hit.tags = value.split(',').map(|s| s.trim().to_string()).collect(),
                _ => {}
            }
        }

        matches.push(hit);
        current = Some(matches.len() - 1);
    }
}

/// Splits a header line into the rule name and its `[key=val,...]`
/// metadata block, if present. Values are unquoted.
fn parse_rule_header(line: &str) -> (String, Vec<(String, String)>) {
    match (line.find('['), line.find(']')) {
        (Some(start), Some(end)) if end > start => {
            let rule_name = line[..start].trim().to_string();
            let meta_str = &line[start + 1..end];
            let meta = meta_str
                .split(',')
                .filter_map(|item| {
                    item.split_once('=').map(|(k, v)| {
                        (k.trim().to_string(), v.trim().trim_matches('"').to_string())
                    })
                })
                .collect();
            (rule_name, meta)
        }
        _ => {
            let rule_name = line.split_whitespace().next().unwrap_or("").to_string();
            (rule_name, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_with_metadata() {
        let (name, meta) = parse_rule_header(
            r#"suspicious_strings [description="Known packer strings",severity=high,author=analyst] /tmp/job/sample"#,
        );
        assert_eq!(name, "suspicious_strings");
        assert!(meta.contains(&("description".to_string(), "Known packer strings".to_string())));
        assert!(meta.contains(&("severity".to_string(), "high".to_string())));
    }

    #[test]
    fn parses_header_without_metadata() {
        let (name, meta) = parse_rule_header("plain_rule /tmp/job/sample");
        assert_eq!(name, "plain_rule");
        assert!(meta.is_empty());
    }

    #[test]
    fn full_output_produces_hits_with_string_names() {
        let stdout = "rule_a [severity=high] /tmp/sample\n0x10:$s1: 4d5a\n0x20:$s2: 9000\nrule_b /tmp/sample\n0x30:$s1: cafebabe\n";
        let mut matches = Vec::new();
        parse_yara_output(stdout, "rules", &mut matches);

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].rule, "rule_a");
        assert_eq!(matches[0].severity, "high");
        assert_eq!(matches[0].strings, vec!["$s1", "$s2"]);
        assert_eq!(matches[1].rule, "rule_b");
        assert_eq!(matches[1].namespace, "rules");
    }

    #[test]
    fn empty_rules_dir_yields_no_rule_files() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(collect_rule_files(dir.path()).is_empty());
    }

    #[test]
    fn missing_rules_dir_yields_no_rule_files() {
        assert!(collect_rule_files(Path::new("/nonexistent/rules/dir")).is_empty());
    }
}
