//! Indicator-of-compromise extraction: URLs, domains, IPs, and hashes.

use async_trait::async_trait;
use chrono::Utc;
use regex::bytes::Regex;
use serde_json::json;
use sha2::Digest;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::model::{StageResult, StageStatus};
use crate::pipeline::{Stage, StageContext};

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)+[^\s\x00-\x1f"'<>]*"#)
        .expect("static pattern is valid")
});

static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:[a-zA-Z0-9][-a-zA-Z0-9]*\.)+[a-zA-Z]{2,}")
        .expect("static pattern is valid")
});

static IP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
    )
    .expect("static pattern is valid")
});

const COMMON_DOMAINS: &[&str] = &[
    "microsoft.com",
    "windows.com",
    "google.com",
    "example.com",
    "localhost",
    "w3.org",
];

const URL_CAP: usize = 100;
const DOMAIN_CAP: usize = 100;
const IP_CAP: usize = 50;

pub struct IocExtractStage;

#[async_trait]
impl Stage for IocExtractStage {
    fn name(&self) -> &'static str {
        "ioc-extract"
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        let started_at = Utc::now();
        let read = tokio::fs::read(&ctx.local_path).await;
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

        let content = match read {
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

        let urls = extract_urls(&content);
        let url_domains: HashSet<String> = urls
            .iter()
            .filter_map(|url| url.splitn(4, '/').nth(2).map(|host| host.to_lowercase()))
            .collect();
        let domains = extract_domains(&content, &url_domains);
        let ips = extract_ips(&content);

        let md5_hash = format!("{:x}", md5::Md5::digest(&content));
        let sha1_hash = format!("{:x}", sha1::Sha1::digest(&content));
        let sha256_hash = format!("{:x}", sha2::Sha256::digest(&content));

        StageResult {
            stage_name: self.name().to_string(),
            status: StageStatus::Ok,
            started_at,
            ended_at,
            duration_ms,
            findings: json!({
                "urls": urls,
                "domains": domains,
                "ips": ips,
                "hashes": {
                    "md5": md5_hash,
                    "sha1": sha1_hash,
                    "sha256": sha256_hash,
                },
            }),
            artifacts: vec![],
            error: None,
        }
    }
}

fn extract_urls(content: &[u8]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut urls = Vec::new();
    for m in URL_PATTERN.find_iter(content) {
        let text = String::from_utf8_lossy(m.as_bytes()).into_owned();
        if seen.insert(text.clone()) {
            urls.push(text);
            if urls.len() >= URL_CAP {
                break;
            }
        }
    }
    urls
}

fn extract_domains(content: &[u8], url_domains: &HashSet<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut domains = Vec::new();

    for m in DOMAIN_PATTERN.find_iter(content) {
        let candidate = String::from_utf8_lossy(m.as_bytes()).to_lowercase();

        if url_domains.contains(&candidate) {
            continue;
        }
        if is_common_domain(&candidate) {
            continue;
        }
        if candidate.len() < 4 {
            continue;
        }
        let inner = &candidate[1..candidate.len() - 1];
        if !inner.contains('.') {
            continue;
        }
        if seen.insert(candidate.clone()) {
            domains.push(candidate);
            if domains.len() >= DOMAIN_CAP {
                break;
            }
        }
    }
    domains
}

fn extract_ips(content: &[u8]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ips = Vec::new();
    for m in IP_PATTERN.find_iter(content) {
        let text = String::from_utf8_lossy(m.as_bytes()).into_owned();
        if !is_public_ip(&text) {
            continue;
        }
        if seen.insert(text.clone()) {
            ips.push(text);
            if ips.len() >= IP_CAP {
                break;
            }
        }
    }
    ips
}

fn is_common_domain(candidate: &str) -> bool {
    COMMON_DOMAINS
        .iter()
        .any(|common| candidate == *common || candidate.ends_with(&format!(".{common}")))
}

fn is_public_ip(ip: &str) -> bool {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    let octets: Result<Vec<u8>, _> = parts.iter().map(|p| p.parse::<u8>()).collect();
    let octets = match octets {
        Ok(o) => o,
        Err(_) => return false,
    };

    let (first, second) = (octets[0], octets[1]);
    if first == 10 {
        return false;
    }
    if first == 172 && (16..=31).contains(&second) {
        return false;
    }
    if first == 192 && second == 168 {
        return false;
    }
    if first == 127 {
        return false;
    }
    if first == 0 || first >= 224 {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn ctx_for(local_path: PathBuf) -> StageContext {
        StageContext {
            job_id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            storage_key: "k".to_string(),
            sha256: "abc".to_string(),
            original_filename: "sample.bin".to_string(),
            local_path,
            prior_results: vec![],
        }
    }

    #[test]
    fn public_ip_accepted() {
        assert!(is_public_ip("93.184.216.34"));
    }

    #[test]
    fn private_ranges_rejected() {
        assert!(!is_public_ip("10.0.0.1"));
        assert!(!is_public_ip("172.16.0.1"));
        assert!(!is_public_ip("192.168.1.1"));
        assert!(!is_public_ip("127.0.0.1"));
        assert!(!is_public_ip("0.0.0.0"));
        assert!(!is_public_ip("240.0.0.1"));
    }

    #[test]
    fn common_domains_filtered() {
        let content = b"reach out to api.google.com or evil-c2.example.net for updates";
        let domains = extract_domains(content, &HashSet::new());
        assert!(domains.iter().any(|d| d == "evil-c2.example.net"));
        assert!(!domains.iter().any(|d| d.contains("google.com")));
    }

    #[tokio::test]
    async fn extracts_urls_ips_and_hashes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.txt");
        tokio::fs::write(&path, b"beacon to http://evil-c2.example.net/gate.php from 93.184.216.34")
            .await
            .unwrap();

        let ctx = ctx_for(path);
        let result = IocExtractStage.execute(&ctx).await;

        assert_eq!(result.status, StageStatus::Ok);
        let urls = result.findings["urls"].as_array().unwrap();
        assert!(urls.iter().any(|u| u.as_str().unwrap().contains("evil-c2.example.net")));
        let ips = result.findings["ips"].as_array().unwrap();
        assert!(ips.iter().any(|ip| ip.as_str().unwrap() == "93.184.216.34"));
        assert!(result.findings["hashes"]["sha256"].as_str().unwrap().len() == 64);
    }
}
