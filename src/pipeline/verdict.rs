//! Aggregates a completed stage run into the [`Report`] document clients
//! see via `GET /reports/{id}`, per the verdict derivation rules.

use std::time::Duration;

use crate::model::{
    AnalysisResults, AvResult, Iocs, Report, SandboxResult, StageResult, StageStatus, StageTiming,
    Timings, Verdict, YaraHit,
};

/// Builds the final report from the ordered list of stage results a
/// completed pipeline run produced. Stages that never ran (fail-fast
/// stopped the pipeline before them) are simply absent from `results`,
/// so their findings stay at their `Default`.
pub fn build_report(results: &[StageResult], total: Duration) -> Report {
    let mut analysis = AnalysisResults::default();

    for result in results {
        if result.status != StageStatus::Ok {
            continue;
        }
        match result.stage_name.as_str() {
            "clamav" => {
                if let Ok(av) = serde_json::from_value::<AvResult>(result.findings.clone()) {
                    analysis.av_result = av;
                }
            }
            "yara" => {
                if let Some(matches) = result.findings.get("matches") {
                    if let Ok(hits) = serde_json::from_value::<Vec<YaraHit>>(matches.clone()) {
                        analysis.yara_hits = hits;
                    }
                }
            }
            "ioc-extract" => {
                if let Ok(iocs) = serde_json::from_value::<Iocs>(result.findings.clone()) {
                    analysis.iocs = iocs;
                }
            }
            "sandbox" => {
                if let Ok(sandbox) = serde_json::from_value::<SandboxResult>(result.findings.clone())
                {
                    analysis.sandbox = sandbox;
                }
            }
            _ => {}
        }
    }

    let (verdict, score) = derive_verdict(&analysis);

    let timings = Timings {
        total_ms: total.as_millis() as u64,
        stages: results
            .iter()
            .map(|r| StageTiming {
                name: r.stage_name.clone(),
                status: r.status,
                duration_ms: r.duration_ms,
            })
            .collect(),
    };

    Report {
        verdict,
        score,
        results: analysis,
        timings,
    }
}

/// Verdict derivation rules, applied in order:
/// - start `clean`, score 0
/// - AV infection forces `malicious`, score at least 90
/// - a non-empty YARA hit set promotes `clean` to `suspicious` (an
///   existing `malicious` verdict is left alone) and raises score to at
///   least `50 + 10 * hit_count`
/// - score is capped at 100
fn derive_verdict(analysis: &AnalysisResults) -> (Verdict, u32) {
    let mut verdict = Verdict::Clean;
    let mut score: u32 = 0;

    if analysis.av_result.infected {
        verdict = Verdict::Malicious;
        score = score.max(90);
    }

    if !analysis.yara_hits.is_empty() {
        if verdict == Verdict::Clean {
            verdict = Verdict::Suspicious;
        }
        score = score.max(50 + 10 * analysis.yara_hits.len() as u32);
    }

    (verdict, score.min(100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn ok_result(stage_name: &str, findings: serde_json::Value) -> StageResult {
        let now = Utc::now();
        StageResult {
            stage_name: stage_name.to_string(),
            status: StageStatus::Ok,
            started_at: now,
            ended_at: now,
            duration_ms: 5,
            findings,
            artifacts: vec![],
            error: None,
        }
    }

    #[test]
    fn clean_file_scores_zero() {
        let results = vec![
            ok_result("file-type", json!({"mime_type":"text/plain","magic_desc":"ASCII text","file_size":5})),
            ok_result("clamav", json!({"engine":"clamav","infected":false,"threat_name":null})),
            ok_result("yara", json!({"matches":[]})),
        ];
        let report = build_report(&results, Duration::from_millis(30));
        assert_eq!(report.verdict, Verdict::Clean);
        assert_eq!(report.score, 0);
    }

    #[test]
    fn two_yara_hits_yield_suspicious_70() {
        let results = vec![
            ok_result("clamav", json!({"engine":"clamav","infected":false,"threat_name":null})),
            ok_result(
                "yara",
                json!({"matches":[
                    {"rule":"r1","namespace":"default","description":"","severity":"medium","author":"","tags":[],"strings":[]},
                    {"rule":"r2","namespace":"default","description":"","severity":"medium","author":"","tags":[],"strings":[]}
                ]}),
            ),
        ];
        let report = build_report(&results, Duration::from_millis(30));
        assert_eq!(report.verdict, Verdict::Suspicious);
        assert_eq!(report.score, 70);
    }

    #[test]
    fn av_infection_yields_malicious_at_least_90() {
        let results = vec![ok_result(
            "clamav",
            json!({"engine":"clamav","infected":true,"threat_name":"Eicar-Test-Signature"}),
        )];
        let report = build_report(&results, Duration::from_millis(30));
        assert_eq!(report.verdict, Verdict::Malicious);
        assert!(report.score >= 90);
        assert_eq!(
            report.results.av_result.threat_name.as_deref(),
            Some("Eicar-Test-Signature")
        );
    }

    #[test]
    fn score_caps_at_100() {
        let mut matches = Vec::new();
        for i in 0..20 {
            matches.push(json!({"rule": format!("r{i}"), "namespace":"default","description":"","severity":"medium","author":"","tags":[],"strings":[]}));
        }
        let results = vec![
            ok_result("clamav", json!({"engine":"clamav","infected":true,"threat_name":"x"})),
            ok_result("yara", json!({"matches": matches})),
        ];
        let report = build_report(&results, Duration::from_millis(30));
        assert_eq!(report.score, 100);
    }

    #[test]
    fn failed_stage_leaves_findings_at_default() {
        let now = Utc::now();
        let results = vec![StageResult {
            stage_name: "clamav".to_string(),
            status: StageStatus::Failed,
            started_at: now,
            ended_at: now,
            duration_ms: 1,
            findings: json!({}),
            artifacts: vec![],
            error: Some("clamscan not found. Install ClamAV.".to_string()),
        }];
        let report = build_report(&results, Duration::from_millis(1));
        assert!(!report.results.av_result.infected);
        assert_eq!(report.verdict, Verdict::Clean);
    }
}
