use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    sha256_hex, ArtifactSet, EpisimError, MetricStatus, ModelSpecification, RepairAttempt,
    ValidationReport,
};
use crate::repair::{ExhaustedRun, ValidatedRun};

pub const HISTORY_SCHEMA_VERSION: &str = "1.0";

/// Persisted record of one validation run, passing or exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunHistory {
    pub schema_version: String,
    pub run_id: Uuid,
    pub model_name: String,
    pub paper_title: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub passed: bool,
    pub executions: u32,
    pub final_artifact_digest: String,
    pub final_artifacts: ArtifactSet,
    pub reports: Vec<ValidationReport>,
    pub repairs: Vec<RepairAttempt>,
    pub repair_error: Option<String>,
}

impl RunHistory {
    fn build(
        spec: &ModelSpecification,
        run_id: Uuid,
        passed: bool,
        artifacts: &ArtifactSet,
        reports: &[ValidationReport],
        repairs: &[RepairAttempt],
        repair_error: Option<String>,
    ) -> Self {
        Self {
            schema_version: HISTORY_SCHEMA_VERSION.to_string(),
            run_id,
            model_name: spec.name.clone(),
            paper_title: spec.paper_title.clone(),
            generated_at: Utc::now(),
            passed,
            executions: reports.len() as u32,
            final_artifact_digest: artifacts.digest(),
            final_artifacts: artifacts.clone(),
            reports: reports.to_vec(),
            repairs: repairs.to_vec(),
            repair_error,
        }
    }

    pub fn from_validated(spec: &ModelSpecification, run: &ValidatedRun) -> Self {
        Self::build(
            spec,
            run.run_id,
            true,
            &run.artifacts,
            &run.reports,
            &run.repairs,
            None,
        )
    }

    pub fn from_exhausted(spec: &ModelSpecification, run: &ExhaustedRun) -> Self {
        Self::build(
            spec,
            run.run_id,
            false,
            &run.artifacts,
            &run.reports,
            &run.repairs,
            run.repair_error.clone(),
        )
    }

    pub fn final_report(&self) -> Option<&ValidationReport> {
        self.reports.last()
    }
}

/// Compact numeric rendering: up to four decimals, scientific outside a readable range.
fn fmt_value(v: f64) -> String {
    if v != 0.0 && (v.abs() >= 1e6 || v.abs() < 1e-3) {
        return format!("{v:.3e}");
    }
    let s = format!("{v:.4}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Render the Markdown reproduction report for the final attempt of a run.
pub fn render_report_md(history: &RunHistory) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Reproduction Report: {}\n", history.model_name));
    out.push_str(&format!(
        "**Paper:** {}\n",
        history.paper_title.as_deref().unwrap_or("n/a")
    ));
    out.push_str(&format!(
        "**Status:** {}\n",
        if history.passed { "ALL PASSED" } else { "FAILED" }
    ));
    out.push_str(&format!("**Attempts:** {}\n", history.executions));
    out.push_str(&format!(
        "**Artifact digest:** `{}`\n\n",
        history.final_artifact_digest
    ));

    out.push_str("## Metrics Comparison\n\n");
    out.push_str("| Metric | Expected | Actual | Deviation | Status |\n");
    out.push_str("|--------|----------|--------|-----------|--------|\n");

    let Some(report) = history.final_report() else {
        return out;
    };

    let mut unverifiable = Vec::new();
    for m in &report.metrics {
        let actual = m.actual.map(fmt_value).unwrap_or_else(|| "n/a".to_string());
        let deviation = m
            .match_percent
            .map(|p| format!("{p:.2}%"))
            .unwrap_or_else(|| "n/a".to_string());
        let status = match &m.status {
            MetricStatus::NotComputable { reason } => {
                unverifiable.push((m.metric.as_str(), reason.as_str()));
                "N/A"
            }
            _ if m.passed => "PASS",
            _ => "FAIL",
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            m.metric,
            fmt_value(m.expected),
            actual,
            deviation,
            status
        ));
    }

    if !unverifiable.is_empty() {
        out.push_str("\n## Not Computable\n\n");
        for (metric, reason) in unverifiable {
            out.push_str(&format!("- `{metric}`: {reason}\n"));
        }
    }

    if let Some(err) = &report.execution_error {
        out.push_str("\n## Error\n\n```\n");
        out.push_str(&err.to_string());
        out.push('\n');
        if let Some(stderr) = err.stderr.as_deref().filter(|s| !s.trim().is_empty()) {
            out.push_str(stderr.trim_end());
            out.push('\n');
        }
        out.push_str("```\n");
    }

    if !history.repairs.is_empty() || history.repair_error.is_some() {
        out.push_str("\n## Repair History\n\n");
        for repair in &history.repairs {
            out.push_str(&format!(
                "- {}{}\n",
                repair.report_before_repair.summary(),
                if repair.unchanged { " (repair returned identical artifacts)" } else { "" }
            ));
        }
        if let Some(err) = &history.repair_error {
            out.push_str(&format!("- repair stopped: {err}\n"));
        }
    }
    out
}

/// Write the Markdown reproduction report.
pub fn write_report_md(path: &Path, history: &RunHistory) -> Result<()> {
    let md = render_report_md(history);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn digest_path(path: &Path) -> PathBuf {
    path.with_extension("digest")
}

/// Write `path` as pretty JSON plus a `.digest` sidecar holding its SHA-256.
///
/// Returns the sidecar path.
pub fn write_history_json(path: &Path, history: &RunHistory) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    let json = serde_json::to_vec_pretty(history).context("serialize run history")?;
    let sidecar = digest_path(path);
    std::fs::write(path, &json).with_context(|| format!("write {:?}", path))?;
    std::fs::write(&sidecar, sha256_hex(&json)).with_context(|| format!("write {:?}", sidecar))?;
    Ok(sidecar)
}

/// Read a history written by [`write_history_json`], verifying its digest.
///
/// A tampered file fails with [`EpisimError::DigestMismatch`].
pub fn read_history_json(path: &Path) -> Result<RunHistory> {
    let json = std::fs::read(path).with_context(|| format!("read {:?}", path))?;
    let sidecar = digest_path(path);
    let expected =
        std::fs::read_to_string(&sidecar).with_context(|| format!("read {:?}", sidecar))?;
    let actual = sha256_hex(&json);
    if expected.trim() != actual {
        return Err(EpisimError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        }
        .into());
    }
    serde_json::from_slice(&json).with_context(|| format!("parse {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Entrypoint, MetricResult};
    use crate::sandbox::ExecutionFailure;

    fn metric(
        name: &str,
        actual: Option<f64>,
        pct: Option<f64>,
        passed: bool,
        status: MetricStatus,
    ) -> MetricResult {
        MetricResult {
            metric: name.to_string(),
            expected: 2.8,
            tolerance: 0.05,
            actual,
            match_percent: pct,
            passed,
            status,
        }
    }

    fn history(passed: bool, report: ValidationReport) -> RunHistory {
        RunHistory {
            schema_version: HISTORY_SCHEMA_VERSION.to_string(),
            run_id: Uuid::parse_str("11111111-1111-1111-1111-111111111111").expect("valid UUID"),
            model_name: "SIR".to_string(),
            paper_title: Some("Measles in Lagos".to_string()),
            generated_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .expect("parse RFC3339")
                .with_timezone(&Utc),
            passed,
            executions: 1,
            final_artifact_digest: "abc".to_string(),
            final_artifacts: ArtifactSet::new("sir", Entrypoint::new("sh")),
            reports: vec![report],
            repairs: vec![],
            repair_error: None,
        }
    }

    #[test]
    fn report_markdown_render_is_stable() {
        let report = ValidationReport {
            model_name: "SIR".to_string(),
            attempt_number: 1,
            metrics: vec![
                metric("R0", Some(2.5), Some(10.714285714), false, MetricStatus::ToleranceExceeded),
                metric(
                    "herd_immunity",
                    None,
                    None,
                    true,
                    MetricStatus::NotComputable {
                        reason: "unrecognized metric".to_string(),
                    },
                ),
            ],
            all_passed: false,
            execution_error: None,
        };
        let actual = render_report_md(&history(false, report));
        let expected = "# Reproduction Report: SIR\n**Paper:** Measles in Lagos\n**Status:** FAILED\n**Attempts:** 1\n**Artifact digest:** `abc`\n\n## Metrics Comparison\n\n| Metric | Expected | Actual | Deviation | Status |\n|--------|----------|--------|-----------|--------|\n| R0 | 2.8 | 2.5 | 10.71% | FAIL |\n| herd_immunity | 2.8 | n/a | n/a | N/A |\n\n## Not Computable\n\n- `herd_immunity`: unrecognized metric\n";
        assert_eq!(actual, expected);
    }

    #[test]
    fn report_markdown_includes_execution_error() {
        let failure = ExecutionFailure::crash(
            "entrypoint exited with code 1",
            Some("boom\n".to_string()),
            Some(1),
        );
        let report = ValidationReport::from_execution_failure("SIR", 1, failure);
        let md = render_report_md(&history(false, report));
        assert!(md.contains("## Error\n\n```\ncrash: entrypoint exited with code 1\nboom\n```\n"));
    }

    #[test]
    fn fmt_value_is_compact() {
        assert_eq!(fmt_value(14_755.0), "14755");
        assert_eq!(fmt_value(0.4386), "0.4386");
        assert_eq!(fmt_value(0.0), "0");
        assert_eq!(fmt_value(2.5e7), "2.500e7");
    }

    #[test]
    fn history_roundtrip_and_tamper_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("runs").join("history.json");
        let report =
            ValidationReport::from_execution_failure("SIR", 1, ExecutionFailure::timeout(5));
        let original = history(false, report);

        let sidecar = write_history_json(&path, &original).expect("write");
        assert_eq!(sidecar, dir.path().join("runs").join("history.digest"));
        assert_eq!(read_history_json(&path).expect("read"), original);

        let mut raw = std::fs::read_to_string(&path).expect("read raw");
        raw = raw.replace("\"SIR\"", "\"SEIR\"");
        std::fs::write(&path, raw).expect("tamper");
        let err = read_history_json(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EpisimError>(),
            Some(EpisimError::DigestMismatch { .. })
        ));
    }
}
