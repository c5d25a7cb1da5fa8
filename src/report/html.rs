//! HTML report via `askama`: a `#[derive(Template)]` struct feeding a
//! `templates/*.html` file, with severity-class helper functions
//! precomputed into plain `String` view fields rather than logic embedded
//! in the template.

use super::parse_err;
use crate::error::Result;
use crate::model::{Finding, Severity, WorkflowResult};
use askama::Template;
use chrono::Utc;

#[derive(Template)]
#[template(path = "vulnhuntr_report.html")]
struct ScanReport {
    generated_at: String,
    total_files: usize,
    total_findings: usize,
    outcome: String,
    severity_critical: usize,
    severity_high: usize,
    severity_medium: usize,
    severity_low: usize,
    severity_info: usize,
    findings: Vec<FindingView>,
}

#[allow(dead_code)] // fields used by the Askama template
struct FindingView {
    title: String,
    severity: String,
    severity_class: String,
    confidence: u8,
    vuln_type: String,
    cwe_id: String,
    cwe_name: String,
    file_path: String,
    analysis: String,
    poc: Option<String>,
}

fn severity_class(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "sev-critical",
        Severity::High => "sev-high",
        Severity::Medium => "sev-medium",
        Severity::Low => "sev-low",
        Severity::Info => "sev-info",
    }
}

fn severity_order(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => 0,
        Severity::High => 1,
        Severity::Medium => 2,
        Severity::Low => 3,
        Severity::Info => 4,
    }
}

fn finding_to_view(f: &Finding) -> FindingView {
    FindingView {
        title: f.title.clone(),
        severity: f.severity.as_str().to_string(),
        severity_class: severity_class(f.severity).to_string(),
        confidence: f.confidence,
        vuln_type: f.vuln_type.as_str().to_string(),
        cwe_id: f.cwe_id.clone(),
        cwe_name: f.cwe_name.clone(),
        file_path: f.file_path.display().to_string(),
        analysis: f.analysis.clone(),
        poc: f.poc.clone(),
    }
}

pub fn render(result: &WorkflowResult) -> Result<String> {
    let mut findings: Vec<&Finding> = result.findings.iter().collect();
    findings.sort_by_key(|f| severity_order(f.severity));
    let views: Vec<FindingView> = findings.into_iter().map(finding_to_view).collect();

    let count = |s: Severity| result.findings.iter().filter(|f| f.severity == s).count();

    let report = ScanReport {
        generated_at: Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
        total_files: result.summary.total_files,
        total_findings: result.summary.total_findings,
        outcome: format!("{:?}", result.outcome),
        severity_critical: count(Severity::Critical),
        severity_high: count(Severity::High),
        severity_medium: count(Severity::Medium),
        severity_low: count(Severity::Low),
        severity_info: count(Severity::Info),
        findings: views,
    };

    report.render().map_err(parse_err)
}
