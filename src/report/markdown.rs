//! Human-readable Markdown report — a summary table plus one section per
//! finding. Hand-rolled, same rationale as `csv.rs`.

use crate::model::WorkflowResult;

pub fn render(result: &WorkflowResult) -> String {
    let mut out = String::new();
    out.push_str("# vulnhuntr scan report\n\n");
    out.push_str(&format!(
        "Scanned **{}** file(s), found **{}** finding(s). Outcome: `{:?}`\n\n",
        result.summary.total_files, result.summary.total_findings, result.outcome
    ));

    if !result.summary.by_severity.is_empty() {
        out.push_str("| Severity | Count |\n|---|---|\n");
        let mut severities: Vec<_> = result.summary.by_severity.iter().collect();
        severities.sort_by_key(|(k, _)| k.clone());
        for (severity, count) in severities {
            out.push_str(&format!("| {severity} | {count} |\n"));
        }
        out.push('\n');
    }

    for (i, finding) in result.findings.iter().enumerate() {
        out.push_str(&format!(
            "## {}. {} — {}\n\n",
            i + 1,
            finding.severity.as_str(),
            finding.title
        ));
        out.push_str(&format!("- **File:** `{}`\n", finding.file_path.display()));
        out.push_str(&format!("- **CWE:** {} ({})\n", finding.cwe_id, finding.cwe_name));
        out.push_str(&format!("- **Confidence:** {}/10\n\n", finding.confidence));
        out.push_str(&format!("{}\n\n", finding.analysis));
        if let Some(poc) = &finding.poc {
            out.push_str("**Proof of concept:**\n\n```\n");
            out.push_str(poc);
            out.push_str("\n```\n\n");
        }
    }

    out
}
