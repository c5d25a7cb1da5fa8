//! SARIF 2.1.0 output, hand-built as `serde_json::Value` — no `sarif`
//! crate fits, so this reaches for `serde_json` directly rather than a
//! narrow single-purpose crate.

use crate::model::{Finding, WorkflowResult};
use serde_json::{json, Value};

pub fn render(result: &WorkflowResult) -> String {
    let rules: Vec<Value> = crate::model::VulnType::ALL
        .iter()
        .map(|vt| {
            json!({
                "id": format!("vulnhuntr.{}", vt.as_str().to_ascii_lowercase()),
                "name": vt.cwe_name(),
                "shortDescription": { "text": vt.cwe_name() },
                "properties": { "cwe": vt.cwe_id() },
            })
        })
        .collect();

    let results: Vec<Value> = result.findings.iter().map(finding_to_result).collect();

    let doc = json!({
        "$schema": "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "vulnhuntr",
                    "informationUri": "https://vulnhuntr.github.io/vulnhuntr/",
                    "version": env!("CARGO_PKG_VERSION"),
                    "rules": rules,
                }
            },
            "results": results,
        }]
    });

    serde_json::to_string_pretty(&doc).unwrap_or_default()
}

fn finding_to_result(finding: &Finding) -> Value {
    json!({
        "ruleId": finding.rule_id,
        "level": sarif_level(finding.severity),
        "message": { "text": finding.description },
        "locations": [{
            "physicalLocation": {
                "artifactLocation": { "uri": finding.file_path.display().to_string() },
                "region": {
                    "startLine": finding.line.max(1),
                    "startColumn": finding.column.max(1),
                }
            }
        }],
        "properties": {
            "confidence": finding.confidence,
            "cwe": finding.cwe_id,
            "poc": finding.poc,
        }
    })
}

fn sarif_level(severity: crate::model::Severity) -> &'static str {
    use crate::model::Severity::*;
    match severity {
        Critical | High => "error",
        Medium => "warning",
        Low | Info => "note",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContextCodeEntry, Response, RunOutcome, Summary, VulnType};
    use std::path::PathBuf;

    fn sample_finding() -> Finding {
        let response = Response {
            scratchpad: "s".into(),
            analysis: "LFI via open(request.args['p'])".into(),
            poc: Some("curl '/x?p=/etc/passwd'".into()),
            confidence_score: 8,
            vulnerability_types: [VulnType::Lfi].into_iter().collect(),
            context_code: vec![],
        };
        Finding::from_response(&response, PathBuf::from("app.py"), VulnType::Lfi, Vec::<ContextCodeEntry>::new())
    }

    #[test]
    fn produces_valid_sarif_shape() {
        let result = WorkflowResult {
            findings: vec![sample_finding()],
            summary: Summary::build(1, &[sample_finding()]),
            outcome: RunOutcome::Completed,
        };
        let rendered = render(&result);
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["version"], "2.1.0");
        assert_eq!(parsed["runs"][0]["results"][0]["ruleId"], "vulnhuntr.lfi");
        assert_eq!(parsed["runs"][0]["results"][0]["level"], "error");
    }
}
