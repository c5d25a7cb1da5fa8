//! Flat CSV output, hand-rolled — one row per finding, no nested
//! structure, so a dependency is not warranted for this shape.

use crate::model::WorkflowResult;

const HEADER: &str = "rule_id,severity,confidence,vuln_type,cwe_id,file_path,line,column,title";

pub fn render(result: &WorkflowResult) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for f in &result.findings {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            escape(&f.rule_id),
            f.severity.as_str(),
            f.confidence,
            f.vuln_type.as_str(),
            f.cwe_id,
            escape(&f.file_path.display().to_string()),
            f.line,
            f.column,
            escape(&f.title),
        ));
    }
    out
}

/// RFC 4180 quoting: wrap in quotes and double any embedded quote whenever
/// the field contains a comma, quote, or newline.
fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContextCodeEntry, Response, RunOutcome, Summary, VulnType};
    use std::path::PathBuf;

    #[test]
    fn quotes_fields_containing_commas() {
        let response = Response {
            scratchpad: "s".into(),
            analysis: "a".into(),
            poc: None,
            confidence_score: 7,
            vulnerability_types: [VulnType::Rce].into_iter().collect(),
            context_code: vec![],
        };
        let finding = crate::model::Finding::from_response(
            &response,
            PathBuf::from("dir, with comma/app.py"),
            VulnType::Rce,
            Vec::<ContextCodeEntry>::new(),
        );
        let result = WorkflowResult {
            findings: vec![finding.clone()],
            summary: Summary::build(1, &[finding]),
            outcome: RunOutcome::Completed,
        };
        let rendered = render(&result);
        assert!(rendered.contains("\"dir, with comma/app.py\""));
        assert_eq!(rendered.lines().count(), 2);
    }
}
