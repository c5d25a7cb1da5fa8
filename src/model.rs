//! Wire and persisted data types shared by the engine, the sessions it
//! drives, and the report serializers downstream of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Closed set of vulnerability classes the engine reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VulnType {
    Lfi,
    Rce,
    Ssrf,
    Afo,
    Sqli,
    Xss,
    Idor,
}

impl VulnType {
    pub const ALL: [VulnType; 7] = [
        VulnType::Lfi,
        VulnType::Rce,
        VulnType::Ssrf,
        VulnType::Afo,
        VulnType::Sqli,
        VulnType::Xss,
        VulnType::Idor,
    ];

    /// CWE identifier fixed by the vuln type, independent of model output.
    pub fn cwe_id(self) -> &'static str {
        match self {
            VulnType::Lfi => "CWE-22",
            VulnType::Rce => "CWE-78",
            VulnType::Ssrf => "CWE-918",
            VulnType::Afo => "CWE-434",
            VulnType::Sqli => "CWE-89",
            VulnType::Xss => "CWE-79",
            VulnType::Idor => "CWE-639",
        }
    }

    pub fn cwe_name(self) -> &'static str {
        match self {
            VulnType::Lfi => "Local File Inclusion",
            VulnType::Rce => "Remote Code Execution",
            VulnType::Ssrf => "Server-Side Request Forgery",
            VulnType::Afo => "Arbitrary File Overwrite",
            VulnType::Sqli => "SQL Injection",
            VulnType::Xss => "Cross-Site Scripting",
            VulnType::Idor => "Insecure Direct Object Reference",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VulnType::Lfi => "LFI",
            VulnType::Rce => "RCE",
            VulnType::Ssrf => "SSRF",
            VulnType::Afo => "AFO",
            VulnType::Sqli => "SQLI",
            VulnType::Xss => "XSS",
            VulnType::Idor => "IDOR",
        }
    }
}

impl std::str::FromStr for VulnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LFI" => Ok(VulnType::Lfi),
            "RCE" => Ok(VulnType::Rce),
            "SSRF" => Ok(VulnType::Ssrf),
            "AFO" => Ok(VulnType::Afo),
            "SQLI" => Ok(VulnType::Sqli),
            "XSS" => Ok(VulnType::Xss),
            "IDOR" => Ok(VulnType::Idor),
            other => Err(format!("unknown vuln type: {other}")),
        }
    }
}

/// Deterministic severity grade, always derived from confidence — never
/// constructed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_confidence(confidence: u8) -> Self {
        match confidence {
            9..=10 => Severity::Critical,
            7..=8 => Severity::High,
            5..=6 => Severity::Medium,
            3..=4 => Severity::Low,
            _ => Severity::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }
}

/// Request emitted by the model when it wants another function's source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCodeRequest {
    pub name: String,
    pub reason: String,
    pub code_line: String,
}

/// A symbol resolved (or not) by the Symbol Index, folded into accumulated
/// Phase 2 context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCodeEntry {
    pub name: String,
    pub requested: String,
    pub file_path: Option<PathBuf>,
    pub source: Option<String>,
}

/// Validated model output for one LLM turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub scratchpad: String,
    pub analysis: String,
    pub poc: Option<String>,
    pub confidence_score: u8,
    pub vulnerability_types: HashSet<VulnType>,
    #[serde(default)]
    pub context_code: Vec<ContextCodeRequest>,
}

impl Response {
    /// Schema validation beyond what serde's field presence already checks:
    /// confidence must fall in the documented range.
    pub fn validate(&self) -> Result<(), String> {
        if self.confidence_score > 10 {
            return Err(format!(
                "confidence_score {} out of range [0,10]",
                self.confidence_score
            ));
        }
        Ok(())
    }
}

/// Enriched, persistable finding. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub title: String,
    pub file_path: PathBuf,
    pub line: u32,
    pub column: u32,
    pub description: String,
    pub analysis: String,
    pub scratchpad: String,
    pub poc: Option<String>,
    pub confidence: u8,
    pub severity: Severity,
    pub vuln_type: VulnType,
    pub cwe_id: String,
    pub cwe_name: String,
    pub context_code: Vec<ContextCodeEntry>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
    pub discovered_at: DateTime<Utc>,
}

impl Finding {
    /// Build a Finding from a terminal Phase 2 Response, deriving severity
    /// and CWE fields rather than accepting them from the model.
    pub fn from_response(
        response: &Response,
        file_path: PathBuf,
        vuln_type: VulnType,
        context_code: Vec<ContextCodeEntry>,
    ) -> Self {
        let confidence = response.confidence_score.min(10);
        Self {
            rule_id: format!("vulnhuntr.{}", vuln_type.as_str().to_ascii_lowercase()),
            title: format!("{} in {}", vuln_type.cwe_name(), file_path.display()),
            file_path,
            line: 0,
            column: 0,
            description: response.analysis.clone(),
            analysis: response.analysis.clone(),
            scratchpad: response.scratchpad.clone(),
            poc: response.poc.clone(),
            confidence,
            severity: Severity::from_confidence(confidence),
            vuln_type,
            cwe_id: vuln_type.cwe_id().to_string(),
            cwe_name: vuln_type.cwe_name().to_string(),
            context_code,
            metadata: std::collections::HashMap::new(),
            discovered_at: Utc::now(),
        }
    }
}

/// Aggregated counts surfaced at the end of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total_files: usize,
    pub total_findings: usize,
    pub by_vuln_type: std::collections::HashMap<String, usize>,
    pub by_severity: std::collections::HashMap<String, usize>,
}

impl Summary {
    pub fn build(total_files: usize, findings: &[Finding]) -> Self {
        let mut by_vuln_type = std::collections::HashMap::new();
        let mut by_severity = std::collections::HashMap::new();
        for f in findings {
            *by_vuln_type.entry(f.vuln_type.as_str().to_string()).or_insert(0) += 1;
            *by_severity.entry(f.severity.as_str().to_string()).or_insert(0) += 1;
        }
        Self {
            total_files,
            total_findings: findings.len(),
            by_vuln_type,
            by_severity,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed,
    BudgetStopped,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub findings: Vec<Finding>,
    pub summary: Summary,
    pub outcome: RunOutcome,
}
