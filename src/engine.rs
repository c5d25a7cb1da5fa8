//! The Analysis Engine: orchestrates the two-phase protocol per file and
//! aggregates enriched findings.
//!
//! Same shape as a system prompt plus initial envelope, turn loop with hard
//! stops evaluated up front, forced-summary fallback when the model runs dry
//! without emitting structured output — adapted from multi-turn tool-calling
//! to a two-phase protocol where the model's only channel back to the engine
//! is the `context_code` field of its JSON [`crate::model::Response`],
//! resolved by the [`crate::symbols::SymbolIndex`] rather than dispatched as
//! a tool call.

use crate::checkpoint::CheckpointStore;
use crate::cost::{BudgetCheck, CostTracker};
use crate::discovery;
use crate::error::{EngineError, Result};
use crate::model::{ContextCodeEntry, Finding, Response, RunOutcome, Summary, VulnType, WorkflowResult};
use crate::session::{CancellationToken, LlmSession};
use crate::llm::LlmClient;
use crate::symbols::SymbolIndex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Options threaded through one engine run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub min_confidence: u8,
    pub max_iterations: u32,
    /// `None` means all seven vuln types.
    pub vuln_types: Option<HashSet<VulnType>>,
    pub max_budget_usd: Option<f64>,
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0,
            max_iterations: 7,
            vuln_types: None,
            max_budget_usd: None,
            dry_run: false,
        }
    }
}

pub struct Engine<'a> {
    llm: &'a LlmClient,
    cancellation: CancellationToken,
}

impl<'a> Engine<'a> {
    pub fn new(llm: &'a LlmClient, cancellation: CancellationToken) -> Self {
        Self { llm, cancellation }
    }

    /// Run the full protocol over `files`, consulting the repo's complete
    /// Python source set (via `discovery::walk_python_files`) for symbol
    /// resolution. `checkpoint`, if given, is updated and saved per its own
    /// cadence after each file.
    pub async fn run(
        &self,
        repo_root: &Path,
        files: &[PathBuf],
        readme_summary: &str,
        config: &RunConfig,
        cost_tracker: &mut CostTracker,
        mut checkpoint: Option<&mut CheckpointStore>,
    ) -> Result<WorkflowResult> {
        if config.dry_run {
            return Ok(WorkflowResult {
                findings: Vec::new(),
                summary: Summary::build(files.len(), &[]),
                outcome: RunOutcome::Completed,
            });
        }

        let all_py_files = discovery::walk_python_files(repo_root, &[]);
        let mut symbol_index = SymbolIndex::new(all_py_files);

        let mut all_findings = Vec::new();
        let mut outcome = RunOutcome::Completed;

        for file_path in files {
            if self.cancellation.is_cancelled() {
                outcome = RunOutcome::Cancelled;
                break;
            }

            let Ok(source) = std::fs::read_to_string(file_path) else {
                warn!(file = %file_path.display(), "could not read file, skipping");
                continue;
            };

            if let Some(delta) = self.would_exceed_budget(&source, cost_tracker, config.max_budget_usd) {
                info!(file = %file_path.display(), delta, "budget would be exceeded, stopping run");
                outcome = RunOutcome::BudgetStopped;
                break;
            }

            if let Some(ref mut ckpt) = checkpoint {
                ckpt.set_current_file(file_path);
            }

            match self
                .analyze_file(file_path, &source, readme_summary, &mut symbol_index, config, cost_tracker)
                .await
            {
                Ok(file_findings) => {
                    if let Some(ref mut ckpt) = checkpoint {
                        ckpt.mark_file_complete(file_path, Some(file_findings.clone()));
                        ckpt.sync_cost_tracker(cost_tracker);
                        ckpt.maybe_save();
                    }
                    all_findings.extend(file_findings);
                }
                Err(EngineError::Cancelled) => {
                    outcome = RunOutcome::Cancelled;
                    break;
                }
                Err(EngineError::BudgetExceeded { .. }) => {
                    outcome = RunOutcome::BudgetStopped;
                    break;
                }
                Err(e @ EngineError::Provider { transient: false, .. }) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(file = %file_path.display(), error = %e, "file analysis failed, continuing");
                    if let Some(ref mut ckpt) = checkpoint {
                        ckpt.mark_file_complete(file_path, Some(Vec::new()));
                        ckpt.maybe_save();
                    }
                }
            }
        }

        let filtered: Vec<Finding> = all_findings
            .into_iter()
            .filter(|f| f.confidence >= config.min_confidence)
            .collect();
        let summary = Summary::build(files.len(), &filtered);
        Ok(WorkflowResult { findings: filtered, summary, outcome })
    }

    /// Pre-call budget check using the worst-case output size
    /// (`LlmClient::max_tokens`), evaluated before every outbound call.
    fn would_exceed_budget(
        &self,
        source: &str,
        cost_tracker: &CostTracker,
        budget: Option<f64>,
    ) -> Option<f64> {
        let input_tokens = estimate_input_tokens(source);
        let planned = cost_tracker.estimate(self.llm.model(), input_tokens, self.llm.max_tokens());
        match cost_tracker.check_budget(planned, budget) {
            BudgetCheck::WouldExceed { delta } => Some(delta),
            BudgetCheck::Ok => None,
        }
    }

    /// Phase 1 (initial scan) followed by Phase 2 (iterative deepening)
    /// for every vuln type Phase 1 surfaced, intersected with the
    /// configured subset.
    async fn analyze_file(
        &self,
        file_path: &Path,
        source: &str,
        readme_summary: &str,
        symbol_index: &mut SymbolIndex,
        config: &RunConfig,
        cost_tracker: &mut CostTracker,
    ) -> Result<Vec<Finding>> {
        if self.cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let file_label = file_path.display().to_string();
        let system = system_prompt(readme_summary);
        let mut phase1 = LlmSession::new(self.llm, system, self.cancellation.clone());
        let prompt = phase1_prompt(file_path, source);
        let (r0, usage) = phase1.send_initial(prompt).await?;
        let cost = cost_tracker.record(self.llm.model(), usage.input_tokens, usage.output_tokens, &file_label);
        if let Some(warning) = cost_tracker.detect_escalation(5, 2.5) {
            warn!(ratio = warning.ratio, file = %file_label, "cost escalation detected, continuing");
        }
        info!(file = %file_label, cost, confidence = r0.confidence_score, "phase 1 complete");

        let applicable_types = intersect_vuln_types(&r0.vulnerability_types, &config.vuln_types);

        let mut findings = Vec::new();
        for vuln_type in applicable_types {
            if self.cancellation.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Some(delta) = self.would_exceed_budget(source, cost_tracker, config.max_budget_usd) {
                info!(delta, file = %file_label, "budget would be exceeded mid-file, stopping");
                return Err(EngineError::budget_exceeded(delta, cost_tracker.remaining(config.max_budget_usd)));
            }

            match self
                .run_phase2(file_path, source, vuln_type, &r0, symbol_index, config, cost_tracker, &file_label)
                .await
            {
                Ok(Some(finding)) => findings.push(finding),
                Ok(None) => {}
                Err(EngineError::Cancelled) | Err(e @ EngineError::BudgetExceeded { .. }) => {
                    return Err(if matches!(e, EngineError::Cancelled) {
                        EngineError::Cancelled
                    } else {
                        e
                    });
                }
                Err(EngineError::Parse(msg)) => {
                    warn!(file = %file_label, vuln_type = vuln_type.as_str(), error = %msg, "phase 2 unrecoverable, skipping type");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(findings)
    }

    /// Iterative deepening for one vuln type: repeats until the model's
    /// `context_code` comes back empty (fixed point), the requested symbol
    /// set repeats verbatim from the prior iteration (a stronger and
    /// cheaper stuck-loop signal than waiting out `max_iterations`), no new
    /// symbols resolve, or the iteration ceiling is hit.
    #[allow(clippy::too_many_arguments)]
    async fn run_phase2(
        &self,
        file_path: &Path,
        source: &str,
        vuln_type: VulnType,
        phase1_response: &Response,
        symbol_index: &mut SymbolIndex,
        config: &RunConfig,
        cost_tracker: &mut CostTracker,
        file_label: &str,
    ) -> Result<Option<Finding>> {
        let mut session = LlmSession::new(self.llm, vuln_system_prompt(vuln_type), self.cancellation.clone());
        let mut accumulated: Vec<ContextCodeEntry> = Vec::new();
        let mut previous_response: Option<Response> = Some(phase1_response.clone());
        let mut last_requested: Option<HashSet<(String, String)>> = None;
        let mut candidate: Option<Response> = None;

        for iteration in 1..=config.max_iterations {
            if self.cancellation.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Some(delta) = self.would_exceed_budget(source, cost_tracker, config.max_budget_usd) {
                return Err(EngineError::budget_exceeded(delta, cost_tracker.remaining(config.max_budget_usd)));
            }

            let prompt = phase2_prompt(file_path, source, vuln_type, &accumulated, previous_response.as_ref());
            let (response, usage) = if iteration == 1 {
                session.send_initial(prompt).await?
            } else {
                session.send_followup(prompt).await?
            };
            let cost = cost_tracker.record(self.llm.model(), usage.input_tokens, usage.output_tokens, file_label);
            if let Some(warning) = cost_tracker.detect_escalation(5, 2.5) {
                warn!(ratio = warning.ratio, file = %file_label, "cost escalation detected, continuing");
            }
            info!(
                file = %file_label,
                vuln_type = vuln_type.as_str(),
                iteration,
                cost,
                confidence = response.confidence_score,
                "phase 2 iteration complete"
            );

            if response.confidence_score > 0 {
                candidate = Some(response.clone());
            }

            if response.context_code.is_empty() {
                break;
            }

            let requested: HashSet<(String, String)> = response
                .context_code
                .iter()
                .map(|c| (c.name.clone(), c.reason.clone()))
                .collect();
            if last_requested.as_ref() == Some(&requested) {
                info!(file = %file_label, vuln_type = vuln_type.as_str(), "repeated identical context request, breaking early");
                previous_response = Some(response);
                break;
            }
            last_requested = Some(requested);

            let mut resolved_any = false;
            for request in &response.context_code {
                match symbol_index.resolve(&request.name) {
                    Some((path, snippet)) => {
                        resolved_any = true;
                        accumulated.push(ContextCodeEntry {
                            name: request.name.clone(),
                            requested: request.reason.clone(),
                            file_path: Some(path),
                            source: Some(snippet),
                        });
                    }
                    None => {
                        accumulated.push(ContextCodeEntry {
                            name: request.name.clone(),
                            requested: request.reason.clone(),
                            file_path: None,
                            source: None,
                        });
                    }
                }
            }
            previous_response = Some(response);

            if !resolved_any {
                break;
            }
        }

        Ok(candidate.map(|final_response| {
            Finding::from_response(&final_response, file_path.to_path_buf(), vuln_type, accumulated)
        }))
    }
}

fn intersect_vuln_types(r0_types: &HashSet<VulnType>, configured: &Option<HashSet<VulnType>>) -> Vec<VulnType> {
    match configured {
        Some(allowed) => r0_types.intersection(allowed).copied().collect(),
        None => r0_types.iter().copied().collect(),
    }
}

/// ~4 bytes/token heuristic for the worst-case pre-call budget estimate.
/// The engine never needs an exact count — only a conservative one that
/// won't let a call through that blows the budget.
fn estimate_input_tokens(source: &str) -> u32 {
    let chars = source.len() + 2000; // envelope + instructions overhead
    (chars / 4).min(u32::MAX as usize) as u32
}

fn system_prompt(readme_summary: &str) -> String {
    format!(
        "You are a security researcher performing static analysis of a Python repository \
         to find remotely exploitable vulnerabilities reachable from untrusted input.\n\n\
         Repository summary:\n{readme_summary}\n\n\
         You will be shown one file at a time. Reason carefully about how data flows from \
         externally reachable entry points (HTTP routes, RPC handlers, task queues) into \
         dangerous sinks. Only report vulnerabilities you can trace through actual code in \
         view; if you need another function's source to confirm a suspicion, ask for it via \
         the `context_code` field instead of guessing."
    )
}

fn vuln_system_prompt(vuln_type: VulnType) -> String {
    format!(
        "You are doing a focused, iterative deep-dive on a single vulnerability class: \
         {} ({}). Confirm or refute the suspicion raised in the initial scan by tracing the \
         exact data flow. Request any function or class source you need via `context_code`; \
         stop requesting once you have enough context to give a final confidence score.",
        vuln_type.cwe_name(),
        vuln_type.as_str()
    )
}

fn response_format_block() -> &'static str {
    r#"<response_format>
Respond with a single JSON object with exactly these keys:
{
  "scratchpad": "<free-form reasoning>",
  "analysis": "<final summary of the vulnerability or lack thereof>",
  "poc": "<exploit snippet, or null>",
  "confidence_score": <integer 0-10>,
  "vulnerability_types": ["LFI"|"RCE"|"SSRF"|"AFO"|"SQLI"|"XSS"|"IDOR", ...],
  "context_code": [{"name": "<symbol>", "reason": "<why you need it>", "code_line": "<line that references it>"}]
}
Do not include any text before or after the JSON object.
</response_format>"#
}

fn phase1_prompt(file_path: &Path, file_source: &str) -> String {
    format!(
        "<file_code><file_path>{}</file_path><file_source>{}</file_source></file_code>\n\
         <instructions>\n\
         Analyze this file for the following vulnerability classes: LFI, RCE, SSRF, AFO, SQLI, \
         XSS, IDOR. Identify which, if any, are plausible given what this file alone shows.\n\
         </instructions>\n\
         <analysis_approach>\n\
         1. Identify any externally reachable entry points in this file.\n\
         2. Trace how their inputs reach sensitive operations (file I/O, subprocess, SQL, HTTP \
         requests, template rendering, deserialization).\n\
         3. Note any symbol whose source you cannot see but need, in `context_code`.\n\
         </analysis_approach>\n\
         <guidelines>\n\
         Be conservative: a low confidence_score is fine when the file alone doesn't confirm \
         exploitability. Do not fabricate function bodies you haven't seen.\n\
         </guidelines>\n\
         {}",
        escape_xml(&file_path.display().to_string()),
        escape_xml(file_source),
        response_format_block(),
    )
}

fn phase2_prompt(
    file_path: &Path,
    file_source: &str,
    vuln_type: VulnType,
    context_code: &[ContextCodeEntry],
    previous_analysis: Option<&Response>,
) -> String {
    let mut context_block = String::from("<context_code>");
    for entry in context_code {
        let source = entry.source.as_deref().unwrap_or("(unresolved — symbol not found in repository)");
        let path = entry
            .file_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "unknown".into());
        context_block.push_str(&format!(
            "<item><name>{}</name><file_path>{}</file_path><source>{}</source></item>",
            escape_xml(&entry.name),
            escape_xml(&path),
            escape_xml(source),
        ));
    }
    context_block.push_str("</context_code>");

    let previous_json = previous_analysis
        .map(|r| serde_json::to_string(r).unwrap_or_default())
        .unwrap_or_default();

    format!(
        "<file_code><file_path>{}</file_path><file_source>{}</file_source></file_code>\n\
         {}\n\
         <previous_analysis>{}</previous_analysis>\n\
         <example_bypasses>{}</example_bypasses>\n\
         <vulnerability_type>{}</vulnerability_type>\n\
         <instructions>\n\
         Continue the investigation of this file for {} ({}) only. Use the context code \
         provided to confirm or refute the vulnerability. If you need another symbol's source, \
         request it; otherwise return an empty `context_code` list and your final assessment.\n\
         </instructions>\n\
         {}",
        escape_xml(&file_path.display().to_string()),
        escape_xml(file_source),
        context_block,
        escape_xml(&previous_json),
        escape_xml(example_bypasses(vuln_type)),
        vuln_type.as_str(),
        vuln_type.cwe_name(),
        vuln_type.as_str(),
        response_format_block(),
    )
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn example_bypasses(vuln_type: VulnType) -> &'static str {
    match vuln_type {
        VulnType::Lfi => "../../../etc/passwd, php://filter wrappers, null-byte truncation, symlink races",
        VulnType::Rce => "os.system/subprocess with unsanitized args, eval/exec on user input, pickle/yaml.load deserialization",
        VulnType::Ssrf => "internal metadata endpoints (169.254.169.254), redirects to internal hosts, DNS rebinding, scheme smuggling (file://, gopher://)",
        VulnType::Afo => "path traversal on write paths, tarfile/zipfile extraction overwriting arbitrary paths",
        VulnType::Sqli => "string-concatenated queries, improperly parameterized ORM filters, second-order injection via stored values",
        VulnType::Xss => "unescaped template output, innerHTML-equivalent rendering, stored XSS via user-controlled fields rendered elsewhere",
        VulnType::Idor => "sequential IDs without ownership checks, missing authorization on object lookups shared across endpoints",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContextCodeRequest;
    use std::collections::HashSet as StdHashSet;

    #[test]
    fn intersect_vuln_types_with_config_subset() {
        let r0: HashSet<VulnType> = [VulnType::Lfi, VulnType::Rce, VulnType::Sqli].into_iter().collect();
        let configured: Option<HashSet<VulnType>> = Some([VulnType::Rce].into_iter().collect());
        let result = intersect_vuln_types(&r0, &configured);
        assert_eq!(result, vec![VulnType::Rce]);
    }

    #[test]
    fn intersect_vuln_types_none_means_all() {
        let r0: HashSet<VulnType> = [VulnType::Lfi, VulnType::Xss].into_iter().collect();
        let result: StdHashSet<VulnType> = intersect_vuln_types(&r0, &None).into_iter().collect();
        assert_eq!(result, r0);
    }

    #[test]
    fn estimate_input_tokens_scales_with_source_len() {
        let small = estimate_input_tokens("x");
        let large = estimate_input_tokens(&"x".repeat(10_000));
        assert!(large > small);
    }

    #[test]
    fn phase1_prompt_contains_required_sections() {
        let prompt = phase1_prompt(Path::new("app.py"), "print('hi')");
        for tag in ["<file_code>", "<instructions>", "<analysis_approach>", "<guidelines>", "<response_format>"] {
            assert!(prompt.contains(tag), "missing {tag}");
        }
    }

    #[test]
    fn phase2_prompt_contains_vuln_specific_sections() {
        let prompt = phase2_prompt(Path::new("app.py"), "print('hi')", VulnType::Lfi, &[], None);
        for tag in ["<context_code>", "<previous_analysis>", "<example_bypasses>", "<vulnerability_type>"] {
            assert!(prompt.contains(tag), "missing {tag}");
        }
        assert!(prompt.contains("LFI"));
    }

    #[test]
    fn response_format_block_names_all_fields() {
        let block = response_format_block();
        for field in [
            "scratchpad",
            "analysis",
            "poc",
            "confidence_score",
            "vulnerability_types",
            "context_code",
        ] {
            assert!(block.contains(field));
        }
    }

    #[test]
    fn xml_escaping_prevents_tag_injection_from_source() {
        let escaped = escape_xml("<file_source>inject</file_source>");
        assert!(!escaped.contains("<file_source>"));
    }

    #[test]
    fn context_code_request_serializes_expected_shape() {
        let req = ContextCodeRequest {
            name: "helper".into(),
            reason: "need body".into(),
            code_line: "helper()".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("helper"));
    }
}
