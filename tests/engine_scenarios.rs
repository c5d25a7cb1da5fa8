//! Stub-backend coverage for the two-phase engine loop: drives `Engine::run`
//! against a wiremock double standing in for the Anthropic Messages API so
//! the scan, budget-stop, unresolved-symbol, confidence-filter, and
//! iteration-ceiling paths run end to end without a real LLM.

use serde_json::{Value, json};
use std::path::PathBuf;
use vulnhuntr::cost::CostTracker;
use vulnhuntr::engine::{Engine, RunConfig};
use vulnhuntr::llm::{LlmClient, Provider};
use vulnhuntr::model::{RunOutcome, VulnType};
use vulnhuntr::session::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

fn tmp_repo(files: &[(&str, &str)]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "vulnhuntr-engine-it-{}-{}",
        std::process::id(),
        rand_suffix()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    for (rel, content) in files {
        let p = dir.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(&p, content).unwrap();
    }
    dir
}

fn rand_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// An Anthropic-shaped 200 whose `text` is the continuation after the
/// engine's `{` prefill seed, built from the full response object so field
/// order never matters.
fn anthropic_response(full: Value, input_tokens: u32, output_tokens: u32) -> ResponseTemplate {
    let full_str = serde_json::to_string(&full).unwrap();
    let continuation = full_str.strip_prefix('{').unwrap();
    ResponseTemplate::new(200).set_body_json(json!({
        "content": [{"text": continuation}],
        "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens},
    }))
}

fn response_json(confidence: u8, vuln_types: &[&str], context_code: Value) -> Value {
    json!({
        "scratchpad": "reasoning",
        "analysis": "analysis text",
        "poc": null,
        "confidence_score": confidence,
        "vulnerability_types": vuln_types,
        "context_code": context_code,
    })
}

async fn client_for(server: &MockServer) -> LlmClient {
    client_with_model(server, "claude-sonnet-4-20250514").await
}

async fn client_with_model(server: &MockServer, model: &str) -> LlmClient {
    LlmClient::new(
        Provider::Anthropic,
        "test-key".into(),
        model.into(),
        1024,
        Some(server.uri()),
    )
    .unwrap()
}

/// Distinguishes a Phase 2 call's first iteration (empty `<context_code>`)
/// from a follow-up iteration (accumulated entries render as `<item>` tags).
struct BodyNotContains(&'static str);

impl Match for BodyNotContains {
    fn matches(&self, request: &Request) -> bool {
        !String::from_utf8_lossy(&request.body).contains(self.0)
    }
}

fn base_config() -> RunConfig {
    RunConfig {
        min_confidence: 0,
        max_iterations: 5,
        vuln_types: None,
        max_budget_usd: None,
        dry_run: false,
    }
}

/// A single plausible LFI surfaces in Phase 1, Phase 2 confirms it on the
/// first iteration (empty follow-up `context_code`), and the run completes
/// with one finding above the confidence floor.
#[tokio::test]
async fn scan_reports_one_lfi_finding_end_to_end() {
    let dir = tmp_repo(&[(
        "app.py",
        "@app.route('/x')\ndef x():\n    return open(request.args['p']).read()\n",
    )]);
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("<analysis_approach>"))
        .respond_with(anthropic_response(response_json(6, &["LFI"], json!([])), 200, 80))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("<vulnerability_type>"))
        .respond_with(anthropic_response(response_json(8, &["LFI"], json!([])), 250, 120))
        .expect(1)
        .mount(&server)
        .await;

    let llm = client_for(&server).await;
    let engine = Engine::new(&llm, CancellationToken::new());
    let files = vec![dir.join("app.py")];
    let config = RunConfig {
        min_confidence: 5,
        max_iterations: 2,
        ..base_config()
    };
    let mut cost_tracker = CostTracker::new();

    let result = engine
        .run(&dir, &files, "a flask app", &config, &mut cost_tracker, None)
        .await
        .unwrap();

    assert_eq!(result.outcome, RunOutcome::Completed);
    assert_eq!(result.findings.len(), 1);
    let finding = &result.findings[0];
    assert_eq!(finding.vuln_type, VulnType::Lfi);
    assert_eq!(finding.confidence, 8);
    assert_eq!(finding.cwe_id, "CWE-22");
}

/// The pre-call budget check trips before Phase 1 is ever sent, so the run
/// stops with zero LLM calls and zero findings.
#[tokio::test]
async fn budget_ceiling_stops_before_any_llm_call() {
    let dir = tmp_repo(&[("app.py", "def handler():\n    return 1\n")]);
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(anthropic_response(response_json(5, &["LFI"], json!([])), 10, 10))
        .expect(0)
        .mount(&server)
        .await;

    // Opus-tier pricing and a generous max_tokens guarantee the worst-case
    // estimate blows a one-cent budget on the very first file.
    let llm = client_with_model(&server, "claude-opus-4-20250514").await;
    let engine = Engine::new(&llm, CancellationToken::new());
    let files = vec![dir.join("app.py")];
    let config = RunConfig {
        max_budget_usd: Some(0.01),
        ..base_config()
    };
    let mut cost_tracker = CostTracker::new();

    let result = engine
        .run(&dir, &files, "", &config, &mut cost_tracker, None)
        .await
        .unwrap();

    assert_eq!(result.outcome, RunOutcome::BudgetStopped);
    assert!(result.findings.is_empty());
}

/// Phase 1 surfaces two vuln types; Phase 2 confirms one below the
/// confidence floor and one above it. Only the high-confidence finding
/// survives the post-filter.
#[tokio::test]
async fn confidence_filter_drops_low_confidence_finding() {
    let dir = tmp_repo(&[(
        "app.py",
        "@app.route('/x')\ndef x():\n    os.system(request.args['cmd'])\n    return open(request.args['p']).read()\n",
    )]);
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("<analysis_approach>"))
        .respond_with(anthropic_response(response_json(5, &["LFI", "RCE"], json!([])), 200, 100))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("<vulnerability_type>LFI</vulnerability_type>"))
        .respond_with(anthropic_response(response_json(3, &["LFI"], json!([])), 250, 100))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("<vulnerability_type>RCE</vulnerability_type>"))
        .respond_with(anthropic_response(response_json(7, &["RCE"], json!([])), 250, 100))
        .expect(1)
        .mount(&server)
        .await;

    let llm = client_for(&server).await;
    let engine = Engine::new(&llm, CancellationToken::new());
    let files = vec![dir.join("app.py")];
    let config = RunConfig {
        min_confidence: 5,
        max_iterations: 2,
        ..base_config()
    };
    let mut cost_tracker = CostTracker::new();

    let result = engine
        .run(&dir, &files, "", &config, &mut cost_tracker, None)
        .await
        .unwrap();

    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].vuln_type, VulnType::Rce);
    assert_eq!(result.findings[0].confidence, 7);
}

/// Phase 2 requests a symbol that doesn't exist anywhere in the repo. The
/// symbol index returns no match, the engine folds in a null entry, and the
/// model's next turn returns an empty `context_code`, terminating the loop
/// with that entry marked unresolved in the finding.
#[tokio::test]
async fn unresolved_symbol_request_terminates_via_empty_followup() {
    let dir = tmp_repo(&[(
        "app.py",
        "@app.route('/x')\ndef x():\n    return helper_fn(request.args['p'])\n",
    )]);
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("<analysis_approach>"))
        .respond_with(anthropic_response(response_json(4, &["LFI"], json!([])), 200, 100))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("<vulnerability_type>"))
        .and(BodyNotContains("<item>"))
        .respond_with(anthropic_response(
            response_json(
                4,
                &["LFI"],
                json!([{"name": "helper_fn", "reason": "confirm sink", "code_line": "helper_fn(p)"}]),
            ),
            250,
            120,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("<item>"))
        .respond_with(anthropic_response(response_json(7, &["LFI"], json!([])), 300, 100))
        .expect(1)
        .mount(&server)
        .await;

    let llm = client_for(&server).await;
    let engine = Engine::new(&llm, CancellationToken::new());
    let files = vec![dir.join("app.py")];
    let mut cost_tracker = CostTracker::new();

    let result = engine
        .run(&dir, &files, "", &base_config(), &mut cost_tracker, None)
        .await
        .unwrap();

    assert_eq!(result.findings.len(), 1);
    let finding = &result.findings[0];
    assert_eq!(finding.confidence, 7);
    assert_eq!(finding.context_code.len(), 1);
    assert_eq!(finding.context_code[0].name, "helper_fn");
    assert!(finding.context_code[0].file_path.is_none());
    assert!(finding.context_code[0].source.is_none());
}

/// Phase 2 never runs more than `max_iterations` turns even when the model
/// keeps requesting new, resolvable symbols and never volunteers an empty
/// `context_code` on its own.
#[tokio::test]
async fn phase2_stops_at_iteration_ceiling_when_model_keeps_requesting_context() {
    let dir = tmp_repo(&[
        (
            "app.py",
            "@app.route('/x')\ndef x():\n    return dep_one(dep_two(request.args['p']))\n",
        ),
        (
            "helpers.py",
            "def dep_one(x):\n    return x\n\ndef dep_two(x):\n    return x\n",
        ),
    ]);
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("<analysis_approach>"))
        .respond_with(anthropic_response(response_json(4, &["RCE"], json!([])), 200, 100))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("<vulnerability_type>"))
        .and(BodyNotContains("<item>"))
        .respond_with(anthropic_response(
            response_json(
                5,
                &["RCE"],
                json!([{"name": "dep_one", "reason": "trace sink", "code_line": "dep_one(x)"}]),
            ),
            250,
            120,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("<item>"))
        .respond_with(anthropic_response(
            response_json(
                9,
                &["RCE"],
                json!([{"name": "dep_two", "reason": "trace source", "code_line": "dep_two(x)"}]),
            ),
            300,
            150,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let llm = client_for(&server).await;
    let engine = Engine::new(&llm, CancellationToken::new());
    let files = vec![dir.join("app.py")];
    let config = RunConfig {
        max_iterations: 2,
        ..base_config()
    };
    let mut cost_tracker = CostTracker::new();

    let result = engine
        .run(&dir, &files, "", &config, &mut cost_tracker, None)
        .await
        .unwrap();

    assert_eq!(result.findings.len(), 1);
    let finding = &result.findings[0];
    // Neither iteration ever returned an empty context_code; the loop still
    // terminates at the configured ceiling instead of running past it.
    assert_eq!(finding.confidence, 9);
    assert_eq!(finding.context_code.len(), 2);
}
