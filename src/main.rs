mod checkpoint;
mod config;
mod cost;
mod discovery;
mod engine;
mod error;
mod http;
mod integrations;
mod llm;
mod model;
mod report;
mod session;
mod symbols;

use anyhow::{Context, Result};
use clap::Parser;
use cost::CostTracker;
use engine::{Engine, RunConfig};
use model::{RunOutcome, VulnType, WorkflowResult};
use session::CancellationToken;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DEFAULT_CHECKPOINT_DIR: &str = ".vulnhuntr_checkpoint";

#[derive(Parser)]
#[command(
    name = "vulnhuntr",
    about = "AI-assisted static vulnerability analysis for Python repositories"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Scan a repository from scratch.
    Scan {
        repo_path: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        model: Option<String>,

        /// Hard USD budget for this run.
        #[arg(long)]
        budget: Option<f64>,

        /// Drop findings below this confidence (0-10).
        #[arg(long)]
        min_confidence: Option<u8>,

        /// Comma-separated subset of vuln types (LFI,RCE,SSRF,AFO,SQLI,XSS,IDOR).
        #[arg(long, value_delimiter = ',')]
        vuln_types: Option<Vec<String>>,

        /// Output report format: json, sarif, html, csv, markdown.
        #[arg(long, default_value = "json")]
        format: String,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Webhook URL to POST the result to after the run.
        #[arg(long)]
        webhook: Option<String>,

        /// Skip LLM calls entirely; emit an empty result.
        #[arg(long)]
        dry_run: bool,

        #[arg(long, default_value = DEFAULT_CHECKPOINT_DIR)]
        checkpoint_dir: PathBuf,
    },

    /// Resume a previously interrupted scan from its checkpoint directory.
    Resume {
        #[arg(long, default_value = DEFAULT_CHECKPOINT_DIR)]
        checkpoint_dir: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value = "json")]
        format: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Re-render a saved `WorkflowResult` JSON in another format, without touching the LLM.
    Report {
        input: PathBuf,

        #[arg(long, default_value = "html")]
        format: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn build_llm_client(
    llm_config: &config::LlmConfig,
    provider_override: Option<String>,
    model_override: Option<String>,
) -> Result<llm::LlmClient> {
    let provider = match provider_override.as_deref() {
        Some("anthropic") => llm::Provider::Anthropic,
        Some("openai") => llm::Provider::OpenAi,
        Some("groq") => llm::Provider::Groq,
        Some("openrouter") => llm::Provider::OpenRouter,
        Some(other) => anyhow::bail!("unknown provider: {other}"),
        None => llm_config.provider.clone(),
    };
    let model = model_override.unwrap_or_else(|| llm_config.model.clone());
    llm::LlmClient::from_config(
        provider,
        model,
        llm_config.max_tokens,
        llm_config.api_key_env.clone(),
        llm_config.base_url.clone(),
    )
    .context("failed to build LLM client")
}

fn parse_vuln_types(raw: &[String]) -> Result<HashSet<VulnType>> {
    raw.iter()
        .map(|s| s.trim().parse::<VulnType>().map_err(anyhow::Error::msg))
        .collect()
}

fn run_config_from(
    cfg: &config::AnalysisConfig,
    budget: Option<f64>,
    cost_budget: Option<f64>,
    min_confidence: Option<u8>,
    vuln_types_override: Option<Vec<String>>,
    dry_run: bool,
) -> Result<RunConfig> {
    let vuln_types = match vuln_types_override {
        Some(raw) => Some(parse_vuln_types(&raw)?),
        None => cfg
            .vuln_types
            .as_ref()
            .map(|v| v.iter().copied().collect()),
    };
    Ok(RunConfig {
        min_confidence: min_confidence.unwrap_or(cfg.confidence_threshold),
        max_iterations: cfg.max_iterations,
        vuln_types,
        max_budget_usd: budget.or(cost_budget),
        dry_run,
    })
}

async fn emit_report(result: &WorkflowResult, format: &str, output: Option<PathBuf>) -> Result<()> {
    let format: report::ReportFormat = format.parse().map_err(anyhow::Error::msg)?;
    let rendered = report::render(format, result)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &rendered)?;
            eprintln!("report written to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn exit_code_for(outcome: RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed | RunOutcome::BudgetStopped => 0,
        RunOutcome::Cancelled => 130,
    }
}

/// Resolve config and build the LLM client, the two ways a run can fail
/// before any analysis starts. Both are configuration problems (bad
/// `.vulnhuntr.toml`, unknown `--provider`, missing API key) so they exit
/// 2 rather than falling through to the generic failure code.
fn load_config_and_client(
    config: Option<&std::path::Path>,
    provider: Option<String>,
    model: Option<String>,
) -> std::result::Result<(config::Config, llm::LlmClient), i32> {
    let cfg = match config::Config::resolve(config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: config resolution failed: {e}");
            return Err(2);
        }
    };
    let llm = match build_llm_client(&cfg.llm, provider, model) {
        Ok(llm) => llm,
        Err(e) => {
            eprintln!("error: {e:#}");
            return Err(2);
        }
    };
    Ok((cfg, llm))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vulnhuntr=info".parse().unwrap()),
        )
        .init();
    dotenvy::dotenv().ok();

    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Command::Scan {
            repo_path,
            config,
            provider,
            model,
            budget,
            min_confidence,
            vuln_types,
            format,
            output,
            webhook,
            dry_run,
            checkpoint_dir,
        } => {
            let (cfg, llm) = match load_config_and_client(config.as_deref(), provider, model) {
                Ok(pair) => pair,
                Err(code) => return Ok(code),
            };

            let run_cfg = run_config_from(
                &cfg.analysis,
                budget,
                cfg.cost.budget,
                min_confidence,
                vuln_types,
                dry_run || cfg.dry_run,
            )?;

            let files = discovery::walk_python_files(&repo_path, &cfg.analysis.exclude_paths);
            let files = discovery::apply_path_filters(
                files,
                &cfg.analysis.include_paths,
                &cfg.analysis.exclude_paths,
            );
            let filter = discovery::FrameworkPatternFilter;
            let entry_point_files = discovery::filter_entry_point_files(files.clone(), &filter);
            let target_files = if entry_point_files.is_empty() { files } else { entry_point_files };

            let readme_summary = read_readme_summary(&repo_path);

            let cancelled = Arc::new(AtomicBool::new(false));
            let cancellation = CancellationToken::new();
            let mut checkpoint = if cfg.cost.checkpoint {
                Some(checkpoint::CheckpointStore::start(
                    checkpoint_dir,
                    repo_path.clone(),
                    target_files.clone(),
                    llm.model().to_string(),
                    None,
                    cancelled.clone(),
                )?)
            } else {
                None
            };

            let mut cost_tracker = CostTracker::new();
            let engine = Engine::new(&llm, bridge_cancellation(&cancelled, cancellation));
            let result = engine
                .run(&repo_path, &target_files, &readme_summary, &run_cfg, &mut cost_tracker, checkpoint.as_mut())
                .await?;

            if let Some(store) = &checkpoint {
                store.finalize(result.outcome == RunOutcome::Completed)?;
            }

            if let Some(url) = webhook {
                let sender = integrations::webhook::WebhookSender::new(url)?;
                sender.send(&result).await?;
            }

            emit_report(&result, &format, output).await?;
            Ok(exit_code_for(result.outcome))
        }

        Command::Resume {
            checkpoint_dir,
            config,
            provider,
            model,
            format,
            output,
        } => {
            let (cfg, llm) = match load_config_and_client(config.as_deref(), provider, model) {
                Ok(pair) => pair,
                Err(code) => return Ok(code),
            };

            if !checkpoint::CheckpointStore::can_resume(&checkpoint_dir) {
                anyhow::bail!("no resumable checkpoint at {}", checkpoint_dir.display());
            }

            let cancelled = Arc::new(AtomicBool::new(false));
            let (mut store, mut cost_tracker) =
                checkpoint::CheckpointStore::resume(checkpoint_dir, cancelled.clone())?;
            let repo_path = store.state().repo_path.clone();
            let pending = store.pending().to_vec();

            let run_cfg = run_config_from(&cfg.analysis, cfg.cost.budget, cfg.cost.budget, None, None, false)?;
            let readme_summary = read_readme_summary(&repo_path);

            let cancellation = CancellationToken::new();
            let engine = Engine::new(&llm, bridge_cancellation(&cancelled, cancellation));
            let result = engine
                .run(&repo_path, &pending, &readme_summary, &run_cfg, &mut cost_tracker, Some(&mut store))
                .await?;

            store.finalize(result.outcome == RunOutcome::Completed)?;
            emit_report(&result, &format, output).await?;
            Ok(exit_code_for(result.outcome))
        }

        Command::Report { input, format, output } => {
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let result: WorkflowResult = serde_json::from_str(&content)?;
            emit_report(&result, &format, output).await?;
            Ok(0)
        }
    }
}

fn read_readme_summary(repo_path: &std::path::Path) -> String {
    for candidate in ["README.md", "README.rst", "README.txt", "README"] {
        if let Ok(content) = std::fs::read_to_string(repo_path.join(candidate)) {
            return content.chars().take(2000).collect();
        }
    }
    String::from("(no README found)")
}

/// The checkpoint store's signal handler trips a plain `Arc<AtomicBool>`
/// (it has no reason to depend on the session module); the engine checks
/// a `CancellationToken`. Bridge the two by polling the flag into the
/// token once up front — the flag only ever transitions from installed
/// handlers that fire at most once per run.
fn bridge_cancellation(flag: &Arc<AtomicBool>, token: CancellationToken) -> CancellationToken {
    let flag = flag.clone();
    let bridged = token.clone();
    tokio::spawn(async move {
        loop {
            if flag.load(Ordering::SeqCst) {
                bridged.cancel();
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    });
    token
}
