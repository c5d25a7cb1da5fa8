//! Struct-first configuration. No field is discovered at runtime: TOML and
//! YAML loaders are adapters that both deserialize into this same `Config`,
//! merged over defaults with CLI overrides applied last by the caller.
//!
//! Precedence (highest wins): CLI flags > project `.vulnhuntr.toml` (or
//! `.vulnhuntr.yaml`) > user-home `~/.config/vulnhuntr/config.toml` > these
//! defaults.

use crate::error::{EngineError, Result};
use crate::model::VulnType;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cost: CostConfig,
    pub llm: LlmConfig,
    pub analysis: AnalysisConfig,
    pub verbosity: String,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cost: CostConfig::default(),
            llm: LlmConfig::default(),
            analysis: AnalysisConfig::default(),
            verbosity: "info".into(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Hard USD ceiling for a run. `None` means unbounded.
    pub budget: Option<f64>,
    pub checkpoint: bool,
    /// Advisory save cadence in seconds; the checkpoint store's own
    /// completion-count cadence (`save_frequency`) is the hard guarantee.
    pub checkpoint_interval: u64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            budget: None,
            checkpoint: true,
            checkpoint_interval: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: crate::llm::Provider,
    pub model: String,
    pub max_tokens: u32,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: crate::llm::Provider::default(),
            model: default_model(),
            max_tokens: 4096,
            api_key_env: None,
            base_url: None,
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// `None` means all seven vuln types.
    pub vuln_types: Option<Vec<VulnType>>,
    pub exclude_paths: Vec<String>,
    pub include_paths: Vec<String>,
    pub max_iterations: u32,
    pub confidence_threshold: u8,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            vuln_types: None,
            exclude_paths: vec![
                "__pycache__".into(),
                ".venv".into(),
                "venv".into(),
                "node_modules".into(),
                ".git".into(),
                "site-packages".into(),
            ],
            include_paths: Vec::new(),
            max_iterations: 7,
            confidence_threshold: 0,
        }
    }
}

impl Config {
    /// Load a single config file (TOML or YAML, by extension) with no
    /// merging. Returns defaults if the path does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::config(format!("failed to read {}: {e}", path.display())))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml_ng::from_str(&content)
                .map_err(|e| EngineError::config(format!("failed to parse YAML config: {e}"))),
            _ => toml::from_str(&content)
                .map_err(|e| EngineError::config(format!("failed to parse TOML config: {e}"))),
        }
    }

    /// Resolve the layered config: project file, else user-home file, else
    /// built-in defaults. CLI overrides are applied by the caller afterward
    /// (see `main::apply_cli_overrides`) so this function never needs to
    /// know about `clap`.
    pub fn resolve(project_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = project_path {
            if path.exists() {
                return Self::load(path);
            }
            return Err(EngineError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        for candidate in [".vulnhuntr.toml", ".vulnhuntr.yaml", ".vulnhuntr.yml"] {
            let candidate = PathBuf::from(candidate);
            if candidate.exists() {
                return Self::load(&candidate);
            }
        }

        if let Some(home_config) = user_home_config_path() {
            if home_config.exists() {
                return Self::load(&home_config);
            }
        }

        Ok(Self::default())
    }
}

fn user_home_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vulnhuntr").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_budget_and_checkpointing_on() {
        let cfg = Config::default();
        assert_eq!(cfg.cost.budget, None);
        assert!(cfg.cost.checkpoint);
        assert_eq!(cfg.analysis.max_iterations, 7);
        assert!(cfg.analysis.vuln_types.is_none());
    }

    #[test]
    fn missing_project_file_falls_back_to_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/path.toml")).unwrap();
        assert_eq!(cfg.llm.model, default_model());
    }

    #[test]
    fn loads_toml_overrides() {
        let dir = std::env::temp_dir().join(format!("vulnhuntr-cfgtest-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cfg.toml");
        std::fs::write(
            &path,
            r#"
            [cost]
            budget = 5.0

            [analysis]
            max_iterations = 3
            confidence_threshold = 4
            "#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.cost.budget, Some(5.0));
        assert_eq!(cfg.analysis.max_iterations, 3);
        assert_eq!(cfg.analysis.confidence_threshold, 4);
    }

    #[test]
    fn loads_yaml_overrides() {
        let dir = std::env::temp_dir().join(format!("vulnhuntr-cfgtest-yaml-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cfg.yaml");
        std::fs::write(
            &path,
            "cost:\n  budget: 2.5\nanalysis:\n  max_iterations: 4\n",
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.cost.budget, Some(2.5));
        assert_eq!(cfg.analysis.max_iterations, 4);
    }
}
