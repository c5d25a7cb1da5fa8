//! Report serializers. Each format takes the same `WorkflowResult` and
//! produces a `String`; none of them touch the engine's types beyond what
//! `model.rs` already exposes.

mod csv;
mod html;
mod json;
mod markdown;
mod sarif;

use crate::error::{EngineError, Result};
use crate::model::WorkflowResult;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Sarif,
    Html,
    Csv,
    Markdown,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sarif" => Ok(Self::Sarif),
            "html" => Ok(Self::Html),
            "csv" => Ok(Self::Csv),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(format!("unknown report format: {other}")),
        }
    }
}

pub fn render(format: ReportFormat, result: &WorkflowResult) -> Result<String> {
    match format {
        ReportFormat::Json => json::render(result),
        ReportFormat::Sarif => Ok(sarif::render(result)),
        ReportFormat::Html => html::render(result),
        ReportFormat::Csv => Ok(csv::render(result)),
        ReportFormat::Markdown => Ok(markdown::render(result)),
    }
}

fn parse_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::parse(e.to_string())
}
