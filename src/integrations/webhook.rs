//! Generic webhook sender: POSTs a JSON summary of a run to a configured
//! URL, built on `http::HttpClient::post_json_raw`.

use crate::error::{EngineError, Result};
use crate::http::HttpClient;
use crate::model::WorkflowResult;
use serde::Serialize;

#[derive(Serialize)]
struct WebhookPayload<'a> {
    total_files: usize,
    total_findings: usize,
    outcome: &'a str,
    findings: &'a [crate::model::Finding],
}

pub struct WebhookSender {
    http: HttpClient,
    url: String,
}

impl WebhookSender {
    pub fn new(url: String) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new("vulnhuntr/0.1.0")?,
            url,
        })
    }

    pub async fn send(&self, result: &WorkflowResult) -> Result<()> {
        let payload = WebhookPayload {
            total_files: result.summary.total_files,
            total_findings: result.summary.total_findings,
            outcome: outcome_str(result),
            findings: &result.findings,
        };
        let body = serde_json::to_string(&payload).map_err(|e| EngineError::parse(e.to_string()))?;
        self.http.post_json_raw(&self.url, &body, &[]).await?;
        Ok(())
    }
}

fn outcome_str(result: &WorkflowResult) -> &'static str {
    match result.outcome {
        crate::model::RunOutcome::Completed => "completed",
        crate::model::RunOutcome::BudgetStopped => "budget_stopped",
        crate::model::RunOutcome::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunOutcome, Summary};

    #[test]
    fn outcome_str_matches_variant() {
        let result = WorkflowResult {
            findings: Vec::new(),
            summary: Summary::build(0, &[]),
            outcome: RunOutcome::BudgetStopped,
        };
        assert_eq!(outcome_str(&result), "budget_stopped");
    }
}
