//! GitHub Issues sender: one authenticated POST per finding, titled and
//! bodied from the finding's own fields.

use crate::error::{EngineError, Result};
use crate::http::HttpClient;
use crate::model::Finding;
use serde::Serialize;

const GITHUB_API: &str = "https://api.github.com";

#[derive(Serialize)]
struct CreateIssueRequest<'a> {
    title: &'a str,
    body: String,
    labels: Vec<&'static str>,
}

pub struct GitHubIssueSender {
    http: HttpClient,
    token: String,
    repo: String,
}

impl GitHubIssueSender {
    /// `repo` is `owner/name`.
    pub fn new(token: String, repo: String) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new("vulnhuntr/0.1.0")?,
            token,
            repo,
        })
    }

    pub async fn file_issue(&self, finding: &Finding) -> Result<()> {
        let url = format!("{GITHUB_API}/repos/{}/issues", self.repo);
        let request = CreateIssueRequest {
            title: &finding.title,
            body: issue_body(finding),
            labels: vec!["security", severity_label(finding)],
        };
        let body = serde_json::to_string(&request).map_err(|e| EngineError::parse(e.to_string()))?;
        self.http
            .post_json_raw(
                &url,
                &body,
                &[("Authorization", &format!("Bearer {}", self.token))],
            )
            .await?;
        Ok(())
    }
}

fn severity_label(finding: &Finding) -> &'static str {
    use crate::model::Severity::*;
    match finding.severity {
        Critical => "severity:critical",
        High => "severity:high",
        Medium => "severity:medium",
        Low => "severity:low",
        Info => "severity:info",
    }
}

fn issue_body(finding: &Finding) -> String {
    let mut body = format!(
        "**{}** ({}) in `{}`\n\nConfidence: {}/10\n\n{}\n",
        finding.cwe_name, finding.cwe_id, finding.file_path.display(), finding.confidence, finding.analysis
    );
    if let Some(poc) = &finding.poc {
        body.push_str(&format!("\n**Proof of concept:**\n```\n{poc}\n```\n"));
    }
    body
}
