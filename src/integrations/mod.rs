//! Outbound collaborators: push a completed run's findings to a generic
//! webhook or to a GitHub-Issues-shaped tracker. Both reuse
//! `HttpClient::post_json_raw`, which retains its own retry policy since
//! neither caller wraps one of its own (unlike the LLM transport).

pub mod github_issues;
pub mod webhook;
