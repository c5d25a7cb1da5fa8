//! Wire-format transport for the LLM backends. No tool-calling: the
//! model's only channel back to the engine is the `context_code` field
//! of its JSON [`crate::model::Response`], so this layer only needs
//! plain multi-turn text messages, not a tool-use protocol.

use crate::error::{EngineError, Result};
use crate::http::HttpClient;
use serde::{Deserialize, Serialize};

/// LLM provider — determines wire format and default endpoint.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    #[default]
    OpenRouter,
    #[serde(rename = "openai")]
    OpenAi,
    Groq,
}

impl Provider {
    fn default_base_url(&self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
        }
    }

    fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Groq => "GROQ_API_KEY",
        }
    }

    /// Whether this provider's wire format honors a trailing assistant
    /// message as a prefill seed. Anthropic's Messages API does; most
    /// OpenAI-compatible chat-completions endpoints reject or ignore a
    /// trailing assistant turn, so those fall back to concatenation.
    pub fn supports_prefill(&self) -> bool {
        matches!(self, Self::Anthropic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
    http: HttpClient,
}

#[derive(Serialize)]
struct WireMsg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<WireMsg<'a>>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMsg<'a>>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl LlmClient {
    pub fn new(
        provider: Provider,
        api_key: String,
        model: String,
        max_tokens: u32,
        base_url: Option<String>,
    ) -> Result<Self> {
        let http = HttpClient::new("vulnhuntr/0.1.0")?;
        let base_url = base_url.unwrap_or_else(|| provider.default_base_url().into());
        Ok(Self {
            provider,
            api_key,
            model,
            max_tokens,
            base_url,
            http,
        })
    }

    pub fn from_config(
        provider: Provider,
        model: String,
        max_tokens: u32,
        api_key_env: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let env_var = api_key_env.unwrap_or_else(|| provider.default_api_key_env().into());
        let api_key = std::env::var(&env_var).unwrap_or_default();
        Self::new(provider, api_key, model, max_tokens, base_url)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Worst-case output size for a single call, used by the engine's
    /// pre-call budget check (`CostTracker::estimate`).
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Send a full conversation (system prompt + turn history) and return
    /// the new assistant text plus token usage. Does not implement the
    /// prefill protocol itself — see `crate::session::LlmSession`, which
    /// layers that, retries, and JSON extraction on top of this.
    pub async fn send(&self, system: &str, messages: &[Message]) -> Result<(String, Usage)> {
        match self.provider {
            Provider::Anthropic => self.send_anthropic(system, messages).await,
            Provider::OpenRouter | Provider::OpenAi | Provider::Groq => {
                self.send_openai(system, messages).await
            }
        }
    }

    async fn send_anthropic(&self, system: &str, messages: &[Message]) -> Result<(String, Usage)> {
        let wire: Vec<WireMsg> = messages
            .iter()
            .map(|m| WireMsg {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect();

        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: wire,
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| EngineError::parse(format!("serialize request: {e}")))?;

        let url = format!("{}/messages", self.base_url);
        let response_text = self
            .http
            .post_json_raw_once(
                &url,
                &body,
                &[
                    ("x-api-key", &self.api_key),
                    ("anthropic-version", "2023-06-01"),
                ],
            )
            .await?;

        let resp: AnthropicResponse = serde_json::from_str(&response_text)
            .map_err(|e| EngineError::parse(format!("parse Anthropic response: {e}")))?;

        let text = resp
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");
        let usage = Usage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        };
        Ok((text, usage))
    }

    async fn send_openai(&self, system: &str, messages: &[Message]) -> Result<(String, Usage)> {
        let mut wire = vec![WireMsg {
            role: "system",
            content: system,
        }];
        wire.extend(messages.iter().map(|m| WireMsg {
            role: match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &m.content,
        }));

        let request = OpenAiRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: wire,
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| EngineError::parse(format!("serialize request: {e}")))?;

        let url = format!("{}/chat/completions", self.base_url);
        let response_text = self
            .http
            .post_json_raw_once(
                &url,
                &body,
                &[("Authorization", &format!("Bearer {}", self.api_key))],
            )
            .await?;

        let resp: OpenAiResponse = serde_json::from_str(&response_text)
            .map_err(|e| EngineError::parse(format!("parse LLM response: {e}")))?;

        let usage = resp
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| EngineError::parse("empty response from LLM"))?;

        Ok((text, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_supports_prefill_others_dont() {
        assert!(Provider::Anthropic.supports_prefill());
        assert!(!Provider::OpenRouter.supports_prefill());
        assert!(!Provider::OpenAi.supports_prefill());
        assert!(!Provider::Groq.supports_prefill());
    }

    #[test]
    fn default_base_urls_are_distinct() {
        let urls: std::collections::HashSet<&str> = [
            Provider::Anthropic.default_base_url(),
            Provider::OpenRouter.default_base_url(),
            Provider::OpenAi.default_base_url(),
            Provider::Groq.default_base_url(),
        ]
        .into_iter()
        .collect();
        assert_eq!(urls.len(), 4);
    }
}
