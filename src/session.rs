//! One stateful conversation bound to a single (file, vuln-type) analysis.
//!
//! Wraps the LLM transport with the prefill protocol, a deterministic
//! repair pass plus one-shot schema correction, retry with jittered
//! exponential backoff, and cooperative cancellation.

use crate::error::{EngineError, Result};
use crate::llm::{LlmClient, Message, Provider, Role, Usage};
use crate::llm::extract::{extract_and_repair, strip_fences};
use crate::model::Response;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_BASE_MS: u64 = 1000;
const RETRY_FACTOR: u32 = 2;
const RETRY_MAX_ATTEMPTS: u32 = 5;
const RETRY_JITTER: f64 = 0.25;
const REQUEST_TIMEOUT_SECS: u64 = 180;

/// Process-wide cooperative cancellation flag. One token is installed at
/// the start of a run and checked before every suspension point.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct LlmSession<'a> {
    client: &'a LlmClient,
    cancellation: CancellationToken,
    messages: Vec<Message>,
    system: String,
    cost_so_far: f64,
}

impl<'a> LlmSession<'a> {
    pub fn new(client: &'a LlmClient, system: impl Into<String>, cancellation: CancellationToken) -> Self {
        Self {
            client,
            cancellation,
            messages: Vec::new(),
            system: system.into(),
            cost_so_far: 0.0,
        }
    }

    pub fn cost_so_far(&self) -> f64 {
        self.cost_so_far
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub async fn send_initial(&mut self, prompt: String) -> Result<(Response, Usage)> {
        self.messages.push(Message {
            role: Role::User,
            content: prompt,
        });
        self.turn().await
    }

    pub async fn send_followup(&mut self, prompt: String) -> Result<(Response, Usage)> {
        self.messages.push(Message {
            role: Role::User,
            content: prompt,
        });
        self.turn().await
    }

    /// Run one full turn: prefill, retried send, repair, and one-shot
    /// schema correction.
    async fn turn(&mut self) -> Result<(Response, Usage)> {
        let (raw_text, usage) = self.send_with_retry().await?;

        match extract_and_repair::<Response>(&raw_text) {
            Ok(response) => match response.validate() {
                Ok(()) => {
                    self.record_success(raw_text, &usage);
                    Ok((response, usage))
                }
                Err(validation_error) => {
                    self.correction_round(raw_text, validation_error, usage).await
                }
            },
            Err(parse_error) => self.correction_round(raw_text, parse_error, usage).await,
        }
    }

    /// One-shot correction: quote the specific error, ask for a fixed
    /// object only. If this also fails, the session gives up.
    async fn correction_round(
        &mut self,
        prior_raw: String,
        error: String,
        prior_usage: Usage,
    ) -> Result<(Response, Usage)> {
        warn!(error = %error, "response failed validation, issuing one-shot correction");
        self.messages.push(Message {
            role: Role::Assistant,
            content: prior_raw,
        });
        self.messages.push(Message {
            role: Role::User,
            content: format!(
                "Your previous response was invalid: {error}\n\
                 Respond with a corrected JSON object only, matching the required schema exactly."
            ),
        });

        let (raw_text, usage) = self.send_with_retry().await?;
        let mut combined_usage = prior_usage;
        combined_usage.input_tokens += usage.input_tokens;
        combined_usage.output_tokens += usage.output_tokens;

        match extract_and_repair::<Response>(&raw_text) {
            Ok(response) if response.validate().is_ok() => {
                self.record_success(raw_text, &combined_usage);
                Ok((response, combined_usage))
            }
            _ => Err(EngineError::parse(format!(
                "model output unrecoverable after repair and one correction: {error}"
            ))),
        }
    }

    fn record_success(&mut self, raw_text: String, usage: &Usage) {
        self.cost_so_far += crate::cost::estimate(self.client.model(), usage.input_tokens, usage.output_tokens);
        self.messages.push(Message {
            role: Role::Assistant,
            content: raw_text,
        });
    }

    /// Send the current message history with the prefill seed injected,
    /// retrying transient failures with jittered exponential backoff.
    async fn send_with_retry(&self) -> Result<(String, Usage)> {
        let mut delay_ms = RETRY_BASE_MS;
        let mut last_error = EngineError::provider_transient("llm", "no attempts made");

        for attempt in 0..RETRY_MAX_ATTEMPTS {
            if self.cancellation.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            match self.send_once().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    last_error = e;
                    if attempt + 1 == RETRY_MAX_ATTEMPTS {
                        break;
                    }
                    let jitter = 1.0 + rand::thread_rng().gen_range(-RETRY_JITTER..=RETRY_JITTER);
                    let sleep_ms = (delay_ms as f64 * jitter).max(0.0) as u64;
                    debug!(attempt, sleep_ms, "retrying after transient LLM error");
                    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                    delay_ms = delay_ms.saturating_mul(RETRY_FACTOR as u64);

                    if self.cancellation.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn send_once(&self) -> Result<(String, Usage)> {
        let prefill = "{";
        let mut send_messages = self.messages.clone();
        let supports_prefill = self.client.provider().supports_prefill();

        if supports_prefill {
            send_messages.push(Message {
                role: Role::Assistant,
                content: prefill.to_string(),
            });
        }

        let timeout = Duration::from_secs(REQUEST_TIMEOUT_SECS);
        let (text, usage) = tokio::time::timeout(timeout, self.client.send(&self.system, &send_messages))
            .await
            .map_err(|_| EngineError::provider_transient("llm", "request timed out"))??;

        Ok((assemble_completion(prefill, &text, supports_prefill), usage))
    }

    #[allow(dead_code)]
    pub fn provider(&self) -> &Provider {
        self.client.provider()
    }
}

/// Reassemble the prefill seed and a raw completion into the text the
/// repair pass sees.
///
/// Anthropic honors a trailing assistant turn as a true prefill: the
/// completion it returns is only the continuation, so the seed is always
/// missing and must be prepended. Backends without prefill support see the
/// seed only as a plain instruction, so they may echo it, ignore it, or
/// return a fenced/commented response that already starts with `{` further
/// in. Stripping fences before deciding whether to prepend avoids gluing
/// the seed onto the outside of a code fence instead of onto the JSON
/// object inside it.
fn assemble_completion(prefill: &str, text: &str, supports_prefill: bool) -> String {
    if supports_prefill {
        return format!("{prefill}{text}");
    }

    let unfenced = strip_fences(text);
    if unfenced.starts_with(prefill) {
        unfenced.to_string()
    } else {
        format!("{prefill}{unfenced}")
    }
}
