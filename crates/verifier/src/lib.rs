pub mod breaker;
pub mod parse;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use overseer_core::config::VerifierConfig;
use overseer_core::Verdict;
use reqwest::Client;
use tracing::{debug, warn};

pub use breaker::CircuitBreaker;
pub use parse::{fallback_verdict, parse_verdict};

/// What the auditor was asked to judge.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub task: String,
    pub sender: String,
    pub recipient: String,
    pub content: String,
}

impl AuditContext {
    pub fn new(task: &str, sender: &str, recipient: &str, content: &str) -> Self {
        Self {
            task: task.to_string(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            content: content.to_string(),
        }
    }
}

/// Outcome of one audit. `Skipped` means no verdict exists for the message
/// (breaker open or auditing disabled), which the runner reports as
/// degraded mode rather than an error.
#[derive(Debug, Clone)]
pub enum Audit {
    Verdict(Verdict),
    Skipped { reason: String },
}

/// Anything that can audit one message. The contract is total: transport
/// and parse faults are absorbed into a verdict or a skip, never raised.
#[async_trait]
pub trait Auditor: Send + Sync {
    async fn verify(&self, ctx: &AuditContext) -> Audit;
}

/// Remote auditor speaking the OpenAI-compatible chat completions shape,
/// with bounded retries and a process-wide circuit breaker.
pub struct Verifier {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    max_attempts: u32,
    backoff: Duration,
    fail_open: bool,
    breaker: Arc<CircuitBreaker>,
}

impl Verifier {
    pub fn new(
        config: &VerifierConfig,
        api_key_override: Option<String>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client, using default");
                Client::new()
            });

        let api_key = api_key_override
            .or_else(|| config.api_key.clone())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            fail_open: config.fail_open,
            breaker,
        }
    }

    /// One endpoint round trip; returns the completion text.
    async fn request(&self, user_prompt: &str, api_key: &str) -> overseer_core::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt::SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": 0.0,
            "max_tokens": 512,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| overseer_core::Error::Verifier(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(overseer_core::Error::Verifier(format!(
                "endpoint returned {}",
                status
            )));
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| overseer_core::Error::Verifier(format!("invalid response body: {}", e)))?;

        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                overseer_core::Error::Verifier("response carried no completion content".to_string())
            })
    }
}

#[async_trait]
impl Auditor for Verifier {
    async fn verify(&self, ctx: &AuditContext) -> Audit {
        let Some(api_key) = self.api_key.clone() else {
            return Audit::Skipped {
                reason: "no verifier API key configured; auditing disabled".to_string(),
            };
        };

        if !self.breaker.allow() {
            return Audit::Skipped {
                reason: "verifier circuit breaker open; auditing suspended for cool-down"
                    .to_string(),
            };
        }

        let user_prompt = prompt::build_user_prompt(ctx);

        for attempt in 1..=self.max_attempts {
            match self.request(&user_prompt, &api_key).await {
                Ok(content) => {
                    self.breaker.record_success();
                    return Audit::Verdict(parse_verdict(&content, self.fail_open));
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Verifier call failed"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff * 2u32.pow(attempt - 1)).await;
                    }
                }
            }
        }

        self.breaker.record_failure();
        debug!("Verifier endpoint unavailable, emitting fallback verdict");
        Audit::Verdict(fallback_verdict(
            self.fail_open,
            "Verifier endpoint unavailable; fallback verdict.",
        ))
    }
}
