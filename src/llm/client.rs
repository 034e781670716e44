use super::models::{ModelSettings, Usage};
use super::Generator;
use crate::repair::prompts::SYSTEM_PROMPT;
use crate::util::truncate;
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// OpenRouter direct API URL (BYOK mode)
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff

/// Response from LLM including content and usage stats
#[derive(Debug)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<Usage>,
    pub model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by OpenRouter chat completions.
///
/// The HTTP client is async; a private tokio runtime drives it so callers
/// see a plain blocking `generate`. Safe to share across threads.
pub struct OpenRouterGenerator {
    api_key: String,
    settings: ModelSettings,
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    usage: Mutex<Usage>,
}

impl OpenRouterGenerator {
    pub fn new(api_key: impl Into<String>, settings: ModelSettings) -> anyhow::Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(anyhow!(
                "No API key configured. Set the OPENROUTER_API_KEY environment variable."
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .context("Failed to build HTTP client")?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("fixloop-http")
            .enable_all()
            .build()
            .context("Failed to start async runtime for the HTTP client")?;
        Ok(Self {
            api_key,
            settings,
            client,
            runtime,
            usage: Mutex::new(Usage::default()),
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Token usage accumulated over every successful call so far.
    pub fn usage(&self) -> Usage {
        self.usage
            .lock()
            .map(|usage| usage.clone())
            .unwrap_or_default()
    }

    fn record_usage(&self, usage: Option<&Usage>) {
        if let (Some(usage), Ok(mut total)) = (usage, self.usage.lock()) {
            total.add(usage);
        }
    }

    /// Call the API, retrying rate limits with exponential backoff.
    pub async fn call_llm_with_usage(&self, system: &str, user: &str) -> anyhow::Result<LlmResponse> {
        let request = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            seed: self.settings.seed,
            stream: false,
        };

        let mut retry_count = 0;
        loop {
            let response = self
                .client
                .post(OPENROUTER_URL)
                .header("Content-Type", "application/json")
                .header("X-Title", "fixloop")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await
                .context("Could not connect to OpenRouter")?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    anyhow!(
                        "Failed to parse OpenRouter response: {}\n{}",
                        e,
                        truncate(&text, 200)
                    )
                })?;
                let content = parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                debug!(chars = content.len(), "OpenRouter completion received");
                return Ok(LlmResponse {
                    content,
                    usage: parsed.usage,
                    model: parsed.model.unwrap_or_default(),
                });
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let retry_after = parse_retry_after(&text).unwrap_or_else(|| {
                    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1)) / 1000
                });
                warn!(
                    retry_after_secs = retry_after,
                    attempt = retry_count,
                    max = MAX_RETRIES,
                    "OpenRouter rate limited; retrying"
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            let error_msg = match status.as_u16() {
                401 => "Invalid API key. Check OPENROUTER_API_KEY.".to_string(),
                429 => format!(
                    "Rate limited by OpenRouter after {} retries. Try again in a few minutes.",
                    retry_count
                ),
                500..=599 => format!(
                    "OpenRouter server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, truncate(&text, 200)),
            };
            return Err(anyhow!("{}", error_msg));
        }
    }
}

impl Generator for OpenRouterGenerator {
    fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let response = self
            .runtime
            .block_on(self.call_llm_with_usage(SYSTEM_PROMPT, prompt))?;
        self.record_usage(response.usage.as_ref());
        debug!(model = %response.model, "Generation finished");
        Ok(response.content)
    }
}

/// Extract retry-after hint from OpenRouter response (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    // Look for patterns like "retry after X seconds" or "wait X seconds"
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry").or_else(|| text_lower.find("wait"))?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}
