//! OpenAI-compatible [`TextGenerator`].
//!
//! All four operations go through `POST {url}/chat/completions`. Topic
//! identification and page generation request JSON mode and validate the
//! reply with [`codewiki_core::schema`]; the overview and answers are plain
//! markdown.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use codewiki_core::models::{IdentifiedTopic, PageDraft};
use codewiki_core::schema::{parse_identified_topics, parse_page_draft};

use crate::config::GenerationConfig;
use crate::prompts;
use crate::traits::{AnswerRequest, OverviewRequest, PageRequest, TextGenerator, TopicRequest};

pub struct OpenAiGenerator {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }

    /// One chat completion, retried on rate limits, server errors and
    /// transport failures.
    async fn chat(&self, system: &str, user: &str, json_mode: bool) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .post(format!("{}/chat/completions", self.url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let retryable = match result {
                Ok(response) if response.status().is_success() => {
                    let json: serde_json::Value = response.json().await?;
                    return parse_chat_response(&json);
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    let err = anyhow!("Chat API error {}: {}", status, text);
                    if !(status.as_u16() == 429 || status.is_server_error()) {
                        return Err(err);
                    }
                    err
                }
                Err(e) => anyhow!(e),
            };

            if attempt > self.max_retries {
                return Err(retryable.context(format!("chat failed after {} attempts", attempt)));
            }
            let delay = Duration::from_secs(1 << (attempt - 1).min(4));
            tracing::warn!(attempt, error = %retryable, ?delay, "chat completion failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn identify_topics(&self, req: &TopicRequest) -> Result<Vec<IdentifiedTopic>> {
        let (system, user) = prompts::topic_prompt(req);
        let raw = self.chat(&system, &user, true).await?;
        Ok(parse_identified_topics(&raw, req.max_topics)?)
    }

    async fn generate_page(&self, req: &PageRequest) -> Result<PageDraft> {
        let (system, user) = prompts::page_prompt(req);
        let raw = self.chat(&system, &user, true).await?;
        Ok(parse_page_draft(&raw)?)
    }

    async fn synthesize_overview(&self, req: &OverviewRequest) -> Result<String> {
        let (system, user) = prompts::overview_prompt(req);
        let overview = self.chat(&system, &user, false).await?;
        if overview.trim().is_empty() {
            bail!("Generator returned an empty overview");
        }
        Ok(overview)
    }

    async fn answer(&self, req: &AnswerRequest) -> Result<String> {
        let (system, user) = prompts::answer_prompt(req);
        self.chat(&system, &user, false).await
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}

/// Create the generator named by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn TextGenerator>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"topics\": []}"}}]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "{\"topics\": []}");
    }

    #[test]
    fn test_parse_chat_response_missing_content() {
        let json = serde_json::json!({"choices": []});
        assert!(parse_chat_response(&json).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = GenerationConfig {
            provider: "mystery".to_string(),
            ..GenerationConfig::default()
        };
        assert!(create_generator(&config).is_err());
    }
}
