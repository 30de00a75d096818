//! LLM arbiter for full-compare hybrid transcription
//!
//! A single call: given two candidate renderings and recent dialogue
//! context, return the better (possibly merged) text. Any transport
//! qualifies; the shipped implementation talks to a local Ollama server.
//! Unavailability must degrade silently — the hybrid layer falls back to
//! the primary rendering.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Arbiter capability
#[async_trait]
pub trait TranscriptArbiter: Send + Sync {
    /// Pick or compose the better rendering of the same audio
    async fn select_best(&self, primary: &str, secondary: &str, context: &str) -> Result<String>;
}

/// Ollama-backed arbiter configuration
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    /// Ollama model name (e.g. "llama3.2", "qwen2.5")
    pub model: String,
    /// Ollama API URL
    pub url: String,
    /// Generation temperature; low keeps it deterministic
    pub temperature: f32,
    /// Max tokens to generate. Thinking models may spend many tokens on
    /// reasoning before the answer.
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2".to_string(),
            url: "http://localhost:11434".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            timeout: Duration::from_secs(180),
        }
    }
}

/// LLM arbiter over the Ollama chat API
pub struct OllamaArbiter {
    config: ArbiterConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    /// Disable thinking mode for models that support it
    think: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: Option<OllamaResponseMessage>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

impl OllamaResponseMessage {
    /// Extract the final answer, stripping `<think>...</think>` blocks
    /// that reasoning models wrap around their output.
    fn answer(&self) -> String {
        let content = self.content.trim();

        if let Some(pos) = content.find("</think>") {
            let after_think = content[pos + "</think>".len()..].trim();
            if !after_think.is_empty() {
                return after_think.to_string();
            }
        }

        content.to_string()
    }
}

impl OllamaArbiter {
    pub fn new(config: ArbiterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    pub fn with_model_url(model: &str, url: &str) -> Result<Self> {
        Self::new(ArbiterConfig {
            model: model.to_string(),
            url: url.to_string(),
            ..Default::default()
        })
    }

    /// Check if the Ollama server answers at all
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.url);
        self.client.get(&url).send().await.is_ok()
    }
}

#[async_trait]
impl TranscriptArbiter for OllamaArbiter {
    async fn select_best(&self, primary: &str, secondary: &str, context: &str) -> Result<String> {
        if !self.is_available().await {
            tracing::warn!(
                "Ollama not available at {}, returning primary",
                self.config.url
            );
            return Ok(primary.to_string());
        }

        let system_prompt = "You are an expert at repairing speech transcriptions.\n\n\
            Two speech recognition models transcribed the same audio. They make \
            different mistakes: one may render names and technical terms better, \
            the other punctuation, and either may drop or distort words.\n\n\
            Criteria, in priority order:\n\
            1. Word correctness - prefer words that make sense in context\n\
            2. Completeness - keep words present in only one variant\n\
            3. Proper nouns and technical terms must be rendered correctly\n\
            4. Punctuation\n\n\
            You may pick one variant whole, combine words from both, or fix \
            obvious misrecognitions.\n\n\
            Return ONLY the final transcription text, without explanations.";

        let user_prompt = format!(
            "Context (preceding dialogue):\n{}\n\nVariant 1:\n{}\n\nVariant 2:\n{}\n\nProduce the best transcription:",
            context, primary, secondary
        );

        let request = OllamaRequest {
            model: self.config.model.clone(),
            messages: vec![
                OllamaMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                OllamaMessage {
                    role: "user".to_string(),
                    content: user_prompt,
                },
            ],
            stream: false,
            think: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let url = format!("{}/api/chat", self.config.url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Ollama request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama returned status {}", response.status());
        }

        let body: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        if let Some(error) = body.error {
            anyhow::bail!("Ollama error: {}", error);
        }

        let message = body.message.context("Ollama response without message")?;
        let answer = message.answer();

        tracing::debug!(
            "Arbiter: {} chars in, {} chars selected",
            primary.len() + secondary.len(),
            answer.len()
        );

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_think_tag_stripping() {
        let msg = OllamaResponseMessage {
            content: "<think>considering both variants</think>\nfinal answer".to_string(),
        };
        assert_eq!(msg.answer(), "final answer");

        let plain = OllamaResponseMessage {
            content: "just text".to_string(),
        };
        assert_eq!(plain.answer(), "just text");
    }
}
