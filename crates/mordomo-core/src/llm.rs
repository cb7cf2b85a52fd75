//! OpenAI-compatible chat-completions client used for semantic routing and
//! response enhancement

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agents::AgentResponse;
use crate::enhance::{Enhancer, build_context, enhancement_prompt};
use crate::router::{Classification, DomainDescription, SemanticClassifier, classification_prompt, parse_verdict};

/// Connection and sampling settings for both model calls
#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: String,
    /// Endpoint root, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub model: String,
    pub classify_max_tokens: u32,
    pub enhance_max_tokens: u32,
    pub classify_timeout: Duration,
    pub enhance_timeout: Duration,
    pub classify_temperature: f32,
    pub enhance_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.synthetic.new/v1".to_string(),
            model: "hf:deepseek-ai/DeepSeek-V3".to_string(),
            classify_max_tokens: 100,
            enhance_max_tokens: 200,
            classify_timeout: Duration::from_secs(10),
            enhance_timeout: Duration::from_secs(30),
            // low temperature keeps routing verdicts stable
            classify_temperature: 0.1,
            enhance_temperature: 0.7,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &mask_key(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("classify_max_tokens", &self.classify_max_tokens)
            .field("enhance_max_tokens", &self.enhance_max_tokens)
            .field("classify_timeout", &self.classify_timeout)
            .field("enhance_timeout", &self.enhance_timeout)
            .finish()
    }
}

fn mask_key(key: &str) -> String {
    if key.len() > 7 && key.is_char_boundary(3) && key.is_char_boundary(key.len() - 4) {
        format!("{}...{}", &key[..3], &key[key.len() - 4..])
    } else {
        "***".to_string()
    }
}

/// Chat-completions client
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("client", &"<reqwest::Client>")
            .field("config", &self.config)
            .finish()
    }
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        // per-request timeouts are applied in `complete`
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Send one user prompt and return the trimmed text of the first choice
    pub async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature,
        };

        debug!(
            "LLM request: model={}, max_tokens={}, prompt_chars={}",
            self.config.model,
            max_tokens,
            prompt.chars().count()
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to LLM API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "LLM API request failed with status {}: {}",
                status,
                error_text.chars().take(200).collect::<String>()
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse LLM API response")?;

        extract_content(parsed)
    }
}

fn extract_content(response: ChatResponse) -> Result<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("LLM response had no choices"))?;
    let content = choice
        .message
        .content
        .ok_or_else(|| anyhow!("LLM response had no content"))?;
    Ok(content.trim().to_string())
}

#[async_trait]
impl SemanticClassifier for LlmClient {
    async fn classify_via_model(
        &self,
        query: &str,
        domains: &[DomainDescription],
    ) -> Result<Classification> {
        let prompt = classification_prompt(query, domains);
        let content = self
            .complete(
                &prompt,
                self.config.classify_max_tokens,
                self.config.classify_temperature,
                self.config.classify_timeout,
            )
            .await?;
        parse_verdict(&content, domains).ok_or_else(|| {
            anyhow!(
                "Unusable classification verdict: {}",
                content.chars().take(100).collect::<String>()
            )
        })
    }
}

#[async_trait]
impl Enhancer for LlmClient {
    async fn enhance(&self, query: &str, response: &AgentResponse, agent_id: &str) -> Result<String> {
        let context = build_context(response, agent_id);
        let prompt = enhancement_prompt(query, &context, agent_id);
        self.complete(
            &prompt,
            self.config.enhance_max_tokens,
            self.config.enhance_temperature,
            self.config.enhance_timeout,
        )
        .await
    }
}

// ── wire types ──

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_masks_api_key() {
        let client = LlmClient::new(LlmConfig {
            api_key: "syn_0123456789abcdef".to_string(),
            ..Default::default()
        })
        .unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("0123456789"));
        assert!(debug.contains("syn...cdef"));
        assert!(debug.contains("DeepSeek-V3"));
    }

    #[test]
    fn test_short_key_fully_masked() {
        assert_eq!(mask_key("abc"), "***");
        assert_eq!(mask_key(""), "***");
    }

    #[test]
    fn test_defaults() {
        let config = LlmConfig::default();
        assert_eq!(config.classify_max_tokens, 100);
        assert_eq!(config.enhance_max_tokens, 200);
        assert_eq!(config.classify_timeout, Duration::from_secs(10));
        assert_eq!(config.enhance_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = LlmClient::new(LlmConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn test_request_wire_shape() {
        let body = ChatRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: "olá",
            }],
            max_tokens: 100,
            temperature: 0.5,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 100);
        assert_eq!(value["temperature"], 0.5);
    }

    #[test]
    fn test_extract_content() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "  {\"agent\": \"ev_agent\"}  "}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(parsed).unwrap(), r#"{"agent": "ev_agent"}"#);

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(extract_content(empty).is_err());
    }
}
