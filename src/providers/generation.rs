//! Reply generation over a vendor's HTTP API.
//!
//! Hugging Face models are called through the text-generation inference API;
//! every other vendor exposes an OpenAI-compatible `/chat/completions` route.

use crate::config::{credential, LlmConfig};
use crate::error::{AppError, ProviderError};
use crate::providers::{authorized, check_status, trim_endpoint, GenerationProvider, ProviderKind};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct HttpGenerationProvider {
    client: reqwest::Client,
    kind: ProviderKind,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpGenerationProvider {
    pub fn new(config: &LlmConfig, system_prompt: &str, client: reqwest::Client) -> Result<Self, AppError> {
        let kind: ProviderKind = config
            .provider
            .parse()
            .map_err(|e: crate::providers::UnknownProvider| AppError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            kind,
            endpoint: trim_endpoint(&config.endpoint_url).to_string(),
            api_key: credential(&config.api_key).map(str::to_string),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: system_prompt.to_string(),
        })
    }

    fn request(&self, conversation: &str) -> (String, Value) {
        match self.kind {
            ProviderKind::HuggingFace => (
                format!("{}/{}", self.endpoint, self.model),
                json!({
                    "inputs": conversation,
                    "parameters": {
                        "max_new_tokens": self.max_tokens,
                        "temperature": self.temperature,
                        "return_full_text": false,
                    },
                }),
            ),
            _ => (
                format!("{}/chat/completions", self.endpoint),
                json!({
                    "model": self.model,
                    "messages": [
                        { "role": "system", "content": self.system_prompt },
                        { "role": "user", "content": conversation },
                    ],
                    "temperature": self.temperature,
                    "max_tokens": self.max_tokens,
                }),
            ),
        }
    }
}

/// `[{"generated_text": ..}]` or `{"generated_text": ..}`.
fn generated_text(body: &Value) -> Option<String> {
    let entry = match body {
        Value::Array(items) => items.first()?,
        other => other,
    };
    entry.get("generated_text")?.as_str().map(str::to_string)
}

fn completion_text(body: Value) -> Option<String> {
    let completion: ChatCompletion = serde_json::from_value(body).ok()?;
    completion.choices.into_iter().next()?.message.content
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    async fn generate(&self, conversation: &str) -> Result<String, ProviderError> {
        let (url, body) = self.request(conversation);
        let request = authorized(self.client.post(url), self.api_key.as_deref()).json(&body);

        let response = check_status(request.send().await?).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("generation response was not JSON: {}", e)))?;

        let reply = match self.kind {
            ProviderKind::HuggingFace => generated_text(&body),
            _ => completion_text(body),
        };

        reply
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ProviderError::Malformed("generation returned no text".to_string()))
    }

    fn name(&self) -> &str {
        self.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str) -> HttpGenerationProvider {
        let mut config = crate::config::AppConfig::default().llm;
        config.provider = name.to_string();
        config.endpoint_url = "https://example.test/v1/".to_string();
        HttpGenerationProvider::new(&config, "Be brief.", reqwest::Client::new()).unwrap()
    }

    #[test]
    fn test_chat_completions_request() {
        let (url, body) = provider("openrouter").request("User: hi\n");
        assert_eq!(url, "https://example.test/v1/chat/completions");
        assert_eq!(body["messages"][0]["content"], "Be brief.");
        assert_eq!(body["messages"][1]["content"], "User: hi\n");
    }

    #[test]
    fn test_huggingface_request() {
        let (url, body) = provider("huggingface").request("User: hi\n");
        assert_eq!(url, "https://example.test/v1/llama-3.1-8b-instant");
        assert_eq!(body["inputs"], "User: hi\n");
    }

    #[test]
    fn test_reply_extraction() {
        assert_eq!(
            generated_text(&json!([{ "generated_text": "Drink water." }])).as_deref(),
            Some("Drink water.")
        );
        assert_eq!(
            generated_text(&json!({ "generated_text": "Rest." })).as_deref(),
            Some("Rest.")
        );
        assert_eq!(generated_text(&json!([])), None);

        let completion = json!({ "choices": [{ "message": { "role": "assistant", "content": "Hello" } }] });
        assert_eq!(completion_text(completion).as_deref(), Some("Hello"));
        assert_eq!(completion_text(json!({ "choices": [] })), None);
    }

    #[test]
    fn test_unknown_vendor_is_config_error() {
        let mut config = crate::config::AppConfig::default().llm;
        config.provider = "mystery".to_string();
        let result = HttpGenerationProvider::new(&config, "", reqwest::Client::new());
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
