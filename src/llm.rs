use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Attempts made when the model returns an empty completion.
const EMPTY_COMPLETION_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Prompt in, text out.
#[async_trait]
pub trait GenerativeOracle: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl LlmClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("LLM_BASE_URL").unwrap_or_else(|_| {
            "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
        });
        let model = dotenv::var("LLM_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());
        let api_key = dotenv::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());
        Self::new(base_url, model, api_key)
    }

    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            model,
            api_key,
            temperature: 0.3,
        })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") || base.ends_with("/openai") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    /// Non-streaming chat completion.
    pub async fn chat(&self, messages: &[Message]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("LLM request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("Failed to read LLM response")?;
        if !status.is_success() {
            let snippet: String = text.chars().take(500).collect();
            bail!("LLM returned {}: {}", status, snippet);
        }
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse LLM JSON")?;

        // Extract content from choices[0].message.content (handle null)
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

#[async_trait]
impl GenerativeOracle for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let messages = vec![Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];

        for attempt in 1..=EMPTY_COMPLETION_ATTEMPTS {
            let content = self.chat(&messages).await?;
            if !content.trim().is_empty() {
                debug!(attempt, response_len = content.len(), "LLM completion received");
                return Ok(content);
            }
            warn!(attempt, "LLM returned an empty completion");
        }
        bail!(
            "LLM returned an empty completion {} times",
            EMPTY_COMPLETION_ATTEMPTS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(content: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "choices": [{ "message": { "content": content } }] })
    }

    #[test]
    fn test_endpoint_resolution() {
        let client = |base: &str| LlmClient::new(base.to_string(), "m".into(), None).unwrap();
        assert_eq!(
            client("http://localhost:1234/v1").endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            client("https://generativelanguage.googleapis.com/v1beta/openai/").endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
        );
        assert_eq!(
            client("http://host/chat/completions").endpoint(),
            "http://host/chat/completions"
        );
        assert_eq!(client("http://host").endpoint(), "http://host/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_generate_sends_bearer_and_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("hello".into())))
            .mount(&server)
            .await;

        let client = LlmClient::new(
            format!("{}/v1", server.uri()),
            "test-model".into(),
            Some("secret".into()),
        )
        .unwrap();
        assert_eq!(client.generate("hi").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_generate_gives_up_on_repeated_empty_completions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion(serde_json::Value::Null)),
            )
            .expect(3)
            .mount(&server)
            .await;

        let client = LlmClient::new(format!("{}/v1", server.uri()), "m".into(), None).unwrap();
        assert!(client.generate("hi").await.is_err());
    }

    #[tokio::test]
    async fn test_generate_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = LlmClient::new(format!("{}/v1", server.uri()), "m".into(), None).unwrap();
        let err = client.generate("hi").await.unwrap_err();
        assert!(format!("{:#}", err).contains("503"));
    }
}
