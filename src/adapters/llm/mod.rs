//! External summarization service.
//!
//! [`SummaryBackend`] is the seam the gateway calls through; the production
//! implementation talks to any OpenAI-compatible `/v1/chat/completions`
//! endpoint (Ollama, llama.cpp server, hosted gateways).

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{DigestError, Result};

/// Classified result of one external call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// Raw completion text
    Success(String),
    /// Worth retrying: timeouts, connection failures, 429, 5xx
    Transient(String),
    /// Retrying cannot help: other 4xx, content filter, malformed envelope
    Permanent(String),
}

#[async_trait]
pub trait SummaryBackend: Send + Sync {
    /// Model identifier, part of the cache key and recorded on summaries
    fn model(&self) -> &str;

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> CallOutcome;
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(serde::Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

pub struct ChatCompletionsClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    max_tokens: u32,
}

impl ChatCompletionsClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| DigestError::Network(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", config.url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key(),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
        })
    }
}

fn classify_status(status: StatusCode, body: &str) -> CallOutcome {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        CallOutcome::Transient(detail)
    } else {
        CallOutcome::Permanent(detail)
    }
}

#[async_trait]
impl SummaryBackend for ChatCompletionsClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> CallOutcome {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return CallOutcome::Transient(format!("request timed out: {}", e))
            }
            Err(e) => {
                warn!("Summarization request to {} failed: {}", self.endpoint, e);
                return CallOutcome::Transient(format!("request failed: {}", e));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return classify_status(status, &text);
        }

        let parsed: ChatResponse = match resp.json().await {
            Ok(parsed) => parsed,
            Err(e) if e.is_timeout() => {
                return CallOutcome::Transient(format!("response timed out: {}", e))
            }
            Err(e) => return CallOutcome::Permanent(format!("unreadable completion envelope: {}", e)),
        };

        let Some(choice) = parsed.choices.into_iter().next() else {
            return CallOutcome::Permanent("completion had no choices".into());
        };
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return CallOutcome::Permanent("completion blocked by content filter".into());
        }

        debug!(
            "Completion received ({} chars, finish_reason={:?})",
            choice.message.content.len(),
            choice.finish_reason
        );
        CallOutcome::Success(choice.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> LlmConfig {
        LlmConfig {
            url: url.to_string(),
            model: "test-model".into(),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn completion(content: &str, finish_reason: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": finish_reason
            }]
        })
    }

    #[tokio::test]
    async fn test_success_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"tldr\":\"ok\"}", "stop")))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(&config(&server.uri())).unwrap();
        assert_eq!(
            client.complete("sys", "user").await,
            CallOutcome::Success("{\"tldr\":\"ok\"}".into())
        );
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("x", "stop")))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = ChatCompletionsClient::new(&config(&server.uri())).unwrap();
        client.api_key = Some("sekrit".into());
        assert!(matches!(client.complete("s", "u").await, CallOutcome::Success(_)));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(&config(&server.uri())).unwrap();
        assert!(matches!(client.complete("s", "u").await, CallOutcome::Transient(_)));
        match client.complete("s", "u").await {
            CallOutcome::Permanent(msg) => assert!(msg.contains("400")),
            other => panic!("expected permanent, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_content_filter_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("", "content_filter")))
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(&config(&server.uri())).unwrap();
        assert!(matches!(client.complete("s", "u").await, CallOutcome::Permanent(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let client = ChatCompletionsClient::new(&config("http://127.0.0.1:9")).unwrap();
        assert!(matches!(client.complete("s", "u").await, CallOutcome::Transient(_)));
    }

    #[test]
    fn test_classify_server_errors() {
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            CallOutcome::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            CallOutcome::Permanent(_)
        ));
    }
}
