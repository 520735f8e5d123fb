//! Gemini API client
//!
//! Thin wrapper over the `generateContent` REST endpoint with retry on
//! rate limiting and server errors.

use std::time::Duration;

use crate::config::gemini::API_BASE_URL;
use crate::error::LlmError;
use crate::llm::types::*;

const REQUEST_TIMEOUT_SECS: u64 = 60;
const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 1000;

/// Gemini API client bound to one model
#[derive(Debug, Clone)]
pub struct GeminiClient {
    /// HTTP client
    http_client: reqwest::Client,

    api_key: String,
    model: String,
    base_url: String,
    retry_base_delay: Duration,
}

impl GeminiClient {
    /// Create a new client for `model`
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let model = model.into();
        tracing::info!("Gemini client initialized for model: {}", model);

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            model,
            base_url: API_BASE_URL.to_string(),
            retry_base_delay: Duration::from_millis(BASE_DELAY_MS),
        })
    }

    /// Point the client at a different API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Change the first retry delay (doubles on every attempt)
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Model this client talks to
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send the conversation and return the model's reply
    pub async fn generate(
        &self,
        contents: &[Content],
        tools: Option<&[Tool]>,
    ) -> Result<GenerateContentResponse, LlmError> {
        let request = GenerateContentRequest {
            contents: contents.to_vec(),
            tools: tools.map(<[Tool]>::to_vec),
        };

        tracing::info!(
            "Sending request to LLM model: {}. History length: {}.",
            self.model,
            contents.len()
        );
        if let Some(last) = contents.last() {
            tracing::debug!("LLM request contents (last message): {:?}", last);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(&request).await {
                Ok(response) => {
                    tracing::info!("LLM API call successful to model {}", self.model);
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        "Request failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        MAX_ATTEMPTS,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!("Error calling Gemini API ({}): {}", self.model, e);
                    return Err(e);
                }
            }
        }
    }

    async fn send_once(&self, request: &GenerateContentRequest) -> Result<GenerateContentResponse, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|envelope| envelope.error.message)
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)?;
        tracing::debug!(
            "LLM response: {}",
            crate::engine::snippet(&body, 500)
        );
        if let Some(usage) = &parsed.usage_metadata {
            tracing::debug!(
                "Token usage: prompt={} candidates={} total={}",
                usage.prompt_token_count,
                usage.candidates_token_count,
                usage.total_token_count
            );
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> GeminiClient {
        GeminiClient::new("test-key", "gemini-test")
            .unwrap()
            .with_base_url(server.url())
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_generate_sends_key_and_tools() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-test:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .match_body(Matcher::PartialJsonString(
                r#"{"tools":[{"functionDeclarations":[{"name":"get_alerts"}]}]}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"ok"}]}}]}"#)
            .create_async()
            .await;

        let tools = vec![Tool {
            function_declarations: vec![FunctionDeclaration {
                name: "get_alerts".to_string(),
                description: "Alerts".to_string(),
                parameters: Some(Schema::empty_object()),
            }],
        }];
        let response = client(&server)
            .generate(&[Content::user_text("hi")], Some(&tools))
            .await
            .unwrap();

        assert_eq!(response.text().as_deref(), Some("ok"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_message_is_extracted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-test:generateContent")
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"message":"Invalid JSON payload","status":"INVALID_ARGUMENT"}}"#)
            .expect(1)
            .create_async()
            .await;

        let err = client(&server)
            .generate(&[Content::user_text("hi")], None)
            .await
            .unwrap_err();

        match err {
            LlmError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid JSON payload");
            }
            other => panic!("unexpected error: {other}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-test:generateContent")
            .with_status(503)
            .with_body("overloaded")
            .expect(3)
            .create_async()
            .await;

        let err = client(&server)
            .generate(&[Content::user_text("hi")], None)
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Api { status: 503, .. }));
        mock.assert_async().await;
    }
}
