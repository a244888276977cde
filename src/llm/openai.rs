use crate::error::{Result, EvalError};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Authenticated JSON-over-HTTP client for an OpenAI-compatible API.
///
/// Retries 429 and 5xx responses plus network errors with exponential backoff;
/// any other non-success status fails immediately.
#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    max_retries: usize,
    initial_backoff: Duration,
}

impl OpenAIClient {
    pub fn new(
        api_key: String,
        base_url: &str,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            EvalError::Configuration(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
            initial_backoff: Duration::from_secs(1),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `{base_url}/{path}` and decode the JSON reply.
    ///
    /// `service` names the collaborator in errors and logs.
    pub async fn post_json<Req, Resp>(
        &self,
        service: &str,
        path: &str,
        body: &Req,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let start = std::time::Instant::now();
        let mut attempt = 0;
        let mut delay = self.initial_backoff;

        loop {
            match self.post_once(service, &url, body).await {
                Ok(resp) => {
                    log::debug!(
                        "{} call took {:?} (attempt {})",
                        service,
                        start.elapsed(),
                        attempt + 1
                    );
                    return Ok(resp);
                }
                Err(Attempt::Retryable(message)) if attempt < self.max_retries => {
                    log::warn!(
                        "{}: retry {}/{} after error: {}",
                        service,
                        attempt + 1,
                        self.max_retries,
                        message
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_backoff(delay);
                    attempt += 1;
                }
                Err(Attempt::Retryable(message)) | Err(Attempt::Fatal(message)) => {
                    return Err(EvalError::collaborator(service, message));
                }
            }
        }
    }

    async fn post_once<Req, Resp>(
        &self,
        service: &str,
        url: &str,
        body: &Req,
    ) -> std::result::Result<Resp, Attempt>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Retryable(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            let message = format!("HTTP {}: {}", status, body);
            return Err(if is_retryable(status) {
                Attempt::Retryable(message)
            } else {
                Attempt::Fatal(message)
            });
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| Attempt::Fatal(format!("Malformed {} response: {}", service, e)))
    }
}

enum Attempt {
    Retryable(String),
    Fatal(String),
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn next_backoff(delay: Duration) -> Duration {
    delay.saturating_mul(2)
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Chat-completions client bound to one model.
#[derive(Clone)]
pub struct OpenAIChatClient {
    http: OpenAIClient,
    model: String,
    temperature: f32,
    service: &'static str,
}

impl OpenAIChatClient {
    pub fn new(
        http: OpenAIClient,
        model: String,
        temperature: f32,
        service: &'static str,
    ) -> Self {
        Self { http, model, temperature, service }
    }

    /// Run one completion and return the first choice's text.
    ///
    /// `json_mode` asks the model for a JSON object reply.
    pub async fn complete(&self, messages: &[ChatMessage], json_mode: bool) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let response: ChatResponse = self
            .http
            .post_json(self.service, "chat/completions", &request)
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| EvalError::collaborator(self.service, "Empty completion in response"))
    }
}
