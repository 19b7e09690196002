use async_trait::async_trait;
use crewcore::GatewayError;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Configuration for the HTTP gateway. `from_env` reads `CREW_API_KEY`,
/// `CREW_BASE_URL`, and `CREW_DEFAULT_MODEL`, falling back to defaults.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub default_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cerebras.ai".to_string(),
            api_key: String::new(),
            default_model: "llama-4-maverick-17b-128e-instruct".to_string(),
            max_tokens: 32768,
            temperature: 0.6,
            top_p: 0.9,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var("CREW_API_KEY") {
            config.api_key = key;
        }
        if let Ok(url) = std::env::var("CREW_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("CREW_DEFAULT_MODEL") {
            config.default_model = model;
        }
        config
    }
}

/// One inference request. `None` fields fall back to the gateway's
/// configured defaults.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
        }
    }
}

/// Result of a non-streaming inference call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub tokens_used: u64,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// One incremental piece of a streaming completion.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub text: String,
    pub finish_reason: Option<String>,
}

/// External capability that turns a prompt into generated text and a token
/// count. Implemented over HTTP in production and scripted in tests.
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<Generation, GatewayError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_completion_tokens: u32,
    temperature: f64,
    top_p: f64,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ChatStreamResponse {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
}

/// Gateway over an OpenAI-compatible chat-completions endpoint.
pub struct HttpGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    fn chat_body<'a>(&'a self, request: &'a GenerateRequest, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: request.model.as_deref().unwrap_or(&self.config.default_model),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_completion_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: request.temperature.unwrap_or(self.config.temperature),
            top_p: request.top_p.unwrap_or(self.config.top_p),
            stream,
        }
    }

    fn map_transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout {
                seconds: self.config.request_timeout.as_secs(),
            }
        } else {
            GatewayError::Transport(err.to_string())
        }
    }

    async fn send(
        &self,
        request: &GenerateRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.chat_body(request, stream))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// Streaming mode: yields chunks as the model produces them. The final
    /// chunk carries the finish reason.
    pub async fn generate_stream(
        &self,
        request: GenerateRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, GatewayError>>, GatewayError> {
        let response = self.send(&request, true).await?;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(part) = body.next().await {
                let bytes = match part {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(GatewayError::Transport(e.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<ChatStreamResponse>(payload) {
                        Ok(parsed) => {
                            for choice in parsed.choices {
                                let chunk = StreamChunk {
                                    text: choice.delta.content.unwrap_or_default(),
                                    finish_reason: choice.finish_reason,
                                };
                                if tx.send(Ok(chunk)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Err(GatewayError::InvalidResponse(e.to_string())))
                                .await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[async_trait]
impl InferenceGateway for HttpGateway {
    async fn generate(&self, request: GenerateRequest) -> Result<Generation, GatewayError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let response = self.send(&request, false).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::InvalidResponse("response has no choices".to_string()))?;

        Ok(Generation {
            text: choice.message.content.unwrap_or_default(),
            tokens_used: parsed.usage.and_then(|u| u.total_tokens).unwrap_or(0),
            model,
            finish_reason: choice.finish_reason,
        })
    }
}
