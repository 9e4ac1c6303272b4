//! Thin OpenAI REST client: chat completions, embeddings and the Responses API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::AiError;

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: JsonValue,
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

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAiClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, AiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.to_string(),
            http,
            base_url: OPENAI_API_URL.to_string(),
        })
    }

    /// `OPENAI_API_KEY` is required; `OPENAI_BASE_URL` overrides the endpoint.
    pub fn from_env() -> Result<Self, AiError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(AiError::MissingApiKey)?;
        let timeout = std::env::var("WIZARDLAB_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        let client = Self::new(api_key.trim(), Duration::from_secs(timeout))?;
        Ok(match std::env::var("OPENAI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => client.with_base_url(url.trim()),
            _ => client,
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap, AiError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| AiError::InvalidApiKey)?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response, AiError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > ERROR_BODY_LIMIT {
                let mut end = ERROR_BODY_LIMIT;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            return Err(AiError::Api { status, body });
        }
        Ok(response)
    }

    /// Chat completion constrained to a JSON object; returns the raw message content.
    pub async fn chat_json(
        &self,
        model: &str,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<String, AiError> {
        debug!(model, "openai chat request");
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature,
            response_format: json!({ "type": "json_object" }),
        };
        let response: ChatResponse = self.post("chat/completions", &request).await?.json().await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AiError::EmptyResponse("OpenAI returned an empty response".into()))
    }

    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, AiError> {
        if text.trim().is_empty() {
            return Err(AiError::EmptyInput);
        }
        debug!(model, chars = text.len(), "openai embedding request");
        let response: EmbeddingResponse = self
            .post("embeddings", &EmbeddingRequest { model, input: text })
            .await?
            .json()
            .await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AiError::EmptyResponse("no embedding in response".into()))
    }

    /// One image plus an instruction through the Responses API; the text blocks joined.
    pub async fn vision_text(&self, model: &str, prompt: &str, image_url: &str) -> Result<String, AiError> {
        debug!(model, image_url, "openai vision request");
        let request = json!({
            "model": model,
            "input": [{
                "role": "user",
                "content": [
                    { "type": "input_text", "text": prompt },
                    { "type": "input_image", "image_url": image_url }
                ]
            }]
        });
        let response: JsonValue = self.post("responses", &request).await?.json().await?;
        Ok(collect_output_text(&response))
    }
}

/// `output[].content[]` blocks of type `output_text`; `text` is a string or `{ value }`.
pub fn collect_output_text(response: &JsonValue) -> String {
    let mut pieces = Vec::new();
    let outputs = response.get("output").and_then(JsonValue::as_array);
    for output in outputs.into_iter().flatten() {
        let Some(blocks) = output.get("content").and_then(JsonValue::as_array) else {
            continue;
        };
        for block in blocks {
            if block.get("type").and_then(JsonValue::as_str) != Some("output_text") {
                continue;
            }
            let text = match block.get("text") {
                Some(JsonValue::String(s)) => Some(s.as_str()),
                Some(other) => other.get("value").and_then(JsonValue::as_str),
                None => None,
            };
            if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
                pieces.push(text.to_string());
            }
        }
    }
    pieces.join("\n\n")
}
