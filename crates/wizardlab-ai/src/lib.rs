//! OpenAI-backed reply classification, embeddings and image OCR.

pub mod client;
pub mod decision;
pub mod prompts;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub use client::{collect_output_text, OpenAiClient, OPENAI_API_URL};
pub use decision::ReplyDecision;
pub use prompts::{build_user_message, ReplyInput, IMAGE_OCR_PROMPT, REPLY_SYSTEM_PROMPT};

pub const CRATE_NAME: &str = "wizardlab-ai";
pub const REPLY_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("OPENAI_API_KEY is not a valid header value")]
    InvalidApiKey,
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("OpenAI API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("{0}")]
    EmptyResponse(String),
    #[error("cannot embed empty text")]
    EmptyInput,
    #[error("invalid reply decision: {0}")]
    InvalidDecision(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub reply_model: String,
    pub embedding_model: String,
    /// No model means image OCR is skipped.
    pub vision_model: Option<String>,
    pub ocr_max_images: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            reply_model: "gpt-5.1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            vision_model: None,
            ocr_max_images: 1,
        }
    }
}

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ModelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reply_model: env_trimmed("OPENAI_MODEL_REPLY").unwrap_or(defaults.reply_model),
            embedding_model: env_trimmed("OPENAI_MODEL_EMBEDDING").unwrap_or(defaults.embedding_model),
            vision_model: env_trimmed("SOCIAL_VISION_MODEL"),
            ocr_max_images: env_trimmed("SOCIAL_IMAGE_OCR_MAX_IMAGES")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.ocr_max_images),
        }
    }
}

#[async_trait]
pub trait ReplyClassifier: Send + Sync {
    async fn classify(&self, input: &ReplyInput) -> Result<ReplyDecision, AiError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError>;
}

#[async_trait]
pub trait ImageOcr: Send + Sync {
    async fn extract_text(&self, image_url: &str) -> Result<String, AiError>;
}

pub struct OpenAiReplyClassifier {
    client: Arc<OpenAiClient>,
    model: String,
}

#[async_trait]
impl ReplyClassifier for OpenAiReplyClassifier {
    async fn classify(&self, input: &ReplyInput) -> Result<ReplyDecision, AiError> {
        let user = build_user_message(input);
        let raw = self
            .client
            .chat_json(&self.model, REPLY_SYSTEM_PROMPT, &user, REPLY_TEMPERATURE)
            .await?;
        ReplyDecision::parse(&raw)
    }
}

pub struct OpenAiEmbedder {
    client: Arc<OpenAiClient>,
    model: String,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        self.client.embed(&self.model, text).await
    }
}

pub struct OpenAiImageOcr {
    client: Arc<OpenAiClient>,
    model: String,
}

#[async_trait]
impl ImageOcr for OpenAiImageOcr {
    async fn extract_text(&self, image_url: &str) -> Result<String, AiError> {
        self.client.vision_text(&self.model, IMAGE_OCR_PROMPT, image_url).await
    }
}

/// The three model seams built over one shared client.
pub struct OpenAiModels {
    pub classifier: Arc<dyn ReplyClassifier>,
    pub embedder: Arc<dyn Embedder>,
    pub ocr: Option<Arc<dyn ImageOcr>>,
    pub ocr_max_images: usize,
}

impl OpenAiModels {
    pub fn new(client: OpenAiClient, config: &ModelConfig) -> Self {
        let client = Arc::new(client);
        info!(
            reply_model = %config.reply_model,
            embedding_model = %config.embedding_model,
            vision_model = config.vision_model.as_deref().unwrap_or("none"),
            "openai models configured"
        );
        Self {
            classifier: Arc::new(OpenAiReplyClassifier {
                client: client.clone(),
                model: config.reply_model.clone(),
            }),
            embedder: Arc::new(OpenAiEmbedder {
                client: client.clone(),
                model: config.embedding_model.clone(),
            }),
            ocr: config.vision_model.clone().map(|model| {
                Arc::new(OpenAiImageOcr { client: client.clone(), model }) as Arc<dyn ImageOcr>
            }),
            ocr_max_images: config.ocr_max_images,
        }
    }

    pub fn from_env() -> Result<Self, AiError> {
        Ok(Self::new(OpenAiClient::from_env()?, &ModelConfig::from_env()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_match_documented_models() {
        let config = ModelConfig::default();
        assert_eq!(config.reply_model, "gpt-5.1");
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.vision_model, None);
        assert_eq!(config.ocr_max_images, 1);
    }

    #[test]
    fn ocr_seam_only_exists_with_a_vision_model() {
        let client = || OpenAiClient::new("sk-test", Duration::from_secs(1)).unwrap();
        assert!(OpenAiModels::new(client(), &ModelConfig::default()).ocr.is_none());

        let config = ModelConfig {
            vision_model: Some("gpt-4.1-mini".into()),
            ocr_max_images: 3,
            ..ModelConfig::default()
        };
        let models = OpenAiModels::new(client(), &config);
        assert!(models.ocr.is_some());
        assert_eq!(models.ocr_max_images, 3);
    }
}
