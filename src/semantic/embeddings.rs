//! Client for the external embedding service.
//!
//! Three endpoints, all `POST` with a JSON body:
//! - `/embed_text` `{"text": ..}` for document content and text queries
//! - `/embed_image` `{"image": <base64>}` for image files
//! - `/embed_clip_text` `{"text": ..}` for queries matched against images
//!
//! Each answers `{"embedding": [..]}` (the CLIP endpoints wrap it in a batch
//! of one) or `{"error": ".."}`.

use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// The service could not be reached or did not answer in time.
    #[error("embedding service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The service answered, but not with a usable embedding.
    #[error("embedding service error (status {status}): {message}")]
    ServiceError { status: u16, message: String },

    #[error("failed to build http client: {0}")]
    Client(String),
}

/// Anything that can turn content into vectors.
///
/// Text and image-query vectors are not interchangeable: a text query is
/// compared against document entries with [`Embedder::embed_text`] and
/// against image entries with [`Embedder::embed_query_for_images`].
pub trait Embedder: Send + Sync {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError>;
    fn embed_query_for_images(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingShape {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Option<EmbeddingShape>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpEmbedder {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| EmbeddingError::Client(e.to_string()))?;

        Ok(Self {
            base_url: base_url.strip_suffix('/').unwrap_or(base_url).to_string(),
            api_key,
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, EmbeddingError> {
        Self::new(
            &config.api_url,
            config.api_key.clone(),
            Duration::from_secs(config.embedding.timeout_secs),
            Duration::from_secs(config.embedding.connect_timeout_secs),
        )
    }

    fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}{}", self.base_url, endpoint);
        log::debug!("POST {url}");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(transport_error)?;
        let status = response.status();
        let text = response.text().map_err(transport_error)?;

        handle_response(status.as_u16(), status.is_success(), &text)
    }
}

fn transport_error(err: reqwest::Error) -> EmbeddingError {
    if err.is_timeout() {
        EmbeddingError::ServiceUnavailable(format!("request timed out: {err}"))
    } else {
        EmbeddingError::ServiceUnavailable(err.to_string())
    }
}

fn handle_response(status: u16, success: bool, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let service_error = |message: String| EmbeddingError::ServiceError { status, message };

    let parsed = serde_json::from_str::<EmbedResponse>(text);

    if !success {
        let message = match parsed {
            Ok(EmbedResponse { error: Some(error), .. }) => error,
            _ => truncate(text, 200),
        };
        return Err(service_error(message));
    }

    let response = parsed.map_err(|err| {
        log::error!("{err}. tried to parse: {:?}", truncate(text, 200));
        service_error(format!("malformed response: {err}"))
    })?;

    if let Some(error) = response.error {
        return Err(service_error(error));
    }

    let embedding = match response.embedding {
        Some(EmbeddingShape::Flat(v)) => v,
        Some(EmbeddingShape::Nested(mut batch)) => {
            if batch.len() != 1 {
                return Err(service_error(format!(
                    "expected a single embedding, got {}",
                    batch.len()
                )));
            }
            batch.remove(0)
        }
        None => return Err(service_error("response has no embedding".to_string())),
    };

    if embedding.is_empty() {
        return Err(service_error("empty embedding".to_string()));
    }

    Ok(embedding)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

impl Embedder for HttpEmbedder {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.post("/embed_text", json!({ "text": text }))
    }

    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        let image = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.post("/embed_image", json!({ "image": image }))
    }

    fn embed_query_for_images(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.post("/embed_clip_text", json!({ "text": text }))
    }
}
