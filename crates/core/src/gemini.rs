use crate::embeddings::{Embedder, EmbeddingTask};
use crate::error::ModelError;
use crate::traits::{GenerativeModel, PromptPart};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";

const MAX_BATCH_EMBED: usize = 100;
const ERROR_BODY_CHARS: usize = 500;

pub struct GeminiClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum WirePart {
    #[serde(rename = "text")]
    Text(String),
    InlineData(InlineData),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: EmbedContent<'a>,
    task_type: &'static str,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedText<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedText<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, base_url: &str) -> Result<Self, ModelError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http: Client::new(),
            base_url,
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> Result<Url, ModelError> {
        Ok(self
            .base_url
            .join(&format!("{}:{method}", model_path(model)))?)
    }

    async fn post<B, R>(&self, model: &str, method: &str, body: &B) -> Result<R, ModelError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.endpoint(model, method)?)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(ERROR_BODY_CHARS)
                .collect();
            return Err(ModelError::Api {
                model: model.to_string(),
                status,
                body,
            });
        }

        Ok(response.json().await?)
    }

    pub async fn generate_content(
        &self,
        model: &str,
        parts: &[PromptPart],
        temperature: Option<f32>,
    ) -> Result<String, ModelError> {
        let request = build_generate_request(parts, temperature);
        let response: GenerateResponse = self.post(model, "generateContent", &request).await?;
        response_text(response).ok_or_else(|| ModelError::EmptyResponse(model.to_string()))
    }

    pub async fn embed_content(
        &self,
        model: &str,
        text: &str,
        task: EmbeddingTask,
    ) -> Result<Vec<f32>, ModelError> {
        let request = embed_request(model, text, task);
        let response: EmbedResponse = self.post(model, "embedContent", &request).await?;
        Ok(response.embedding.values)
    }

    pub async fn batch_embed_contents(
        &self,
        model: &str,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>, ModelError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_BATCH_EMBED) {
            let request = BatchEmbedRequest {
                requests: batch
                    .iter()
                    .map(|text| embed_request(model, text, task))
                    .collect(),
            };
            let response: BatchEmbedResponse =
                self.post(model, "batchEmbedContents", &request).await?;

            if response.embeddings.len() != batch.len() {
                return Err(ModelError::EmptyResponse(format!(
                    "{model} returned {} embeddings for {} texts",
                    response.embeddings.len(),
                    batch.len()
                )));
            }
            vectors.extend(response.embeddings.into_iter().map(|item| item.values));
        }

        Ok(vectors)
    }
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

fn build_generate_request(parts: &[PromptPart], temperature: Option<f32>) -> GenerateRequest {
    let parts = parts
        .iter()
        .map(|part| match part {
            PromptPart::Text(text) => WirePart::Text(text.clone()),
            PromptPart::InlineData { mime_type, data } => WirePart::InlineData(InlineData {
                mime_type: mime_type.clone(),
                data: STANDARD.encode(data),
            }),
        })
        .collect();

    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts,
        }],
        generation_config: temperature.map(|temperature| GenerationConfig { temperature }),
    }
}

fn embed_request<'a>(model: &str, text: &'a str, task: EmbeddingTask) -> EmbedRequest<'a> {
    EmbedRequest {
        model: model_path(model),
        content: EmbedContent {
            parts: vec![EmbedText { text }],
        },
        task_type: task.as_str(),
    }
}

fn response_text(response: GenerateResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text = content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<String>();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// One Gemini model with fixed sampling settings.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    client: Arc<GeminiClient>,
    model: String,
    temperature: Option<f32>,
}

impl GeminiModel {
    pub fn new(client: Arc<GeminiClient>, model: impl Into<String>, temperature: Option<f32>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
        }
    }
}

#[async_trait]
impl GenerativeModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, parts: &[PromptPart]) -> Result<String, ModelError> {
        self.client
            .generate_content(&self.model, parts, self.temperature)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct GeminiEmbedder {
    client: Arc<GeminiClient>,
    model: String,
}

impl GeminiEmbedder {
    pub fn new(client: Arc<GeminiClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        self.client
            .batch_embed_contents(&self.model, texts, EmbeddingTask::RetrievalDocument)
            .await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.client
            .embed_content(&self.model, text, EmbeddingTask::RetrievalQuery)
            .await
    }
}
