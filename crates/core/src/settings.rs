use crate::answer::Answerer;
use crate::chunking::{Chunker, ChunkingConfig};
use crate::embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_MODEL};
use crate::error::{IngestError, ModelError};
use crate::extractor::{ImageExtractor, LopdfExtractor};
use crate::gemini::{GeminiClient, GeminiEmbedder, GeminiModel, DEFAULT_BASE_URL};
use crate::index::DEFAULT_TOP_K;
use crate::ingest::{Indexer, Ingestor};
use crate::models::IngestionOptions;
use crate::session::Session;
use crate::stores::{LocalIndexStore, DEFAULT_INDEX_DIR};
use crate::traits::VectorStore;
use crate::voice::{
    CommandAudioSource, GoogleSpeechRecognizer, RecorderConfig, VoiceInput, DEFAULT_LANGUAGE,
    DEFAULT_LISTEN_TIMEOUT, DEFAULT_SPEECH_URL,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GROUNDED_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_VISION_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("invalid speech endpoint: {0}")]
    SpeechUrl(#[from] url::ParseError),
}

/// Everything needed to wire the pipeline. Built by the CLI from flags and
/// environment, or from `Default` in tests.
#[derive(Clone)]
pub struct Settings {
    pub api_key: String,
    pub api_base_url: String,
    pub speech_base_url: String,
    pub embedding_model: String,
    /// Embed with the local trigram hasher instead of the remote model.
    pub offline_embeddings: bool,
    pub grounded_model: String,
    pub fallback_model: String,
    pub vision_model: String,
    pub temperature: f32,
    pub index_dir: PathBuf,
    pub top_k: usize,
    pub ingestion: IngestionOptions,
    pub listen_timeout: Duration,
    pub recorder: RecorderConfig,
    pub speech_language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: DEFAULT_BASE_URL.to_string(),
            speech_base_url: DEFAULT_SPEECH_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            offline_embeddings: false,
            grounded_model: DEFAULT_GROUNDED_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
            top_k: DEFAULT_TOP_K,
            ingestion: IngestionOptions::default(),
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
            recorder: RecorderConfig::default(),
            speech_language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("speech_base_url", &self.speech_base_url)
            .field("embedding_model", &self.embedding_model)
            .field("offline_embeddings", &self.offline_embeddings)
            .field("grounded_model", &self.grounded_model)
            .field("fallback_model", &self.fallback_model)
            .field("vision_model", &self.vision_model)
            .field("temperature", &self.temperature)
            .field("index_dir", &self.index_dir)
            .field("top_k", &self.top_k)
            .field("ingestion", &self.ingestion)
            .field("listen_timeout", &self.listen_timeout)
            .field("recorder", &self.recorder)
            .field("speech_language", &self.speech_language)
            .finish()
    }
}

/// Shared services, built once per process.
pub struct Services {
    pub ingestor: Arc<Ingestor>,
    pub answerer: Arc<Answerer>,
    pub voice: Arc<VoiceInput>,
    pub store: Arc<LocalIndexStore>,
}

impl Services {
    pub fn session(&self) -> Session {
        Session::new(
            self.ingestor.clone(),
            self.answerer.clone(),
            self.voice.clone(),
        )
    }
}

impl Settings {
    pub fn embedder(&self, client: &Arc<GeminiClient>) -> Arc<dyn Embedder> {
        if self.offline_embeddings {
            Arc::new(CharacterNgramEmbedder::default())
        } else {
            Arc::new(GeminiEmbedder::new(client.clone(), &self.embedding_model))
        }
    }

    pub fn build(&self) -> Result<Services, SetupError> {
        let client = Arc::new(GeminiClient::new(&self.api_key, &self.api_base_url)?);
        let embedder = self.embedder(&client);
        let store = Arc::new(LocalIndexStore::new(&self.index_dir));
        let vector_store: Arc<dyn VectorStore> = store.clone();
        let model = |name: &str| {
            Arc::new(GeminiModel::new(
                client.clone(),
                name,
                Some(self.temperature),
            ))
        };

        let ingestor = Ingestor::new(
            Arc::new(LopdfExtractor),
            ImageExtractor::new(Arc::new(GeminiModel::new(
                client.clone(),
                &self.vision_model,
                None,
            ))),
            Chunker::new(ChunkingConfig::from(&self.ingestion))?,
            Indexer::new(embedder.clone(), vector_store.clone()),
            self.ingestion.workers,
        );

        let answerer = Answerer::new(
            embedder,
            vector_store,
            model(self.grounded_model.as_str()),
            model(self.fallback_model.as_str()),
        )
        .with_top_k(self.top_k);

        let recognizer = GoogleSpeechRecognizer::new(
            &self.api_key,
            &self.speech_base_url,
            &self.speech_language,
        )?;
        let voice = VoiceInput::new(
            Arc::new(CommandAudioSource::new(self.recorder.clone())),
            Arc::new(recognizer),
        )
        .with_listen_timeout(self.listen_timeout);

        Ok(Services {
            ingestor: Arc::new(ingestor),
            answerer: Arc::new(answerer),
            voice: Arc::new(voice),
            store,
        })
    }
}
