pub mod answer;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod gemini;
pub mod index;
pub mod ingest;
pub mod models;
pub mod session;
pub mod settings;
pub mod stores;
pub mod traits;
pub mod voice;

pub use answer::{is_greeting, Answerer, GREETING_REPLY, NOT_IN_CONTEXT};
pub use chunking::{split_text, Chunker, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, EmbeddingTask, DEFAULT_EMBEDDING_MODEL};
pub use error::{
    AnswerError, CaptureError, IndexError, IngestError, ModelError, RecognitionError, SessionError,
};
pub use extractor::{ImageExtractor, LopdfExtractor, PageText, PdfExtractor};
pub use gemini::{GeminiClient, GeminiEmbedder, GeminiModel};
pub use index::{FlatIndex, IndexManifest};
pub use ingest::{discover_uploads, load_uploads, IngestionReport, Ingestor};
pub use models::{
    Answer, AnswerPath, Feedback, FileKind, IngestionOptions, ScoredChunk, TextChunk, UploadedFile,
};
pub use session::{AuthEvent, AuthPanel, Notice, Session, SessionState, UiEvent};
pub use settings::{Services, Settings, SetupError};
pub use stores::{LocalIndexStore, DEFAULT_INDEX_DIR};
pub use traits::{GenerativeModel, PromptPart, VectorStore};
pub use voice::{VoiceInput, VoiceOutcome, VoiceStatus};
