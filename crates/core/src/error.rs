use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("{model} returned {status}: {body}")]
    Api {
        model: String,
        status: u16,
        body: String,
    },

    #[error("empty response from {0}")]
    EmptyResponse(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index at {path} is corrupt: {details}")]
    Corrupt { path: String, details: String },

    #[error("embedding dimension {found} != {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("embedding count {embeddings} doesn't match chunk count {chunks}")]
    CountMismatch { chunks: usize, embeddings: usize },

    #[error("embedding failed: {0}")]
    Model(#[from] ModelError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error in {file}: {details}")]
    PdfParse { file: String, details: String },

    #[error("unsupported media type {mime} for {file}")]
    UnsupportedMedia { file: String, mime: String },

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no text could be extracted from the uploaded files")]
    EmptyCorpus,

    #[error("extraction task failed: {0}")]
    Task(String),

    #[error("image extraction failed for {file}: {source}")]
    ImageExtraction {
        file: String,
        #[source]
        source: ModelError,
    },

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("generation failed: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("index was built with {indexed} but questions are embedded with {configured}; process the files again")]
    EmbeddingModelMismatch { indexed: String, configured: String },
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to start recorder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("recorder produced no output stream")]
    NoOutput,

    #[error("recorder io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("speech was not intelligible")]
    Unintelligible,

    #[error("recognition service unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Answer(#[from] AnswerError),
}
