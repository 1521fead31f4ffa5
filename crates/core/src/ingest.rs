use crate::chunking::Chunker;
use crate::embeddings::Embedder;
use crate::error::{IndexError, IngestError};
use crate::extractor::{extract_pdf_texts, ImageExtractor, PdfExtractor};
use crate::index::FlatIndex;
use crate::models::{FileKind, TextChunk, UploadedFile};
use crate::traits::VectorStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use walkdir::WalkDir;

pub const UPLOAD_EXTENSIONS: [&str; 4] = ["pdf", "png", "jpg", "jpeg"];

pub fn discover_uploads(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let accepted = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                UPLOAD_EXTENSIONS
                    .iter()
                    .any(|allowed| ext.eq_ignore_ascii_case(allowed))
            });

        if accepted {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn load_uploads(paths: &[PathBuf]) -> Result<Vec<UploadedFile>, IngestError> {
    paths
        .iter()
        .map(|path| UploadedFile::from_path(path))
        .collect()
}

/// Embeds chunks and swaps the persisted index for a fresh one.
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub async fn rebuild(&self, chunks: &[TextChunk]) -> Result<FlatIndex, IngestError> {
        let texts = chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();

        let vectors = self
            .embedder
            .embed_documents(&texts)
            .await
            .map_err(IndexError::from)?;
        let index = FlatIndex::build(chunks, vectors, self.embedder.model_name())?;
        self.store.replace(&index).await?;

        Ok(index)
    }
}

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub pdf_files: usize,
    pub image_files: usize,
    pub corpus_chars: usize,
    pub chunk_count: usize,
    pub build_id: Uuid,
}

/// The "Submit & Process" pipeline: extract, chunk, embed, persist.
pub struct Ingestor {
    pdf: Arc<dyn PdfExtractor>,
    images: ImageExtractor,
    chunker: Chunker,
    indexer: Indexer,
    workers: usize,
}

impl Ingestor {
    pub fn new(
        pdf: Arc<dyn PdfExtractor>,
        images: ImageExtractor,
        chunker: Chunker,
        indexer: Indexer,
        workers: usize,
    ) -> Self {
        Self {
            pdf,
            images,
            chunker,
            indexer,
            workers: workers.max(1),
        }
    }

    /// PDF text first, then image text, each in upload order.
    pub async fn extract_corpus(&self, files: &[UploadedFile]) -> Result<String, IngestError> {
        if let Some(file) = files.iter().find(|file| file.kind() == FileKind::Unsupported) {
            return Err(IngestError::UnsupportedMedia {
                file: file.name.clone(),
                mime: file.mime_type.clone(),
            });
        }

        let pdfs = files
            .iter()
            .filter(|file| file.kind() == FileKind::Pdf)
            .cloned()
            .collect::<Vec<_>>();
        let images = files
            .iter()
            .filter(|file| file.kind() == FileKind::Image)
            .cloned()
            .collect::<Vec<_>>();

        let mut corpus = String::new();
        if !pdfs.is_empty() {
            corpus.push_str(&extract_pdf_texts(Arc::clone(&self.pdf), &pdfs, self.workers).await?);
        }
        if !images.is_empty() {
            corpus.push_str(&self.images.extract_all(&images, self.workers).await?);
        }

        Ok(corpus)
    }

    pub async fn submit_and_process(
        &self,
        files: &[UploadedFile],
    ) -> Result<IngestionReport, IngestError> {
        if files.is_empty() {
            return Err(IngestError::InvalidArgument("no files uploaded".to_string()));
        }

        let corpus = self.extract_corpus(files).await?;
        let chunks = self.chunker.split(&corpus);
        if chunks.is_empty() {
            return Err(IngestError::EmptyCorpus);
        }

        info!(
            files = files.len(),
            corpus_chars = corpus.chars().count(),
            chunk_count = chunks.len(),
            "embedding chunks"
        );
        let index = self.indexer.rebuild(&chunks).await?;

        Ok(IngestionReport {
            pdf_files: files
                .iter()
                .filter(|file| file.kind() == FileKind::Pdf)
                .count(),
            image_files: files
                .iter()
                .filter(|file| file.kind() == FileKind::Image)
                .count(),
            corpus_chars: corpus.chars().count(),
            chunk_count: chunks.len(),
            build_id: index.manifest().build_id,
        })
    }
}
