use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const PDF_MIME: &str = "application/pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
    Unsupported,
}

/// A file handed over by the user, held in memory until its text is extracted.
#[derive(Clone)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!("path has no file name: {}", path.display()))
            })?
            .to_string();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let bytes = std::fs::read(path)?;

        Ok(Self {
            name,
            mime_type,
            bytes,
        })
    }

    pub fn kind(&self) -> FileKind {
        if self.mime_type == PDF_MIME {
            FileKind::Pdf
        } else if self.mime_type.starts_with("image/") {
            FileKind::Image
        } else {
            FileKind::Unsupported
        }
    }
}

impl std::fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A contiguous slice of the corpus. `start..end` are byte offsets into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: TextChunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerPath {
    Greeting,
    Grounded,
    Ungrounded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub path: AnswerPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Positive,
    Negative,
}

impl Feedback {
    pub fn label(self) -> &'static str {
        match self {
            Feedback::Positive => "Positive",
            Feedback::Negative => "Negative",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub workers: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 10_000,
            chunk_overlap_chars: 1_000,
            workers: default_workers(),
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn kind_follows_mime_type() {
        assert_eq!(UploadedFile::new("a.pdf", PDF_MIME, vec![]).kind(), FileKind::Pdf);
        assert_eq!(UploadedFile::new("b.png", "image/png", vec![]).kind(), FileKind::Image);
        assert_eq!(
            UploadedFile::new("c.txt", "text/plain", vec![]).kind(),
            FileKind::Unsupported
        );
    }

    #[test]
    fn from_path_guesses_mime_from_extension() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("scan.JPG");
        fs::write(&path, b"not really a jpeg")?;

        let file = UploadedFile::from_path(&path)?;
        assert_eq!(file.name, "scan.JPG");
        assert_eq!(file.mime_type, "image/jpeg");
        assert_eq!(file.kind(), FileKind::Image);
        assert_eq!(file.bytes, b"not really a jpeg");
        Ok(())
    }
}
