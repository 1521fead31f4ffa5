use crate::error::{IndexError, ModelError};
use crate::index::FlatIndex;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    InlineData { mime_type: String, data: Vec<u8> },
}

impl PromptPart {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

/// A hosted text (or multimodal) generation endpoint bound to one model.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, parts: &[PromptPart]) -> Result<String, ModelError>;
}

/// Where the single persisted index lives.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn exists(&self) -> bool;

    async fn load(&self) -> Result<Option<FlatIndex>, IndexError>;

    /// Replaces whatever was stored before. On error the previous index is left untouched.
    async fn replace(&self, index: &FlatIndex) -> Result<(), IndexError>;
}
