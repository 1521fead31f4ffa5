use crate::error::IndexError;
use crate::models::{ScoredChunk, TextChunk};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_TOP_K: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub build_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub embedding_model: String,
    pub dimensions: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: TextChunk,
    pub vector: Vec<f32>,
}

/// Brute-force cosine index over every chunk of one corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
}

impl FlatIndex {
    pub fn build(
        chunks: &[TextChunk],
        vectors: Vec<Vec<f32>>,
        embedding_model: impl Into<String>,
    ) -> Result<Self, IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::CountMismatch {
                chunks: chunks.len(),
                embeddings: vectors.len(),
            });
        }

        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        let entries = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                if vector.len() != dimensions {
                    return Err(IndexError::DimensionMismatch {
                        expected: dimensions,
                        found: vector.len(),
                    });
                }
                Ok(IndexEntry {
                    chunk: chunk.clone(),
                    vector,
                })
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        Ok(Self {
            manifest: IndexManifest {
                build_id: Uuid::new_v4(),
                built_at: Utc::now(),
                embedding_model: embedding_model.into(),
                dimensions,
                chunk_count: entries.len(),
            },
            entries,
        })
    }

    pub(crate) fn from_parts(
        manifest: IndexManifest,
        entries: Vec<IndexEntry>,
    ) -> Result<Self, String> {
        if manifest.chunk_count != entries.len() {
            return Err(format!(
                "manifest lists {} chunks but {} entries were stored",
                manifest.chunk_count,
                entries.len()
            ));
        }
        if let Some(entry) = entries
            .iter()
            .find(|entry| entry.vector.len() != manifest.dimensions)
        {
            return Err(format!(
                "chunk {} has dimension {} instead of {}",
                entry.chunk.index,
                entry.vector.len(),
                manifest.dimensions
            ));
        }
        Ok(Self { manifest, entries })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn similarity_search(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if self.entries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.manifest.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.manifest.dimensions,
                found: query.len(),
            });
        }

        let mut scored = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query, &entry.vector),
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then(left.chunk.index.cmp(&right.chunk.index))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}
