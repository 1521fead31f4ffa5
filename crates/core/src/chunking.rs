use crate::error::IngestError;
use crate::models::{IngestionOptions, TextChunk};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Paragraph, line, word, character.
pub const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

const DEFAULT_CACHE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&IngestionOptions::default())
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    chars: usize,
}

/// Splits `text` into chunks of at most `max_chars` characters, preferring
/// to cut after paragraph breaks, then line breaks, then spaces.
///
/// Chunks are exact slices of the input: consecutive chunks share at most
/// `overlap_chars` characters and together cover the whole text.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<TextChunk> {
    let mut spans = Vec::new();
    collect_spans(text, 0, text.len(), &SEPARATORS, config.max_chars.max(1), &mut spans);
    merge_spans(text, &spans, config)
}

fn collect_spans(
    text: &str,
    start: usize,
    end: usize,
    separators: &[&str],
    max_chars: usize,
    out: &mut Vec<Span>,
) {
    if start == end {
        return;
    }

    let slice = &text[start..end];
    let chars = slice.chars().count();
    if chars <= max_chars {
        out.push(Span { start, end, chars });
        return;
    }

    let Some((separator, rest)) = separators.split_first() else {
        return hard_split(text, start, end, max_chars, out);
    };

    if separator.is_empty() {
        return hard_split(text, start, end, max_chars, out);
    }

    let mut piece_start = start;
    for (offset, matched) in slice.match_indices(separator) {
        let piece_end = start + offset + matched.len();
        collect_spans(text, piece_start, piece_end, rest, max_chars, out);
        piece_start = piece_end;
    }
    collect_spans(text, piece_start, end, rest, max_chars, out);
}

fn hard_split(text: &str, start: usize, end: usize, max_chars: usize, out: &mut Vec<Span>) {
    let mut piece_start = start;
    let mut count = 0;

    for (offset, _) in text[start..end].char_indices() {
        if count == max_chars {
            out.push(Span {
                start: piece_start,
                end: start + offset,
                chars: count,
            });
            piece_start = start + offset;
            count = 0;
        }
        count += 1;
    }

    if piece_start < end {
        out.push(Span {
            start: piece_start,
            end,
            chars: count,
        });
    }
}

fn merge_spans(text: &str, spans: &[Span], config: ChunkingConfig) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<Span> = VecDeque::new();
    let mut total = 0usize;

    for span in spans {
        if total + span.chars > config.max_chars && !window.is_empty() {
            push_chunk(text, &window, &mut chunks);

            while total > config.overlap_chars
                || (total + span.chars > config.max_chars && total > 0)
            {
                match window.pop_front() {
                    Some(dropped) => total -= dropped.chars,
                    None => break,
                }
            }
        }

        window.push_back(*span);
        total += span.chars;
    }

    if !window.is_empty() {
        push_chunk(text, &window, &mut chunks);
    }

    chunks
}

fn push_chunk(text: &str, window: &VecDeque<Span>, chunks: &mut Vec<TextChunk>) {
    let (Some(first), Some(last)) = (window.front(), window.back()) else {
        return;
    };

    chunks.push(TextChunk {
        index: chunks.len(),
        start: first.start,
        end: last.end,
        text: text[first.start..last.end].to_string(),
    });
}

/// Memoizing front of [`split_text`], keyed by a digest of the input.
pub struct Chunker {
    config: ChunkingConfig,
    cache: Mutex<LruCache<String, Arc<Vec<TextChunk>>>>,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let capacity = NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            config,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn split(&self, text: &str) -> Arc<Vec<TextChunk>> {
        let key = digest_text(text);

        if let Some(hit) = self.lock_cache().get(&key) {
            return Arc::clone(hit);
        }

        let chunks = Arc::new(split_text(text, self.config));

        let mut cache = self.lock_cache();
        if let Some(raced) = cache.get(&key) {
            return Arc::clone(raced);
        }
        cache.put(key, Arc::clone(&chunks));

        chunks
    }

    fn lock_cache(&self) -> MutexGuard<'_, LruCache<String, Arc<Vec<TextChunk>>>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn digest_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
