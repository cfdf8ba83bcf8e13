//! Token-bounded text chunking
//!
//! Splits extracted page text on sentence boundaries and accumulates
//! sentences into chunks of a configured token budget, carrying a tail
//! overlap into the next chunk so retrieval does not lose context at
//! chunk borders.

use unicode_segmentation::UnicodeSegmentation;

/// Allowed chunk size range in tokens
pub const MIN_CHUNK_TOKENS: usize = 200;
pub const MAX_CHUNK_TOKENS: usize = 2000;

/// Allowed overlap range in tokens
pub const MAX_OVERLAP_TOKENS: usize = 500;

/// Chunker configuration
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Target chunk size in tokens
    pub chunk_tokens: usize,
    /// Overlap carried between adjacent chunks in tokens
    pub overlap_tokens: usize,
}

impl ChunkerConfig {
    /// Build a config with both values clamped to their allowed ranges
    pub fn clamped(chunk_tokens: usize, overlap_tokens: usize) -> Self {
        let chunk_tokens = chunk_tokens.clamp(MIN_CHUNK_TOKENS, MAX_CHUNK_TOKENS);
        // Overlap may never reach the chunk size or chunking cannot advance.
        let overlap_tokens = overlap_tokens.min(MAX_OVERLAP_TOKENS).min(chunk_tokens / 2);
        Self { chunk_tokens, overlap_tokens }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::clamped(512, 64)
    }
}

/// A chunk produced from page text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedChunk {
    /// Position within the document
    pub index: usize,
    /// Chunk text
    pub content: String,
    /// Word count
    pub word_count: usize,
    /// Approximate token count
    pub token_count: usize,
}

/// Sentence-accumulating chunker
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split text into token-bounded chunks
    pub fn chunk(&self, text: &str) -> Vec<ExtractedChunk> {
        let sentences: Vec<&str> = text
            .unicode_sentences()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if sentences.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = 0usize;

        for sentence in &sentences {
            let sentence_tokens = estimate_tokens(word_count(sentence));

            if current_tokens + sentence_tokens > self.config.chunk_tokens && !current.is_empty() {
                chunks.push(self.finish_chunk(chunks.len(), &current));

                let overlap = self.overlap_tail(&current);
                current = overlap;
                current_tokens = current
                    .iter()
                    .map(|s| estimate_tokens(word_count(s)))
                    .sum();
            }

            current.push(sentence);
            current_tokens += sentence_tokens;
        }

        if !current.is_empty() {
            chunks.push(self.finish_chunk(chunks.len(), &current));
        }

        chunks
    }

    fn finish_chunk(&self, index: usize, sentences: &[&str]) -> ExtractedChunk {
        let content = sentences.join(" ");
        let words = word_count(&content);
        ExtractedChunk {
            index,
            word_count: words,
            token_count: estimate_tokens(words),
            content,
        }
    }

    /// Trailing sentences totalling at most the overlap budget
    fn overlap_tail<'a>(&self, sentences: &[&'a str]) -> Vec<&'a str> {
        if self.config.overlap_tokens == 0 {
            return Vec::new();
        }

        let mut tail = Vec::new();
        let mut tokens = 0usize;
        for sentence in sentences.iter().rev() {
            let sentence_tokens = estimate_tokens(word_count(sentence));
            if tokens + sentence_tokens > self.config.overlap_tokens {
                break;
            }
            tokens += sentence_tokens;
            tail.push(*sentence);
        }
        tail.reverse();
        tail
    }
}

/// Unicode word count
pub fn word_count(text: &str) -> usize {
    text.unicode_words().count()
}

/// Rough token estimate: English text runs ~4/3 tokens per word
pub fn estimate_tokens(words: usize) -> usize {
    words + words / 3
}
