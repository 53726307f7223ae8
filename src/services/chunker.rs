//! Character-window chunking with a fixed overlap.

use crate::error::ChunkError;
use crate::models::{ChunkingConfig, Document, DocumentChunk};

/// Splits text into windows of `chunk_size` characters, each sharing
/// `overlap` characters with its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

/// One window of the input, borrowed from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window<'a> {
    pub text: &'a str,
    /// Offset of the first character, counted in characters.
    pub offset: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkError> {
        if overlap >= chunk_size {
            return Err(ChunkError::InvalidConfiguration {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ChunkError> {
        Self::new(config.chunk_size as usize, config.chunk_overlap as usize)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Lazily yield the windows covering `text`. Cloning the iterator restarts
    /// from the clone point.
    pub fn windows<'a>(&self, text: &'a str) -> Windows<'a> {
        Windows {
            text,
            chunk_size: self.chunk_size,
            step: self.step(),
            start_char: 0,
            start_byte: 0,
            done: false,
        }
    }

    /// Windows of a document as chunks, without embeddings.
    pub fn chunks<'a>(
        &self,
        document: &'a Document,
    ) -> impl Iterator<Item = DocumentChunk> + Clone + 'a {
        self.windows(&document.text)
            .enumerate()
            .map(move |(index, window)| {
                DocumentChunk::from_document(
                    document,
                    window.text.to_string(),
                    window.offset as u64,
                    index as u32,
                )
            })
    }
}

#[derive(Debug, Clone)]
pub struct Windows<'a> {
    text: &'a str,
    chunk_size: usize,
    step: usize,
    start_char: usize,
    start_byte: usize,
    done: bool,
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let rest = &self.text[self.start_byte..];
        let mut end_byte = rest.len();
        let mut next_start_byte = rest.len();

        for (count, (byte, _)) in rest.char_indices().enumerate() {
            if count == self.step {
                next_start_byte = byte;
            }
            if count == self.chunk_size {
                end_byte = byte;
                break;
            }
        }

        let window = Window {
            text: &rest[..end_byte],
            offset: self.start_char,
        };

        if end_byte == rest.len() {
            self.done = true;
        } else {
            self.start_byte += next_start_byte;
            self.start_char += self.step;
        }

        Some(window)
    }
}

impl std::iter::FusedIterator for Windows<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(chunker: &TextChunker, windows: &[Window<'_>]) -> String {
        let mut out = String::new();
        for (i, w) in windows.iter().enumerate() {
            if i == 0 {
                out.push_str(w.text);
            } else {
                out.extend(w.text.chars().skip(chunker.overlap()));
            }
        }
        out
    }

    fn sample(len: usize) -> String {
        "abcdefghijklmnopqrstuvwxyz0123456789 "
            .chars()
            .cycle()
            .take(len)
            .collect()
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        assert_eq!(
            TextChunker::new(100, 100),
            Err(ChunkError::InvalidConfiguration {
                chunk_size: 100,
                overlap: 100
            })
        );
        assert!(TextChunker::new(100, 150).is_err());
        assert!(TextChunker::new(0, 0).is_err());
        assert!(TextChunker::new(1, 0).is_ok());
    }

    #[test]
    fn test_short_input_is_single_chunk() {
        let chunker = TextChunker::new(800, 100).unwrap();
        let text = "Refunds are issued within 30 days.";
        let windows: Vec<_> = chunker.windows(text).collect();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].text, text);
        assert_eq!(windows[0].offset, 0);
    }

    #[test]
    fn test_input_of_exactly_chunk_size_is_single_chunk() {
        let chunker = TextChunker::new(800, 100).unwrap();
        let text = sample(800);
        assert_eq!(chunker.windows(&text).count(), 1);
    }

    #[test]
    fn test_empty_input_yields_one_empty_chunk() {
        let chunker = TextChunker::new(10, 2).unwrap();
        let windows: Vec<_> = chunker.windows("").collect();
        assert_eq!(windows, vec![Window { text: "", offset: 0 }]);
    }

    #[test]
    fn test_1600_chars_at_800_100() {
        let chunker = TextChunker::new(800, 100).unwrap();
        let text = sample(1600);
        let windows: Vec<_> = chunker.windows(&text).collect();

        assert_eq!(windows.len(), 3);
        assert_eq!(
            windows.iter().map(|w| w.offset).collect::<Vec<_>>(),
            vec![0, 700, 1400]
        );
        assert_eq!(windows[0].text.len(), 800);
        assert_eq!(windows[1].text.len(), 800);
        assert_eq!(windows[2].text.len(), 200);

        for pair in windows.windows(2) {
            let tail: String = pair[0].text.chars().skip(700).collect();
            let head: String = pair[1].text.chars().take(100).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_reconstruction_is_lossless() {
        for (size, overlap, len) in [(10, 3, 57), (7, 0, 21), (5, 4, 23), (800, 100, 2345)] {
            let chunker = TextChunker::new(size, overlap).unwrap();
            let text = sample(len);
            let windows: Vec<_> = chunker.windows(&text).collect();
            assert_eq!(reconstruct(&chunker, &windows), text, "size={size} overlap={overlap}");
        }
    }

    #[test]
    fn test_multibyte_characters() {
        let chunker = TextChunker::new(4, 1).unwrap();
        let text = "환불은 30일 이내에 처리됩니다 🙂";
        let windows: Vec<_> = chunker.windows(text).collect();

        assert!(windows.iter().all(|w| w.text.chars().count() <= 4));
        assert_eq!(windows[1].offset, 3);
        assert_eq!(reconstruct(&chunker, &windows), text);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let chunker = TextChunker::new(10, 2).unwrap();
        let text = sample(35);
        let mut windows = chunker.windows(&text);
        windows.next();
        let snapshot = windows.clone();

        let rest: Vec<_> = windows.collect();
        let replay: Vec<_> = snapshot.collect();
        assert_eq!(rest, replay);
        assert_eq!(rest[0].offset, 8);
    }

    #[test]
    fn test_chunks_carry_document_fields() {
        let chunker = TextChunker::new(10, 2).unwrap();
        let document = Document::new("notes.txt", sample(25));
        let chunks: Vec<_> = chunker.chunks(&document).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].offset, 8);
        assert_eq!(chunks[2].chunk_index, 2);
        assert!(chunks.iter().all(|c| c.source_id == "notes.txt"));
        assert!(chunks.iter().all(|c| c.embedding.is_none()));
        assert_ne!(chunks[0].id, chunks[1].id);
    }
}
