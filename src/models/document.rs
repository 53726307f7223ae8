use serde::{Deserialize, Serialize};

use crate::utils::file::calculate_checksum;

/// A source text before chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_id: String,
    pub text: String,
    pub checksum: String,
}

/// A window of a document, optionally carrying its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub source_id: String,
    pub text: String,
    /// Character offset of `text` within the source document.
    pub offset: u64,
    pub chunk_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl Document {
    pub fn generate_id(source_id: &str) -> String {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(source_id.as_bytes());
        hex::encode(&hash[..16])
    }

    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        let source_id = source_id.into();
        let text = text.into();
        Self {
            id: Self::generate_id(&source_id),
            checksum: calculate_checksum(&text),
            source_id,
            text,
        }
    }
}

impl DocumentChunk {
    /// Deterministic id, so re-ingesting a source overwrites its previous chunks.
    pub fn generate_id(document_id: &str, chunk_index: u32) -> String {
        use uuid::Uuid;
        let name = format!("{}:{}", document_id, chunk_index);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    /// Id for a chunk embedded elsewhere, keyed by its source and offset. Uses a
    /// different namespace from [`DocumentChunk::generate_id`] so the two never collide.
    pub fn pre_embedded_id(source_id: &str, offset: u64) -> String {
        use uuid::Uuid;
        let name = format!("{}:{}", source_id, offset);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
    }

    pub fn from_document(document: &Document, text: String, offset: u64, chunk_index: u32) -> Self {
        Self {
            id: Self::generate_id(&document.id, chunk_index),
            document_id: document.id.clone(),
            source_id: document.source_id.clone(),
            text,
            offset,
            chunk_index,
            embedding: None,
            embedding_model: None,
        }
    }

    /// A chunk that arrives already embedded, e.g. through the chunk insert API.
    pub fn pre_embedded(
        source_id: impl Into<String>,
        text: impl Into<String>,
        offset: u64,
        embedding: Vec<f32>,
        embedding_model: Option<String>,
    ) -> Self {
        let source_id = source_id.into();
        let document_id = Document::generate_id(&source_id);
        // Informational only; the id comes from the offset.
        let chunk_index = u32::try_from(offset).unwrap_or(u32::MAX);
        Self {
            id: Self::pre_embedded_id(&source_id, offset),
            document_id,
            source_id,
            text: text.into(),
            offset,
            chunk_index,
            embedding: Some(embedding),
            embedding_model,
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>, model: &str) -> Self {
        self.embedding = Some(embedding);
        self.embedding_model = Some(model.to_string());
        self
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_generate_id() {
        let id = Document::generate_id("policies/refunds.md");
        assert_eq!(id.len(), 32);
        assert_eq!(id, Document::generate_id("policies/refunds.md"));
    }

    #[test]
    fn test_document_new() {
        let doc = Document::new("faq.md", "Refunds are issued within 30 days.");
        assert_eq!(doc.source_id, "faq.md");
        assert_eq!(doc.checksum.len(), 64);
    }

    #[test]
    fn test_chunk_generate_id() {
        let id = DocumentChunk::generate_id("abc123", 5);
        assert_eq!(id.len(), 36);
        assert_eq!(id.chars().filter(|c| *c == '-').count(), 4);
        assert_eq!(id, DocumentChunk::generate_id("abc123", 5));
        assert_ne!(id, DocumentChunk::generate_id("abc123", 6));
    }

    #[test]
    fn test_with_embedding_sets_model() {
        let doc = Document::new("a.txt", "hello");
        let chunk = DocumentChunk::from_document(&doc, "hello".into(), 0, 0)
            .with_embedding(vec![0.1, 0.2], "mini");
        assert_eq!(chunk.embedding.as_deref(), Some(&[0.1, 0.2][..]));
        assert_eq!(chunk.embedding_model.as_deref(), Some("mini"));
        assert_eq!(chunk.char_len(), 5);
    }

    #[test]
    fn test_pre_embedded_ids_are_stable() {
        let a = DocumentChunk::pre_embedded("kb", "text", 40, vec![1.0], None);
        let b = DocumentChunk::pre_embedded("kb", "other text", 40, vec![1.0], None);
        assert_eq!(a.id, b.id);
        assert_eq!(a.document_id, Document::generate_id("kb"));
    }

    #[test]
    fn test_pre_embedded_ids_do_not_collide_with_chunker_ids() {
        let doc = Document::new("kb", "text");
        let chunked = DocumentChunk::from_document(&doc, "text".into(), 0, 3);
        let inserted = DocumentChunk::pre_embedded("kb", "text", 3, vec![1.0], None);
        assert_ne!(chunked.id, inserted.id);

        let far = u64::from(u32::MAX) + 1;
        let a = DocumentChunk::pre_embedded("kb", "a", far, vec![1.0], None);
        let b = DocumentChunk::pre_embedded("kb", "b", far + 1, vec![1.0], None);
        assert_ne!(a.id, b.id);
    }
}
