use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static COLLECTION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,62}$").expect("collection name pattern compiles")
});

/// Collection names double as Qdrant collection and PostgreSQL table suffixes.
pub fn is_valid_collection_name(name: &str) -> bool {
    COLLECTION_NAME.is_match(name)
}

/// Parameters for creating a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: u64,
    pub embedding_model: String,
}

/// What a vector store reports about an existing collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub points_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl CollectionInfo {
    pub fn from_spec(spec: &CollectionSpec, points_count: u64) -> Self {
        Self {
            name: spec.name.clone(),
            points_count,
            dimension: Some(spec.dimension),
            embedding_model: Some(spec.embedding_model.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_collection_names() {
        assert!(is_valid_collection_name("default"));
        assert!(is_valid_collection_name("support-docs_v2"));
        assert!(is_valid_collection_name("A"));
        assert!(is_valid_collection_name(&"a".repeat(63)));
    }

    #[test]
    fn test_invalid_collection_names() {
        assert!(!is_valid_collection_name(""));
        assert!(!is_valid_collection_name("-leading"));
        assert!(!is_valid_collection_name("has space"));
        assert!(!is_valid_collection_name("drop;table"));
        assert!(!is_valid_collection_name(&"a".repeat(64)));
    }
}
