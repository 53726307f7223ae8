use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::collection::is_valid_collection_name;
use super::query::Provider;
use crate::error::ConfigError;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11411";
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION: &str = "default";
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful AI assistant.";
pub const DEFAULT_METRICS_RETENTION_DAYS: u32 = 30;

const APP_DIR: &str = "ragchat";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("config.toml"))
    }

    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join(APP_DIR))
    }

    pub fn metrics_db_path() -> Option<PathBuf> {
        Self::data_dir().map(|p| p.join("metrics.db"))
    }

    pub fn models_dir() -> Option<PathBuf> {
        Self::data_dir().map(|p| p.join("models"))
    }

    /// Directory for rolling log files, unless overridden in `[logging]`.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.logging
            .directory
            .clone()
            .or_else(|| Self::data_dir().map(|p| p.join("logs")))
    }

    /// Load from `path` (or the default location), apply environment overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::config_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let content = std::fs::read_to_string(p)?;
                toml::from_str::<Config>(&content)?
            }
            _ => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Apply `RAGCHAT_*` overrides. The lookup is injected so tests never touch the process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("RAGCHAT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("RAGCHAT_PORT") {
            self.server.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("RAGCHAT_PORT is not a valid port: {port}"))
            })?;
        }
        if let Some(url) = lookup("RAGCHAT_EMBEDDING_URL") {
            self.embedding.url = url;
        }
        if let Some(url) = lookup("RAGCHAT_VECTOR_STORE_URL") {
            self.vector_store.url = url;
        }
        if let Some(key) = lookup("RAGCHAT_VECTOR_STORE_API_KEY") {
            self.vector_store.api_key = Some(key);
        }
        if let Some(level) = lookup("RAGCHAT_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.chunking.chunk_size == 0 {
            return invalid("chunking.chunk_size must be at least 1".to_string());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return invalid(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            ));
        }
        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be at least 1".to_string());
        }
        if let Some(score) = self.retrieval.min_score
            && !(-1.0..=1.0).contains(&score)
        {
            return invalid(format!(
                "retrieval.min_score must be between -1.0 and 1.0, got {score}"
            ));
        }
        if !(0.0..=2.0).contains(&self.chat.temperature) {
            return invalid(format!(
                "chat.temperature must be between 0.0 and 2.0, got {}",
                self.chat.temperature
            ));
        }
        if self.chat.max_tokens == 0 {
            return invalid("chat.max_tokens must be at least 1".to_string());
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be at least 1".to_string());
        }
        if !is_valid_collection_name(&self.vector_store.default_collection) {
            return invalid(format!(
                "vector_store.default_collection is not a valid collection name: {}",
                self.vector_store.default_collection
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which embedding implementation backs the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Remote text-embeddings-inference style server
    #[default]
    Http,
    /// Local ONNX model loaded through ONNX Runtime
    Onnx,
}

impl std::fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingBackend::Http => write!(f, "http"),
            EmbeddingBackend::Onnx => write!(f, "onnx"),
        }
    }
}

/// How token embeddings are reduced to one sentence vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    #[default]
    Mean,
    LastToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_embedding_model")]
    pub model_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,

    #[serde(default = "default_dimension")]
    pub dimension: u32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub pooling: Pooling,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_dimension() -> u32 {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_max_tokens() -> u32 {
    256
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_batch_size() -> u32 {
    32
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            url: default_embedding_url(),
            model_id: default_embedding_model(),
            model_path: None,
            dimension: default_dimension(),
            max_tokens: default_max_tokens(),
            pooling: Pooling::default(),
            timeout_secs: default_embedding_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

impl EmbeddingConfig {
    /// Directory holding `model.onnx` and `tokenizer.json` for the ONNX backend.
    pub fn resolved_model_dir(&self) -> Option<PathBuf> {
        self.model_path.clone().or_else(|| {
            Config::models_dir().map(|dir| dir.join(self.model_id.replace('/', "--")))
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    #[default]
    Qdrant,
    #[serde(alias = "postgres", alias = "pgvector")]
    PostgreSQL,
    Memory,
}

impl std::fmt::Display for VectorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorDriver::Qdrant => write!(f, "qdrant"),
            VectorDriver::PostgreSQL => write!(f, "postgresql"),
            VectorDriver::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub driver: VectorDriver,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_collection")]
    pub default_collection: String,

    #[serde(default = "default_pool_max")]
    pub pool_max: u32,

    #[serde(default = "default_pool_acquire_timeout")]
    pub pool_acquire_timeout: u32,
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_pool_max() -> u32 {
    5
}

fn default_pool_acquire_timeout() -> u32 {
    30
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            url: default_qdrant_url(),
            api_key: None,
            default_collection: default_collection(),
            pool_max: default_pool_max(),
            pool_acquire_timeout: default_pool_acquire_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Characters shared by adjacent windows
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

fn default_chunk_size() -> u32 {
    800
}

fn default_chunk_overlap() -> u32 {
    100
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/.venv/**".to_string(),
    ]
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_file_size: default_max_file_size(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Hits scoring below this are dropped before the prompt is built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,

    /// Upper bound on each embedding and search call made while answering a query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_top_k() -> u32 {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_deepseek")]
    pub deepseek: ProviderEndpoint,

    #[serde(default = "default_openai")]
    pub openai: ProviderEndpoint,

    #[serde(default = "default_gemini")]
    pub gemini: ProviderEndpoint,
}

fn default_provider_timeout() -> u64 {
    60
}

fn default_deepseek() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://api.deepseek.com".to_string(),
        model: "deepseek-chat".to_string(),
    }
}

fn default_openai() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://api.openai.com/v1".to_string(),
        model: "gpt-3.5-turbo".to_string(),
    }
}

fn default_gemini() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        model: "gemini-1.5-flash".to_string(),
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_provider_timeout(),
            deepseek: default_deepseek(),
            openai: default_openai(),
            gemini: default_gemini(),
        }
    }
}

impl ProvidersConfig {
    pub fn endpoint(&self, provider: Provider) -> &ProviderEndpoint {
        match provider {
            Provider::DeepSeek => &self.deepseek,
            Provider::OpenAi => &self.openai,
            Provider::Gemini => &self.gemini,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_system_message")]
    pub system_message: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_chat_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub provider: Provider,

    /// Appended to every system message received over HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_instruction: Option<String>,
}

fn default_system_message() -> String {
    DEFAULT_SYSTEM_MESSAGE.to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_chat_max_tokens() -> u32 {
    1000
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_message: default_system_message(),
            temperature: default_temperature(),
            max_tokens: default_chat_max_tokens(),
            provider: Provider::default(),
            safety_instruction: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_retention_days() -> u32 {
    DEFAULT_METRICS_RETENTION_DAYS
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_file_logging")]
    pub file_logging: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_file_logging() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_logging: default_file_logging(),
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.embedding.model_id, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.vector_store.url, DEFAULT_QDRANT_URL);
        assert_eq!(config.vector_store.default_collection, DEFAULT_COLLECTION);
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.retrieval.top_k, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(path.is_some());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [vector_store]
            driver = "memory"

            [retrieval]
            top_k = 5
            min_score = 0.25
            "#,
        )
        .unwrap();

        assert_eq!(config.vector_store.driver, VectorDriver::Memory);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.min_score, Some(0.25));
        assert_eq!(config.chat.max_tokens, 1000);
        assert_eq!(config.providers.deepseek.model, "deepseek-chat");
    }

    #[test]
    fn test_driver_aliases() {
        let config: Config = toml::from_str("[vector_store]\ndriver = \"pgvector\"\n").unwrap();
        assert_eq!(config.vector_store.driver, VectorDriver::PostgreSQL);
    }

    #[test]
    fn test_validate_rejects_overlap_not_smaller_than_size() {
        let mut config = Config::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chat.temperature = 3.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.vector_store.default_collection = "has space".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(|key| match key {
                "RAGCHAT_PORT" => Some("9000".to_string()),
                "RAGCHAT_VECTOR_STORE_URL" => Some("http://qdrant:6334".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.vector_store.url, "http://qdrant:6334");
        assert_eq!(config.server.host, DEFAULT_HOST);
    }

    #[test]
    fn test_env_override_rejects_bad_port() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|key| {
            (key == "RAGCHAT_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.retrieval.top_k = 4;
        config.vector_store.driver = VectorDriver::Memory;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.retrieval.top_k, 4);
        assert_eq!(loaded.vector_store.driver, VectorDriver::Memory);
    }

    #[test]
    fn test_resolved_model_dir_prefers_explicit_path() {
        let config = EmbeddingConfig {
            model_path: Some(PathBuf::from("/models/minilm")),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_model_dir(),
            Some(PathBuf::from("/models/minilm"))
        );
    }
}
