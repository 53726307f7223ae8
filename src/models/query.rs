//! Per-turn query models: what the caller asks, how retrieval is scoped,
//! and what comes back.

use serde::{Deserialize, Serialize};

use super::config::{Config, RetrievalConfig};

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
    /// Documentation-friendly Markdown format
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// Whether a turn is answered with document context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Rag,
    #[default]
    General,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rag" => Ok(Mode::Rag),
            "general" => Ok(Mode::General),
            _ => Err(format!("unknown mode: {}", s)),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Rag => write!(f, "rag"),
            Mode::General => write!(f, "general"),
        }
    }
}

/// LLM backend selected per request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[default]
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "openai", alias = "chatgpt")]
    OpenAi,
    #[serde(rename = "gemini")]
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::DeepSeek, Provider::OpenAi, Provider::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "deepseek",
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        }
    }

    /// Environment variable the CLI reads the API key from.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deepseek" => Ok(Provider::DeepSeek),
            "openai" | "chatgpt" => Ok(Provider::OpenAi),
            "gemini" => Ok(Provider::Gemini),
            _ => Err(format!("unknown provider: {}", s)),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior message, owned by the caller and forwarded as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Everything the caller supplies for a single turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub raw_query: String,
    pub mode: Mode,
    pub system_message: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl QueryContext {
    pub fn new(raw_query: impl Into<String>, mode: Mode, config: &Config) -> Self {
        Self {
            raw_query: raw_query.into(),
            mode,
            system_message: config.chat.system_message.clone(),
            temperature: config.chat.temperature,
            max_tokens: config.chat.max_tokens,
        }
    }
}

/// Where and how much to retrieve. Passed into every query, never held globally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalScope {
    pub collection: String,
    pub top_k: u32,
    pub min_score: Option<f32>,
}

impl RetrievalScope {
    pub fn new(collection: impl Into<String>, retrieval: &RetrievalConfig) -> Self {
        Self {
            collection: collection.into(),
            top_k: retrieval.top_k,
            min_score: retrieval.min_score,
        }
    }
}

/// The prompt handed to the LLM gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Both parts as one block, for display.
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStatus {
    /// GENERAL mode, retrieval was never attempted
    Skipped,
    ContextFound,
    /// RAG mode, but nothing relevant was found
    NoContext,
}

impl std::fmt::Display for RetrievalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalStatus::Skipped => write!(f, "skipped"),
            RetrievalStatus::ContextFound => write!(f, "context_found"),
            RetrievalStatus::NoContext => write!(f, "no_context"),
        }
    }
}

/// A search hit as returned by a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub source_id: String,
    pub text: String,
    pub offset: u64,
    pub score: f32,
    /// Insertion order within the collection, used to break score ties.
    #[serde(skip)]
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub status: RetrievalStatus,
    /// Most relevant first.
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn skipped() -> Self {
        Self {
            status: RetrievalStatus::Skipped,
            chunks: Vec::new(),
        }
    }

    pub fn no_context() -> Self {
        Self {
            status: RetrievalStatus::NoContext,
            chunks: Vec::new(),
        }
    }

    pub fn found(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            status: RetrievalStatus::ContextFound,
            chunks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}
