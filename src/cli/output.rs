use std::fmt::Write as FmtWrite;

use serde::Serialize;

use crate::models::{CollectionInfo, OutputFormat, Provider, RetrievalStatus, RetrievedChunk};
use crate::services::MetricsSummary;
use crate::utils::preview;

pub trait Formatter {
    fn format_answer(&self, answer: &AnswerOutput) -> String;
    fn format_collections(&self, collections: &[CollectionInfo]) -> String;
    fn format_collection(&self, collection: &CollectionInfo) -> String;
    fn format_ingest_stats(&self, stats: &IngestReport) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerOutput {
    pub query: String,
    pub answer: String,
    pub provider: Provider,
    pub model: Option<String>,
    pub retrieval: RetrievalStatus,
    pub sources: Vec<RetrievedChunk>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub collection: String,
    pub files_scanned: u64,
    pub files_ingested: u64,
    pub files_skipped: u64,
    pub chunks_created: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub embedding_backend: String,
    pub embedding_model: String,
    pub embedding_connected: bool,
    pub vector_store_driver: String,
    pub vector_store_url: String,
    pub vector_store_connected: bool,
    pub collections: Vec<CollectionInfo>,
    pub metrics: Option<MetricsSummary>,
}

const SOURCE_PREVIEW_CHARS: usize = 200;

fn retrieval_note(status: RetrievalStatus) -> &'static str {
    match status {
        RetrievalStatus::Skipped => "general mode",
        RetrievalStatus::ContextFound => "answered with document context",
        RetrievalStatus::NoContext => "no relevant context found, answered without it",
    }
}

fn connection_tag(connected: bool) -> console::StyledObject<&'static str> {
    if connected {
        console::style("[CONNECTED]").green()
    } else {
        console::style("[DISCONNECTED]").red()
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_answer(&self, answer: &AnswerOutput) -> String {
        let mut output = String::new();
        if let Some(ref prompt) = answer.prompt {
            let _ = writeln!(output, "Prompt");
            let _ = writeln!(output, "------");
            let _ = writeln!(output, "{}\n", prompt);
        }

        let _ = writeln!(output, "{}\n", answer.answer.trim_end());
        let model = answer.model.as_deref().unwrap_or("unknown model");
        let _ = writeln!(
            output,
            "[{} / {} in {}ms, {}]",
            answer.provider,
            model,
            answer.duration_ms,
            retrieval_note(answer.retrieval)
        );

        for (i, source) in answer.sources.iter().enumerate() {
            let _ = writeln!(
                output,
                "  {}. {} (offset {}, score {:.3})",
                i + 1,
                source.source_id,
                source.offset,
                source.score
            );
            for line in preview(&source.text, SOURCE_PREVIEW_CHARS).lines() {
                let _ = writeln!(output, "     {}", line);
            }
        }
        output
    }

    fn format_collections(&self, collections: &[CollectionInfo]) -> String {
        if collections.is_empty() {
            return "No collections found.\n".to_string();
        }

        let mut output = String::new();
        let _ = writeln!(output, "Collections");
        let _ = writeln!(output, "-----------");
        for c in collections {
            let _ = writeln!(
                output,
                "  {} ({} chunks, model: {})",
                c.name,
                c.points_count,
                c.embedding_model.as_deref().unwrap_or("-")
            );
        }
        output
    }

    fn format_collection(&self, c: &CollectionInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Collection:  {}", c.name);
        let _ = writeln!(output, "  Chunks:    {}", c.points_count);
        if let Some(dimension) = c.dimension {
            let _ = writeln!(output, "  Dimension: {}", dimension);
        }
        if let Some(ref model) = c.embedding_model {
            let _ = writeln!(output, "  Model:     {}", model);
        }
        output
    }

    fn format_ingest_stats(&self, stats: &IngestReport) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Ingest Complete ({})", stats.collection);
        let _ = writeln!(output, "---------------");
        let _ = writeln!(output, "Files scanned:  {}", stats.files_scanned);
        let _ = writeln!(output, "Files ingested: {}", stats.files_ingested);
        let _ = writeln!(output, "Files skipped:  {}", stats.files_skipped);
        let _ = writeln!(output, "Chunks created: {}", stats.chunks_created);
        let _ = writeln!(output, "Duration:       {}ms", stats.duration_ms);
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Status");
        let _ = writeln!(output, "------");

        let embedding = connection_tag(status.embedding_connected);
        let _ = writeln!(
            output,
            "Embedding:     {} ({})",
            status.embedding_backend, embedding
        );
        let _ = writeln!(output, "  Model:       {}", status.embedding_model);
        let _ = writeln!(output);

        let vector_status = connection_tag(status.vector_store_connected);
        let _ = writeln!(
            output,
            "Vector Store:  {} ({})",
            status.vector_store_driver, vector_status
        );
        if status.vector_store_connected {
            let _ = writeln!(output, "  URL:         {}", status.vector_store_url);
            let _ = writeln!(output, "  Collections: {}", status.collections.len());
            for c in &status.collections {
                let _ = writeln!(output, "    {} ({} chunks)", c.name, c.points_count);
            }
        }

        if let Some(ref m) = status.metrics {
            let _ = writeln!(output);
            let _ = writeln!(output, "Requests:      {}", m.total_requests);
            let _ = writeln!(output, "  Avg Latency: {}ms", m.avg_latency_ms);
            if m.error_rate > 0.0 {
                let _ = writeln!(output, "  Error Rate:  {:.1}%", m.error_rate);
            }
        }

        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render(&self, value: &impl Serialize) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_answer(&self, answer: &AnswerOutput) -> String {
        self.render(answer)
    }

    fn format_collections(&self, collections: &[CollectionInfo]) -> String {
        self.render(&serde_json::json!({ "collections": collections }))
    }

    fn format_collection(&self, collection: &CollectionInfo) -> String {
        self.render(collection)
    }

    fn format_ingest_stats(&self, stats: &IngestReport) -> String {
        self.render(stats)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.render(status)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({ "message": message }).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({ "error": error }).to_string()
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_answer(&self, answer: &AnswerOutput) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## {}\n", answer.query);
        let _ = writeln!(output, "{}\n", answer.answer.trim_end());
        let _ = writeln!(
            output,
            "*{} / {}, {}ms, {}*\n",
            answer.provider,
            answer.model.as_deref().unwrap_or("unknown model"),
            answer.duration_ms,
            retrieval_note(answer.retrieval)
        );

        if !answer.sources.is_empty() {
            let _ = writeln!(output, "### Sources\n");
            for (i, source) in answer.sources.iter().enumerate() {
                let _ = writeln!(
                    output,
                    "{}. `{}` (score {:.3})\n",
                    i + 1,
                    source.source_id,
                    source.score
                );
                let _ = writeln!(output, "```");
                let _ = writeln!(output, "{}", source.text);
                let _ = writeln!(output, "```\n");
            }
        }

        if let Some(ref prompt) = answer.prompt {
            let _ = writeln!(output, "### Prompt\n");
            let _ = writeln!(output, "```");
            let _ = writeln!(output, "{}", prompt);
            let _ = writeln!(output, "```");
        }
        output
    }

    fn format_collections(&self, collections: &[CollectionInfo]) -> String {
        if collections.is_empty() {
            return "## Collections\n\n*No collections found.*\n".to_string();
        }

        let mut output = String::new();
        let _ = writeln!(output, "## Collections\n");
        let _ = writeln!(output, "| Name | Chunks | Dimension | Model |");
        let _ = writeln!(output, "|------|--------|-----------|-------|");
        for c in collections {
            let dimension = c.dimension.map_or_else(|| "-".to_string(), |d| d.to_string());
            let _ = writeln!(
                output,
                "| `{}` | {} | {} | {} |",
                c.name,
                c.points_count,
                dimension,
                c.embedding_model.as_deref().unwrap_or("-")
            );
        }
        output
    }

    fn format_collection(&self, c: &CollectionInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## Collection `{}`\n", c.name);
        let _ = writeln!(output, "- **Chunks:** {}", c.points_count);
        if let Some(dimension) = c.dimension {
            let _ = writeln!(output, "- **Dimension:** {}", dimension);
        }
        if let Some(ref model) = c.embedding_model {
            let _ = writeln!(output, "- **Model:** {}", model);
        }
        output
    }

    fn format_ingest_stats(&self, stats: &IngestReport) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## Ingest Complete (`{}`)\n", stats.collection);
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Files scanned | {} |", stats.files_scanned);
        let _ = writeln!(output, "| Files ingested | {} |", stats.files_ingested);
        let _ = writeln!(output, "| Files skipped | {} |", stats.files_skipped);
        let _ = writeln!(output, "| Chunks created | {} |", stats.chunks_created);
        let _ = writeln!(output, "| Duration | {}ms |", stats.duration_ms);
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## Status\n");

        let embedding = if status.embedding_connected { "✅" } else { "❌" };
        let _ = writeln!(
            output,
            "### Embedding ({}) {}\n",
            status.embedding_backend, embedding
        );
        let _ = writeln!(output, "- **Model:** {}\n", status.embedding_model);

        let vector_status = if status.vector_store_connected {
            "✅"
        } else {
            "❌"
        };
        let _ = writeln!(
            output,
            "### Vector Store ({}) {}\n",
            status.vector_store_driver, vector_status
        );
        let _ = writeln!(output, "- **URL:** `{}`", status.vector_store_url);
        let _ = writeln!(output, "- **Collections:** {}", status.collections.len());

        if let Some(ref m) = status.metrics {
            let _ = writeln!(output, "\n### Requests\n");
            let _ = writeln!(output, "- **Total:** {}", m.total_requests);
            let _ = writeln!(output, "- **Avg Latency:** {}ms", m.avg_latency_ms);
            if m.error_rate > 0.0 {
                let _ = writeln!(output, "- **Error Rate:** {:.1}%", m.error_rate);
            }
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {}\n", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}
