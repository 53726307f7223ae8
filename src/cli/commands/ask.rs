use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::output::{AnswerOutput, get_formatter};
use crate::models::{
    Config, Mode, OutputFormat, Provider, QueryContext, RetrievalResult, RetrievalScope,
};
use crate::services::{
    CompletionRequest, LlmGateway, RetrievalOrchestrator, create_backend, create_embedder,
    general_prompt,
};

#[derive(Debug, Args)]
pub struct AskArgs {
    /// The question
    #[arg(required = true)]
    pub query: String,

    /// Answer with context retrieved from a collection
    #[arg(long)]
    pub rag: bool,

    /// Collection to retrieve from (defaults to vector_store.default_collection)
    #[arg(long, short = 'c')]
    pub collection: Option<String>,

    /// deepseek, openai (chatgpt), or gemini (defaults to chat.provider)
    #[arg(long, short = 'p')]
    pub provider: Option<Provider>,

    /// API key (defaults to DEEPSEEK_API_KEY, OPENAI_API_KEY, or GEMINI_API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    /// System message (defaults to chat.system_message)
    #[arg(long)]
    pub system: Option<String>,

    #[arg(long, short = 't')]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Number of chunks to retrieve (defaults to retrieval.top_k)
    #[arg(long, short = 'k')]
    pub top_k: Option<u32>,

    /// Print the prompt sent to the provider
    #[arg(long)]
    pub show_prompt: bool,
}

fn resolve_api_key(explicit: Option<String>, provider: Provider) -> Result<String> {
    let usable = |key: &String| !key.trim().is_empty();
    explicit
        .filter(usable)
        .or_else(|| std::env::var(provider.api_key_env()).ok().filter(usable))
        .with_context(|| {
            format!(
                "no API key for {provider}: pass --api-key or set {}",
                provider.api_key_env()
            )
        })
}

pub async fn handle_ask(
    args: AskArgs,
    config: Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let start = Instant::now();

    let provider = args.provider.unwrap_or(config.chat.provider);
    let api_key = resolve_api_key(args.api_key, provider)?;
    let mode = if args.rag { Mode::Rag } else { Mode::General };

    let mut ctx = QueryContext::new(args.query.as_str(), mode, &config);
    if let Some(system) = args.system {
        ctx.system_message = system;
    }
    if let Some(temperature) = args.temperature {
        anyhow::ensure!(
            (0.0..=2.0).contains(&temperature),
            "temperature must be between 0.0 and 2.0"
        );
        ctx.temperature = temperature;
    }
    if let Some(max_tokens) = args.max_tokens {
        anyhow::ensure!(max_tokens >= 1, "max-tokens must be at least 1");
        ctx.max_tokens = max_tokens;
    }

    // Retrieval backends are only built when they will be used.
    let (prompt, retrieval) = match mode {
        Mode::General => (general_prompt(&ctx)?, RetrievalResult::skipped()),
        Mode::Rag => {
            let collection = args
                .collection
                .unwrap_or_else(|| config.vector_store.default_collection.clone());
            let mut scope = RetrievalScope::new(collection, &config.retrieval);
            if let Some(top_k) = args.top_k {
                scope.top_k = top_k.max(1);
            }

            let embedder = create_embedder(&config.embedding)?;
            let store = create_backend(&config.vector_store).await?;
            let orchestrator = RetrievalOrchestrator::new(embedder, store)
                .with_timeout(config.retrieval.timeout_secs.map(Duration::from_secs));
            orchestrator.handle_query(&ctx, &scope).await?
        }
    };

    if verbose {
        eprintln!(
            "Retrieval: {} ({} chunks)",
            retrieval.status,
            retrieval.len()
        );
    }

    let gateway = LlmGateway::from_config(&config.providers)?;
    let request = CompletionRequest::new(api_key, &prompt, ctx.temperature, ctx.max_tokens);
    let answer = gateway.complete(provider, &request).await?;

    let output = AnswerOutput {
        query: args.query,
        answer,
        provider,
        model: gateway.model(provider).map(str::to_string),
        retrieval: retrieval.status,
        sources: retrieval.chunks,
        duration_ms: start.elapsed().as_millis() as u64,
        prompt: args.show_prompt.then(|| prompt.render()),
    };

    print!("{}", formatter.format_answer(&output));
    Ok(())
}
