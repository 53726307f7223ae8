//! Collection management: list, inspect, create, delete, ingest files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::output::{IngestReport, get_formatter};
use crate::models::{Config, Document, OutputFormat, is_valid_collection_name};
use crate::services::{Ingestor, TextChunker, VectorStore, create_backend, create_embedder};
use crate::utils::{collect_files, has_content, load_texts};

#[derive(Debug, Subcommand)]
pub enum CollectionCommand {
    /// List collections
    List,

    /// Show a collection's size, dimension, and embedding model
    Info { name: String },

    /// Create an empty collection for the configured embedding model
    Create { name: String },

    /// Delete a collection and everything in it
    Delete {
        name: String,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        force: bool,
    },

    /// Chunk, embed, and store files or directories
    Ingest {
        name: String,

        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// File patterns to exclude (can be specified multiple times)
        #[arg(long, short = 'e')]
        exclude: Vec<String>,

        /// Window size in characters (defaults to chunking.chunk_size)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Characters shared by adjacent windows (defaults to chunking.chunk_overlap)
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Create the collection first when it does not exist
        #[arg(long)]
        create: bool,

        /// Show what would be ingested without doing it
        #[arg(long)]
        dry_run: bool,
    },
}

pub async fn handle_collection(
    cmd: CollectionCommand,
    config: Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    match cmd {
        CollectionCommand::List => handle_list(&config, format).await,
        CollectionCommand::Info { name } => handle_info(&config, &name, format).await,
        CollectionCommand::Create { name } => handle_create(&config, &name, format).await,
        CollectionCommand::Delete { name, force } => {
            handle_delete(&config, &name, force, format).await
        }
        CollectionCommand::Ingest {
            name,
            paths,
            exclude,
            chunk_size,
            chunk_overlap,
            create,
            dry_run,
        } => {
            let chunker = TextChunker::new(
                chunk_size.unwrap_or(config.chunking.chunk_size as usize),
                chunk_overlap.unwrap_or(config.chunking.chunk_overlap as usize),
            )?;
            let options = IngestOptions {
                paths,
                exclude,
                create,
                dry_run,
                verbose,
            };
            handle_ingest(&config, &name, chunker, options, format).await
        }
    }
}

async fn connect(config: &Config) -> Result<Arc<dyn VectorStore>> {
    create_backend(&config.vector_store).await.with_context(|| {
        format!(
            "failed to connect to {} at {}",
            config.vector_store.driver, config.vector_store.url
        )
    })
}

fn ensure_name(name: &str) -> Result<()> {
    anyhow::ensure!(
        is_valid_collection_name(name),
        "invalid collection name '{name}': use 1-63 letters, digits, '-' or '_', starting with a letter or digit"
    );
    Ok(())
}

async fn handle_list(config: &Config, format: OutputFormat) -> Result<()> {
    let store = connect(config).await?;
    let collections = store.list_collections().await?;
    print!("{}", get_formatter(format).format_collections(&collections));
    Ok(())
}

async fn handle_info(config: &Config, name: &str, format: OutputFormat) -> Result<()> {
    ensure_name(name)?;
    let store = connect(config).await?;
    let info = store
        .collection_info(name)
        .await?
        .with_context(|| format!("collection not found: {name}"))?;
    print!("{}", get_formatter(format).format_collection(&info));
    Ok(())
}

async fn handle_create(config: &Config, name: &str, format: OutputFormat) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let store = connect(config).await?;
    let info = Ingestor::new(embedder, store).create_collection(name).await?;
    print!("{}", get_formatter(format).format_collection(&info));
    Ok(())
}

async fn handle_delete(
    config: &Config,
    name: &str,
    force: bool,
    format: OutputFormat,
) -> Result<()> {
    ensure_name(name)?;
    let formatter = get_formatter(format);

    if !force {
        println!("This will delete collection '{name}' and all its chunks. Continue? [y/N]");
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", formatter.format_message("Cancelled."));
            return Ok(());
        }
    }

    let store = connect(config).await?;
    store.delete_collection(name).await?;
    println!(
        "{}",
        formatter.format_message(&format!("Deleted collection '{name}'."))
    );
    Ok(())
}

struct IngestOptions {
    paths: Vec<PathBuf>,
    exclude: Vec<String>,
    create: bool,
    dry_run: bool,
    verbose: bool,
}

fn progress_bar(len: u64, template: &str) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    ProgressBar::new(len).with_style(style)
}

async fn handle_ingest(
    config: &Config,
    name: &str,
    chunker: TextChunker,
    options: IngestOptions,
    format: OutputFormat,
) -> Result<()> {
    ensure_name(name)?;
    let formatter = get_formatter(format);
    let started = Instant::now();

    let mut exclude = options.exclude;
    exclude.extend(config.chunking.exclude_patterns.iter().cloned());
    let files = collect_files(&options.paths, &exclude)?;

    if options.verbose {
        eprintln!("Found {} files to process", files.len());
    }

    let mut report = IngestReport {
        collection: name.to_string(),
        files_scanned: files.len() as u64,
        ..Default::default()
    };

    let mut documents = Vec::new();
    for path in &files {
        match load_texts(path, config.chunking.max_file_size) {
            Ok(texts) => {
                let before = documents.len();
                documents.extend(
                    texts
                        .into_iter()
                        .filter(|t| has_content(&t.text))
                        .map(|t| Document::new(t.source_id, t.text)),
                );
                if documents.len() == before {
                    report.files_skipped += 1;
                } else {
                    report.files_ingested += 1;
                }
            }
            Err(e) => {
                if options.verbose {
                    eprintln!("Skipping {}: {}", path.display(), e);
                }
                report.files_skipped += 1;
            }
        }
    }

    let total_chunks: u64 = documents
        .iter()
        .map(|doc| chunker.chunks(doc).filter(|c| has_content(&c.text)).count() as u64)
        .sum();

    if options.dry_run {
        println!(
            "{}",
            formatter.format_message(&format!(
                "Dry run: would ingest {} documents from {} files ({} chunks) into '{}'",
                documents.len(),
                report.files_ingested,
                total_chunks,
                name
            ))
        );
        for doc in &documents {
            println!("  {}", doc.source_id);
        }
        return Ok(());
    }

    if documents.is_empty() {
        println!("{}", formatter.format_message("No files to ingest."));
        return Ok(());
    }

    let embedder = create_embedder(&config.embedding)?;
    let store = connect(config).await?;
    let ingestor = Ingestor::new(embedder, store.clone())
        .with_batch_size(config.embedding.batch_size as usize);

    if options.create && store.collection_info(name).await?.is_none() {
        ingestor.create_collection(name).await?;
    }

    let pb = progress_bar(
        total_chunks,
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})",
    );
    let result = ingestor
        .ingest_with_progress(name, &documents, &chunker, |n| pb.inc(n as u64))
        .await;
    pb.finish_and_clear();

    let stats = result.with_context(|| format!("failed to ingest into '{name}'"))?;
    report.chunks_created = stats.chunks;
    report.duration_ms = started.elapsed().as_millis() as u64;

    print!("{}", formatter.format_ingest_stats(&report));
    Ok(())
}
