//! Command-line interface.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Chat with DeepSeek, OpenAI, or Gemini, optionally grounded in your documents.
#[derive(Debug, Parser)]
#[command(name = "ragchat")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "RAGCHAT_CONFIG",
        help = "Path to config.toml (defaults to the platform config directory)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve(commands::ServeArgs),

    /// Ask a single question
    Ask(commands::AskArgs),

    /// Manage document collections (list, info, create, delete, ingest)
    #[command(subcommand)]
    Collection(commands::CollectionCommand),

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),

    /// Check embedding backend, vector store, and request metrics
    Status,
}
