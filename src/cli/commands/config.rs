use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Write a configuration file with default values")]
    Init {
        #[arg(long, help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show the effective configuration (API keys masked)")]
    Show,
    #[command(about = "Show configuration and data file paths")]
    Path,
}

pub async fn handle_config(
    cmd: ConfigCommand,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => Config::config_path()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?,
    };

    match cmd {
        ConfigCommand::Init { force } => handle_init(&path, force, format),
        ConfigCommand::Show => handle_show(&path, format),
        ConfigCommand::Path => handle_path(&path, format),
    }
}

fn handle_init(path: &Path, force: bool, format: OutputFormat) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    Config::default()
        .save_to(path)
        .context("failed to write config")?;
    println!(
        "{}",
        get_formatter(format).format_message(&format!("Created config at: {}", path.display()))
    );
    Ok(())
}

/// The loaded config with secrets replaced.
fn masked(config: &Config) -> Config {
    let mut shown = config.clone();
    if shown.vector_store.api_key.is_some() {
        shown.vector_store.api_key = Some("********".to_string());
    }
    shown
}

fn handle_show(path: &Path, format: OutputFormat) -> Result<()> {
    let config = masked(&Config::load_from(Some(path))?);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if path.exists() {
        println!("# Config: {}", path.display());
    } else {
        println!("# Config: {} (not found, showing defaults)", path.display());
    }
    println!();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn handle_path(path: &Path, format: OutputFormat) -> Result<()> {
    let config = Config::load_from(Some(path)).unwrap_or_default();
    let display = |p: Option<PathBuf>| p.map_or_else(|| "-".to_string(), |p| p.display().to_string());

    let entries = [
        ("config", path.display().to_string()),
        ("data", display(Config::data_dir())),
        ("metrics", display(Config::metrics_db_path())),
        ("models", display(Config::models_dir())),
        ("logs", display(config.log_dir())),
    ];

    if format == OutputFormat::Json {
        let map: serde_json::Map<String, serde_json::Value> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    let exists = if path.exists() { "active" } else { "would be" };
    println!("Config file ({exists}): {}", path.display());
    for (name, value) in entries.iter().skip(1) {
        println!("{:<12} {}", format!("{name}:"), value);
    }
    Ok(())
}
