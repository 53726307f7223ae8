use std::path::Path;

use anyhow::Result;
use clap::Parser;

use ragchat::cli::commands::{
    handle_ask, handle_collection, handle_config, handle_serve, handle_status,
};
use ragchat::cli::{Cli, Commands};
use ragchat::logging;
use ragchat::models::Config;
use ragchat::server::shutdown_signal;

/// Detect ONNX Runtime library path and set ORT_DYLIB_PATH if not already set.
/// Must be called before any ort code runs.
fn detect_and_set_ort_path() {
    if std::env::var("ORT_DYLIB_PATH")
        .map(|p| Path::new(&p).exists())
        .unwrap_or(false)
    {
        return;
    }

    let home = std::env::var("HOME").unwrap_or_default();

    let found = if cfg!(target_os = "macos") {
        [
            format!("{home}/.local/lib/ragchat/libonnxruntime.dylib"),
            "/opt/homebrew/opt/onnxruntime/lib/libonnxruntime.dylib".into(),
            "/usr/local/opt/onnxruntime/lib/libonnxruntime.dylib".into(),
        ]
        .into_iter()
        .find(|p| Path::new(p).exists())
    } else if cfg!(target_os = "linux") {
        [
            format!("{home}/.local/lib/ragchat/libonnxruntime.so"),
            "/usr/lib/libonnxruntime.so".into(),
            "/usr/local/lib/libonnxruntime.so".into(),
            "/usr/lib/x86_64-linux-gnu/libonnxruntime.so".into(),
            "/usr/lib/aarch64-linux-gnu/libonnxruntime.so".into(),
        ]
        .into_iter()
        .find(|p| Path::new(p).exists())
    } else {
        None
    };

    if let Some(path) = found {
        // SAFETY: Called at program start before any threads are spawned.
        unsafe {
            std::env::set_var("ORT_DYLIB_PATH", path);
        }
    }
}

fn main() -> Result<()> {
    detect_and_set_ort_path();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.format.unwrap_or_default();
    let verbose = cli.verbose;

    // `config` subcommands must work even when the file on disk is broken.
    if let Commands::Config(cmd) = cli.command {
        return handle_config(cmd, cli.config.as_deref(), format).await;
    }

    let config = Config::load_from(cli.config.as_deref())?;

    let serving = matches!(cli.command, Commands::Serve(_));
    let mut log_config = config.logging.clone();
    if !serving {
        // One-shot commands keep stderr quiet and skip the log file.
        log_config.file_logging = false;
        if !verbose {
            log_config.level = "warn".to_string();
        }
    }
    logging::init(&log_config, config.log_dir().as_deref(), verbose);

    match cli.command {
        Commands::Serve(args) => handle_serve(args, config).await,
        command => {
            tokio::select! {
                result = run_command(command, config, format, verbose) => result,
                _ = shutdown_signal() => {
                    eprintln!("\nReceived shutdown signal, cleaning up...");
                    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                    Ok(())
                }
            }
        }
    }
}

async fn run_command(
    command: Commands,
    config: Config,
    format: ragchat::models::OutputFormat,
    verbose: bool,
) -> Result<()> {
    match command {
        Commands::Ask(args) => handle_ask(args, config, format, verbose).await,
        Commands::Collection(cmd) => handle_collection(cmd, config, format, verbose).await,
        Commands::Status => handle_status(config, format, verbose).await,
        Commands::Serve(_) | Commands::Config(_) => Ok(()),
    }
}
