use anyhow::Result;

use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat, VectorDriver};
use crate::services::{MetricsStore, create_backend, create_embedder};

pub async fn handle_status(config: Config, format: OutputFormat, verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    let embedding_connected = match create_embedder(&config.embedding) {
        Ok(embedder) => embedder.health_check().await.is_ok(),
        Err(e) => {
            if verbose {
                eprintln!("Embedding backend error: {e}");
            }
            false
        }
    };

    let (vector_store_connected, collections) = match create_backend(&config.vector_store).await {
        Ok(store) => match store.list_collections().await {
            Ok(collections) => (true, collections),
            Err(e) => {
                if verbose {
                    eprintln!("Vector store error: {e}");
                }
                (false, Vec::new())
            }
        },
        Err(e) => {
            if verbose {
                eprintln!("Vector store error: {e}");
            }
            (false, Vec::new())
        }
    };

    let metrics = if config.metrics.enabled {
        Config::metrics_db_path()
            .filter(|path| path.exists())
            .and_then(|path| MetricsStore::open(&path).ok())
            .map(|store| store.get_summary(config.metrics.retention_days))
    } else {
        None
    };

    let status = StatusInfo {
        embedding_backend: config.embedding.backend.to_string(),
        embedding_model: config.embedding.model_id.clone(),
        embedding_connected,
        vector_store_driver: config.vector_store.driver.to_string(),
        vector_store_url: config.vector_store.url.clone(),
        vector_store_connected,
        collections,
        metrics,
    };

    print!("{}", formatter.format_status(&status));

    if !embedding_connected || !vector_store_connected {
        eprintln!();
        if !embedding_connected {
            eprintln!(
                "Warning: embedding backend not reachable at {}",
                config.embedding.url
            );
        }
        if !vector_store_connected {
            match config.vector_store.driver {
                VectorDriver::Qdrant => {
                    eprintln!(
                        "Warning: Qdrant not running. Start with: docker-compose up -d qdrant"
                    );
                }
                VectorDriver::PostgreSQL => {
                    eprintln!("Warning: PostgreSQL not accessible. Check connection settings.");
                }
                VectorDriver::Memory => {}
            }
        }
    }

    Ok(())
}
