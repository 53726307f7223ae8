use anyhow::{Context, Result};
use clap::Args;

use crate::models::Config;
use crate::server::{build_state, serve};

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Interface to bind (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides server.port)
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
}

pub async fn handle_serve(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let address = config.server.bind_address();
    let state = build_state(config)
        .await
        .context("failed to initialise backends")?;

    eprintln!("ragchat API listening on http://{address}");
    serve(state, &address).await?;
    Ok(())
}
