use anyhow::{Context, Result};
use chunkpush::cli::{Cli, Command};
use chunkpush::client::run_clients;
use chunkpush::server::Server;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(f) => EnvFilter::new(f),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    match cli.command {
        Command::Serve(args) => {
            let config = args.into_config()?;
            let listen = config.listen.clone();
            let server = Server::bind(config)
                .await
                .with_context(|| format!("Failed to listen on {}", listen))?;
            server.run(shutdown).await?;
        }
        Command::Connect(args) => {
            run_clients(args.into_config(), shutdown).await?;
        }
    }

    Ok(())
}
