use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use webgate::cli::Cli;
use webgate::config;
use webgate::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let mut cfg = config::load(&cli.config)?;
    if let Some(ref listen) = cli.listen {
        cfg.network.listen_addr = listen.clone();
    }
    cfg.proxy.url_patterns.extend(cli.url_patterns.clone());

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    if !config_found {
        warn!(
            path = %cli.config.display(),
            "configuration file not found; using defaults"
        );
    }

    info!(
        config_file = %cli.config.display(),
        listen = %cfg.network.listen_addr,
        prefix = %cfg.proxy.prefix,
        dynamic_urls = cfg.proxy.dynamic_urls,
        static_patterns = cfg.proxy.url_patterns.len(),
        "webgate starting"
    );

    let server = Server::bind(&cfg).await?;
    server.serve(shutdown_signal()).await?;

    info!("webgate shut down");
    Ok(())
}

/// Resolves on SIGINT (ctrl-c) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::warn!(error = %err, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
                info!("received SIGINT (ctrl-c)");
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT (ctrl-c)");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT (ctrl-c)");
    }
}
