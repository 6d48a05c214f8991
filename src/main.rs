use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use thumbproxy::cache::DiskCache;
use thumbproxy::config::{self, Source};
use thumbproxy::logging;
use thumbproxy::origin::HttpOrigin;
use thumbproxy::previewer::Previewer;
use thumbproxy::server;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "thumbproxy")]
#[command(version)]
#[command(about = "On-demand image thumbnailing proxy with a disk-backed LRU cache")]
#[command(long_about = "\
On-demand image thumbnailing proxy with a disk-backed LRU cache

Requests name a size and an image on another server:

  GET /fill/<width>/<height>/<host[:port]>/<path>

The image is fetched over http, scaled to cover the target while keeping
its aspect ratio, center-cropped to exactly <width>x<height> and returned
in its original format. Renditions are kept on disk; cache hits carry an
`X-From-Appcache: true` header.

Run 'thumbproxy --print-config' to print a documented config file.")]
struct Cli {
    /// Config file. Missing means stock defaults.
    #[arg(long, default_value = "/etc/thumbproxy.toml")]
    config: PathBuf,

    /// Delete every cached rendition before serving
    #[arg(long)]
    clear: bool,

    /// Print a stock config file with all options documented, then exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let (config, source) = config::load_config(&cli.config)?;
    logging::init(&config.log)?;
    match &source {
        Source::File(path) => info!(path = %path.display(), "config loaded"),
        Source::Defaults(path) => {
            warn!(path = %path.display(), "config file not found, using defaults")
        }
    }

    let cache = Arc::new(DiskCache::open(&config.cache_options())?);
    if cli.clear {
        cache.clear()?;
    }

    let previewer = Arc::new(Previewer::new(
        Arc::clone(&cache),
        HttpOrigin::new()?,
        config.previewer_settings(),
    ));

    let listener = TcpListener::bind((config.server.address.as_str(), config.server.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        capacity = cache.capacity(),
        cached = cache.len(),
        "listening"
    );

    server::serve(listener, previewer, shutdown_signal()).await?;
    info!(stats = %cache.stats(), "stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "can't listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "can't listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
