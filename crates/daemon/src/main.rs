use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use appkeeper_core::config::{Config, ConfigStore};
use appkeeper_core::fleet::{Backends, CycleReport};
use appkeeper_core::install::HttpDownloader;
use appkeeper_core::release::GithubReleaseSource;
use appkeeper_core::scheduler::{run_once, spawn_scheduler};
use appkeeper_core::supervisor::Pm2Supervisor;
use appkeeper_daemon::api;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "appkeeperd", version, about = "Keeps declared apps installed from their releases and running under pm2")]
struct Cli {
    /// Config file. Created with defaults when missing.
    #[arg(long, default_value = ".appkeeper/config.json")]
    config: PathBuf,

    /// Where the management API listens, e.g. 127.0.0.1:3100. Overrides web.listen.
    #[arg(long)]
    listen: Option<String>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log: String,

    /// Run a single maintenance cycle and exit.
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Don't serve the management API.
    #[arg(long, default_value_t = false)]
    no_api: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    fmt().with_target(false).with_env_filter(filter).init();

    let store = Arc::new(ConfigStore::open(cli.config.clone())?);
    let config = store.snapshot().await;
    let apps_root = store.apps_root().await;
    info!(
        config = %store.path().display(),
        apps = config.apps.len(),
        apps_root = %apps_root.display(),
        "starting appkeeperd"
    );

    let backends = build_backends(&config)?;

    if cli.once {
        let report = run_once(&store, &backends).await;
        log_report(&report);
        if !report.failed.is_empty() {
            bail!("{} app(s) failed", report.failed.len());
        }
        return Ok(());
    }

    let scheduler = spawn_scheduler(store.clone(), backends);

    if cli.no_api {
        shutdown_signal().await;
    } else {
        let listen = cli.listen.unwrap_or(config.web.listen);
        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("invalid listen address {listen}"))?;
        let app = api::router(api::AppState::new(store.clone(), scheduler.trigger()));

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        info!("listening on http://{}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    scheduler.shutdown_and_join().await;
    Ok(())
}

fn build_backends(config: &Config) -> Result<Backends> {
    let releases = GithubReleaseSource::new(&config.github).context("build release client")?;
    let downloader = HttpDownloader::new(&config.github).context("build download client")?;
    Ok(Backends {
        releases: Arc::new(releases),
        downloader: Arc::new(downloader),
        supervisor: Arc::new(Pm2Supervisor::default()),
    })
}

fn log_report(report: &CycleReport) {
    for (id, outcome) in &report.succeeded {
        info!(
            app = %id,
            release = %outcome.release.id,
            installed = outcome.installed,
            process = ?outcome.process,
            "ok"
        );
    }
    for (id, error) in &report.failed {
        warn!(app = %id, "failed: {error}");
    }
    for (what, error) in &report.cleanup.failed {
        warn!(orphan = %what, "cleanup failed: {error}");
    }
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
