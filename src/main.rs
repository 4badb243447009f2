use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedmirror::{
    AppState, FirebaseSource, MirrorConfig, QueryService, RecordWriter, Replicator, router,
    storage::{AppendLog, CursorStore},
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "feedmirror")]
#[command(about = "Mirror a Firebase collection into a local JSON Lines log and serve it over HTTP")]
struct Cli {
    /// Tracing filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,

    #[command(subcommand)]
    command: Option<Command>,
}

const DEFAULT_LOG_FILTER: &str = "feedmirror=info,tower_http=info";

#[derive(Subcommand)]
enum Command {
    /// Replicate continuously and serve the HTTP API (default).
    Serve,
    /// Run one backfill pass and exit.
    Sync,
    /// Print the log summary as JSON and exit.
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter);

    let config = MirrorConfig::from_env().context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Sync => sync(config).await,
        Command::Summary => summary(config).await,
    }
}

async fn open_replicator(config: &MirrorConfig) -> Result<Replicator> {
    let writer = RecordWriter::open(
        AppendLog::new(config.cache_path()),
        CursorStore::new(config.cursor_path()),
        config.writer_options(),
    )
    .await
    .with_context(|| format!("failed to open record log {}", config.cache_path().display()))?;

    let source = FirebaseSource::new(config.firebase_options())
        .context("failed to configure firebase source")?;

    Ok(Replicator::new(
        Arc::new(source),
        Arc::new(writer),
        config.replicator_options(),
    ))
}

async fn serve(config: MirrorConfig) -> Result<()> {
    let replicator = open_replicator(&config).await?;
    let query = QueryService::with_options(AppendLog::new(config.cache_path()), config.query_options());

    info!(
        log = %config.cache_path().display(),
        cursor = ?replicator.writer().cursor().await,
        "starting replication"
    );
    let replication = tokio::spawn(async move { replicator.run().await });

    let app = router(AppState::new(Arc::new(query)), config.static_dir.clone());

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(address = %addr, "feedmirror started");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    replication.abort();
    served
}

async fn sync(config: MirrorConfig) -> Result<()> {
    let replicator = open_replicator(&config).await?;
    let report = replicator.sync_once().await.context("backfill failed")?;
    info!(
        pages = report.pages,
        fetched = report.fetched,
        appended = report.appended,
        duplicates = report.duplicates,
        invalid = report.invalid,
        cursor = ?report.cursor,
        stop = ?report.stop,
        "sync complete"
    );
    Ok(())
}

async fn summary(config: MirrorConfig) -> Result<()> {
    let query = QueryService::with_options(AppendLog::new(config.cache_path()), config.query_options());
    let summary = query.summary().await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing(fallback_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Resolves on Ctrl+C or, on unix, SIGTERM, naming the signal that fired.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "ctrl-c",
            Err(err) => {
                error!(error = %err, "unable to install Ctrl+C signal handler");
                std::future::pending::<&'static str>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "sigterm"
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<&'static str>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    let signal = tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    };
    info!(signal, "shutting down, stopping replication");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["feedmirror"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn log_filter_is_accepted_after_a_subcommand() {
        let cli = Cli::try_parse_from(["feedmirror", "sync", "--log-filter", "feedmirror=debug"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Sync)));
        assert_eq!(cli.log_filter, "feedmirror=debug");
    }

    #[test]
    fn unknown_subcommands_are_rejected() {
        assert!(Cli::try_parse_from(["feedmirror", "replicate"]).is_err());
    }
}
