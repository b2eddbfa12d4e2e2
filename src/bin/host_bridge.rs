//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! This binary reads `CommandEnvelope` messages as newline-delimited JSON
//! from stdin, dispatches them through the host command channel, and writes
//! `ResponseEnvelope` and `EventEnvelope` messages to stdout.
//!
//! All tracing/diagnostic output goes to stderr and a daily log file so that
//! stdout remains a clean JSON protocol channel.
//!
//! Set `HELPWATCH_CONFIG` to load a config file other than the default.

use helpwatch::config::HelpConfig;
use helpwatch::help_dirs;
use helpwatch::host::stdio::run_stdio_bridge;
use helpwatch::settings::FileSettingsStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "HELPWATCH_CONFIG";

/// Keeps the non-blocking file writer alive for the process lifetime.
struct LogGuard {
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

fn init_logging() -> LogGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("helpwatch=info,reqwest=warn"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let log_dir = help_dirs::logs_dir();
    let appender = std::fs::create_dir_all(&log_dir).ok().and_then(|()| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("helpwatch-host")
            .filename_suffix("log")
            .max_log_files(7)
            .build(&log_dir)
            .ok()
    });

    match appender {
        Some(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
            tracing::debug!(log_dir = %log_dir.display(), "file logging enabled");
            LogGuard { _file: Some(guard) }
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr)
                .init();
            tracing::warn!(log_dir = %log_dir.display(), "file logging unavailable");
            LogGuard { _file: None }
        }
    }
}

fn load_config() -> anyhow::Result<HelpConfig> {
    let path = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(HelpConfig::default_config_path);
    if path.exists() {
        tracing::info!(path = %path.display(), "loading config");
        Ok(HelpConfig::from_file(&path)?)
    } else {
        tracing::info!(path = %path.display(), "no config file; using defaults");
        Ok(HelpConfig::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "helpwatch-host starting");

    let config = load_config()?;
    let settings = Arc::new(FileSettingsStore::open_default()?);
    tracing::info!(path = %settings.path().display(), "settings store opened");

    run_stdio_bridge(config, settings).await.map_err(|e| {
        tracing::error!(error = %e, "helpwatch-host exited with error");
        anyhow::anyhow!("helpwatch-host failed: {e}")
    })?;

    tracing::info!("helpwatch-host shut down cleanly");
    Ok(())
}
