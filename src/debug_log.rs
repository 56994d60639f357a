//! Session logging: stderr plus an optional append-only session log file.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::LoggingConfig;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Path of the session log file, under the local data dir.
pub fn session_log_path() -> PathBuf {
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("Nexus");
    path.push("logs");
    path.push("session.log");
    path
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Calling this more than
/// once keeps the first subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.json {
        layers.push(
            fmt::layer()
                .json()
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }

    if config.log_to_file {
        let path = session_log_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        layers.push(
            fmt::layer()
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
    }

    if tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .is_err()
    {
        tracing::debug!(target: "nexus::log", "tracing subscriber already installed");
        return Ok(());
    }

    tracing::info!(
        target: "nexus::log",
        version = env!("CARGO_PKG_VERSION"),
        log_to_file = config.log_to_file,
        "nexus-live logging initialized"
    );
    Ok(())
}
