//! # RC Link
//!
//! Runs one end of the radio link: the handheld controller or the robot,
//! selected by `[node] role` in the configuration file.
//!
//! # Usage
//!
//! ```bash
//! rc-link                      # uses config/default.toml
//! rc-link config/robot.toml
//! RUST_LOG=rc_link=debug rc-link
//! ```
//!
//! Expected output:
//! ```text
//! INFO rc_link: RC Link v0.1.0 starting as Robot (0x02 -> 0x01)
//! INFO rc_link::link::channel: UDP radio bound to 0.0.0.0:7401 (peer 127.0.0.1:7400)
//! INFO rc_link::state: Link state initializing -> disconnected
//! INFO rc_link::display: DISCONNECTED (slow-blink) | tx 0 rx 0 lost 0 | rate 0 fps | rssi 0 snr 0.0 | middle 90
//! ```

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use rc_link::config::{Config, LoggingConfig};
use rc_link::runtime;

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix of the daily rolling log
const LOG_FILE_PREFIX: &str = "rc-link.log";

fn config_path<I: IntoIterator<Item = String>>(args: I) -> String {
    args.into_iter()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// `RUST_LOG` wins over the configured level.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global subscriber. The returned guard flushes the file
/// writer on drop and must live until exit.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let (file_layer, guard) = if logging.file_dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&logging.file_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_ansi(false).with_writer(writer);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(env_filter(&logging.level))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path(std::env::args());
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path))?;

    let _guard = init_logging(&config.logging);

    info!(
        "RC Link v{} starting as {:?} (0x{:02X} -> 0x{:02X})",
        env!("CARGO_PKG_VERSION"),
        config.node.role,
        config.node.own_id,
        config.node.peer_id
    );
    info!("Press Ctrl+C to exit");

    runtime::run(&config).await.context("Runtime failed")?;

    info!("Stopped");
    Ok(())
}
