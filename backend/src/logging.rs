// Logging module, powered by tracing-subscriber
//
// Library crates log through the `log` facade; `tracing_log::LogTracer`
// routes those records into the tracing subscriber installed here.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact text format: timestamp LEVEL target - message
    Compact,
    /// Multi-line human readable format
    Pretty,
    /// JSON Lines format for structured logging
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" | "jsonl" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Build the `EnvFilter` from the base level, hardcoded noisy-crate
/// overrides, and optional per-target overrides from config.
fn build_env_filter(
    level: &str,
    target_levels: Option<&HashMap<String, String>>,
) -> anyhow::Result<EnvFilter> {
    let mut directives = vec![level.to_string()];

    // Suppress noisy third-party crates
    let noisy: &[(&str, &str)] = &[
        ("hyper", "warn"),
        ("hyper_util", "warn"),
        ("reqwest", "warn"),
        ("rustls", "warn"),
        ("rusqlite", "warn"),
        ("tungstenite", "warn"),
        ("tokio_tungstenite", "warn"),
        ("tracing", "warn"),
    ];
    for (target, lvl) in noisy {
        directives.push(format!("{}={}", target, lvl));
    }

    // Per-target overrides from config.toml
    if let Some(map) = target_levels {
        let mut targets: Vec<_> = map.iter().collect();
        targets.sort();
        for (target, lvl) in targets {
            directives.push(format!("{}={}", target, lvl));
        }
    }

    let filter_str = directives.join(",");
    EnvFilter::try_new(&filter_str)
        .map_err(|e| anyhow::anyhow!("Invalid tracing filter '{}': {}", filter_str, e))
}

/// Initialize logging based on configuration.
///
/// Sets up `tracing-subscriber` with:
///  - Colored console layer (when `log_to_console` is true)
///  - File layer (compact text or JSON lines)
///  - `tracing_log::LogTracer` bridge so that all `log::*` calls are captured
pub fn init_logging(
    level: &str,
    file_path: &str,
    log_to_console: bool,
    target_levels: Option<&HashMap<String, String>>,
    format: &str,
) -> anyhow::Result<()> {
    let log_format = LogFormat::parse(format);

    if let Some(parent) = Path::new(file_path).parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new().create(true).append(true).open(file_path)?;

    // Bridge `log` crate → tracing
    tracing_log::LogTracer::init().ok(); // ok() in case already initialized

    let console_layer = if log_to_console {
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_thread_names(true);
        let layer = if log_format == LogFormat::Pretty {
            layer.pretty().with_filter(build_env_filter(level, target_levels)?).boxed()
        } else {
            layer.with_filter(build_env_filter(level, target_levels)?).boxed()
        };
        Some(layer)
    } else {
        None
    };

    let file_layer = if log_format == LogFormat::Json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(log_file)
            .with_target(true)
            .with_thread_names(true)
            .with_filter(build_env_filter(level, target_levels)?)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(log_file)
            .with_target(true)
            .with_thread_names(true)
            .with_filter(build_env_filter(level, target_levels)?)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;

    tracing::trace!(
        "Logging initialized: level={}, console={}, file={}",
        level,
        log_to_console,
        file_path
    );

    Ok(())
}
