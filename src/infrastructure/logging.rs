//! Logging system configuration and initialization
//!
//! Console output and an optional log file, plain text or JSON. Timestamps
//! are local time. An existing log file is renamed with its timestamp before
//! a new run starts writing.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use tracing::info;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps the non-blocking file writer alive for the life of the process
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());
}

struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Rename `log_dir/file_name` to `<stem>.<timestamp>.log` if it exists.
/// Returns the new name.
pub fn rotate_existing_log_file(log_dir: &Path, file_name: &str) -> Result<Option<String>> {
    let log_file_path = log_dir.join(file_name);
    if !log_file_path.exists() {
        return Ok(None);
    }

    let metadata = std::fs::metadata(&log_file_path)
        .map_err(|e| anyhow!("Failed to get log file metadata: {}", e))?;
    let file_time = metadata
        .modified()
        .or_else(|_| metadata.created())
        .unwrap_or_else(|_| std::time::SystemTime::now());
    let stamp: DateTime<Local> = file_time.into();

    let file_stem = file_name.trim_end_matches(".log");
    let rotated_name = format!("{}.{}.log", file_stem, stamp.format("%Y%m%dT%H%M%S"));
    let rotated_path = log_dir.join(&rotated_name);

    std::fs::rename(&log_file_path, &rotated_path).map_err(|e| {
        anyhow!(
            "Failed to rotate log file {} to {}: {}",
            log_file_path.display(),
            rotated_path.display(),
            e
        )
    })?;

    Ok(Some(rotated_name))
}

/// `RUST_LOG` wins. Otherwise the configured level, with HTTP internals held
/// back unless trace is requested.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| anyhow!("Invalid log level '{}': {}", config.level, e))?;

    if !config.level.to_lowercase().contains("trace") {
        for directive in [
            "reqwest=info",
            "hyper=warn",
            "hyper_util=warn",
            "h2=warn",
            "rustls=warn",
            "html5ever=warn",
            "selectors=warn",
        ] {
            filter = filter.add_directive(directive.parse()?);
        }
        filter = filter.add_directive(format!("promo_harvester={}", config.level).parse()?);
    }

    Ok(filter)
}

fn file_layer(config: &LoggingConfig) -> Result<(BoxedLayer, Option<String>)> {
    std::fs::create_dir_all(&config.log_dir).map_err(|e| {
        anyhow!(
            "Failed to create log directory {}: {}",
            config.log_dir.display(),
            e
        )
    })?;
    let rotated = rotate_existing_log_file(&config.log_dir, &config.file_name)?;

    let appender = rolling::never(&config.log_dir, &config.file_name);
    let (writer, guard) = non_blocking(appender);
    if let Ok(mut guards) = LOG_GUARDS.lock() {
        guards.push(guard);
    }

    let layer: BoxedLayer = if config.json_format {
        fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_timer(LocalTimeFormatter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .boxed()
    } else {
        fmt::Layer::new()
            .with_writer(writer)
            .with_timer(LocalTimeFormatter)
            .with_target(false)
            .with_ansi(false)
            .boxed()
    };

    Ok((layer, rotated))
}

fn console_layer() -> BoxedLayer {
    fmt::Layer::new()
        .with_writer(std::io::stdout)
        .with_timer(LocalTimeFormatter)
        .with_target(false)
        .boxed()
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config)?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut rotated = None;
    if config.file_output {
        let (layer, rotated_name) = file_layer(config)?;
        layers.push(layer);
        rotated = rotated_name;
    }
    if config.console_output || layers.is_empty() {
        layers.push(console_layer());
    }

    Registry::default()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized (level: {}, file: {}, json: {})",
        config.level,
        if config.file_output {
            config.log_dir.join(&config.file_name).display().to_string()
        } else {
            "off".to_string()
        },
        config.json_format
    );
    if let Some(name) = rotated {
        info!("Rotated existing log file to: {}", name);
    }
    Ok(())
}
