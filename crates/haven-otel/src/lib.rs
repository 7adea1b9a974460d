//! Console tracing for haven hosts, plus an optional rolling log file.
//!
//! `RUST_LOG` drives the console filter (default `info`). With
//! `HAVEN_LOG_ROLL=1` events at `info` and above are also written to a
//! rolling file under `HAVEN_LOGS_DIR` (or the directory passed to
//! [`init_with_logs_dir`]).

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

const FILE_PREFIX: &str = "haven.log";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

impl Rotation {
    /// Unknown values fall back to daily.
    pub fn parse(raw: &str) -> Rotation {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        }
    }
}

fn roll_enabled() -> bool {
    matches!(
        std::env::var("HAVEN_LOG_ROLL").ok().as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

pub fn init() {
    init_with_logs_dir(None);
}

/// Install the global subscriber. `logs_dir` is used for the rolling file
/// when `HAVEN_LOGS_DIR` is unset. Calling this more than once is harmless.
pub fn init_with_logs_dir(logs_dir: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter),
    );

    if !roll_enabled() {
        let _ = registry.try_init();
        return;
    }

    let dir: PathBuf = std::env::var_os("HAVEN_LOGS_DIR")
        .map(PathBuf::from)
        .or_else(|| logs_dir.map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("logs"));
    if let Err(err) = std::fs::create_dir_all(&dir) {
        eprintln!("haven: cannot create log directory {}: {err}", dir.display());
        let _ = registry.try_init();
        return;
    }
    let rotation = Rotation::parse(
        &std::env::var("HAVEN_LOG_ROTATION").unwrap_or_else(|_| "daily".into()),
    );
    let writer = match rotation {
        Rotation::Hourly => tracing_appender::rolling::hourly(&dir, FILE_PREFIX),
        Rotation::Minutely => tracing_appender::rolling::minutely(&dir, FILE_PREFIX),
        Rotation::Daily => tracing_appender::rolling::daily(&dir, FILE_PREFIX),
    };
    let (nb, guard) = tracing_appender::non_blocking(writer);
    let _ = FILE_GUARD.set(guard);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(nb)
        .with_filter(LevelFilter::INFO);
    if registry.with(file_layer).try_init().is_ok() {
        tracing::debug!(dir = %dir.display(), ?rotation, "rolling log file enabled");
    }
}
