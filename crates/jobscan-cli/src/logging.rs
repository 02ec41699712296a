use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Keeps the log file open for the life of the process and flushes it on drop.
pub struct LogGuard {
    file: Arc<File>,
    path: PathBuf,
}

impl LogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Err(err) = self.file.sync_all() {
            eprintln!("failed to flush {}: {err}", self.path.display());
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber: human-readable output on stderr plus a plain
/// text copy appended to `<log_dir>/<site>.log`. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_logging(log_dir: &Path, site: &str) -> anyhow::Result<LogGuard> {
    fs::create_dir_all(log_dir).with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let path = log_dir.join(format!("{site}.log"));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    let file = Arc::new(file);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Arc::clone(&file))
        .with_filter(env_filter());

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    tracing::debug!(path = %path.display(), "logging initialized");
    Ok(LogGuard { file, path })
}
