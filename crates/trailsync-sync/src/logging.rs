use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

/// Filter directive in effect: `RUST_LOG`, then `LOGLEVEL`, then the configured level.
pub fn resolve_directive(
    rust_log: Option<String>,
    loglevel: Option<String>,
    configured: &str,
) -> String {
    rust_log
        .filter(|v| !v.trim().is_empty())
        .or_else(|| {
            loglevel
                .filter(|v| !v.trim().is_empty())
                .map(|v| level_name(&v))
        })
        .unwrap_or_else(|| level_name(configured))
}

/// Accepts the level names of the `logging` convention as well as tracing's own.
fn level_name(value: &str) -> String {
    match value.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        "notset" => "trace".to_string(),
        other => other.to_string(),
    }
}

pub fn init(configured_level: &str, file: Option<&Path>) -> anyhow::Result<()> {
    let directive = resolve_directive(
        std::env::var("RUST_LOG").ok(),
        std::env::var("LOGLEVEL").ok(),
        configured_level,
    );
    let filter = EnvFilter::try_new(&directive)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("build log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    }
    .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
