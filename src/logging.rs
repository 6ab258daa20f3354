use crate::config::LogConfig;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Send tracing output to the log file; the terminal belongs to the map.
/// `RUST_LOG` overrides the configured filter.
pub fn init(config: &LogConfig) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)
        .with_context(|| format!("opening log file {}", config.file.display()))?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_for(&config.filter)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(())
}

fn filter_for(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).with_context(|| format!("bad log filter {directives:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        assert!(filter_for("turf_map=debug,reqwest=warn").is_ok());
        assert!(filter_for("turf_map=loud").is_err());
    }
}
