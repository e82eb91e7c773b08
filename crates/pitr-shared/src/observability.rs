//! Structured logging bootstrap.

use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

static LOGGING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Initialize the global `tracing` subscriber. Idempotent: a second call is a no-op.
pub fn init_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format.to_lowercase().as_str() {
        "json" => {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE);
            registry.with(json_layer).try_init()?;
        }
        _ => {
            let pretty_layer = tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE);
            registry.with(pretty_layer).try_init()?;
        }
    }

    let _ = LOGGING_INITIALIZED.set(());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        let config = LoggingSettings {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        };
        init_logging(&config).unwrap();
        init_logging(&config).unwrap();
    }
}
