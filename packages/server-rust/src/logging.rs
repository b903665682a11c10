//! Tracing subscriber setup.

use clap::ValueEnum;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable lines.
    Text,
}

/// Builds the filter: `RUST_LOG` wins when set, otherwise `default_directives`.
///
/// # Errors
///
/// Fails if `default_directives` is not a valid filter.
pub fn build_filter(default_directives: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(default_directives)?),
    }
}

/// Installs the global subscriber, writing to stderr.
///
/// # Errors
///
/// Fails if the filter is invalid or a global subscriber is already set.
pub fn init_tracing(default_directives: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = build_filter(default_directives)?;
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_directives_are_rejected() {
        // Only meaningful when RUST_LOG is not set for the test run.
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(build_filter("relay=notalevel").is_err());
            assert!(build_filter("info,relay_server=debug").is_ok());
        }
    }

    #[test]
    fn json_is_the_default_format() {
        assert_eq!(LogFormat::default(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("text", true), Ok(LogFormat::Text));
    }
}
