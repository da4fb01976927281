//! Structured logging

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Build the filter from `RUST_LOG` when set, otherwise from the configured level
fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize JSON logging for the process
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
pub fn init_tracing(config: &Config) -> Result<()> {
    let installed = tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_env_filter(env_filter(&config.service.log_level))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            service = %config.service.name,
            environment = %config.service.environment,
            "Tracing initialized"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        let config = Config::default();
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_ok());
    }

    #[test]
    fn test_bad_level_falls_back() {
        let filter = env_filter("not a [valid filter");
        assert!(!filter.to_string().is_empty());
    }
}
