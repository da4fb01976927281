//! Application state management

use std::sync::Arc;

use crate::{
    backend::{
        ConfigurationSource, HttpConfigurationSource, HttpLogStore, LogStore, MemoryLogStore,
        StaticConfigurationSource,
    },
    config::{Config, LogStoreBackend},
    destination::DestinationResolver,
    dispatcher::OperationDispatcher,
    error::{Error, Result},
    query::{QuerySettings, RangeQueryExecutor},
    writer::EventWriter,
};

/// Application state shared across handlers
///
/// Cloning is cheap; every component sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    resolver: Arc<DestinationResolver>,
    dispatcher: Arc<OperationDispatcher>,
}

impl AppState {
    /// Build the collaborators named by the configuration and wire them up
    pub fn from_config(config: Config) -> Result<Self> {
        let source = configuration_source(&config);
        let store = log_store(&config)?;
        Ok(Self::with_backends(config, source, store))
    }

    /// Wire the components around explicit collaborators
    pub fn with_backends(
        config: Config,
        source: Arc<dyn ConfigurationSource>,
        store: Arc<dyn LogStore>,
    ) -> Self {
        let resolver = Arc::new(DestinationResolver::new(source, &config.appconfig));
        let writer = EventWriter::new(resolver.clone(), store.clone());
        let executor =
            RangeQueryExecutor::new(resolver.clone(), store, QuerySettings::from_config(&config));
        let dispatcher = Arc::new(OperationDispatcher::new(
            writer,
            executor,
            config.query.default_window(),
        ));

        Self {
            config: Arc::new(config),
            resolver,
            dispatcher,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Destination resolver, shared with the writer and executor
    pub fn resolver(&self) -> &Arc<DestinationResolver> {
        &self.resolver
    }

    /// Operation dispatcher
    pub fn dispatcher(&self) -> &OperationDispatcher {
        &self.dispatcher
    }
}

fn configuration_source(config: &Config) -> Arc<dyn ConfigurationSource> {
    let settings = &config.appconfig;
    match settings.endpoint.as_deref() {
        Some(endpoint) => {
            tracing::info!(endpoint, "Using remote configuration service");
            Arc::new(HttpConfigurationSource::new(
                endpoint,
                settings.client_id.clone(),
                settings.request_timeout(),
            ))
        }
        None => {
            tracing::info!(
                destination = %settings.static_destination,
                "No configuration endpoint set, serving static destination"
            );
            Arc::new(StaticConfigurationSource::with_destination(
                &settings.destination_key,
                &settings.static_destination,
            ))
        }
    }
}

fn log_store(config: &Config) -> Result<Arc<dyn LogStore>> {
    let settings = &config.log_store;
    match settings.backend {
        LogStoreBackend::Memory => {
            tracing::info!(
                pending_polls = settings.memory_pending_polls,
                "Using in-memory log store"
            );
            Ok(Arc::new(MemoryLogStore::new(settings.memory_pending_polls)))
        }
        LogStoreBackend::Http => {
            let endpoint = settings.endpoint.as_deref().ok_or_else(|| {
                Error::Internal("log_store.endpoint is required for the http backend".to_string())
            })?;
            tracing::info!(endpoint, "Using remote log store");
            Ok(Arc::new(HttpLogStore::new(
                endpoint,
                settings.request_timeout(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds_local_state() {
        let state = AppState::from_config(Config::default()).unwrap();
        assert_eq!(state.config().service.name, "service-history");
    }

    #[test]
    fn test_http_backend_requires_endpoint() {
        let mut config = Config::default();
        config.log_store.backend = LogStoreBackend::Http;
        config.log_store.endpoint = None;
        assert!(matches!(
            AppState::from_config(config),
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_static_source_serves_configured_destination() {
        let state = AppState::from_config(Config::default()).unwrap();
        assert_eq!(
            state.resolver().resolve_destination().await.unwrap(),
            "service-history"
        );
    }
}
