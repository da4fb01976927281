//! Destination resolution with a freshness-bounded cache
//!
//! The log destination is not part of the local configuration. It is read
//! from the remote configuration service on demand and cached for
//! `cache_ttl`. A fresh cache answers without any network access; a stale or
//! empty cache triggers one session + fetch round trip.
//!
//! Refreshes are not serialized. Two callers that both see a stale entry
//! both fetch, and whichever writes last wins. Both values are equally
//! current, so the race is harmless.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::backend::ConfigurationSource;
use crate::config::AppConfigSettings;
use crate::error::{Error, Result};

/// A resolved destination and when it stops being fresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDestination {
    /// Destination name
    pub value: String,
    /// Instant after which the value must be refreshed
    pub expires_at: Instant,
}

impl CachedDestination {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Resolves and caches the destination name
pub struct DestinationResolver {
    source: Arc<dyn ConfigurationSource>,
    application_id: String,
    environment_id: String,
    profile_id: String,
    destination_key: String,
    ttl: Duration,
    cache: RwLock<Option<CachedDestination>>,
}

impl DestinationResolver {
    /// Create a resolver with an empty cache
    pub fn new(source: Arc<dyn ConfigurationSource>, settings: &AppConfigSettings) -> Self {
        Self {
            source,
            application_id: settings.application_id.clone(),
            environment_id: settings.environment_id.clone(),
            profile_id: settings.profile_id.clone(),
            destination_key: settings.destination_key.clone(),
            ttl: settings.cache_ttl(),
            cache: RwLock::new(None),
        }
    }

    /// Return the destination name, refreshing it if the cache is stale
    ///
    /// Fails with [`Error::ConfigUnavailable`] when the session cannot be
    /// opened, the document cannot be fetched, or the key is missing. A
    /// failure leaves the cache as it was.
    pub async fn resolve_destination(&self) -> Result<String> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.is_fresh(Instant::now()) {
                tracing::debug!(destination = %cached.value, "Destination cache hit");
                return Ok(cached.value.clone());
            }
        }

        let value = self.fetch().await?;

        *self.cache.write().await = Some(CachedDestination {
            value: value.clone(),
            expires_at: Instant::now() + self.ttl,
        });

        tracing::info!(
            destination = %value,
            ttl_secs = self.ttl.as_secs(),
            "Destination refreshed"
        );
        Ok(value)
    }

    /// Current cache entry, fresh or not, without refreshing
    pub async fn cached(&self) -> Option<CachedDestination> {
        self.cache.read().await.clone()
    }

    /// Drop the cached value so the next call refreshes
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn fetch(&self) -> Result<String> {
        let token = self
            .source
            .open_session(&self.application_id, &self.environment_id, &self.profile_id)
            .await
            .map_err(|e| {
                tracing::error!(
                    application = %self.application_id,
                    environment = %self.environment_id,
                    profile = %self.profile_id,
                    error = %e,
                    "Failed to open configuration session"
                );
                Error::ConfigUnavailable(format!("failed to open configuration session: {e}"))
            })?;

        let document = self.source.get_configuration(&token).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to retrieve configuration");
            Error::ConfigUnavailable(format!("failed to retrieve configuration: {e}"))
        })?;

        extract_destination(&document, &self.destination_key)
    }
}

/// Pull the destination out of a configuration document
fn extract_destination(document: &serde_json::Value, key: &str) -> Result<String> {
    let object = document.as_object().ok_or_else(|| {
        Error::ConfigUnavailable("configuration document is not a JSON object".to_string())
    })?;

    match object.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => {
            tracing::error!(key, "Configuration missing destination key");
            Err(Error::ConfigUnavailable(format!(
                "Configuration missing '{key}' key"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, SessionToken, StaticConfigurationSource};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn settings(ttl_secs: u64) -> AppConfigSettings {
        AppConfigSettings {
            cache_ttl_secs: ttl_secs,
            ..AppConfigSettings::default()
        }
    }

    /// Source whose responses can be switched between good, bad and failing
    struct ScriptedSource {
        fail_session: AtomicBool,
        fail_fetch: AtomicBool,
        generation: AtomicUsize,
        sessions: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self {
                fail_session: AtomicBool::new(false),
                fail_fetch: AtomicBool::new(false),
                generation: AtomicUsize::new(1),
                sessions: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ConfigurationSource for ScriptedSource {
        async fn open_session(
            &self,
            _application: &str,
            _environment: &str,
            _profile: &str,
        ) -> std::result::Result<SessionToken, BackendError> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            if self.fail_session.load(Ordering::SeqCst) {
                return Err(BackendError::Transport("connection refused".into()));
            }
            Ok(SessionToken::new("token"))
        }

        async fn get_configuration(
            &self,
            _token: &SessionToken,
        ) -> std::result::Result<serde_json::Value, BackendError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(BackendError::Rejected {
                    status: 500,
                    body: "boom".into(),
                });
            }
            let generation = self.generation.load(Ordering::SeqCst);
            Ok(json!({"logGroup": format!("group-{generation}")}))
        }
    }

    #[tokio::test]
    async fn test_single_fetch_within_ttl() {
        let source = Arc::new(StaticConfigurationSource::with_destination(
            "logGroup",
            "test-log-group",
        ));
        let resolver = DestinationResolver::new(source.clone(), &settings(300));

        for _ in 0..5 {
            assert_eq!(resolver.resolve_destination().await.unwrap(), "test-log-group");
        }
        assert_eq!(source.sessions_opened(), 1);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_after_expiry() {
        let source = Arc::new(ScriptedSource::new());
        let resolver = DestinationResolver::new(source.clone(), &settings(60));

        assert_eq!(resolver.resolve_destination().await.unwrap(), "group-1");

        source.generation.store(2, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(resolver.resolve_destination().await.unwrap(), "group-1");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(resolver.resolve_destination().await.unwrap(), "group-2");
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_key_is_config_unavailable() {
        let source = Arc::new(StaticConfigurationSource::new(json!({})));
        let resolver = DestinationResolver::new(source, &settings(300));

        let err = resolver.resolve_destination().await.unwrap_err();
        assert!(matches!(err, Error::ConfigUnavailable(_)));
        assert!(resolver.cached().await.is_none());
    }

    #[tokio::test]
    async fn test_non_string_and_empty_values_rejected() {
        assert!(extract_destination(&json!({"logGroup": 42}), "logGroup").is_err());
        assert!(extract_destination(&json!({"logGroup": "  "}), "logGroup").is_err());
        assert!(extract_destination(&json!(["logGroup"]), "logGroup").is_err());
        assert_eq!(
            extract_destination(&json!({"logGroup": "g", "other": 1}), "logGroup").unwrap(),
            "g"
        );
    }

    #[tokio::test]
    async fn test_session_and_fetch_failures_map_to_config_unavailable() {
        let source = Arc::new(ScriptedSource::new());
        let resolver = DestinationResolver::new(source.clone(), &settings(300));

        source.fail_session.store(true, Ordering::SeqCst);
        assert!(matches!(
            resolver.resolve_destination().await,
            Err(Error::ConfigUnavailable(_))
        ));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);

        source.fail_session.store(false, Ordering::SeqCst);
        source.fail_fetch.store(true, Ordering::SeqCst);
        assert!(matches!(
            resolver.resolve_destination().await,
            Err(Error::ConfigUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_does_not_poison_cache() {
        let source = Arc::new(ScriptedSource::new());
        let resolver = DestinationResolver::new(source.clone(), &settings(10));

        assert_eq!(resolver.resolve_destination().await.unwrap(), "group-1");
        tokio::time::advance(Duration::from_secs(11)).await;

        source.fail_fetch.store(true, Ordering::SeqCst);
        assert!(resolver.resolve_destination().await.is_err());
        let stale = resolver.cached().await.unwrap();
        assert_eq!(stale.value, "group-1");

        // Next call retries from scratch
        source.fail_fetch.store(false, Ordering::SeqCst);
        source.generation.store(3, Ordering::SeqCst);
        assert_eq!(resolver.resolve_destination().await.unwrap(), "group-3");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let source = Arc::new(StaticConfigurationSource::with_destination("logGroup", "g"));
        let resolver = DestinationResolver::new(source.clone(), &settings(300));

        resolver.resolve_destination().await.unwrap();
        resolver.invalidate().await;
        resolver.resolve_destination().await.unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_benign() {
        let source = Arc::new(ScriptedSource::new());
        let resolver = Arc::new(DestinationResolver::new(source.clone(), &settings(300)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve_destination().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "group-1");
        }
        assert_eq!(resolver.cached().await.unwrap().value, "group-1");
    }
}
