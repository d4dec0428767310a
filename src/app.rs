//! Application state and service initialization
//!
//! This module centralizes service initialization and dependency injection.

use std::sync::Arc;

use crate::model::{CacheBackend, Config};
use crate::service::{
    FileResponseCache, Grader, RedisResponseCache, ResponseCache, RoutedTransport,
};

/// Application state containing the grader and configuration
pub struct AppState {
    pub config: Config,
    pub grader: Arc<Grader>,
}

impl AppState {
    /// Build the transport, the optional response cache, and the grader
    pub async fn new(config: Config) -> Result<Self, AppError> {
        if config.proxy_api_key.is_none() {
            tracing::warn!("AIPROXY_API_KEY not set, /assessment accepts unauthenticated requests");
        }
        if config.openai.api_key.is_none() {
            tracing::info!("OPENAI_API_KEY not set, OpenAI models need a per-request api-key");
        }

        let transport = Arc::new(RoutedTransport::new(&config.openai));
        let mut grader = Grader::new(transport, &config);
        if let Some(cache) = Self::build_cache(&config).await? {
            grader = grader.with_cache(cache);
        }

        Ok(Self {
            grader: Arc::new(grader),
            config,
        })
    }

    async fn build_cache(config: &Config) -> Result<Option<Arc<dyn ResponseCache>>, AppError> {
        match config.cache.backend {
            CacheBackend::None => Ok(None),
            CacheBackend::File => {
                let cache = FileResponseCache::new(&config.cache.directory);
                tracing::info!(directory = %cache.directory().display(), "File response cache enabled");
                Ok(Some(Arc::new(cache)))
            }
            // Redis was asked for explicitly, so failing to reach it is fatal
            CacheBackend::Redis => match RedisResponseCache::new().await {
                Ok(cache) => {
                    tracing::info!("Redis response cache enabled");
                    Ok(Some(Arc::new(cache)))
                }
                Err(e) => Err(AppError::CacheInit(e.to_string())),
            },
        }
    }
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    /// Cache initialization failed
    #[error("Cache initialization failed: {0}")]
    CacheInit(String),
}
