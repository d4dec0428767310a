//! Response caches for graded submissions
//!
//! Entries are whole [`GradeResponse`] envelopes keyed by submission id.
//! Writes are last-writer-wins.

use std::env;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use redis::{AsyncCommands, Client};

use crate::model::GradeResponse;

const ENV_REDIS_HOST: &str = "GRADER_REDIS_HOST";
const ENV_REDIS_PORT: &str = "GRADER_REDIS_PORT";
const ENV_REDIS_PASSWORD: &str = "GRADER_REDIS_PASSWORD";
const ENV_REDIS_DB: &str = "GRADER_REDIS_DB";
const ENV_CACHE_TTL: &str = "GRADER_CACHE_TTL";

const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: &str = "6379";
const DEFAULT_REDIS_DB: &str = "0";
const DEFAULT_TTL_SECONDS: u64 = 30 * 24 * 60 * 60; // 30 days

const PREFIX_GRADE: &str = "grade:";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Cache file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cache miss for key: {0}")]
    Miss(String),

    #[error("Submission id cannot be used as a cache file name: {0:?}")]
    InvalidKey(String),
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Cached response for a submission, or [`CacheError::Miss`]
    async fn get(&self, submission_id: &str) -> Result<GradeResponse, CacheError>;

    async fn put(&self, submission_id: &str, response: &GradeResponse) -> Result<(), CacheError>;
}

/// One pretty-printed JSON file per submission: `<dir>/<id>.json`
#[derive(Debug, Clone)]
pub struct FileResponseCache {
    directory: PathBuf,
}

impl FileResponseCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Ids are file names; anything that could leave the directory is refused
    fn path(&self, submission_id: &str) -> Result<PathBuf, CacheError> {
        if submission_id.is_empty()
            || submission_id == ".."
            || submission_id.contains(['/', '\\', '\0'])
        {
            return Err(CacheError::InvalidKey(submission_id.to_string()));
        }
        Ok(self.directory.join(format!("{submission_id}.json")))
    }
}

#[async_trait]
impl ResponseCache for FileResponseCache {
    async fn get(&self, submission_id: &str) -> Result<GradeResponse, CacheError> {
        let path = self.path(submission_id)?;
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::Miss(submission_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&json).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    async fn put(&self, submission_id: &str, response: &GradeResponse) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(response)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let path = self.path(submission_id)?;
        tokio::fs::create_dir_all(&self.directory).await?;
        tokio::fs::write(&path, json).await?;

        tracing::debug!(path = %path.display(), "Cached grade response");
        Ok(())
    }
}

/// Redis-backed cache
#[derive(Clone)]
pub struct RedisResponseCache {
    client: Client,
    ttl_seconds: u64,
}

impl RedisResponseCache {
    /// Create a new cache instance and verify connection
    ///
    /// Configuration via environment variables:
    /// - `GRADER_REDIS_HOST` - Redis host (default: 127.0.0.1)
    /// - `GRADER_REDIS_PORT` - Redis port (default: 6379)
    /// - `GRADER_REDIS_PASSWORD` - Redis password (default: none)
    /// - `GRADER_REDIS_DB` - Redis database number (default: 0)
    /// - `GRADER_CACHE_TTL` - Cache TTL in seconds (default: 30 days)
    pub async fn new() -> Result<Self, CacheError> {
        let host = env::var(ENV_REDIS_HOST).unwrap_or_else(|_| DEFAULT_REDIS_HOST.to_string());
        let port = env::var(ENV_REDIS_PORT).unwrap_or_else(|_| DEFAULT_REDIS_PORT.to_string());
        let password = env::var(ENV_REDIS_PASSWORD).ok();
        let db = env::var(ENV_REDIS_DB).unwrap_or_else(|_| DEFAULT_REDIS_DB.to_string());

        let ttl_seconds = env::var(ENV_CACHE_TTL)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TTL_SECONDS);

        let client = Client::open(redis_url(&host, &port, password.as_deref(), &db))?;

        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        tracing::info!(host = %host, port = %port, "Redis connection established");

        Ok(Self {
            client,
            ttl_seconds,
        })
    }
}

/// `redis://[:password@]host:port/db`
fn redis_url(host: &str, port: &str, password: Option<&str>, db: &str) -> String {
    match password {
        Some(pwd) if !pwd.is_empty() => format!("redis://:{pwd}@{host}:{port}/{db}"),
        _ => format!("redis://{host}:{port}/{db}"),
    }
}

#[async_trait]
impl ResponseCache for RedisResponseCache {
    async fn get(&self, submission_id: &str) -> Result<GradeResponse, CacheError> {
        let key = format!("{PREFIX_GRADE}{submission_id}");
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let data: Option<String> = conn.get(&key).await?;

        match data {
            Some(json) => {
                serde_json::from_str(&json).map_err(|e| CacheError::Serialization(e.to_string()))
            }
            None => Err(CacheError::Miss(submission_id.to_string())),
        }
    }

    async fn put(&self, submission_id: &str, response: &GradeResponse) -> Result<(), CacheError> {
        let key = format!("{PREFIX_GRADE}{submission_id}");
        let json =
            serde_json::to_string(response).map_err(|e| CacheError::Serialization(e.to_string()))?;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(&key, json, self.ttl_seconds).await?;

        tracing::debug!(key = %key, ttl = self.ttl_seconds, "Cached grade response");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::rubric::tests::TWO_CRITERIA_RUBRIC;
    use crate::model::{Agent, EvidenceLabel, GradeMetadata, LabelSet, Rubric};

    fn response(submission_id: &str) -> GradeResponse {
        let rubric = Rubric::parse(TWO_CRITERIA_RUBRIC).unwrap();
        GradeResponse {
            metadata: GradeMetadata {
                submission_id: submission_id.to_string(),
                agent: Agent::Static,
                model: None,
                time: 0.0,
                usage: None,
                feature_labeled: vec![],
                valid_responses: 0,
                created_at: chrono::Utc::now(),
            },
            data: LabelSet::uniform(&rubric, EvidenceLabel::No, "The program is empty."),
        }
    }

    #[tokio::test]
    async fn test_file_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileResponseCache::new(dir.path().join("nested"));

        assert!(matches!(cache.get("abc").await, Err(CacheError::Miss(ref id)) if id == "abc"));

        let stored = response("abc");
        cache.put("abc", &stored).await.unwrap();
        assert!(dir.path().join("nested/abc.json").exists());
        assert_eq!(cache.get("abc").await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_file_cache_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileResponseCache::new(dir.path());

        cache.put("abc", &response("first")).await.unwrap();
        cache.put("abc", &response("second")).await.unwrap();
        assert_eq!(cache.get("abc").await.unwrap().metadata.submission_id, "second");
    }

    #[tokio::test]
    async fn test_file_cache_corrupt_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let cache = FileResponseCache::new(dir.path());
        assert!(matches!(cache.get("bad").await, Err(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_file_cache_refuses_escaping_ids() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileResponseCache::new(dir.path().join("cache"));

        for id in ["../x", "a/b", "..\\x", "", ".."] {
            assert!(
                matches!(cache.put(id, &response(id)).await, Err(CacheError::InvalidKey(_))),
                "{id:?}"
            );
            assert!(matches!(cache.get(id).await, Err(CacheError::InvalidKey(_))));
        }
        assert!(!dir.path().join("x.json").exists());
        assert!(!dir.path().join("cache").exists());

        cache.put("..x", &response("..x")).await.unwrap();
        assert!(dir.path().join("cache/..x.json").exists());
    }

    #[test]
    fn test_redis_url() {
        assert_eq!(redis_url("h", "1", None, "0"), "redis://h:1/0");
        assert_eq!(redis_url("h", "1", Some(""), "0"), "redis://h:1/0");
        assert_eq!(redis_url("h", "1", Some("pw"), "2"), "redis://:pw@h:1/2");
    }
}
