use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::label::ResponseType;
use crate::model::llm::DEFAULT_MODEL;

const ENV_CONFIG_PATH: &str = "GRADER_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
const ENV_OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
const ENV_OPENAI_API_TIMEOUT: &str = "OPENAI_API_TIMEOUT";
const ENV_PROXY_API_KEY: &str = "AIPROXY_API_KEY";

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Defaults applied to grading requests that leave a setting out
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GradingDefaults {
    pub model: String,
    pub num_responses: u32,
    pub temperature: f32,
    /// Seconds before an LLM call is abandoned
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub response_type: ResponseType,
}

impl Default for GradingDefaults {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            num_responses: 1,
            temperature: 0.0,
            timeout_secs: 150,
            max_tokens: 4096,
            response_type: ResponseType::Tsv,
        }
    }
}

impl GradingDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    None,
    File,
    Redis,
}

/// Response cache selection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Directory for the file backend
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::None,
            directory: PathBuf::from("cached_responses"),
        }
    }
}

/// Batch grading settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Submissions graded at the same time
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { concurrency: 7 }
    }
}

/// YAML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub grading: GradingDefaults,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

/// OpenAI connection settings, from the environment only
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub grading: GradingDefaults,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub openai: OpenAiConfig,
    /// Shared secret callers present in the `Authorization` header
    pub proxy_api_key: Option<String>,
    pub port: u16,
    pub host: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grading: GradingDefaults::default(),
            cache: CacheConfig::default(),
            batch: BatchConfig::default(),
            openai: OpenAiConfig::default(),
            proxy_api_key: None,
            port: 8080,
            host: "127.0.0.1".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config file
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = non_empty_var("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);
        let host = non_empty_var("HOST").unwrap_or(defaults.host);

        let config_path =
            non_empty_var(ENV_CONFIG_PATH).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let file = Self::load_config_file(Path::new(&config_path)).unwrap_or_default();

        let mut grading = file.grading;
        // Env timeout overrides the file
        if let Some(timeout) = std::env::var(ENV_OPENAI_API_TIMEOUT)
            .ok()
            .and_then(|t| t.parse().ok())
        {
            grading.timeout_secs = timeout;
        }

        let openai = OpenAiConfig {
            api_key: non_empty_var(ENV_OPENAI_API_KEY),
            base_url: non_empty_var(ENV_OPENAI_BASE_URL)
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        };

        Self {
            grading,
            cache: file.cache,
            batch: file.batch,
            openai,
            proxy_api_key: non_empty_var(ENV_PROXY_API_KEY),
            port,
            host,
        }
    }

    /// Read the optional YAML file; any problem falls back to defaults
    fn load_config_file(path: &Path) -> Option<ConfigFile> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No grader config file, using defaults");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable grader config file, using defaults");
                return None;
            }
        };

        if contents.trim().is_empty() {
            return Some(ConfigFile::default());
        }
        serde_yaml::from_str(&contents)
            .inspect(|_| tracing::info!(path = %path.display(), "Loaded grader config file"))
            .inspect_err(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Invalid grader config file, using defaults")
            })
            .ok()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_config_file() {
        assert!(Config::load_config_file(Path::new("/nonexistent/grader.yaml")).is_none());
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "grading:\n  model: gpt-4o-2024-05-13\n  num_responses: 3\ncache:\n  backend: file\n  directory: /tmp/grades"
        )
        .unwrap();

        let config = Config::load_config_file(file.path()).unwrap();
        assert_eq!(config.grading.model, "gpt-4o-2024-05-13");
        assert_eq!(config.grading.num_responses, 3);
        assert_eq!(config.grading.timeout_secs, 150);
        assert_eq!(config.grading.response_type, ResponseType::Tsv);
        assert_eq!(config.cache.backend, CacheBackend::File);
        assert_eq!(config.cache.directory, PathBuf::from("/tmp/grades"));
        assert_eq!(config.batch.concurrency, 7);
    }

    #[test]
    fn test_empty_config_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = Config::load_config_file(file.path()).unwrap();
        assert_eq!(config.grading.model, DEFAULT_MODEL);
        assert_eq!(config.cache.backend, CacheBackend::None);
    }

    #[test]
    fn test_invalid_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "grading: [not, a, map]").unwrap();
        assert!(Config::load_config_file(file.path()).is_none());
    }
}
