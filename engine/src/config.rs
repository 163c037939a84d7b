//! Environment-driven configuration with sensible defaults.
//!
//! Every knob can be overridden through a `COACH_*` variable; `.env` files
//! are loaded by the binary before this runs.

use std::path::PathBuf;
use std::time::Duration;

use crate::llm::SamplingOptions;

#[derive(Debug, Clone)]
pub struct CoachConfig {
    /// SQLite path for the vector index.
    pub db_path: String,
    /// JSON dataset consumed once at bootstrap.
    pub dataset_path: PathBuf,
    /// Vector collection name.
    pub collection: String,
    /// Base URL of the Ollama-compatible endpoint.
    pub ollama_url: String,
    /// Chat model identifier.
    pub model: String,
    /// Cache directory for the embedding model download.
    pub embed_cache_dir: PathBuf,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub sampling: SamplingOptions,
}

impl CoachConfig {
    pub fn from_env() -> Self {
        let defaults = SamplingOptions::default();
        Self {
            db_path: env_or("COACH_DB_PATH", "./data/coach.db"),
            dataset_path: PathBuf::from(env_or("COACH_DATASET_PATH", "./fitness_dataset.json")),
            collection: env_or("COACH_COLLECTION", "fitness_coach"),
            ollama_url: env_or("COACH_OLLAMA_URL", "http://localhost:11434"),
            model: env_or("COACH_MODEL", "mistral:7b-instruct"),
            embed_cache_dir: PathBuf::from(env_or("COACH_EMBED_CACHE_DIR", "./data/models")),
            connect_timeout: Duration::from_millis(env_parsed("COACH_CONNECT_TIMEOUT_MS", 5_000)),
            request_timeout: Duration::from_millis(env_parsed("COACH_REQUEST_TIMEOUT_MS", 120_000)),
            sampling: SamplingOptions {
                temperature: env_parsed("COACH_TEMPERATURE", defaults.temperature),
                num_predict: env_parsed("COACH_NUM_PREDICT", defaults.num_predict),
                top_p: env_parsed("COACH_TOP_P", defaults.top_p),
                repeat_penalty: env_parsed("COACH_REPEAT_PENALTY", defaults.repeat_penalty),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Scoped to unlikely-to-be-set variables; from_env reads the real
        // process environment, so only assert the stable defaults.
        let config = CoachConfig::from_env();
        assert_eq!(config.collection, "fitness_coach");
        assert_eq!(config.sampling.num_predict, 512);
        assert_eq!(config.connect_timeout, Duration::from_millis(5_000));
    }
}
