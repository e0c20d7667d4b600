use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Default collection holding one record per imported document.
pub const DEFAULT_DOCUMENT_COLLECTION: &str = "documents";
/// Default collection holding the chunked document text.
pub const DEFAULT_CHUNK_COLLECTION: &str = "document_chunks";
const DEFAULT_SETTLE_DELAY_MS: u64 = 2_000;
const DEFAULT_PROBE_MAX_RETRIES: u32 = 3;
const DEFAULT_PROBE_SEARCH_TIMEOUT_SECS: u64 = 30;

/// Runtime configuration for the docsink server.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Base URL of the default Qdrant instance.
    pub qdrant_url: String,
    /// Optional API key required to access the default Qdrant instance.
    pub qdrant_api_key: Option<String>,
    /// Collection receiving one record per imported document.
    pub document_collection: String,
    /// Collection receiving the chunked document text.
    pub chunk_collection: String,
    /// Embedding provider, used for chunk-size heuristics.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Optional override for the automatic chunk size selection.
    pub text_splitter_chunk_size: Option<usize>,
    /// Optional token overlap between adjacent chunks.
    pub text_splitter_chunk_overlap: Option<usize>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Pause between an import call and its verification, in milliseconds.
    pub settle_delay_ms: u64,
    /// Number of verification attempts made against the store.
    pub probe_max_retries: u32,
    /// Upper bound on a single ranked search, in seconds.
    pub probe_search_timeout_secs: u64,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            document_collection: load_env_optional("QDRANT_DOCUMENT_COLLECTION")
                .unwrap_or_else(|| DEFAULT_DOCUMENT_COLLECTION.to_string()),
            chunk_collection: load_env_optional("QDRANT_CHUNK_COLLECTION")
                .unwrap_or_else(|| DEFAULT_CHUNK_COLLECTION.to_string()),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            text_splitter_chunk_size: parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?,
            text_splitter_chunk_overlap: parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?,
            server_port: parse_optional("SERVER_PORT")?,
            settle_delay_ms: parse_optional("SETTLE_DELAY_MS")?
                .unwrap_or(DEFAULT_SETTLE_DELAY_MS),
            probe_max_retries: parse_optional("PROBE_MAX_RETRIES")?
                .unwrap_or(DEFAULT_PROBE_MAX_RETRIES),
            probe_search_timeout_secs: parse_optional("PROBE_SEARCH_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_PROBE_SEARCH_TIMEOUT_SECS),
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        document_collection = %config.document_collection,
        chunk_collection = %config.chunk_collection,
        server_port = ?config.server_port,
        settle_delay_ms = config.settle_delay_ms,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing_is_case_insensitive() {
        assert!(matches!(
            "OpenAI".parse::<EmbeddingProvider>(),
            Ok(EmbeddingProvider::OpenAI)
        ));
        assert!(matches!(
            "ollama".parse::<EmbeddingProvider>(),
            Ok(EmbeddingProvider::Ollama)
        ));
        assert!("cohere".parse::<EmbeddingProvider>().is_err());
    }

    #[test]
    fn parse_optional_ignores_missing_and_blank_values() {
        // SAFETY: the variable names are unique to this test.
        unsafe {
            env::remove_var("DOCSINK_TEST_MISSING");
            env::set_var("DOCSINK_TEST_BLANK", "  ");
        }
        assert_eq!(parse_optional::<u64>("DOCSINK_TEST_MISSING").unwrap(), None);
        assert_eq!(parse_optional::<u64>("DOCSINK_TEST_BLANK").unwrap(), None);
    }

    #[test]
    fn parse_optional_rejects_garbage() {
        // SAFETY: the variable name is unique to this test.
        unsafe { env::set_var("DOCSINK_TEST_GARBAGE", "soon") };
        let error = parse_optional::<u64>("DOCSINK_TEST_GARBAGE").unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(key) if key == "DOCSINK_TEST_GARBAGE"));
    }
}
