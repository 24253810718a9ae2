//! `Config`: a `serde`-deserialisable struct loadable from an optional TOML file, with
//! every field overridable by a `RAG_<FIELD_UPPER>` environment variable.

use std::path::Path;

use serde::{Deserialize, Serialize};
use splitter::SplitterKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field} from the environment: {value}")]
    InvalidEnvValue { field: &'static str, value: String },
    #[error("{0}")]
    Validation(String),
}

impl From<ConfigError> for rag_model::CoreError {
    fn from(err: ConfigError) -> Self {
        rag_model::CoreError::Configuration(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ingestion_parallelism: usize,
    pub embed_batch_size: usize,
    pub retry_base_ms: i64,
    pub retry_max_attempts: u32,
    pub retry_cap_ms: i64,
    pub gc_interval_hours: u64,
    pub default_collection_name: String,
    /// Required once known, but not knowable until the embedding provider's first
    /// successful call — so it starts unset here and is recorded by the orchestrator at
    /// runtime, not read from config.
    pub vector_dimension: Option<usize>,
    pub splitter_default: SplitterKind,
    pub sqlite_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingestion_parallelism: 4,
            embed_batch_size: 64,
            retry_base_ms: 30_000,
            retry_max_attempts: 5,
            retry_cap_ms: 1_800_000,
            gc_interval_hours: 1,
            default_collection_name: "default".to_string(),
            vector_dimension: None,
            splitter_default: SplitterKind::MarkdownHeadings,
            sqlite_path: "rag.sqlite3".to_string(),
        }
    }
}

impl Config {
    /// Loads `Default::default()`, overlays an optional TOML file, then overlays
    /// `RAG_<FIELD_UPPER>` environment variables, and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Io { path: p.display().to_string(), source })?;
                toml::from_str(&text)?
            }
            None => Config::default(),
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        macro_rules! override_parsed {
            ($field:ident, $env:literal) => {
                if let Ok(raw) = std::env::var($env) {
                    self.$field = raw
                        .parse()
                        .map_err(|_| ConfigError::InvalidEnvValue { field: stringify!($field), value: raw })?;
                }
            };
        }
        override_parsed!(ingestion_parallelism, "RAG_INGESTION_PARALLELISM");
        override_parsed!(embed_batch_size, "RAG_EMBED_BATCH_SIZE");
        override_parsed!(retry_base_ms, "RAG_RETRY_BASE_MS");
        override_parsed!(retry_max_attempts, "RAG_RETRY_MAX_ATTEMPTS");
        override_parsed!(retry_cap_ms, "RAG_RETRY_CAP_MS");
        override_parsed!(gc_interval_hours, "RAG_GC_INTERVAL_HOURS");
        override_parsed!(sqlite_path, "RAG_SQLITE_PATH");
        if let Ok(raw) = std::env::var("RAG_DEFAULT_COLLECTION_NAME") {
            self.default_collection_name = raw;
        }
        if let Ok(raw) = std::env::var("RAG_VECTOR_DIMENSION") {
            let parsed: usize = raw
                .parse()
                .map_err(|_| ConfigError::InvalidEnvValue { field: "vector_dimension", value: raw })?;
            self.vector_dimension = Some(parsed);
        }
        if let Ok(raw) = std::env::var("RAG_SPLITTER_DEFAULT") {
            self.splitter_default = match raw.as_str() {
                "markdown_headings" => SplitterKind::MarkdownHeadings,
                "fixed_size" => SplitterKind::FixedSize,
                "sentence" => SplitterKind::Sentence,
                other => return Err(ConfigError::InvalidEnvValue { field: "splitter_default", value: other.to_string() }),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingestion_parallelism < 1 {
            return Err(ConfigError::Validation("ingestion_parallelism must be >= 1".into()));
        }
        if self.embed_batch_size < 1 {
            return Err(ConfigError::Validation("embed_batch_size must be >= 1".into()));
        }
        if self.retry_max_attempts < 1 {
            return Err(ConfigError::Validation("retry_max_attempts must be >= 1".into()));
        }
        if self.retry_base_ms < 1 {
            return Err(ConfigError::Validation("retry_base_ms must be >= 1".into()));
        }
        if self.retry_cap_ms < self.retry_base_ms {
            return Err(ConfigError::Validation("retry_cap_ms must be >= retry_base_ms".into()));
        }
        if self.gc_interval_hours < 1 {
            return Err(ConfigError::Validation("gc_interval_hours must be >= 1".into()));
        }
        if let Some(dim) = self.vector_dimension {
            if dim == 0 {
                return Err(ConfigError::Validation("vector_dimension must be > 0 once set".into()));
            }
        }
        Ok(())
    }
}
