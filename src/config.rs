use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL of the LLM provider API
    pub provider_endpoint: String,
    /// Provider API key; required at start-up
    pub provider_key: Option<String>,
    /// Model name for chat / tool calling
    pub chat_model: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// Root directory of the persisted store; required at start-up
    pub store_connection: Option<PathBuf>,
    /// Subdirectory under the store root holding this deployment's data
    pub database_name: String,
    /// Origin allowed to call the API from a browser
    pub frontend_origin: Option<String>,
    /// Chunker tuning
    pub chunking: ChunkingConfig,
    /// Maximum concurrent agent chats
    pub max_concurrent_chats: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Character budget per size-fallback chunk
    pub max_chunk_size: usize,
    /// Overlap budget; the line overlap between consecutive fallback chunks
    /// is `overlap_size / 50`
    pub overlap_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1500,
            overlap_size: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn overlap_lines(&self) -> usize {
        self.overlap_size / 50
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9400".to_string(),
            provider: "ollama".to_string(),
            provider_endpoint: "http://localhost:11434".to_string(),
            provider_key: None,
            chat_model: "llama3.2".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            store_connection: None,
            database_name: "repo-qa".to_string(),
            frontend_origin: None,
            chunking: ChunkingConfig::default(),
            max_concurrent_chats: 3,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("REPO_QA_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(provider) = std::env::var("REPO_QA_PROVIDER") {
            config.provider = provider;
        }
        if let Ok(url) = std::env::var("REPO_QA_PROVIDER_ENDPOINT") {
            config.provider_endpoint = url;
        }
        if let Ok(key) = std::env::var("REPO_QA_PROVIDER_KEY") {
            config.provider_key = Some(key);
        }
        if let Ok(model) = std::env::var("REPO_QA_CHAT_MODEL") {
            config.chat_model = model;
        }
        if let Ok(model) = std::env::var("REPO_QA_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Ok(dir) = std::env::var("REPO_QA_STORE_CONNECTION") {
            config.store_connection = Some(PathBuf::from(dir));
        }
        if let Ok(name) = std::env::var("REPO_QA_DATABASE_NAME") {
            config.database_name = name;
        }
        if let Ok(origin) = std::env::var("REPO_QA_FRONTEND_ORIGIN") {
            config.frontend_origin = Some(origin);
        }
        if let Ok(val) = std::env::var("REPO_QA_MAX_CHUNK_SIZE") {
            if let Ok(v) = val.parse() {
                config.chunking.max_chunk_size = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_QA_OVERLAP_SIZE") {
            if let Ok(v) = val.parse() {
                config.chunking.overlap_size = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_QA_MAX_CONCURRENT_CHATS") {
            if let Ok(v) = val.parse() {
                config.max_concurrent_chats = v;
            }
        }

        config
    }

    /// Start-up validation. A missing provider key or store connection is
    /// fatal.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self
            .provider_key
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
        {
            anyhow::bail!("REPO_QA_PROVIDER_KEY is required");
        }
        if self.store_connection.is_none() {
            anyhow::bail!("REPO_QA_STORE_CONNECTION is required");
        }
        Ok(())
    }

    /// Directory holding the persisted collections.
    pub fn data_dir(&self) -> PathBuf {
        self.store_connection
            .clone()
            .unwrap_or_else(|| PathBuf::from("./data"))
            .join(&self.database_name)
    }
}
