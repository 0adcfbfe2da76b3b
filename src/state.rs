use std::sync::Arc;

use crate::config::Config;
use crate::llm::provider::AnyProvider;
use crate::store::Store;

/// Shared application state. The store and provider client are the only
/// state shared between requests and are safe for concurrent use.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub provider: Arc<AnyProvider>,
    pub chat_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::open(&config.data_dir())?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(300))
            .build()?;
        let provider = AnyProvider::from_config(&config, http_client);

        let max_concurrent_chats = config.max_concurrent_chats.max(1);

        Ok(Self {
            config,
            store: Arc::new(store),
            provider: Arc::new(provider),
            chat_semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent_chats)),
        })
    }
}
