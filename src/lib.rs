pub mod auth;
pub mod config;
pub mod core;
pub mod email;
pub mod flash;
pub mod follow;
pub mod forms;
pub mod handlers;
pub mod models;
pub mod posts;
pub mod search;
pub mod static_server;
pub mod templates;
pub mod translate;
pub mod users;

use crate::config::Config;
use crate::core::store::Store;
use crate::email::Mailer;
use crate::translate::Translator;

/// Shared by every worker through `web::Data`.
pub struct AppState {
    pub store: Store,
    pub config: Config,
    pub translator: Translator,
    pub mailer: Mailer,
}

impl AppState {
    /// Opens the store named by `config` (memory only when unset) and builds
    /// the outbound clients.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = match &config.database_url {
            Some(url) => Store::connect(url).await?,
            None => Store::in_memory().await?,
        };
        Self::with_store(config, store).await
    }

    pub async fn with_store(config: Config, store: Store) -> anyhow::Result<Self> {
        if config.seed_demo_data {
            crate::core::db::seed_demo_data(&store).await?;
        }
        Ok(Self {
            translator: Translator::new(&config)?,
            mailer: Mailer::new(&config)?,
            store,
            config,
        })
    }
}

pub use handlers::configure;
