use std::{env, sync::Arc};

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::sync::RwLock;

use crate::{
    config::{GraderSettings, ModuleSettings},
    llm::LlmClient,
    store::{KvStore, assignments::AssignmentStore},
};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    store: AssignmentStore,
    settings: Arc<RwLock<ModuleSettings>>,
    llm: LlmClient,
}

impl AppState {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let llm_client = LlmClient::from_env().context("failed to initialize LLM client")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        ModuleSettings::ensure_defaults(&pool)
            .await
            .context("failed to seed default module settings")?;
        let settings = ModuleSettings::load(&pool)
            .await
            .context("failed to load module settings")?;

        let store = AssignmentStore::new(KvStore::postgres(pool.clone()));

        Ok(Self {
            pool,
            store,
            settings: Arc::new(RwLock::new(settings)),
            llm: llm_client,
        })
    }

    pub fn llm_client(&self) -> LlmClient {
        self.llm.clone()
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn store(&self) -> AssignmentStore {
        self.store.clone()
    }

    pub async fn grader_settings(&self) -> Option<GraderSettings> {
        let guard = self.settings.read().await;
        guard.grader().cloned()
    }

    pub async fn reload_settings(&self) -> Result<()> {
        let latest = ModuleSettings::load(&self.pool)
            .await
            .context("failed to reload module settings")?;
        let mut guard = self.settings.write().await;
        *guard = latest;
        Ok(())
    }
}
