//! Service wiring shared by every subcommand.

use std::sync::Arc;

use anyhow::{Context, Result};
use comply_core::config::Config;
use comply_engine::risk::backend_from_config;
use comply_engine::{ActivePolicyCache, EventChain, Orchestrator, PolicyService, RiskScorer};
use comply_signing::SigningProvider;
use comply_storage::{db, ComplianceStore, PgStore};

pub struct App {
    pub config: Config,
    pub store: Arc<dyn ComplianceStore>,
    pub signer: Arc<dyn SigningProvider>,
    cache: Arc<ActivePolicyCache>,
}

impl App {
    pub async fn connect(config: Config) -> Result<Self> {
        let pool = db::connect(&config.postgres)
            .await
            .context("failed to connect to PostgreSQL")?;
        let store: Arc<dyn ComplianceStore> = Arc::new(PgStore::new(pool));
        let signer = comply_signing::from_config(&config.signing)
            .context("failed to initialise signing provider")?;
        let cache = Arc::new(ActivePolicyCache::from_config(
            store.clone(),
            &config.cache,
            &config.evaluation,
        ));
        Ok(Self {
            config,
            store,
            signer,
            cache,
        })
    }

    pub fn policies(&self) -> PolicyService {
        PolicyService::new(
            self.store.clone(),
            self.cache.clone(),
            self.config.evaluation.max_expression_depth,
        )
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let chain = Arc::new(EventChain::new(self.store.clone(), self.signer.clone()));
        Orchestrator::new(
            self.store.clone(),
            chain,
            self.cache.clone(),
            &self.config.evaluation,
        )
    }

    pub fn scorer(&self) -> Result<RiskScorer> {
        let backend = backend_from_config(&self.config.scorer).context("invalid scorer configuration")?;
        Ok(RiskScorer::new(self.store.clone(), backend))
    }
}
