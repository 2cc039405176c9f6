//! Application State

use std::sync::Arc;

use recap_core::{
    ContentStore, CreditLedger, GenerationOptions, JobStore, JobTrigger, LlmProvider,
    MemoryCreditLedger, MemoryJobStore,
};
use recap_payments::{GatewayRegistry, WebhookReconciler};
use recap_pipeline::{ArchiveFetcher, BackgroundTrigger, ContentGenerator, Pipeline};

use crate::config::ServerConfig;
use crate::error::ApiError;

/// Outside dependencies the server is wired with
pub struct Services {
    pub provider: Arc<dyn LlmProvider>,
    pub fetcher: Arc<dyn ArchiveFetcher>,
    pub content: Arc<dyn ContentStore>,
    pub gateways: GatewayRegistry,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub ledger: Arc<dyn CreditLedger>,
    pub jobs: Arc<dyn JobStore>,
    pub content: Arc<dyn ContentStore>,
    pub provider: Arc<dyn LlmProvider>,
    pub gateways: GatewayRegistry,
    pub reconciler: Arc<WebhookReconciler>,
    pub pipeline: Arc<Pipeline>,
    pub trigger: Arc<dyn JobTrigger>,
}

impl AppState {
    /// Wire stores, pipeline and reconciler. Must be called inside a tokio
    /// runtime so background runs have somewhere to go.
    pub fn new(config: ServerConfig, services: Services) -> Result<Self, ApiError> {
        let Services {
            provider,
            fetcher,
            content,
            gateways,
        } = services;

        let ledger: Arc<dyn CreditLedger> = Arc::new(MemoryCreditLedger::new());
        let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());

        let model = config
            .llm_model
            .clone()
            .unwrap_or_else(|| provider.info().default_model);
        let options = GenerationOptions::default().with_model(model);
        let generator = ContentGenerator::new(Arc::clone(&provider))?
            .with_options(options)
            .with_policy(config.schema_policy);

        let pipeline = Arc::new(
            Pipeline::new(
                Arc::clone(&jobs),
                Arc::clone(&content),
                fetcher,
                Arc::new(generator),
            )
            .with_config(config.pipeline),
        );
        let trigger: Arc<dyn JobTrigger> =
            Arc::new(BackgroundTrigger::new(Arc::clone(&pipeline))?);

        let reconciler = WebhookReconciler::new(
            Arc::clone(&ledger),
            Arc::clone(&jobs),
            Arc::clone(&trigger),
        )
        .with_config(config.reconciler);

        Ok(Self {
            config: Arc::new(config),
            ledger,
            jobs,
            content,
            provider,
            gateways,
            reconciler: Arc::new(reconciler),
            pipeline,
            trigger,
        })
    }
}
