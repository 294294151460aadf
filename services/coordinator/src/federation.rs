use std::sync::Arc;

use anyhow::Result;
use secagg_core::{
    AggregationCoordinator, CoordinatorConfig, InMemoryModel, MaskedSumScheme, RoundController, RoundSummary,
};
use tracing::{info, warn};

pub const ROUND_CLOSED_SUBJECT: &str = "secagg.rounds.closed";

pub type Controller = RoundController<MaskedSumScheme, InMemoryModel>;

pub struct FederationModule {
    controller: Controller,
    model: Arc<InMemoryModel>,
    events: Option<async_nats::Client>,
}

impl FederationModule {
    pub async fn new(cfg: &CoordinatorConfig) -> Result<Self> {
        let events = match &cfg.nats_url {
            Some(url) => match async_nats::connect(url.as_str()).await {
                Ok(nc) => { info!(%url, "connected to NATS"); Some(nc) }
                Err(e) => { warn!(%url, error = %e, "NATS unavailable - round events disabled"); None }
            },
            None => None,
        };
        Self::with_events(cfg, events)
    }

    pub fn with_events(cfg: &CoordinatorConfig, events: Option<async_nats::Client>) -> Result<Self> {
        let model = Arc::new(InMemoryModel::new(cfg.initial_model()));
        let coordinator = AggregationCoordinator::new(cfg.scheme()?, model.clone(), cfg.aggregation_threshold)?;
        info!(threshold = cfg.aggregation_threshold, parameters = cfg.parameters.len(), "federation_module_initialized");
        Ok(Self { controller: RoundController::new(Arc::new(coordinator)), model, events })
    }

    pub fn controller(&self) -> &Controller { &self.controller }
    pub fn model(&self) -> &Arc<InMemoryModel> { &self.model }

    pub async fn publish_round_closed(&self, summary: &RoundSummary) {
        let Some(nc) = &self.events else { return };
        let payload = match serde_json::to_vec(summary) {
            Ok(p) => p,
            Err(e) => { warn!(error = %e, "round event encode failed"); return; }
        };
        if let Err(e) = nc.publish(ROUND_CLOSED_SUBJECT, payload.into()).await {
            warn!(round_id = summary.round_id, error = %e, "round event publish failed");
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(nc) = &self.events { nc.flush().await?; }
        info!("federation_module_shutdown");
        Ok(())
    }
}
