//! Enrichment orchestration: matching, name cleaning, search sequencing, merge
//! policy, the run governor and manual overrides.

use std::sync::Arc;

use anyhow::Context;
use cce_providers::{HttpSearchProvider, SearchProvider};
use cce_storage::{CatalogStore, HttpFetcher, PgCatalogStore, ResponseArchive, StoreError};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub mod clean;
pub mod config;
pub mod governor;
pub mod manual;
pub mod matcher;
pub mod merge;
pub mod normalize;
pub mod sequencer;

pub use clean::NameCleaner;
pub use config::{DelayRange, EnrichConfig, MatchRules};
pub use governor::{Governor, RecordReport, RecordStatus, RunRequest, RunSummary};
pub use manual::{parse_manual_payload, strip_command_wrapping, ManualBatch, ManualIngest, ManualSummary};
pub use matcher::{CandidateMatcher, MatchVerdict};
pub use merge::{FieldUpdate, MergeMode, MergePlan, MergePolicy};
pub use normalize::{normalize_brand, normalize_product_name};
pub use sequencer::{CreditLedger, SearchSequencer, SequenceError, SequenceOutcome, Strategy};

pub const CRATE_NAME: &str = "cce-enrich";

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid manual payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EnrichError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, EnrichError::Configuration(_))
    }
}

/// Wire the live provider and matching rules into a governor over `store`.
pub fn build_governor(config: &EnrichConfig, store: Arc<dyn CatalogStore>) -> Result<Governor, EnrichError> {
    config.validate_for_enrich()?;
    let fetcher = HttpFetcher::new(config.http_client_config()).context("building http client")?;
    let mut provider = HttpSearchProvider::new(config.provider_config()?, fetcher);
    if let Some(dir) = &config.archive_dir {
        provider = provider.with_archive(ResponseArchive::new(dir.clone()));
    }
    let provider: Arc<dyn SearchProvider> = Arc::new(provider);

    let rules = MatchRules::from_workspace_root(&config.workspace_root)?;
    let sequencer = SearchSequencer::new(
        provider,
        CandidateMatcher::new(&rules),
        NameCleaner::new(&rules),
        config.region.clone(),
    );
    let recency = (config.recency_days > 0).then(|| chrono::Duration::days(config.recency_days));
    Ok(Governor::new(
        store,
        sequencer,
        MergePolicy::new(config.retailer_base_url.clone()),
        config.eligibility_filter(chrono::Utc::now()),
    )
    .with_recency(recency)
    .with_delay(config.delay_range())
    .with_reports_dir(config.reports_dir.clone()))
}

pub async fn connect_store(config: &EnrichConfig) -> Result<Arc<dyn CatalogStore>, EnrichError> {
    let store = PgCatalogStore::connect(config.database_url()?).await?;
    Ok(Arc::new(store))
}

/// Cron-driven runs. Returns `None` when scheduling is disabled. A tick that fires
/// while a run is still in progress is skipped.
pub async fn maybe_build_scheduler(
    config: &EnrichConfig,
    governor: Arc<Governor>,
    request: RunRequest,
) -> Result<Option<JobScheduler>, EnrichError> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let run_lock = Arc::new(Mutex::new(()));
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = &config.enrich_cron;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let governor = governor.clone();
        let run_lock = run_lock.clone();
        let request = request.clone();
        Box::pin(async move {
            let Ok(_guard) = run_lock.try_lock() else {
                warn!("previous enrichment run still in progress; skipping tick");
                return;
            };
            match governor.run(request).await {
                Ok(summary) => info!(run_id = %summary.run_id, enriched = summary.enriched, "scheduled run complete"),
                Err(err) => warn!(error = %err, "scheduled run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
