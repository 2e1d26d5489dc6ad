//! Run orchestration: selection, per-record sequencing and merging, attempt
//! accounting, the credit ledger, quota aborts, inter-record delay and reports.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use cce_core::{CatalogRecord, Sku};
use cce_storage::{CatalogStore, EligibilityFilter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::DelayRange;
use crate::merge::{MergeMode, MergePolicy};
use crate::sequencer::{CreditLedger, SearchSequencer, SequenceError, Strategy};
use crate::EnrichError;

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub limit: usize,
    /// Single-record mode: process only this SKU.
    pub sku: Option<Sku>,
    pub mode: MergeMode,
    /// Query the provider but never write to the store.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RecordStatus {
    Enriched { fields: Vec<String> },
    /// A candidate validated but every field was already settled.
    Unchanged,
    NoMatch { attempt_count: u32 },
    Skipped { reason: String },
    Error { message: String },
    /// The run stopped on this record before anything was written.
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub sku: Sku,
    #[serde(flatten)]
    pub status: RecordStatus,
    pub strategy: Option<Strategy>,
    pub search_terms: Vec<String>,
    pub credits_used: u32,
    /// Public product page of the accepted candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_link: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub provider_id: String,
    pub mode: MergeMode,
    pub dry_run: bool,
    pub selected: usize,
    pub enriched: usize,
    pub unchanged: usize,
    pub no_match: usize,
    pub skipped: usize,
    pub errors: usize,
    pub credits_used: u32,
    pub aborted_reason: Option<String>,
    pub records: Vec<RecordReport>,
    pub reports_dir: Option<String>,
}

impl RunSummary {
    pub fn aborted(&self) -> bool {
        self.aborted_reason.is_some()
    }
}

/// State of one run, moved through every record step and consumed by [`RunContext::finish`].
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    ledger: CreditLedger,
    records: Vec<RecordReport>,
    selected: usize,
    aborted_reason: Option<String>,
}

impl RunContext {
    fn new(selected: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ledger: CreditLedger::new(),
            records: Vec::new(),
            selected,
            aborted_reason: None,
        }
    }

    fn record(mut self, report: RecordReport) -> Self {
        self.records.push(report);
        self
    }

    fn finish(self, provider_id: &str, request: &RunRequest) -> RunSummary {
        let count = |pred: fn(&RecordStatus) -> bool| self.records.iter().filter(|r| pred(&r.status)).count();
        RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            provider_id: provider_id.to_string(),
            mode: request.mode,
            dry_run: request.dry_run,
            selected: self.selected,
            enriched: count(|s| matches!(s, RecordStatus::Enriched { .. })),
            unchanged: count(|s| matches!(s, RecordStatus::Unchanged)),
            no_match: count(|s| matches!(s, RecordStatus::NoMatch { .. })),
            skipped: count(|s| matches!(s, RecordStatus::Skipped { .. })),
            errors: count(|s| matches!(s, RecordStatus::Error { .. })),
            credits_used: self.ledger.used(),
            aborted_reason: self.aborted_reason,
            records: self.records,
            reports_dir: None,
        }
    }
}

pub struct Governor {
    store: Arc<dyn CatalogStore>,
    sequencer: SearchSequencer,
    policy: MergePolicy,
    filter_template: EligibilityFilter,
    /// Recomputed per run so scheduled runs keep a sliding window.
    recency: Option<chrono::Duration>,
    delay: DelayRange,
    reports_dir: Option<PathBuf>,
}

impl Governor {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        sequencer: SearchSequencer,
        policy: MergePolicy,
        filter: EligibilityFilter,
    ) -> Self {
        Self {
            store,
            sequencer,
            policy,
            filter_template: filter,
            recency: None,
            delay: DelayRange::none(),
            reports_dir: None,
        }
    }

    pub fn with_delay(mut self, delay: DelayRange) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_recency(mut self, window: Option<chrono::Duration>) -> Self {
        self.recency = window;
        self
    }

    pub fn provider_id(&self) -> &str {
        self.sequencer.provider_id()
    }

    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    /// Run one enrichment pass. Quota exhaustion ends the run early but is reported
    /// through [`RunSummary::aborted_reason`], not as an error.
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary, EnrichError> {
        let (records, pre_skipped) = self.select(&request).await?;
        let ctx = RunContext::new(records.len());
        let span = info_span!("enrich_run", run_id = %ctx.run_id, dry_run = request.dry_run);
        let ctx = self
            .process_all(ctx, records, pre_skipped, &request)
            .instrument(span)
            .await;

        let mut summary = ctx.finish(self.sequencer.provider_id(), &request);
        if let Some(root) = &self.reports_dir {
            let dir = write_run_reports(root, &summary).await?;
            summary.reports_dir = Some(dir.display().to_string());
        }
        info!(
            run_id = %summary.run_id,
            enriched = summary.enriched,
            no_match = summary.no_match,
            errors = summary.errors,
            credits_used = summary.credits_used,
            aborted = summary.aborted(),
            "enrichment run finished"
        );
        Ok(summary)
    }

    async fn select(&self, request: &RunRequest) -> Result<(Vec<CatalogRecord>, Vec<RecordReport>), EnrichError> {
        let Some(sku) = &request.sku else {
            let mut filter = self.filter_template.clone();
            if let Some(window) = self.recency {
                filter.submitted_after = Some(Utc::now() - window);
            }
            let records = self.store.select_eligible(&filter, request.limit).await?;
            return Ok((records, Vec::new()));
        };

        let skip = |reason: &str| -> Result<(Vec<CatalogRecord>, Vec<RecordReport>), EnrichError> {
            Ok((
                Vec::new(),
                vec![RecordReport {
                    sku: sku.clone(),
                    status: RecordStatus::Skipped {
                        reason: reason.to_string(),
                    },
                    strategy: None,
                    search_terms: Vec::new(),
                    credits_used: 0,
                    product_link: None,
                }],
            ))
        };
        let Some(record) = self.store.fetch_by_key(sku).await? else {
            return skip("record not found");
        };
        // Attempt exhaustion is a selection rule; force only changes how fields merge.
        if record.attempt.is_exhausted(self.filter_template.max_attempts) {
            return skip("attempts exhausted");
        }
        if request.mode == MergeMode::FillBlanksOnly && record.missing_core_fields().is_empty() {
            return skip("no missing core fields");
        }
        Ok((vec![record], Vec::new()))
    }

    async fn process_all(
        &self,
        mut ctx: RunContext,
        records: Vec<CatalogRecord>,
        pre_skipped: Vec<RecordReport>,
        request: &RunRequest,
    ) -> RunContext {
        info!(selected = records.len(), mode = ?request.mode, "enrichment run started");
        for report in pre_skipped {
            ctx = ctx.record(report);
        }

        let total = records.len();
        for (index, record) in records.into_iter().enumerate() {
            ctx = self.process_record(ctx, record, request).await;
            if ctx.aborted_reason.is_some() {
                break;
            }
            if index + 1 < total && !self.delay.is_zero() {
                tokio::time::sleep(self.delay.sample()).await;
            }
        }
        ctx
    }

    async fn process_record(&self, mut ctx: RunContext, record: CatalogRecord, request: &RunRequest) -> RunContext {
        let span = info_span!("enrich_record", sku = %record.sku);
        async move {
            let outcome = match self.sequencer.enrich(&record, &mut ctx.ledger).await {
                Ok(outcome) => outcome,
                Err(SequenceError::QuotaExhausted { message, credits_used }) => {
                    warn!(%message, "provider quota exhausted; aborting run");
                    ctx.aborted_reason = Some(format!("quota exhausted: {message}"));
                    return ctx.record(RecordReport {
                        sku: record.sku.clone(),
                        status: RecordStatus::Aborted,
                        strategy: None,
                        search_terms: Vec::new(),
                        credits_used,
                        product_link: None,
                    });
                }
            };

            let now = Utc::now();
            let status = match &outcome.candidate {
                Some(candidate) => {
                    let plan = self.policy.merge_candidate(&record, candidate, request.mode, now);
                    if plan.is_empty() {
                        RecordStatus::Unchanged
                    } else if request.dry_run {
                        RecordStatus::Enriched {
                            fields: plan.written_fields().into_iter().map(str::to_string).collect(),
                        }
                    } else {
                        match self.store.patch_fields(&record.sku, &plan.writes, now).await {
                            Ok(()) => RecordStatus::Enriched {
                                fields: plan.written_fields().into_iter().map(str::to_string).collect(),
                            },
                            Err(err) => {
                                warn!(error = %err, "failed to persist merged fields");
                                RecordStatus::Error {
                                    message: err.to_string(),
                                }
                            }
                        }
                    }
                }
                None if request.dry_run => RecordStatus::NoMatch {
                    attempt_count: record.attempt.count + 1,
                },
                None => match self
                    .store
                    .increment_attempt(&record.sku, outcome.last_search_term(), now)
                    .await
                {
                    Ok(attempt_count) => RecordStatus::NoMatch { attempt_count },
                    Err(err) => {
                        warn!(error = %err, "failed to record no-match attempt");
                        RecordStatus::Error {
                            message: err.to_string(),
                        }
                    }
                },
            };
            info!(status = ?status, credits = outcome.credits_used, "record processed");

            ctx.record(RecordReport {
                sku: record.sku.clone(),
                status,
                strategy: outcome.strategy,
                search_terms: outcome.search_terms,
                credits_used: outcome.credits_used,
                product_link: outcome.candidate.and_then(|candidate| candidate.link),
            })
        }
        .instrument(span)
        .await
    }
}

/// Write `summary.json` and `brief.md` under `<root>/enrich/<run_id>/`.
pub async fn write_run_reports(root: &Path, summary: &RunSummary) -> anyhow::Result<PathBuf> {
    let dir = root.join("enrich").join(summary.run_id.to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(dir.join("summary.json"), json)
        .await
        .context("writing summary.json")?;
    fs::write(dir.join("brief.md"), render_brief(summary))
        .await
        .context("writing brief.md")?;
    Ok(dir)
}

pub fn render_brief(summary: &RunSummary) -> String {
    let mut lines = vec![
        "# Catalog Enrichment Run".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Provider: {}", summary.provider_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Mode: {:?}{}", summary.mode, if summary.dry_run { " (dry run)" } else { "" }),
        format!("- Selected: {}", summary.selected),
        format!("- Enriched: {}", summary.enriched),
        format!("- Unchanged: {}", summary.unchanged),
        format!("- No match: {}", summary.no_match),
        format!("- Skipped: {}", summary.skipped),
        format!("- Errors: {}", summary.errors),
        format!("- Credits used: {}", summary.credits_used),
    ];
    if let Some(reason) = &summary.aborted_reason {
        lines.push(format!("- Aborted: {reason}"));
    }
    lines.push(String::new());
    lines.push("## Records".to_string());
    for record in &summary.records {
        let detail = match &record.status {
            RecordStatus::Enriched { fields } => format!("enriched ({})", fields.join(", ")),
            RecordStatus::Unchanged => "unchanged".to_string(),
            RecordStatus::NoMatch { attempt_count } => format!("no match (attempt {attempt_count})"),
            RecordStatus::Skipped { reason } => format!("skipped: {reason}"),
            RecordStatus::Error { message } => format!("error: {message}"),
            RecordStatus::Aborted => "aborted".to_string(),
        };
        let mut line = format!("- {}: {} [{} credit(s)]", record.sku, detail, record.credits_used);
        if let Some(link) = &record.product_link {
            line.push_str(&format!(" <{link}>"));
        }
        lines.push(line);
    }
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clean::NameCleaner;
    use crate::matcher::CandidateMatcher;
    use cce_core::CatalogField;
    use cce_providers::FixtureProvider;
    use cce_storage::MemoryCatalogStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, day, 10, 0, 0).single().unwrap()
    }

    fn governor(store: Arc<MemoryCatalogStore>, provider: FixtureProvider) -> Governor {
        let sequencer = SearchSequencer::new(
            Arc::new(provider),
            CandidateMatcher::default(),
            NameCleaner::default(),
            "30303",
        );
        Governor::new(
            store,
            sequencer,
            MergePolicy::new("https://www.homedepot.com"),
            EligibilityFilter::default(),
        )
    }

    fn request() -> RunRequest {
        RunRequest {
            limit: 10,
            sku: None,
            mode: MergeMode::FillBlanksOnly,
            dry_run: false,
        }
    }

    fn record(sku: &str, name: &str, day: u32) -> CatalogRecord {
        CatalogRecord::submitted(Sku::parse(sku).unwrap(), Some(name), at(day))
    }

    #[tokio::test]
    async fn persistence_failure_is_counted_and_run_continues() {
        let store = Arc::new(MemoryCatalogStore::with_records([
            record("204518", "Everbilt Brass Hinge", 2),
            record("409871", "Everbilt Brass Hinge", 1),
        ]));
        store.reject_writes_for(&Sku::parse("204518").unwrap()).await;
        let provider = FixtureProvider::default()
            .with_search("204518", json!({"products": [{"title": "Everbilt Door Hinge", "brand": "Everbilt"}]}))
            .with_search("409871", json!({"products": [{"title": "Everbilt Door Hinge", "brand": "Everbilt"}]}));

        let summary = governor(store.clone(), provider).run(request()).await.unwrap();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.enriched, 1);
        assert_eq!(summary.credits_used, 2);
        let ok = store.fetch_by_key(&Sku::parse("409871").unwrap()).await.unwrap().unwrap();
        assert_eq!(ok.text(CatalogField::Brand), Some("EVERBILT"));
    }

    #[tokio::test]
    async fn single_sku_mode_respects_attempt_cap_even_when_forced() {
        let mut exhausted = record("204518", "Everbilt Brass Hinge", 2);
        exhausted.attempt.count = 2;
        let store = Arc::new(MemoryCatalogStore::with_records([exhausted]));
        let provider = FixtureProvider::default();
        let gov = governor(store, provider);

        let summary = gov
            .run(RunRequest {
                sku: Some(Sku::parse("204518").unwrap()),
                mode: MergeMode::Force,
                ..request()
            })
            .await
            .unwrap();
        assert_eq!(summary.selected, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.credits_used, 0);
    }

    #[tokio::test]
    async fn dry_run_reports_without_writing() {
        let store = Arc::new(MemoryCatalogStore::with_records([record("204518", "Copper Pipe Cap 2 in. HX45120", 2)]));
        let gov = governor(store.clone(), FixtureProvider::default());
        let summary = gov.run(RunRequest { dry_run: true, ..request() }).await.unwrap();

        assert_eq!(summary.no_match, 1);
        assert_eq!(summary.credits_used, 2);
        let untouched = store.fetch_by_key(&Sku::parse("204518").unwrap()).await.unwrap().unwrap();
        assert_eq!(untouched.attempt.count, 0);
    }

    #[tokio::test]
    async fn reports_are_written_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryCatalogStore::new());
        let gov = governor(store, FixtureProvider::default()).with_reports_dir(dir.path());
        let summary = gov.run(request()).await.unwrap();

        assert_eq!(summary.selected, 0);
        let run_dir = PathBuf::from(summary.reports_dir.unwrap());
        assert!(run_dir.join("summary.json").exists());
        let brief = std::fs::read_to_string(run_dir.join("brief.md")).unwrap();
        assert!(brief.contains("- Credits used: 0"));
    }
}
