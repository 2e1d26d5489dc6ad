//! Budgeted provider query sequence: identifier search, then cleaned-name search,
//! then an optional barcode detail lookup.

use std::sync::Arc;

use cce_core::{CatalogField, CatalogRecord, SearchCandidate};
use cce_providers::{extract_barcode, ProviderError, SearchProvider};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clean::NameCleaner;
use crate::matcher::CandidateMatcher;

/// Results after the top one that the identifier strategy may fall back to.
const IDENTIFIER_FALLBACK_DEPTH: usize = 3;

/// Paid provider calls consumed during one run. Owned by the run; never shared.
#[derive(Debug, Default)]
pub struct CreditLedger {
    used: u32,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    fn charge(&mut self) {
        self.used += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Identifier,
    Name,
}

#[derive(Debug, Clone, Default)]
pub struct SequenceOutcome {
    pub candidate: Option<SearchCandidate>,
    pub strategy: Option<Strategy>,
    pub search_terms: Vec<String>,
    pub credits_used: u32,
    /// Non-quota provider failures, each treated as "no result" for its call.
    pub transient_errors: Vec<String>,
}

impl SequenceOutcome {
    pub fn last_search_term(&self) -> Option<&str> {
        self.search_terms.last().map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("provider quota exhausted after {credits_used} credit(s) on this record: {message}")]
    QuotaExhausted { message: String, credits_used: u32 },
}

pub struct SearchSequencer {
    provider: Arc<dyn SearchProvider>,
    matcher: CandidateMatcher,
    cleaner: NameCleaner,
    region: String,
}

/// Per-record bookkeeping; folded into the run ledger as calls are made.
struct Attempt<'l> {
    ledger: &'l mut CreditLedger,
    outcome: SequenceOutcome,
}

impl Attempt<'_> {
    fn charge(&mut self) {
        self.ledger.charge();
        self.outcome.credits_used += 1;
    }

    fn absorb(&mut self, call: &str, err: ProviderError) -> Result<(), SequenceError> {
        match err {
            ProviderError::QuotaExhausted(message) => Err(SequenceError::QuotaExhausted {
                message,
                credits_used: self.outcome.credits_used,
            }),
            other => {
                warn!(call, error = %other, "provider call failed; treating as no result");
                self.outcome.transient_errors.push(format!("{call}: {other}"));
                Ok(())
            }
        }
    }
}

impl SearchSequencer {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        matcher: CandidateMatcher,
        cleaner: NameCleaner,
        region: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            matcher,
            cleaner,
            region: region.into(),
        }
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }

    async fn search(&self, attempt: &mut Attempt<'_>, term: &str) -> Result<Vec<SearchCandidate>, SequenceError> {
        attempt.charge();
        attempt.outcome.search_terms.push(term.to_string());
        match self.provider.search(term, &self.region).await {
            Ok(results) => {
                debug!(term, results = results.len(), "provider search");
                Ok(results)
            }
            Err(err) => attempt.absorb("search", err).map(|()| Vec::new()),
        }
    }

    fn pick_identifier_result(&self, results: Vec<SearchCandidate>, name: Option<&str>) -> Option<SearchCandidate> {
        let Some(name) = name else {
            return results.into_iter().next();
        };
        results
            .into_iter()
            .take(1 + IDENTIFIER_FALLBACK_DEPTH)
            .find(|c| self.matcher.matches(name, c.title.as_deref()))
    }

    /// Find a validated candidate for `record`, charging every attempted call to `ledger`.
    pub async fn enrich(
        &self,
        record: &CatalogRecord,
        ledger: &mut CreditLedger,
    ) -> Result<SequenceOutcome, SequenceError> {
        let mut attempt = Attempt {
            ledger,
            outcome: SequenceOutcome::default(),
        };
        let name = record.name();

        let results = self.search(&mut attempt, record.sku.as_str()).await?;
        let mut chosen = self
            .pick_identifier_result(results, name)
            .map(|c| (c, Strategy::Identifier));

        if chosen.is_none() {
            if let Some(name) = name {
                match self.cleaner.searchable(name) {
                    Some(term) => {
                        let results = self.search(&mut attempt, &term).await?;
                        chosen = results
                            .into_iter()
                            .next()
                            .filter(|top| self.matcher.matches(name, top.title.as_deref()))
                            .map(|c| (c, Strategy::Name));
                    }
                    None => debug!(sku = %record.sku, "cleaned name too short; skipping name search"),
                }
            }
        }

        if let Some((mut candidate, strategy)) = chosen {
            self.fill_barcode(&mut attempt, record, &mut candidate).await?;
            attempt.outcome.candidate = Some(candidate);
            attempt.outcome.strategy = Some(strategy);
        }
        Ok(attempt.outcome)
    }

    async fn fill_barcode(
        &self,
        attempt: &mut Attempt<'_>,
        record: &CatalogRecord,
        candidate: &mut SearchCandidate,
    ) -> Result<(), SequenceError> {
        if candidate.barcode.is_some()
            || record.is_present(CatalogField::Barcode)
            || record.is_confirmed_absent(CatalogField::Barcode)
        {
            return Ok(());
        }
        let Some(numeric_id) = candidate.numeric_id.or_else(|| record.numeric_id()) else {
            return Ok(());
        };

        attempt.charge();
        match self.provider.detail(numeric_id, &self.region).await {
            Ok(tree) => {
                candidate.barcode = extract_barcode(&tree);
                debug!(numeric_id, found = candidate.barcode.is_some(), "provider detail");
                Ok(())
            }
            Err(err) => attempt.absorb("detail", err),
        }
    }
}
