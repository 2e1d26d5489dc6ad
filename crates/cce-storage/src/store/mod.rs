//! Canonical record store abstraction.
//!
//! The enrichment engine only ever talks to [`CatalogStore`]; records are
//! keyed by [`Sku`] and mutated field-by-field through [`CatalogStore::patch_fields`].
//! A patch for one record is applied atomically by every implementation.

pub mod memory;
pub mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use cce_core::{CatalogField, CatalogRecord, Field, Sku, DEFAULT_MAX_ATTEMPTS};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Field writes for one record. A write of [`Field::empty`] resets the field to `unknown`.
pub type FieldWrites = BTreeMap<CatalogField, Field>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no catalog record for sku {0}")]
    NotFound(Sku),
    #[error("catalog record for sku {0} already exists")]
    AlreadyExists(Sku),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored record is malformed: {0}")]
    Malformed(String),
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

/// Selection filter for records eligible for provider enrichment.
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    /// Records with `attempt.count >= max_attempts` are never selected.
    pub max_attempts: u32,
    /// Only records submitted at or after this instant.
    pub submitted_after: Option<DateTime<Utc>>,
    /// Require at least one core field still `unknown`.
    pub require_missing_core: bool,
}

impl Default for EligibilityFilter {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            submitted_after: None,
            require_missing_core: true,
        }
    }
}

impl EligibilityFilter {
    pub fn matches(&self, record: &CatalogRecord) -> bool {
        if record.attempt.is_exhausted(self.max_attempts) {
            return false;
        }
        if let Some(after) = self.submitted_after {
            if record.submitted_at < after {
                return false;
            }
        }
        !self.require_missing_core || !record.missing_core_fields().is_empty()
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Eligible records, most recently submitted first.
    async fn select_eligible(
        &self,
        filter: &EligibilityFilter,
        limit: usize,
    ) -> Result<Vec<CatalogRecord>, StoreError>;

    async fn fetch_by_key(&self, sku: &Sku) -> Result<Option<CatalogRecord>, StoreError>;

    /// Apply all writes for one record in a single atomic step.
    async fn patch_fields(
        &self,
        sku: &Sku,
        writes: &FieldWrites,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a fully exhausted no-match. Returns the new attempt count.
    async fn increment_attempt(
        &self,
        sku: &Sku,
        search_term: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u32, StoreError>;

    async fn insert_record(&self, record: &CatalogRecord) -> Result<(), StoreError>;
}
