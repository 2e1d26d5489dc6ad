//! In-memory [`CatalogStore`] used by tests and dry runs.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use cce_core::{CatalogRecord, Sku};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{CatalogStore, EligibilityFilter, FieldWrites, StoreError};

#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    records: Mutex<BTreeMap<Sku, CatalogRecord>>,
    rejected_writes: Mutex<BTreeSet<Sku>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = CatalogRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.sku.clone(), r))
            .collect::<BTreeMap<_, _>>();
        Self {
            records: Mutex::new(map),
            rejected_writes: Mutex::new(BTreeSet::new()),
        }
    }

    /// Make every write for `sku` fail, simulating a store outage for that record.
    pub async fn reject_writes_for(&self, sku: &Sku) {
        self.rejected_writes.lock().await.insert(sku.clone());
    }

    pub async fn snapshot(&self) -> Vec<CatalogRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    async fn check_writable(&self, sku: &Sku) -> Result<(), StoreError> {
        if self.rejected_writes.lock().await.contains(sku) {
            return Err(StoreError::WriteRejected(format!("writes disabled for {sku}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn select_eligible(
        &self,
        filter: &EligibilityFilter,
        limit: usize,
    ) -> Result<Vec<CatalogRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut eligible = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect::<Vec<_>>();
        eligible.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn fetch_by_key(&self, sku: &Sku) -> Result<Option<CatalogRecord>, StoreError> {
        Ok(self.records.lock().await.get(sku).cloned())
    }

    async fn patch_fields(
        &self,
        sku: &Sku,
        writes: &FieldWrites,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_writable(sku).await?;
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(sku)
            .ok_or_else(|| StoreError::NotFound(sku.clone()))?;
        for (field, value) in writes {
            record.set_field(*field, value.clone());
        }
        record.updated_at = at;
        Ok(())
    }

    async fn increment_attempt(
        &self,
        sku: &Sku,
        search_term: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        self.check_writable(sku).await?;
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(sku)
            .ok_or_else(|| StoreError::NotFound(sku.clone()))?;
        record.attempt.count += 1;
        record.attempt.last_attempt_at = Some(at);
        if let Some(term) = search_term {
            record.attempt.last_search_term = Some(term.to_string());
        }
        record.updated_at = at;
        Ok(record.attempt.count)
    }

    async fn insert_record(&self, record: &CatalogRecord) -> Result<(), StoreError> {
        self.check_writable(&record.sku).await?;
        let mut records = self.records.lock().await;
        if records.contains_key(&record.sku) {
            return Err(StoreError::AlreadyExists(record.sku.clone()));
        }
        records.insert(record.sku.clone(), record.clone());
        Ok(())
    }
}
