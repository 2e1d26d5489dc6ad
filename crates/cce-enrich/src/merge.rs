//! Per-field write decisions with provenance.
//!
//! A field that some source confirmed absent is never written by a non-manual
//! source. Manual input is trusted like `force` and may itself assert absence.

use cce_core::{
    canonical_product_url, CatalogField, CatalogRecord, Field, FieldValue, ProvenanceSource,
    SearchCandidate,
};
use cce_storage::FieldWrites;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::normalized_candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMode {
    #[default]
    FillBlanksOnly,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    ConfirmedAbsent,
    AlreadyPresent,
    Unchanged,
}

/// One explicit field assertion. `value: None` asserts the field has no value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldUpdate {
    pub field: CatalogField,
    pub value: Option<FieldValue>,
}

#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub writes: FieldWrites,
    pub skipped: Vec<(CatalogField, SkipReason)>,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn written_fields(&self) -> Vec<&'static str> {
        self.writes.keys().map(|f| f.as_str()).collect()
    }

    /// The record as it will look once the plan is persisted.
    pub fn applied_to(&self, record: &CatalogRecord, at: DateTime<Utc>) -> CatalogRecord {
        let mut next = record.clone();
        for (field, value) in &self.writes {
            next.set_field(*field, value.clone());
        }
        if !self.writes.is_empty() {
            next.updated_at = at;
        }
        next
    }

    /// Current state of `field`, counting writes already planned.
    fn effective(&self, record: &CatalogRecord, field: CatalogField) -> Field {
        self.writes
            .get(&field)
            .cloned()
            .unwrap_or_else(|| record.field(field))
    }

    fn skip(&mut self, field: CatalogField, reason: SkipReason) {
        self.skipped.push((field, reason));
    }
}

#[derive(Debug, Clone)]
pub struct MergePolicy {
    retailer_base_url: String,
}

impl MergePolicy {
    pub fn new(retailer_base_url: impl Into<String>) -> Self {
        Self {
            retailer_base_url: retailer_base_url.into(),
        }
    }

    /// Plan the writes a validated provider candidate earns on `record`. Brand and
    /// name are stored normalized.
    pub fn merge_candidate(
        &self,
        record: &CatalogRecord,
        candidate: &SearchCandidate,
        mode: MergeMode,
        at: DateTime<Utc>,
    ) -> MergePlan {
        let source = ProvenanceSource::ProviderSearch;
        let mut plan = MergePlan::default();
        for (field, value) in normalized_candidate(candidate).field_values() {
            let current = record.field(field);
            if current.is_confirmed_absent() {
                plan.skip(field, SkipReason::ConfirmedAbsent);
            } else if current.value() == Some(&value) {
                plan.skip(field, SkipReason::Unchanged);
            } else if mode == MergeMode::Force || !current.is_present() {
                plan.writes.insert(field, Field::present(value, source, at));
            } else {
                plan.skip(field, SkipReason::AlreadyPresent);
            }
        }
        self.plan_canonical_url(record, &mut plan, source, mode, at);
        plan
    }

    /// Plan manual assertions and resets. Resets return fields to `unknown`.
    pub fn merge_manual(
        &self,
        record: &CatalogRecord,
        updates: &[FieldUpdate],
        resets: &[CatalogField],
        at: DateTime<Utc>,
    ) -> MergePlan {
        let source = ProvenanceSource::Manual;
        let mut plan = MergePlan::default();
        for field in resets {
            let current = record.field(*field);
            if current == Field::empty() {
                plan.skip(*field, SkipReason::Unchanged);
            } else {
                plan.writes.insert(*field, Field::empty());
            }
        }
        for update in updates {
            let current = plan.effective(record, update.field);
            let manual_already = current.source() == Some(source);
            let next = match &update.value {
                Some(value) if manual_already && current.value() == Some(value) => None,
                Some(value) => Some(Field::present(value.clone(), source, at)),
                None if manual_already && current.is_confirmed_absent() => None,
                None => Some(Field::confirmed_absent(source, at)),
            };
            match next {
                Some(field) => {
                    plan.writes.insert(update.field, field);
                }
                None => plan.skip(update.field, SkipReason::Unchanged),
            }
        }
        if !plan.writes.contains_key(&CatalogField::CanonicalUrl) {
            self.plan_canonical_url(record, &mut plan, source, MergeMode::Force, at);
        }
        plan
    }

    /// Recompute the canonical URL from the record as it will look after `plan`.
    fn plan_canonical_url(
        &self,
        record: &CatalogRecord,
        plan: &mut MergePlan,
        source: ProvenanceSource,
        mode: MergeMode,
        at: DateTime<Utc>,
    ) {
        let field = CatalogField::CanonicalUrl;
        let current = plan.effective(record, field);
        if current.is_confirmed_absent() && source != ProvenanceSource::Manual {
            plan.skip(field, SkipReason::ConfirmedAbsent);
            return;
        }

        let manual_url = (current.source() == Some(ProvenanceSource::Manual))
            .then(|| current.value().and_then(FieldValue::as_text))
            .flatten();
        let numeric_id = plan
            .effective(record, CatalogField::NumericId)
            .value()
            .and_then(FieldValue::as_id);
        let derived =
            canonical_product_url(&self.retailer_base_url, manual_url, numeric_id, Some(&record.sku));

        let current_text = current.value().and_then(FieldValue::as_text);
        if current_text == Some(derived.as_str()) {
            plan.skip(field, SkipReason::Unchanged);
            return;
        }
        if current.is_present() && mode == MergeMode::FillBlanksOnly {
            plan.skip(field, SkipReason::AlreadyPresent);
            return;
        }
        // Derived, not asserted: a manual merge stamps it as cache so it never outranks an explicit URL.
        let stamped = match source {
            ProvenanceSource::Manual => ProvenanceSource::Cache,
            other => other,
        };
        if let Some(value) = FieldValue::text(&derived) {
            plan.writes.insert(field, Field::present(value, stamped, at));
        }
    }
}
