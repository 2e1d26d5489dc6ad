//! Operator-supplied field overrides: payload parsing, dry-run preview and apply.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use cce_core::{CatalogField, CatalogRecord, FieldValue, Sku};
use cce_providers::normalize_barcode;
use cce_storage::{CatalogStore, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tokio::fs;
use tracing::{info, warn};

use crate::merge::{FieldUpdate, MergePolicy};
use crate::EnrichError;

const SKU_KEYS: &[&str] = &["sku", "store_sku", "storeSku", "home_depot_sku_6_or_10_digits"];
const CONTAINER_KEYS: &[&str] = &["items", "data", "records"];
const RESET_KEY: &str = "reset";

const FIELD_ALIASES: &[(CatalogField, &[&str])] = &[
    (CatalogField::Name, &["item_name", "itemName", "name", "title"]),
    (CatalogField::Brand, &["brand", "brand_name", "brandName"]),
    (CatalogField::ModelNumber, &["model", "model_number", "modelNumber"]),
    (CatalogField::Barcode, &["barcode_upc", "upc", "barcode", "gtin"]),
    (
        CatalogField::NumericId,
        &["internet_number", "internetNumber", "internet_sku", "internetSku"],
    ),
    (CatalogField::ImageUrl, &["image_url", "imageUrl", "image", "image_link"]),
    (
        CatalogField::CanonicalUrl,
        &[
            "product_link",
            "productLink",
            "product_url",
            "productUrl",
            "pageUrl",
            "home_depot_url",
            "homeDepotUrl",
            "url",
        ],
    ),
    (CatalogField::RetailPrice, &["retail_price", "retailPrice", "price"]),
];

/// Drop a leading `/manual` command and a surrounding markdown code fence.
pub fn strip_command_wrapping(input: &str) -> &str {
    let mut text = input.trim();
    if let Some(rest) = text.strip_prefix("/manual") {
        text = rest.trim_start();
    }
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        text = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }
    text
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManualEntry {
    pub sku: Sku,
    pub updates: Vec<FieldUpdate>,
    pub resets: Vec<CatalogField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidEntry {
    pub index: usize,
    pub sku: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ManualBatch {
    pub entries: Vec<ManualEntry>,
    pub received: usize,
    pub invalid: Vec<InvalidEntry>,
    pub duplicates_collapsed: usize,
}

/// Parse a manual payload: an array, an `items`/`data`/`records` container,
/// a single item, or an object keyed by SKU. Later duplicates win.
pub fn parse_manual_payload(input: &str) -> Result<ManualBatch, EnrichError> {
    let text = strip_command_wrapping(input);
    let root: JsonValue = serde_json::from_str(text)
        .map_err(|err| EnrichError::InvalidPayload(format!("not valid JSON: {err}")))?;

    let items: Vec<(Option<String>, JsonValue)> = match root {
        JsonValue::Array(items) => items.into_iter().map(|v| (None, v)).collect(),
        JsonValue::Object(mut map) => {
            let container = CONTAINER_KEYS
                .iter()
                .find(|key| map.get(**key).is_some_and(JsonValue::is_array))
                .copied();
            if let Some(key) = container {
                match map.remove(key) {
                    Some(JsonValue::Array(items)) => items.into_iter().map(|v| (None, v)).collect(),
                    _ => Vec::new(),
                }
            } else if looks_like_item(&map) {
                vec![(None, JsonValue::Object(map))]
            } else {
                map.into_iter().map(|(key, v)| (Some(key), v)).collect()
            }
        }
        _ => {
            return Err(EnrichError::InvalidPayload(
                "expected a JSON object or array".to_string(),
            ))
        }
    };

    let mut batch = ManualBatch {
        received: items.len(),
        ..ManualBatch::default()
    };
    let mut by_sku: BTreeMap<Sku, ManualEntry> = BTreeMap::new();
    for (index, (keyed_sku, item)) in items.into_iter().enumerate() {
        match parse_item(keyed_sku, item) {
            Ok(entry) => {
                if by_sku.insert(entry.sku.clone(), entry).is_some() {
                    batch.duplicates_collapsed += 1;
                }
            }
            Err((sku, reason)) => batch.invalid.push(InvalidEntry { index, sku, reason }),
        }
    }
    batch.entries = by_sku.into_values().collect();
    Ok(batch)
}

fn looks_like_item(map: &Map<String, JsonValue>) -> bool {
    SKU_KEYS
        .iter()
        .chain(FIELD_ALIASES.iter().flat_map(|(_, aliases)| aliases.iter()))
        .any(|key| map.contains_key(*key))
}

fn field_for_name(name: &str) -> Option<CatalogField> {
    CatalogField::parse(name).or_else(|| {
        FIELD_ALIASES
            .iter()
            .find(|(_, aliases)| aliases.contains(&name.trim()))
            .map(|(field, _)| *field)
    })
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

type ItemError = (Option<String>, String);

fn parse_item(keyed_sku: Option<String>, item: JsonValue) -> Result<ManualEntry, ItemError> {
    let JsonValue::Object(map) = item else {
        return Err((keyed_sku, "item is not a JSON object".to_string()));
    };
    let raw_sku = SKU_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(scalar_text))
        .or(keyed_sku);
    let Some(raw) = raw_sku else {
        return Err((None, "missing sku".to_string()));
    };
    let sku = Sku::parse(&raw).map_err(|err| (Some(raw.clone()), err.to_string()))?;

    let mut updates = Vec::new();
    for (field, aliases) in FIELD_ALIASES {
        let Some(value) = aliases.iter().find_map(|key| map.get(*key)) else {
            continue;
        };
        let value = parse_field_value(*field, value)
            .map_err(|reason| (Some(sku.to_string()), format!("{field}: {reason}")))?;
        updates.push(FieldUpdate { field: *field, value });
    }

    let mut resets = Vec::new();
    if let Some(reset) = map.get(RESET_KEY) {
        let names = reset
            .as_array()
            .ok_or_else(|| (Some(sku.to_string()), "reset must be a list of field names".to_string()))?;
        for name in names {
            let field = name
                .as_str()
                .and_then(field_for_name)
                .ok_or_else(|| (Some(sku.to_string()), format!("unknown reset field {name}")))?;
            if updates.iter().any(|u| u.field == field) {
                return Err((Some(sku.to_string()), format!("{field} is both set and reset")));
            }
            resets.push(field);
        }
    }

    Ok(ManualEntry { sku, updates, resets })
}

/// `Ok(None)` is an explicit absence assertion (JSON `null` or blank text).
fn parse_field_value(field: CatalogField, value: &JsonValue) -> Result<Option<FieldValue>, String> {
    if value.is_null() {
        return Ok(None);
    }
    let Some(text) = scalar_text(value) else {
        return Err("expected a string or number".to_string());
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    match field {
        CatalogField::Barcode => normalize_barcode(text)
            .map(|code| Some(FieldValue::Text(code)))
            .ok_or_else(|| format!("{text:?} is not a 12-14 digit barcode")),
        CatalogField::NumericId => {
            if !text.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!("{text:?} must be digits only"));
            }
            text.parse::<u64>()
                .ok()
                .and_then(FieldValue::id)
                .map(Some)
                .ok_or_else(|| format!("{text:?} is not a positive id"))
        }
        CatalogField::RetailPrice => {
            let digits: String = text.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
            digits
                .parse::<f64>()
                .ok()
                .map(|p| (p * 100.0).round() / 100.0)
                .and_then(FieldValue::price)
                .map(Some)
                .ok_or_else(|| format!("{text:?} is not a positive price"))
        }
        _ => Ok(FieldValue::text(text)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualResult {
    pub sku: Sku,
    pub created: bool,
    pub fields: Vec<String>,
    pub skipped: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualSummary {
    pub received_items: usize,
    pub valid_items: usize,
    pub invalid_items: usize,
    pub duplicate_skus_collapsed: usize,
    pub dry_run: bool,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: usize,
    pub invalid_details: Vec<InvalidEntry>,
    pub results: Vec<ManualResult>,
    pub report_path: Option<String>,
}

pub struct ManualIngest {
    store: Arc<dyn CatalogStore>,
    policy: MergePolicy,
    reports_dir: Option<PathBuf>,
}

impl ManualIngest {
    pub fn new(store: Arc<dyn CatalogStore>, policy: MergePolicy) -> Self {
        Self {
            store,
            policy,
            reports_dir: None,
        }
    }

    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    /// Apply a parsed batch. Per-record store failures are reported and do not stop the batch.
    pub async fn apply(&self, batch: ManualBatch, dry_run: bool) -> Result<ManualSummary, EnrichError> {
        let now = Utc::now();
        let mut results = Vec::with_capacity(batch.entries.len());
        for entry in &batch.entries {
            let result = match self.apply_entry(entry, dry_run, now).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(sku = %entry.sku, error = %err, "manual update failed");
                    ManualResult {
                        sku: entry.sku.clone(),
                        created: false,
                        fields: Vec::new(),
                        skipped: Vec::new(),
                        error: Some(err.to_string()),
                    }
                }
            };
            results.push(result);
        }

        let mut summary = ManualSummary {
            received_items: batch.received,
            valid_items: batch.entries.len(),
            invalid_items: batch.invalid.len(),
            duplicate_skus_collapsed: batch.duplicates_collapsed,
            dry_run,
            created: results.iter().filter(|r| r.created && r.error.is_none()).count(),
            updated: results.iter().filter(|r| !r.fields.is_empty() && r.error.is_none()).count(),
            unchanged: results
                .iter()
                .filter(|r| r.fields.is_empty() && !r.created && r.error.is_none())
                .count(),
            errors: results.iter().filter(|r| r.error.is_some()).count(),
            invalid_details: batch.invalid,
            results,
            report_path: None,
        };
        if let Some(dir) = &self.reports_dir {
            let path = write_manual_report(dir, now, &summary).await?;
            summary.report_path = Some(path.display().to_string());
        }
        info!(
            valid = summary.valid_items,
            invalid = summary.invalid_items,
            updated = summary.updated,
            created = summary.created,
            dry_run,
            "manual batch processed"
        );
        Ok(summary)
    }

    async fn apply_entry(
        &self,
        entry: &ManualEntry,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<ManualResult, StoreError> {
        let (record, created) = match self.store.fetch_by_key(&entry.sku).await? {
            Some(record) => (record, false),
            None => {
                let name = format!("Manual Add SKU {}", entry.sku);
                (CatalogRecord::submitted(entry.sku.clone(), Some(&name), now), true)
            }
        };

        let plan = self.policy.merge_manual(&record, &entry.updates, &entry.resets, now);
        if !dry_run {
            if created {
                // A new record lands with its manual fields in a single insert.
                self.store.insert_record(&plan.applied_to(&record, now)).await?;
            } else if !plan.is_empty() {
                self.store.patch_fields(&entry.sku, &plan.writes, now).await?;
            }
        }
        Ok(ManualResult {
            sku: entry.sku.clone(),
            created,
            fields: plan.written_fields().into_iter().map(str::to_string).collect(),
            skipped: plan.skipped.iter().map(|(field, _)| field.to_string()).collect(),
            error: None,
        })
    }
}

/// Write the batch summary to `<root>/manual-enrich/<timestamp>.json`.
pub async fn write_manual_report(root: &Path, at: DateTime<Utc>, summary: &ManualSummary) -> anyhow::Result<PathBuf> {
    let dir = root.join("manual-enrich");
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("{}.json", at.format("%Y%m%dT%H%M%S%.3fZ")));
    let json = serde_json::to_vec_pretty(summary).context("serializing manual summary")?;
    fs::write(&path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cce_core::ProvenanceSource;
    use cce_storage::MemoryCatalogStore;
    use chrono::TimeZone;

    fn sku(raw: &str) -> Sku {
        Sku::parse(raw).unwrap()
    }

    fn ingest(store: Arc<MemoryCatalogStore>) -> ManualIngest {
        ManualIngest::new(store, MergePolicy::new("https://www.homedepot.com"))
    }

    #[test]
    fn strips_command_prefix_and_code_fence() {
        let input = "/manual\n```json\n{\"sku\": \"204518\"}\n```\n";
        assert_eq!(strip_command_wrapping(input), "{\"sku\": \"204518\"}");
        assert_eq!(strip_command_wrapping("  [1, 2] "), "[1, 2]");
    }

    #[test]
    fn accepts_every_payload_shape() {
        let array = parse_manual_payload(r#"[{"sku": "204518", "brand": "Everbilt"}]"#).unwrap();
        let container = parse_manual_payload(r#"{"records": [{"store_sku": "204518", "brandName": "Everbilt"}]}"#).unwrap();
        let single = parse_manual_payload(r#"{"storeSku": 204518, "brand_name": "Everbilt"}"#).unwrap();
        let keyed = parse_manual_payload(r#"{"204518": {"brand": "Everbilt"}}"#).unwrap();

        for batch in [array, container, single, keyed] {
            assert_eq!(batch.entries.len(), 1);
            assert_eq!(batch.entries[0].sku, sku("204518"));
            assert_eq!(
                batch.entries[0].updates,
                vec![FieldUpdate {
                    field: CatalogField::Brand,
                    value: FieldValue::text("Everbilt"),
                }]
            );
        }
    }

    #[test]
    fn normalizes_values_and_distinguishes_null_from_missing() {
        let batch = parse_manual_payload(
            r#"[{"sku": "204518", "upc": null, "retailPrice": "$12.499", "internetSku": "204279858", "title": "  "}]"#,
        )
        .unwrap();
        let updates = &batch.entries[0].updates;
        assert_eq!(
            updates,
            &vec![
                FieldUpdate { field: CatalogField::Name, value: None },
                FieldUpdate { field: CatalogField::Barcode, value: None },
                FieldUpdate { field: CatalogField::NumericId, value: FieldValue::id(204_279_858) },
                FieldUpdate { field: CatalogField::RetailPrice, value: FieldValue::price(12.5) },
            ]
        );
        assert!(updates.iter().all(|u| u.field != CatalogField::Brand));
    }

    #[test]
    fn reports_invalid_items_and_collapses_duplicates() {
        let batch = parse_manual_payload(
            r#"[
                {"sku": "204518", "brand": "Old"},
                {"sku": "1234567890", "brand": "Bad prefix"},
                {"brand": "No sku"},
                {"sku": "409871", "internet_number": "12a"},
                {"sku": "204518", "brand": "New"}
            ]"#,
        )
        .unwrap();
        assert_eq!(batch.received, 5);
        assert_eq!(batch.duplicates_collapsed, 1);
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].updates[0].value, FieldValue::text("New"));
        let reasons: Vec<usize> = batch.invalid.iter().map(|i| i.index).collect();
        assert_eq!(reasons, vec![1, 2, 3]);
        assert_eq!(batch.invalid[1].reason, "missing sku");
    }

    #[test]
    fn reset_list_accepts_field_names_and_aliases() {
        let batch = parse_manual_payload(r#"{"sku": "204518", "reset": ["barcode", "imageUrl"]}"#).unwrap();
        assert_eq!(batch.entries[0].resets, vec![CatalogField::Barcode, CatalogField::ImageUrl]);
        assert!(parse_manual_payload(r#"{"sku": "204518", "reset": ["colour"]}"#)
            .unwrap()
            .entries
            .is_empty());
    }

    #[test]
    fn rejects_non_json_input() {
        assert!(matches!(
            parse_manual_payload("/manual hello"),
            Err(EnrichError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn creates_missing_records_and_writes_manual_provenance() {
        let store = Arc::new(MemoryCatalogStore::new());
        let batch = parse_manual_payload(r#"{"sku": "204518", "brand": "Everbilt", "upc": null}"#).unwrap();
        let summary = ingest(store.clone()).apply(batch, false).await.unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
        let record = store.fetch_by_key(&sku("204518")).await.unwrap().unwrap();
        assert_eq!(record.name(), Some("Manual Add SKU 204518"));
        assert_eq!(record.text(CatalogField::Brand), Some("Everbilt"));
        assert_eq!(record.field(CatalogField::Brand).source(), Some(ProvenanceSource::Manual));
        assert!(record.is_confirmed_absent(CatalogField::Barcode));
        assert_eq!(
            record.text(CatalogField::CanonicalUrl),
            Some("https://www.homedepot.com/s/204518")
        );
    }

    #[tokio::test]
    async fn dry_run_previews_without_writing() {
        let at = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).single().unwrap();
        let store = Arc::new(MemoryCatalogStore::with_records([CatalogRecord::submitted(
            sku("204518"),
            Some("Everbilt Brass Hinge"),
            at,
        )]));
        let dir = tempfile::tempdir().unwrap();
        let batch = parse_manual_payload(r#"[{"sku": "204518", "brand": "Everbilt"}, {"sku": "409871"}]"#).unwrap();
        let summary = ingest(store.clone())
            .with_reports_dir(dir.path())
            .apply(batch, true)
            .await
            .unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.created, 1);
        assert!(store.fetch_by_key(&sku("409871")).await.unwrap().is_none());
        let untouched = store.fetch_by_key(&sku("204518")).await.unwrap().unwrap();
        assert!(!untouched.is_present(CatalogField::Brand));
        let report = PathBuf::from(summary.report_path.unwrap());
        assert!(report.starts_with(dir.path().join("manual-enrich")));
        assert!(report.exists());
    }

    /// Accepts inserts, refuses every patch.
    struct PatchRefusingStore {
        inner: MemoryCatalogStore,
        inserts: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CatalogStore for PatchRefusingStore {
        async fn select_eligible(
            &self,
            filter: &cce_storage::EligibilityFilter,
            limit: usize,
        ) -> Result<Vec<CatalogRecord>, StoreError> {
            self.inner.select_eligible(filter, limit).await
        }

        async fn fetch_by_key(&self, sku: &Sku) -> Result<Option<CatalogRecord>, StoreError> {
            self.inner.fetch_by_key(sku).await
        }

        async fn patch_fields(
            &self,
            sku: &Sku,
            _writes: &cce_storage::FieldWrites,
            _at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Err(StoreError::WriteRejected(format!("patch refused for {sku}")))
        }

        async fn increment_attempt(
            &self,
            sku: &Sku,
            search_term: Option<&str>,
            at: DateTime<Utc>,
        ) -> Result<u32, StoreError> {
            self.inner.increment_attempt(sku, search_term, at).await
        }

        async fn insert_record(&self, record: &CatalogRecord) -> Result<(), StoreError> {
            self.inserts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.insert_record(record).await
        }
    }

    #[tokio::test]
    async fn new_record_is_created_with_its_fields_in_one_write() {
        let store = Arc::new(PatchRefusingStore {
            inner: MemoryCatalogStore::new(),
            inserts: Default::default(),
        });
        let batch = parse_manual_payload(r#"{"sku": "204518", "brand": "Everbilt", "model": "14923"}"#).unwrap();
        let summary = ManualIngest::new(store.clone(), MergePolicy::new("https://www.homedepot.com"))
            .apply(batch, false)
            .await
            .unwrap();

        assert_eq!(summary.errors, 0);
        assert_eq!(summary.created, 1);
        assert_eq!(store.inserts.load(std::sync::atomic::Ordering::SeqCst), 1);
        let record = store.fetch_by_key(&sku("204518")).await.unwrap().unwrap();
        assert_eq!(record.text(CatalogField::Brand), Some("Everbilt"));
        assert_eq!(record.text(CatalogField::ModelNumber), Some("14923"));
        assert_eq!(record.field(CatalogField::Brand).source(), Some(ProvenanceSource::Manual));
    }

    #[tokio::test]
    async fn failed_write_leaves_no_half_created_record() {
        let store = Arc::new(MemoryCatalogStore::new());
        store.reject_writes_for(&sku("204518")).await;
        let batch =
            parse_manual_payload(r#"[{"sku": "204518", "brand": "Everbilt"}, {"sku": "409871", "brand": "DEWALT"}]"#)
                .unwrap();
        let summary = ingest(store.clone()).apply(batch, false).await.unwrap();

        assert_eq!(summary.errors, 1);
        assert_eq!(summary.created, 1);
        let failed = summary.results.iter().find(|r| r.sku == sku("204518")).unwrap();
        assert!(!failed.created);
        assert!(failed.error.as_deref().unwrap().contains("204518"));
        assert!(store.fetch_by_key(&sku("204518")).await.unwrap().is_none());
        let written = store.fetch_by_key(&sku("409871")).await.unwrap().unwrap();
        assert_eq!(written.text(CatalogField::Brand), Some("DEWALT"));
    }
}
