//! Core catalog model and provenance types for CCE.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "cce-core";

/// Attempts after which a record is no longer selected for provider enrichment.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkuError {
    #[error("enter a SKU to continue")]
    Empty,
    #[error("SKU must be 6 or 10 digits (got {0})")]
    BadLength(usize),
    #[error("10-digit SKUs must start with 100 or 101; {0} looks like a UPC/barcode")]
    BadPrefix(String),
    #[error("SKU {0} looks like a placeholder")]
    Placeholder(String),
    #[error("SKU {0} is a repeating pattern")]
    RepeatingPattern(String),
}

/// Normalized store-level identifier: 6 digits, or 10 digits starting with `100`/`101`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sku(String);

impl Sku {
    pub fn parse(raw: &str) -> Result<Self, SkuError> {
        let digits = normalize_digits(raw);
        if digits.is_empty() {
            return Err(SkuError::Empty);
        }
        if digits.len() != 6 && digits.len() != 10 {
            return Err(SkuError::BadLength(digits.len()));
        }
        if digits.len() == 10 && !digits.starts_with("100") && !digits.starts_with("101") {
            return Err(SkuError::BadPrefix(digits));
        }
        if is_all_same_digit(&digits) {
            return Err(SkuError::Placeholder(digits));
        }
        if is_repeated_pattern(&digits) {
            return Err(SkuError::RepeatingPattern(digits));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Sku {
    type Error = SkuError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Sku::parse(&value)
    }
}

impl From<Sku> for String {
    fn from(value: Sku) -> Self {
        value.0
    }
}

/// Keep ASCII digits only.
pub fn normalize_digits(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn is_all_same_digit(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => false,
    }
}

fn is_repeated_pattern(value: &str) -> bool {
    let len = value.len();
    (2..=len / 2)
        .filter(|size| len % size == 0)
        .any(|size| value[..size].repeat(len / size) == value)
}

/// Catalog fields the enrichment engine may fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogField {
    Name,
    Brand,
    ModelNumber,
    Barcode,
    ImageUrl,
    CanonicalUrl,
    NumericId,
    RetailPrice,
}

impl CatalogField {
    pub const ALL: [CatalogField; 8] = [
        CatalogField::Name,
        CatalogField::Brand,
        CatalogField::ModelNumber,
        CatalogField::Barcode,
        CatalogField::ImageUrl,
        CatalogField::CanonicalUrl,
        CatalogField::NumericId,
        CatalogField::RetailPrice,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CatalogField::Name => "name",
            CatalogField::Brand => "brand",
            CatalogField::ModelNumber => "model_number",
            CatalogField::Barcode => "barcode",
            CatalogField::ImageUrl => "image_url",
            CatalogField::CanonicalUrl => "canonical_url",
            CatalogField::NumericId => "numeric_id",
            CatalogField::RetailPrice => "retail_price",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for CatalogField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who last set a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvenanceSource {
    Community,
    Cache,
    ProviderSearch,
    Manual,
}

impl ProvenanceSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvenanceSource::Community => "community",
            ProvenanceSource::Cache => "cache",
            ProvenanceSource::ProviderSearch => "provider-search",
            ProvenanceSource::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub source: ProvenanceSource,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub confirmed_absent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Id(u64),
    Price(f64),
}

impl FieldValue {
    /// Trimmed text, or `None` when blank.
    pub fn text(value: impl AsRef<str>) -> Option<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(FieldValue::Text(trimmed.to_string()))
        }
    }

    /// Positive finite prices only.
    pub fn price(value: f64) -> Option<Self> {
        if value.is_finite() && value > 0.0 {
            Some(FieldValue::Price(value))
        } else {
            None
        }
    }

    pub fn id(value: u64) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(FieldValue::Id(value))
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<u64> {
        match self {
            FieldValue::Id(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_price(&self) -> Option<f64> {
        match self {
            FieldValue::Price(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Id(v) => write!(f, "{v}"),
            FieldValue::Price(v) => write!(f, "{v:.2}"),
        }
    }
}

/// Tri-state field value: never checked, present, or checked and found to have no value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "value")]
pub enum FieldState {
    #[default]
    Unknown,
    Present(FieldValue),
    ConfirmedAbsent,
}

/// Canonical field wrapper: tri-state value + provenance of the last write.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Field {
    pub state: FieldState,
    pub provenance: Option<FieldProvenance>,
}

impl Field {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn present(value: FieldValue, source: ProvenanceSource, at: DateTime<Utc>) -> Self {
        Self {
            state: FieldState::Present(value),
            provenance: Some(FieldProvenance {
                source,
                at,
                confirmed_absent: false,
            }),
        }
    }

    pub fn confirmed_absent(source: ProvenanceSource, at: DateTime<Utc>) -> Self {
        Self {
            state: FieldState::ConfirmedAbsent,
            provenance: Some(FieldProvenance {
                source,
                at,
                confirmed_absent: true,
            }),
        }
    }

    pub fn value(&self) -> Option<&FieldValue> {
        match &self.state {
            FieldState::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self.state, FieldState::Present(_))
    }

    pub fn is_confirmed_absent(&self) -> bool {
        matches!(self.state, FieldState::ConfirmedAbsent)
    }

    pub fn source(&self) -> Option<ProvenanceSource> {
        self.provenance.as_ref().map(|p| p.source)
    }
}

/// Per-record provider enrichment attempts. Only a fully exhausted no-match increments `count`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnrichmentAttempt {
    pub count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_search_term: Option<String>,
}

impl EnrichmentAttempt {
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.count >= max_attempts
    }
}

/// Persisted, authoritative catalog entry for one SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub sku: Sku,
    #[serde(default)]
    pub fields: BTreeMap<CatalogField, Field>,
    #[serde(default)]
    pub attempt: EnrichmentAttempt,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogRecord {
    /// A crowd-submitted record: SKU plus an optional community-supplied name.
    pub fn submitted(sku: Sku, name: Option<&str>, at: DateTime<Utc>) -> Self {
        let mut record = Self {
            sku,
            fields: BTreeMap::new(),
            attempt: EnrichmentAttempt::default(),
            submitted_at: at,
            updated_at: at,
        };
        if let Some(value) = name.and_then(FieldValue::text) {
            record.set_field(
                CatalogField::Name,
                Field::present(value, ProvenanceSource::Community, at),
            );
        }
        record
    }

    pub fn field(&self, field: CatalogField) -> Field {
        self.fields.get(&field).cloned().unwrap_or_default()
    }

    pub fn field_ref(&self, field: CatalogField) -> Option<&Field> {
        self.fields.get(&field)
    }

    pub fn set_field(&mut self, field: CatalogField, value: Field) {
        self.fields.insert(field, value);
    }

    pub fn value(&self, field: CatalogField) -> Option<&FieldValue> {
        self.fields.get(&field).and_then(Field::value)
    }

    pub fn text(&self, field: CatalogField) -> Option<&str> {
        self.value(field).and_then(FieldValue::as_text)
    }

    pub fn name(&self) -> Option<&str> {
        self.text(CatalogField::Name)
    }

    pub fn numeric_id(&self) -> Option<u64> {
        self.value(CatalogField::NumericId).and_then(FieldValue::as_id)
    }

    pub fn retail_price(&self) -> Option<f64> {
        self.value(CatalogField::RetailPrice)
            .and_then(FieldValue::as_price)
    }

    pub fn is_present(&self, field: CatalogField) -> bool {
        self.fields.get(&field).is_some_and(Field::is_present)
    }

    pub fn is_confirmed_absent(&self, field: CatalogField) -> bool {
        self.fields.get(&field).is_some_and(Field::is_confirmed_absent)
    }

    /// Core fields still `unknown`. URL and numeric id count as one slot; confirmed-absent is not missing.
    pub fn missing_core_fields(&self) -> Vec<&'static str> {
        let unknown = |f: CatalogField| !self.is_present(f) && !self.is_confirmed_absent(f);
        let mut missing = Vec::new();
        for field in [
            CatalogField::Name,
            CatalogField::Brand,
            CatalogField::ModelNumber,
            CatalogField::ImageUrl,
        ] {
            if unknown(field) {
                missing.push(field.as_str());
            }
        }
        if unknown(CatalogField::CanonicalUrl) && unknown(CatalogField::NumericId) {
            missing.push("canonical_url/numeric_id");
        }
        if unknown(CatalogField::RetailPrice) {
            missing.push(CatalogField::RetailPrice.as_str());
        }
        missing
    }
}

/// Ephemeral per-query provider result. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub title: Option<String>,
    pub brand: Option<String>,
    pub model_number: Option<String>,
    pub numeric_id: Option<u64>,
    #[serde(default)]
    pub image_candidates: Vec<String>,
    pub price: Option<f64>,
    /// Public product page. Reported per record, never merged.
    pub link: Option<String>,
    /// Filled by the detail sub-call, never by search.
    pub barcode: Option<String>,
}

impl SearchCandidate {
    /// Values this candidate supplies, in field order. The canonical URL is derived, never supplied.
    pub fn field_values(&self) -> Vec<(CatalogField, FieldValue)> {
        let mut out = Vec::new();
        let mut push_text = |field: CatalogField, value: &Option<String>| {
            if let Some(v) = value.as_deref().and_then(FieldValue::text) {
                out.push((field, v));
            }
        };
        push_text(CatalogField::Name, &self.title);
        push_text(CatalogField::Brand, &self.brand);
        push_text(CatalogField::ModelNumber, &self.model_number);
        push_text(CatalogField::Barcode, &self.barcode);
        push_text(CatalogField::ImageUrl, &self.image_candidates.first().cloned());
        if let Some(v) = self.numeric_id.and_then(FieldValue::id) {
            out.push((CatalogField::NumericId, v));
        }
        if let Some(v) = self.price.and_then(FieldValue::price) {
            out.push((CatalogField::RetailPrice, v));
        }
        out
    }
}

/// Canonical product URL by priority: manual URL, numeric id page, SKU search page, retailer root.
pub fn canonical_product_url(
    retailer_base: &str,
    manual_url: Option<&str>,
    numeric_id: Option<u64>,
    sku: Option<&Sku>,
) -> String {
    if let Some(url) = manual_url.map(str::trim).filter(|u| !u.is_empty()) {
        return url.to_string();
    }
    let base = retailer_base.trim_end_matches('/');
    if let Some(id) = numeric_id.filter(|id| *id > 0) {
        return format!("{base}/p/{id}");
    }
    if let Some(sku) = sku {
        return format!("{base}/s/{sku}");
    }
    format!("{base}/")
}
