//! Postgres-backed [`CatalogStore`].
//!
//! Values live in typed columns; per-field provenance lives in one JSONB
//! document keyed by field name (`{source, at, confirmed_absent}`). A field
//! with a NULL column and `confirmed_absent = true` is read back as
//! [`FieldState::ConfirmedAbsent`].

use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use cce_core::{
    CatalogField, CatalogRecord, EnrichmentAttempt, Field, FieldProvenance, FieldState, FieldValue,
    Sku,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::info;

use super::{CatalogStore, EligibilityFilter, FieldWrites, StoreError};

const SELECT_COLUMNS: &str = "sku, name, brand, model_number, barcode, image_url, canonical_url, \
     numeric_id, retail_price, provenance, attempt_count, last_attempt_at, last_search_term, \
     submitted_at, updated_at";

/// Apply the bundled SQL migrations.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("applying catalog migrations")?;
    info!("catalog migrations applied");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .context("connecting to catalog database")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn column_for(field: CatalogField) -> &'static str {
    match field {
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

/// SQL predicate: the column is still `unknown` (no value, not confirmed absent).
/// Non-positive numbers decode as unknown in `record_from_row`, so they count here too.
fn unknown_predicate(field: CatalogField) -> String {
    let column = column_for(field);
    let empty = match field {
        CatalogField::NumericId | CatalogField::RetailPrice => format!("({column} IS NULL OR {column} <= 0)"),
        _ => format!("NULLIF(btrim({column}), '') IS NULL"),
    };
    format!(
        "({empty} AND COALESCE((provenance -> '{key}' ->> 'confirmed_absent')::boolean, false) = false)",
        key = field.as_str()
    )
}

fn missing_core_predicate() -> String {
    let single = [
        CatalogField::Name,
        CatalogField::Brand,
        CatalogField::ModelNumber,
        CatalogField::ImageUrl,
        CatalogField::RetailPrice,
    ]
    .into_iter()
    .map(unknown_predicate)
    .collect::<Vec<_>>();
    format!(
        "({} OR ({} AND {}))",
        single.join(" OR "),
        unknown_predicate(CatalogField::CanonicalUrl),
        unknown_predicate(CatalogField::NumericId)
    )
}

fn record_from_row(row: &PgRow) -> Result<CatalogRecord, StoreError> {
    let raw_sku: String = row.try_get("sku")?;
    let sku = Sku::parse(&raw_sku)
        .map_err(|e| StoreError::Malformed(format!("sku {raw_sku}: {e}")))?;
    let Json(provenance): Json<BTreeMap<String, FieldProvenance>> = row.try_get("provenance")?;

    let mut fields = BTreeMap::new();
    for field in CatalogField::ALL {
        let column = column_for(field);
        let value = match field {
            CatalogField::NumericId => row
                .try_get::<Option<i64>, _>(column)?
                .and_then(|v| u64::try_from(v).ok())
                .and_then(FieldValue::id),
            CatalogField::RetailPrice => row
                .try_get::<Option<f64>, _>(column)?
                .and_then(FieldValue::price),
            _ => row
                .try_get::<Option<String>, _>(column)?
                .and_then(FieldValue::text),
        };
        let prov = provenance.get(field.as_str()).cloned();
        let state = match (value, &prov) {
            (Some(v), _) => FieldState::Present(v),
            (None, Some(p)) if p.confirmed_absent => FieldState::ConfirmedAbsent,
            (None, _) => FieldState::Unknown,
        };
        if state != FieldState::Unknown || prov.is_some() {
            fields.insert(field, Field { state, provenance: prov });
        }
    }

    let attempt_count: i32 = row.try_get("attempt_count")?;
    Ok(CatalogRecord {
        sku,
        fields,
        attempt: EnrichmentAttempt {
            count: u32::try_from(attempt_count).unwrap_or(0),
            last_attempt_at: row.try_get("last_attempt_at")?,
            last_search_term: row.try_get("last_search_term")?,
        },
        submitted_at: row.try_get("submitted_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_value_bind(builder: &mut QueryBuilder<'_, Postgres>, field: CatalogField, value: &Field) {
    match field {
        CatalogField::NumericId => {
            let v = value
                .value()
                .and_then(FieldValue::as_id)
                .and_then(|id| i64::try_from(id).ok());
            builder.push_bind(v);
        }
        CatalogField::RetailPrice => {
            builder.push_bind(value.value().and_then(FieldValue::as_price));
        }
        _ => {
            builder.push_bind(value.value().and_then(FieldValue::as_text).map(str::to_string));
        }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn select_eligible(
        &self,
        filter: &EligibilityFilter,
        limit: usize,
    ) -> Result<Vec<CatalogRecord>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {SELECT_COLUMNS} FROM catalog_records WHERE attempt_count < "
        ));
        builder.push_bind(i32::try_from(filter.max_attempts).unwrap_or(i32::MAX));
        if let Some(after) = filter.submitted_after {
            builder.push(" AND submitted_at >= ").push_bind(after);
        }
        if filter.require_missing_core {
            builder.push(" AND ").push(missing_core_predicate());
        }
        builder
            .push(" ORDER BY submitted_at DESC LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn fetch_by_key(&self, sku: &Sku) -> Result<Option<CatalogRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM catalog_records WHERE sku = $1"
        ))
        .bind(sku.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn patch_fields(
        &self,
        sku: &Sku,
        writes: &FieldWrites,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut cleared: Vec<String> = Vec::new();
        let mut merged: BTreeMap<String, FieldProvenance> = BTreeMap::new();
        for (field, value) in writes {
            match &value.provenance {
                Some(p) => {
                    merged.insert(field.as_str().to_string(), p.clone());
                }
                None => cleared.push(field.as_str().to_string()),
            }
        }

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE catalog_records SET ");
        for (field, value) in writes {
            builder.push(column_for(*field)).push(" = ");
            push_value_bind(&mut builder, *field, value);
            builder.push(", ");
        }
        builder
            .push("provenance = (provenance - ")
            .push_bind(cleared)
            .push("::text[]) || ")
            .push_bind(Json(merged))
            .push(", updated_at = ")
            .push_bind(at)
            .push(" WHERE sku = ")
            .push_bind(sku.as_str().to_string());

        let result = builder.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(sku.clone()));
        }
        Ok(())
    }

    async fn increment_attempt(
        &self,
        sku: &Sku,
        search_term: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE catalog_records
               SET attempt_count = attempt_count + 1,
                   last_attempt_at = $2,
                   last_search_term = COALESCE($3, last_search_term),
                   updated_at = $2
             WHERE sku = $1
         RETURNING attempt_count
            "#,
        )
        .bind(sku.as_str())
        .bind(at)
        .bind(search_term)
        .fetch_optional(&self.pool)
        .await?;

        count
            .map(|c| u32::try_from(c).unwrap_or(0))
            .ok_or_else(|| StoreError::NotFound(sku.clone()))
    }

    async fn insert_record(&self, record: &CatalogRecord) -> Result<(), StoreError> {
        let provenance = record
            .fields
            .iter()
            .filter_map(|(f, v)| v.provenance.clone().map(|p| (f.as_str().to_string(), p)))
            .collect::<BTreeMap<_, _>>();

        let mut builder = QueryBuilder::<Postgres>::new("INSERT INTO catalog_records (sku, ");
        for field in CatalogField::ALL {
            builder.push(column_for(field)).push(", ");
        }
        builder.push("provenance, attempt_count, last_attempt_at, last_search_term, submitted_at, updated_at) VALUES (");
        builder.push_bind(record.sku.as_str().to_string()).push(", ");
        for field in CatalogField::ALL {
            push_value_bind(&mut builder, field, &record.field(field));
            builder.push(", ");
        }
        builder
            .push_bind(Json(provenance))
            .push(", ")
            .push_bind(i32::try_from(record.attempt.count).unwrap_or(i32::MAX))
            .push(", ")
            .push_bind(record.attempt.last_attempt_at)
            .push(", ")
            .push_bind(record.attempt.last_search_term.clone())
            .push(", ")
            .push_bind(record.submitted_at)
            .push(", ")
            .push_bind(record.updated_at)
            .push(") ON CONFLICT (sku) DO NOTHING");

        let result = builder.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(record.sku.clone()));
        }
        Ok(())
    }
}
