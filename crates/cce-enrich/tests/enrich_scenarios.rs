use std::path::PathBuf;
use std::sync::Arc;

use cce_core::{CatalogField, CatalogRecord, Field, ProvenanceSource, Sku};
use cce_enrich::{
    CandidateMatcher, Governor, MergeMode, MergePolicy, NameCleaner, RecordStatus, RunRequest, SearchSequencer,
    Strategy,
};
use cce_providers::{FixtureProvider, ProviderCall};
use cce_storage::{CatalogStore, EligibilityFilter, MemoryCatalogStore};
use chrono::{DateTime, TimeZone, Utc};

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn load(name: &str) -> Arc<FixtureProvider> {
    Arc::new(FixtureProvider::load(workspace_root().join("fixtures/provider").join(name)).unwrap())
}

fn submitted_at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).single().unwrap()
}

fn sku(raw: &str) -> Sku {
    Sku::parse(raw).unwrap()
}

fn record(raw_sku: &str, name: &str, day: u32) -> CatalogRecord {
    CatalogRecord::submitted(sku(raw_sku), Some(name), submitted_at(day))
}

fn governor(store: Arc<MemoryCatalogStore>, provider: Arc<FixtureProvider>) -> Governor {
    let sequencer = SearchSequencer::new(provider, CandidateMatcher::default(), NameCleaner::default(), "30303");
    Governor::new(
        store,
        sequencer,
        MergePolicy::new("https://www.homedepot.com"),
        EligibilityFilter::default(),
    )
}

fn request(mode: MergeMode) -> RunRequest {
    RunRequest {
        limit: 10,
        sku: None,
        mode,
        dry_run: false,
    }
}

#[tokio::test]
async fn name_only_record_is_filled_from_identifier_search() {
    let store = Arc::new(MemoryCatalogStore::with_records([record("1001234567", "Everbilt Brass Hinge", 1)]));
    let summary = governor(store.clone(), load("sku_hit_without_product_id.json"))
        .run(request(MergeMode::FillBlanksOnly))
        .await
        .unwrap();

    assert_eq!(summary.enriched, 1);
    assert_eq!(summary.credits_used, 1);
    assert_eq!(summary.records[0].strategy, Some(Strategy::Identifier));

    let enriched = store.fetch_by_key(&sku("1001234567")).await.unwrap().unwrap();
    assert_eq!(enriched.name(), Some("Everbilt Brass Hinge"));
    assert_eq!(enriched.field(CatalogField::Name).source(), Some(ProvenanceSource::Community));
    assert_eq!(enriched.text(CatalogField::Brand), Some("EVERBILT"));
    assert_eq!(enriched.text(CatalogField::ModelNumber), Some("14923"));
    assert_eq!(enriched.retail_price(), Some(4.98));
    assert_eq!(
        enriched.text(CatalogField::ImageUrl),
        Some("https://images.thdstatic.com/productImages/9c1e/svn/1000.jpg")
    );
    assert_eq!(
        enriched.text(CatalogField::CanonicalUrl),
        Some("https://www.homedepot.com/s/1001234567")
    );
    assert_eq!(enriched.field(CatalogField::Brand).source(), Some(ProvenanceSource::ProviderSearch));
    assert_eq!(enriched.attempt.count, 0);
}

#[tokio::test]
async fn identifier_hit_with_numeric_id_pulls_barcode_from_detail() {
    let store = Arc::new(MemoryCatalogStore::with_records([record("409871", "DeWalt 20V Cordless Drill Kit", 1)]));
    let summary = governor(store.clone(), load("sku_hit_with_detail.json"))
        .run(request(MergeMode::FillBlanksOnly))
        .await
        .unwrap();

    assert_eq!(summary.credits_used, 2);
    assert_eq!(
        summary.records[0].product_link.as_deref(),
        Some("https://www.homedepot.com/p/DEWALT-20V-MAX-Cordless-1-2-in-Drill-Driver-2-20V-1-3Ah-Batteries-Charger-and-Bag-DCD771C2/204279858")
    );
    let brief = cce_enrich::governor::render_brief(&summary);
    assert!(brief.contains("<https://www.homedepot.com/p/"));
    let enriched = store.fetch_by_key(&sku("409871")).await.unwrap().unwrap();
    assert_eq!(enriched.text(CatalogField::Barcode), Some("885911425308"));
    assert_eq!(enriched.numeric_id(), Some(204_279_858));
    assert_eq!(
        enriched.text(CatalogField::CanonicalUrl),
        Some("https://www.homedepot.com/p/204279858")
    );
    assert!(enriched.missing_core_fields().is_empty());
}

#[tokio::test]
async fn unrelated_fallback_result_counts_as_a_no_match_attempt() {
    let store = Arc::new(MemoryCatalogStore::with_records([record("305612", "Copper Pipe Cap 2 in. HX45120", 1)]));
    let provider = load("name_fallback_mismatch.json");
    let summary = governor(store.clone(), provider.clone())
        .run(request(MergeMode::FillBlanksOnly))
        .await
        .unwrap();

    assert_eq!(summary.no_match, 1);
    assert_eq!(summary.credits_used, 2);
    assert_eq!(summary.records[0].status, RecordStatus::NoMatch { attempt_count: 1 });
    assert_eq!(
        provider.calls().await,
        vec![
            ProviderCall::Search {
                term: "305612".to_string(),
                region: "30303".to_string()
            },
            ProviderCall::Search {
                term: "Copper Pipe Cap".to_string(),
                region: "30303".to_string()
            },
        ]
    );

    assert_eq!(summary.records[0].product_link, None);
    let after = store.fetch_by_key(&sku("305612")).await.unwrap().unwrap();
    assert_eq!(after.attempt.count, 1);
    assert_eq!(after.attempt.last_search_term.as_deref(), Some("Copper Pipe Cap"));
    assert!(after.attempt.last_attempt_at.is_some());
    assert!(!after.is_present(CatalogField::Brand));
}

#[tokio::test]
async fn record_is_excluded_after_two_no_match_runs() {
    let store = Arc::new(MemoryCatalogStore::with_records([record("305612", "Copper Pipe Cap 2 in. HX45120", 1)]));
    let gov = governor(store.clone(), load("name_fallback_mismatch.json"));

    for _ in 0..2 {
        gov.run(request(MergeMode::FillBlanksOnly)).await.unwrap();
    }
    let third = gov.run(request(MergeMode::Force)).await.unwrap();

    assert_eq!(third.selected, 0);
    assert_eq!(third.credits_used, 0);
    let after = store.fetch_by_key(&sku("305612")).await.unwrap().unwrap();
    assert_eq!(after.attempt.count, 2);
}

#[tokio::test]
async fn quota_exhaustion_aborts_without_touching_attempts() {
    let store = Arc::new(MemoryCatalogStore::with_records([
        record("204518", "Everbilt Brass Hinge", 2),
        record("409871", "DeWalt 20V Cordless Drill Kit", 1),
    ]));
    let summary = governor(store.clone(), load("quota_exhausted.json"))
        .run(request(MergeMode::FillBlanksOnly))
        .await
        .unwrap();

    assert!(summary.aborted());
    assert!(summary.aborted_reason.as_deref().unwrap().contains("plan limit exceeded"));
    assert_eq!(summary.selected, 2);
    assert_eq!(summary.credits_used, 1);
    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.records[0].status, RecordStatus::Aborted);

    for record in store.snapshot().await {
        assert_eq!(record.attempt.count, 0);
        assert!(record.attempt.last_attempt_at.is_none());
    }
}

#[tokio::test]
async fn quota_on_the_detail_call_discards_the_matched_candidate() {
    let store = Arc::new(MemoryCatalogStore::with_records([record("409871", "DeWalt 20V Cordless Drill Kit", 1)]));
    let provider = load("detail_quota_exhausted.json");
    let summary = governor(store.clone(), provider.clone())
        .run(request(MergeMode::FillBlanksOnly))
        .await
        .unwrap();

    assert!(summary.aborted());
    assert!(summary.aborted_reason.as_deref().unwrap().contains("plan limit exceeded"));
    assert_eq!(summary.credits_used, 2);
    assert_eq!(summary.enriched, 0);
    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.records[0].status, RecordStatus::Aborted);
    assert_eq!(summary.records[0].credits_used, 2);
    assert_eq!(
        provider.calls().await,
        vec![
            ProviderCall::Search {
                term: "409871".to_string(),
                region: "30303".to_string()
            },
            ProviderCall::Detail {
                numeric_id: 204_279_858,
                region: "30303".to_string()
            },
        ]
    );

    let after = store.fetch_by_key(&sku("409871")).await.unwrap().unwrap();
    assert!(!after.is_present(CatalogField::Brand));
    assert!(!after.is_present(CatalogField::Barcode));
    assert_eq!(after.numeric_id(), None);
    assert_eq!(after.updated_at, submitted_at(1));
    assert_eq!(after.attempt.count, 0);
    assert!(after.attempt.last_attempt_at.is_none());
}

#[tokio::test]
async fn fill_blanks_keeps_existing_values_and_force_overwrites_them() {
    let mut seeded = record("1001234567", "Everbilt Brass Hinge", 1);
    seeded.set_field(
        CatalogField::Brand,
        Field::present(cce_core::FieldValue::Text("Evrbilt".into()), ProvenanceSource::Community, submitted_at(1)),
    );
    let store = Arc::new(MemoryCatalogStore::with_records([seeded]));
    let gov = governor(store.clone(), load("sku_hit_without_product_id.json"));

    gov.run(request(MergeMode::FillBlanksOnly)).await.unwrap();
    let filled = store.fetch_by_key(&sku("1001234567")).await.unwrap().unwrap();
    assert_eq!(filled.text(CatalogField::Brand), Some("Evrbilt"));
    assert_eq!(filled.text(CatalogField::ModelNumber), Some("14923"));

    let forced = gov
        .run(RunRequest {
            sku: Some(sku("1001234567")),
            ..request(MergeMode::Force)
        })
        .await
        .unwrap();
    assert_eq!(forced.enriched, 1);
    let after = store.fetch_by_key(&sku("1001234567")).await.unwrap().unwrap();
    assert_eq!(after.text(CatalogField::Brand), Some("EVERBILT"));
    assert_eq!(after.name(), Some("Satin Nickel Door Hinge"));
}

#[tokio::test]
async fn confirmed_absent_barcode_skips_the_detail_call_and_stays_absent() {
    let mut seeded = record("409871", "DeWalt 20V Cordless Drill Kit", 1);
    seeded.set_field(
        CatalogField::Barcode,
        Field::confirmed_absent(ProvenanceSource::Manual, submitted_at(2)),
    );
    let store = Arc::new(MemoryCatalogStore::with_records([seeded]));
    let provider = load("sku_hit_with_detail.json");
    let summary = governor(store.clone(), provider.clone())
        .run(request(MergeMode::Force))
        .await
        .unwrap();

    assert_eq!(summary.credits_used, 1);
    assert!(provider
        .calls()
        .await
        .iter()
        .all(|call| matches!(call, ProviderCall::Search { .. })));
    let after = store.fetch_by_key(&sku("409871")).await.unwrap().unwrap();
    assert!(after.is_confirmed_absent(CatalogField::Barcode));
    assert_eq!(after.numeric_id(), Some(204_279_858));
}
