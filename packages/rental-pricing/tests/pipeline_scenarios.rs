//! End-to-end pipeline runs against mock sites.
//!
//! Pages are served by `MockFetcher` as JSON bodies and read back with the
//! `JsonRecordExtractor`, so every stage runs for real:
//! list page → listings → detail pass → backfill → dedup → table.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rental_pricing::extractors::JsonRecordExtractor;
use rental_pricing::pipeline::diagnostics::count;
use rental_pricing::pipeline::listing_jobs;
use rental_pricing::testing::MockFetcher;
use rental_pricing::{
    run_pipeline, run_sources, Catalog, CatalogEntry, ContractType, DurationPartition, EventKind,
    PipelineConfig, Source, SourceProfile, SourceRegistry,
};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LIST_URL: &str = "https://drive.test/search/TOYOTA/CAMRY?duration_months=9&is_monthly=true";
const CAR_URL: &str = "https://drive.test/car/42?duration_months=9&is_monthly=true";

/// Route pipeline logs to the test output; `RUST_LOG=rental_pricing=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rental_pricing=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn camry_catalog() -> Catalog {
    Catalog::new([CatalogEntry::new("TOYOTA", "CAMRY", 2023)])
}

fn monthly_profile() -> SourceProfile {
    SourceProfile::new("drive")
        .with_list_page(
            ContractType::Monthly,
            "https://drive.test/search/{make}/{model}?duration_months=9&is_monthly=true",
        )
        .with_duration_param("duration_months")
        .with_partition(ContractType::Monthly, DurationPartition::monthly())
        .with_coverage_check()
}

fn tier(duration: &str, price: u32) -> Value {
    json!({
        "duration": duration,
        "base_price": price + 100,
        "offered_price": price,
        "savings": 100,
        "mileage": "4000 km"
    })
}

fn source(profile: SourceProfile, fetcher: &MockFetcher) -> Source {
    Source::new(
        profile,
        Arc::new(fetcher.clone()),
        Arc::new(JsonRecordExtractor::new()),
    )
}

fn durations(report: &rental_pricing::RunReport) -> Vec<String> {
    report
        .table
        .rows
        .iter()
        .map(|r| r.duration.clone().unwrap_or_default())
        .collect()
}

#[tokio::test]
async fn test_missing_buckets_are_backfilled_once() {
    init_tracing();
    let fetcher = MockFetcher::new()
        .with_page(
            LIST_URL,
            json!([{"sub-url": CAR_URL, "year": 2023, "ratings": "4.9"}]).to_string(),
        )
        // Primary page only exposes buckets "1" and "4-6"
        .with_page(CAR_URL, json!([tier("1 month", 3000), tier("5 months", 2700)]).to_string())
        // The 2-3 alternate repeats the 1 month tier verbatim
        .with_page(
            "https://drive.test/car/42?duration_months=2&is_monthly=true",
            json!([tier("3 months", 2900), tier("1 month", 3000)]).to_string(),
        )
        .with_page(
            "https://drive.test/car/42?duration_months=7&is_monthly=true",
            json!([tier("9 months", 2600)]).to_string(),
        )
        .with_page(
            "https://drive.test/car/42?duration_months=10&is_monthly=true",
            json!([tier("12 months", 2500)]).to_string(),
        );

    let report = run_pipeline(
        &source(monthly_profile(), &fetcher),
        &camry_catalog(),
        &PipelineConfig::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.summary.backfill_requests, 3);
    assert_eq!(report.summary.duplicates_dropped, 1);
    assert!(report.missing.is_empty());
    assert_eq!(
        durations(&report),
        vec!["1 month", "3 months", "5 months", "9 months", "12 months"]
    );
    assert!(report
        .table
        .rows
        .iter()
        .all(|r| r.contract_type == ContractType::Monthly && r.make == "TOYOTA"));

    // One list page, one primary, three alternates; nothing fetched twice
    assert_eq!(fetcher.calls().len(), 5);
    assert_eq!(fetcher.call_count(CAR_URL), 1);
    assert_eq!(count(&report.diagnostics, EventKind::BackfillIssued), 3);
    assert_eq!(count(&report.diagnostics, EventKind::BucketMissing), 0);
    assert_eq!(count(&report.diagnostics, EventKind::RunCompleted), 1);
}

#[tokio::test]
async fn test_unmet_bucket_is_reported_not_retried() {
    let fetcher = MockFetcher::new()
        .with_page(LIST_URL, json!([{"sub-url": CAR_URL, "year": 2023}]).to_string())
        .with_page(
            CAR_URL,
            json!([tier("1 month", 3000), tier("3 months", 2900), tier("6 months", 2800)]).to_string(),
        )
        .with_page(
            "https://drive.test/car/42?duration_months=7&is_monthly=true",
            json!([tier("9 months", 2600)]).to_string(),
        )
        .timeout_url("https://drive.test/car/42?duration_months=10&is_monthly=true");

    let config = PipelineConfig::new().with_page_timeout(Duration::from_millis(50));
    let report = run_pipeline(&source(monthly_profile(), &fetcher), &camry_catalog(), &config)
        .await
        .unwrap();

    assert_eq!(report.table.len(), 4);
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].buckets, vec!["10+"]);
    assert!(!report.missing[0].broken);
    assert_eq!(
        fetcher.call_count("https://drive.test/car/42?duration_months=10&is_monthly=true"),
        1
    );
    assert_eq!(count(&report.diagnostics, EventKind::DetailTimeout), 1);
    assert_eq!(count(&report.diagnostics, EventKind::BucketMissing), 1);
}

#[tokio::test]
async fn test_duplicate_lookup_key_is_fetched_once() {
    let profile = SourceProfile::new("drive")
        .with_list_page(ContractType::Daily, "https://drive.test/search/{make}/{model}")
        .with_duration_param("duration_months");
    let first = "https://drive.test/car/7?duration_months=9&is_monthly=true";
    let second = "https://drive.test/car/7?is_monthly=true&duration_months=3";

    let fetcher = MockFetcher::new()
        .with_page(
            "https://drive.test/search/TOYOTA/CAMRY",
            json!([
                {"sub-url": first, "year": 2023},
                {"sub-url": second, "year": 2023}
            ])
            .to_string(),
        )
        .with_page(first, json!([tier("1 day", 150)]).to_string())
        .with_page(second, json!([tier("1 day", 150)]).to_string());

    let report = run_pipeline(&source(profile, &fetcher), &camry_catalog(), &PipelineConfig::new())
        .await
        .unwrap();

    assert_eq!(report.summary.listings_loaded, 2);
    assert_eq!(report.summary.listings_retained, 1);
    assert_eq!(report.table.len(), 1);
    assert_eq!(fetcher.call_count(first), 1);
    assert_eq!(fetcher.call_count(second), 0);
    assert_eq!(count(&report.diagnostics, EventKind::DuplicateSkipped), 1);
}

#[tokio::test]
async fn test_admission_limit_holds_end_to_end() {
    let profile = SourceProfile::new("drive")
        .with_list_page(ContractType::Weekly, "https://drive.test/search/{make}/{model}");

    let cars: Vec<String> = (0..20).map(|i| format!("https://drive.test/car/{i}")).collect();
    let listings: Vec<Value> = cars.iter().map(|c| json!({"sub-url": c, "year": 2023})).collect();

    let mut fetcher = MockFetcher::new()
        .with_default_delay(Duration::from_millis(5))
        .with_page("https://drive.test/search/TOYOTA/CAMRY", Value::from(listings).to_string());
    for car in &cars {
        fetcher = fetcher.with_page(car, json!([tier("1 week", 900)]).to_string());
    }

    let config = PipelineConfig::new().with_concurrency(3);
    let report = run_pipeline(&source(profile, &fetcher), &camry_catalog(), &config)
        .await
        .unwrap();

    assert_eq!(report.table.len(), 20);
    assert_eq!(fetcher.calls().len(), 21);
    assert!(fetcher.peak_in_flight() <= 3);
}

#[tokio::test]
async fn test_failed_listing_keeps_a_null_row() {
    init_tracing();
    let slow_car = "https://drive.test/car/43?duration_months=9&is_monthly=true";
    let fetcher = MockFetcher::new()
        .with_page(
            LIST_URL,
            json!([
                {"sub-url": CAR_URL, "year": 2023},
                {"sub-url": slow_car, "year": 2023}
            ])
            .to_string(),
        )
        .with_page(
            CAR_URL,
            json!([
                tier("1 month", 3000),
                tier("3 months", 2900),
                tier("6 months", 2800),
                tier("9 months", 2700),
                tier("12 months", 2600)
            ])
            .to_string(),
        )
        .timeout_url(slow_car);

    let config = PipelineConfig::new().with_page_timeout(Duration::from_millis(50));
    let report = run_pipeline(&source(monthly_profile(), &fetcher), &camry_catalog(), &config)
        .await
        .unwrap();

    assert_eq!(report.table.len(), 6);
    let broken: Vec<_> = report
        .table
        .rows
        .iter()
        .filter(|r| !r.has_contract_data())
        .collect();
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].listing_key.as_str(), "https://drive.test/car/43?is_monthly=true");

    // Broken listings are not backfilled
    assert_eq!(report.summary.backfill_requests, 0);
    assert_eq!(report.missing.len(), 1);
    assert!(report.missing[0].broken);
    assert_eq!(count(&report.diagnostics, EventKind::NoContractData), 1);
}

#[tokio::test]
async fn test_yango_profile_collapses_buckets() {
    let now = Utc.with_ymd_and_hms(2025, 7, 8, 6, 0, 0).unwrap();
    let profile = SourceProfile::yango(now);
    let catalog = Catalog::new([CatalogEntry::new("toyota", "camry", 2023)]);
    let jobs = listing_jobs(&profile, &catalog);
    let monthly = jobs
        .iter()
        .find(|j| j.context.contract_type == ContractType::Monthly)
        .unwrap();

    let car = "https://drive.yango.com/car/abc?duration_months=9&is_monthly=true";
    let mut fetcher = MockFetcher::new()
        .with_page(&monthly.url, json!([{"sub-url": car, "year": 2023}]).to_string())
        .with_page(
            car,
            json!([
                tier("1 month", 3000),
                tier("2 months", 2950),
                tier("3 months", 2900),
                tier("4 months", 2850),
                tier("6 months", 2800),
                tier("7 months", 2750),
                tier("9 months", 2700),
                tier("10 months", 2650),
                tier("12 months", 2600)
            ])
            .to_string(),
        );
    for job in jobs.iter().filter(|j| j.context.contract_type != ContractType::Monthly) {
        fetcher = fetcher.with_page(&job.url, "[]");
    }

    let report = run_pipeline(&source(profile, &fetcher), &catalog, &PipelineConfig::new())
        .await
        .unwrap();

    assert_eq!(
        durations(&report),
        vec!["1 month", "3 months", "6 months", "9 months", "12 months"]
    );
    let urls: Vec<&str> = report.table.rows.iter().map(|r| r.source_url.as_str()).collect();
    assert_eq!(urls[1], "https://drive.yango.com/car/abc?duration_months=2&is_monthly=true");
    assert_eq!(urls[4], "https://drive.yango.com/car/abc?duration_months=10&is_monthly=true");
    assert_eq!(report.summary.backfill_requests, 0);

    let first = report.table.records().next().unwrap();
    assert_eq!(first["title"], "toyota camry 2023");
    assert_eq!(first["mileage"], "4000 km");
    assert_eq!(first["offered_price"], 3000.0);
    assert_eq!(first.keys().count(), report.table.schema.columns().len());
}

#[tokio::test]
async fn test_run_sources_with_catalog_file() {
    init_tracing();
    let path = std::env::temp_dir().join(format!("catalog-{}.csv", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        "make,year,invygo_model,yango_model\nToyota,2023,Camry,camry\nKia,2024,,rio\n",
    )
    .unwrap();

    let fetcher = MockFetcher::new()
        .with_page(
            "https://invygo.com/en-ae/dubai/rent-weekly-cars",
            json!([
                {"sub-url": "https://invygo.com/car/1", "make": "toyota", "model": "camry", "year": "2023"},
                {"sub-url": "https://invygo.com/car/2", "make": "kia", "model": "rio", "year": "2024"}
            ])
            .to_string(),
        )
        .with_page("https://invygo.com/en-ae/dubai/rent-monthly-cars", "[]")
        .with_page("https://invygo.com/car/1", json!([tier("1 week", 800)]).to_string());

    let registry = SourceRegistry::new().with_source(source(SourceProfile::invygo(), &fetcher));
    let reports = run_sources(&registry, "invygo, carzilla", &path, &PipelineConfig::new())
        .await
        .unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].source, "carzilla");
    assert!(!reports[1].is_success());
    let report = reports[0].report().unwrap();
    assert_eq!(report.source, "invygo");
    // Kia has no invygo alias, so only the Camry survives the catalog join
    assert_eq!(report.table.len(), 1);
    assert_eq!(report.table.rows[0].duration.as_deref(), Some("1 week"));
    // Invygo quotes net of the upfront saving: base = savings / weeks + offered
    assert_eq!(report.table.rows[0].base_price, Some(900.0));
    assert_eq!(report.table.rows[0].offered_price, Some(800.0));
    assert_eq!(count(&report.diagnostics, EventKind::NoCatalogMatch), 1);
    assert_eq!(count(&report.diagnostics, EventKind::ListingPageNotFound), 0);
}
