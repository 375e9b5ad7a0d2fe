mod support;

use ensemble_transposer::app::normalize_platform;
use ensemble_transposer::domain::DataPoint;

use support::{MockFetcher, manifest, secrets};

fn point(x: &str, y: f64) -> DataPoint {
    DataPoint { x: x.to_string(), y }
}

#[tokio::test]
async fn summary_uses_default_category_and_sorted_dates() {
    let fetcher = MockFetcher::with_all_fixtures();
    let manifest = manifest("legacy-hardware");
    let normalized =
        normalize_platform(&fetcher, &secrets(), "legacy-hardware", "desktop", &manifest)
            .await
            .unwrap();

    let summary = &normalized.summary;
    assert_eq!(summary.title.as_deref(), Some("Firefox Hardware Report"));
    assert_eq!(summary.categories, vec!["default"]);
    assert_eq!(summary.metrics, vec!["osName", "gpuVendor", "cpuCores"]);
    assert_eq!(summary.dates, vec!["2024-01-08", "2024-01-01"]);
    assert!(summary.sections.is_none());
}

#[tokio::test]
async fn replacement_group_sums_members() {
    let fetcher = MockFetcher::with_all_fixtures();
    let manifest = manifest("legacy-hardware");
    let normalized =
        normalize_platform(&fetcher, &secrets(), "legacy-hardware", "desktop", &manifest)
            .await
            .unwrap();

    let populations = normalized
        .metric("default", "osName")
        .unwrap()
        .data
        .populations()
        .unwrap()
        .clone();
    assert_eq!(
        populations.keys().collect::<Vec<_>>(),
        vec!["Windows", "macOS"]
    );
    assert_eq!(
        populations["Windows"],
        vec![point("2024-01-01", 70.0), point("2024-01-08", 70.0)]
    );
    assert_eq!(
        populations["macOS"],
        vec![point("2024-01-01", 25.0), point("2024-01-08", 30.0)]
    );
}

#[tokio::test]
async fn population_pattern_extracts_names() {
    let fetcher = MockFetcher::with_all_fixtures();
    let manifest = manifest("legacy-hardware");
    let normalized =
        normalize_platform(&fetcher, &secrets(), "legacy-hardware", "desktop", &manifest)
            .await
            .unwrap();

    let populations = normalized
        .metric("default", "gpuVendor")
        .unwrap()
        .data
        .populations()
        .unwrap()
        .clone();
    assert_eq!(
        populations["Intel"],
        vec![point("2024-01-01", 60.0), point("2024-01-08", 70.0)]
    );
    assert_eq!(
        populations["AMD"],
        vec![point("2024-01-01", 40.0), point("2024-01-08", 30.0)]
    );
}

#[tokio::test]
async fn lone_population_collapses_per_date() {
    let fetcher = MockFetcher::with_all_fixtures();
    let manifest = manifest("legacy-hardware");
    let normalized =
        normalize_platform(&fetcher, &secrets(), "legacy-hardware", "desktop", &manifest)
            .await
            .unwrap();

    let populations = normalized
        .metric("default", "cpuCores")
        .unwrap()
        .data
        .populations()
        .unwrap()
        .clone();
    assert_eq!(populations["default"], vec![point("2024-01-01", 100.0)]);
    assert_eq!(populations["4"], vec![point("2024-01-08", 90.0)]);
    assert_eq!(populations["8"], vec![point("2024-01-08", 10.0)]);
}

#[tokio::test]
async fn ignored_fields_never_surface() {
    let fetcher = MockFetcher::with_all_fixtures();
    let manifest = manifest("legacy-hardware");
    let normalized =
        normalize_platform(&fetcher, &secrets(), "legacy-hardware", "desktop", &manifest)
            .await
            .unwrap();

    for entry in &normalized.metrics {
        let populations = entry.detail.data.populations().unwrap();
        assert!(!populations.contains_key("total"));
    }
}
