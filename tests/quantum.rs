mod support;

use assert_matches::assert_matches;
use serde_json::Value;

use ensemble_transposer::app::normalize_platform;
use ensemble_transposer::domain::{DataPoint, MetricKind};
use ensemble_transposer::error::TransposeError;
use ensemble_transposer::manifest::ManifestLoader;

use support::{MockFetcher, manifest, secrets};

fn point(x: &str, y: f64) -> DataPoint {
    DataPoint { x: x.to_string(), y }
}

#[tokio::test]
async fn summary_follows_manifest_and_source() {
    let fetcher = MockFetcher::with_all_fixtures();
    let manifest = manifest("hardware");
    let normalized = normalize_platform(&fetcher, &secrets(), "hardware", "desktop", &manifest)
        .await
        .unwrap();

    let summary = &normalized.summary;
    assert_eq!(summary.title.as_deref(), Some("Hardware Across the Web"));
    assert_eq!(summary.categories, vec!["default", "US"]);
    assert_eq!(summary.default_category.as_deref(), Some("default"));
    assert_eq!(summary.metrics, vec!["osdistribution", "memory", "topSites"]);
    assert_eq!(
        summary.summary_metrics,
        Some(vec!["osdistribution".to_string()])
    );
    assert_eq!(summary.dates, vec!["2024-01-15", "2024-01-08", "2024-01-01"]);

    let sections = summary.sections.as_ref().unwrap();
    assert_eq!(sections[0].key, "operatingsystems");
    assert_eq!(sections[0].metrics, vec!["osdistribution"]);
    assert_eq!(sections[1].key, "hardware");
    assert_eq!(sections[1].metrics, vec!["memory", "topSites"]);

    // Every category carries every metric.
    assert_eq!(normalized.metrics.len(), 6);
}

#[tokio::test]
async fn exclusions_and_multiplier_shape_line_data() {
    let fetcher = MockFetcher::with_all_fixtures();
    let manifest = manifest("hardware");
    let normalized = normalize_platform(&fetcher, &secrets(), "hardware", "desktop", &manifest)
        .await
        .unwrap();

    let detail = normalized.metric("default", "osdistribution").unwrap();
    assert_eq!(detail.kind, MetricKind::Line);
    assert!(detail.axes.is_some());
    assert!(detail.columns.is_none());

    let populations = detail.data.populations().unwrap();
    assert_eq!(
        populations["Windows"],
        vec![point("2024-01-08", 58.0), point("2024-01-01", 60.0)]
    );
    assert_eq!(
        populations["Mac"],
        vec![point("2024-01-08", 31.0), point("2024-01-01", 30.0)]
    );
    assert!(!populations.contains_key("Other"));
}

#[tokio::test]
async fn scalar_values_render_as_default_population() {
    let fetcher = MockFetcher::with_all_fixtures();
    let manifest = manifest("hardware");
    let normalized = normalize_platform(&fetcher, &secrets(), "hardware", "desktop", &manifest)
        .await
        .unwrap();

    let detail = normalized.metric("default", "memory").unwrap();
    let populations = detail.data.populations().unwrap();
    assert_eq!(populations.keys().collect::<Vec<_>>(), vec!["default"]);
    assert_eq!(
        populations["default"],
        vec![point("2024-01-08", 12.34), point("2024-01-01", 7.0)]
    );
}

#[tokio::test]
async fn annotations_attach_only_where_they_match() {
    let fetcher = MockFetcher::with_all_fixtures();
    let manifest = manifest("hardware");
    let normalized = normalize_platform(&fetcher, &secrets(), "hardware", "desktop", &manifest)
        .await
        .unwrap();

    let memory = normalized.metric("default", "memory").unwrap();
    let annotations = memory.annotations.as_ref().unwrap();
    assert_eq!(annotations.len(), 1);
    assert_eq!(annotations[0].date, "2024-01-08");
    assert_eq!(annotations[0].label, "Telemetry collection changed");

    let us_memory = normalized.metric("US", "memory").unwrap();
    assert!(us_memory.annotations.is_none());
    let rendered: Value = serde_json::to_value(us_memory).unwrap();
    assert!(rendered.get("annotations").is_none());
}

#[tokio::test]
async fn table_rows_keep_raw_values() {
    let fetcher = MockFetcher::with_all_fixtures();
    let manifest = manifest("hardware");
    let normalized = normalize_platform(&fetcher, &secrets(), "hardware", "desktop", &manifest)
        .await
        .unwrap();

    let detail = normalized.metric("default", "topSites").unwrap();
    assert_eq!(detail.kind, MetricKind::Table);
    assert!(detail.axes.is_none());
    assert!(detail.columns.is_some());

    let dates = detail.data.table_dates().unwrap();
    assert_eq!(dates.keys().collect::<Vec<_>>(), vec!["2024-01-08"]);
    let rows = &dates["2024-01-08"].rows;
    assert_eq!(rows[0].name, "example.com");
    assert_eq!(rows[0].value, serde_json::json!(12));
    assert_eq!(rows[1].name, "example.org");
}

#[tokio::test]
async fn osdistribution_example_renders_percentages() {
    let manifest = ManifestLoader::parse(
        "example",
        r#"{
            "sources": {
                "desktop": {
                    "data": { "url": "https://data.example.com/example.json", "format": "quantum" }
                }
            },
            "extraMetadata": {
                "metrics": {
                    "osdistribution": {
                        "type": "line",
                        "populationModifications": { "exclusions": ["Other"] }
                    }
                }
            }
        }"#,
    )
    .unwrap();
    let fetcher = MockFetcher::new().with_body(
        "https://data.example.com/example.json",
        r#"{"default": [{"date": "2024-01-01", "metrics": {"osdistribution": {"Windows": 0.6, "Mac": 0.3, "Other": 0.1}}}]}"#,
    );

    let normalized = normalize_platform(&fetcher, &secrets(), "example", "desktop", &manifest)
        .await
        .unwrap();
    let detail = normalized.metric("default", "osdistribution").unwrap();
    let rendered = serde_json::to_value(detail).unwrap();
    let populations = &rendered["data"]["populations"];

    assert_eq!(populations["Windows"][0]["x"], "2024-01-01");
    assert_eq!(populations["Windows"][0]["y"].as_f64(), Some(60.0));
    assert_eq!(populations["Mac"][0]["y"].as_f64(), Some(30.0));
    assert!(populations.get("Other").is_none());
    assert_eq!(rendered["apiVersion"], "1.0.0");
}

fn example_manifest(modifications: &str) -> ensemble_transposer::manifest::Manifest {
    ManifestLoader::parse(
        "example",
        &format!(
            r#"{{
                "sources": {{
                    "desktop": {{
                        "data": {{ "url": "https://data.example.com/example.json", "format": "quantum" }}
                    }}
                }},
                "extraMetadata": {{
                    "metrics": {{
                        "os": {{ "type": "line", "populationModifications": {modifications} }}
                    }}
                }}
            }}"#
        ),
    )
    .unwrap()
}

async fn os_populations(
    modifications: &str,
    entries: &str,
) -> std::collections::BTreeMap<String, Vec<DataPoint>> {
    let manifest = example_manifest(modifications);
    let fetcher = MockFetcher::new()
        .with_body("https://data.example.com/example.json", format!(r#"{{"default": {entries}}}"#));
    let normalized = normalize_platform(&fetcher, &secrets(), "example", "desktop", &manifest)
        .await
        .unwrap();
    normalized
        .metric("default", "os")
        .unwrap()
        .data
        .populations()
        .unwrap()
        .clone()
}

#[tokio::test]
async fn replacement_group_sums_raw_members_then_scales() {
    let populations = os_populations(
        r#"{ "replacementGroups": [{ "name": "G", "memberPattern": "^(A|B)$" }] }"#,
        r#"[{"date": "2024-01-01", "metrics": {"os": {"A": 10, "B": 15, "C": 0.3}}}]"#,
    )
    .await;

    assert_eq!(populations["G"], vec![point("2024-01-01", 2500.0)]);
    assert_eq!(populations["C"], vec![point("2024-01-01", 30.0)]);
    assert!(!populations.contains_key("A"));
    assert!(!populations.contains_key("B"));
}

#[tokio::test]
async fn lone_population_after_exclusion_is_default() {
    let populations = os_populations(
        r#"{ "exclusions": ["Other"] }"#,
        r#"[
            {"date": "2024-01-02", "metrics": {"os": {"Windows": 0.9, "Other": 0.1}}},
            {"date": "2024-01-01", "metrics": {"os": {"Windows": 0.7, "Linux": 0.3}}}
        ]"#,
    )
    .await;

    assert_eq!(populations["default"], vec![point("2024-01-02", 90.0)]);
    assert_eq!(populations["Windows"], vec![point("2024-01-01", 70.0)]);
    assert_eq!(populations["Linux"], vec![point("2024-01-01", 30.0)]);
    assert!(!populations.contains_key("Other"));
}

#[tokio::test]
async fn renames_and_appends_reach_the_output() {
    let populations = os_populations(
        r#"{
            "renames": [{ "from": "Darwin", "to": "macOS" }],
            "append": { "matchPattern": "^[0-9]+$", "value": " GB" }
        }"#,
        r#"[{"date": "2024-01-01", "metrics": {"os": {"Darwin": 0.25, "4": 0.5, "8": 0.25}}}]"#,
    )
    .await;

    assert_eq!(
        populations.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["4 GB", "8 GB", "macOS"]
    );
    assert_eq!(populations["macOS"], vec![point("2024-01-01", 25.0)]);
    assert_eq!(populations["4 GB"], vec![point("2024-01-01", 50.0)]);
}

#[tokio::test]
async fn unknown_format_names_dataset_and_platform() {
    let manifest = ManifestLoader::parse(
        "broken",
        r#"{
            "sources": { "mobile": { "data": { "url": "https://data.example.com/x.json", "format": "csv" } } },
            "extraMetadata": { "metrics": {} }
        }"#,
    )
    .unwrap();
    let fetcher = MockFetcher::new();
    let err = normalize_platform(&fetcher, &secrets(), "broken", "mobile", &manifest)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        TransposeError::UnsupportedFormat { ref dataset, ref platform, ref format }
            if dataset == "broken" && platform == "mobile" && format == "csv"
    );
    assert_eq!(fetcher.total_calls(), 0);
}

#[tokio::test]
async fn fetch_failure_carries_url() {
    let manifest = manifest("hardware");
    let fetcher = MockFetcher::new();
    let err = normalize_platform(&fetcher, &secrets(), "hardware", "desktop", &manifest)
        .await
        .unwrap_err();
    assert!(err.is_fetch());
    assert!(err.to_string().contains("https://data.example.com/"));
}
