mod support;

use std::sync::{Arc, Mutex};

use camino::Utf8Path;
use serde_json::Value;

use ensemble_transposer::app::{App, ProgressEvent, ProgressSink};
use ensemble_transposer::manifest::{Manifest, ManifestLoader};
use ensemble_transposer::store::MemoryStore;

use support::{MockFetcher, manifest, secrets};

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

fn app() -> App<MockFetcher, MemoryStore> {
    App::new(
        MockFetcher::with_all_fixtures(),
        MemoryStore::new(),
        Arc::new(secrets()),
    )
}

fn document(store: &MemoryStore, path: &str) -> Value {
    let bytes = store.get(Utf8Path::new(path)).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn all_manifests() -> Vec<(String, Manifest)> {
    ["hardware", "legacy-hardware", "usage"]
        .into_iter()
        .map(|dataset| (dataset.to_string(), manifest(dataset)))
        .collect()
}

#[tokio::test]
async fn writes_summary_and_metric_artifacts() {
    let app = app();
    let sink = RecordingSink::default();
    let count = app
        .process_platform("hardware", "desktop", &manifest("hardware"), &sink)
        .await
        .unwrap();

    assert_eq!(count, 7);
    assert_eq!(app.store().len(), 7);
    let paths = app
        .store()
        .paths()
        .into_iter()
        .map(|path| path.to_string())
        .collect::<Vec<_>>();
    assert!(paths.contains(&"datasets/desktop/hardware/index.json".to_string()));
    assert!(paths.contains(&"datasets/desktop/hardware/US/topSites/index.json".to_string()));
    assert!(paths.contains(&"datasets/desktop/hardware/default/memory/index.json".to_string()));
    assert_eq!(sink.messages.lock().unwrap().len(), 7);
}

#[tokio::test]
async fn summary_artifact_is_camel_cased_json() {
    let app = app();
    app.process_platform("hardware", "desktop", &manifest("hardware"), &RecordingSink::default())
        .await
        .unwrap();

    let summary = document(app.store(), "datasets/desktop/hardware/index.json");
    assert_eq!(summary["apiVersion"], "1.0.0");
    assert_eq!(summary["defaultCategory"], "default");
    assert_eq!(summary["summaryMetrics"][0], "osdistribution");
    assert_eq!(summary["dates"][0], "2024-01-15");
    assert_eq!(summary["sections"][0]["key"], "operatingsystems");

    let memory = document(app.store(), "datasets/desktop/hardware/US/memory/index.json");
    assert!(memory.get("annotations").is_none());
    assert!(memory.get("columns").is_none());
    assert_eq!(memory["data"]["populations"]["default"][0]["y"].as_f64(), Some(20.0));
}

#[tokio::test]
async fn metric_dates_are_strictly_descending_where_source_is() {
    let app = app();
    app.process_all(&all_manifests(), &RecordingSink::default())
        .await;

    for path in app.store().paths() {
        let doc = document(app.store(), path.as_str());
        if let Some(dates) = doc.get("dates").and_then(Value::as_array) {
            let dates = dates
                .iter()
                .map(|date| date.as_str().unwrap().to_string())
                .collect::<Vec<_>>();
            let mut sorted = dates.clone();
            sorted.sort_by(|a, b| b.cmp(a));
            sorted.dedup();
            assert_eq!(dates, sorted, "{path}");
        }
    }
}

#[tokio::test]
async fn reruns_produce_identical_bytes() {
    let first = app();
    first
        .process_all(&all_manifests(), &RecordingSink::default())
        .await;
    let second = app();
    second
        .process_all(&all_manifests(), &RecordingSink::default())
        .await;

    assert_eq!(first.store().paths(), second.store().paths());
    for path in first.store().paths() {
        assert_eq!(first.store().get(&path), second.store().get(&path), "{path}");
    }
}

#[tokio::test]
async fn failing_dataset_does_not_stop_the_others() {
    let broken = ManifestLoader::parse(
        "broken",
        r#"{
            "sources": { "desktop": { "data": { "url": "https://data.example.com/broken.json", "format": "csv" } } },
            "extraMetadata": { "metrics": {} }
        }"#,
    )
    .unwrap();
    let mut manifests = all_manifests();
    manifests.insert(0, ("broken".to_string(), broken));

    let app = app();
    let report = app.process_all(&manifests, &RecordingSink::default()).await;

    assert!(!report.is_success());
    assert_eq!(report.datasets.len(), 4);

    let broken = &report.datasets[0];
    assert!(!broken.is_success());
    assert_eq!(broken.platforms[0].status, "failed");
    let message = broken.platforms[0].error.as_deref().unwrap();
    assert!(message.contains("csv"));
    assert!(message.contains("broken"));

    for dataset in &report.datasets[1..] {
        assert!(dataset.is_success(), "{}", dataset.dataset);
        assert_eq!(dataset.platforms[0].status, "ok");
    }
    assert_eq!(app.store().len(), 7 + 4 + 3);
    assert!(
        app.store()
            .paths()
            .iter()
            .all(|path| !path.as_str().contains("/broken/"))
    );
}

#[tokio::test]
async fn report_serializes_without_empty_fields() {
    let app = app();
    let report = app
        .process_all(&[("hardware".to_string(), manifest("hardware"))], &RecordingSink::default())
        .await;

    assert!(report.is_success());
    let rendered = serde_json::to_value(&report).unwrap();
    let platform = &rendered["datasets"][0]["platforms"][0];
    assert_eq!(platform["platform"], "desktop");
    assert_eq!(platform["artifacts"], 7);
    assert!(platform.get("error").is_none());
}
