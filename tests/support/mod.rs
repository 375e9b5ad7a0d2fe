#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ensemble_transposer::error::TransposeError;
use ensemble_transposer::fetch::Fetcher;
use ensemble_transposer::manifest::{Manifest, ManifestLoader};

pub const REDASH_KEY: &str = "k";

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn manifests_dir() -> PathBuf {
    fixture_path("manifests")
}

pub fn manifest(dataset: &str) -> Manifest {
    let (_, manifest) =
        ManifestLoader::load(&manifests_dir().join(format!("{dataset}.json"))).unwrap();
    manifest
}

pub fn secrets() -> HashMap<String, String> {
    HashMap::from([("REDASH_API_KEY".to_string(), REDASH_KEY.to_string())])
}

/// Serves fixture files for known URLs and counts every request.
#[derive(Default)]
pub struct MockFetcher {
    responses: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every URL the fixture manifests reference.
    pub fn with_all_fixtures() -> Self {
        Self::new()
            .with_fixture("https://data.example.com/hardware.json", "quantum.json")
            .with_fixture(
                "https://data.example.com/hardware-annotations.json",
                "quantum-annotations.json",
            )
            .with_fixture("https://data.example.com/legacy-hardware.json", "babbage.json")
            .with_fixture(
                &format!("https://redash.example.com/api/dashboards/usage?api_key={REDASH_KEY}"),
                "redash-dashboard.json",
            )
            .with_fixture(&query_url(7), "redash-query-7.json")
            .with_fixture(&query_url(8), "redash-query-8.json")
    }

    pub fn with_fixture(self, url: &str, fixture: &str) -> Self {
        let body = std::fs::read(fixture_path(fixture)).unwrap();
        self.with_body(url, body)
    }

    pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(url.to_string(), body.into());
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| called.as_str() == url)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransposeError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| TransposeError::FetchStatus {
                url: url.to_string(),
                status: 404,
                message: "no fixture".to_string(),
            })
    }
}

pub fn query_url(id: u32) -> String {
    format!("https://redash.example.com/api/queries/{id}/results.json?api_key={REDASH_KEY}")
}
