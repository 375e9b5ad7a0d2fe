use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info};

use crate::annotations::Annotations;
use crate::domain::{MetricDetail, SourceFormat, Summary};
use crate::error::TransposeError;
use crate::fetch::{Fetcher, fetch_json};
use crate::formatter::{Formatter, FormatterInput};
use crate::manifest::{Manifest, SecretSource};
use crate::store::{ArtifactStore, metric_path, summary_path};

/// One platform of one dataset, fully normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPlatform {
    pub dataset: String,
    pub platform: String,
    pub summary: Summary,
    pub metrics: Vec<NormalizedMetric>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMetric {
    pub category: String,
    pub metric: String,
    pub detail: MetricDetail,
}

impl NormalizedPlatform {
    pub fn metric(&self, category: &str, metric: &str) -> Option<&MetricDetail> {
        self.metrics
            .iter()
            .find(|entry| entry.category == category && entry.metric == metric)
            .map(|entry| &entry.detail)
    }

    pub fn artifacts(&self) -> Result<Vec<(Utf8PathBuf, Vec<u8>)>, TransposeError> {
        let mut artifacts = Vec::with_capacity(self.metrics.len() + 1);
        artifacts.push((
            summary_path(&self.platform, &self.dataset),
            render(&self.summary)?,
        ));
        for entry in &self.metrics {
            artifacts.push((
                metric_path(&self.platform, &self.dataset, &entry.category, &entry.metric),
                render(&entry.detail)?,
            ));
        }
        Ok(artifacts)
    }
}

fn render<T: Serialize>(value: &T) -> Result<Vec<u8>, TransposeError> {
    serde_json::to_vec(value).map_err(|err| TransposeError::Serialize(err.to_string()))
}

pub async fn normalize_platform<F: Fetcher>(
    fetcher: &F,
    secrets: &dyn SecretSource,
    dataset: &str,
    platform: &str,
    manifest: &Manifest,
) -> Result<NormalizedPlatform, TransposeError> {
    let source = manifest
        .sources
        .get(platform)
        .ok_or_else(|| TransposeError::PlatformNotFound {
            dataset: dataset.to_string(),
            platform: platform.to_string(),
        })?;
    let format = SourceFormat::from_name(&source.data.format).ok_or_else(|| {
        TransposeError::UnsupportedFormat {
            dataset: dataset.to_string(),
            platform: platform.to_string(),
            format: source.data.format.clone(),
        }
    })?;

    let data_url = source.data.url.resolve(dataset, secrets)?;
    let annotations_url = source
        .annotations
        .as_ref()
        .map(|annotations| annotations.url.resolve(dataset, secrets))
        .transpose()?;

    let (raw, annotations) = tokio::try_join!(fetch_json(fetcher, dataset, &data_url), async {
        match &annotations_url {
            Some(url) => Annotations::parse(dataset, fetch_json(fetcher, dataset, url).await?),
            None => Ok(Annotations::default()),
        }
    })?;

    let formatter = Formatter::new(
        format,
        FormatterInput {
            dataset,
            source: &source.data,
            metadata: &manifest.extra_metadata,
            raw,
            annotations,
            fetcher,
            secrets,
        },
    )?;
    info!(dataset, platform, format = %formatter.format(), "formatter selected");

    let result = render_all(&formatter).await;
    formatter.clear_cache();
    let (summary, metrics) = result?;

    Ok(NormalizedPlatform {
        dataset: dataset.to_string(),
        platform: platform.to_string(),
        summary,
        metrics,
    })
}

async fn render_all<F: Fetcher>(
    formatter: &Formatter<'_, F>,
) -> Result<(Summary, Vec<NormalizedMetric>), TransposeError> {
    let summary = formatter.get_summary().await?;

    let pairs = summary
        .categories
        .iter()
        .flat_map(|category| {
            summary
                .metrics
                .iter()
                .map(move |metric| (category.clone(), metric.clone()))
        })
        .collect::<Vec<_>>();
    let details = join_all(pairs.into_iter().map(|(category, metric)| async move {
        let detail = formatter.get_metric(&category, &metric).await?;
        Ok::<_, TransposeError>(NormalizedMetric {
            category,
            metric,
            detail,
        })
    }))
    .await
    .into_iter()
    .collect::<Result<Vec<_>, TransposeError>>()?;

    Ok((summary, details))
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub datasets: Vec<DatasetReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.datasets.iter().all(DatasetReport::is_success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub dataset: String,
    pub platforms: Vec<PlatformReport>,
}

impl DatasetReport {
    pub fn is_success(&self) -> bool {
        self.platforms.iter().all(|platform| platform.error.is_none())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformReport {
    pub platform: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Normalizes datasets and hands every rendered document to the store.
pub struct App<F: Fetcher, S: ArtifactStore> {
    fetcher: F,
    store: S,
    secrets: Arc<dyn SecretSource>,
}

impl<F: Fetcher, S: ArtifactStore> App<F, S> {
    pub fn new(fetcher: F, store: S, secrets: Arc<dyn SecretSource>) -> Self {
        Self {
            fetcher,
            store,
            secrets,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the number of artifacts written.
    pub async fn process_platform(
        &self,
        dataset: &str,
        platform: &str,
        manifest: &Manifest,
        sink: &dyn ProgressSink,
    ) -> Result<usize, TransposeError> {
        let normalized =
            normalize_platform(&self.fetcher, self.secrets.as_ref(), dataset, platform, manifest)
                .await?;
        let artifacts = normalized.artifacts()?;
        let count = artifacts.len();

        let writes = join_all(artifacts.into_iter().map(|(path, bytes)| async move {
            let started = Instant::now();
            self.store.store(&path, bytes).await?;
            let elapsed = started.elapsed();
            info!(
                dataset,
                platform,
                path = %path,
                elapsed_ms = elapsed.as_millis() as u64,
                "wrote artifact"
            );
            sink.event(ProgressEvent {
                message: format!("Wrote {path}"),
                elapsed: Some(elapsed),
            });
            Ok::<_, TransposeError>(())
        }))
        .await;
        writes.into_iter().collect::<Result<Vec<_>, _>>()?;

        Ok(count)
    }

    /// Fails if any platform fails.
    pub async fn process_dataset(
        &self,
        dataset: &str,
        manifest: &Manifest,
        sink: &dyn ProgressSink,
    ) -> DatasetReport {
        let platforms = join_all(manifest.sources.keys().map(|platform| async move {
            let started = Instant::now();
            let result = self.process_platform(dataset, platform, manifest, sink).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(artifacts) => PlatformReport {
                    platform: platform.to_string(),
                    status: "ok".to_string(),
                    artifacts: Some(artifacts),
                    error: None,
                    elapsed_ms,
                },
                Err(err) => {
                    error!(dataset, platform, error = %err, "platform failed");
                    PlatformReport {
                        platform: platform.to_string(),
                        status: "failed".to_string(),
                        artifacts: None,
                        error: Some(err.to_string()),
                        elapsed_ms,
                    }
                }
            }
        }))
        .await;

        DatasetReport {
            dataset: dataset.to_string(),
            platforms,
        }
    }

    pub async fn process_all(
        &self,
        manifests: &[(String, Manifest)],
        sink: &dyn ProgressSink,
    ) -> RunReport {
        let started_at = iso_timestamp();
        let datasets = join_all(
            manifests
                .iter()
                .map(|(dataset, manifest)| self.process_dataset(dataset, manifest, sink)),
        )
        .await;

        RunReport {
            started_at,
            finished_at: iso_timestamp(),
            datasets,
        }
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
