use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::app::{NormalizedPlatform, normalize_platform};
use crate::domain::{MetricDetail, Summary};
use crate::error::TransposeError;
use crate::fetch::Fetcher;
use crate::manifest::{ManifestLoader, SecretSource};

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<NormalizedPlatform>>;
    fn set(&self, key: &str, value: Arc<NormalizedPlatform>, ttl: Duration);
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, Arc<NormalizedPlatform>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<Arc<NormalizedPlatform>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((expires, value)) = entries.get(key) {
            if *expires > Instant::now() {
                return Some(Arc::clone(value));
            }
        }
        entries.remove(key);
        None
    }

    fn set(&self, key: &str, value: Arc<NormalizedPlatform>, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), (Instant::now() + ttl, value));
    }
}

/// Looks datasets up by name, normalizing on a cache miss.
pub struct DatasetService<F: Fetcher, C: CacheStore> {
    manifests: PathBuf,
    fetcher: F,
    secrets: Arc<dyn SecretSource>,
    cache: C,
    ttl: Duration,
}

impl<F: Fetcher, C: CacheStore> DatasetService<F, C> {
    pub fn new(
        manifests: impl Into<PathBuf>,
        fetcher: F,
        secrets: Arc<dyn SecretSource>,
        cache: C,
        ttl: Duration,
    ) -> Self {
        Self {
            manifests: manifests.into(),
            fetcher,
            secrets,
            cache,
            ttl,
        }
    }

    pub async fn platform(
        &self,
        dataset: &str,
        platform: Option<&str>,
    ) -> Result<Arc<NormalizedPlatform>, TransposeError> {
        let requested = match platform {
            Some(platform) => format!("{dataset}/{platform}"),
            None => dataset.to_string(),
        };
        if let Some(hit) = self.cache.get(&requested) {
            debug!(key = %requested, "cache hit");
            return Ok(hit);
        }

        let manifest = ManifestLoader::find(&self.manifests, dataset)?;
        let platform = match platform {
            Some(platform) => platform.to_string(),
            None => manifest
                .sources
                .first()
                .map(|(name, _)| name.to_string())
                .ok_or_else(|| TransposeError::PlatformNotFound {
                    dataset: dataset.to_string(),
                    platform: "(none declared)".to_string(),
                })?,
        };

        let key = format!("{dataset}/{platform}");
        let normalized = match self.cache.get(&key) {
            Some(hit) => {
                debug!(key = %key, "cache hit");
                hit
            }
            None => {
                debug!(key = %key, "cache miss");
                let started = Instant::now();
                let normalized = Arc::new(
                    normalize_platform(&self.fetcher, self.secrets.as_ref(), dataset, &platform, &manifest)
                        .await?,
                );
                info!(
                    dataset,
                    platform = %platform,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "normalized on demand"
                );
                self.cache.set(&key, Arc::clone(&normalized), self.ttl);
                normalized
            }
        };
        if requested != key {
            self.cache.set(&requested, Arc::clone(&normalized), self.ttl);
        }
        Ok(normalized)
    }

    pub async fn summary(
        &self,
        dataset: &str,
        platform: Option<&str>,
    ) -> Result<Summary, TransposeError> {
        Ok(self.platform(dataset, platform).await?.summary.clone())
    }

    pub async fn metric(
        &self,
        dataset: &str,
        category: &str,
        metric: &str,
        platform: Option<&str>,
    ) -> Result<MetricDetail, TransposeError> {
        let normalized = self.platform(dataset, platform).await?;
        normalized
            .metric(category, metric)
            .cloned()
            .ok_or_else(|| TransposeError::MetricNotFound {
                dataset: dataset.to_string(),
                category: category.to_string(),
                metric: metric.to_string(),
            })
    }
}
