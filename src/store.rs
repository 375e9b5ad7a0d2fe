use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::debug;

use crate::error::TransposeError;

pub trait ArtifactStore: Send + Sync {
    fn store(
        &self,
        path: &Utf8Path,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransposeError>> + Send;
}

/// `datasets/{platform}/{dataset}/index.json`
pub fn summary_path(platform: &str, dataset: &str) -> Utf8PathBuf {
    Utf8PathBuf::from("datasets")
        .join(platform)
        .join(dataset)
        .join("index.json")
}

/// `datasets/{platform}/{dataset}/{category}/{metric}/index.json`
pub fn metric_path(platform: &str, dataset: &str, category: &str, metric: &str) -> Utf8PathBuf {
    Utf8PathBuf::from("datasets")
        .join(platform)
        .join(dataset)
        .join(category)
        .join(metric)
        .join("index.json")
}

/// Writes artifacts below a root directory, one atomic rename per file.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: Utf8PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), TransposeError> {
        let parent = path
            .parent()
            .ok_or_else(|| TransposeError::Filesystem(format!("invalid artifact path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| TransposeError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".transposer")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| TransposeError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| TransposeError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| TransposeError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl ArtifactStore for FileStore {
    async fn store(&self, path: &Utf8Path, bytes: Vec<u8>) -> Result<(), TransposeError> {
        let target = self.root.join(path);
        debug!(path = %target, bytes = bytes.len(), "writing artifact");
        tokio::task::spawn_blocking(move || Self::write_bytes_atomic(&target, &bytes))
            .await
            .map_err(|err| TransposeError::Filesystem(err.to_string()))?
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    artifacts: Mutex<BTreeMap<Utf8PathBuf, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Utf8Path) -> Option<Vec<u8>> {
        self.lock().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Utf8PathBuf, Vec<u8>>> {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ArtifactStore for MemoryStore {
    async fn store(&self, path: &Utf8Path, bytes: Vec<u8>) -> Result<(), TransposeError> {
        self.lock().insert(path.to_path_buf(), bytes);
        Ok(())
    }
}
