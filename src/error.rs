use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TransposeError {
    #[error("format \"{format}\" is not supported (set for platform {platform} of dataset \"{dataset}\")")]
    UnsupportedFormat {
        dataset: String,
        platform: String,
        format: String,
    },

    #[error("unsupported type \"{kind}\" for metric \"{metric}\" in dataset \"{dataset}\"")]
    UnsupportedMetricType {
        dataset: String,
        metric: String,
        kind: String,
    },

    #[error("widget {widget} in dataset \"{dataset}\" is a {kind} visualization; only line charts are supported")]
    UnsupportedVisualization {
        dataset: String,
        widget: String,
        kind: String,
    },

    #[error("no population pattern specified for metric \"{metric}\" in dataset \"{dataset}\"")]
    MissingPopulationPattern { dataset: String, metric: String },

    #[error("invalid pattern for {field} in dataset \"{dataset}\": {message}")]
    InvalidPattern {
        dataset: String,
        field: String,
        message: String,
    },

    #[error("invalid column mapping for widget {widget} in dataset \"{dataset}\": {message}")]
    InvalidColumnMapping {
        dataset: String,
        widget: String,
        message: String,
    },

    #[error("environment variable {variable} required by dataset \"{dataset}\" is not set")]
    MissingSecret { dataset: String, variable: String },

    #[error("invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("failed to read manifest at {0}")]
    ManifestRead(PathBuf),

    #[error("failed to parse manifest for dataset \"{dataset}\": {message}")]
    ManifestParse { dataset: String, message: String },

    #[error("request for {url} failed: {message}")]
    FetchHttp { url: String, message: String },

    #[error("failed to read {path}: {message}")]
    FetchFile { path: String, message: String },

    #[error("{url} returned status {status}: {message}")]
    FetchStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("raw data for dataset \"{dataset}\" is malformed: {message}")]
    MalformedSource { dataset: String, message: String },

    #[error("raw data is not formatted properly for metric \"{metric}\" in dataset \"{dataset}\": {message}")]
    Shape {
        dataset: String,
        metric: String,
        message: String,
    },

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("platform \"{platform}\" not found for dataset \"{dataset}\"")]
    PlatformNotFound { dataset: String, platform: String },

    #[error("no data for metric \"{metric}\" in category \"{category}\" of dataset \"{dataset}\"")]
    MetricNotFound {
        dataset: String,
        category: String,
        metric: String,
    },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("server failed on {addr}: {message}")]
    Server { addr: String, message: String },

    #[error("failed to serialize output: {0}")]
    Serialize(String),
}

impl TransposeError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TransposeError::DatasetNotFound(_)
                | TransposeError::PlatformNotFound { .. }
                | TransposeError::MetricNotFound { .. }
        )
    }

    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            TransposeError::FetchHttp { .. }
                | TransposeError::FetchFile { .. }
                | TransposeError::FetchStatus { .. }
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TransposeError::UnsupportedFormat { .. }
                | TransposeError::UnsupportedMetricType { .. }
                | TransposeError::UnsupportedVisualization { .. }
                | TransposeError::MissingPopulationPattern { .. }
                | TransposeError::InvalidPattern { .. }
                | TransposeError::InvalidColumnMapping { .. }
                | TransposeError::MissingSecret { .. }
                | TransposeError::InvalidUrl { .. }
                | TransposeError::ManifestRead(_)
                | TransposeError::ManifestParse { .. }
        )
    }
}
