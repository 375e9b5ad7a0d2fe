pub mod babbage;
pub mod quantum;
pub mod redash;

use serde_json::Value;

use crate::annotations::Annotations;
use crate::domain::{MetricDetail, SourceFormat, Summary};
use crate::error::TransposeError;
use crate::fetch::Fetcher;
use crate::manifest::{DataSource, ExtraMetadata, SecretSource};

pub use babbage::BabbageFormatter;
pub use quantum::QuantumFormatter;
pub use redash::RedashFormatter;

// Raw fractions become percentages unless `valueMultiplier` says otherwise.
pub const DEFAULT_VALUE_MULTIPLIER: f64 = 100.0;

pub struct FormatterInput<'a, F: Fetcher> {
    pub dataset: &'a str,
    pub source: &'a DataSource,
    pub metadata: &'a ExtraMetadata,
    pub raw: Value,
    pub annotations: Annotations,
    pub fetcher: &'a F,
    pub secrets: &'a dyn SecretSource,
}

pub enum Formatter<'a, F: Fetcher> {
    Quantum(QuantumFormatter<'a>),
    Babbage(BabbageFormatter<'a>),
    Redash(RedashFormatter<'a, F>),
}

impl<'a, F: Fetcher> Formatter<'a, F> {
    pub fn new(format: SourceFormat, input: FormatterInput<'a, F>) -> Result<Self, TransposeError> {
        let FormatterInput {
            dataset,
            source,
            metadata,
            raw,
            annotations,
            fetcher,
            secrets,
        } = input;

        Ok(match format {
            SourceFormat::Quantum => Formatter::Quantum(QuantumFormatter::new(
                dataset,
                metadata,
                raw,
                annotations,
                source.value_multiplier,
            )?),
            SourceFormat::Babbage => Formatter::Babbage(BabbageFormatter::new(
                dataset,
                source,
                metadata,
                raw,
                annotations,
            )?),
            SourceFormat::Redash => Formatter::Redash(RedashFormatter::new(
                dataset,
                source,
                metadata,
                raw,
                annotations,
                fetcher,
                secrets,
            )?),
        })
    }

    pub fn format(&self) -> SourceFormat {
        match self {
            Formatter::Quantum(_) => SourceFormat::Quantum,
            Formatter::Babbage(_) => SourceFormat::Babbage,
            Formatter::Redash(_) => SourceFormat::Redash,
        }
    }

    pub async fn get_summary(&self) -> Result<Summary, TransposeError> {
        match self {
            Formatter::Quantum(formatter) => Ok(formatter.get_summary()),
            Formatter::Babbage(formatter) => Ok(formatter.get_summary()),
            Formatter::Redash(formatter) => formatter.get_summary().await,
        }
    }

    pub async fn get_metric(&self, category: &str, metric: &str) -> Result<MetricDetail, TransposeError> {
        match self {
            Formatter::Quantum(formatter) => formatter.get_metric(category, metric),
            Formatter::Babbage(formatter) => formatter.get_metric(category, metric),
            Formatter::Redash(formatter) => formatter.get_metric(category, metric).await,
        }
    }

    pub fn clear_cache(&self) {
        if let Formatter::Redash(formatter) = self {
            formatter.clear_cache();
        }
    }
}
