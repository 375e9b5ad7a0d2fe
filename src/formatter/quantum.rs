use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::annotations::Annotations;
use crate::decimal;
use crate::domain::{
    API_VERSION, DEFAULT_POPULATION, DataPoint, MetricData, MetricDetail, MetricKind, Row,
    Summary, TableSnapshot, dates_descending,
};
use crate::error::TransposeError;
use crate::formatter::DEFAULT_VALUE_MULTIPLIER;
use crate::manifest::{ExtraMetadata, Keyed};
use crate::rules::{EntryValue, PopulationRules};

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Entry {
    pub date: String,
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct CompiledMetric {
    kind: MetricKind,
    rules: PopulationRules,
}

#[derive(Debug, Clone)]
pub struct QuantumFormatter<'a> {
    dataset: &'a str,
    metadata: &'a ExtraMetadata,
    categories: Keyed<Vec<Entry>>,
    metrics: Keyed<CompiledMetric>,
    annotations: Annotations,
    value_multiplier: f64,
    adapted: bool,
}

impl<'a> QuantumFormatter<'a> {
    pub fn new(
        dataset: &'a str,
        metadata: &'a ExtraMetadata,
        raw: Value,
        annotations: Annotations,
        value_multiplier: Option<f64>,
    ) -> Result<Self, TransposeError> {
        let categories: Keyed<Vec<Entry>> =
            serde_json::from_value(raw).map_err(|err| TransposeError::MalformedSource {
                dataset: dataset.to_string(),
                message: err.to_string(),
            })?;
        Self::build(
            dataset,
            metadata,
            categories,
            annotations,
            value_multiplier.unwrap_or(DEFAULT_VALUE_MULTIPLIER),
            false,
        )
    }

    /// Entries already rescaled and run through the population rules.
    pub(crate) fn from_adapted(
        dataset: &'a str,
        metadata: &'a ExtraMetadata,
        categories: Keyed<Vec<Entry>>,
        annotations: Annotations,
    ) -> Result<Self, TransposeError> {
        Self::build(dataset, metadata, categories, annotations, 1.0, true)
    }

    fn build(
        dataset: &'a str,
        metadata: &'a ExtraMetadata,
        categories: Keyed<Vec<Entry>>,
        annotations: Annotations,
        value_multiplier: f64,
        adapted: bool,
    ) -> Result<Self, TransposeError> {
        let metrics = metadata
            .metrics
            .iter()
            .map(|(name, config)| {
                let kind = MetricKind::from_name(&config.kind).ok_or_else(|| {
                    TransposeError::UnsupportedMetricType {
                        dataset: dataset.to_string(),
                        metric: name.to_string(),
                        kind: config.kind.clone(),
                    }
                })?;
                let rules = if adapted {
                    PopulationRules::default()
                } else {
                    PopulationRules::compile(config.population_modifications.as_ref(), dataset, name)?
                };
                Ok((name.to_string(), CompiledMetric { kind, rules }))
            })
            .collect::<Result<Keyed<_>, TransposeError>>()?;

        Ok(Self {
            dataset,
            metadata,
            categories,
            metrics,
            annotations,
            value_multiplier,
            adapted,
        })
    }

    pub fn get_summary(&self) -> Summary {
        let dates = dates_descending(
            self.categories
                .iter()
                .flat_map(|(_, entries)| entries.iter().map(|entry| entry.date.clone())),
        );

        Summary {
            title: self.metadata.title.clone(),
            description: self.metadata.description.clone(),
            categories: self.categories.keys().map(str::to_string).collect(),
            default_category: self.metadata.default_category.clone(),
            metrics: self.metadata.metrics.keys().map(str::to_string).collect(),
            summary_metrics: self.metadata.summary_metrics.clone(),
            dates,
            sections: self.metadata.sections(),
            api_version: API_VERSION.to_string(),
        }
    }

    pub fn get_metric(&self, category: &str, metric: &str) -> Result<MetricDetail, TransposeError> {
        let not_found = || TransposeError::MetricNotFound {
            dataset: self.dataset.to_string(),
            category: category.to_string(),
            metric: metric.to_string(),
        };
        let config = self.metadata.metrics.get(metric).ok_or_else(not_found)?;
        let compiled = self.metrics.get(metric).ok_or_else(not_found)?;
        let entries = self.categories.get(category).ok_or_else(not_found)?;

        let data = match compiled.kind {
            MetricKind::Line => self.line_data(entries, metric, &compiled.rules)?,
            MetricKind::Table => self.table_data(entries, metric)?,
        };

        Ok(MetricDetail {
            title: config.title.clone(),
            description: config.description.clone(),
            kind: compiled.kind,
            axes: match compiled.kind {
                MetricKind::Line => config.axes.clone(),
                MetricKind::Table => None,
            },
            columns: match compiled.kind {
                MetricKind::Line => None,
                MetricKind::Table => config.columns.clone(),
            },
            data,
            annotations: self.annotations.get(category, metric),
            api_version: API_VERSION.to_string(),
        })
    }

    fn line_data(
        &self,
        entries: &[Entry],
        metric: &str,
        rules: &PopulationRules,
    ) -> Result<MetricData, TransposeError> {
        let mut populations: BTreeMap<String, Vec<DataPoint>> = BTreeMap::new();

        for entry in entries {
            let values = match entry.metrics.get(metric) {
                None | Some(Value::Null) => continue,
                Some(Value::Number(number)) => {
                    let value = number.as_f64().ok_or_else(|| self.shape(metric, "value is not a finite number"))?;
                    vec![(
                        DEFAULT_POPULATION.to_string(),
                        decimal::scale(value, self.value_multiplier),
                    )]
                }
                Some(Value::Object(raw)) => {
                    let mut values = Vec::with_capacity(raw.len());
                    for (population, value) in raw {
                        match value {
                            Value::Null => {}
                            Value::Number(number) => {
                                let value = number.as_f64().ok_or_else(|| {
                                    self.shape(metric, "value is not a finite number")
                                })?;
                                values.push((population.clone(), value));
                            }
                            _ => {
                                return Err(self.shape(
                                    metric,
                                    &format!("population \"{population}\" on {} is not a number", entry.date),
                                ));
                            }
                        }
                    }
                    let values = rules.apply(values, self.value_multiplier);
                    if self.adapted {
                        values
                    } else {
                        // Collapsing runs only after every rule has seen the whole entry.
                        EntryValue::collapse(values).into_populations()
                    }
                }
                Some(_) => {
                    return Err(self.shape(
                        metric,
                        &format!("value on {} is neither a number nor an object", entry.date),
                    ));
                }
            };

            for (population, y) in values {
                populations.entry(population).or_default().push(DataPoint {
                    x: entry.date.clone(),
                    y,
                });
            }
        }

        Ok(MetricData::Line { populations })
    }

    fn table_data(&self, entries: &[Entry], metric: &str) -> Result<MetricData, TransposeError> {
        let mut dates: BTreeMap<String, TableSnapshot> = BTreeMap::new();

        for entry in entries {
            let rows = match entry.metrics.get(metric) {
                None | Some(Value::Null) => continue,
                Some(Value::Object(rows)) => rows,
                Some(_) => {
                    return Err(self.shape(
                        metric,
                        &format!("table value on {} is not an object", entry.date),
                    ));
                }
            };
            let snapshot = dates.entry(entry.date.clone()).or_default();
            snapshot.rows.extend(rows.iter().map(|(name, value)| Row {
                name: name.clone(),
                value: value.clone(),
            }));
        }

        Ok(MetricData::Table { dates })
    }

    fn shape(&self, metric: &str, message: &str) -> TransposeError {
        TransposeError::Shape {
            dataset: self.dataset.to_string(),
            metric: metric.to_string(),
            message: message.to_string(),
        }
    }
}
