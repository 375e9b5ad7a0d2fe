use regex::Regex;
use serde_json::{Map, Value};

use crate::annotations::Annotations;
use crate::decimal;
use crate::domain::{DEFAULT_CATEGORY, MetricDetail, Summary};
use crate::error::TransposeError;
use crate::formatter::DEFAULT_VALUE_MULTIPLIER;
use crate::formatter::quantum::{Entry, QuantumFormatter};
use crate::manifest::{DataSource, ExtraMetadata, FieldLayout, Keyed};
use crate::rules::{EntryValue, PopulationRules, compile_pattern};

#[derive(Debug)]
enum Selector {
    Patterns {
        fields: Regex,
        populations: Option<Regex>,
    },
    Split,
}

#[derive(Debug)]
struct MetricPlan {
    name: String,
    selector: Selector,
    rules: PopulationRules,
}

struct Decomposer<'a> {
    dataset: &'a str,
    layout: &'a FieldLayout,
    split: Regex,
    plans: Vec<MetricPlan>,
    multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct BabbageFormatter<'a> {
    inner: QuantumFormatter<'a>,
}

impl<'a> BabbageFormatter<'a> {
    pub fn new(
        dataset: &'a str,
        source: &'a DataSource,
        metadata: &'a ExtraMetadata,
        raw: Value,
        annotations: Annotations,
    ) -> Result<Self, TransposeError> {
        let decomposer = Decomposer::compile(dataset, source, metadata)?;
        let Value::Array(records) = raw else {
            return Err(TransposeError::MalformedSource {
                dataset: dataset.to_string(),
                message: "expected an array of records".to_string(),
            });
        };

        let entries = records
            .iter()
            .map(|record| decomposer.entry(record))
            .collect::<Result<Vec<_>, TransposeError>>()?;
        let categories = std::iter::once((DEFAULT_CATEGORY.to_string(), entries)).collect();

        Ok(Self {
            inner: QuantumFormatter::from_adapted(dataset, metadata, categories, annotations)?,
        })
    }

    pub fn get_summary(&self) -> Summary {
        self.inner.get_summary()
    }

    pub fn get_metric(&self, category: &str, metric: &str) -> Result<MetricDetail, TransposeError> {
        self.inner.get_metric(category, metric)
    }
}

impl<'a> Decomposer<'a> {
    fn compile(
        dataset: &'a str,
        source: &'a DataSource,
        metadata: &ExtraMetadata,
    ) -> Result<Self, TransposeError> {
        let layout = &source.fields;
        let split = compile_pattern(&layout.split_pattern, dataset, "fields.splitPattern")?;

        let plans = metadata
            .metrics
            .iter()
            .map(|(name, config)| {
                let selector = match &config.patterns {
                    Some(patterns) => Selector::Patterns {
                        fields: compile_pattern(
                            &patterns.fields,
                            dataset,
                            &format!("patterns.fields of metric \"{name}\""),
                        )?,
                        populations: patterns
                            .populations
                            .as_deref()
                            .map(|pattern| {
                                compile_pattern(
                                    pattern,
                                    dataset,
                                    &format!("patterns.populations of metric \"{name}\""),
                                )
                            })
                            .transpose()?,
                    },
                    None => Selector::Split,
                };
                Ok(MetricPlan {
                    name: name.to_string(),
                    selector,
                    rules: PopulationRules::compile(
                        config.population_modifications.as_ref(),
                        dataset,
                        name,
                    )?,
                })
            })
            .collect::<Result<Vec<_>, TransposeError>>()?;

        Ok(Self {
            dataset,
            layout,
            split,
            plans,
            multiplier: source.value_multiplier.unwrap_or(DEFAULT_VALUE_MULTIPLIER),
        })
    }

    fn entry(&self, record: &Value) -> Result<Entry, TransposeError> {
        let fields = record.as_object().ok_or_else(|| self.malformed("record is not an object"))?;
        let date = fields
            .get("date")
            .and_then(Value::as_str)
            .ok_or_else(|| self.malformed("record has no date"))?
            .to_string();

        let split = self.split_fields(fields)?;
        let mut metrics = Map::new();

        for plan in &self.plans {
            let value = match &plan.selector {
                Selector::Patterns {
                    fields: pattern,
                    populations,
                } => self.select_by_pattern(plan, fields, pattern, populations.as_ref())?,
                Selector::Split => split
                    .get(&plan.name)
                    .map(|raw| EntryValue::collapse(plan.rules.apply(raw.clone(), self.multiplier))),
            };
            if let Some(value) = value {
                metrics.insert(plan.name.clone(), value.into_json());
            }
        }

        Ok(Entry { date, metrics })
    }

    fn select_by_pattern(
        &self,
        plan: &MetricPlan,
        fields: &Map<String, Value>,
        pattern: &Regex,
        populations: Option<&Regex>,
    ) -> Result<Option<EntryValue>, TransposeError> {
        let matching = fields
            .iter()
            .filter(|(name, _)| pattern.is_match(name))
            .collect::<Vec<_>>();

        match matching.as_slice() {
            [] => Ok(None),
            [(name, value)] => Ok(self
                .number(&plan.name, name, value)?
                .map(|value| EntryValue::Scalar(decimal::scale(value, self.multiplier)))),
            _ => {
                let populations =
                    populations.ok_or_else(|| TransposeError::MissingPopulationPattern {
                        dataset: self.dataset.to_string(),
                        metric: plan.name.clone(),
                    })?;
                let mut raw = Vec::with_capacity(matching.len());
                for (name, value) in matching {
                    let population = populations
                        .captures(name)
                        .and_then(|captures| captures.get(1))
                        .ok_or_else(|| TransposeError::Shape {
                            dataset: self.dataset.to_string(),
                            metric: plan.name.clone(),
                            message: format!("field \"{name}\" has no population in the populations pattern"),
                        })?;
                    if let Some(value) = self.number(&plan.name, name, value)? {
                        raw.push((population.as_str().to_string(), value));
                    }
                }
                Ok(Some(EntryValue::collapse(plan.rules.apply(raw, self.multiplier))))
            }
        }
    }

    /// `metric -> [(population, raw value)]` for every key the split pattern divides.
    fn split_fields(
        &self,
        fields: &Map<String, Value>,
    ) -> Result<Keyed<Vec<(String, f64)>>, TransposeError> {
        let mut grouped: Vec<(String, Vec<(String, f64)>)> = Vec::new();

        for (key, value) in fields {
            if self.layout.ignore.iter().any(|ignored| ignored == key) {
                continue;
            }
            let Some(found) = self.split.find(key) else {
                continue;
            };
            let prefix = &key[..found.start()];
            let population = &key[found.end()..];
            let metric = self
                .layout
                .renames
                .get(prefix)
                .map(String::as_str)
                .unwrap_or(prefix);

            let Some(value) = self.number(metric, key, value)? else {
                continue;
            };
            match grouped.iter_mut().find(|(name, _)| name == metric) {
                Some((_, populations)) => populations.push((population.to_string(), value)),
                None => grouped.push((metric.to_string(), vec![(population.to_string(), value)])),
            }
        }

        Ok(grouped.into_iter().collect())
    }

    fn number(&self, metric: &str, field: &str, value: &Value) -> Result<Option<f64>, TransposeError> {
        match value {
            Value::Null => Ok(None),
            Value::Number(number) => Ok(number.as_f64()),
            _ => Err(TransposeError::Shape {
                dataset: self.dataset.to_string(),
                metric: metric.to_string(),
                message: format!("field \"{field}\" is not a number"),
            }),
        }
    }

    fn malformed(&self, message: &str) -> TransposeError {
        TransposeError::MalformedSource {
            dataset: self.dataset.to_string(),
            message: message.to_string(),
        }
    }
}
