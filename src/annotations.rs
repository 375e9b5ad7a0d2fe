use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::Annotation;
use crate::error::TransposeError;

#[derive(Debug, Clone, Deserialize)]
struct AnnotationRecord {
    date: String,
    #[serde(default)]
    annotation: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct Annotations {
    by_category: HashMap<String, Vec<AnnotationRecord>>,
}

impl Annotations {
    pub fn parse(dataset: &str, raw: Value) -> Result<Self, TransposeError> {
        let by_category = serde_json::from_value(raw).map_err(|err| {
            TransposeError::MalformedSource {
                dataset: dataset.to_string(),
                message: format!("annotations: {err}"),
            }
        })?;
        Ok(Self { by_category })
    }

    /// `None` when nothing matches.
    pub fn get(&self, category: &str, metric: &str) -> Option<Vec<Annotation>> {
        let annotations = self
            .by_category
            .get(category)?
            .iter()
            .filter_map(|record| {
                record.annotation.get(metric).map(|label| Annotation {
                    date: record.date.clone(),
                    label: label.clone(),
                })
            })
            .collect::<Vec<_>>();
        (!annotations.is_empty()).then_some(annotations)
    }
}
