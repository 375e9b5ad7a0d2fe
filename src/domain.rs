use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Written as the last field of every rendered document.
pub const API_VERSION: &str = "1.0.0";

pub const DEFAULT_CATEGORY: &str = "default";
pub const DEFAULT_POPULATION: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Quantum,
    Babbage,
    Redash,
}

impl SourceFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "quantum" => Some(SourceFormat::Quantum),
            "babbage" => Some(SourceFormat::Babbage),
            "redash" => Some(SourceFormat::Redash),
            _ => None,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Quantum => write!(f, "quantum"),
            SourceFormat::Babbage => write!(f, "babbage"),
            SourceFormat::Redash => write!(f, "redash"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Line,
    Table,
}

impl MetricKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "line" => Some(MetricKind::Line),
            "table" => Some(MetricKind::Table),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_category: Option<String>,
    pub metrics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_metrics: Option<Vec<String>>,
    pub dates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<Section>>,
    pub api_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub key: String,
    pub title: String,
    pub metrics: Vec<String>,
}

impl Section {
    pub fn new(title: &str, metrics: Vec<String>) -> Self {
        Self {
            key: section_key(title),
            title: title.to_string(),
            metrics,
        }
    }
}

/// `"Graphics Cards"` -> `"graphicscards"`
pub fn section_key(title: &str) -> String {
    title
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Value>,
    pub data: MetricData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<Annotation>>,
    pub api_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricData {
    Line {
        populations: BTreeMap<String, Vec<DataPoint>>,
    },
    Table {
        dates: BTreeMap<String, TableSnapshot>,
    },
}

impl MetricData {
    pub fn populations(&self) -> Option<&BTreeMap<String, Vec<DataPoint>>> {
        match self {
            MetricData::Line { populations } => Some(populations),
            MetricData::Table { .. } => None,
        }
    }

    pub fn table_dates(&self) -> Option<&BTreeMap<String, TableSnapshot>> {
        match self {
            MetricData::Line { .. } => None,
            MetricData::Table { dates } => Some(dates),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub x: String,
    #[serde(serialize_with = "serialize_number")]
    pub y: f64,
}

/// Whole values render without a fraction (`60`, not `60.0`).
fn serialize_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < MAX_EXACT {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub date: String,
    pub label: String,
}

pub fn dates_descending<I>(dates: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    dates
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .rev()
        .collect()
}
