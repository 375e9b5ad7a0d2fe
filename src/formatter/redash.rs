use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::annotations::Annotations;
use crate::domain::{
    API_VERSION, DEFAULT_CATEGORY, DataPoint, MetricData, MetricDetail, MetricKind, Summary,
    dates_descending,
};
use crate::error::TransposeError;
use crate::fetch::{Fetcher, fetch_json};
use crate::manifest::{DataSource, ExtraMetadata, Keyed, SecretSource, UrlConfig};
use crate::rules::{EntryValue, PopulationRules};

pub const DEFAULT_QUERY_URL: &str = "https://sql.telemetry.mozilla.org/api/queries/{id}/results.json";

#[derive(Debug, Deserialize)]
struct RawDashboard {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    widgets: Vec<RawWidget>,
}

#[derive(Debug, Deserialize)]
struct RawWidget {
    id: Value,
    #[serde(default)]
    visualization: Option<RawVisualization>,
}

#[derive(Debug, Deserialize)]
struct RawVisualization {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    options: RawOptions,
    #[serde(default)]
    query: Option<RawQuery>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOptions {
    #[serde(default)]
    global_series_type: Option<String>,
    #[serde(default)]
    column_mapping: Keyed<String>,
}

#[derive(Debug, Deserialize)]
struct RawQuery {
    id: Value,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    query_result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    rows: Vec<Map<String, Value>>,
}

type QueryRows = Arc<Vec<Map<String, Value>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnMapping {
    x: String,
    ys: Vec<String>,
    series: Option<String>,
}

#[derive(Debug)]
struct Widget {
    id: String,
    query_id: String,
    query_url: String,
    title: Option<String>,
    description: Option<String>,
    mapping: ColumnMapping,
    rules: PopulationRules,
}

pub struct RedashFormatter<'a, F: Fetcher> {
    dataset: &'a str,
    metadata: &'a ExtraMetadata,
    title: Option<String>,
    widgets: Vec<Widget>,
    annotations: Annotations,
    value_multiplier: f64,
    fetcher: &'a F,
    results: Mutex<HashMap<String, Arc<OnceCell<QueryRows>>>>,
}

impl<'a, F: Fetcher> RedashFormatter<'a, F> {
    pub fn new(
        dataset: &'a str,
        source: &'a DataSource,
        metadata: &'a ExtraMetadata,
        raw: Value,
        annotations: Annotations,
        fetcher: &'a F,
        secrets: &dyn SecretSource,
    ) -> Result<Self, TransposeError> {
        let dashboard: RawDashboard =
            serde_json::from_value(raw).map_err(|err| TransposeError::MalformedSource {
                dataset: dataset.to_string(),
                message: err.to_string(),
            })?;
        let locator = query_locator(source);

        let mut widgets = Vec::new();
        for widget in dashboard.widgets {
            let id = id_string(&widget.id).ok_or_else(|| TransposeError::MalformedSource {
                dataset: dataset.to_string(),
                message: format!("widget id {} is neither a number nor a string", widget.id),
            })?;
            // Text widgets carry no visualization.
            let Some(visualization) = widget.visualization else {
                continue;
            };

            let is_chart = visualization.kind.eq_ignore_ascii_case("chart");
            let series_type = visualization.options.global_series_type.as_deref();
            if !is_chart || series_type != Some("line") {
                return Err(TransposeError::UnsupportedVisualization {
                    dataset: dataset.to_string(),
                    widget: id,
                    kind: if is_chart {
                        series_type.unwrap_or("unknown").to_string()
                    } else {
                        visualization.kind
                    },
                });
            }

            let mapping = column_mapping(dataset, &id, &visualization.options.column_mapping)?;
            let query_id = visualization
                .query
                .as_ref()
                .and_then(|query| id_string(&query.id))
                .unwrap_or_else(|| id.clone());
            let query_url = locator.resolve_with(dataset, secrets, &[("id", query_id.as_str())])?;
            let config = metadata.metrics.get(&id);
            let rules = PopulationRules::compile(
                config.and_then(|config| config.population_modifications.as_ref()),
                dataset,
                &id,
            )?;

            widgets.push(Widget {
                title: config
                    .and_then(|config| config.title.clone())
                    .or(visualization.name),
                description: config
                    .and_then(|config| config.description.clone())
                    .or(visualization.description),
                id,
                query_id,
                query_url,
                mapping,
                rules,
            });
        }

        Ok(Self {
            dataset,
            metadata,
            title: dashboard.name,
            widgets,
            annotations,
            value_multiplier: source.value_multiplier.unwrap_or(1.0),
            fetcher,
            results: Mutex::new(HashMap::new()),
        })
    }

    pub async fn get_summary(&self) -> Result<Summary, TransposeError> {
        let rows = try_join_all(self.widgets.iter().map(|widget| self.query_rows(widget))).await?;
        let dates = dates_descending(self.widgets.iter().zip(rows.iter()).flat_map(
            |(widget, rows)| {
                rows.iter()
                    .filter_map(|row| row.get(&widget.mapping.x).and_then(date_of))
            },
        ));

        Ok(Summary {
            title: self.title.clone(),
            description: self.metadata.description.clone(),
            categories: vec![DEFAULT_CATEGORY.to_string()],
            default_category: self.metadata.default_category.clone(),
            metrics: self.widgets.iter().map(|widget| widget.id.clone()).collect(),
            summary_metrics: self.metadata.summary_metrics.clone(),
            dates,
            sections: self.metadata.sections(),
            api_version: API_VERSION.to_string(),
        })
    }

    pub async fn get_metric(
        &self,
        category: &str,
        metric: &str,
    ) -> Result<MetricDetail, TransposeError> {
        let widget = self
            .widgets
            .iter()
            .find(|widget| widget.id == metric)
            .filter(|_| category == DEFAULT_CATEGORY)
            .ok_or_else(|| TransposeError::MetricNotFound {
                dataset: self.dataset.to_string(),
                category: category.to_string(),
                metric: metric.to_string(),
            })?;
        let rows = self.query_rows(widget).await?;

        let mut by_date: Vec<(String, Vec<(String, f64)>)> = Vec::new();
        for row in rows.iter() {
            let Some(x) = row.get(&widget.mapping.x).and_then(date_of) else {
                continue;
            };
            let series = widget
                .mapping
                .series
                .as_ref()
                .and_then(|column| row.get(column))
                .filter(|value| !value.is_null());

            let raw = match by_date.iter().position(|(date, _)| *date == x) {
                Some(index) => &mut by_date[index].1,
                None => {
                    by_date.push((x, Vec::new()));
                    let last = by_date.len() - 1;
                    &mut by_date[last].1
                }
            };
            match series {
                Some(series) => {
                    if let Some(y) = self.y_value(widget, row, &widget.mapping.ys[0])? {
                        raw.push((label_of(series), y));
                    }
                }
                None => {
                    for column in &widget.mapping.ys {
                        if let Some(y) = self.y_value(widget, row, column)? {
                            raw.push((column.clone(), y));
                        }
                    }
                }
            }
        }

        let mut populations: BTreeMap<String, Vec<DataPoint>> = BTreeMap::new();
        for (x, raw) in by_date {
            let values = widget.rules.apply(raw, self.value_multiplier);
            for (population, y) in EntryValue::collapse(values).into_populations() {
                populations.entry(population).or_default().push(DataPoint {
                    x: x.clone(),
                    y,
                });
            }
        }

        let config = self.metadata.metrics.get(metric);
        Ok(MetricDetail {
            title: widget.title.clone(),
            description: widget.description.clone(),
            kind: MetricKind::Line,
            axes: config.and_then(|config| config.axes.clone()),
            columns: None,
            data: MetricData::Line { populations },
            annotations: self.annotations.get(category, metric),
            api_version: API_VERSION.to_string(),
        })
    }

    pub fn clear_cache(&self) {
        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(dataset = self.dataset, cached = results.len(), "clearing query results");
        results.clear();
    }

    async fn query_rows(&self, widget: &Widget) -> Result<QueryRows, TransposeError> {
        let cell = {
            let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
            results
                .entry(widget.query_id.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let rows = cell
            .get_or_try_init(|| async {
                debug!(dataset = self.dataset, query = %widget.query_id, "fetching query result");
                let raw = fetch_json(self.fetcher, self.dataset, &widget.query_url).await?;
                let response: QueryResponse =
                    serde_json::from_value(raw).map_err(|err| TransposeError::MalformedSource {
                        dataset: self.dataset.to_string(),
                        message: format!("query {}: {err}", widget.query_id),
                    })?;
                Ok::<_, TransposeError>(Arc::new(response.query_result.data.rows))
            })
            .await?;
        Ok(Arc::clone(rows))
    }

    fn y_value(
        &self,
        widget: &Widget,
        row: &Map<String, Value>,
        column: &str,
    ) -> Result<Option<f64>, TransposeError> {
        match row.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(number)) => Ok(number.as_f64()),
            Some(_) => Err(TransposeError::Shape {
                dataset: self.dataset.to_string(),
                metric: widget.id.clone(),
                message: format!("column \"{column}\" is not a number"),
            }),
        }
    }
}

fn query_locator(source: &DataSource) -> UrlConfig {
    if let Some(queries) = &source.queries {
        return queries.clone();
    }
    let query = source
        .url
        .query_variable("api_key")
        .map(|variable| ("api_key".to_string(), variable.to_string()))
        .into_iter()
        .collect();
    UrlConfig::Templated {
        base: DEFAULT_QUERY_URL.to_string(),
        query,
    }
}

fn column_mapping(
    dataset: &str,
    widget: &str,
    mapping: &Keyed<String>,
) -> Result<ColumnMapping, TransposeError> {
    let invalid = |message: &str| TransposeError::InvalidColumnMapping {
        dataset: dataset.to_string(),
        widget: widget.to_string(),
        message: message.to_string(),
    };
    let columns_for = |role: &str| {
        mapping
            .iter()
            .filter(|(_, mapped)| mapped.as_str() == role)
            .map(|(column, _)| column.to_string())
            .collect::<Vec<_>>()
    };

    let mut xs = columns_for("x");
    let ys = columns_for("y");
    let mut series = columns_for("series");

    if xs.len() != 1 {
        return Err(invalid("exactly one x column is required"));
    }
    if ys.is_empty() {
        return Err(invalid("at least one y column is required"));
    }
    if series.len() > 1 {
        return Err(invalid("at most one series column is allowed"));
    }
    if !series.is_empty() && ys.len() > 1 {
        return Err(invalid("a series column requires exactly one y column"));
    }

    Ok(ColumnMapping {
        x: xs.remove(0),
        ys,
        series: series.pop(),
    })
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) => Some(text.clone()),
        _ => None,
    }
}

/// Date portion of an ISO-8601 timestamp.
fn date_of(value: &Value) -> Option<String> {
    value.as_str().map(|text| text.chars().take(10).collect())
}

fn label_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
