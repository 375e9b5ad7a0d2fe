use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::domain::Section;
use crate::error::TransposeError;

/// A JSON object whose key order is significant.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyed<T>(Vec<(String, T)>);

impl<T> Keyed<T> {
    pub fn get(&self, key: &str) -> Option<&T> {
        self.0
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn first(&self) -> Option<(&str, &T)> {
        self.0.first().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, key: String, value: T) {
        match self.0.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }
}

impl<T> Default for Keyed<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> FromIterator<(String, T)> for Keyed<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut keyed = Keyed::default();
        for (key, value) in iter {
            keyed.insert(key, value);
        }
        keyed
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Keyed<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for KeyedVisitor<T> {
            type Value = Keyed<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut keyed = Keyed::default();
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    keyed.insert(key, value);
                }
                Ok(keyed)
            }
        }

        deserializer.deserialize_map(KeyedVisitor(PhantomData))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub sources: Keyed<SourceConfig>,
    pub extra_metadata: ExtraMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub data: DataSource,
    #[serde(default)]
    pub annotations: Option<AnnotationSource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub url: UrlConfig,
    pub format: String,
    #[serde(default)]
    pub value_multiplier: Option<f64>,
    #[serde(default)]
    pub queries: Option<UrlConfig>,
    #[serde(default)]
    pub fields: FieldLayout,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationSource {
    pub url: UrlConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UrlConfig {
    Static(String),
    Templated {
        base: String,
        #[serde(default)]
        query: Keyed<String>,
    },
}

impl UrlConfig {
    pub fn resolve(&self, dataset: &str, secrets: &dyn SecretSource) -> Result<String, TransposeError> {
        self.resolve_with(dataset, secrets, &[])
    }

    /// Query values name environment variables, never literal values.
    pub fn resolve_with(
        &self,
        dataset: &str,
        secrets: &dyn SecretSource,
        substitutions: &[(&str, &str)],
    ) -> Result<String, TransposeError> {
        match self {
            UrlConfig::Static(url) => Ok(substitute(url, substitutions)),
            UrlConfig::Templated { base, query } => {
                let base = substitute(base, substitutions);
                let params = query
                    .iter()
                    .map(|(param, variable)| {
                        secrets
                            .secret(variable)
                            .map(|value| (param.to_string(), value))
                            .ok_or_else(|| TransposeError::MissingSecret {
                                dataset: dataset.to_string(),
                                variable: variable.to_string(),
                            })
                    })
                    .collect::<Result<Vec<_>, TransposeError>>()?;
                let parsed = if params.is_empty() {
                    Url::parse(&base)
                } else {
                    Url::parse_with_params(&base, &params)
                };
                let url = parsed.map_err(|err| TransposeError::InvalidUrl {
                    url: base.clone(),
                    message: err.to_string(),
                })?;
                Ok(url.to_string())
            }
        }
    }

    pub fn query_variable(&self, param: &str) -> Option<&str> {
        match self {
            UrlConfig::Static(_) => None,
            UrlConfig::Templated { query, .. } => query.get(param).map(String::as_str),
        }
    }
}

fn substitute(template: &str, substitutions: &[(&str, &str)]) -> String {
    substitutions
        .iter()
        .fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldLayout {
    #[serde(default = "default_split_pattern")]
    pub split_pattern: String,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub renames: Keyed<String>,
}

impl Default for FieldLayout {
    fn default() -> Self {
        Self {
            split_pattern: default_split_pattern(),
            ignore: Vec::new(),
            renames: Keyed::default(),
        }
    }
}

fn default_split_pattern() -> String {
    "_".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_category: Option<String>,
    #[serde(default)]
    pub summary_metrics: Option<Vec<String>>,
    #[serde(default)]
    pub metrics: Keyed<MetricConfig>,
    #[serde(default)]
    pub dashboard: Option<Dashboard>,
}

impl ExtraMetadata {
    pub fn sections(&self) -> Option<Vec<Section>> {
        let dashboard = self.dashboard.as_ref().filter(|dashboard| dashboard.sectioned)?;
        Some(
            dashboard
                .sections
                .iter()
                .map(|section| Section::new(&section.title, section.metrics.clone()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricConfig {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default = "default_metric_type")]
    pub kind: String,
    #[serde(default)]
    pub axes: Option<Value>,
    #[serde(default)]
    pub columns: Option<Value>,
    #[serde(default)]
    pub patterns: Option<FieldPatterns>,
    #[serde(default)]
    pub population_modifications: Option<PopulationModifications>,
}

fn default_metric_type() -> String {
    "line".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldPatterns {
    pub fields: String,
    #[serde(default)]
    pub populations: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationModifications {
    #[serde(default)]
    pub renames: Vec<Rename>,
    #[serde(default)]
    pub append: Option<AppendRule>,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub replacement_groups: Vec<ReplacementGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRule {
    pub match_pattern: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementGroup {
    pub name: String,
    pub member_pattern: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dashboard {
    #[serde(default)]
    pub sectioned: bool,
    #[serde(default)]
    pub sections: Vec<SectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectionConfig {
    pub title: String,
    #[serde(default, alias = "charts")]
    pub metrics: Vec<String>,
}

pub trait SecretSource: Send + Sync {
    fn secret(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl SecretSource for HashMap<String, String> {
    fn secret(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

pub struct ManifestLoader;

impl ManifestLoader {
    pub fn parse(dataset: &str, content: &str) -> Result<Manifest, TransposeError> {
        serde_json::from_str(content).map_err(|err| TransposeError::ManifestParse {
            dataset: dataset.to_string(),
            message: err.to_string(),
        })
    }

    /// Loads one manifest; the dataset name is the file stem.
    pub fn load(path: &Path) -> Result<(String, Manifest), TransposeError> {
        let dataset = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| TransposeError::ManifestRead(path.to_path_buf()))?
            .to_string();
        let content =
            fs::read_to_string(path).map_err(|_| TransposeError::ManifestRead(path.to_path_buf()))?;
        let manifest = Self::parse(&dataset, &content)?;
        Ok((dataset, manifest))
    }

    pub fn load_dir(dir: &Path) -> Result<Vec<(String, Manifest)>, TransposeError> {
        let entries =
            fs::read_dir(dir).map_err(|_| TransposeError::ManifestRead(dir.to_path_buf()))?;
        let mut paths = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect::<Vec<PathBuf>>();
        paths.sort();
        paths.iter().map(|path| Self::load(path)).collect()
    }

    pub fn find(dir: &Path, dataset: &str) -> Result<Manifest, TransposeError> {
        let valid_name = !dataset.is_empty()
            && dataset
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        let path = dir.join(format!("{dataset}.json"));
        if !valid_name || !path.exists() {
            return Err(TransposeError::DatasetNotFound(dataset.to_string()));
        }
        Self::load(&path).map(|(_, manifest)| manifest)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const MANIFEST: &str = r#"{
        "sources": {
            "desktop": {
                "data": {
                    "url": {
                        "base": "https://example.com/data.json",
                        "query": { "api_key": "EXAMPLE_API_KEY" }
                    },
                    "format": "quantum"
                },
                "annotations": { "url": "https://example.com/annotations.json" }
            },
            "android": {
                "data": { "url": "fixtures/android.json", "format": "babbage" }
            }
        },
        "extraMetadata": {
            "title": "Hardware",
            "metrics": {
                "zeta": { "type": "line" },
                "alpha": { "type": "table", "columns": [] }
            },
            "dashboard": {
                "sectioned": true,
                "sections": [
                    { "title": "Graphics Cards", "charts": ["zeta"] },
                    { "title": "Other", "metrics": ["alpha"] }
                ]
            }
        }
    }"#;

    #[test]
    fn keeps_manifest_key_order() {
        let manifest = ManifestLoader::parse("hardware", MANIFEST).unwrap();
        assert_eq!(
            manifest.sources.keys().collect::<Vec<_>>(),
            vec!["desktop", "android"]
        );
        assert_eq!(
            manifest.extra_metadata.metrics.keys().collect::<Vec<_>>(),
            vec!["zeta", "alpha"]
        );
    }

    #[test]
    fn section_charts_alias_metrics() {
        let manifest = ManifestLoader::parse("hardware", MANIFEST).unwrap();
        let sections = manifest.extra_metadata.sections().unwrap();
        assert_eq!(sections[0].key, "graphicscards");
        assert_eq!(sections[0].metrics, vec!["zeta".to_string()]);
        assert_eq!(sections[1].metrics, vec!["alpha".to_string()]);
    }

    #[test]
    fn resolves_templated_url_from_secrets() {
        let manifest = ManifestLoader::parse("hardware", MANIFEST).unwrap();
        let (_, desktop) = manifest.sources.first().unwrap();
        let secrets = HashMap::from([("EXAMPLE_API_KEY".to_string(), "s3cr3t&x".to_string())]);
        let url = desktop.data.url.resolve("hardware", &secrets).unwrap();
        assert_eq!(url, "https://example.com/data.json?api_key=s3cr3t%26x");
    }

    #[test]
    fn missing_secret_names_dataset_and_variable() {
        let manifest = ManifestLoader::parse("hardware", MANIFEST).unwrap();
        let (_, desktop) = manifest.sources.first().unwrap();
        let err = desktop
            .data
            .url
            .resolve("hardware", &HashMap::new())
            .unwrap_err();
        assert_matches!(
            err,
            TransposeError::MissingSecret { ref dataset, ref variable }
                if dataset == "hardware" && variable == "EXAMPLE_API_KEY"
        );
    }

    #[test]
    fn static_url_substitutes_placeholders() {
        let url = UrlConfig::Static("https://example.com/queries/{id}.json".to_string());
        let resolved = url
            .resolve_with("redash", &HashMap::new(), &[("id", "42")])
            .unwrap();
        assert_eq!(resolved, "https://example.com/queries/42.json");
    }

    #[test]
    fn invalid_manifest_reports_dataset() {
        let err = ManifestLoader::parse("broken", "{\"sources\": 1}").unwrap_err();
        assert_matches!(err, TransposeError::ManifestParse { ref dataset, .. } if dataset == "broken");
    }
}
