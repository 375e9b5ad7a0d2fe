use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::decimal;
use crate::domain::DEFAULT_POPULATION;
use crate::error::TransposeError;
use crate::manifest::PopulationModifications;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<'a> {
    Excluded,
    Grouped(&'a str),
    Named(String),
}

#[derive(Debug, Clone, Default)]
pub struct PopulationRules {
    exclusions: Vec<String>,
    groups: Vec<(String, Regex)>,
    renames: Vec<(String, String)>,
    append: Option<(Regex, String)>,
}

impl PopulationRules {
    pub fn compile(
        modifications: Option<&PopulationModifications>,
        dataset: &str,
        metric: &str,
    ) -> Result<Self, TransposeError> {
        let Some(modifications) = modifications else {
            return Ok(Self::default());
        };

        let groups = modifications
            .replacement_groups
            .iter()
            .map(|group| {
                let field = format!("replacement group \"{}\" of metric \"{metric}\"", group.name);
                Ok((group.name.clone(), compile_pattern(&group.member_pattern, dataset, &field)?))
            })
            .collect::<Result<Vec<_>, TransposeError>>()?;

        let append = modifications
            .append
            .as_ref()
            .map(|append| {
                let field = format!("append rule of metric \"{metric}\"");
                Ok::<_, TransposeError>((
                    compile_pattern(&append.match_pattern, dataset, &field)?,
                    append.value.clone(),
                ))
            })
            .transpose()?;

        Ok(Self {
            exclusions: modifications.exclusions.clone(),
            groups,
            renames: modifications
                .renames
                .iter()
                .map(|rename| (rename.from.clone(), rename.to.clone()))
                .collect(),
            append,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.exclusions.is_empty()
            && self.groups.is_empty()
            && self.renames.is_empty()
            && self.append.is_none()
    }

    pub fn classify(&self, raw: &str) -> Outcome<'_> {
        if self.exclusions.iter().any(|excluded| excluded == raw) {
            return Outcome::Excluded;
        }
        if let Some((name, _)) = self.groups.iter().find(|(_, pattern)| pattern.is_match(raw)) {
            return Outcome::Grouped(name);
        }
        if let Some((_, to)) = self.renames.iter().find(|(from, _)| from == raw) {
            return Outcome::Named(to.clone());
        }
        if let Some((pattern, suffix)) = &self.append {
            if pattern.is_match(raw) {
                return Outcome::Named(format!("{raw}{suffix}"));
            }
        }
        Outcome::Named(raw.to_string())
    }

    /// Groups are summed raw and rescaled once the whole entry has been seen.
    pub fn apply<I>(&self, raw: I, multiplier: f64) -> Vec<(String, f64)>
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let mut named: Vec<(String, f64)> = Vec::new();
        let mut group_totals: Vec<(&str, f64)> = Vec::new();

        for (raw_name, value) in raw {
            match self.classify(&raw_name) {
                Outcome::Excluded => {}
                Outcome::Grouped(group) => {
                    match group_totals.iter_mut().find(|(name, _)| *name == group) {
                        Some(total) => total.1 = decimal::sum(&[total.1, value]),
                        None => group_totals.push((group, value)),
                    }
                }
                Outcome::Named(name) => {
                    merge(&mut named, name, decimal::scale(value, multiplier));
                }
            }
        }

        for (group, total) in group_totals {
            merge(&mut named, group.to_string(), decimal::scale(total, multiplier));
        }
        named
    }
}

fn merge(populations: &mut Vec<(String, f64)>, name: String, value: f64) {
    match populations.iter_mut().find(|(existing, _)| *existing == name) {
        Some(entry) => entry.1 = decimal::sum(&[entry.1, value]),
        None => populations.push((name, value)),
    }
}

pub(crate) fn compile_pattern(
    pattern: &str,
    dataset: &str,
    field: &str,
) -> Result<Regex, TransposeError> {
    Regex::new(pattern).map_err(|err| TransposeError::InvalidPattern {
        dataset: dataset.to_string(),
        field: field.to_string(),
        message: err.to_string(),
    })
}

/// A metric's value at one date after every rule has run.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryValue {
    Scalar(f64),
    Populations(Vec<(String, f64)>),
}

impl EntryValue {
    /// A single surviving population is promoted to the scalar value.
    pub fn collapse(populations: Vec<(String, f64)>) -> Self {
        match populations.as_slice() {
            [(_, value)] => EntryValue::Scalar(*value),
            _ => EntryValue::Populations(populations),
        }
    }

    /// A scalar renders as the `default` population.
    pub fn into_populations(self) -> Vec<(String, f64)> {
        match self {
            EntryValue::Scalar(value) => vec![(DEFAULT_POPULATION.to_string(), value)],
            EntryValue::Populations(populations) => populations,
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            EntryValue::Scalar(value) => number(value),
            EntryValue::Populations(populations) => Value::Object(
                populations
                    .into_iter()
                    .map(|(name, value)| (name, number(value)))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

fn number(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
