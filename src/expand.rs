//! Expansion of a multi-scenario specification into one configuration per scenario.
//!
//! A specification is a nested table in which every leaf holds either a single value or an array of
//! candidate values to explore. Expansion happens in three steps:
//!
//! 1. [`expand_dict`] flattens the nested table, joining keys with a separator, and wraps single
//!    values in an array of candidates.
//! 2. [`combine_arguments`] takes the cartesian product of all candidate arrays, except for linked
//!    keys, whose candidates are paired up by position instead.
//! 3. [`nest_dict`] rebuilds the nested shape for each resulting scenario.
//!
//! Arrays are always interpreted as candidates, so a parameter which is itself an array must be
//! wrapped in another array (e.g. `bts = [["BR", "DE"]]`). A table is normally descended into; to
//! keep a table as a single value, prefix its key with the stop marker (e.g. `_size = {...}`).
use anyhow::{Context, Result, bail, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use log::warn;
use serde::Deserialize;
use toml::{Table, Value};

/// Name of the reserved table holding expansion options
pub const EXPANSION_KEY: &str = "expansion";

/// A flattened specification: every key maps to its candidate values
pub type FlatMap = IndexMap<String, Vec<Value>>;

/// A single flattened scenario
pub type FlatScenario = IndexMap<String, Value>;

/// Groups of keys whose candidate values are paired up rather than combined
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LinkedKeys {
    /// A single group
    Single(Vec<String>),
    /// Several groups
    Groups(Vec<Vec<String>>),
}

impl Default for LinkedKeys {
    fn default() -> Self {
        Self::Groups(Vec::new())
    }
}

impl LinkedKeys {
    /// The linked groups
    pub fn groups(&self) -> Vec<&[String]> {
        match self {
            Self::Single(keys) => vec![keys.as_slice()],
            Self::Groups(groups) => groups.iter().map(Vec::as_slice).collect(),
        }
    }
}

fn default_separator() -> String {
    "/".to_string()
}

fn default_stop_marker() -> char {
    '_'
}

/// Options controlling how a specification is expanded
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpansionOptions {
    /// Joins nested keys in flattened keys
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Marks tables which should be kept as single values
    #[serde(default = "default_stop_marker")]
    pub stop_marker: char,
    /// Groups of flattened keys whose values are paired up. A key ending in `*` matches all keys
    /// starting with the rest of it.
    #[serde(default)]
    pub linked_keys: LinkedKeys,
    /// Values (by flattened key) added to every scenario
    #[serde(default)]
    pub shared: Table,
}

impl Default for ExpansionOptions {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            stop_marker: default_stop_marker(),
            linked_keys: LinkedKeys::default(),
            shared: Table::new(),
        }
    }
}

impl ExpansionOptions {
    fn validate(&self) -> Result<()> {
        ensure!(!self.separator.is_empty(), "Separator cannot be empty");
        ensure!(
            !self.separator.contains(self.stop_marker),
            "Separator cannot contain the stop marker"
        );

        Ok(())
    }
}

/// Flatten a nested specification.
///
/// # Arguments
///
/// * `table` - The nested specification
/// * `stop_marker` - Prefix marking tables which should not be descended into
/// * `separator` - Joins nested keys
pub fn expand_dict(table: &Table, stop_marker: char, separator: &str) -> FlatMap {
    let mut flat = FlatMap::new();
    expand_into(&mut flat, table, "", stop_marker, separator);
    flat
}

fn expand_into(flat: &mut FlatMap, table: &Table, base_key: &str, stop_marker: char, sep: &str) {
    for (key, value) in table {
        let stopped = key.starts_with(stop_marker);
        let key = key.strip_prefix(stop_marker).unwrap_or(key);
        let full_key = if base_key.is_empty() {
            key.to_string()
        } else {
            format!("{base_key}{sep}{key}")
        };

        match value {
            Value::Array(candidates) => {
                flat.insert(full_key, candidates.clone());
            }
            Value::Table(inner) if !stopped => expand_into(flat, inner, &full_key, stop_marker, sep),
            other => {
                flat.insert(full_key, vec![other.clone()]);
            }
        }
    }
}

/// Find the flattened keys matching a linked group
fn resolve_linked_keys(flat: &FlatMap, group: &[String]) -> Vec<String> {
    let mut keys = Vec::new();
    for pattern in group {
        if let Some(prefix) = pattern.strip_suffix('*') {
            keys.extend(
                flat.keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned(),
            );
        } else if flat.contains_key(pattern) {
            keys.push(pattern.clone());
        } else {
            warn!("Linked key {pattern} not found");
        }
    }

    keys.into_iter().unique().collect()
}

/// Pair up the candidate values of linked keys by position
fn combine_linked(flat: &mut FlatMap, group: &[String]) -> Result<Option<Vec<FlatScenario>>> {
    let keys = resolve_linked_keys(flat, group);
    if keys.is_empty() {
        warn!("No keys found for linked group [{}]", group.join(" "));
        return Ok(None);
    }

    let candidates: Vec<Vec<Value>> = keys
        .iter()
        .filter_map(|key| flat.shift_remove(key))
        .collect();
    let n_args = candidates[0].len();
    ensure!(
        candidates.iter().all(|values| values.len() == n_args),
        "All arguments in [{}] must have the same number of values",
        keys.join(" ")
    );
    if n_args == 1 {
        warn!(
            "Arguments in [{}] have a single parameter value",
            keys.join(" ")
        );
    }

    Ok(Some(
        (0..n_args)
            .map(|i| {
                keys.iter()
                    .zip(&candidates)
                    .map(|(key, values)| (key.clone(), values[i].clone()))
                    .collect()
            })
            .collect(),
    ))
}

/// Cartesian product of partial scenarios, merging each combination. The first list varies slowest.
fn product(bits: Vec<Vec<FlatScenario>>) -> Vec<FlatScenario> {
    bits.into_iter().fold(vec![FlatScenario::new()], |acc, options| {
        acc.iter()
            .cartesian_product(&options)
            .map(|(partial, option)| {
                let mut merged = partial.clone();
                merged.extend(option.iter().map(|(k, v)| (k.clone(), v.clone())));
                merged
            })
            .collect()
    })
}

/// Create one flat scenario for each combination of candidate values.
///
/// # Arguments
///
/// * `flat` - Flattened specification (see [`expand_dict`])
/// * `linked_keys` - Groups of keys whose candidates are paired up by position
/// * `shared` - Values added to (and overriding those in) every scenario
pub fn combine_arguments(
    flat: &FlatMap,
    linked_keys: &LinkedKeys,
    shared: &Table,
) -> Result<Vec<FlatScenario>> {
    ensure!(!flat.is_empty(), "Scenario specification is empty");

    let mut flat = flat.clone();
    let mut bits = Vec::new();
    for group in linked_keys.groups() {
        if let Some(linked) = combine_linked(&mut flat, group)? {
            bits.push(linked);
        }
    }

    for (key, values) in &flat {
        ensure!(!values.is_empty(), "No candidate values given for {key}");
    }
    let cross = flat
        .iter()
        .map(|(key, values)| {
            values
                .iter()
                .map(|value| FlatScenario::from_iter([(key.clone(), value.clone())]))
                .collect()
        })
        .collect();
    bits.push(product(cross));

    let mut scenarios = product(bits);
    for scenario in &mut scenarios {
        scenario.extend(shared.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    Ok(scenarios)
}

/// Rebuild a nested table from a flat scenario
pub fn nest_dict(flat: &FlatScenario, separator: &str) -> Result<Table> {
    let mut nested = Table::new();
    for (key, value) in flat {
        let mut bits = key.split(separator).collect_vec();
        let last = bits.pop().context("Empty key")?;

        let mut table = &mut nested;
        for bit in bits {
            let entry = table
                .entry(bit.to_string())
                .or_insert_with(|| Value::Table(Table::new()));
            let Value::Table(inner) = entry else {
                bail!("Key {key} conflicts with an existing value at {bit}");
            };
            table = inner;
        }
        table.insert(last.to_string(), value.clone());
    }

    Ok(nested)
}

/// Expand a specification into fully nested per-scenario configurations.
///
/// A top-level `expansion` table, if present, holds [`ExpansionOptions`] and is not itself
/// expanded.
pub fn generate_configurations(spec: &Table) -> Result<Vec<Table>> {
    let mut spec = spec.clone();
    let options: ExpansionOptions = match spec.remove(EXPANSION_KEY) {
        Some(value) => value.try_into().context("Invalid expansion options")?,
        None => ExpansionOptions::default(),
    };
    options.validate()?;

    let flat = expand_dict(&spec, options.stop_marker, &options.separator);
    combine_arguments(&flat, &options.linked_keys, &options.shared)?
        .iter()
        .map(|scenario| nest_dict(scenario, &options.separator))
        .collect()
}
