//! Opaque server settings and their TOML rendering.
//!
//! The generator never interprets settings: whatever shape the deployer gives
//! is carried through [`SettingsValue`] and rendered into the file the server
//! reads with `--config`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use toml::value::Datetime;

use super::error::GenerateError;

/// Settings table handed to annil-server. Keys render in sorted order.
pub type Settings = BTreeMap<String, SettingsValue>;

/// One structured settings value.
///
/// Deserializes from any self-describing format through `toml::Value`, so a
/// `null` anywhere below the top-level table is rejected at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "toml::Value", into = "toml::Value")]
pub enum SettingsValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Datetime(Datetime),
    Array(Vec<SettingsValue>),
    Table(Settings),
}

impl From<toml::Value> for SettingsValue {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => Self::String(s),
            toml::Value::Integer(i) => Self::Integer(i),
            toml::Value::Float(f) => Self::Float(f),
            toml::Value::Boolean(b) => Self::Boolean(b),
            toml::Value::Datetime(d) => Self::Datetime(d),
            toml::Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            toml::Value::Table(table) => Self::Table(from_toml_table(table)),
        }
    }
}

impl From<SettingsValue> for toml::Value {
    fn from(value: SettingsValue) -> Self {
        match value {
            SettingsValue::String(s) => toml::Value::String(s),
            SettingsValue::Integer(i) => toml::Value::Integer(i),
            SettingsValue::Float(f) => toml::Value::Float(f),
            SettingsValue::Boolean(b) => toml::Value::Boolean(b),
            SettingsValue::Datetime(d) => toml::Value::Datetime(d),
            SettingsValue::Array(items) => {
                toml::Value::Array(items.into_iter().map(toml::Value::from).collect())
            }
            SettingsValue::Table(table) => toml::Value::Table(to_toml_table(&table)),
        }
    }
}

impl From<&str> for SettingsValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for SettingsValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for SettingsValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for SettingsValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for SettingsValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Settings> for SettingsValue {
    fn from(table: Settings) -> Self {
        Self::Table(table)
    }
}

impl<T: Into<SettingsValue>> From<Vec<T>> for SettingsValue {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

fn from_toml_table(table: toml::Table) -> Settings {
    table
        .into_iter()
        .map(|(k, v)| (k, SettingsValue::from(v)))
        .collect()
}

fn to_toml_table(settings: &Settings) -> toml::Table {
    settings
        .iter()
        .map(|(k, v)| (k.clone(), toml::Value::from(v.clone())))
        .collect()
}

/// Render settings into the text of the server's config file.
///
/// Output is a pure function of `settings`: keys are sorted, plain values come
/// before sub-tables, and arrays of tables become `[[name]]` sections.
pub fn render_settings(settings: &Settings) -> Result<String, GenerateError> {
    let table = to_toml_table(settings);
    toml::to_string_pretty(&table).map_err(|e| GenerateError::Serialize(e.to_string()))
}

/// Parse a rendered settings file back into a settings table.
pub fn parse_settings(contents: &str) -> Result<Settings, GenerateError> {
    let table: toml::Table =
        toml::from_str(contents).map_err(|e| GenerateError::Parse(e.to_string()))?;
    Ok(from_toml_table(table))
}
