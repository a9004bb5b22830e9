//! Read-only schema view of a database, derived from the series keys and
//! field sets of its shards.
use crate::codec::MeasurementFieldSet;
use crate::series::{SeriesKey, SeriesKeyError};

use std::collections::{BTreeMap, BTreeSet};

/// A named collection of series sharing field names and tag keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Measurement {
    pub name: String,
    tag_values: BTreeMap<String, BTreeSet<String>>,
    field_names: BTreeSet<String>,
    series_keys: BTreeSet<String>,
}

impl Measurement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn add_series(&mut self, key: &str, parsed: SeriesKey) {
        for (k, v) in parsed.tags {
            self.tag_values.entry(k).or_default().insert(v);
        }
        self.series_keys.insert(key.to_string());
    }

    /// Tag keys, sorted.
    pub fn tag_keys(&self) -> Vec<&str> {
        self.tag_values.keys().map(String::as_str).collect()
    }

    /// Distinct values seen for `tag_key`, sorted.
    pub fn tag_values(&self, tag_key: &str) -> Vec<&str> {
        self.tag_values
            .get(tag_key)
            .map(|values| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Total number of distinct values across all tag keys.
    pub fn tag_value_count(&self) -> usize {
        self.tag_values.values().map(BTreeSet::len).sum()
    }

    /// Field names, sorted.
    pub fn field_names(&self) -> Vec<&str> {
        self.field_names.iter().map(String::as_str).collect()
    }

    /// Series keys, sorted.
    pub fn series_keys(&self) -> Vec<&str> {
        self.series_keys.iter().map(String::as_str).collect()
    }
}

/// Measurement name to [`Measurement`] for one database.
///
/// Built once from the shards of a database and never refreshed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseIndex {
    measurements: BTreeMap<String, Measurement>,
}

impl DatabaseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a series key seen in one of the database's shards.
    pub fn add_series(&mut self, key: &str) -> Result<(), SeriesKeyError> {
        let parsed = SeriesKey::parse(key)?;
        self.measurements
            .entry(parsed.measurement.clone())
            .or_insert_with(|| Measurement::new(parsed.measurement.clone()))
            .add_series(key, parsed);
        Ok(())
    }

    /// Record the field names a shard defines for its measurements.
    pub fn add_fields(&mut self, fields: &MeasurementFieldSet) {
        for (name, fields) in fields.iter() {
            let measurement = self
                .measurements
                .entry(name.clone())
                .or_insert_with(|| Measurement::new(name.clone()));
            measurement
                .field_names
                .extend(fields.names().map(ToString::to_string));
        }
    }

    pub fn measurement(&self, name: &str) -> Option<&Measurement> {
        self.measurements.get(name)
    }

    /// All measurements, sorted by name.
    pub fn measurements(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.values()
    }

    pub fn series_count(&self) -> usize {
        self.measurements.values().map(|m| m.series_keys.len()).sum()
    }
}
