#![deny(rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self
)]

use influxdb_legacy::Value;
use influxdb_shard::{EngineFormat, FieldType, FieldValue, MeasurementFieldSet, SeriesKey};

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

pub use tempfile;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

pub fn tmp_dir() -> Result<tempfile::TempDir> {
    let _ = dotenvy::dotenv();

    let root = env::var_os("TEST_INFLUX_TSM_DIR").unwrap_or_else(|| env::temp_dir().into());

    Ok(tempfile::Builder::new()
        .prefix("influx_tsm")
        .tempdir_in(root)?)
}

/// Contents of a legacy shard, built up point by point and written in one go.
#[derive(Debug, Clone)]
pub struct ShardFixture {
    format: EngineFormat,
    fields: MeasurementFieldSet,
    sections: Vec<(String, Vec<Value>)>,
}

impl ShardFixture {
    pub fn new(format: EngineFormat) -> Self {
        assert!(format.is_legacy(), "fixtures are legacy shards");
        Self {
            format,
            fields: MeasurementFieldSet::new(),
            sections: vec![],
        }
    }

    /// Declare a field of `measurement`.
    pub fn field(mut self, measurement: &str, name: &str, field_type: FieldType) -> Self {
        self.fields
            .entry(measurement)
            .create_field_if_not_exists(name, field_type)
            .expect("valid field");
        self
    }

    /// Add a point to the series `key`, declaring any field it uses.
    ///
    /// Consecutive points of the same series share a section; a point for a
    /// series other than the previous one starts a new section.
    pub fn point(mut self, key: &str, timestamp: i64, values: &[(&str, FieldValue)]) -> Self {
        let measurement = SeriesKey::parse(key).expect("valid series key").measurement;
        let values: BTreeMap<_, _> = values
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        for (name, value) in &values {
            self = self.field(&measurement, name, value.field_type());
        }
        let codec = self.fields.codec(&measurement).expect("fields declared");
        let encoded = codec.encode_fields(&values).expect("values encode");
        self.push(key, (timestamp, encoded));
        self
    }

    /// Add a section holding `values` exactly as given.
    pub fn section(mut self, key: &str, values: Vec<Value>) -> Self {
        self.sections.push((key.to_string(), values));
        self
    }

    fn push(&mut self, key: &str, value: Value) {
        match self.sections.last_mut() {
            Some((last, values)) if last == key => values.push(value),
            _ => self.sections.push((key.to_string(), vec![value])),
        }
    }

    pub fn format(&self) -> EngineFormat {
        self.format
    }

    pub fn fields(&self) -> &MeasurementFieldSet {
        &self.fields
    }

    /// Distinct series keys, sorted.
    pub fn series_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.sections.iter().map(|(k, _)| k.clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Every value of `key`, in storage order.
    pub fn values(&self, key: &str) -> Vec<Value> {
        self.sections
            .iter()
            .filter(|(k, _)| k == key)
            .flat_map(|(_, values)| values.iter().cloned())
            .collect()
    }

    pub fn point_count(&self) -> usize {
        self.sections.iter().map(|(_, values)| values.len()).sum()
    }

    /// Write the shard file at `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result {
        let path = path.as_ref();
        match self.format {
            EngineFormat::B1 => {
                let mut writer = influxdb_legacy::b1::Writer::create(path, &self.fields)?;
                for (key, values) in &self.sections {
                    writer.write_series(key, values)?;
                }
                writer.close()?;
            }
            EngineFormat::Bz1 => {
                let mut writer = influxdb_legacy::bz1::Writer::create(path, &self.fields)?;
                for (key, values) in &self.sections {
                    writer.write_series(key, values)?;
                }
                writer.close()?;
            }
            EngineFormat::Tsm1 => unreachable!("fixtures are legacy shards"),
        }
        Ok(())
    }

    /// Write the shard at `<root>/<database>/<retention_policy>/<shard>`,
    /// creating the directories on the way.
    pub fn write_at(
        &self,
        root: impl AsRef<Path>,
        database: &str,
        retention_policy: &str,
        shard: &str,
    ) -> Result<PathBuf> {
        let dir = root.as_ref().join(database).join(retention_policy);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(shard);
        self.write(&path)?;
        Ok(path)
    }
}

/// A `cpu` measurement with two hosts and a `mem` measurement, three points
/// per series, in the given legacy format.
pub fn sample_shard(format: EngineFormat, offset: i64) -> ShardFixture {
    let mut fixture = ShardFixture::new(format);
    for i in 0..3 {
        let ts = offset + i * 10;
        fixture = fixture
            .point(
                "cpu,host=a,region=x",
                ts,
                &[("value", FieldValue::Float(i as f64 + 0.5))],
            )
            .point(
                "cpu,host=b,region=y",
                ts,
                &[("value", FieldValue::Float(i as f64))],
            )
            .point(
                "mem,host=a",
                ts,
                &[
                    ("free", FieldValue::Integer(100 - i)),
                    ("swapping", FieldValue::Boolean(i % 2 == 0)),
                ],
            );
    }
    fixture
}

#[cfg(test)]
mod tests {
    use super::*;
    use influxdb_legacy::ShardReader;

    #[test]
    fn fixture_round_trips_through_reader() {
        let dir = tmp_dir().unwrap();
        let fixture = sample_shard(EngineFormat::Bz1, 0);
        let path = fixture.write_at(dir.path(), "db", "rp", "1").unwrap();

        let mut reader = influxdb_legacy::new_reader(EngineFormat::Bz1, path).unwrap();
        reader.open().unwrap();
        let mut keys = reader.series_keys();
        keys.sort();
        assert_eq!(keys, fixture.series_keys());
        assert_eq!(reader.fields(), fixture.fields());

        let values = reader
            .read_series("mem,host=a")
            .unwrap()
            .collect::<influxdb_legacy::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(values, fixture.values("mem,host=a"));
        assert_eq!(fixture.point_count(), 9);
    }
}
