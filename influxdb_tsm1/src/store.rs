//! Read-only view over every `tsm1` shard of a data directory.
use crate::reader::{IndexBlock, TsmFile};
use crate::{Error, FIELDS_FILE, Result, Value};

use influxdb_shard::{
    DatabaseIndex, EngineFormat, FieldCodec, MeasurementFieldSet, ShardInfo, discover,
};
use tracing::{debug, info, warn};

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// The `tsm1` shards under a data directory plus one [`DatabaseIndex`] per
/// database, built when the store is opened and never refreshed.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    shards: BTreeMap<u64, Shard>,
    indexes: BTreeMap<String, DatabaseIndex>,
}

impl Store {
    /// Open every `tsm1` shard below `data_dir`.
    ///
    /// Shards in a legacy format and shard directories whose name is not a
    /// numeric id are skipped with a warning.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let path = data_dir.into();
        let mut shards = BTreeMap::new();
        let mut indexes: BTreeMap<String, DatabaseIndex> = BTreeMap::new();

        for info in discover(&path)?.iter() {
            if info.format != EngineFormat::Tsm1 {
                warn!(
                    shard = %info.full_path(&path).display(),
                    format = %info.format,
                    "skipping shard that has not been converted to tsm1"
                );
                continue;
            }
            let Some(id) = info.id() else {
                warn!(
                    shard = %info.full_path(&path).display(),
                    "skipping shard without a numeric id"
                );
                continue;
            };
            if shards.contains_key(&id) {
                warn!(
                    shard = %info.full_path(&path).display(),
                    id,
                    "skipping shard with duplicate id"
                );
                continue;
            }

            let shard = Shard::open(id, info, &path)?;
            let index = indexes.entry(info.database.clone()).or_default();
            for key in shard.series_keys() {
                if let Err(e) = index.add_series(key) {
                    warn!(shard = id, %e, "skipping malformed series key");
                }
            }
            index.add_fields(shard.fields());
            shards.insert(id, shard);
        }

        info!(
            path = %path.display(),
            shards = shards.len(),
            databases = indexes.len(),
            "opened store"
        );
        Ok(Self {
            path,
            shards,
            indexes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids of every open shard, ascending.
    pub fn shard_ids(&self) -> Vec<u64> {
        self.shards.keys().copied().collect()
    }

    pub fn shard(&self, id: u64) -> Option<&Shard> {
        self.shards.get(&id)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shards of `database`, by ascending id.
    pub fn database_shards(&self, database: &str) -> Vec<&Shard> {
        self.shards
            .values()
            .filter(|s| s.database == database)
            .collect()
    }

    /// Databases holding at least one open shard, sorted.
    pub fn databases(&self) -> Vec<&str> {
        self.indexes.keys().map(String::as_str).collect()
    }

    pub fn database_index(&self, database: &str) -> Option<&DatabaseIndex> {
        self.indexes.get(database)
    }

    pub fn database_index_count(&self) -> usize {
        self.indexes.len()
    }

    /// Total size on disk of the open shards, in bytes.
    pub fn disk_size(&self) -> u64 {
        self.shards.values().map(|s| s.size).sum()
    }

    /// Number of series summed over every shard.
    pub fn series_count(&self) -> usize {
        self.shards.values().map(Shard::series_count).sum()
    }
}

/// One open `tsm1` shard.
#[derive(Debug)]
pub struct Shard {
    id: u64,
    database: String,
    retention_policy: String,
    path: PathBuf,
    size: u64,
    fields: MeasurementFieldSet,
    series: BTreeSet<String>,
    // ordered by generation then sequence
    files: Vec<TsmFile>,
}

impl Shard {
    pub fn open(id: u64, info: &ShardInfo, root: &Path) -> Result<Self> {
        let path = info.full_path(root);

        let fields_path = path.join(FIELDS_FILE);
        let fields = if fields_path.exists() {
            MeasurementFieldSet::load(&fields_path)?
        } else {
            MeasurementFieldSet::new()
        };

        let mut names = vec![];
        let entries = std::fs::read_dir(&path).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| Error::Read {
                path: path.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match crate::parse_tsm_file_name(&name) {
                Some(position) => names.push((position, name)),
                None if name == FIELDS_FILE => {}
                None => debug!(file = %entry.path().display(), "ignoring non-TSM file"),
            }
        }
        names.sort();

        let files = names
            .into_iter()
            .map(|(_, name)| TsmFile::open(path.join(name)))
            .collect::<Result<Vec<_>>>()?;
        let series = files
            .iter()
            .flat_map(|f| f.keys().map(ToString::to_string))
            .collect();

        Ok(Self {
            id,
            database: info.database.clone(),
            retention_policy: info.retention_policy.clone(),
            path,
            size: info.size,
            fields,
            series,
            files,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn retention_policy(&self) -> &str {
        &self.retention_policy
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn fields(&self) -> &MeasurementFieldSet {
        &self.fields
    }

    /// Series keys stored in the shard, sorted.
    pub fn series_keys(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(String::as_str)
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// A codec for decoding the values of `measurement`.
    pub fn field_codec(&self, measurement: &str) -> Option<FieldCodec> {
        self.fields.codec(measurement)
    }

    pub fn read_only_tx(&self) -> ReadOnlyTx<'_> {
        ReadOnlyTx { shard: self }
    }
}

/// A read-only transaction against one shard. It can only be rolled back.
#[derive(Debug, Clone, Copy)]
pub struct ReadOnlyTx<'a> {
    shard: &'a Shard,
}

impl<'a> ReadOnlyTx<'a> {
    /// A cursor over `key`, or `None` when the shard does not hold it.
    pub fn cursor(&self, key: &str) -> Option<Cursor<'a>> {
        let blocks: Vec<_> = self
            .shard
            .files
            .iter()
            .filter_map(|file| file.blocks(key).map(|blocks| (file, blocks)))
            .flat_map(|(file, blocks)| blocks.iter().map(move |b| (file, *b)))
            .collect();
        if blocks.is_empty() {
            return None;
        }
        Some(Cursor {
            blocks,
            next_block: 0,
            values: Vec::new().into_iter(),
        })
    }

    pub fn rollback(self) {
        debug!(shard = self.shard.id, "rolled back read-only transaction");
    }
}

/// Forward iteration over the values of one series, in storage order.
///
/// Blocks are read lazily, one at a time, across the shard's files in
/// sequence order.
#[derive(Debug)]
pub struct Cursor<'a> {
    blocks: Vec<(&'a TsmFile, IndexBlock)>,
    next_block: usize,
    values: std::vec::IntoIter<Value>,
}

impl Cursor<'_> {
    /// Rewind to the first value of the series and return it.
    pub fn seek_first(&mut self) -> Option<Result<Value>> {
        self.next_block = 0;
        self.values = Vec::new().into_iter();
        self.next()
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.values.next() {
                return Some(Ok(value));
            }
            let (file, entry) = self.blocks.get(self.next_block)?;
            self.next_block += 1;
            match file.read_block(entry) {
                Ok(values) => self.values = values.into_iter(),
                Err(e) => {
                    // a bad block ends the cursor
                    self.next_block = self.blocks.len();
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShardWriter;
    use influxdb_shard::FieldType;
    use pretty_assertions::assert_eq;

    fn write_shard(dir: &Path, series: &[(&str, Vec<Value>)], max_file_size: u64) {
        let mut fields = MeasurementFieldSet::new();
        fields
            .entry("cpu")
            .create_field_if_not_exists("value", FieldType::Float)
            .unwrap();

        std::fs::create_dir_all(dir.parent().unwrap()).unwrap();
        let mut writer = ShardWriter::create(dir, max_file_size).unwrap();
        writer.write_fields(&fields).unwrap();
        for (key, values) in series {
            writer.write_values(key, values).unwrap();
        }
        writer.close().unwrap();
    }

    fn points(range: std::ops::Range<i64>) -> Vec<Value> {
        range.map(|ts| (ts, vec![0; 9])).collect()
    }

    #[test_log::test]
    fn opens_tsm1_shards_only() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path();
        write_shard(
            &data.join("db0/default/2"),
            &[("cpu,host=a", points(0..3)), ("cpu,host=b", points(0..1))],
            u64::MAX,
        );
        write_shard(
            &data.join("db0/autogen/1"),
            &[("cpu,host=a", points(10..12))],
            u64::MAX,
        );
        write_shard(&data.join("db1/default/named"), &[], u64::MAX);
        std::fs::write(data.join("db1/default/3"), b"b1sh").unwrap();

        let store = Store::open(data).unwrap();
        assert_eq!(store.shard_ids(), vec![1, 2]);
        assert_eq!(store.shard_count(), 2);
        assert_eq!(store.databases(), vec!["db0"]);
        assert_eq!(store.database_index_count(), 1);
        assert_eq!(store.series_count(), 3);
        assert!(store.disk_size() > 0);

        let shards: Vec<_> = store
            .database_shards("db0")
            .iter()
            .map(|s| (s.id(), s.retention_policy().to_string()))
            .collect();
        assert_eq!(
            shards,
            vec![(1, "autogen".to_string()), (2, "default".to_string())]
        );

        let index = store.database_index("db0").unwrap();
        let cpu = index.measurement("cpu").unwrap();
        assert_eq!(cpu.series_keys(), vec!["cpu,host=a", "cpu,host=b"]);
        assert_eq!(cpu.field_names(), vec!["value"]);
        assert!(store.shard(2).unwrap().field_codec("cpu").is_some());
        assert!(store.shard(2).unwrap().field_codec("mem").is_none());
    }

    #[test]
    fn cursor_spans_files() {
        let root = tempfile::tempdir().unwrap();
        let values: Vec<_> = (0..2500).map(|ts: i64| (ts, ts.to_be_bytes().to_vec())).collect();
        write_shard(
            &root.path().join("db/rp/7"),
            &[("cpu,host=a", values.clone())],
            1024,
        );

        let store = Store::open(root.path()).unwrap();
        let shard = store.shard(7).unwrap();
        let tx = shard.read_only_tx();
        assert!(tx.cursor("cpu,host=z").is_none());

        let mut cursor = tx.cursor("cpu,host=a").unwrap();
        assert_eq!(cursor.seek_first().unwrap().unwrap(), values[0]);
        let rest = cursor.by_ref().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(rest, values[1..].to_vec());

        // rewinding starts over
        assert_eq!(cursor.seek_first().unwrap().unwrap(), values[0]);
        tx.rollback();
    }
}
