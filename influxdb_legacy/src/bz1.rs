//! The `bz1` format groups the values of a series section into
//! snappy-compressed blocks:
//!
//! ```text
//! blocks u32 | blocks × (compressed len u32, compressed block)
//! block = count u32 | count × (timestamp i64, value len u32, value bytes)
//! ```
use crate::container::{self, Container, ContainerWriter, Section};
use crate::{Error, Result, SeriesValues, ShardReader, Value};

use byteorder::{BigEndian, ReadBytesExt};
use influxdb_shard::{EngineFormat, MeasurementFieldSet};

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Default number of values packed into one block by the [`Writer`].
pub const DEFAULT_BLOCK_VALUES: usize = 1000;

/// Upper bound on how much larger than its compressed form a snappy block
/// can claim to be.
const MAX_SNAPPY_EXPANSION: usize = 32;

/// Smallest encoded value: timestamp and length with an empty value.
const MIN_VALUE_LEN: usize = 12;

/// Reads a `bz1` shard file.
#[derive(Debug)]
pub struct Reader {
    container: Container,
}

impl Reader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            container: Container::new(path.into(), EngineFormat::Bz1),
        }
    }
}

impl ShardReader for Reader {
    fn open(&mut self) -> Result<()> {
        self.container.open()
    }

    fn close(&mut self) -> Result<()> {
        self.container.close();
        Ok(())
    }

    fn series_keys(&self) -> Vec<String> {
        self.container.keys()
    }

    fn read_series(&mut self, key: &str) -> Result<SeriesValues<'_>> {
        let series = self.container.series(key)?;
        Ok(Box::new(Values {
            file: series.file,
            path: series.path,
            sections: series.sections.into_iter(),
            blocks_remaining: 0,
            section_left: 0,
            block: Vec::new().into_iter(),
            done: false,
        }))
    }

    fn fields(&self) -> &MeasurementFieldSet {
        self.container.fields()
    }

    fn path(&self) -> &Path {
        self.container.path()
    }

    fn format(&self) -> EngineFormat {
        self.container.format()
    }
}

#[derive(Debug)]
struct Values<'a> {
    file: &'a mut BufReader<File>,
    path: &'a Path,
    sections: std::vec::IntoIter<Section>,
    blocks_remaining: u32,
    // payload bytes left in the current section
    section_left: u64,
    // decoded values of the current block
    block: std::vec::IntoIter<Value>,
    done: bool,
}

impl Values<'_> {
    fn next_value(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(value) = self.block.next() {
                return Ok(Some(value));
            }

            if self.blocks_remaining > 0 {
                self.blocks_remaining -= 1;
                self.block = self.read_block()?.into_iter();
                continue;
            }

            container::ensure_consumed(self.section_left).map_err(|e| self.read_err(e))?;
            let Some(section) = self.sections.next() else {
                return Ok(None);
            };
            let (blocks, left) =
                start_section(self.file, section).map_err(|e| self.read_err(e))?;
            self.blocks_remaining = blocks;
            self.section_left = left;
        }
    }

    fn read_block(&mut self) -> Result<Vec<Value>> {
        let compressed = {
            let mut r = (&mut *self.file).take(self.section_left);
            let compressed = read_compressed(&mut r);
            self.section_left = r.limit();
            compressed
        }
        .map_err(|e| self.read_err(e))?;

        let decompressed_len =
            snap::raw::decompress_len(&compressed).map_err(|source| Error::Decompress {
                path: self.path.to_path_buf(),
                source,
            })?;
        if decompressed_len > compressed.len().saturating_mul(MAX_SNAPPY_EXPANSION) {
            return Err(self.read_err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "block of {} bytes claims to decompress to {decompressed_len} bytes",
                    compressed.len()
                ),
            )));
        }

        let block = snap::raw::Decoder::new()
            .decompress_vec(&compressed)
            .map_err(|source| Error::Decompress {
                path: self.path.to_path_buf(),
                source,
            })?;
        decode_block(&block).map_err(|e| self.read_err(e))
    }

    fn read_err(&self, source: std::io::Error) -> Error {
        Error::Read {
            path: self.path.to_path_buf(),
            source,
        }
    }
}

impl Iterator for Values<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.next_value();
        if !matches!(next, Ok(Some(_))) {
            self.done = true;
        }
        next.transpose()
    }
}

/// Seek to `section` and read its block count, returning the count and the
/// payload bytes left after it.
fn start_section(file: &mut BufReader<File>, section: Section) -> std::io::Result<(u32, u64)> {
    let len = container::seek_section(file, section)?;
    let mut r = file.take(len);
    let blocks = r.read_u32::<BigEndian>()?;
    Ok((blocks, r.limit()))
}

fn read_compressed<R: Read>(r: &mut std::io::Take<R>) -> std::io::Result<Vec<u8>> {
    let len = r.read_u32::<BigEndian>()?;
    container::ensure_available(r, u64::from(len), "block")?;
    let mut compressed = vec![0; len as usize];
    r.read_exact(&mut compressed)?;
    Ok(compressed)
}

fn decode_block(block: &[u8]) -> std::io::Result<Vec<Value>> {
    let mut r = block.take(block.len() as u64);
    let count = r.read_u32::<BigEndian>()?;
    let fits = r.limit() as usize / MIN_VALUE_LEN;
    let mut values = Vec::with_capacity((count as usize).min(fits));
    for _ in 0..count {
        values.push(container::read_value(&mut r)?);
    }
    container::ensure_consumed(r.limit())?;
    Ok(values)
}

/// Writes a `bz1` shard file.
#[derive(Debug)]
pub struct Writer {
    inner: ContainerWriter,
    block_values: usize,
}

impl Writer {
    pub fn create(path: impl Into<PathBuf>, fields: &MeasurementFieldSet) -> Result<Self> {
        Ok(Self {
            inner: ContainerWriter::create(path.into(), EngineFormat::Bz1, fields)?,
            block_values: DEFAULT_BLOCK_VALUES,
        })
    }

    /// Set the maximum number of values per compressed block.
    pub fn with_block_values(mut self, block_values: usize) -> Self {
        self.block_values = block_values.max(1);
        self
    }

    /// Append a section holding `values` for `key`.
    pub fn write_series(&mut self, key: &str, values: &[Value]) -> Result<()> {
        let mut encoder = snap::raw::Encoder::new();
        let blocks = values.chunks(self.block_values);

        let mut payload = Vec::new();
        payload.extend_from_slice(&(blocks.len() as u32).to_be_bytes());
        for chunk in blocks {
            let mut block = Vec::with_capacity(4 + chunk.len() * 16);
            block.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            for (ts, value) in chunk {
                container::write_value(&mut block, *ts, value);
            }
            let compressed = encoder
                .compress_vec(&block)
                .map_err(|e| self.inner.write_error(std::io::Error::other(e)))?;
            payload.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
            payload.extend_from_slice(&compressed);
        }
        self.inner.write_section(key, &payload)
    }

    pub fn close(self) -> Result<()> {
        self.inner.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn values(n: i64) -> Vec<Value> {
        (0..n).map(|i| (i * 10, i.to_be_bytes().to_vec())).collect()
    }

    #[test_log::test]
    fn values_span_blocks_and_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("7");

        let mut fields = MeasurementFieldSet::new();
        fields
            .entry("cpu")
            .create_field_if_not_exists("value", influxdb_shard::FieldType::Integer)
            .unwrap();

        let first = values(25);
        let second = vec![(1_000, vec![1]), (1_000, vec![2])];
        let mut writer = Writer::create(&path, &fields)
            .unwrap()
            .with_block_values(10);
        writer.write_series("cpu,host=a", &first).unwrap();
        writer.write_series("cpu,host=z", &values(3)).unwrap();
        writer.write_series("cpu,host=a", &second).unwrap();
        writer.close().unwrap();

        let mut reader = Reader::new(&path);
        reader.open().unwrap();
        assert_eq!(reader.fields(), &fields);
        assert_eq!(reader.format(), EngineFormat::Bz1);
        assert_eq!(reader.series_keys(), vec!["cpu,host=a", "cpu,host=z"]);

        let got = reader
            .read_series("cpu,host=a")
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let expected: Vec<_> = first.into_iter().chain(second).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn corrupt_block_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("7");
        let mut writer = Writer::create(&path, &MeasurementFieldSet::new()).unwrap();
        writer.write_series("cpu", &values(5)).unwrap();
        writer.close().unwrap();

        // magic, meta len, "{}", key len, "cpu", payload len, block count and
        // block len precede the compressed block, which opens with the varint
        // uncompressed length; make it lie
        let block_at = 4 + 4 + 2 + 2 + 3 + 8 + 4 + 4;
        let mut bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[block_at], 4 + 5 * 20);
        bytes[block_at] = 1;
        std::fs::write(&path, bytes).unwrap();

        let mut reader = Reader::new(&path);
        reader.open().unwrap();
        let got: Vec<_> = reader.read_series("cpu").unwrap().collect();
        assert_eq!(got.len(), 1);
        assert!(got[0].is_err());
    }

    #[test]
    fn huge_counts_are_errors() {
        let err = decode_block(&u32::MAX.to_be_bytes()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);

        // a single value claiming 4 GiB of data
        let mut block = 1u32.to_be_bytes().to_vec();
        block.extend_from_slice(&5i64.to_be_bytes());
        block.extend_from_slice(&u32::MAX.to_be_bytes());
        let err = decode_block(&block).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        // trailing bytes after the last value
        let mut block = Vec::new();
        block.extend_from_slice(&1u32.to_be_bytes());
        container::write_value(&mut block, 5, &[1, 2]);
        block.push(0);
        let err = decode_block(&block).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_block_length_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("7");
        let mut writer = Writer::create(&path, &MeasurementFieldSet::new()).unwrap();
        writer.write_series("cpu", &values(5)).unwrap();
        writer.write_series("mem", &values(2)).unwrap();
        writer.close().unwrap();

        // block len of the first section, see corrupt_block_is_reported
        let len_at = 4 + 4 + 2 + 2 + 3 + 8 + 4;
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[len_at..len_at + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        std::fs::write(&path, bytes).unwrap();

        let mut reader = Reader::new(&path);
        reader.open().unwrap();
        let got: Vec<_> = reader.read_series("cpu").unwrap().collect();
        assert_eq!(got.len(), 1);
        assert!(matches!(got[0], Err(Error::Read { .. })), "{got:?}");

        // the block count of one section never reaches into the next
        let got = reader
            .read_series("mem")
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(got, values(2));
    }

    #[test]
    fn extra_blocks_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("7");
        let mut writer = Writer::create(&path, &MeasurementFieldSet::new()).unwrap();
        writer.write_series("cpu", &values(5)).unwrap();
        writer.write_series("mem", &values(2)).unwrap();
        writer.close().unwrap();

        // claim a second block in the cpu section
        let count_at = 4 + 4 + 2 + 2 + 3 + 8;
        let mut bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[count_at..count_at + 4], 1u32.to_be_bytes());
        bytes[count_at..count_at + 4].copy_from_slice(&2u32.to_be_bytes());
        std::fs::write(&path, bytes).unwrap();

        let mut reader = Reader::new(&path);
        reader.open().unwrap();
        let got: Vec<_> = reader.read_series("cpu").unwrap().collect();
        assert_eq!(got.len(), 6);
        assert!(got[..5].iter().all(|v| v.is_ok()));
        assert!(matches!(got[5], Err(Error::Read { .. })), "{got:?}");
    }
}
