//! The `b1` format stores each series section as a flat run of values:
//!
//! ```text
//! count u32 | count × (timestamp i64, value len u32, value bytes)
//! ```
use crate::container::{self, Container, ContainerWriter, Section};
use crate::{Error, Result, SeriesValues, ShardReader, Value};

use byteorder::{BigEndian, ReadBytesExt};
use influxdb_shard::{EngineFormat, MeasurementFieldSet};

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Reads a `b1` shard file.
#[derive(Debug)]
pub struct Reader {
    container: Container,
}

impl Reader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            container: Container::new(path.into(), EngineFormat::B1),
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
            remaining: 0,
            section_left: 0,
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
    // values left to read in the current section
    remaining: u32,
    // payload bytes left in the current section
    section_left: u64,
    done: bool,
}

impl Values<'_> {
    fn next_value(&mut self) -> std::io::Result<Option<Value>> {
        while self.remaining == 0 {
            container::ensure_consumed(self.section_left)?;
            let Some(section) = self.sections.next() else {
                return Ok(None);
            };
            let len = container::seek_section(&mut *self.file, section)?;
            let mut r = (&mut *self.file).take(len);
            self.remaining = r.read_u32::<BigEndian>()?;
            self.section_left = r.limit();
        }
        self.remaining -= 1;

        let mut r = (&mut *self.file).take(self.section_left);
        let value = container::read_value(&mut r)?;
        self.section_left = r.limit();
        Ok(Some(value))
    }
}

impl Iterator for Values<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_value() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(source) => {
                self.done = true;
                Some(Err(Error::Read {
                    path: self.path.to_path_buf(),
                    source,
                }))
            }
        }
    }
}

/// Writes a `b1` shard file.
#[derive(Debug)]
pub struct Writer {
    inner: ContainerWriter,
}

impl Writer {
    pub fn create(path: impl Into<PathBuf>, fields: &MeasurementFieldSet) -> Result<Self> {
        Ok(Self {
            inner: ContainerWriter::create(path.into(), EngineFormat::B1, fields)?,
        })
    }

    /// Append a section holding `values` for `key`.
    pub fn write_series(&mut self, key: &str, values: &[Value]) -> Result<()> {
        let mut payload = Vec::with_capacity(4 + values.len() * 16);
        payload.extend_from_slice(&(values.len() as u32).to_be_bytes());
        for (ts, value) in values {
            container::write_value(&mut payload, *ts, value);
        }
        self.inner.write_section(key, &payload)
    }

    pub fn close(self) -> Result<()> {
        self.inner.finish()
    }
}
