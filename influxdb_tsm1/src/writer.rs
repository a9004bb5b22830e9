//! Writes a new `tsm1` shard directory.
use crate::reader::IndexBlock;
use crate::{Error, FIELDS_FILE, MAGIC_NUMBER, MAX_BLOCK_VALUES, Result, VERSION, Value, block};

use byteorder::{BigEndian, WriteBytesExt};
use influxdb_shard::MeasurementFieldSet;
use tracing::debug;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const GENERATION: u32 = 1;

/// Writes the series of one shard into size-bounded TSM files.
///
/// Values are written in the order they are given: nothing is sorted or
/// deduplicated. Once the current file reaches the size bound it is finished
/// and the next block starts a new file with the next sequence number, so
/// the blocks of a series spread over several files stay in call order.
#[derive(Debug)]
pub struct ShardWriter {
    dir: PathBuf,
    max_file_size: u64,
    sequence: u32,
    current: Option<FileWriter>,
    files: Vec<PathBuf>,
}

impl ShardWriter {
    /// Create the shard directory `dir`, which must not exist yet.
    pub fn create(dir: impl Into<PathBuf>, max_file_size: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir(&dir).map_err(|source| Error::Create {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            max_file_size,
            sequence: 0,
            current: None,
            files: vec![],
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist the field definitions of the shard's measurements.
    pub fn write_fields(&self, fields: &MeasurementFieldSet) -> Result<()> {
        fields.save(self.dir.join(FIELDS_FILE))?;
        Ok(())
    }

    /// Append `values` to the series `key`.
    pub fn write_values(&mut self, key: &str, values: &[Value]) -> Result<()> {
        if key.len() > u16::MAX as usize {
            return Err(Error::KeyTooLong { len: key.len() });
        }

        for chunk in values.chunks(MAX_BLOCK_VALUES) {
            let mut current = match self.current.take() {
                // an index entry counts its blocks in a u16
                Some(current) if current.block_count(key) == u16::MAX as usize => {
                    self.files.push(current.finish()?);
                    self.next_file()?
                }
                Some(current) => current,
                None => self.next_file()?,
            };
            current.write_block(key, chunk)?;

            if current.size() >= self.max_file_size {
                self.files.push(current.finish()?);
            } else {
                self.current = Some(current);
            }
        }
        Ok(())
    }

    fn next_file(&mut self) -> Result<FileWriter> {
        self.sequence += 1;
        FileWriter::create(
            self.dir
                .join(crate::tsm_file_name(GENERATION, self.sequence)),
        )
    }

    /// Finish the current file, returning the paths of every file written.
    pub fn close(mut self) -> Result<Vec<PathBuf>> {
        if let Some(current) = self.current.take() {
            self.files.push(current.finish()?);
        }
        debug!(dir = %self.dir.display(), files = self.files.len(), "closed shard writer");
        Ok(self.files)
    }
}

#[derive(Debug)]
struct FileWriter {
    path: PathBuf,
    w: BufWriter<File>,
    offset: u64,
    index: BTreeMap<String, Vec<IndexBlock>>,
}

impl FileWriter {
    fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path).map_err(|source| Error::Create {
            path: path.clone(),
            source,
        })?;
        let mut this = Self {
            path,
            w: BufWriter::new(file),
            offset: 0,
            index: BTreeMap::new(),
        };
        this.write(|w| {
            w.write_u32::<BigEndian>(MAGIC_NUMBER)?;
            w.write_u8(VERSION)
        })?;
        this.offset = 5;
        Ok(this)
    }

    fn size(&self) -> u64 {
        self.offset
    }

    fn block_count(&self, key: &str) -> usize {
        self.index.get(key).map_or(0, Vec::len)
    }

    fn write_block(&mut self, key: &str, values: &[Value]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let block = block::encode(values).map_err(|source| Error::Write {
            path: self.path.clone(),
            source,
        })?;
        self.write(|w| w.write_all(&block))?;

        let entry = IndexBlock {
            min_time: values.iter().map(|(ts, _)| *ts).min().unwrap_or_default(),
            max_time: values.iter().map(|(ts, _)| *ts).max().unwrap_or_default(),
            offset: self.offset,
            size: block.len() as u32,
        };
        self.offset += block.len() as u64;
        self.index.entry(key.to_string()).or_default().push(entry);
        Ok(())
    }

    fn finish(mut self) -> Result<PathBuf> {
        let index_offset = self.offset;
        let index = std::mem::take(&mut self.index);
        self.write(|w| {
            for (key, blocks) in &index {
                w.write_u16::<BigEndian>(key.len() as u16)?;
                w.write_all(key.as_bytes())?;
                w.write_u16::<BigEndian>(blocks.len() as u16)?;
                for block in blocks {
                    w.write_i64::<BigEndian>(block.min_time)?;
                    w.write_i64::<BigEndian>(block.max_time)?;
                    w.write_u64::<BigEndian>(block.offset)?;
                    w.write_u32::<BigEndian>(block.size)?;
                }
            }
            w.write_u64::<BigEndian>(index_offset)?;
            w.flush()?;
            w.get_ref().sync_all()
        })?;
        Ok(self.path)
    }

    fn write(&mut self, f: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>) -> Result<()> {
        f(&mut self.w).map_err(|source| Error::Write {
            path: self.path.clone(),
            source,
        })
    }
}
