//! Framing shared by the legacy shard files.
//!
//! ```text
//! ┌────────┬──────────┬───────────┬────────────────────────────────────────┐
//! │ Magic  │ Meta Len │   Meta    │                Sections                │
//! │4 bytes │ 4 bytes  │  N bytes  │ key len │ key │ payload len │ payload │
//! │        │          │   JSON    │ 2 bytes │  N  │   8 bytes   │    N    │
//! └────────┴──────────┴───────────┴────────────────────────────────────────┘
//! ```
//!
//! Integers are big-endian. The payload layout is format specific; the same
//! key may appear in more than one section.
use crate::{Error, Result, Value};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use influxdb_shard::format::{B1_MAGIC, BZ1_MAGIC};
use influxdb_shard::{EngineFormat, MeasurementFieldSet};
use tracing::debug;

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

fn magic(format: EngineFormat) -> Result<[u8; 4]> {
    match format {
        EngineFormat::B1 => Ok(B1_MAGIC),
        EngineFormat::Bz1 => Ok(BZ1_MAGIC),
        EngineFormat::Tsm1 => Err(Error::UnsupportedFormat { format }),
    }
}

/// Location and length of one section payload within the file.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Section {
    pub(crate) offset: u64,
    pub(crate) len: u64,
}

/// The open file plus the sections of the series being read.
#[derive(Debug)]
pub(crate) struct SeriesSections<'a> {
    pub(crate) file: &'a mut BufReader<File>,
    pub(crate) path: &'a Path,
    pub(crate) sections: Vec<Section>,
}

#[derive(Debug)]
pub(crate) struct Container {
    path: PathBuf,
    format: EngineFormat,
    file: Option<BufReader<File>>,
    fields: MeasurementFieldSet,
    keys: Vec<String>,
    sections: HashMap<String, Vec<Section>>,
}

impl Container {
    pub(crate) fn new(path: PathBuf, format: EngineFormat) -> Self {
        Self {
            path,
            format,
            file: None,
            fields: MeasurementFieldSet::new(),
            keys: vec![],
            sections: HashMap::new(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn format(&self) -> EngineFormat {
        self.format
    }

    pub(crate) fn fields(&self) -> &MeasurementFieldSet {
        &self.fields
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.keys.clone()
    }

    /// Read the header and index every section of the file.
    pub(crate) fn open(&mut self) -> Result<()> {
        let file = File::open(&self.path).map_err(|source| Error::Open {
            path: self.path.clone(),
            source,
        })?;
        let len = file
            .metadata()
            .map_err(|source| Error::Open {
                path: self.path.clone(),
                source,
            })?
            .len();
        let mut r = BufReader::new(file);
        let read_err = |source| Error::Read {
            path: self.path.clone(),
            source,
        };

        let expected = magic(self.format)?;
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf).map_err(read_err)?;
        if buf != expected {
            return Err(Error::BadMagic {
                path: self.path.clone(),
                expected: self.format,
            });
        }

        let meta_len = r.read_u32::<BigEndian>().map_err(read_err)?;
        if 8 + u64::from(meta_len) > len {
            return Err(read_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("metadata of {meta_len} bytes runs past the end of the file"),
            )));
        }
        let mut meta = vec![0; meta_len as usize];
        r.read_exact(&mut meta).map_err(read_err)?;
        let fields = MeasurementFieldSet::from_slice(&meta).map_err(|source| Error::Meta {
            path: self.path.clone(),
            source,
        })?;

        let mut keys = vec![];
        let mut sections: HashMap<String, Vec<Section>> = HashMap::new();
        let mut pos = 8 + u64::from(meta_len);
        while pos < len {
            let key = read_key(&mut r).map_err(read_err)?;
            let payload_len = r.read_u64::<BigEndian>().map_err(read_err)?;
            let offset = pos + 2 + key.len() as u64 + 8;
            let end = match offset.checked_add(payload_len) {
                Some(end) if end <= len => end,
                _ => {
                    return Err(read_err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("section for {key:?} runs past the end of the file"),
                    )));
                }
            };
            r.seek_relative((end - offset) as i64).map_err(read_err)?;
            pos = end;

            let entry = sections.entry(key.clone()).or_default();
            if entry.is_empty() {
                keys.push(key);
            }
            entry.push(Section {
                offset,
                len: payload_len,
            });
        }
        debug!(path = %self.path.display(), series = keys.len(), "opened legacy shard");

        self.fields = fields;
        self.keys = keys;
        self.sections = sections;
        self.file = Some(r);
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        self.file = None;
    }

    pub(crate) fn series(&mut self, key: &str) -> Result<SeriesSections<'_>> {
        let Self {
            path,
            file,
            sections,
            ..
        } = self;
        let file = file
            .as_mut()
            .ok_or_else(|| Error::NotOpen { path: path.clone() })?;
        let sections = sections
            .get(key)
            .cloned()
            .ok_or_else(|| Error::SeriesNotFound {
                path: path.clone(),
                key: key.to_string(),
            })?;
        Ok(SeriesSections {
            file,
            path: path.as_path(),
            sections,
        })
    }
}

fn read_key(r: &mut impl Read) -> io::Result<String> {
    let len = r.read_u16::<BigEndian>()?;
    let mut key = vec![0; len as usize];
    r.read_exact(&mut key)?;
    String::from_utf8(key).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Position `file` at the start of `section`, returning the number of
/// payload bytes that belong to it.
pub(crate) fn seek_section(file: &mut BufReader<File>, section: Section) -> io::Result<u64> {
    file.seek(SeekFrom::Start(section.offset))?;
    Ok(section.len)
}

/// Fail with `InvalidData` unless `needed` bytes are left in `r`.
pub(crate) fn ensure_available<R>(r: &io::Take<R>, needed: u64, what: &str) -> io::Result<()> {
    if needed > r.limit() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{what} of {needed} bytes exceeds the {} bytes left", r.limit()),
        ));
    }
    Ok(())
}

/// Read one value; its length is checked against the bytes left in `r`
/// before anything is allocated.
pub(crate) fn read_value<R: Read>(r: &mut io::Take<R>) -> io::Result<Value> {
    let ts = r.read_i64::<BigEndian>()?;
    let len = r.read_u32::<BigEndian>()?;
    ensure_available(r, u64::from(len), "value")?;
    let mut value = vec![0; len as usize];
    r.read_exact(&mut value)?;
    Ok((ts, value))
}

/// Fail with `InvalidData` if `left` bytes of a section were never read.
pub(crate) fn ensure_consumed(left: u64) -> io::Result<()> {
    if left > 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{left} unread bytes at the end of the section"),
        ));
    }
    Ok(())
}

pub(crate) fn write_value(buf: &mut Vec<u8>, ts: i64, value: &[u8]) {
    buf.extend_from_slice(&ts.to_be_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value);
}

#[derive(Debug)]
pub(crate) struct ContainerWriter {
    path: PathBuf,
    w: BufWriter<File>,
}

impl ContainerWriter {
    pub(crate) fn create(
        path: PathBuf,
        format: EngineFormat,
        fields: &MeasurementFieldSet,
    ) -> Result<Self> {
        let magic = magic(format)?;
        let file = File::create(&path).map_err(|source| Error::Write {
            path: path.clone(),
            source,
        })?;
        let mut this = Self {
            path,
            w: BufWriter::new(file),
        };

        let meta = fields.to_vec();
        this.write(|w| {
            w.write_all(&magic)?;
            w.write_u32::<BigEndian>(meta.len() as u32)?;
            w.write_all(&meta)
        })?;
        Ok(this)
    }

    pub(crate) fn write_section(&mut self, key: &str, payload: &[u8]) -> Result<()> {
        let key_len = u16::try_from(key.len()).map_err(|_| Error::KeyTooLong {
            path: self.path.clone(),
            len: key.len(),
        })?;
        self.write(|w| {
            w.write_u16::<BigEndian>(key_len)?;
            w.write_all(key.as_bytes())?;
            w.write_u64::<BigEndian>(payload.len() as u64)?;
            w.write_all(payload)
        })
    }

    pub(crate) fn write_error(&self, source: io::Error) -> Error {
        Error::Write {
            path: self.path.clone(),
            source,
        }
    }

    pub(crate) fn finish(mut self) -> Result<()> {
        self.write(|w| w.flush())?;
        self.w
            .get_ref()
            .sync_all()
            .map_err(|source| Error::Write {
                path: self.path.clone(),
                source,
            })
    }

    fn write(&mut self, f: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>) -> Result<()> {
        f(&mut self.w).map_err(|source| Error::Write {
            path: self.path.clone(),
            source,
        })
    }
}
