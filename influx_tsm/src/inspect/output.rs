use super::{Error, Result};

use flate2::Compression;
use flate2::write::GzEncoder;

use std::fs::File;
use std::io::{self, Stdout, Write};
use std::path::Path;

/// Where the report is written.
#[derive(Debug)]
pub enum Output {
    Stdout(Stdout),
    File(File),
    Gzip(GzEncoder<File>),
}

impl Output {
    /// Stdout when `path` is `None`, otherwise the truncated file at `path`,
    /// gzip compressed if its extension is `gz`.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::Stdout(io::stdout()));
        };
        let file = File::create(path).map_err(|source| Error::Output {
            path: path.to_path_buf(),
            source,
        })?;
        if path.extension().is_some_and(|ext| ext == "gz") {
            Ok(Self::Gzip(GzEncoder::new(file, Compression::default())))
        } else {
            Ok(Self::File(file))
        }
    }

    /// Flush everything written, completing the gzip stream if there is one.
    pub fn finish(self) -> io::Result<()> {
        match self {
            Self::Stdout(mut out) => out.flush(),
            Self::File(file) => file.sync_all(),
            Self::Gzip(encoder) => encoder.finish()?.sync_all(),
        }
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(out) => out.write(buf),
            Self::File(file) => file.write(buf),
            Self::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout(out) => out.flush(),
            Self::File(file) => file.flush(),
            Self::Gzip(encoder) => encoder.flush(),
        }
    }
}
