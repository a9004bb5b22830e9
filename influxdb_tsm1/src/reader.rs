//! Reads a single TSM file.
use crate::{Error, MAGIC_NUMBER, Result, VERSION, Value, block};

use byteorder::{BigEndian, ReadBytesExt};
use parking_lot::Mutex;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const HEADER_SIZE: u64 = 5;
const FOOTER_SIZE: u64 = 8;

/// Location and time range of one block, as recorded in the file's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBlock {
    pub min_time: i64,
    pub max_time: i64,
    pub offset: u64,
    pub size: u32,
}

/// An open TSM file with its index held in memory.
///
/// Blocks are read on demand; the file handle is shared behind a lock so a
/// `&TsmFile` is enough to read from it.
#[derive(Debug)]
pub struct TsmFile {
    path: PathBuf,
    size: u64,
    index: BTreeMap<String, Vec<IndexBlock>>,
    r: Mutex<BufReader<File>>,
}

impl TsmFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?
            .len();
        let mut r = BufReader::new(file);

        if size < HEADER_SIZE + FOOTER_SIZE {
            return Err(Error::BadHeader { path });
        }
        let magic = r
            .read_u32::<BigEndian>()
            .map_err(|source| read_err(&path, source))?;
        let version = r.read_u8().map_err(|source| read_err(&path, source))?;
        if magic != MAGIC_NUMBER || version != VERSION {
            return Err(Error::BadHeader { path });
        }

        let index = read_index(&mut r, size).map_err(|source| match source.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => Error::BadIndex {
                path: path.clone(),
                reason: source.to_string(),
            },
            _ => read_err(&path, source),
        })?;

        Ok(Self {
            path,
            size,
            index,
            r: Mutex::new(r),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Series keys with at least one block in this file, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Index entries of `key`, in write order.
    pub fn blocks(&self, key: &str) -> Option<&[IndexBlock]> {
        self.index.get(key).map(Vec::as_slice)
    }

    /// Read, verify and decode the block described by `entry`.
    pub fn read_block(&self, entry: &IndexBlock) -> Result<Vec<Value>> {
        let mut buf = vec![0; entry.size as usize];
        {
            let mut r = self.r.lock();
            r.seek(SeekFrom::Start(entry.offset))
                .and_then(|_| r.read_exact(&mut buf))
                .map_err(|source| read_err(&self.path, source))?;
        }

        if buf.len() < 4 {
            return Err(Error::ChecksumMismatch {
                path: self.path.clone(),
                offset: entry.offset,
            });
        }
        let (checksum, data) = buf.split_at(4);
        let expected = u32::from_be_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]);
        if crc32fast::hash(data) != expected {
            return Err(Error::ChecksumMismatch {
                path: self.path.clone(),
                offset: entry.offset,
            });
        }

        let raw = snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|source| Error::Decompress {
                path: self.path.clone(),
                offset: entry.offset,
                source,
            })?;
        block::decode(&raw).map_err(|source| read_err(&self.path, source))
    }
}

fn read_err(path: &Path, source: io::Error) -> Error {
    Error::Read {
        path: path.to_path_buf(),
        source,
    }
}

fn invalid(reason: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.into())
}

/// Read the index whose offset is held in the last 8 bytes of the file.
fn read_index<R: Read + Seek>(
    r: &mut R,
    size: u64,
) -> io::Result<BTreeMap<String, Vec<IndexBlock>>> {
    let end = size - FOOTER_SIZE;
    r.seek(SeekFrom::Start(end))?;
    let index_offset = r.read_u64::<BigEndian>()?;
    if !(HEADER_SIZE..=end).contains(&index_offset) {
        return Err(invalid(format!("index offset {index_offset} out of range")));
    }
    r.seek(SeekFrom::Start(index_offset))?;

    let mut index = BTreeMap::new();
    let mut pos = index_offset;
    while pos < end {
        let key_len = r.read_u16::<BigEndian>()?;
        let mut key = vec![0; key_len as usize];
        r.read_exact(&mut key)?;
        let key = String::from_utf8(key).map_err(|e| invalid(e.to_string()))?;

        let count = r.read_u16::<BigEndian>()?;
        let mut blocks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let block = IndexBlock {
                min_time: r.read_i64::<BigEndian>()?,
                max_time: r.read_i64::<BigEndian>()?,
                offset: r.read_u64::<BigEndian>()?,
                size: r.read_u32::<BigEndian>()?,
            };
            let block_end = block.offset.checked_add(u64::from(block.size));
            if block.offset < HEADER_SIZE || !block_end.is_some_and(|end| end <= index_offset) {
                return Err(invalid(format!(
                    "block for {key:?} at offset {} lies outside the data section",
                    block.offset
                )));
            }
            blocks.push(block);
        }
        pos += 2 + u64::from(key_len) + 2 + u64::from(count) * 28;
        index.insert(key, blocks);
    }
    if pos != end {
        return Err(invalid("index runs into the footer"));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShardWriter;
    use pretty_assertions::assert_eq;

    fn write_shard(dir: &Path) -> PathBuf {
        let mut writer = ShardWriter::create(dir.join("1"), u64::MAX).unwrap();
        writer
            .write_values("mem", &[(3, b"x".to_vec()), (1, b"y".to_vec())])
            .unwrap();
        writer.write_values("cpu", &[(10, vec![1, 2])]).unwrap();
        writer.write_values("mem", &[(2, vec![])]).unwrap();
        writer.close().unwrap().remove(0)
    }

    #[test_log::test]
    fn reads_blocks_in_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = TsmFile::open(write_shard(dir.path())).unwrap();

        assert_eq!(file.keys().collect::<Vec<_>>(), vec!["cpu", "mem"]);
        assert!(file.contains("cpu"));
        assert!(!file.contains("disk"));
        assert!(file.blocks("disk").is_none());

        let blocks = file.blocks("mem").unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!((blocks[0].min_time, blocks[0].max_time), (1, 3));

        let values: Vec<_> = blocks
            .iter()
            .flat_map(|b| file.read_block(b).unwrap())
            .collect();
        assert_eq!(
            values,
            vec![(3, b"x".to_vec()), (1, b"y".to_vec()), (2, vec![])]
        );
    }

    #[test]
    fn detects_corrupt_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_shard(dir.path());

        let file = TsmFile::open(&path).unwrap();
        let entry = file.blocks("cpu").unwrap()[0];
        drop(file);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[entry.offset as usize + 4] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let file = TsmFile::open(&path).unwrap();
        let err = file.read_block(&entry).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }), "{err}");
    }

    #[test]
    fn rejects_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000000001-000000001.tsm");

        std::fs::write(&path, b"short").unwrap();
        assert!(matches!(
            TsmFile::open(&path).unwrap_err(),
            Error::BadHeader { .. }
        ));

        let mut bytes = MAGIC_NUMBER.to_be_bytes().to_vec();
        bytes.push(VERSION);
        bytes.extend_from_slice(&1_000u64.to_be_bytes());
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            TsmFile::open(&path).unwrap_err(),
            Error::BadIndex { .. }
        ));
    }

    #[test]
    fn rejects_block_past_the_end_of_the_address_space() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000000001-000000001.tsm");

        let mut bytes = MAGIC_NUMBER.to_be_bytes().to_vec();
        bytes.push(VERSION);
        bytes.extend_from_slice(&3u16.to_be_bytes());
        bytes.extend_from_slice(b"cpu");
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&0i64.to_be_bytes());
        bytes.extend_from_slice(&0i64.to_be_bytes());
        bytes.extend_from_slice(&(u64::MAX - 1).to_be_bytes());
        bytes.extend_from_slice(&10u32.to_be_bytes());
        bytes.extend_from_slice(&HEADER_SIZE.to_be_bytes());
        std::fs::write(&path, bytes).unwrap();

        let err = TsmFile::open(&path).unwrap_err();
        assert!(matches!(err, Error::BadIndex { .. }), "{err}");
    }
}
