//! On-disk engine formats a shard can be stored in.
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Magic bytes opening every `b1` shard file.
pub const B1_MAGIC: [u8; 4] = *b"b1sh";

/// Magic bytes opening every `bz1` shard file.
pub const BZ1_MAGIC: [u8; 4] = *b"bz1s";

/// The closed set of storage engine formats a shard can be discovered in.
///
/// `B1` and `Bz1` are legacy single-file encodings; `Tsm1` is the directory
/// based target format that migration converts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineFormat {
    B1,
    Bz1,
    Tsm1,
}

impl EngineFormat {
    /// All formats, legacy ones first.
    pub const ALL: [Self; 3] = [Self::B1, Self::Bz1, Self::Tsm1];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::B1 => "b1",
            Self::Bz1 => "bz1",
            Self::Tsm1 => "tsm1",
        }
    }

    pub fn is_legacy(&self) -> bool {
        !matches!(self, Self::Tsm1)
    }

    /// Determine the format of the shard stored at `path`.
    ///
    /// Directories are `tsm1` shards; files are identified by their magic
    /// bytes. `Ok(None)` is returned for anything unrecognised, including
    /// files too short to carry a magic.
    pub fn detect(path: impl AsRef<Path>) -> io::Result<Option<Self>> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if metadata.is_dir() {
            return Ok(Some(Self::Tsm1));
        }

        let mut magic = [0u8; 4];
        match File::open(path)?.read_exact(&mut magic) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        Ok(match magic {
            B1_MAGIC => Some(Self::B1),
            BZ1_MAGIC => Some(Self::Bz1),
            _ => None,
        })
    }
}

impl Display for EngineFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_formats() {
        let dir = tempfile::tempdir().unwrap();

        let b1 = dir.path().join("1");
        std::fs::write(&b1, [&B1_MAGIC[..], b"rest"].concat()).unwrap();
        let bz1 = dir.path().join("2");
        std::fs::write(&bz1, BZ1_MAGIC).unwrap();
        let tsm1 = dir.path().join("3");
        std::fs::create_dir(&tsm1).unwrap();
        let short = dir.path().join("4");
        std::fs::write(&short, b"b1").unwrap();
        let other = dir.path().join("5");
        std::fs::write(&other, b"not a shard").unwrap();

        assert_eq!(EngineFormat::detect(&b1).unwrap(), Some(EngineFormat::B1));
        assert_eq!(EngineFormat::detect(&bz1).unwrap(), Some(EngineFormat::Bz1));
        assert_eq!(EngineFormat::detect(&tsm1).unwrap(), Some(EngineFormat::Tsm1));
        assert_eq!(EngineFormat::detect(&short).unwrap(), None);
        assert_eq!(EngineFormat::detect(&other).unwrap(), None);
        assert!(EngineFormat::detect(dir.path().join("missing")).is_err());
    }

    #[test]
    fn display() {
        let names: Vec<_> = EngineFormat::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["b1", "bz1", "tsm1"]);
        assert!(EngineFormat::B1.is_legacy());
        assert!(!EngineFormat::Tsm1.is_legacy());
    }
}
