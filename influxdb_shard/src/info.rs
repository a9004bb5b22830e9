//! Discovery of the shards held below a data directory.
//!
//! The data directory is laid out as `<root>/<database>/<retention policy>/<shard>`
//! where `<shard>` is either a legacy single-file shard or a `tsm1` shard
//! directory.
use crate::format::EngineFormat;

use tracing::{debug, info, warn};

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix appended to a database directory when it is backed up.
pub const BACKUP_EXT: &str = "bak";

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to access data directory at {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to inspect shard at {}: {source}", path.display())]
    Inspect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to determine size of shard at {}: {source}", path.display())]
    Size {
        path: PathBuf,
        source: walkdir::Error,
    },
}

pub type Result<T, E = DiscoveryError> = std::result::Result<T, E>;

/// Read-only description of one discovered shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub database: String,
    pub retention_policy: String,
    /// Name of the shard entry inside its retention policy directory.
    pub path: String,
    pub format: EngineFormat,
    pub size: u64,
}

impl ShardInfo {
    /// The absolute location of the shard below `root`.
    pub fn full_path(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref()
            .join(&self.database)
            .join(&self.retention_policy)
            .join(&self.path)
    }

    /// The numeric shard id, if the shard is named by one.
    pub fn id(&self) -> Option<u64> {
        self.path.parse().ok()
    }

    fn sort_key(&self) -> (&str, &str, &str) {
        (&self.database, &self.retention_policy, &self.path)
    }
}

/// An ordered collection of [`ShardInfo`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardInfos(Vec<ShardInfo>);

impl ShardInfos {
    pub fn new(mut shards: Vec<ShardInfo>) -> Self {
        shards.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Self(shards)
    }

    /// Removes all shards already stored in `format`.
    pub fn filter_format(self, format: EngineFormat) -> Self {
        Self(self.0.into_iter().filter(|s| s.format != format).collect())
    }

    /// Keeps only the shards of the named databases. An empty list keeps
    /// every shard.
    pub fn filter_databases<S: AsRef<str>>(self, databases: &[S]) -> Self {
        if databases.is_empty() {
            return self;
        }
        let wanted: BTreeSet<&str> = databases.iter().map(AsRef::as_ref).collect();
        Self(
            self.0
                .into_iter()
                .filter(|s| wanted.contains(s.database.as_str()))
                .collect(),
        )
    }

    /// The distinct databases owning these shards, in shard order.
    pub fn databases(&self) -> Vec<String> {
        let mut databases: Vec<String> = Vec::new();
        for shard in &self.0 {
            if !databases.contains(&shard.database) {
                databases.push(shard.database.clone());
            }
        }
        databases
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ShardInfo> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<ShardInfo> {
        self.0
    }
}

impl IntoIterator for ShardInfos {
    type Item = ShardInfo;
    type IntoIter = std::vec::IntoIter<ShardInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ShardInfos {
    type Item = &'a ShardInfo;
    type IntoIter = std::slice::Iter<'a, ShardInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl AsRef<[ShardInfo]> for ShardInfos {
    fn as_ref(&self) -> &[ShardInfo] {
        &self.0
    }
}

/// Returns true if `name` looks like a database backup directory.
pub fn is_backup(name: &str) -> bool {
    name.strip_suffix(BACKUP_EXT)
        .is_some_and(|stem| stem.ends_with('.'))
}

/// Walk `root` and describe every shard found below it, sorted by database,
/// retention policy and shard path.
pub fn discover(root: impl AsRef<Path>) -> Result<ShardInfos> {
    let root = root.as_ref();
    let mut shards = vec![];

    for database in list_dirs(root)? {
        if is_backup(&database) {
            info!(%database, "skipping database directory as it looks like a backup");
            continue;
        }
        let db_path = root.join(&database);
        for retention_policy in list_dirs(&db_path)? {
            let rp_path = db_path.join(&retention_policy);
            for path in list_entries(&rp_path)? {
                let shard_path = rp_path.join(&path);
                let format = EngineFormat::detect(&shard_path).map_err(|source| {
                    DiscoveryError::Inspect {
                        path: shard_path.clone(),
                        source,
                    }
                })?;
                let Some(format) = format else {
                    warn!(path = %shard_path.display(), "skipping shard in unrecognised format");
                    continue;
                };
                let size = shard_size(&shard_path)?;
                debug!(path = %shard_path.display(), %format, size, "discovered shard");
                shards.push(ShardInfo {
                    database: database.clone(),
                    retention_policy: retention_policy.clone(),
                    path,
                    format,
                    size,
                });
            }
        }
    }

    Ok(ShardInfos::new(shards))
}

fn read_dir(path: &Path) -> Result<Vec<(String, fs::FileType)>> {
    let read_dir_err = |source| DiscoveryError::ReadDir {
        path: path.to_path_buf(),
        source,
    };
    let mut entries = vec![];
    for entry in fs::read_dir(path).map_err(read_dir_err)? {
        let entry = entry.map_err(read_dir_err)?;
        let file_type = entry.file_type().map_err(read_dir_err)?;
        match entry.file_name().into_string() {
            Ok(name) => entries.push((name, file_type)),
            Err(name) => warn!(?name, parent = %path.display(), "skipping non UTF-8 entry"),
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

fn list_dirs(path: &Path) -> Result<Vec<String>> {
    Ok(read_dir(path)?
        .into_iter()
        .filter(|(_, t)| t.is_dir())
        .map(|(name, _)| name)
        .collect())
}

fn list_entries(path: &Path) -> Result<Vec<String>> {
    Ok(read_dir(path)?
        .into_iter()
        .filter(|(_, t)| t.is_dir() || t.is_file())
        .map(|(name, _)| name)
        .collect())
}

/// Total size in bytes of every file at or below `path`.
pub fn shard_size(path: &Path) -> Result<u64> {
    let mut size = 0;
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(|source| DiscoveryError::Size {
            path: path.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() {
            size += entry
                .metadata()
                .map_err(|source| DiscoveryError::Size {
                    path: path.to_path_buf(),
                    source,
                })?
                .len();
        }
    }
    Ok(size)
}
