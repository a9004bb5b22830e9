//! Backups of database directories, taken before any of their shards are
//! converted.
use influxdb_shard::BACKUP_EXT;
use tracing::{debug, info};
use walkdir::WalkDir;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("backup of {} already exists at {}", source_path.display(), path.display())]
    AlreadyExists {
        source_path: PathBuf,
        path: PathBuf,
    },

    #[error("error copying {} to backup: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error walking {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Where the backup of the database directory `database_path` lives.
pub fn backup_path(database_path: &Path) -> PathBuf {
    let mut path = OsString::from(database_path.as_os_str());
    path.push(".");
    path.push(BACKUP_EXT);
    PathBuf::from(path)
}

/// Copy the database directory at `database_path` to `<database_path>.bak`.
///
/// An existing backup is never overwritten. The copy keeps the directory
/// structure and permission bits of the source; a copy that fails midway is
/// left in place for the operator to inspect.
pub fn backup_database(database_path: &Path) -> Result<PathBuf> {
    let dest = backup_path(database_path);
    let exists = dest.try_exists().map_err(|source| Error::Io {
        path: dest.clone(),
        source,
    })?;
    if exists {
        return Err(Error::AlreadyExists {
            source_path: database_path.to_path_buf(),
            path: dest,
        });
    }

    copy_dir(database_path, &dest)?;
    info!(
        database = %database_path.display(),
        backup = %dest.display(),
        "database backed up"
    );
    Ok(dest)
}

fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    // permissions of directories are applied once their contents are copied
    let mut dirs = vec![];

    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|source| Error::Walk {
            path: src.to_path_buf(),
            source,
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields paths below its root");
        let to = dest.join(relative);
        let io_err = |source| Error::Io {
            path: entry.path().to_path_buf(),
            source,
        };

        let metadata = entry.metadata().map_err(|source| Error::Walk {
            path: entry.path().to_path_buf(),
            source,
        })?;
        if metadata.is_dir() {
            fs::create_dir_all(&to).map_err(io_err)?;
            dirs.push((to, metadata.permissions()));
        } else {
            debug!(from = %entry.path().display(), to = %to.display(), "copying file");
            // fs::copy carries the permission bits over
            fs::copy(entry.path(), &to).map_err(io_err)?;
        }
    }

    for (dir, permissions) in dirs.into_iter().rev() {
        fs::set_permissions(&dir, permissions).map_err(|source| Error::Io { path: dir, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree(root: &Path) -> Vec<(String, Vec<u8>)> {
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .map(Result::unwrap)
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let name = e.path().strip_prefix(root).unwrap().display().to_string();
                (name, fs::read(e.path()).unwrap())
            })
            .collect()
    }

    #[test]
    fn backup_path_appends_extension() {
        assert_eq!(
            backup_path(Path::new("/data/mydb")),
            PathBuf::from("/data/mydb.bak")
        );
    }

    #[test_log::test]
    fn backs_up_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("d1");
        fs::create_dir_all(db.join("default")).unwrap();
        fs::create_dir_all(db.join("empty_rp")).unwrap();
        fs::write(db.join("default/1"), b"shard one").unwrap();
        fs::write(db.join("default/2"), b"shard two").unwrap();

        let backup = backup_database(&db).unwrap();
        assert_eq!(backup, dir.path().join("d1.bak"));
        assert_eq!(tree(&backup), tree(&db));
        assert!(backup.join("empty_rp").is_dir());

        // a second backup is refused and leaves the first untouched
        fs::write(db.join("default/1"), b"changed").unwrap();
        let err = backup_database(&db).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }), "{err}");
        assert_eq!(fs::read(backup.join("default/1")).unwrap(), b"shard one");
    }

    #[cfg(unix)]
    #[test]
    fn keeps_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("d1");
        fs::create_dir_all(db.join("rp")).unwrap();
        let shard = db.join("rp/1");
        fs::write(&shard, b"data").unwrap();
        fs::set_permissions(&shard, fs::Permissions::from_mode(0o640)).unwrap();
        fs::set_permissions(db.join("rp"), fs::Permissions::from_mode(0o750)).unwrap();

        let backup = backup_database(&db).unwrap();
        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&backup.join("rp/1")), 0o640);
        assert_eq!(mode(&backup.join("rp")), 0o750);
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = backup_database(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::Walk { .. }), "{err}");
    }
}
