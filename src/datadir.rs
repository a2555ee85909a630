use std::{fmt, fs, io, path};

use crate::config::DB_VERSION;

/// The directory holding the ledger database file.
#[derive(Debug, Clone)]
pub struct DataDirectory {
    path: path::PathBuf,
}

#[derive(Debug)]
pub enum DataDirError {
    /// A ledger database from an incompatible format version was found
    /// (and deleted). The operator must restart to re-index from scratch.
    HardFork { old_version: String },
    Io(io::Error),
}

impl fmt::Display for DataDirError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HardFork { old_version } => write!(
                f,
                "Hard fork: deleted ledger database with version '{}' (current is '{}'). \
                 Restart to re-index the chain.",
                old_version, DB_VERSION
            ),
            Self::Io(e) => write!(f, "Data directory error: {}", e),
        }
    }
}

impl std::error::Error for DataDirError {}

impl From<io::Error> for DataDirError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl DataDirectory {
    pub fn new(path: path::PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &path::Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create the directory and any missing parent, with RWX permissions
    /// restricted to the user on UNIX.
    pub fn init(&self) -> Result<(), io::Error> {
        #[cfg(unix)]
        return {
            use fs::DirBuilder;
            use std::os::unix::fs::DirBuilderExt;

            let mut builder = DirBuilder::new();
            builder.mode(0o700).recursive(true).create(&self.path)
        };

        #[cfg(not(unix))]
        return fs::create_dir_all(&self.path);
    }

    /// Path of the ledger database for the current format version.
    pub fn ledger_db_file(&self) -> path::PathBuf {
        self.path.join(format!("ledger.{}.db", DB_VERSION))
    }

    /// Delete any `ledger.<version>.db` file whose version is not the
    /// current one. If one was found this is a hard fork: an error is
    /// returned for the operator after the stale file was removed.
    pub fn check_db_version(&self) -> Result<(), DataDirError> {
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = match file_name.to_str() {
                Some(name) => name,
                None => continue,
            };
            let parts: Vec<&str> = file_name.split('.').collect();
            if parts.len() != 3 || parts[0] != "ledger" || parts[2] != "db" {
                continue;
            }
            if parts[1] != DB_VERSION.to_string() {
                let old_version = parts[1].to_string();
                fs::remove_file(entry.path())?;
                return Err(DataDirError::HardFork { old_version });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_version_check() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDirectory::new(tmp.path().to_path_buf());

        // Empty directory, nothing to complain about.
        data_dir.check_db_version().unwrap();

        // A current-version database is left alone.
        let current = data_dir.ledger_db_file();
        fs::write(&current, b"").unwrap();
        data_dir.check_db_version().unwrap();
        assert!(current.exists());

        // Unrelated files are ignored.
        fs::write(tmp.path().join("ledger.db"), b"").unwrap();
        fs::write(tmp.path().join("notes.0.txt"), b"").unwrap();
        data_dir.check_db_version().unwrap();

        // A stale version is deleted and reported.
        let stale = tmp.path().join("ledger.0.db");
        fs::write(&stale, b"").unwrap();
        let err = data_dir.check_db_version().unwrap_err();
        assert!(matches!(err, DataDirError::HardFork { .. }));
        assert!(!stale.exists());
        assert!(current.exists());
    }

    #[test]
    fn init_creates_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDirectory::new(tmp.path().join("a").join("b"));
        assert!(!data_dir.exists());
        data_dir.init().unwrap();
        assert!(data_dir.exists());
    }
}
