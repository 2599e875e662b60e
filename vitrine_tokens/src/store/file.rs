//! A file-backed session persistence layer

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use super::{PersistError, PersistedSession, SessionPersistence};

/// Persists the session as a JSON document in a local file
///
/// Writes go to a sibling temporary file which then replaces the session file,
/// so a crash mid-write never leaves one credential updated without the other.
#[derive(Debug)]
pub struct FileSessionPersistence {
    path: PathBuf,
}

impl FileSessionPersistence {
    /// Constructs a new file persistence layer
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The session file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_owned();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionPersistence for FileSessionPersistence {
    fn load(&self) -> Result<PersistedSession, PersistError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                Ok(PersistedSession::default())
            }
            Err(error) => Err(error.into()),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<(), PersistError> {
        let staging = self.staging_path();

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            file_opts.mode(0o600);
        }

        let mut file = file_opts.open(&staging)?;
        let data = serde_json::to_vec_pretty(session)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn erase(&self) -> Result<(), PersistError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
