//! JSON file store

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::Builder;
use tracing::{debug, trace};

use super::{KeyValueStore, StoreEdit, StoreMap, apply_edits, read_int, read_string};
use crate::error::StoreError;

/// [`KeyValueStore`] persisted as a JSON object in a single file
///
/// Every batch rewrites the file through a temporary file in the same
/// directory that is then renamed over it, so a crash leaves either the old
/// or the new contents.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<StoreMap>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(contents) if contents.is_empty() => StoreMap::new(),
            Ok(contents) => serde_json::from_slice(&contents)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => StoreMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = values.len(), "Opened channel state store");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn get_int(&self, key: &str) -> Option<i64> {
        read_int(&self.values.lock(), key)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        read_string(&self.values.lock(), key)
    }

    fn apply(&self, edits: Vec<StoreEdit>) -> Result<(), StoreError> {
        let mut values = self.values.lock();
        let mut updated = values.clone();
        apply_edits(&mut updated, edits);

        let contents = serde_json::to_vec_pretty(&updated)?;
        atomic_write(&self.path, &contents)?;
        trace!(path = %self.path.display(), keys = updated.len(), "Wrote channel state store");

        *values = updated;
        Ok(())
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut builder = Builder::new();
    builder.prefix(
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("apdu-channels"),
    );
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}
