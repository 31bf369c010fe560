//! File-backed durable storage.
//!
//! One `<name>.json` file per blob under a directory. Writes go to a temp file
//! first and are renamed into place, so a crash mid-write leaves the previous
//! snapshot intact rather than a truncated one.

use super::DurableStorage;
use crate::error::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Durable storage rooted at a directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    ///
    /// # Errors
    /// Returns `Err` if the directory cannot be created
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStorage { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Bytes outside `[A-Za-z0-9.-]` become `_xx` (lowercase hex), so distinct
    /// names never share a file.
    fn path_for(&self, name: &str) -> PathBuf {
        let mut file = String::with_capacity(name.len() + 5);
        for b in name.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'.' {
                file.push(char::from(b));
            } else {
                file.push_str(&format!("_{:02x}", b));
            }
        }
        file.push_str(".json");
        self.dir.join(file)
    }
}

impl DurableStorage for FileStorage {
    fn get_item(&self, name: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(name)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, name: &str, value: &str) -> Result<()> {
        let path = self.path_for(name);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        debug!("✓ FileStorage SET {} -> {}", name, path.display());
        Ok(())
    }

    fn remove_item(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
