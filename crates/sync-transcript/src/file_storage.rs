use crate::{Error, Result, StorageAdapter};
use std::fs;
use std::path::PathBuf;

/// Disk-backed storage adapter: one JSON file per key under a base
/// directory. Lets embedders keep reconciliation state across restarts
/// without pulling in a database.
///
/// Keys are hex-encoded into file names so `list` can hand back exactly the
/// keys callers wrote; the transaction overlay dedupes its pending writes
/// against listed keys, which breaks if the adapter returns mangled ones.
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_path)
            .map_err(|e| Error::Storage(format!("create {}: {e}", base_path.display())))?;
        Ok(Self { base_path })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", hex::encode(key)))
    }
}

impl StorageAdapter for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("read {key}: {e}"))),
        }
    }

    fn put(&self, key: &str, value: String) -> Result<()> {
        fs::write(self.path_for(key), value)
            .map_err(|e| Error::Storage(format!("write {key}: {e}")))
    }

    fn del(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("delete {key}: {e}"))),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.base_path)
            .map_err(|e| Error::Storage(format!("list {}: {e}", self.base_path.display())))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Storage(format!("list entry: {e}")))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(encoded) = name.strip_suffix(".json") else {
                continue;
            };
            // Files not written by this adapter are ignored.
            let Ok(bytes) = hex::decode(encoded) else {
                continue;
            };
            let Ok(key) = String::from_utf8(bytes) else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
