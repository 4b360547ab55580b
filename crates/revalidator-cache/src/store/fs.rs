use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use super::{Store, StoredEntry};
use crate::error::StoreError;

/// Name of the directory used for temporary files, relative to the store root.
const TMP_DIR: &str = ".tmp";

/// A [`Store`] keeping one JSON file per key on the local file system.
///
/// Files are written to a temporary file first and then atomically moved into place, so readers
/// never observe partially written entries.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

/// The on-disk representation of an entry.
///
/// Paths are derived from a hash of the key, so the key itself is kept in the file as well to be
/// able to list keys.
#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    key: String,
    value: serde_json::Value,
    stored_at: DateTime<Utc>,
}

impl FilesystemStore {
    /// Creates a store rooted at `root`, creating the directory if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the relative path for `key`.
    ///
    /// The relative path is a sha-256 hash hex-formatted like so:
    /// `aa/bbccdd/eeff...`
    fn relative_path(key: &str) -> String {
        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        format!("{}/{}/{}", &hash[..2], &hash[2..8], &hash[8..])
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(Self::relative_path(key))
    }
}

fn read_entry(path: &Path) -> Result<FileEntry, StoreError> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

#[async_trait]
impl Store for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let path = self.entry_path(key);
        tracing::trace!("Reading store entry at {}", path.display());

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry: FileEntry = serde_json::from_slice(&data)?;

        if entry.key != key {
            tracing::warn!(
                path = %path.display(),
                stored_key = %entry.key,
                "Store entry belongs to a different key",
            );
            return Ok(None);
        }

        Ok(Some(StoredEntry {
            value: entry.value,
            stored_at: entry.stored_at,
        }))
    }

    async fn set(&self, key: &str, entry: StoredEntry) -> Result<(), StoreError> {
        let path = self.entry_path(key);
        let contents = serde_json::to_vec(&FileEntry {
            key: key.to_owned(),
            value: entry.value,
            stored_at: entry.stored_at,
        })?;

        let parent_dir = path
            .parent()
            .ok_or_else(|| io::Error::other("no parent directory to persist entry"))?;
        fs::create_dir_all(parent_dir).await?;

        let temp_dir = self.root.join(TMP_DIR);
        fs::create_dir_all(&temp_dir).await?;
        let temp_file = NamedTempFile::new_in(&temp_dir)?;
        let mut dest = File::from_std(temp_file.reopen()?);
        dest.write_all(&contents).await?;
        dest.flush().await?;

        tracing::trace!("Persisting store entry at {}", path.display());
        temp_file.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            let entries = WalkDir::new(&root)
                .into_iter()
                .filter_entry(|entry| entry.file_name() != TMP_DIR);

            for entry in entries {
                let entry = entry.map_err(io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                match read_entry(entry.path()) {
                    Ok(file_entry) => keys.push(file_entry.key),
                    // Concurrently deleted by another writer.
                    Err(StoreError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => {
                        tracing::warn!(
                            error = &err as &dyn std::error::Error,
                            path = %entry.path().display(),
                            "Skipping unreadable store entry",
                        );
                    }
                }
            }
            Ok::<_, StoreError>(keys)
        });

        task.await.map_err(io::Error::other)?
    }
}
