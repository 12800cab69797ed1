//! Disk-backed persistence: each key maps to one file under a base
//! directory, written via write-temp-then-rename so a crash mid-write
//! never leaves a torn file behind.

use super::{validate_key, Persistence, PersistenceError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Filesystem-based key-value store.
///
/// # Examples
///
/// ```no_run
/// use usage_agent_core::persistence::DiskPersistence;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = DiskPersistence::new(PathBuf::from("./state")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DiskPersistence {
    base_path: PathBuf,
}

impl DiskPersistence {
    /// Create disk-backed persistence rooted at `base_path`, creating it
    /// if necessary.
    pub async fn new(base_path: PathBuf) -> Result<Self, PersistenceError> {
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| PersistenceError::Io {
                key: base_path.display().to_string(),
                source: e,
            })?;
        Ok(Self { base_path })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(key).with_extension("json")
    }
}

#[async_trait]
impl Persistence for DiskPersistence {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        validate_key(key)?;
        let path = self.path_for(key);

        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn store(&self, key: &str, blob: Vec<u8>) -> Result<(), PersistenceError> {
        validate_key(key)?;
        let path = self.path_for(key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::Io {
                    key: key.to_string(),
                    source: e,
                })?;
        }

        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| PersistenceError::Io {
                key: key.to_string(),
                source: e,
            })?;

        file.write_all(&blob)
            .await
            .map_err(|e| PersistenceError::Io {
                key: key.to_string(),
                source: e,
            })?;

        file.flush().await.map_err(|e| PersistenceError::Io {
            key: key.to_string(),
            source: e,
        })?;
        drop(file);

        // Rename is atomic on the same filesystem; this is the point at
        // which a fresh `load` is guaranteed to observe the new blob.
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| PersistenceError::Io {
                key: key.to_string(),
                source: e,
            })?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        validate_key(key)?;
        let path = self.path_for(key);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, PersistenceError> {
        let mut keys = Vec::new();
        collect_keys(&self.base_path, &self.base_path, &mut keys)
            .await
            .map_err(|e| PersistenceError::Io {
                key: self.base_path.display().to_string(),
                source: e,
            })?;
        Ok(keys)
    }
}

/// Recursively walk `dir`, collecting `.json` files as keys relative to
/// `root` (so a file at `<root>/sender/disk.json` becomes key `sender/disk`).
fn collect_keys<'a>(
    root: &'a Path,
    dir: &'a Path,
    out: &'a mut Vec<String>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                collect_keys(root, &path, out).await?;
                continue;
            }

            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Ok(relative) = path.strip_prefix(root) {
                    let relative = relative.with_extension("");
                    if let Some(key) = relative.to_str() {
                        out.push(key.replace(std::path::MAIN_SEPARATOR, "/"));
                    }
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
#[path = "disk_tests.rs"]
mod tests;
