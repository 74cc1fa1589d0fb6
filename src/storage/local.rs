use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufReader};
use uuid::Uuid;

use super::{BlobStorage, StorageError};
use crate::store::path::normalize_path;

/// Blob storage on the local filesystem, rooted at a single directory.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(root: &Path) -> Self {
        Self {
            base_path: root.to_path_buf(),
        }
    }

    fn blob_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        let normalized =
            normalize_path(path).map_err(|_| StorageError::InvalidPath(path.to_string()))?;
        Ok(self.base_path.join(normalized))
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(".tmp")
            .join(Uuid::new_v4().to_string())
    }
}

impl BlobStorage for LocalStorage {
    type Reader = BufReader<File>;

    async fn put(&self, path: &str, data: &[u8]) -> Result<u64, StorageError> {
        let final_path = self.blob_path(path)?;

        let temp_path = self.temp_path();
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let written: std::io::Result<()> = async {
            let mut temp_file = File::create(&temp_path).await?;
            temp_file.write_all(data).await?;
            temp_file.sync_all().await?;

            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&temp_path, &final_path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(data.len() as u64)
    }

    async fn get(&self, path: &str) -> Result<(BufReader<File>, u64), StorageError> {
        let full = self.blob_path(path)?;
        let file = File::open(&full)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;

        let size = file.metadata().await?.len();

        Ok((BufReader::new(file), size))
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.blob_path(path)?;

        match fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.blob_path(path)?;
        Ok(fs::try_exists(&full).await?)
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        let full = self.blob_path(path)?;
        let metadata = fs::metadata(&full)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    const PATH: &str = "assets/a1/v1/ring.stl";

    #[tokio::test]
    async fn test_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        let written = storage.put(PATH, b"solid ring").await.unwrap();
        assert_eq!(written, 10);

        assert!(storage.exists(PATH).await.unwrap());
        assert_eq!(storage.size(PATH).await.unwrap(), 10);

        let (mut reader, size) = storage.get(PATH).await.unwrap();
        assert_eq!(size, 10);

        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"solid ring");
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        storage.put(PATH, b"first").await.unwrap();
        storage.put(PATH, b"second!").await.unwrap();
        assert_eq!(storage.size(PATH).await.unwrap(), 7);

        let leftovers = std::fs::read_dir(temp_dir.path().join(".tmp"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_failed_put_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        // A plain file where the version directory should go.
        std::fs::create_dir_all(temp_dir.path().join("assets")).unwrap();
        std::fs::write(temp_dir.path().join("assets/a1"), b"").unwrap();

        assert!(storage.put(PATH, b"solid ring").await.is_err());

        let leftovers = std::fs::read_dir(temp_dir.path().join(".tmp"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        assert!(!storage.exists(PATH).await.unwrap());
        assert!(matches!(
            storage.get(PATH).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.size(PATH).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        storage.put(PATH, b"123").await.unwrap();
        assert!(storage.delete(PATH).await.unwrap());
        assert!(!storage.exists(PATH).await.unwrap());
        assert!(!storage.delete(PATH).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        assert!(matches!(
            storage.put("../outside", b"x").await,
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            storage.exists("").await,
            Err(StorageError::InvalidPath(_))
        ));
    }
}
