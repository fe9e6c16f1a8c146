use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tokio::fs;

use crate::collaborators::FileStore;

/// Stores contract data as plain files under a root directory.
#[derive(Clone, Debug)]
pub struct DiskFileStore {
    root: PathBuf,
}

impl DiskFileStore {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() || path.components().any(|c| c.as_os_str() == "..") {
            bail!("Path escapes file store root: {}", path.display());
        }
        Ok(self.root.join(path))
    }
}

impl FileStore for DiskFileStore {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(path)?).await?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        Ok(fs::write(self.resolve(path)?, data).await?)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(self.resolve(path)?).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            res => Ok(res?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_delete() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = DiskFileStore::new(temp_dir.path().join("files")).await?;
        let path = Path::new("1.dat");

        store.write(path, b"hello").await?;
        assert_eq!(store.read(path).await?, b"hello");

        store.delete(path).await?;
        assert!(store.read(path).await.is_err());
        // deleting twice is fine
        store.delete(path).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = DiskFileStore::new(temp_dir.path().to_path_buf()).await?;
        assert!(store.read(Path::new("../secret")).await.is_err());
        assert!(store.write(Path::new("/etc/x"), b"").await.is_err());
        Ok(())
    }
}
