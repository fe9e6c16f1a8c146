use std::{
    io::{ErrorKind, Write},
    path::Path,
};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::obligation::ObligationRecord;
use crate::types::{BlockHeight, Currency, HostSettings};

pub const PERSIST_FILENAME: &str = "host.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedHost {
    pub settings: HostSettings,
    pub profit: Currency,
    pub block_height: BlockHeight,
    pub last_change_id: Option<u64>,
    pub file_counter: u64,
    pub secret_key: String,
    pub obligations: Vec<ObligationRecord>,
}

pub async fn load(path: &Path) -> Result<Option<PersistedHost>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes the whole state to a temporary file next to `path`, then renames it
/// into place so a crash never leaves a torn file.
pub fn save(path: &Path, host: &PersistedHost) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("Persist path has no parent: {}", path.display()))?;
    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, host)?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{gen_contract, gen_record};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_loads_none() -> Result<()> {
        let temp_dir = TempDir::new()?;
        assert!(load(&temp_dir.path().join(PERSIST_FILENAME)).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_then_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(PERSIST_FILENAME);
        let host = PersistedHost {
            settings: HostSettings::default(),
            profit: Currency::new(42),
            block_height: 7,
            last_change_id: Some(3),
            file_counter: 1,
            secret_key: "00".repeat(31) + "01",
            obligations: vec![gen_record(1, gen_contract(100, 120, 10))],
        };
        save(&path, &host)?;
        assert_eq!(load(&path).await?, Some(host));
        Ok(())
    }
}
