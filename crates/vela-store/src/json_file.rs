//! Atomic JSON file read/write shared by the file-backed stores.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use vela_core::{Error, Result};

/// Read and decode `path`. A missing file yields `Ok(None)`.
pub(crate) async fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value = serde_json::from_slice(&bytes).map_err(|e| {
        Error::Storage(format!("Failed to decode {}: {e}", path.display()))
    })?;
    Ok(Some(value))
}

/// Encode `value` and replace `path` with it via write-then-rename, so a
/// crash mid-write leaves the previous file intact.
pub(crate) async fn write<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;

    debug!(path = %path.display(), bytes = bytes.len(), "JSON file written");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<Vec<u32>> = read(&dir.path().join("absent.json")).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("values.json");

        write(&path, &vec![1u32, 2, 3]).await.unwrap();
        let value: Option<Vec<u32>> = read(&path).await.unwrap();

        assert_eq!(value, Some(vec![1, 2, 3]));
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_read_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let err = read::<Vec<u32>>(&path).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_read_blank_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.json");
        tokio::fs::write(&path, b"  \n").await.unwrap();

        let value: Option<Vec<u32>> = read(&path).await.unwrap();
        assert!(value.is_none());
    }
}
