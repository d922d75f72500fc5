//! File system utilities
//!
//! Thin async wrappers over `tokio::fs` that tag every failure with the
//! path involved.

use std::io::ErrorKind;
use std::path::Path;

use crate::core::models::CacheError;

/// Ensure directory exists (recursive)
pub async fn ensure_dir_exists(path: &Path) -> Result<(), CacheError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| CacheError::io(path, e))
}

/// Whether anything exists at `path`. Errors other than "not found" propagate.
pub async fn path_exists(path: &Path) -> Result<bool, CacheError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| CacheError::io(path, e))
}

/// Whether `path` is an existing regular file (directories count as absent)
pub async fn is_regular_file(path: &Path) -> Result<bool, CacheError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.is_file()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// Size of a regular file in bytes
pub async fn file_size(path: &Path) -> Result<u64, CacheError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| CacheError::io(path, e))?;
    Ok(metadata.len())
}

pub async fn read_file(path: &Path) -> Result<Vec<u8>, CacheError> {
    tokio::fs::read(path).await.map_err(|e| CacheError::io(path, e))
}

pub async fn read_to_string(path: &Path) -> Result<String, CacheError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CacheError::io(path, e))
}

pub async fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), CacheError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| CacheError::io(path, e))
}

/// Remove a file or a whole directory tree. A missing path is not an error.
pub async fn remove_path(path: &Path) -> Result<(), CacheError> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CacheError::io(path, e)),
    };

    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_read_and_size() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir_exists(&nested).await.unwrap();

        let file = nested.join("data.bin");
        write_file(&file, b"hello").await.unwrap();

        assert!(path_exists(&file).await.unwrap());
        assert!(is_regular_file(&file).await.unwrap());
        assert_eq!(file_size(&file).await.unwrap(), 5);
        assert_eq!(read_file(&file).await.unwrap(), b"hello");
        assert_eq!(read_to_string(&file).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_remove_path_handles_files_dirs_and_missing() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("segments");
        ensure_dir_exists(&sub).await.unwrap();
        write_file(&sub.join("0.ts"), b"x").await.unwrap();
        let file = dir.path().join("cache");
        write_file(&file, b"{}").await.unwrap();

        remove_path(&sub).await.unwrap();
        remove_path(&file).await.unwrap();
        remove_path(&dir.path().join("never-existed")).await.unwrap();

        assert!(!path_exists(&sub).await.unwrap());
        assert!(!path_exists(&file).await.unwrap());
    }

    #[tokio::test]
    async fn test_directory_is_not_a_regular_file() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("ts");
        ensure_dir_exists(&sub).await.unwrap();

        assert!(path_exists(&sub).await.unwrap());
        assert!(!is_regular_file(&sub).await.unwrap());
        assert!(!is_regular_file(&dir.path().join("missing.ts")).await.unwrap());
    }

    #[tokio::test]
    async fn test_existence_check_propagates_errors() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain");
        write_file(&file, b"x").await.unwrap();

        // a regular file used as a directory is an error, not "absent"
        let below_file = file.join("m3uObj");
        match path_exists(&below_file).await {
            Err(CacheError::Io { path, .. }) => assert_eq!(path, below_file),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(is_regular_file(&below_file).await.is_err());
    }

    #[tokio::test]
    async fn test_errors_carry_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.bin");

        match file_size(&missing).await {
            Err(CacheError::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
